//! Cord Core
//!
//! Foundational types for the cord: an append-only, causally-ordered log of
//! signed entries contributed by many devices over unreliable transports.
//!
//! This crate holds the pure pieces (entry identity and signing, the
//! Lamport clock, delivery-marker merging, configuration and errors) plus
//! the async seams the runtime plugs into: [`EntryStore`] for persistence
//! and [`PathTransport`] for delivery. It spawns no tasks.

// ----------------------------------------------------------------------------
// Module Declarations
// ----------------------------------------------------------------------------

pub mod clock;
pub mod config;
pub mod crypto;
pub mod entry;
pub mod envelope;
pub mod errors;
pub mod marker;
pub mod reliability;
pub mod store;
pub mod transport;
pub mod types;

// ----------------------------------------------------------------------------
// Public API
// ----------------------------------------------------------------------------

pub use clock::LogicalClock;
pub use config::{CordConfig, CordConfigBuilder, DeliveryCacheConfig, LedgerConfig, RouterConfig};
pub use crypto::{fingerprint, Ed25519KeyProvider, RsaKeyProvider, SigningKeyProvider};
pub use entry::{
    canonical_order, happened_before, make_content_id, make_legacy_id, self_check, sign, verify,
    EntryBody, EntryClass, LogEntry, OrderingKey,
};
pub use envelope::Envelope;
pub use errors::{
    CordError, CordResult, CryptographicError, EntryError, Result, StoreError, TransportError,
};
pub use marker::{merge_delivery_marker, MARKER_MESH, MARKER_ONLINE, MARKER_SUB};
pub use reliability::ReliabilityWindow;
pub use store::{EntryStore, EntryStream, MemoryEntryStore};
pub use transport::{
    ConnectivityEvent, ConnectivityState, PathTransport, RoutingStrategy, TransportPath,
};
pub use types::{AuthorId, EntryId, SystemTimeSource, TimeSource, Timestamp, ENTRY_ID_LEN};
