//! Cord Runtime
//!
//! This crate contains the moving parts built on `cord-core`:
//! - `CordLedger`: append, content-addressed dedup, reconciliation and audit
//! - `TransportRouter`: per-send path selection over three transports with
//!   rolling reliability tracking
//! - `DeliveryCache`: transport-level dedup, lane views and mesh resync
//! - `CordNode`: the three wired together

pub mod delivery_cache;
pub mod ledger;
pub mod node;
pub mod offline_queue;
pub mod router;

pub use delivery_cache::{Admission, DeliveryCache, EntrySink};
pub use ledger::{AppendRequest, AuditReport, CordLedger};
pub use node::{CordNode, PublishReceipt};
pub use offline_queue::{MemoryOfflineQueue, OfflineQueue};
pub use router::{DeliveryHealth, LegOutcome, SendOutcome, TransportRouter};

// Re-export core types for convenience
pub use cord_core::{
    AuthorId, ConnectivityEvent, ConnectivityState, CordConfig, CordError, CordResult, EntryClass,
    EntryId, Envelope, LogEntry, PathTransport, RoutingStrategy, TransportPath,
};
