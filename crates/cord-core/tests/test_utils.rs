//! Test utilities for deterministic testing of cord entries
//!
//! Seeded key material and entry builders shared by the integration tests.

use cord_core::{
    make_content_id, sign, AuthorId, Ed25519KeyProvider, EntryBody, EntryClass, LogEntry,
};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;

// ----------------------------------------------------------------------------
// Deterministic Keys
// ----------------------------------------------------------------------------

/// Key provider with signing keys for `authors`, generated from a fixed seed
pub fn deterministic_keys(authors: &[&str]) -> Ed25519KeyProvider {
    let mut rng = ChaCha8Rng::from_seed([42u8; 32]);
    let keys = Ed25519KeyProvider::new();
    for author in authors {
        keys.generate_for_with_rng(&AuthorId::new(*author), &mut rng)
            .expect("seeded key generation");
    }
    keys
}

// ----------------------------------------------------------------------------
// Entry Builders
// ----------------------------------------------------------------------------

/// Unsigned body with a consistent content id
pub fn body(
    author: &str,
    class: EntryClass,
    payload: &[u8],
    lamport: u64,
    counter: u32,
) -> EntryBody {
    let author_id = AuthorId::new(author);
    EntryBody {
        entry_id: make_content_id(&author_id, class, payload),
        ledger_id: "test-ledger".to_string(),
        domain_id: "test-hub".to_string(),
        lane_id: "general".to_string(),
        thread_id: None,
        author_id,
        author_display_name: format!("{} display", author),
        entry_class: class,
        payload: payload.to_vec(),
        payload_type: "text/plain".to_string(),
        lamport_timestamp: lamport,
        author_counter: counter,
        wall_clock_time: 1_700_000_000_000,
    }
}

/// Signed entry for `author`, who must have a key in `keys`
pub fn signed(
    keys: &Ed25519KeyProvider,
    author: &str,
    class: EntryClass,
    payload: &[u8],
    lamport: u64,
    counter: u32,
) -> LogEntry {
    sign(body(author, class, payload, lamport, counter), keys, None, 0).expect("signing")
}
