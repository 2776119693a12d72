//! Property-based tests for entry identity, ordering and signatures
//!
//! These tests verify the invariants the ledger relies on: ids depend only
//! on author, class and payload; the ordering key is a strict total order;
//! and any change to a signed field breaks the signature.

mod test_utils;

use cord_core::{
    canonical_order, happened_before, make_content_id, verify, AuthorId, EntryClass, LogEntry,
    LogicalClock,
};
use proptest::prelude::*;
use test_utils::{body, deterministic_keys, signed};

const AUTHORS: [&str; 3] = ["A1", "A2", "B7"];

fn arb_class() -> impl Strategy<Value = EntryClass> {
    prop::sample::select(EntryClass::ALL.to_vec())
}

fn arb_author() -> impl Strategy<Value = &'static str> {
    prop::sample::select(AUTHORS.to_vec())
}

fn arb_payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..256)
}

proptest! {
    /// Property: the content id ignores every timing and transport field
    #[test]
    fn content_id_ignores_ordering_fields(
        author in arb_author(),
        class in arb_class(),
        payload in arb_payload(),
        lamport_a in 0u64..1_000_000,
        lamport_b in 0u64..1_000_000,
        counter_a in 0u32..100,
        counter_b in 0u32..100,
    ) {
        let a = body(author, class, &payload, lamport_a, counter_a);
        let b = body(author, class, &payload, lamport_b, counter_b);
        prop_assert_eq!(&a.entry_id, &b.entry_id);
        prop_assert!(a.has_consistent_id());
        prop_assert_eq!(
            a.entry_id,
            make_content_id(&AuthorId::new(author), class, &payload)
        );
    }

    /// Property: different payloads give different ids
    #[test]
    fn distinct_payloads_distinct_ids(
        author in arb_author(),
        class in arb_class(),
        p1 in arb_payload(),
        p2 in arb_payload(),
    ) {
        prop_assume!(p1 != p2);
        let author = AuthorId::new(author);
        prop_assert_ne!(
            make_content_id(&author, class, &p1),
            make_content_id(&author, class, &p2)
        );
    }

    /// Property: flipping any payload byte invalidates the signature
    #[test]
    fn payload_flip_breaks_signature(
        author in arb_author(),
        class in arb_class(),
        payload in prop::collection::vec(any::<u8>(), 1..128),
        index in any::<prop::sample::Index>(),
        lamport in 1u64..10_000,
    ) {
        let keys = deterministic_keys(&AUTHORS);
        let entry = signed(&keys, author, class, &payload, lamport, 0);
        prop_assert!(verify(&entry, &keys));

        let (mut tampered, signature, marker, committed) = entry.into_parts();
        let i = index.index(tampered.payload.len());
        tampered.payload[i] ^= 0x01;
        let tampered = LogEntry::from_parts(tampered, signature, marker, committed);
        prop_assert!(!verify(&tampered, &keys));
    }

    /// Property: happened_before is a strict total order on distinct keys
    #[test]
    fn ordering_is_strict_and_total(
        a in (arb_author(), 0u64..50, 0u32..5),
        b in (arb_author(), 0u64..50, 0u32..5),
    ) {
        let keys = deterministic_keys(&AUTHORS);
        let ea = signed(&keys, a.0, EntryClass::Chat, b"a", a.1, a.2);
        let eb = signed(&keys, b.0, EntryClass::Chat, b"b", b.1, b.2);

        prop_assert!(!happened_before(&ea, &ea));
        if ea.ordering_key() == eb.ordering_key() {
            prop_assert!(!happened_before(&ea, &eb) && !happened_before(&eb, &ea));
        } else {
            prop_assert!(happened_before(&ea, &eb) ^ happened_before(&eb, &ea));
        }
    }

    /// Property: sorting by the canonical order never depends on input order
    #[test]
    fn canonical_sort_is_input_independent(
        keys_in in prop::collection::vec((arb_author(), 0u64..20, 0u32..3), 1..12),
        seed in any::<u64>(),
    ) {
        let keys = deterministic_keys(&AUTHORS);
        let entries: Vec<LogEntry> = keys_in
            .iter()
            .enumerate()
            .map(|(i, (author, lamport, counter))| {
                signed(&keys, author, EntryClass::Status, i.to_string().as_bytes(), *lamport, *counter)
            })
            .collect();

        let mut forward = entries.clone();
        forward.sort_by(canonical_order);

        let mut shuffled = entries;
        let len = shuffled.len();
        shuffled.rotate_left((seed as usize) % len);
        shuffled.reverse();
        shuffled.sort_by(canonical_order);

        let forward_keys: Vec<_> = forward.iter().map(|e| e.ordering_key()).collect();
        let shuffled_keys: Vec<_> = shuffled.iter().map(|e| e.ordering_key()).collect();
        prop_assert_eq!(forward_keys, shuffled_keys);
    }

    /// Property: after update(r) the next tick is strictly greater than r
    #[test]
    fn tick_after_update_exceeds_received(
        ticks in 0usize..20,
        received in 0u64..1_000_000,
    ) {
        let mut clock = LogicalClock::new();
        let mut last = 0;
        for _ in 0..ticks {
            let next = clock.tick();
            prop_assert!(next > last);
            last = next;
        }
        clock.update(received);
        prop_assert!(clock.tick() > received);
    }

    /// Property: clock merges commute
    #[test]
    fn clock_updates_commute(updates in prop::collection::vec(0u64..1_000, 0..16)) {
        let mut forward = LogicalClock::new();
        for r in &updates {
            forward.update(*r);
        }
        let mut backward = LogicalClock::new();
        for r in updates.iter().rev() {
            backward.update(*r);
        }
        prop_assert_eq!(forward.current(), backward.current());
    }
}

#[test]
fn test_rsa_provider_matches_entry_signing() {
    use cord_core::{sign, RsaKeyProvider};
    use rand_chacha::ChaCha8Rng;
    use rand_core::SeedableRng;

    let keys = RsaKeyProvider::new();
    let mut rng = ChaCha8Rng::from_seed([7u8; 32]);
    keys.generate_for_with_rng(&AuthorId::new("A1"), &mut rng)
        .unwrap();

    let entry = sign(
        body("A1", EntryClass::Decision, b"evacuate level 3", 2, 0),
        &keys,
        None,
        0,
    )
    .unwrap();
    assert_eq!(entry.signature().len(), 256);
    assert!(verify(&entry, &keys));
    assert!(!entry.signature_base64().is_empty());
}
