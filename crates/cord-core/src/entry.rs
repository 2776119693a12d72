//! Log entries: the immutable facts committed to the cord
//!
//! An entry is split into the signed [`EntryBody`] and the few fields that
//! sit outside the signature: the signature itself, the delivery marker
//! (telemetry, the only field that may change after commit) and the local
//! commit time.
//!
//! Identity is content-addressed: [`make_content_id`] hashes only the
//! author, class and payload, so the same fact delivered over any number of
//! transports collapses to a single id.

use core::cmp::Ordering;
use core::fmt;
use core::str::FromStr;

use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::crypto::SigningKeyProvider;
use crate::errors::{CordError, CryptographicError, EntryError, Result};
use crate::types::{AuthorId, EntryId, ENTRY_ID_LEN};

/// Separator used in every canonical encoding
const FIELD_SEPARATOR: u8 = b'|';

// ----------------------------------------------------------------------------
// Entry Class
// ----------------------------------------------------------------------------

/// Kind of fact an entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntryClass {
    Status,
    WorkLog,
    Command,
    Decision,
    Alert,
    AiSummary,
    Chat,
}

impl EntryClass {
    pub const ALL: [EntryClass; 7] = [
        EntryClass::Status,
        EntryClass::WorkLog,
        EntryClass::Command,
        EntryClass::Decision,
        EntryClass::Alert,
        EntryClass::AiSummary,
        EntryClass::Chat,
    ];

    /// Canonical wire name, as hashed and signed
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryClass::Status => "STATUS",
            EntryClass::WorkLog => "WORK_LOG",
            EntryClass::Command => "COMMAND",
            EntryClass::Decision => "DECISION",
            EntryClass::Alert => "ALERT",
            EntryClass::AiSummary => "AI_SUMMARY",
            EntryClass::Chat => "CHAT",
        }
    }

    /// Whether ordering and provenance of this class are load-bearing
    /// (records that may be audited later, as opposed to chatter).
    pub fn requires_cord(&self) -> bool {
        matches!(
            self,
            EntryClass::WorkLog | EntryClass::Command | EntryClass::Decision | EntryClass::Alert
        )
    }

    /// High-value classes that warrant redundant multi-path delivery
    pub fn prefers_redundancy(&self) -> bool {
        matches!(
            self,
            EntryClass::Command | EntryClass::Decision | EntryClass::Alert
        )
    }
}

impl fmt::Display for EntryClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntryClass {
    type Err = CordError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        EntryClass::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| {
                EntryError::UnknownClass {
                    value: s.to_string(),
                }
                .into()
            })
    }
}

// ----------------------------------------------------------------------------
// Content Addressing
// ----------------------------------------------------------------------------

fn truncated_digest(parts: &[&[u8]]) -> EntryId {
    let mut hasher = Sha256::new();
    for (index, part) in parts.iter().enumerate() {
        if index > 0 {
            hasher.update([FIELD_SEPARATOR]);
        }
        hasher.update(part);
    }
    let encoded = URL_SAFE_NO_PAD.encode(hasher.finalize());
    EntryId::from_encoded(encoded[..ENTRY_ID_LEN].to_string())
}

/// Compute the transport-independent id of a fact.
///
/// Hashes `author|class|payload` and nothing else: no timing, no transport,
/// no counters. Two deliveries of the same fact always collide.
pub fn make_content_id(author_id: &AuthorId, entry_class: EntryClass, payload: &[u8]) -> EntryId {
    truncated_digest(&[
        author_id.as_bytes(),
        entry_class.as_str().as_bytes(),
        payload,
    ])
}

/// Legacy transport-dependent id, kept for reading stores written before
/// content addressing. Includes the ordering key, so retries do not collide.
pub fn make_legacy_id(
    author_id: &AuthorId,
    entry_class: EntryClass,
    payload: &[u8],
    lamport_timestamp: u64,
    author_counter: u32,
) -> EntryId {
    let lamport = lamport_timestamp.to_string();
    let counter = author_counter.to_string();
    truncated_digest(&[
        author_id.as_bytes(),
        entry_class.as_str().as_bytes(),
        payload,
        lamport.as_bytes(),
        counter.as_bytes(),
    ])
}

// ----------------------------------------------------------------------------
// Ordering Key
// ----------------------------------------------------------------------------

/// Canonical sort key: Lamport timestamp, then author, then author counter
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingKey {
    pub lamport_timestamp: u64,
    pub author_id: AuthorId,
    pub author_counter: u32,
}

// ----------------------------------------------------------------------------
// Entry Body (signed part)
// ----------------------------------------------------------------------------

/// Every field covered by the entry signature
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBody {
    pub entry_id: EntryId,
    pub ledger_id: String,
    pub domain_id: String,
    pub lane_id: String,
    pub thread_id: Option<String>,
    pub author_id: AuthorId,
    pub author_display_name: String,
    pub entry_class: EntryClass,
    pub payload: Vec<u8>,
    pub payload_type: String,
    pub lamport_timestamp: u64,
    pub author_counter: u32,
    pub wall_clock_time: u64,
}

impl EntryBody {
    /// Pipe-delimited concatenation of every signed field, in fixed order.
    /// An absent thread id encodes as the empty string.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let lamport = self.lamport_timestamp.to_string();
        let counter = self.author_counter.to_string();
        let wall_clock = self.wall_clock_time.to_string();
        let fields: [&[u8]; 13] = [
            self.entry_id.as_str().as_bytes(),
            self.ledger_id.as_bytes(),
            self.domain_id.as_bytes(),
            self.lane_id.as_bytes(),
            self.thread_id.as_deref().unwrap_or("").as_bytes(),
            self.author_id.as_bytes(),
            self.author_display_name.as_bytes(),
            self.entry_class.as_str().as_bytes(),
            &self.payload,
            self.payload_type.as_bytes(),
            lamport.as_bytes(),
            counter.as_bytes(),
            wall_clock.as_bytes(),
        ];

        let capacity = fields.iter().map(|f| f.len() + 1).sum();
        let mut out = Vec::with_capacity(capacity);
        for (index, field) in fields.iter().enumerate() {
            if index > 0 {
                out.push(FIELD_SEPARATOR);
            }
            out.extend_from_slice(field);
        }
        out
    }

    /// Ordering key of this body
    pub fn ordering_key(&self) -> OrderingKey {
        OrderingKey {
            lamport_timestamp: self.lamport_timestamp,
            author_id: self.author_id.clone(),
            author_counter: self.author_counter,
        }
    }

    /// Whether `entry_id` matches the content hash of author, class and payload
    pub fn has_consistent_id(&self) -> bool {
        make_content_id(&self.author_id, self.entry_class, &self.payload) == self.entry_id
    }
}

// ----------------------------------------------------------------------------
// Log Entry
// ----------------------------------------------------------------------------

/// One committed fact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    body: EntryBody,
    signature: Vec<u8>,
    delivery_marker: Option<String>,
    committed_at: u64,
}

impl LogEntry {
    /// Assemble an entry from its parts. Nothing is verified here; use
    /// [`verify`] before trusting an entry that arrived from elsewhere.
    pub fn from_parts(
        body: EntryBody,
        signature: Vec<u8>,
        delivery_marker: Option<String>,
        committed_at: u64,
    ) -> Self {
        Self {
            body,
            signature,
            delivery_marker,
            committed_at,
        }
    }

    /// Split back into parts
    pub fn into_parts(self) -> (EntryBody, Vec<u8>, Option<String>, u64) {
        (
            self.body,
            self.signature,
            self.delivery_marker,
            self.committed_at,
        )
    }

    pub fn body(&self) -> &EntryBody {
        &self.body
    }

    pub fn entry_id(&self) -> &EntryId {
        &self.body.entry_id
    }

    pub fn ledger_id(&self) -> &str {
        &self.body.ledger_id
    }

    pub fn domain_id(&self) -> &str {
        &self.body.domain_id
    }

    pub fn lane_id(&self) -> &str {
        &self.body.lane_id
    }

    pub fn thread_id(&self) -> Option<&str> {
        self.body.thread_id.as_deref()
    }

    pub fn author_id(&self) -> &AuthorId {
        &self.body.author_id
    }

    pub fn author_display_name(&self) -> &str {
        &self.body.author_display_name
    }

    pub fn entry_class(&self) -> EntryClass {
        self.body.entry_class
    }

    pub fn payload(&self) -> &[u8] {
        &self.body.payload
    }

    pub fn payload_type(&self) -> &str {
        &self.body.payload_type
    }

    pub fn lamport_timestamp(&self) -> u64 {
        self.body.lamport_timestamp
    }

    pub fn author_counter(&self) -> u32 {
        self.body.author_counter
    }

    pub fn wall_clock_time(&self) -> u64 {
        self.body.wall_clock_time
    }

    pub fn signature(&self) -> &[u8] {
        &self.signature
    }

    /// Signature in standard base64, the stored/wire text form
    pub fn signature_base64(&self) -> String {
        STANDARD.encode(&self.signature)
    }

    pub fn delivery_marker(&self) -> Option<&str> {
        self.delivery_marker.as_deref()
    }

    pub fn committed_at(&self) -> u64 {
        self.committed_at
    }

    pub fn ordering_key(&self) -> OrderingKey {
        self.body.ordering_key()
    }

    /// Replace the delivery marker. The marker is outside the signature and
    /// the ordering key; this is the only post-commit mutation.
    pub fn set_delivery_marker(&mut self, marker: Option<String>) {
        self.delivery_marker = marker;
    }

    /// Stamp the local commit time. Used when a remote entry is persisted.
    pub fn with_committed_at(mut self, committed_at: u64) -> Self {
        self.committed_at = committed_at;
        self
    }
}

/// Sort helper implementing the canonical total order
pub fn canonical_order(a: &LogEntry, b: &LogEntry) -> Ordering {
    a.ordering_key().cmp(&b.ordering_key())
}

/// True iff `a` precedes `b` in the canonical total order
pub fn happened_before(a: &LogEntry, b: &LogEntry) -> bool {
    a.ordering_key() < b.ordering_key()
}

// ----------------------------------------------------------------------------
// Signing and Verification
// ----------------------------------------------------------------------------

/// Sign a body with the author's key and assemble the entry
pub fn sign<K: SigningKeyProvider + ?Sized>(
    body: EntryBody,
    keys: &K,
    delivery_marker: Option<String>,
    committed_at: u64,
) -> Result<LogEntry> {
    let signature = keys.sign(&body.canonical_bytes(), &body.author_id)?;
    Ok(LogEntry::from_parts(
        body,
        signature,
        delivery_marker,
        committed_at,
    ))
}

/// Check an entry's signature against its author's public key.
///
/// Never fails loudly: a missing key, a malformed signature or a mismatch
/// all come back as `false`.
pub fn verify<K: SigningKeyProvider + ?Sized>(entry: &LogEntry, keys: &K) -> bool {
    if entry.signature.is_empty() {
        return false;
    }
    keys.verify(
        &entry.body.canonical_bytes(),
        &entry.signature,
        &entry.body.author_id,
    )
}

/// Verify our own freshly signed entry; a mismatch is a key or encoding bug
pub fn self_check<K: SigningKeyProvider + ?Sized>(entry: &LogEntry, keys: &K) -> Result<()> {
    if verify(entry, keys) {
        Ok(())
    } else {
        Err(CryptographicError::SelfCheckFailed {
            entry_id: entry.entry_id().to_string(),
            author: entry.author_id().to_string(),
        }
        .into())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
