//! Cord ledger
//!
//! [`CordLedger`] is the only writer of the cord. It turns local payloads
//! into signed entries (`append`), merges entries signed elsewhere
//! (`append_batch`, `reconcile`) and re-verifies everything on demand
//! (`audit`).
//!
//! Locking is deliberately narrow:
//! - one async mutex per author guards that author's [`LogicalClock`]
//! - one async mutex per in-flight entry id serializes the
//!   check-then-insert on that id, so unrelated ids proceed in parallel
//!
//! Locks are always taken id first, then clock.

use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info, warn};

use cord_core::{
    make_content_id, merge_delivery_marker, self_check, sign, verify, AuthorId, CordError,
    EntryBody, EntryClass, EntryError, EntryId, EntryStore, LedgerConfig, LogEntry,
    LogicalClock, Result, SigningKeyProvider, SystemTimeSource, TimeSource,
};

// ----------------------------------------------------------------------------
// Append Request
// ----------------------------------------------------------------------------

/// Everything `append` needs to commit one local fact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendRequest {
    /// Overrides the configured ledger id
    pub ledger_id: Option<String>,
    /// Overrides the configured domain id
    pub domain_id: Option<String>,
    pub lane_id: String,
    pub thread_id: Option<String>,
    pub author_id: AuthorId,
    pub author_display_name: String,
    pub entry_class: EntryClass,
    pub payload: Vec<u8>,
    pub payload_type: String,
    pub delivery_marker: Option<String>,
}

impl AppendRequest {
    pub fn new<A, N, P>(author_id: A, display_name: N, entry_class: EntryClass, payload: P) -> Self
    where
        A: Into<AuthorId>,
        N: Into<String>,
        P: Into<Vec<u8>>,
    {
        Self {
            ledger_id: None,
            domain_id: None,
            lane_id: "general".to_string(),
            thread_id: None,
            author_id: author_id.into(),
            author_display_name: display_name.into(),
            entry_class,
            payload: payload.into(),
            payload_type: "text/plain".to_string(),
            delivery_marker: None,
        }
    }

    pub fn in_ledger<L: Into<String>, D: Into<String>>(mut self, ledger_id: L, domain_id: D) -> Self {
        self.ledger_id = Some(ledger_id.into());
        self.domain_id = Some(domain_id.into());
        self
    }

    pub fn in_lane<S: Into<String>>(mut self, lane_id: S) -> Self {
        self.lane_id = lane_id.into();
        self
    }

    pub fn in_thread<S: Into<String>>(mut self, thread_id: S) -> Self {
        self.thread_id = Some(thread_id.into());
        self
    }

    pub fn with_payload_type<S: Into<String>>(mut self, payload_type: S) -> Self {
        self.payload_type = payload_type.into();
        self
    }

    pub fn with_marker<S: Into<String>>(mut self, marker: S) -> Self {
        self.delivery_marker = Some(marker.into());
        self
    }

    /// Content-addressed id this request commits under
    pub fn entry_id(&self) -> EntryId {
        make_content_id(&self.author_id, self.entry_class, &self.payload)
    }
}

// ----------------------------------------------------------------------------
// Audit Report
// ----------------------------------------------------------------------------

/// Result of re-verifying every persisted entry
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditReport {
    pub total: usize,
    pub valid: usize,
    pub invalid: usize,
    /// Ids of entries whose signature no longer verifies
    pub errors: Vec<EntryId>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.invalid == 0
    }
}

// ----------------------------------------------------------------------------
// Cord Ledger
// ----------------------------------------------------------------------------

type ClockSlot = Arc<Mutex<Option<LogicalClock>>>;

/// Append-only, content-addressed, signed log over an [`EntryStore`]
pub struct CordLedger<S, K> {
    config: LedgerConfig,
    store: Arc<S>,
    keys: Arc<K>,
    time_source: Arc<dyn TimeSource>,
    clocks: DashMap<AuthorId, ClockSlot>,
    id_locks: DashMap<EntryId, Arc<Mutex<()>>>,
}

impl<S, K> CordLedger<S, K>
where
    S: EntryStore,
    K: SigningKeyProvider,
{
    pub fn new(config: LedgerConfig, store: Arc<S>, keys: Arc<K>) -> Self {
        Self {
            config,
            store,
            keys,
            time_source: Arc::new(SystemTimeSource),
            clocks: DashMap::new(),
            id_locks: DashMap::new(),
        }
    }

    /// Replace the wall-clock source (tests use a mock)
    pub fn with_time_source(mut self, time_source: Arc<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        self
    }

    pub fn config(&self) -> &LedgerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn keys(&self) -> &Arc<K> {
        &self.keys
    }

    // ------------------------------------------------------------------------
    // Lock helpers
    // ------------------------------------------------------------------------

    async fn lock_id(&self, id: &EntryId) -> OwnedMutexGuard<()> {
        let lock = self
            .id_locks
            .entry(id.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();
        lock.lock_owned().await
    }

    /// Drop the lock entry for `id` once nobody else is holding or waiting
    fn release_id(&self, id: &EntryId, guard: OwnedMutexGuard<()>) {
        drop(guard);
        self.id_locks
            .remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }

    fn clock_slot(&self, author: &AuthorId) -> ClockSlot {
        self.clocks
            .entry(author.clone())
            .or_insert_with(|| Arc::new(Mutex::new(None)))
            .value()
            .clone()
    }

    /// Lock the author's clock, loading it from the store on first use
    async fn lock_clock(
        &self,
        author: &AuthorId,
    ) -> Result<OwnedMutexGuard<Option<LogicalClock>>> {
        let mut guard = self.clock_slot(author).lock_owned().await;
        if guard.is_none() {
            let persisted = self.store.max_lamport_for_author(author).await?;
            debug!(author = %author, persisted = ?persisted, "initialized logical clock");
            *guard = Some(LogicalClock::starting_at(persisted.unwrap_or(0)));
        }
        Ok(guard)
    }

    async fn observe_remote(&self, author: &AuthorId, lamport: u64) -> Result<()> {
        let mut guard = self.lock_clock(author).await?;
        guard.get_or_insert_with(LogicalClock::new).update(lamport);
        Ok(())
    }

    fn now_millis(&self) -> u64 {
        self.time_source.now().as_millis()
    }

    // ------------------------------------------------------------------------
    // Append
    // ------------------------------------------------------------------------

    /// Commit a local fact.
    ///
    /// A repeat of an already committed `(author, class, payload)` returns
    /// the stored entry with only its delivery marker merged: no tick, no
    /// new signature. A failing self-check is returned as an error and
    /// nothing is persisted.
    pub async fn append(&self, request: AppendRequest) -> Result<LogEntry> {
        if request.payload.len() > self.config.max_payload_bytes {
            return Err(EntryError::PayloadTooLarge {
                max: self.config.max_payload_bytes,
                actual: request.payload.len(),
            }
            .into());
        }

        let entry_id = request.entry_id();
        let guard = self.lock_id(&entry_id).await;
        let result = self.append_locked(entry_id.clone(), request).await;
        self.release_id(&entry_id, guard);
        result
    }

    async fn append_locked(&self, entry_id: EntryId, request: AppendRequest) -> Result<LogEntry> {
        if let Some(existing) = self.store.get_by_id(&entry_id).await? {
            debug!(entry_id = %entry_id, "duplicate append, merging delivery marker only");
            return self
                .merge_marker(existing, request.delivery_marker.as_deref())
                .await;
        }

        // The tick is committed only once the entry is stored, so a failed
        // signature or self-check leaves the clock where it was.
        let mut clock = self.lock_clock(&request.author_id).await?;
        let lamport = clock
            .get_or_insert_with(LogicalClock::new)
            .next()
            .ok_or_else(|| EntryError::ClockExhausted {
                author: request.author_id.to_string(),
            })?;
        let author_counter = self
            .store
            .max_author_counter(&request.author_id, lamport)
            .await?
            .map(|c| c.saturating_add(1))
            .unwrap_or(0);

        let now = self.now_millis();
        let body = EntryBody {
            entry_id: entry_id.clone(),
            ledger_id: request
                .ledger_id
                .unwrap_or_else(|| self.config.ledger_id.clone()),
            domain_id: request
                .domain_id
                .unwrap_or_else(|| self.config.domain_id.clone()),
            lane_id: request.lane_id,
            thread_id: request.thread_id,
            author_id: request.author_id,
            author_display_name: request.author_display_name,
            entry_class: request.entry_class,
            payload: request.payload,
            payload_type: request.payload_type,
            lamport_timestamp: lamport,
            author_counter,
            wall_clock_time: now,
        };

        let entry = sign(body, self.keys.as_ref(), request.delivery_marker, now)?;
        if self.config.self_check {
            if let Err(e) = self_check(&entry, self.keys.as_ref()) {
                error!(
                    entry_id = %entry_id,
                    author = %entry.author_id(),
                    "own signature failed verification, refusing to persist"
                );
                return Err(e);
            }
        }

        if !self.store.insert(entry.clone()).await? {
            // Another writer sharing the store committed the same fact first
            drop(clock);
            let existing = self
                .store
                .get_by_id(&entry_id)
                .await?
                .ok_or_else(|| CordError::store_error("entry vanished after insert"))?;
            return Ok(existing);
        }
        clock.get_or_insert_with(LogicalClock::new).tick();
        drop(clock);

        debug!(
            entry_id = %entry_id,
            author = %entry.author_id(),
            lamport,
            author_counter,
            class = %entry.entry_class(),
            "appended entry"
        );
        Ok(entry)
    }

    async fn merge_marker(&self, mut existing: LogEntry, incoming: Option<&str>) -> Result<LogEntry> {
        let merged = merge_delivery_marker(existing.delivery_marker(), incoming);
        if merged.as_deref() != existing.delivery_marker() {
            debug!(
                entry_id = %existing.entry_id(),
                from = ?existing.delivery_marker(),
                to = ?merged,
                "delivery marker merged"
            );
            self.store
                .update_delivery_marker(existing.entry_id(), merged.clone())
                .await?;
            existing.set_delivery_marker(merged);
        }
        Ok(existing)
    }

    /// Merge a delivery confirmation into an already stored entry.
    /// Returns `None` if the entry is not (yet) persisted.
    pub async fn record_delivery(
        &self,
        entry_id: &EntryId,
        marker: Option<&str>,
    ) -> Result<Option<LogEntry>> {
        let guard = self.lock_id(entry_id).await;
        let result = match self.store.get_by_id(entry_id).await {
            Ok(Some(existing)) => self.merge_marker(existing, marker).await.map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        self.release_id(entry_id, guard);
        result
    }

    // ------------------------------------------------------------------------
    // Remote entries
    // ------------------------------------------------------------------------

    /// Whether a remote entry may be stored: its signature verifies and its
    /// id is the content hash of author, class and payload
    pub fn accepts(&self, entry: &LogEntry) -> bool {
        self.rejection(entry).is_none()
    }

    fn rejection(&self, entry: &LogEntry) -> Option<&'static str> {
        if !verify(entry, self.keys.as_ref()) {
            Some("invalid signature")
        } else if !entry.body().has_consistent_id() {
            Some("entry id does not match content")
        } else {
            None
        }
    }

    /// Persist entries signed elsewhere, in one store batch.
    ///
    /// Entries that fail verification are dropped. Returns the entries that
    /// were newly inserted.
    pub async fn append_batch(&self, entries: Vec<LogEntry>) -> Result<Vec<LogEntry>> {
        let mut verified = Vec::with_capacity(entries.len());
        for entry in entries {
            match self.rejection(&entry) {
                None => verified.push(entry),
                Some(reason) => warn!(
                    entry_id = %entry.entry_id(),
                    author = %entry.author_id(),
                    reason,
                    "dropping unverifiable entry from batch"
                ),
            }
        }

        // Lock every distinct id in sorted order so concurrent batches
        // cannot deadlock against each other.
        let ids: BTreeSet<EntryId> = verified.iter().map(|e| e.entry_id().clone()).collect();
        let mut guards = Vec::with_capacity(ids.len());
        for id in &ids {
            guards.push((id.clone(), self.lock_id(id).await));
        }

        let result = self.commit_batch(verified).await;

        for (id, guard) in guards {
            self.release_id(&id, guard);
        }

        let merged = result?;
        debug!(inserted = merged.len(), "batch appended");
        Ok(merged)
    }

    /// Insert the not yet stored entries of a batch. Caller holds every id lock.
    async fn commit_batch(&self, entries: Vec<LogEntry>) -> Result<Vec<LogEntry>> {
        let mut fresh = Vec::with_capacity(entries.len());
        for entry in entries {
            if self.store.exists(entry.entry_id()).await? {
                debug!(entry_id = %entry.entry_id(), "batch entry already present");
                continue;
            }
            self.observe_remote(entry.author_id(), entry.lamport_timestamp())
                .await?;
            fresh.push(entry);
        }

        let now = self.now_millis();
        let stamped: Vec<LogEntry> = fresh
            .into_iter()
            .map(|e| e.with_committed_at(now))
            .collect();
        let inserted = self.store.insert_batch(stamped.clone()).await?;
        Ok(stamped
            .into_iter()
            .zip(inserted)
            .filter_map(|(entry, new)| new.then_some(entry))
            .collect())
    }

    /// Merge remote entries.
    ///
    /// Entries with a bad signature or an id that does not match their
    /// content are skipped without touching any clock. A verified entry
    /// advances its author's clock when it is first stored; an already
    /// stored entry only merges its marker, so persisting our own appends
    /// here never moves our clock. Order and batching of the input do not
    /// affect the final store.
    pub async fn reconcile(&self, remote: Vec<LogEntry>) -> Result<Vec<LogEntry>> {
        let mut merged = Vec::new();
        let mut skipped = 0usize;

        for entry in remote {
            if let Some(reason) = self.rejection(&entry) {
                skipped += 1;
                warn!(
                    entry_id = %entry.entry_id(),
                    author = %entry.author_id(),
                    reason,
                    "skipping remote entry"
                );
                continue;
            }

            let id = entry.entry_id().clone();
            let guard = self.lock_id(&id).await;
            let outcome = self.merge_one(entry).await;
            self.release_id(&id, guard);

            if let Some(entry) = outcome? {
                merged.push(entry);
            }
        }

        if !merged.is_empty() || skipped > 0 {
            info!(merged = merged.len(), skipped, "reconciled remote entries");
        }
        Ok(merged)
    }

    async fn merge_one(&self, entry: LogEntry) -> Result<Option<LogEntry>> {
        if let Some(existing) = self.store.get_by_id(entry.entry_id()).await? {
            debug!(entry_id = %entry.entry_id(), "remote entry already present");
            self.merge_marker(existing, entry.delivery_marker()).await?;
            return Ok(None);
        }

        self.observe_remote(entry.author_id(), entry.lamport_timestamp())
            .await?;
        let entry = entry.with_committed_at(self.now_millis());
        if self.store.insert(entry.clone()).await? {
            Ok(Some(entry))
        } else {
            Ok(None)
        }
    }

    // ------------------------------------------------------------------------
    // Audit and queries
    // ------------------------------------------------------------------------

    /// Re-verify every persisted entry. Never mutates the store.
    pub async fn audit(&self) -> Result<AuditReport> {
        let mut report = AuditReport::default();
        let mut entries = self.store.scan().await?;
        while let Some(entry) = entries.next().await {
            report.total += 1;
            if self.accepts(&entry) {
                report.valid += 1;
            } else {
                report.invalid += 1;
                report.errors.push(entry.entry_id().clone());
            }
        }

        if report.is_clean() {
            info!(total = report.total, "audit passed");
        } else {
            warn!(
                total = report.total,
                invalid = report.invalid,
                "audit found entries failing verification"
            );
        }
        Ok(report)
    }

    pub async fn get(&self, entry_id: &EntryId) -> Result<Option<LogEntry>> {
        self.store.get_by_id(entry_id).await
    }

    /// Entries of a lane in canonical order
    pub async fn entries_by_lane(&self, lane_id: &str) -> Result<Vec<LogEntry>> {
        Ok(self.store.query_by_lane(lane_id).await?.collect().await)
    }

    pub async fn entries_by_author(&self, author: &AuthorId) -> Result<Vec<LogEntry>> {
        Ok(self.store.query_by_author(author).await?.collect().await)
    }

    pub async fn entries_by_class(&self, class: EntryClass) -> Result<Vec<LogEntry>> {
        Ok(self.store.query_by_class(class).await?.collect().await)
    }

    /// Current Lamport value for `author`, loading it if never used
    pub async fn clock_value(&self, author: &AuthorId) -> Result<u64> {
        let guard = self.lock_clock(author).await?;
        Ok(guard.as_ref().map(LogicalClock::current).unwrap_or(0))
    }

    pub async fn len(&self) -> Result<usize> {
        self.store.len().await
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use cord_core::{Ed25519KeyProvider, MemoryEntryStore, MARKER_ONLINE, MARKER_SUB};

    fn ledger() -> CordLedger<MemoryEntryStore, Ed25519KeyProvider> {
        let keys = Ed25519KeyProvider::new();
        keys.generate_for(&AuthorId::new("A1")).unwrap();
        CordLedger::new(
            LedgerConfig::testing(),
            Arc::new(MemoryEntryStore::new()),
            Arc::new(keys),
        )
    }

    #[tokio::test]
    async fn test_duplicate_append_does_not_tick() {
        let ledger = ledger();
        let request = AppendRequest::new("A1", "Ana", EntryClass::WorkLog, "8h framing");

        let first = ledger.append(request.clone()).await.unwrap();
        let second = ledger
            .append(request.with_marker(MARKER_ONLINE))
            .await
            .unwrap();

        assert_eq!(first.entry_id(), second.entry_id());
        assert_eq!(second.lamport_timestamp(), 1);
        assert_eq!(second.delivery_marker(), Some(MARKER_ONLINE));
        assert_eq!(ledger.clock_value(&AuthorId::new("A1")).await.unwrap(), 1);
        assert_eq!(ledger.len().await.unwrap(), 1);
        assert!(ledger.id_locks.is_empty());
    }

    #[tokio::test]
    async fn test_marker_progression_on_redelivery() {
        let ledger = ledger();
        let request = AppendRequest::new("A1", "Ana", EntryClass::Chat, "hi");
        ledger
            .append(request.clone().with_marker(MARKER_SUB))
            .await
            .unwrap();
        let merged = ledger
            .append(request.with_marker(MARKER_ONLINE))
            .await
            .unwrap();
        assert_eq!(merged.delivery_marker(), Some("· sub→online"));
    }

    #[tokio::test]
    async fn test_oversized_payload_rejected() {
        let ledger = ledger();
        let big = vec![0u8; LedgerConfig::testing().max_payload_bytes + 1];
        let err = ledger
            .append(AppendRequest::new("A1", "Ana", EntryClass::Chat, big))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CordError::InvalidEntry(EntryError::PayloadTooLarge { .. })
        ));
        assert!(ledger.is_empty().await.unwrap());
    }

    #[tokio::test]
    async fn test_unknown_author_cannot_append() {
        let ledger = ledger();
        let result = ledger
            .append(AppendRequest::new("ghost", "Ghost", EntryClass::Chat, "boo"))
            .await;
        assert!(matches!(result, Err(CordError::Crypto(_))));
        assert_eq!(ledger.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_request_overrides_ledger_and_domain() {
        let ledger = ledger();
        let entry = ledger
            .append(
                AppendRequest::new("A1", "Ana", EntryClass::Status, "on site")
                    .in_ledger("other-ledger", "hub-9")
                    .in_lane("crew")
                    .in_thread("t-1"),
            )
            .await
            .unwrap();
        assert_eq!(entry.ledger_id(), "other-ledger");
        assert_eq!(entry.domain_id(), "hub-9");
        assert_eq!(entry.lane_id(), "crew");
        assert_eq!(entry.thread_id(), Some("t-1"));
        assert!(verify(&entry, ledger.keys().as_ref()));
    }
}
