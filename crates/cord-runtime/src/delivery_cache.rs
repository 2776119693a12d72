//! Delivery cache
//!
//! An in-memory layer between the transports and the ledger. It drops
//! envelopes whose transport message id it has already seen, keeps a
//! per-lane ordered view for display, and remembers which mesh-originated
//! envelopes still need to reach the online transports.
//!
//! The seen-set, the lane view and the pending queue share one mutex, so
//! `add` and `mark_synced` never interleave. Envelopes are checked against
//! the [`EntrySink`] before any of that state changes, so a forged entry is
//! never shown or relayed. Persistence is handed to a single writer task:
//! callers never wait on the store, and entries reach the sink in the order
//! they were added. A batch the sink fails to store has its message ids
//! forgotten, so a redelivery is accepted again.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use async_trait::async_trait;
use hashbrown::{HashMap, HashSet};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use cord_core::{
    CordError, DeliveryCacheConfig, EntryId, EntryStore, Envelope, LogEntry, OrderingKey,
    Result, RoutingStrategy, SigningKeyProvider, TransportPath,
};

use crate::ledger::CordLedger;
use crate::router::TransportRouter;

// ----------------------------------------------------------------------------
// Entry Sink
// ----------------------------------------------------------------------------

/// Durable destination for entries accepted by the cache
#[async_trait]
pub trait EntrySink: Send + Sync {
    /// Whether the sink would store this entry. Checked before the cache
    /// shows or relays it.
    fn accepts(&self, entry: &LogEntry) -> bool;

    /// Persist entries, returning how many were new. An error means at
    /// least one entry may not have been stored.
    async fn persist(&self, entries: Vec<LogEntry>) -> Result<usize>;
}

#[async_trait]
impl<S, K> EntrySink for CordLedger<S, K>
where
    S: EntryStore + 'static,
    K: SigningKeyProvider + 'static,
{
    fn accepts(&self, entry: &LogEntry) -> bool {
        CordLedger::accepts(self, entry)
    }

    /// Entries are reconciled one at a time so a store error on one does not
    /// drop the rest of the batch. The first error is returned at the end.
    async fn persist(&self, entries: Vec<LogEntry>) -> Result<usize> {
        let mut new = 0;
        let mut first_error = None;
        for entry in entries {
            let entry_id = entry.entry_id().clone();
            match self.reconcile(vec![entry]).await {
                Ok(merged) => new += merged.len(),
                Err(e) => {
                    warn!(entry_id = %entry_id, error = %e, "failed to persist cached entry");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(new), Err)
    }
}

// ----------------------------------------------------------------------------
// Writer Task
// ----------------------------------------------------------------------------

/// Flush reply: the first persistence failure since the previous flush
type FlushResult = std::result::Result<(), String>;

enum WriteCommand {
    Persist { message_id: String, entry: LogEntry },
    Flush(oneshot::Sender<FlushResult>),
}

async fn run_writer(
    sink: Arc<dyn EntrySink>,
    state: Arc<Mutex<CacheState>>,
    mut commands: mpsc::UnboundedReceiver<WriteCommand>,
) {
    let mut failure: Option<String> = None;

    while let Some(command) = commands.recv().await {
        let mut message_ids = Vec::new();
        let mut batch = Vec::new();
        let mut flushes = Vec::new();
        let mut take = |command: WriteCommand| match command {
            WriteCommand::Persist { message_id, entry } => {
                message_ids.push(message_id);
                batch.push(entry);
            }
            WriteCommand::Flush(done) => flushes.push(done),
        };
        take(command);

        // Coalesce whatever is already waiting; order is preserved
        while let Ok(command) = commands.try_recv() {
            take(command);
        }

        if !batch.is_empty() {
            let count = batch.len();
            match sink.persist(batch).await {
                Ok(new) => debug!(count, new, "persisted cached entries"),
                Err(e) => {
                    warn!(count, error = %e, "failed to persist cached entries, forgetting their message ids");
                    state.lock().await.forget(&message_ids);
                    failure.get_or_insert_with(|| e.to_string());
                }
            }
        }

        if !flushes.is_empty() {
            let outcome = failure.take().map_or(Ok(()), Err);
            for done in flushes {
                let _ = done.send(outcome.clone());
            }
        }
    }
    debug!("delivery cache writer stopped");
}

// ----------------------------------------------------------------------------
// Delivery Cache
// ----------------------------------------------------------------------------

#[derive(Default)]
struct CacheState {
    seen: HashSet<String>,
    seen_order: VecDeque<String>,
    lanes: HashMap<String, BTreeMap<(OrderingKey, EntryId), LogEntry>>,
    pending: VecDeque<Envelope>,
}

impl CacheState {
    fn remember(&mut self, message_id: &str, max_seen: usize) {
        self.seen.insert(message_id.to_string());
        self.seen_order.push_back(message_id.to_string());
        while self.seen_order.len() > max_seen {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    /// Undo `remember` for envelopes whose entries never reached the sink
    fn forget(&mut self, message_ids: &[String]) {
        let failed: HashSet<&str> = message_ids.iter().map(String::as_str).collect();
        self.seen.retain(|id| !failed.contains(id.as_str()));
        self.seen_order.retain(|id| !failed.contains(id.as_str()));
        self.pending
            .retain(|envelope| !failed.contains(envelope.message_id.as_str()));
    }
}

/// What `add` did with an envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// New message: shown, queued for persistence and, if mesh-borne, for resync
    Accepted,
    /// Message id already seen; nothing changed
    Duplicate,
    /// Entry failed verification; nothing changed
    Rejected,
}

impl Admission {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Admission::Accepted)
    }
}

pub struct DeliveryCache {
    config: DeliveryCacheConfig,
    sink: Arc<dyn EntrySink>,
    state: Arc<Mutex<CacheState>>,
    writer: mpsc::UnboundedSender<WriteCommand>,
}

impl DeliveryCache {
    /// Create the cache and spawn its writer task on the current runtime.
    /// The writer stops once the cache is dropped.
    pub fn spawn(config: DeliveryCacheConfig, sink: Arc<dyn EntrySink>) -> Self {
        let (writer, commands) = mpsc::unbounded_channel();
        let state = Arc::new(Mutex::new(CacheState::default()));
        tokio::spawn(run_writer(sink.clone(), state.clone(), commands));
        Self {
            config,
            sink,
            state,
            writer,
        }
    }

    /// Offer an envelope. Only an `Accepted` envelope changes the cache.
    pub async fn add(&self, envelope: Envelope) -> Admission {
        if !self.sink.accepts(&envelope.entry) {
            warn!(
                message_id = %envelope.message_id,
                entry_id = %envelope.entry.entry_id(),
                "envelope failed verification, dropped"
            );
            return Admission::Rejected;
        }

        let mut state = self.state.lock().await;
        if state.seen.contains(&envelope.message_id) {
            debug!(message_id = %envelope.message_id, "duplicate transport message dropped");
            return Admission::Duplicate;
        }
        state.remember(&envelope.message_id, self.config.max_seen_ids);

        let entry = envelope.entry.clone();
        state
            .lanes
            .entry(entry.lane_id().to_string())
            .or_default()
            .insert((entry.ordering_key(), entry.entry_id().clone()), entry.clone());

        let envelope_id = envelope.message_id.clone();
        if envelope.origin == TransportPath::LocalMesh {
            debug!(message_id = %envelope.message_id, "mesh message pending online sync");
            state.pending.push_back(envelope);
        }

        // Sent while still holding the lock so the writer sees adds in order
        let command = WriteCommand::Persist {
            message_id: envelope_id,
            entry,
        };
        if self.writer.send(command).is_err() {
            warn!("delivery cache writer is gone, entry not persisted");
        }
        Admission::Accepted
    }

    /// Snapshot of envelopes still waiting for online delivery
    pub async fn pending(&self) -> Vec<Envelope> {
        self.state.lock().await.pending.iter().cloned().collect()
    }

    /// Drop the given message ids from the pending queue. Returns how many
    /// were removed.
    pub async fn mark_synced(&self, message_ids: &HashSet<String>) -> usize {
        let mut state = self.state.lock().await;
        let before = state.pending.len();
        state
            .pending
            .retain(|envelope| !message_ids.contains(&envelope.message_id));
        before - state.pending.len()
    }

    /// Entries of a lane, in canonical order
    pub async fn lane_view(&self, lane_id: &str) -> Vec<LogEntry> {
        self.state
            .lock()
            .await
            .lanes
            .get(lane_id)
            .map(|lane| lane.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn seen_count(&self) -> usize {
        self.state.lock().await.seen.len()
    }

    /// Wait until everything added so far has been handed to the sink.
    /// Fails if any batch since the previous flush could not be persisted.
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.writer
            .send(WriteCommand::Flush(done))
            .map_err(|_| CordError::channel_error("delivery cache writer is gone"))?;
        wait.await
            .map_err(|_| CordError::channel_error("delivery cache writer dropped flush"))?
            .map_err(|reason| CordError::store_error(format!("cached entries not persisted: {}", reason)))
    }

    /// Push pending mesh messages to the online transports and mark the
    /// delivered ones synced. Returns how many were synced.
    pub async fn resync(&self, router: &TransportRouter) -> usize {
        let pending = self.pending().await;
        if pending.is_empty() {
            return 0;
        }

        let mut synced = HashSet::new();
        for envelope in &pending {
            let outcome = router.try_send(envelope, RoutingStrategy::OnlineOnly).await;
            if outcome.delivered() {
                synced.insert(envelope.message_id.clone());
            }
        }

        let removed = self.mark_synced(&synced).await;
        info!(pending = pending.len(), synced = removed, "resynced mesh messages");
        removed
    }
}
