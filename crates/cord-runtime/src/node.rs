//! Cord node
//!
//! Wires one ledger, one router and one delivery cache into the full data
//! flow: local facts are appended then routed; inbound envelopes pass the
//! cache, pick up an arrival marker and are reconciled into the ledger in
//! the background.

use std::sync::Arc;

use tracing::{debug, info};

use cord_core::{
    EntryStore, Envelope, LogEntry, Result, SigningKeyProvider, TransportPath,
    DeliveryCacheConfig,
};

use crate::delivery_cache::{Admission, DeliveryCache};
use crate::ledger::{AppendRequest, CordLedger};
use crate::router::{SendOutcome, TransportRouter};

/// What `publish` did with a local fact
#[derive(Debug, Clone)]
pub struct PublishReceipt {
    pub entry: LogEntry,
    pub outcome: SendOutcome,
}

pub struct CordNode<S, K> {
    ledger: Arc<CordLedger<S, K>>,
    router: Arc<TransportRouter>,
    cache: DeliveryCache,
}

impl<S, K> CordNode<S, K>
where
    S: EntryStore + 'static,
    K: SigningKeyProvider + 'static,
{
    /// Must be called from within a tokio runtime
    pub fn new(
        ledger: Arc<CordLedger<S, K>>,
        router: Arc<TransportRouter>,
        cache_config: DeliveryCacheConfig,
    ) -> Self {
        let cache = DeliveryCache::spawn(cache_config, ledger.clone());
        Self {
            ledger,
            router,
            cache,
        }
    }

    pub fn ledger(&self) -> &Arc<CordLedger<S, K>> {
        &self.ledger
    }

    pub fn router(&self) -> &Arc<TransportRouter> {
        &self.router
    }

    pub fn cache(&self) -> &DeliveryCache {
        &self.cache
    }

    /// Append a local fact and send it.
    ///
    /// A fact that was already committed is re-sent as is; transports and
    /// peers collapse the repeat by content id.
    pub async fn publish(&self, request: AppendRequest) -> Result<PublishReceipt> {
        let entry = self.ledger.append(request).await?;
        let envelope = Envelope::new(entry.clone(), self.router.current_path());
        let outcome = self.router.send(envelope.clone()).await;

        // Record our own message so echoes are dropped, and so mesh-only
        // deliveries are picked up by the next resync.
        let origin = outcome
            .delivered_paths()
            .next()
            .unwrap_or(TransportPath::None);
        self.cache.add(envelope.arrived_via(origin)).await;

        debug!(
            entry_id = %entry.entry_id(),
            delivered = outcome.delivered(),
            queued = outcome.queued,
            "published"
        );
        Ok(PublishReceipt { entry, outcome })
    }

    /// Accept an envelope from a transport. Returns `false` if the cache
    /// had already seen its message id or the entry failed verification.
    ///
    /// A verified repeat still merges its arrival marker into the stored
    /// entry, so a fact seen over two paths records both.
    pub async fn receive(&self, mut envelope: Envelope) -> Result<bool> {
        let marker = envelope.origin.arrival_marker();
        envelope
            .entry
            .set_delivery_marker(marker.map(str::to_string));

        let entry_id = envelope.entry.entry_id().clone();
        match self.cache.add(envelope).await {
            Admission::Accepted => Ok(true),
            Admission::Rejected => Ok(false),
            Admission::Duplicate => {
                if let Some(marker) = marker {
                    self.ledger.record_delivery(&entry_id, Some(marker)).await?;
                }
                Ok(false)
            }
        }
    }

    /// Wait for background persistence of everything received so far
    pub async fn flush(&self) -> Result<()> {
        self.cache.flush().await
    }

    /// Push pending mesh traffic online, then retry the offline queue
    pub async fn resync(&self) -> (usize, usize) {
        let synced = self.cache.resync(&self.router).await;
        let retried = self.router.retry_queued().await;
        if synced > 0 || retried > 0 {
            info!(synced, retried, "resync complete");
        }
        (synced, retried)
    }
}
