//! Multi-transport router
//!
//! The router owns one [`PathTransport`] per live path and decides, per
//! send, which of them to use. Connectivity is pushed in as
//! [`ConnectivityEvent`]s; the router never polls the network.
//!
//! The router knows nothing about message identity. Sending the same
//! envelope twice, or over two paths at once, is always safe because the
//! ledger collapses duplicates by content id.

use std::sync::Arc;
use std::time::Duration;

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tokio::sync::{mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use cord_core::{
    ConnectivityEvent, ConnectivityState, EntryClass, Envelope, PathTransport, ReliabilityWindow,
    RouterConfig, RoutingStrategy, TransportPath,
};

use crate::offline_queue::{MemoryOfflineQueue, OfflineQueue};

// ----------------------------------------------------------------------------
// Outcomes
// ----------------------------------------------------------------------------

/// Result of one transport attempt
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LegOutcome {
    pub path: TransportPath,
    pub delivered: bool,
    /// Why the leg failed, for logs only
    pub failure: Option<String>,
}

/// Structured result of a send. Transport failures never surface as `Err`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendOutcome {
    pub strategy: RoutingStrategy,
    /// Path the send was addressed to, `None` if nothing was reachable
    pub path: TransportPath,
    pub legs: SmallVec<[LegOutcome; 2]>,
    /// Handed to the offline queue
    pub queued: bool,
}

impl SendOutcome {
    fn unroutable(strategy: RoutingStrategy) -> Self {
        Self {
            strategy,
            path: TransportPath::None,
            legs: SmallVec::new(),
            queued: false,
        }
    }

    /// At least one leg delivered
    pub fn delivered(&self) -> bool {
        self.legs.iter().any(|leg| leg.delivered)
    }

    pub fn delivered_paths(&self) -> impl Iterator<Item = TransportPath> + '_ {
        self.legs
            .iter()
            .filter(|leg| leg.delivered)
            .map(|leg| leg.path)
    }
}

/// User-facing delivery status derived from reliability and queue depth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryHealth {
    Healthy,
    /// Messages are getting through, but slowly or not all of them yet
    Degraded,
    /// Nothing is reachable; messages wait locally
    Offline,
}

// ----------------------------------------------------------------------------
// Transport Router
// ----------------------------------------------------------------------------

pub struct TransportRouter {
    config: RouterConfig,
    transports: HashMap<TransportPath, Arc<dyn PathTransport>>,
    connectivity: watch::Sender<ConnectivityState>,
    current_path: watch::Sender<TransportPath>,
    reliability: RwLock<ReliabilityWindow>,
    offline_queue: Arc<dyn OfflineQueue>,
}

impl TransportRouter {
    pub fn new(config: RouterConfig, connectivity: ConnectivityState) -> Self {
        let reliability = ReliabilityWindow::new(config.reliability_window, config.neutral_score);
        let (connectivity, _) = watch::channel(connectivity);
        let (current_path, _) = watch::channel(TransportPath::None);
        Self {
            config,
            transports: HashMap::new(),
            connectivity,
            current_path,
            reliability: RwLock::new(reliability),
            offline_queue: Arc::new(MemoryOfflineQueue::new()),
        }
    }

    /// Register the transport serving `transport.path()`, replacing any
    /// previous one for that path
    pub fn with_transport(mut self, transport: Arc<dyn PathTransport>) -> Self {
        let path = transport.path();
        if path != TransportPath::None {
            self.transports.insert(path, transport);
        }
        self.refresh_path();
        self
    }

    pub fn with_offline_queue(mut self, queue: Arc<dyn OfflineQueue>) -> Self {
        self.offline_queue = queue;
        self
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    pub fn offline_queue(&self) -> &Arc<dyn OfflineQueue> {
        &self.offline_queue
    }

    // ------------------------------------------------------------------------
    // Connectivity
    // ------------------------------------------------------------------------

    pub fn connectivity(&self) -> ConnectivityState {
        *self.connectivity.borrow()
    }

    fn path_available(&self, state: &ConnectivityState, path: TransportPath) -> bool {
        state.is_available(path) && self.transports.contains_key(&path)
    }

    /// Highest-priority path that is both reachable and has a transport
    pub fn current_path(&self) -> TransportPath {
        *self.current_path.borrow()
    }

    fn online_path(&self) -> Option<TransportPath> {
        let state = self.connectivity();
        [TransportPath::PrimaryOnline, TransportPath::BridgeOnline]
            .into_iter()
            .find(|path| self.path_available(&state, *path))
    }

    fn mesh_path(&self) -> Option<TransportPath> {
        let state = self.connectivity();
        self.path_available(&state, TransportPath::LocalMesh)
            .then_some(TransportPath::LocalMesh)
    }

    /// Recompute the active path from the current connectivity
    fn refresh_path(&self) {
        self.connectivity.send_if_modified(|state| {
            self.publish_path(state);
            false
        });
    }

    /// Must run inside a connectivity write so a concurrent event cannot
    /// publish a path derived from an older state
    fn publish_path(&self, state: &ConnectivityState) {
        let best = TransportPath::LIVE
            .into_iter()
            .find(|path| self.path_available(state, *path))
            .unwrap_or(TransportPath::None);

        self.current_path.send_if_modified(|current| {
            if *current == best {
                false
            } else {
                info!(from = %current, to = %best, "active transport path changed");
                *current = best;
                true
            }
        });
    }

    /// Apply a pushed connectivity signal and recompute the active path
    pub fn on_connectivity(&self, event: ConnectivityEvent) {
        debug!(?event, "connectivity event");
        self.connectivity.send_modify(|state| {
            state.apply(event);
            self.publish_path(state);
        });
    }

    /// Watch the active path
    pub fn subscribe_path(&self) -> watch::Receiver<TransportPath> {
        self.current_path.subscribe()
    }

    /// Drive `on_connectivity` from a channel until every sender is gone
    pub fn spawn_connectivity_listener(
        self: &Arc<Self>,
        mut events: mpsc::UnboundedReceiver<ConnectivityEvent>,
    ) -> JoinHandle<()> {
        let router = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                router.on_connectivity(event);
            }
            debug!("connectivity listener stopped");
        })
    }

    // ------------------------------------------------------------------------
    // Sending
    // ------------------------------------------------------------------------

    fn effective_strategy(&self, strategy: RoutingStrategy, class: EntryClass) -> RoutingStrategy {
        if strategy == RoutingStrategy::BestAvailable
            && self.config.escalate_critical_classes
            && class.prefers_redundancy()
        {
            RoutingStrategy::DualPath
        } else {
            strategy
        }
    }

    /// Send with the configured strategy
    pub async fn send(&self, envelope: Envelope) -> SendOutcome {
        self.send_with_strategy(envelope, self.config.strategy).await
    }

    /// Send with an explicit strategy. Undelivered envelopes go to the
    /// offline queue.
    pub async fn send_with_strategy(
        &self,
        envelope: Envelope,
        strategy: RoutingStrategy,
    ) -> SendOutcome {
        let mut outcome = self.try_send(&envelope, strategy).await;
        if !outcome.delivered() {
            warn!(
                message_id = %envelope.message_id,
                strategy = %outcome.strategy,
                path = %outcome.path,
                "message not delivered, queueing for retry"
            );
            self.offline_queue.enqueue(envelope).await;
            outcome.queued = true;
        }
        outcome
    }

    /// Send without queueing on failure
    pub async fn try_send(&self, envelope: &Envelope, strategy: RoutingStrategy) -> SendOutcome {
        let strategy = self.effective_strategy(strategy, envelope.entry.entry_class());

        let targets: SmallVec<[TransportPath; 2]> = match strategy {
            RoutingStrategy::BestAvailable => match self.current_path() {
                TransportPath::None => SmallVec::new(),
                path => SmallVec::from_slice(&[path]),
            },
            RoutingStrategy::DualPath => self
                .online_path()
                .into_iter()
                .chain(self.mesh_path())
                .collect(),
            RoutingStrategy::OnlineOnly => self.online_path().into_iter().collect(),
            RoutingStrategy::MeshOnly => self.mesh_path().into_iter().collect(),
        };

        let mut outcome = SendOutcome::unroutable(strategy);
        match targets.as_slice() {
            [] => {}
            [path] => {
                outcome.path = *path;
                outcome.legs.push(self.send_leg(*path, envelope).await);
            }
            [first, second, ..] => {
                // Independent legs: neither cancels the other
                outcome.path = *first;
                let (a, b) = tokio::join!(
                    self.send_leg(*first, envelope),
                    self.send_leg(*second, envelope)
                );
                outcome.legs.push(a);
                outcome.legs.push(b);
            }
        }
        outcome
    }

    async fn send_leg(&self, path: TransportPath, envelope: &Envelope) -> LegOutcome {
        let Some(transport) = self.transports.get(&path) else {
            return LegOutcome {
                path,
                delivered: false,
                failure: Some("no transport registered".to_string()),
            };
        };

        let timeout = Duration::from_millis(self.config.send_timeout_ms);
        let (delivered, failure) = match tokio::time::timeout(timeout, transport.send(envelope)).await {
            Ok(Ok(true)) => (true, None),
            Ok(Ok(false)) => (false, Some("transport reported failure".to_string())),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(_) => (false, Some(format!("timed out after {}ms", self.config.send_timeout_ms))),
        };

        self.reliability.write().await.record(path, delivered);
        if let Some(reason) = &failure {
            warn!(message_id = %envelope.message_id, path = %path, reason = %reason, "send failed");
        } else {
            debug!(message_id = %envelope.message_id, path = %path, "sent");
        }

        LegOutcome {
            path,
            delivered,
            failure,
        }
    }

    /// Re-send everything in the offline queue. Returns how many were
    /// delivered; the rest are queued again.
    pub async fn retry_queued(&self) -> usize {
        let queued = self.offline_queue.drain().await;
        if queued.is_empty() {
            return 0;
        }

        let total = queued.len();
        let mut delivered = 0;
        for envelope in queued {
            if self.send(envelope).await.delivered() {
                delivered += 1;
            }
        }
        info!(delivered, total, "retried offline queue");
        delivered
    }

    // ------------------------------------------------------------------------
    // Reliability
    // ------------------------------------------------------------------------

    /// Rolling success ratio for `path`
    pub async fn reliability_score(&self, path: TransportPath) -> f64 {
        self.reliability.read().await.score(path)
    }

    pub async fn reliability_snapshot(&self) -> ReliabilityWindow {
        self.reliability.read().await.clone()
    }

    pub async fn delivery_health(&self) -> DeliveryHealth {
        if self.current_path() == TransportPath::None {
            return DeliveryHealth::Offline;
        }
        let overall = self.reliability.read().await.overall_score();
        if overall < self.config.degraded_threshold || !self.offline_queue.is_empty().await {
            DeliveryHealth::Degraded
        } else {
            DeliveryHealth::Healthy
        }
    }
}
