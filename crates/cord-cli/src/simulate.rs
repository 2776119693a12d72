//! Multi-device simulation
//!
//! Every simulated device runs a full [`CordNode`]. Each node gets three
//! simulated transports (primary, bridge, mesh) that fan an envelope out to
//! every peer's inbox, dropping each copy with the path's loss rate. Inboxes
//! are drained between rounds, so a run is reproducible from its seed.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, trace};

use cord_core::{
    AuthorId, ConnectivityEvent, ConnectivityState, CordConfig, CordError, Ed25519KeyProvider,
    EntryClass, EntryId, Envelope, MemoryEntryStore, PathTransport, TransportPath,
};
use cord_runtime::{AppendRequest, CordLedger, CordNode, DeliveryHealth, TransportRouter};

use crate::error::{CliError, Result};

type SimNode = CordNode<MemoryEntryStore, Ed25519KeyProvider>;

// ----------------------------------------------------------------------------
// Configuration
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub devices: usize,
    pub messages_per_device: usize,
    pub lane_id: String,
    /// Probability that one copy is lost, per path
    pub primary_loss: f64,
    pub bridge_loss: f64,
    pub mesh_loss: f64,
    /// Internet unreachable for the middle third of the rounds
    pub internet_outage: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            devices: 4,
            messages_per_device: 8,
            lane_id: "site".to_string(),
            primary_loss: 0.05,
            bridge_loss: 0.1,
            mesh_loss: 0.2,
            internet_outage: false,
            seed: None,
        }
    }
}

// ----------------------------------------------------------------------------
// Simulated Transport
// ----------------------------------------------------------------------------

/// Inboxes of every device, indexed by device
struct Network {
    inboxes: Vec<mpsc::UnboundedSender<Envelope>>,
}

struct SimulatedTransport {
    owner: usize,
    path: TransportPath,
    loss_rate: f64,
    rng: Mutex<fastrand::Rng>,
    network: Arc<Network>,
}

#[async_trait]
impl PathTransport for SimulatedTransport {
    fn path(&self) -> TransportPath {
        self.path
    }

    /// Delivered if at least one peer got a copy
    async fn send(&self, envelope: &Envelope) -> cord_core::Result<bool> {
        let mut rng = self.rng.lock().await;
        let mut peers = 0;
        let mut reached = 0;

        for (device, inbox) in self.network.inboxes.iter().enumerate() {
            if device == self.owner {
                continue;
            }
            peers += 1;
            if rng.f64() < self.loss_rate {
                trace!(path = %self.path, device, message_id = %envelope.message_id, "copy lost");
                continue;
            }
            if inbox.send(envelope.clone().arrived_via(self.path)).is_ok() {
                reached += 1;
            }
        }

        Ok(peers == 0 || reached > 0)
    }
}

// ----------------------------------------------------------------------------
// Report
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct DeviceReport {
    pub author: String,
    pub entries: usize,
    pub clock: u64,
    pub audit_valid: usize,
    pub audit_invalid: usize,
    /// Mesh-originated messages not yet confirmed online
    pub pending_mesh: usize,
    pub offline_queue: usize,
    pub health: DeliveryHealth,
    pub primary_score: f64,
    pub bridge_score: f64,
    pub mesh_score: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    pub seed: u64,
    pub published: usize,
    pub queued_on_publish: usize,
    pub devices: Vec<DeviceReport>,
    /// Every device holds every entry, in the same order
    pub converged: bool,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "seed {}: {} entries published, {} queued at publish time",
            self.seed, self.published, self.queued_on_publish
        )?;
        writeln!(
            f,
            "{:<8} {:>7} {:>6} {:>9} {:>8} {:>6}  {:<8} {:>7} {:>7} {:>7}",
            "device", "entries", "clock", "audit", "pending", "queue", "health", "primary",
            "bridge", "mesh"
        )?;
        for device in &self.devices {
            writeln!(
                f,
                "{:<8} {:>7} {:>6} {:>4}/{:<4} {:>8} {:>6}  {:<8} {:>7.2} {:>7.2} {:>7.2}",
                device.author,
                device.entries,
                device.clock,
                device.audit_valid,
                device.audit_valid + device.audit_invalid,
                device.pending_mesh,
                device.offline_queue,
                format!("{:?}", device.health),
                device.primary_score,
                device.bridge_score,
                device.mesh_score,
            )?;
        }
        write!(
            f,
            "{}",
            if self.converged {
                "converged: every device holds every entry in the same order"
            } else {
                "not converged: some copies were lost on every path"
            }
        )
    }
}

// ----------------------------------------------------------------------------
// Simulation
// ----------------------------------------------------------------------------

pub struct Simulation {
    config: SimulationConfig,
    seed: u64,
    rng: fastrand::Rng,
    authors: Vec<AuthorId>,
    nodes: Vec<SimNode>,
    inboxes: Vec<mpsc::UnboundedReceiver<Envelope>>,
}

impl Simulation {
    /// Build every device. Must be called from within a tokio runtime.
    pub fn new(cord: CordConfig, config: SimulationConfig) -> Result<Self> {
        cord.validate()?;
        if config.devices == 0 {
            return Err(CliError::Simulation("no devices to simulate".to_string()));
        }

        let seed = config.seed.unwrap_or_else(|| fastrand::u64(..));
        let mut rng = fastrand::Rng::with_seed(seed);

        // Key distribution is out of scope: devices share one key registry
        let keys = Arc::new(Ed25519KeyProvider::new());
        let authors: Vec<AuthorId> = (1..=config.devices)
            .map(|n| AuthorId::new(format!("D{}", n)))
            .collect();
        for author in &authors {
            keys.generate_for(author).map_err(CordError::from)?;
        }

        let (senders, inboxes): (Vec<_>, Vec<_>) =
            (0..config.devices).map(|_| mpsc::unbounded_channel()).unzip();
        let network = Arc::new(Network { inboxes: senders });

        let mut nodes = Vec::with_capacity(config.devices);
        for owner in 0..config.devices {
            let mut router = TransportRouter::new(cord.router.clone(), ConnectivityState::all_up());
            for (path, loss_rate) in [
                (TransportPath::PrimaryOnline, config.primary_loss),
                (TransportPath::BridgeOnline, config.bridge_loss),
                (TransportPath::LocalMesh, config.mesh_loss),
            ] {
                router = router.with_transport(Arc::new(SimulatedTransport {
                    owner,
                    path,
                    loss_rate,
                    rng: Mutex::new(fastrand::Rng::with_seed(rng.u64(..))),
                    network: network.clone(),
                }));
            }

            let ledger = CordLedger::new(
                cord.ledger.clone(),
                Arc::new(MemoryEntryStore::new()),
                keys.clone(),
            );
            nodes.push(CordNode::new(
                Arc::new(ledger),
                Arc::new(router),
                cord.cache.clone(),
            ));
        }

        Ok(Self {
            config,
            seed,
            rng,
            authors,
            nodes,
            inboxes,
        })
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Run every round, heal the network, resync, and report
    pub async fn run(mut self) -> Result<SimulationReport> {
        let rounds = self.config.messages_per_device;
        let outage = Some((rounds / 3, rounds - rounds / 3))
            .filter(|(start, end)| self.config.internet_outage && start < end);

        info!(
            devices = self.nodes.len(),
            rounds,
            seed = self.seed,
            "starting simulation"
        );

        let mut published = 0;
        let mut queued_on_publish = 0;
        for round in 0..rounds {
            if let Some((start, end)) = outage {
                if round == start {
                    info!(round, "internet outage begins");
                    self.set_internet(false);
                } else if round == end {
                    info!(round, "internet restored");
                    self.set_internet(true);
                    self.resync_all().await;
                }
            }

            for device in 0..self.nodes.len() {
                let class = EntryClass::ALL[self.rng.usize(..EntryClass::ALL.len())];
                let author = self.authors[device].clone();
                let request = AppendRequest::new(
                    author.clone(),
                    format!("Device {}", device + 1),
                    class,
                    format!("{} {} round {}", author, class, round),
                )
                .in_lane(self.config.lane_id.clone());

                let receipt = self.nodes[device].publish(request).await?;
                published += 1;
                if receipt.outcome.queued {
                    queued_on_publish += 1;
                }
            }
            let delivered = self.deliver().await?;
            debug!(round, delivered, "round delivered");
        }

        // Heal everything and give pending traffic one last chance
        self.set_internet(true);
        self.resync_all().await;
        self.deliver().await?;
        for node in &self.nodes {
            node.flush().await?;
        }

        self.report(published, queued_on_publish).await
    }

    fn set_internet(&self, reachable: bool) {
        for node in &self.nodes {
            node.router()
                .on_connectivity(ConnectivityEvent::InternetReachable(reachable));
        }
    }

    async fn resync_all(&self) {
        for node in &self.nodes {
            node.resync().await;
        }
    }

    /// Hand every waiting envelope to its device
    async fn deliver(&mut self) -> Result<usize> {
        let mut delivered = 0;
        for (node, inbox) in self.nodes.iter().zip(self.inboxes.iter_mut()) {
            while let Ok(envelope) = inbox.try_recv() {
                node.receive(envelope).await?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    async fn report(&self, published: usize, queued_on_publish: usize) -> Result<SimulationReport> {
        let mut devices = Vec::with_capacity(self.nodes.len());
        let mut orders: Vec<Vec<EntryId>> = Vec::with_capacity(self.nodes.len());

        for (node, author) in self.nodes.iter().zip(&self.authors) {
            let ledger = node.ledger();
            let audit = ledger.audit().await?;
            let window = node.router().reliability_snapshot().await;

            orders.push(
                ledger
                    .entries_by_lane(&self.config.lane_id)
                    .await?
                    .iter()
                    .map(|entry| entry.entry_id().clone())
                    .collect(),
            );
            devices.push(DeviceReport {
                author: author.to_string(),
                entries: ledger.len().await?,
                clock: ledger.clock_value(author).await?,
                audit_valid: audit.valid,
                audit_invalid: audit.invalid,
                pending_mesh: node.cache().pending().await.len(),
                offline_queue: node.router().offline_queue().len().await,
                health: node.router().delivery_health().await,
                primary_score: window.score(TransportPath::PrimaryOnline),
                bridge_score: window.score(TransportPath::BridgeOnline),
                mesh_score: window.score(TransportPath::LocalMesh),
            });
        }

        let converged = orders
            .iter()
            .all(|order| order.len() == published && Some(order) == orders.first());

        info!(published, converged, "simulation finished");
        Ok(SimulationReport {
            seed: self.seed,
            published,
            queued_on_publish,
            devices,
            converged,
        })
    }
}
