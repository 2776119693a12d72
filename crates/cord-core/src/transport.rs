//! Transport abstraction for the cord
//!
//! Three asymmetric transports feed the cord: the primary realtime channel,
//! the bridge relay and the local radio mesh. Each is represented by one
//! [`PathTransport`]; which one to use is decided from a
//! [`ConnectivityState`] that is rebuilt from pushed [`ConnectivityEvent`]s.

use core::fmt;
use core::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::errors::{CordError, Result};
use crate::marker::{MARKER_MESH, MARKER_ONLINE, MARKER_SUB};

// ----------------------------------------------------------------------------
// Transport Path
// ----------------------------------------------------------------------------

/// Path a message travels over. Derived from live state, never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransportPath {
    PrimaryOnline,
    BridgeOnline,
    LocalMesh,
    None,
}

impl TransportPath {
    /// Paths backed by an actual transport, in priority order
    pub const LIVE: [TransportPath; 3] = [
        TransportPath::PrimaryOnline,
        TransportPath::BridgeOnline,
        TransportPath::LocalMesh,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TransportPath::PrimaryOnline => "PRIMARY_ONLINE",
            TransportPath::BridgeOnline => "BRIDGE_ONLINE",
            TransportPath::LocalMesh => "LOCAL_MESH",
            TransportPath::None => "NONE",
        }
    }

    /// Whether this path needs internet connectivity
    pub fn is_online(&self) -> bool {
        matches!(
            self,
            TransportPath::PrimaryOnline | TransportPath::BridgeOnline
        )
    }

    /// Delivery marker recorded for an entry that arrived over this path
    pub fn arrival_marker(&self) -> Option<&'static str> {
        match self {
            TransportPath::PrimaryOnline => Some(MARKER_SUB),
            TransportPath::BridgeOnline => Some(MARKER_ONLINE),
            TransportPath::LocalMesh => Some(MARKER_MESH),
            TransportPath::None => None,
        }
    }
}

impl fmt::Display for TransportPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ----------------------------------------------------------------------------
// Routing Strategy
// ----------------------------------------------------------------------------

/// Process-wide policy for choosing transports per send
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", try_from = "String")]
pub enum RoutingStrategy {
    /// Single best path by fixed priority
    #[default]
    BestAvailable,
    /// An online path and the mesh, concurrently
    DualPath,
    OnlineOnly,
    MeshOnly,
}

impl RoutingStrategy {
    pub const ALL: [RoutingStrategy; 4] = [
        RoutingStrategy::BestAvailable,
        RoutingStrategy::DualPath,
        RoutingStrategy::OnlineOnly,
        RoutingStrategy::MeshOnly,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RoutingStrategy::BestAvailable => "BEST_AVAILABLE",
            RoutingStrategy::DualPath => "DUAL_PATH",
            RoutingStrategy::OnlineOnly => "ONLINE_ONLY",
            RoutingStrategy::MeshOnly => "MESH_ONLY",
        }
    }
}

impl fmt::Display for RoutingStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RoutingStrategy {
    type Err = CordError;

    fn from_str(s: &str) -> core::result::Result<Self, Self::Err> {
        let normalized = s.trim().replace('-', "_").to_ascii_uppercase();
        RoutingStrategy::ALL
            .iter()
            .copied()
            .find(|strategy| strategy.as_str() == normalized)
            .ok_or_else(|| CordError::config_error(format!("unknown routing strategy: {}", s)))
    }
}

/// Lets config files and environment variables spell strategies loosely
impl TryFrom<String> for RoutingStrategy {
    type Error = CordError;

    fn try_from(value: String) -> core::result::Result<Self, Self::Error> {
        value.parse()
    }
}

// ----------------------------------------------------------------------------
// Path Transport Trait
// ----------------------------------------------------------------------------

/// One concrete transport, bound to a single [`TransportPath`]
///
/// `send` reports delivery as a plain boolean. An `Err` is treated exactly
/// like `Ok(false)` by the router; retries are the router's concern.
#[async_trait]
pub trait PathTransport: Send + Sync {
    /// The path this transport serves
    fn path(&self) -> TransportPath;

    /// Attempt a single delivery of the envelope
    async fn send(&self, envelope: &Envelope) -> Result<bool>;
}

// ----------------------------------------------------------------------------
// Connectivity
// ----------------------------------------------------------------------------

/// Pushed connectivity signal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectivityEvent {
    InternetReachable(bool),
    RadioAvailable(bool),
    /// An online transport connected or dropped
    TransportConnected { path: TransportPath, connected: bool },
}

/// Latest known connectivity, as reported by the platform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectivityState {
    pub internet_reachable: bool,
    pub radio_available: bool,
    pub primary_connected: bool,
    pub bridge_connected: bool,
}

impl ConnectivityState {
    /// Everything up
    pub fn all_up() -> Self {
        Self {
            internet_reachable: true,
            radio_available: true,
            primary_connected: true,
            bridge_connected: true,
        }
    }

    /// Fold one event into the state
    pub fn apply(&mut self, event: ConnectivityEvent) {
        match event {
            ConnectivityEvent::InternetReachable(up) => self.internet_reachable = up,
            ConnectivityEvent::RadioAvailable(up) => self.radio_available = up,
            ConnectivityEvent::TransportConnected { path, connected } => match path {
                TransportPath::PrimaryOnline => self.primary_connected = connected,
                TransportPath::BridgeOnline => self.bridge_connected = connected,
                TransportPath::LocalMesh => self.radio_available = connected,
                TransportPath::None => {}
            },
        }
    }

    /// Whether a given path can currently carry traffic. Online paths need
    /// both internet reachability and a connected transport.
    pub fn is_available(&self, path: TransportPath) -> bool {
        match path {
            TransportPath::PrimaryOnline => self.internet_reachable && self.primary_connected,
            TransportPath::BridgeOnline => self.internet_reachable && self.bridge_connected,
            TransportPath::LocalMesh => self.radio_available,
            TransportPath::None => false,
        }
    }

    /// Best online path, primary before bridge
    pub fn online_path(&self) -> Option<TransportPath> {
        [TransportPath::PrimaryOnline, TransportPath::BridgeOnline]
            .into_iter()
            .find(|path| self.is_available(*path))
    }

    /// Highest-priority available path, or `None`
    pub fn best_path(&self) -> TransportPath {
        TransportPath::LIVE
            .into_iter()
            .find(|path| self.is_available(*path))
            .unwrap_or(TransportPath::None)
    }
}
