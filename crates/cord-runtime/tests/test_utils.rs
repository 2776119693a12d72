//! Test utilities for deterministic testing of the cord runtime
//!
//! Mock transports with controllable outcomes, a mock time source and
//! fixtures for ledgers sharing one key registry.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cord_core::{
    AuthorId, ConnectivityState, CordError, Ed25519KeyProvider, Envelope, LedgerConfig,
    MemoryEntryStore, PathTransport, Result, RouterConfig, TimeSource, Timestamp, TransportError,
    TransportPath,
};
use cord_runtime::{CordLedger, TransportRouter};
use rand_chacha::ChaCha8Rng;
use rand_core::SeedableRng;
use tokio::sync::Mutex;

pub type TestLedger = CordLedger<MemoryEntryStore, Ed25519KeyProvider>;

// ----------------------------------------------------------------------------
// Mock Time Source
// ----------------------------------------------------------------------------

/// Mock time source for deterministic testing
#[derive(Debug, Clone, Default)]
pub struct MockTimeSource {
    current_time: Arc<AtomicU64>,
}

impl MockTimeSource {
    pub fn new_at(start_time: u64) -> Self {
        Self {
            current_time: Arc::new(AtomicU64::new(start_time)),
        }
    }

    pub fn advance(&self, millis: u64) {
        self.current_time.fetch_add(millis, Ordering::SeqCst);
    }
}

impl TimeSource for MockTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::new(self.current_time.load(Ordering::SeqCst))
    }
}

// ----------------------------------------------------------------------------
// Mock Transport
// ----------------------------------------------------------------------------

/// Transport whose outcome is set by the test
#[derive(Debug)]
pub struct MockTransport {
    path: TransportPath,
    deliver: AtomicBool,
    error: AtomicBool,
    delay_ms: AtomicU64,
    attempts: AtomicUsize,
    sent: Mutex<Vec<Envelope>>,
}

impl MockTransport {
    pub fn new(path: TransportPath) -> Arc<Self> {
        Arc::new(Self {
            path,
            deliver: AtomicBool::new(true),
            error: AtomicBool::new(false),
            delay_ms: AtomicU64::new(0),
            attempts: AtomicUsize::new(0),
            sent: Mutex::new(Vec::new()),
        })
    }

    /// Make sends report failure (`Ok(false)`)
    pub fn set_delivering(&self, deliver: bool) {
        self.deliver.store(deliver, Ordering::SeqCst);
    }

    /// Make sends return an error
    pub fn set_erroring(&self, error: bool) {
        self.error.store(error, Ordering::SeqCst);
    }

    pub fn set_delay(&self, millis: u64) {
        self.delay_ms.store(millis, Ordering::SeqCst);
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Envelopes that were successfully delivered
    pub async fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().await.clone()
    }
}

#[async_trait]
impl PathTransport for MockTransport {
    fn path(&self) -> TransportPath {
        self.path
    }

    async fn send(&self, envelope: &Envelope) -> Result<bool> {
        self.attempts.fetch_add(1, Ordering::SeqCst);

        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }

        if self.error.load(Ordering::SeqCst) {
            return Err(CordError::Transport(TransportError::SendFailed {
                path: self.path.to_string(),
                reason: "mock error".to_string(),
            }));
        }
        if !self.deliver.load(Ordering::SeqCst) {
            return Ok(false);
        }
        self.sent.lock().await.push(envelope.clone());
        Ok(true)
    }
}

/// One mock per live path: primary, bridge, mesh
pub struct MockTransports {
    pub primary: Arc<MockTransport>,
    pub bridge: Arc<MockTransport>,
    pub mesh: Arc<MockTransport>,
}

impl MockTransports {
    pub fn new() -> Self {
        Self {
            primary: MockTransport::new(TransportPath::PrimaryOnline),
            bridge: MockTransport::new(TransportPath::BridgeOnline),
            mesh: MockTransport::new(TransportPath::LocalMesh),
        }
    }

    pub fn router(&self, config: RouterConfig, state: ConnectivityState) -> TransportRouter {
        TransportRouter::new(config, state)
            .with_transport(self.primary.clone())
            .with_transport(self.bridge.clone())
            .with_transport(self.mesh.clone())
    }
}

// ----------------------------------------------------------------------------
// Ledger Fixtures
// ----------------------------------------------------------------------------

/// Key registry holding signing keys for every author, from a fixed seed.
/// Key distribution is out of scope, so test devices share one registry.
pub fn shared_keys(authors: &[&str]) -> Arc<Ed25519KeyProvider> {
    let mut rng = ChaCha8Rng::from_seed([42u8; 32]);
    let keys = Ed25519KeyProvider::new();
    for author in authors {
        keys.generate_for_with_rng(&AuthorId::new(*author), &mut rng)
            .expect("seeded key generation");
    }
    Arc::new(keys)
}

pub fn test_ledger(keys: &Arc<Ed25519KeyProvider>) -> TestLedger {
    test_ledger_on(keys, Arc::new(MemoryEntryStore::new()))
}

pub fn test_ledger_on(keys: &Arc<Ed25519KeyProvider>, store: Arc<MemoryEntryStore>) -> TestLedger {
    CordLedger::new(LedgerConfig::testing(), store, keys.clone())
        .with_time_source(Arc::new(MockTimeSource::new_at(1_700_000_000_000)))
}
