//! Offline queue
//!
//! Where the router parks envelopes it could not deliver. Nothing handed to
//! the queue is dropped; `drain` gives everything back, oldest first, for a
//! retry once connectivity returns.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use cord_core::Envelope;

#[async_trait]
pub trait OfflineQueue: Send + Sync {
    async fn enqueue(&self, envelope: Envelope);

    /// Remove and return every queued envelope, oldest first
    async fn drain(&self) -> Vec<Envelope>;

    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

/// FIFO queue held in memory
#[derive(Debug, Default)]
pub struct MemoryOfflineQueue {
    queue: Mutex<VecDeque<Envelope>>,
}

impl MemoryOfflineQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queued envelopes without removing them
    pub async fn snapshot(&self) -> Vec<Envelope> {
        self.queue.lock().await.iter().cloned().collect()
    }
}

#[async_trait]
impl OfflineQueue for MemoryOfflineQueue {
    async fn enqueue(&self, envelope: Envelope) {
        let mut queue = self.queue.lock().await;
        debug!(message_id = %envelope.message_id, depth = queue.len() + 1, "queued for retry");
        queue.push_back(envelope);
    }

    async fn drain(&self) -> Vec<Envelope> {
        self.queue.lock().await.drain(..).collect()
    }

    async fn len(&self) -> usize {
        self.queue.lock().await.len()
    }
}
