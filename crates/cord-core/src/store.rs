//! Durable entry storage
//!
//! [`EntryStore`] is the seam to whatever persists the cord. Implementations
//! must treat `entry_id` as a unique key: `insert` of an id that is already
//! present is a no-op that reports `false`. Apart from the delivery marker,
//! stored entries are never modified or removed.

use std::collections::BTreeSet;

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};
use hashbrown::HashMap;
use tokio::sync::RwLock;
use tracing::debug;

use crate::entry::{EntryClass, LogEntry, OrderingKey};
use crate::errors::{Result, StoreError};
use crate::types::{AuthorId, EntryId};

/// Stream of entries in canonical order
pub type EntryStream = BoxStream<'static, LogEntry>;

// ----------------------------------------------------------------------------
// Store Trait
// ----------------------------------------------------------------------------

/// Content-addressed, append-only entry persistence
///
/// All implementations must be `Send + Sync` for use across async tasks.
#[async_trait]
pub trait EntryStore: Send + Sync {
    /// Persist an entry. Returns `false` if the id was already present.
    async fn insert(&self, entry: LogEntry) -> Result<bool>;

    /// Persist several entries, reporting per entry whether it was new
    async fn insert_batch(&self, entries: Vec<LogEntry>) -> Result<Vec<bool>> {
        let mut inserted = Vec::with_capacity(entries.len());
        for entry in entries {
            inserted.push(self.insert(entry).await?);
        }
        Ok(inserted)
    }

    async fn get_by_id(&self, id: &EntryId) -> Result<Option<LogEntry>>;

    async fn exists(&self, id: &EntryId) -> Result<bool> {
        Ok(self.get_by_id(id).await?.is_some())
    }

    /// Highest Lamport timestamp stored for `author`
    async fn max_lamport_for_author(&self, author: &AuthorId) -> Result<Option<u64>>;

    /// Highest author counter stored for `author` at exactly `lamport`
    async fn max_author_counter(&self, author: &AuthorId, lamport: u64) -> Result<Option<u32>>;

    /// Overwrite the delivery marker of an existing entry
    async fn update_delivery_marker(&self, id: &EntryId, marker: Option<String>) -> Result<()>;

    async fn query_by_lane(&self, lane_id: &str) -> Result<EntryStream>;

    async fn query_by_author(&self, author: &AuthorId) -> Result<EntryStream>;

    async fn query_by_class(&self, class: EntryClass) -> Result<EntryStream>;

    /// Every stored entry, in canonical order
    async fn scan(&self) -> Result<EntryStream>;

    async fn len(&self) -> Result<usize>;
}

// ----------------------------------------------------------------------------
// In-Memory Store
// ----------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryState {
    entries: HashMap<EntryId, LogEntry>,
    /// Canonical order index. The id disambiguates remote entries that
    /// happen to share an ordering key.
    order: BTreeSet<(OrderingKey, EntryId)>,
    max_lamport: HashMap<AuthorId, u64>,
    max_counter: HashMap<(AuthorId, u64), u32>,
}

impl MemoryState {
    fn ordered<F>(&self, filter: F) -> Vec<LogEntry>
    where
        F: Fn(&LogEntry) -> bool,
    {
        self.order
            .iter()
            .filter_map(|(_, id)| self.entries.get(id))
            .filter(|entry| filter(entry))
            .cloned()
            .collect()
    }
}

/// In-memory entry store backed by a `RwLock`.
///
/// Useful for testing and for devices running without durable storage.
#[derive(Debug, Default)]
pub struct MemoryEntryStore {
    state: RwLock<MemoryState>,
}

impl MemoryEntryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn into_stream(entries: Vec<LogEntry>) -> EntryStream {
    stream::iter(entries).boxed()
}

#[async_trait]
impl EntryStore for MemoryEntryStore {
    async fn insert(&self, entry: LogEntry) -> Result<bool> {
        let mut state = self.state.write().await;
        if state.entries.contains_key(entry.entry_id()) {
            return Ok(false);
        }

        let id = entry.entry_id().clone();
        let author = entry.author_id().clone();
        let lamport = entry.lamport_timestamp();
        let counter = entry.author_counter();

        let max_lamport = state.max_lamport.entry(author.clone()).or_insert(lamport);
        *max_lamport = (*max_lamport).max(lamport);
        let max_counter = state.max_counter.entry((author, lamport)).or_insert(counter);
        *max_counter = (*max_counter).max(counter);

        state.order.insert((entry.ordering_key(), id.clone()));
        debug!(entry_id = %id, lamport, counter, "stored entry in memory");
        state.entries.insert(id, entry);
        Ok(true)
    }

    async fn get_by_id(&self, id: &EntryId) -> Result<Option<LogEntry>> {
        Ok(self.state.read().await.entries.get(id).cloned())
    }

    async fn exists(&self, id: &EntryId) -> Result<bool> {
        Ok(self.state.read().await.entries.contains_key(id))
    }

    async fn max_lamport_for_author(&self, author: &AuthorId) -> Result<Option<u64>> {
        Ok(self.state.read().await.max_lamport.get(author).copied())
    }

    async fn max_author_counter(&self, author: &AuthorId, lamport: u64) -> Result<Option<u32>> {
        Ok(self
            .state
            .read()
            .await
            .max_counter
            .get(&(author.clone(), lamport))
            .copied())
    }

    async fn update_delivery_marker(&self, id: &EntryId, marker: Option<String>) -> Result<()> {
        let mut state = self.state.write().await;
        let entry = state
            .entries
            .get_mut(id)
            .ok_or_else(|| StoreError::NotFound {
                entry_id: id.to_string(),
            })?;
        entry.set_delivery_marker(marker);
        Ok(())
    }

    async fn query_by_lane(&self, lane_id: &str) -> Result<EntryStream> {
        let state = self.state.read().await;
        Ok(into_stream(state.ordered(|e| e.lane_id() == lane_id)))
    }

    async fn query_by_author(&self, author: &AuthorId) -> Result<EntryStream> {
        let state = self.state.read().await;
        Ok(into_stream(state.ordered(|e| e.author_id() == author)))
    }

    async fn query_by_class(&self, class: EntryClass) -> Result<EntryStream> {
        let state = self.state.read().await;
        Ok(into_stream(state.ordered(|e| e.entry_class() == class)))
    }

    async fn scan(&self) -> Result<EntryStream> {
        let state = self.state.read().await;
        Ok(into_stream(state.ordered(|_| true)))
    }

    async fn len(&self) -> Result<usize> {
        Ok(self.state.read().await.entries.len())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
