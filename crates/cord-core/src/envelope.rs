//! Transport envelope
//!
//! The unit handed to a [`PathTransport`](crate::transport::PathTransport):
//! a signed entry plus a per-send message id. The message id is what the
//! delivery cache deduplicates on; it is coarser than the entry id and
//! changes on every publish.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entry::LogEntry;
use crate::errors::{EntryError, Result};
use crate::transport::TransportPath;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub message_id: String,
    /// Path the envelope was received on, or was first sent over
    pub origin: TransportPath,
    pub entry: LogEntry,
}

impl Envelope {
    /// Wrap an entry under a fresh random message id
    pub fn new(entry: LogEntry, origin: TransportPath) -> Self {
        Self {
            message_id: Uuid::new_v4().to_string(),
            origin,
            entry,
        }
    }

    pub fn with_message_id<S: Into<String>>(
        message_id: S,
        entry: LogEntry,
        origin: TransportPath,
    ) -> Self {
        Self {
            message_id: message_id.into(),
            origin,
            entry,
        }
    }

    /// Same envelope, as observed on a different path
    pub fn arrived_via(mut self, path: TransportPath) -> Self {
        self.origin = path;
        self
    }

    /// Binary wire form
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        let envelope: Envelope =
            bincode::deserialize(bytes).map_err(|e| EntryError::MalformedEnvelope {
                reason: e.to_string(),
            })?;
        if envelope.message_id.is_empty() {
            return Err(EntryError::MissingField {
                field: "message_id",
            }
            .into());
        }
        Ok(envelope)
    }
}
