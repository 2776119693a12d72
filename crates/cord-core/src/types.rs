//! Core types for the cord
//!
//! This module defines the fundamental identifiers used throughout the log,
//! using newtype patterns for semantic validation and type safety.

use core::fmt;
use core::ops::Deref;
use core::str::FromStr;
use serde::{Deserialize, Serialize};

use crate::errors::{CordError, EntryError};

// ----------------------------------------------------------------------------
// Author Identifier
// ----------------------------------------------------------------------------

/// Identifier of the participant that authored an entry
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AuthorId(String);

impl AuthorId {
    /// Create a new author id
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AuthorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AuthorId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for AuthorId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl Deref for AuthorId {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

// ----------------------------------------------------------------------------
// Entry Identifier
// ----------------------------------------------------------------------------

/// Width of a content-addressed entry id in characters
pub const ENTRY_ID_LEN: usize = 22;

/// Content-addressed entry identifier (22 URL-safe base64 characters)
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EntryId(String);

impl EntryId {
    /// Borrow the id as a string slice
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Wrap an already computed id. Callers must pass a valid encoding.
    pub(crate) fn from_encoded(encoded: String) -> Self {
        Self(encoded)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for EntryId {
    type Err = CordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != ENTRY_ID_LEN {
            return Err(EntryError::InvalidEntryId {
                value: s.to_string(),
                reason: format!("expected {} characters, got {}", ENTRY_ID_LEN, s.len()),
            }
            .into());
        }

        let url_safe = s
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_');
        if !url_safe {
            return Err(EntryError::InvalidEntryId {
                value: s.to_string(),
                reason: "contains characters outside the URL-safe alphabet".to_string(),
            }
            .into());
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for EntryId {
    type Error = CordError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<EntryId> for String {
    fn from(value: EntryId) -> Self {
        value.0
    }
}

// ----------------------------------------------------------------------------
// Timestamp
// ----------------------------------------------------------------------------

/// Millisecond wall-clock timestamp since Unix epoch. Advisory only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct Timestamp(u64);

impl Timestamp {
    /// Create a new timestamp
    pub fn new(millis: u64) -> Self {
        Self(millis)
    }

    /// Get current system timestamp
    pub fn now() -> Self {
        use std::time::{SystemTime, UNIX_EPOCH};
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Self(duration.as_millis() as u64)
    }

    /// Get the raw milliseconds
    pub fn as_millis(&self) -> u64 {
        self.0
    }
}

// ----------------------------------------------------------------------------
// Time Source Trait
// ----------------------------------------------------------------------------

/// Trait for providing wall-clock timestamps
///
/// Wall-clock time is stamped on entries for display only; it never takes
/// part in ordering. Tests substitute a controllable source.
pub trait TimeSource: Send + Sync {
    /// Get the current timestamp
    fn now(&self) -> Timestamp;
}

/// Standard library implementation of TimeSource
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
