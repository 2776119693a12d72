//! Rolling delivery reliability
//!
//! A bounded window of recent `(path, success)` outcomes. The oldest outcome
//! is evicted once the window is full. Scores are advisory: they are exposed
//! to callers but never override the routing priority.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::transport::TransportPath;

/// Default number of outcomes retained
pub const DEFAULT_WINDOW_CAPACITY: usize = 20;
/// Score reported for a path with no history
pub const NEUTRAL_SCORE: f64 = 0.5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReliabilityWindow {
    capacity: usize,
    neutral_score: f64,
    outcomes: VecDeque<(TransportPath, bool)>,
}

impl Default for ReliabilityWindow {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_CAPACITY, NEUTRAL_SCORE)
    }
}

impl ReliabilityWindow {
    /// A zero capacity is bumped to one so the window always holds the
    /// latest outcome.
    pub fn new(capacity: usize, neutral_score: f64) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            neutral_score,
            outcomes: VecDeque::with_capacity(capacity),
        }
    }

    pub fn record(&mut self, path: TransportPath, success: bool) {
        if self.outcomes.len() == self.capacity {
            self.outcomes.pop_front();
        }
        self.outcomes.push_back((path, success));
    }

    /// Success ratio of `path` within the window
    pub fn score(&self, path: TransportPath) -> f64 {
        let (attempts, successes) = self
            .outcomes
            .iter()
            .filter(|(p, _)| *p == path)
            .fold((0usize, 0usize), |(a, s), (_, ok)| (a + 1, s + usize::from(*ok)));

        if attempts == 0 {
            self.neutral_score
        } else {
            successes as f64 / attempts as f64
        }
    }

    /// Success ratio across all paths
    pub fn overall_score(&self) -> f64 {
        if self.outcomes.is_empty() {
            return self.neutral_score;
        }
        let successes = self.outcomes.iter().filter(|(_, ok)| *ok).count();
        successes as f64 / self.outcomes.len() as f64
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}
