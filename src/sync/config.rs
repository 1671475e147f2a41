/*!
 * Synchronizer Configuration
 *
 * Admission policy selection for locks and semaphores
 */

use serde::{Deserialize, Serialize};

/// Admission policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fairness {
    /// Strict FIFO: no acquire succeeds while an earlier thread is queued
    Fair,
    /// Arriving threads may barge ahead of queued ones (higher throughput)
    #[default]
    NonFair,
}

impl Fairness {
    #[inline]
    pub fn is_fair(self) -> bool {
        matches!(self, Fairness::Fair)
    }
}

impl From<bool> for Fairness {
    fn from(fair: bool) -> Self {
        if fair {
            Fairness::Fair
        } else {
            Fairness::NonFair
        }
    }
}

/// Synchronizer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Admission policy
    pub fairness: Fairness,
}

impl SyncConfig {
    /// Strict FIFO admission
    pub const fn fair() -> Self {
        Self {
            fairness: Fairness::Fair,
        }
    }

    /// Barging admission (the default)
    pub const fn non_fair() -> Self {
        Self {
            fairness: Fairness::NonFair,
        }
    }
}
