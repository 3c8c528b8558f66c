//! Engine configuration.
//!
//! Loaded from TOML (every field optional) or built in code:
//!
//! ```toml
//! [retry]
//! max_attempts = 4
//! base_backoff_ms = 10
//! max_backoff_ms = 250
//!
//! [pending]
//! stale_after_secs = 1800
//! sweep_interval_secs = 60
//!
//! [snapshot]
//! interval = 50
//!
//! [tree]
//! max_depth_ceiling = 512
//!
//! [history]
//! page_size = 50
//!
//! [storage]
//! busy_timeout_ms = 5000
//! pool_size = 4
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub retry: RetryConfig,
    pub pending: PendingConfig,
    pub snapshot: SnapshotConfig,
    pub tree: TreeConfig,
    pub history: HistoryConfig,
    pub storage: StorageConfig,
}

/// Exponential backoff for transient storage failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts including the first one.
    pub max_attempts: u32,
    pub base_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_backoff_ms: 10,
            max_backoff_ms: 250,
        }
    }
}

impl RetryConfig {
    /// Delay before attempt `attempt + 1` (attempt counts from 1).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u64 << attempt.saturating_sub(1).min(16);
        let ms = self.base_backoff_ms.saturating_mul(factor).min(self.max_backoff_ms);
        Duration::from_millis(ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PendingConfig {
    /// Pending counters untouched for this long are discarded by the sweeper.
    pub stale_after_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for PendingConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 30 * 60,
            sweep_interval_secs: 60,
        }
    }
}

impl PendingConfig {
    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    /// Take a snapshot every N revisions. 0 disables auto-snapshots.
    pub interval: u64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self { interval: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TreeConfig {
    /// Page size applied when a query gives no limit. `None` returns everything.
    pub default_limit: Option<usize>,
    /// Hard bound on traversal depth regardless of the requested `max_depth`.
    pub max_depth_ceiling: u32,
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            default_limit: None,
            max_depth_ceiling: 512,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub page_size: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self { page_size: 50 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub busy_timeout_ms: u64,
    /// Idle connections kept for reuse (file databases only).
    pub pool_size: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5000,
            pool_size: 4,
        }
    }
}

impl StorageConfig {
    pub fn busy_timeout(&self) -> Duration {
        Duration::from_millis(self.busy_timeout_ms)
    }
}

impl EngineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(s) => Self::from_toml_str(&s),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no engine config, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(EngineError::Config(format!("{}: {e}", path.display()))),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_snapshot_interval(mut self, interval: u64) -> Self {
        self.snapshot.interval = interval;
        self
    }

    pub fn with_pending(mut self, pending: PendingConfig) -> Self {
        self.pending = pending;
        self
    }

    pub fn with_tree(mut self, tree: TreeConfig) -> Self {
        self.tree = tree;
        self
    }
}
