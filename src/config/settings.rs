//! Tunable node settings
//!
//! Each section of [`NodeConfig`](super::NodeConfig) is one of the structs
//! below. Every field has a default so partial TOML files are accepted.
//!
//! # Main Types
//!
//! - [`PortSettings`] - Port count and the mode-change policy
//! - [`DispatcherSettings`] - Observer batching windows
//! - [`FenceSettings`] - How fence waits are scheduled
//! - [`BufferSettings`] - Buffer reclaim behaviour

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// What happens to a port mode change requested while buffers are in flight
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModeChangePolicy {
    /// Queue the change and apply it when the port drains
    #[default]
    DeferUntilDrain,
    /// Fail with `PortBusy`
    Reject,
}

/// How the fence gate waits for fences
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FenceWaitMode {
    /// Dedicated worker thread per pending fence; calls return immediately
    #[default]
    Deferred,
    /// Wait on the calling thread before running the action
    Synchronous,
}

/// Port layout and mode policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PortSettings {
    /// Number of ports; even indices are inputs, odd indices outputs
    pub count: u32,
    /// Policy for mode changes while buffers are in flight
    pub mode_change: ModeChangePolicy,
}

impl Default for PortSettings {
    fn default() -> Self {
        Self {
            count: 2,
            mode_change: ModeChangePolicy::default(),
        }
    }
}

/// Observer batching
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherSettings {
    /// Largest batch handed to the observer in one callback
    pub max_batch: usize,
    /// How long the dispatcher waits to fill a batch, in milliseconds
    pub batch_window_ms: u64,
}

impl Default for DispatcherSettings {
    fn default() -> Self {
        Self {
            max_batch: 16,
            batch_window_ms: 2,
        }
    }
}

impl DispatcherSettings {
    pub fn batch_window(&self) -> Duration {
        Duration::from_millis(self.batch_window_ms)
    }
}

/// Fence gate scheduling
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FenceSettings {
    pub wait_mode: FenceWaitMode,
    /// Upper bound of a synchronous wait, in milliseconds
    pub sync_timeout_ms: u64,
}

impl Default for FenceSettings {
    fn default() -> Self {
        Self {
            wait_mode: FenceWaitMode::default(),
            sync_timeout_ms: 1000,
        }
    }
}

impl FenceSettings {
    pub fn sync_timeout(&self) -> Duration {
        Duration::from_millis(self.sync_timeout_ms)
    }
}

/// Buffer bookkeeping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferSettings {
    /// Treat `free_buffer` on a node-owned buffer as a forced reclaim
    pub reclaim_on_free: bool,
}

impl Default for BufferSettings {
    fn default() -> Self {
        Self {
            reclaim_on_free: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let ports = PortSettings::default();
        assert_eq!(ports.count, 2);
        assert_eq!(ports.mode_change, ModeChangePolicy::DeferUntilDrain);

        let fences = FenceSettings::default();
        assert_eq!(fences.wait_mode, FenceWaitMode::Deferred);
        assert_eq!(fences.sync_timeout(), Duration::from_secs(1));

        assert_eq!(DispatcherSettings::default().batch_window(), Duration::from_millis(2));
        assert!(BufferSettings::default().reclaim_on_free);
    }

    #[test]
    fn test_policy_names() {
        let json = serde_json::to_string(&ModeChangePolicy::DeferUntilDrain).unwrap();
        assert_eq!(json, "\"defer_until_drain\"");
        let mode: FenceWaitMode = serde_json::from_str("\"synchronous\"").unwrap();
        assert_eq!(mode, FenceWaitMode::Synchronous);
    }
}
