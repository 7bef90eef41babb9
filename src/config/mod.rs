//! Configuration module for codec-node
//!
//! A node is created from a [`NodeConfig`]. Configs are plain TOML files:
//!
//! ```toml
//! [ports]
//! count = 2
//! mode_change = "defer_until_drain"
//!
//! [dispatcher]
//! max_batch = 16
//! batch_window_ms = 2
//!
//! [fences]
//! wait_mode = "deferred"
//! sync_timeout_ms = 1000
//!
//! [buffers]
//! reclaim_on_free = true
//! ```
//!
//! # Config Location
//!
//! [`NodeConfig::load_or_default`] looks in the platform config directory:
//! - **Linux**: `~/.config/codec-node/node.toml`
//! - **macOS**: `~/Library/Application Support/codec-node/node.toml`
//! - **Windows**: `%APPDATA%\codec-node\node.toml`

pub mod settings;

pub use settings::*;

use crate::error::{NodeError, Result, ResultExt};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Application identifier for config directories
pub const APP_ID: &str = "codec-node";

/// Config filename
pub const CONFIG_FILE: &str = "node.toml";

/// Get the default config file path
pub fn default_config_path() -> Option<PathBuf> {
    dirs_next::config_dir().map(|p| p.join(APP_ID).join(CONFIG_FILE))
}

/// Complete node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub ports: PortSettings,
    pub dispatcher: DispatcherSettings,
    pub fences: FenceSettings,
    pub buffers: BufferSettings,
}

impl NodeConfig {
    /// Parse a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: NodeConfig = toml::from_str(content)
            .map_err(|e| NodeError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            NodeError::Config(format!("Failed to read config file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Load the config from the default location, returning defaults on any error
    pub fn load_or_default() -> Self {
        let Some(path) = default_config_path() else {
            return Self::default();
        };
        if !path.exists() {
            return Self::default();
        }
        Self::load(&path).unwrap_or_else(|e| {
            tracing::warn!("Failed to load node config, using defaults: {}", e);
            Self::default()
        })
    }

    /// Save the config to disk as TOML
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = toml::to_string_pretty(self)
            .map_err(|e| NodeError::Config(format!("Failed to serialize config: {}", e)))?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)
                    .map_err(NodeError::from)
                    .with_context(|| format!("creating config directory {:?}", parent))?;
            }
        }

        std::fs::write(path, content).map_err(|e| {
            NodeError::Config(format!("Failed to write config file {:?}: {}", path, e))
        })
    }

    /// Reject configs a node cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.ports.count == 0 {
            return Err(NodeError::Config("ports.count must be at least 1".into()));
        }
        if self.ports.count == u32::MAX {
            return Err(NodeError::Config("ports.count collides with the ALL wildcard".into()));
        }
        if self.dispatcher.max_batch == 0 {
            return Err(NodeError::Config("dispatcher.max_batch must be at least 1".into()));
        }
        Ok(())
    }

    /// Builder-style override of the port count
    pub fn with_port_count(mut self, count: u32) -> Self {
        self.ports.count = count;
        self
    }

    /// Builder-style override of the mode-change policy
    pub fn with_mode_change(mut self, policy: ModeChangePolicy) -> Self {
        self.ports.mode_change = policy;
        self
    }

    /// Builder-style override of the fence wait mode
    pub fn with_fence_wait(mut self, mode: FenceWaitMode) -> Self {
        self.fences.wait_mode = mode;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = NodeConfig::from_toml_str(
            r#"
            [fences]
            wait_mode = "synchronous"
            "#,
        )
        .unwrap();
        assert_eq!(config.fences.wait_mode, FenceWaitMode::Synchronous);
        assert_eq!(config.fences.sync_timeout_ms, 1000);
        assert_eq!(config.ports.count, 2);
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = NodeConfig::from_toml_str("").unwrap();
        assert_eq!(config.dispatcher.max_batch, 16);
        assert!(config.buffers.reclaim_on_free);
    }

    #[test]
    fn test_validate_rejects_zero_ports() {
        let err = NodeConfig::from_toml_str("[ports]\ncount = 0\n").unwrap_err();
        assert!(err.to_string().contains("ports.count"));
    }

    #[test]
    fn test_malformed_toml() {
        let err = NodeConfig::from_toml_str("[ports\ncount = ").unwrap_err();
        assert!(matches!(err, NodeError::Config(_)));
    }

    #[test]
    fn test_builders() {
        let config = NodeConfig::default()
            .with_port_count(4)
            .with_mode_change(ModeChangePolicy::Reject)
            .with_fence_wait(FenceWaitMode::Synchronous);
        assert_eq!(config.ports.count, 4);
        assert_eq!(config.ports.mode_change, ModeChangePolicy::Reject);
        assert_eq!(config.fences.wait_mode, FenceWaitMode::Synchronous);
    }
}
