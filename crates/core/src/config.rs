//! Configuration management for Convoy.
//!
//! The coordinator is configured from a TOML file. Every section is optional;
//! missing values fall back to the defaults below.

use crate::error::{CoreError, Result};
use crate::types::NodeRole;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Default formation group number
pub const DEFAULT_GROUP_ID: u32 = 1;
/// Default peer-side failsafe timeout
pub const DEFAULT_TIMEOUT_MS: u32 = 800;
/// Lowest failsafe timeout accepted from the operator
pub const MIN_TIMEOUT_MS: u32 = 400;
/// Highest failsafe timeout accepted from the operator
pub const MAX_TIMEOUT_MS: u32 = 3000;
/// Heartbeat cadence, well under the failsafe timeout
pub const DEFAULT_HEARTBEAT_INTERVAL_MS: u64 = 200;
/// Fixed delay between a link closing and the next connect attempt
pub const DEFAULT_RECONNECT_DELAY_MS: u64 = 1500;
/// WebSocket path served by every vehicle
pub const DEFAULT_LINK_PATH: &str = "/ws";

/// Top-level coordinator configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub node: NodeSection,
    #[serde(default)]
    pub link: LinkSection,
    #[serde(default)]
    pub formation: FormationSection,
    #[serde(default)]
    pub peers: Vec<PeerEntry>,
}

/// The local node itself
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct NodeSection {
    /// Address of the local vehicle's own channel
    #[serde(default)]
    pub self_host: Option<String>,
}

/// WebSocket scheme used for every link
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LinkScheme {
    #[default]
    Ws,
    Wss,
}

impl LinkScheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkScheme::Ws => "ws",
            LinkScheme::Wss => "wss",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LinkSection {
    #[serde(default)]
    pub scheme: LinkScheme,
    #[serde(default = "default_link_path")]
    pub path: String,
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,
}

impl LinkSection {
    /// WebSocket URL for a normalized host.
    pub fn url(&self, host: &str) -> String {
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}{}", self.scheme.as_str(), host, path)
    }
}

impl Default for LinkSection {
    fn default() -> Self {
        Self {
            scheme: LinkScheme::default(),
            path: default_link_path(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormationSection {
    #[serde(default = "default_group_id")]
    pub group_id: u32,
    #[serde(default)]
    pub group_name: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u32,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
}

impl Default for FormationSection {
    fn default() -> Self {
        Self {
            group_id: default_group_id(),
            group_name: String::new(),
            timeout_ms: default_timeout_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
        }
    }
}

/// A peer registered at startup
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerEntry {
    pub host: String,
    #[serde(default)]
    pub role: Option<NodeRole>,
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub enabled: Option<bool>,
}

fn default_link_path() -> String {
    DEFAULT_LINK_PATH.to_string()
}

fn default_reconnect_delay_ms() -> u64 {
    DEFAULT_RECONNECT_DELAY_MS
}

fn default_group_id() -> u32 {
    DEFAULT_GROUP_ID
}

fn default_timeout_ms() -> u32 {
    DEFAULT_TIMEOUT_MS
}

fn default_heartbeat_interval_ms() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_MS
}

impl Config {
    /// Load and validate a configuration file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would break the heartbeat or reconnect loop.
    pub fn validate(&self) -> Result<()> {
        let heartbeat = self.formation.heartbeat_interval_ms;
        if heartbeat == 0 {
            return Err(CoreError::Config(
                "formation.heartbeat_interval_ms must be positive".to_string(),
            ));
        }
        if heartbeat * 2 > u64::from(self.formation.timeout_ms) {
            return Err(CoreError::Config(format!(
                "formation.heartbeat_interval_ms ({}) must be at most half of timeout_ms ({})",
                heartbeat, self.formation.timeout_ms
            )));
        }
        if self.link.reconnect_delay_ms == 0 {
            return Err(CoreError::Config(
                "link.reconnect_delay_ms must be positive".to_string(),
            ));
        }
        if self.link.path.is_empty() {
            return Err(CoreError::Config("link.path must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.formation.heartbeat_interval_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.link.reconnect_delay_ms)
    }

    pub fn link_url(&self, host: &str) -> String {
        self.link.url(host)
    }
}
