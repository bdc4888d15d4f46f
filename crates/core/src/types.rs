//! Core types

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::OnceLock;
use std::time::Instant;

/// Role a vehicle plays inside a formation group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NodeRole {
    /// Originates configuration and control broadcasts
    #[serde(alias = "head")]
    Leader,
    /// Accepts broadcasts from a leader
    #[default]
    Follower,
}

impl NodeRole {
    /// Wire representation (`"leader"` / `"follower"`)
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeRole::Leader => "leader",
            NodeRole::Follower => "follower",
        }
    }

    /// Parse a role string leniently; `head` is accepted as an alias of leader.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "leader" | "head" => Some(NodeRole::Leader),
            "follower" => Some(NodeRole::Follower),
            _ => None,
        }
    }
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static EPOCH: OnceLock<Instant> = OnceLock::new();

/// Milliseconds on a process-wide monotonic clock.
///
/// The first call pins the epoch, so the value is never 0 after a message has
/// actually been observed; `0` is reserved for "never seen".
pub fn monotonic_ms() -> u64 {
    let epoch = EPOCH.get_or_init(Instant::now);
    epoch.elapsed().as_millis() as u64 + 1
}
