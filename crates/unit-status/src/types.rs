//! Peer and formation types
//!
//! This module defines the records tracked for every fleet member and the
//! local node's own view of its formation group.

use convoy_core::NodeRole;
use serde::{Deserialize, Serialize};

use crate::schema::{DiscoveredPeer, GroupSnapshot};

/// Connection status of a peer link
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    /// Connect attempt in flight
    #[default]
    Connecting,
    /// Channel open
    Online,
    /// Channel closed, reconnect pending
    Offline,
    /// Transport-level failure observed
    Error,
}

/// Attitude snapshot reported by a vehicle's IMU
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Attitude {
    /// Pitch in degrees
    pub pitch: f32,
    /// Roll in degrees
    pub roll: f32,
    /// Yaw in degrees
    pub yaw: f32,
}

impl Attitude {
    /// Maximum pitch magnitude for a vehicle considered balanced
    pub const LEVEL_PITCH_DEG: f32 = 25.0;

    /// Check if the vehicle is upright (|pitch| < 25°)
    pub fn is_level(&self) -> bool {
        self.pitch.abs() < Self::LEVEL_PITCH_DEG
    }
}

/// Last known group membership reported by a peer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerGroup {
    /// Peer has formation mode enabled
    pub enabled: bool,
    /// Group number
    pub group_id: u32,
    /// Member count as seen by the peer
    pub count: u32,
    /// Peer's member index
    pub index: u32,
    /// Peer's role
    pub role: NodeRole,
    /// Peer's failsafe timeout
    pub timeout_ms: u32,
    /// Peer has stopped itself after missing commands
    pub failsafe: bool,
    /// Age of the peer's last accepted command
    pub age_ms: u64,
}

impl Default for PeerGroup {
    fn default() -> Self {
        Self {
            enabled: false,
            group_id: convoy_core::config::DEFAULT_GROUP_ID,
            count: 0,
            index: 0,
            role: NodeRole::Follower,
            timeout_ms: convoy_core::config::DEFAULT_TIMEOUT_MS,
            failsafe: false,
            age_ms: 0,
        }
    }
}

impl PeerGroup {
    /// Merge the fields present in a snapshot; absent fields keep their value
    pub fn merge(&mut self, snapshot: &GroupSnapshot) {
        if let Some(enabled) = snapshot.enabled {
            self.enabled = enabled;
        }
        if let Some(group_id) = snapshot.group_id {
            self.group_id = group_id;
        }
        if let Some(count) = snapshot.count {
            self.count = count;
        }
        if let Some(index) = snapshot.index {
            self.index = index;
        }
        if let Some(role) = snapshot.role {
            self.role = role;
        }
        if let Some(timeout_ms) = snapshot.timeout_ms {
            self.timeout_ms = timeout_ms;
        }
        if let Some(failsafe) = snapshot.failsafe {
            self.failsafe = failsafe;
        }
        if let Some(age_ms) = snapshot.age_ms {
            self.age_ms = age_ms;
        }
    }
}

/// Locally owned per-peer settings, changed only by the operator
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NodeConfig {
    /// Role assigned to the peer in broadcasts
    pub role: NodeRole,
    /// Member index assigned to the peer
    pub index: u32,
    /// Whether the peer receives broadcasts
    pub enabled: bool,
}

impl NodeConfig {
    /// Default config for a peer appended at position `index`
    pub fn for_index(index: u32) -> Self {
        Self {
            role: NodeRole::Follower,
            index,
            enabled: true,
        }
    }
}

/// Partial update of a [`NodeConfig`]
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct NodeConfigPatch {
    /// New role
    #[serde(default)]
    pub role: Option<NodeRole>,
    /// New index
    #[serde(default)]
    pub index: Option<u32>,
    /// New enabled flag
    #[serde(default)]
    pub enabled: Option<bool>,
}

impl NodeConfigPatch {
    /// Patch that only toggles `enabled`
    pub fn enabled(enabled: bool) -> Self {
        Self {
            enabled: Some(enabled),
            ..Self::default()
        }
    }

    /// Check if the patch changes nothing
    pub fn is_empty(&self) -> bool {
        self.role.is_none() && self.index.is_none() && self.enabled.is_none()
    }

    /// Apply onto a config
    pub fn apply(&self, config: &mut NodeConfig) {
        if let Some(role) = self.role {
            config.role = role;
        }
        if let Some(index) = self.index {
            config.index = index;
        }
        if let Some(enabled) = self.enabled {
            config.enabled = enabled;
        }
    }
}

/// One configured fleet member
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PeerNode {
    /// Normalized address, unique key
    pub host: String,
    /// Link status
    pub status: LinkStatus,
    /// Monotonic ms of the last received message, 0 if never
    pub last_seen_ms: u64,
    /// Last attitude telemetry
    pub attitude: Option<Attitude>,
    /// Last group snapshot
    pub group: Option<PeerGroup>,
    /// Local settings
    pub config: NodeConfig,
}

impl PeerNode {
    /// No message for longer than this marks the peer stale
    pub const STALE_AFTER_MS: u64 = 2_500;

    /// Create a peer record in the `Connecting` state
    pub fn new(host: impl Into<String>, config: NodeConfig) -> Self {
        Self {
            host: host.into(),
            status: LinkStatus::Connecting,
            last_seen_ms: 0,
            attitude: None,
            group: None,
            config,
        }
    }

    /// Check if the peer's channel is open
    pub fn is_online(&self) -> bool {
        self.status == LinkStatus::Online
    }

    /// Check if the peer receives broadcasts and can be reached right now
    pub fn is_reachable_member(&self) -> bool {
        self.config.enabled && self.is_online()
    }

    /// Check if the peer has been silent too long (or never spoke)
    pub fn is_stale(&self, now_ms: u64) -> bool {
        if self.last_seen_ms == 0 {
            return true;
        }
        if now_ms < self.last_seen_ms {
            return false;
        }
        now_ms - self.last_seen_ms > Self::STALE_AFTER_MS
    }

    /// Check if the peer reports an expired failsafe
    pub fn in_failsafe(&self) -> bool {
        self.group.as_ref().is_some_and(|g| g.failsafe)
    }

    /// Merge a group snapshot into the peer record
    pub fn apply_group(&mut self, snapshot: &GroupSnapshot) {
        self.group
            .get_or_insert_with(PeerGroup::default)
            .merge(snapshot);
    }
}

/// Whether operator input drives only the local vehicle or the whole fleet
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FormationMode {
    /// Input drives the local vehicle only
    #[default]
    Solo,
    /// Input is broadcast to the fleet
    Formation,
}

/// Formation fields the operator can edit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormationField {
    /// Group number input
    GroupId,
    /// Group name input
    GroupName,
    /// Failsafe timeout input
    Timeout,
}

/// Leader-initiated offer to join a group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Invite {
    /// Offered group
    pub group_id: u32,
    /// Offered group's name
    pub name: String,
    /// Member count announced by the leader, if known
    pub count: Option<u32>,
}

/// Follower-initiated request to join the local group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct JoinRequest {
    /// Requester identity (hardware address)
    pub from_id: String,
    /// Requester IP, if known
    pub from_ip: String,
    /// Requester name
    pub name: String,
    /// Group the requester wants to join
    pub group_id: u32,
}

impl JoinRequest {
    /// Identity of a request for latching purposes
    pub fn key(&self) -> (&str, u32) {
        (self.from_id.as_str(), self.group_id)
    }
}

/// The local node's own view of its formation group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FormationState {
    /// Solo or formation driving
    pub mode: FormationMode,
    /// Group number (positive)
    pub group_id: u32,
    /// Group name, may be empty
    pub group_name: String,
    /// Failsafe timeout pushed to members
    pub timeout_ms: u32,
    /// Role in the group, `None` while unknown
    pub role: Option<NodeRole>,
    /// Local vehicle reports formation enabled
    pub joined: bool,
    /// Member count
    pub member_count: u32,
    /// Latched join request (leader only)
    pub request: Option<JoinRequest>,
    /// Invite currently shown to the operator
    pub invite: Option<Invite>,
    /// Best-known address of the group's leader
    pub leader_ip: String,
    /// Fleet-wide emergency stop latched
    pub emergency_stop: bool,
    /// Nearby vehicles advertised by the local vehicle
    pub discovered: Vec<DiscoveredPeer>,
}

impl Default for FormationState {
    fn default() -> Self {
        Self::new(
            convoy_core::config::DEFAULT_GROUP_ID,
            String::new(),
            convoy_core::config::DEFAULT_TIMEOUT_MS,
        )
    }
}

impl FormationState {
    /// Create a solo state with the given group settings
    pub fn new(group_id: u32, group_name: String, timeout_ms: u32) -> Self {
        Self {
            mode: FormationMode::Solo,
            group_id,
            group_name,
            timeout_ms,
            role: None,
            joined: false,
            member_count: 1,
            request: None,
            invite: None,
            leader_ip: String::new(),
            emergency_stop: false,
            discovered: Vec::new(),
        }
    }

    /// Check if a join request awaits the operator
    pub fn request_pending(&self) -> bool {
        self.request.is_some()
    }

    /// Check if the local node leads its group
    pub fn is_leader(&self) -> bool {
        self.role == Some(NodeRole::Leader)
    }

    /// Display title: the group name, or `Formation #<id>`
    pub fn title(&self) -> String {
        if self.group_name.is_empty() {
            format!("Formation #{}", self.group_id)
        } else {
            self.group_name.clone()
        }
    }

    /// Display detail line
    pub fn detail(&self) -> String {
        let role = self.role.map(|r| r.as_str()).unwrap_or("unknown");
        format!(
            "#{} · members {} · role {}",
            self.group_id, self.member_count, role
        )
    }
}

/// Online / enabled counter shown next to the fleet list
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct FleetSummary {
    /// Enabled peers with an open channel
    pub online: usize,
    /// Enabled peers
    pub enabled: usize,
}

impl FleetSummary {
    /// Count over a peer snapshot
    pub fn from_nodes(nodes: &[PeerNode]) -> Self {
        let enabled: Vec<&PeerNode> = nodes.iter().filter(|n| n.config.enabled).collect();
        Self {
            online: enabled.iter().filter(|n| n.is_online()).count(),
            enabled: enabled.len(),
        }
    }
}

impl std::fmt::Display for FleetSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.online, self.enabled)
    }
}
