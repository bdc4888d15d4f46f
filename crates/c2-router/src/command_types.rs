//! Outbound command definitions
//!
//! Every frame the coordinator sends to a vehicle. Frames are JSON objects
//! tagged by `type`; field names match what the vehicle firmware parses.

#![warn(missing_docs)]

use convoy_core::NodeRole;
use convoy_mesh::PeerTarget;
use serde::{Deserialize, Serialize};

/// Operator control input
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ControlVector {
    /// Forward speed, -1..=1
    pub linear: f32,
    /// Turn rate, -1..=1
    pub yaw: f32,
}

impl ControlVector {
    /// Stationary input
    pub const ZERO: ControlVector = ControlVector {
        linear: 0.0,
        yaw: 0.0,
    };

    /// Build a sanitized vector
    pub fn new(linear: f32, yaw: f32) -> Self {
        Self {
            linear: sanitize_axis(linear),
            yaw: sanitize_axis(yaw),
        }
    }
}

/// Non-finite input becomes 0; finite input is clamped to [-1, 1].
pub fn sanitize_axis(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(-1.0, 1.0)
    } else {
        0.0
    }
}

/// Formation drive command (`group_cmd`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupCommand {
    /// `false` is a brake
    pub enable: bool,
    /// Group number
    pub group_id: u32,
    /// Group name
    pub name: String,
    /// Role the recipient plays
    pub role: NodeRole,
    /// Recipient's member index
    pub index: u32,
    /// Member count
    pub count: u32,
    /// Linear speed
    pub v: f32,
    /// Yaw rate
    pub w: f32,
    /// Failsafe timeout the recipient should apply
    pub timeout_ms: u32,
}

/// Formation configuration push (`group_cfg`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GroupConfig {
    /// Group number
    pub group_id: u32,
    /// Group name
    pub name: String,
    /// Role the recipient plays
    pub role: NodeRole,
    /// Recipient's member index
    pub index: u32,
    /// Member count
    pub count: u32,
    /// Formation enabled on the recipient
    pub enable: bool,
    /// Failsafe timeout
    pub timeout_ms: u32,
}

/// Solo joystick frame (`joy`)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ManualDrive {
    /// Horizontal stick axis (yaw)
    pub x: f32,
    /// Vertical stick axis (linear)
    pub y: f32,
    /// Stick angle in degrees
    pub a: f32,
}

impl From<ControlVector> for ManualDrive {
    fn from(control: ControlVector) -> Self {
        let (x, y) = (control.yaw, control.linear);
        Self {
            x,
            y,
            a: y.atan2(x).to_degrees(),
        }
    }
}

/// Directed join request (`group_request_join_target`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JoinTarget {
    /// Target leader hardware address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Target leader host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Group to join
    pub group_id: u32,
    /// Local group name
    pub name: String,
}

impl JoinTarget {
    /// Address a join request at a classified target
    pub fn new(target: &PeerTarget, group_id: u32, name: String) -> Self {
        let (mac, host) = match target {
            PeerTarget::Mac(mac) => (Some(mac.clone()), None),
            PeerTarget::Host(host) => (None, Some(host.clone())),
        };
        Self {
            mac,
            host,
            group_id,
            name,
        }
    }
}

/// Directed invite (`group_invite_target`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InviteTarget {
    /// Invitee hardware address
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mac: Option<String>,
    /// Invitee IP
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    /// Group offered
    pub group_id: u32,
    /// Group name
    pub name: String,
    /// Current member count
    pub count: u32,
    /// Failsafe timeout
    pub timeout_ms: u32,
}

/// Frame sent to a vehicle
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Formation drive or brake
    GroupCmd(GroupCommand),
    /// Formation configuration push
    GroupCfg(GroupConfig),
    /// Solo drive
    Joy(ManualDrive),
    /// Answer to an invite shown on the local vehicle
    GroupInviteReply {
        /// Join the offered group
        accept: bool,
    },
    /// Answer to a join request received by the local vehicle
    GroupRequestReply {
        /// Admit the requester
        accept: bool,
        /// Member count after the decision
        count: u32,
    },
    /// Ask a leader to admit us
    GroupRequestJoinTarget(JoinTarget),
    /// Invite a vehicle into our group
    GroupInviteTarget(InviteTarget),
}

impl OutboundMessage {
    /// Wire tag
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::GroupCmd(_) => "group_cmd",
            OutboundMessage::GroupCfg(_) => "group_cfg",
            OutboundMessage::Joy(_) => "joy",
            OutboundMessage::GroupInviteReply { .. } => "group_invite_reply",
            OutboundMessage::GroupRequestReply { .. } => "group_request_reply",
            OutboundMessage::GroupRequestJoinTarget(_) => "group_request_join_target",
            OutboundMessage::GroupInviteTarget(_) => "group_invite_target",
        }
    }

    /// The formation command, if this is one
    pub fn as_group_cmd(&self) -> Option<&GroupCommand> {
        match self {
            OutboundMessage::GroupCmd(cmd) => Some(cmd),
            _ => None,
        }
    }
}
