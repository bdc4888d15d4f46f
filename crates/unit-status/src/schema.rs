//! Inbound wire schema for messages pushed by vehicles.
//!
//! Vehicles speak JSON text frames tagged by a `type` key. Every field is
//! optional on the wire and firmware revisions disagree on some types, so a
//! field of the wrong JSON type decodes as absent instead of failing the frame.

use convoy_core::NodeRole;
use serde::de::{DeserializeOwned, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Frame sent on every channel open to request a full group snapshot.
pub const STATUS_QUERY: &str = r#"{"type":"group_query"}"#;

/// Errors produced while decoding an inbound frame
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Frame is not valid JSON
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),

    /// Frame carries no `type` key
    #[error("frame has no type tag")]
    MissingType,
}

fn lenient<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.and_then(|v| serde_json::from_value(v).ok()))
}

fn lenient_or_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: DeserializeOwned + Default,
{
    Ok(lenient(deserializer)?.unwrap_or_default())
}

/// Group snapshot as reported by a vehicle.
///
/// `None` means the vehicle did not report the field (or reported garbage).
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct GroupSnapshot {
    /// Formation mode enabled on the vehicle
    #[serde(default, deserialize_with = "lenient")]
    pub enabled: Option<bool>,
    /// Group number
    #[serde(default, deserialize_with = "lenient")]
    pub group_id: Option<u32>,
    /// Group name
    #[serde(default, deserialize_with = "lenient")]
    pub name: Option<String>,
    /// Member count
    #[serde(default, deserialize_with = "lenient")]
    pub count: Option<u32>,
    /// Member index
    #[serde(default, deserialize_with = "lenient")]
    pub index: Option<u32>,
    /// Role
    #[serde(default, deserialize_with = "lenient")]
    pub role: Option<NodeRole>,
    /// Failsafe timeout
    #[serde(default, deserialize_with = "lenient")]
    pub timeout_ms: Option<u32>,
    /// Failsafe tripped
    #[serde(default, deserialize_with = "lenient")]
    pub failsafe: Option<bool>,
    /// Age of last accepted command
    #[serde(default, deserialize_with = "lenient")]
    pub age_ms: Option<u64>,
    /// An invite awaits a decision on the vehicle
    #[serde(default, deserialize_with = "lenient")]
    pub invite_pending: Option<bool>,
    /// Invited group number
    #[serde(default, deserialize_with = "lenient")]
    pub invite_group: Option<u32>,
    /// Invited group name
    #[serde(default, deserialize_with = "lenient")]
    pub invite_name: Option<String>,
    /// Inviter hardware address
    #[serde(default, deserialize_with = "lenient")]
    pub invite_from: Option<String>,
    /// Inviter claims leadership
    #[serde(default, deserialize_with = "lenient")]
    pub invite_from_is_leader: Option<bool>,
    /// A join request awaits a decision on the vehicle
    #[serde(default, deserialize_with = "lenient")]
    pub request_pending: Option<bool>,
    /// Requested group number
    #[serde(default, deserialize_with = "lenient")]
    pub request_group: Option<u32>,
    /// Requester name
    #[serde(default, deserialize_with = "lenient")]
    pub request_name: Option<String>,
    /// Requester hardware address
    #[serde(default, deserialize_with = "lenient")]
    pub request_from: Option<String>,
    /// Requester IP
    #[serde(default, deserialize_with = "lenient")]
    pub request_from_ip: Option<String>,
    /// Leader IP
    #[serde(default, deserialize_with = "lenient")]
    pub leader_ip: Option<String>,
    /// Leader hardware address
    #[serde(default, deserialize_with = "lenient")]
    pub leader_mac: Option<String>,
    /// Nearby vehicles, when the firmware advertises them
    #[serde(default, deserialize_with = "lenient")]
    pub peers: Option<Vec<DiscoveredPeer>>,
}

/// A nearby vehicle heard on the local radio
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DiscoveredPeer {
    /// Hardware address
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub mac: String,
    /// Advertised name
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub name: String,
    /// Advertises itself as a group leader
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub is_leader: bool,
    /// Advertised group
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub group_id: u32,
    /// Time since last beacon
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub age_ms: u64,
    /// Address, empty if unknown
    #[serde(default, deserialize_with = "lenient_or_default")]
    pub ip: String,
}

/// Periodic attitude telemetry
#[derive(Debug, Clone, Deserialize, PartialEq, Default)]
pub struct Telemetry {
    /// Pitch in degrees
    #[serde(default, deserialize_with = "lenient")]
    pub pitch: Option<f32>,
    /// Roll in degrees
    #[serde(default, deserialize_with = "lenient")]
    pub roll: Option<f32>,
    /// Yaw in degrees
    #[serde(default, deserialize_with = "lenient")]
    pub yaw: Option<f32>,
    /// Embedded group snapshot
    #[serde(default, deserialize_with = "lenient")]
    pub group: Option<GroupSnapshot>,
    /// Nearby vehicles
    #[serde(default, deserialize_with = "lenient")]
    pub peers: Option<Vec<DiscoveredPeer>>,
}

impl Telemetry {
    /// Attitude, if all three axes were reported
    pub fn attitude(&self) -> Option<crate::types::Attitude> {
        Some(crate::types::Attitude {
            pitch: self.pitch?,
            roll: self.roll?,
            yaw: self.yaw?,
        })
    }
}

/// Decoded inbound frame
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// `telemetry`
    Telemetry(Telemetry),
    /// `group_state`, nested under `group` or flattened
    GroupState(GroupSnapshot),
    /// `info` text line
    Info(String),
    /// Any other type tag
    Other(String),
}

impl InboundMessage {
    /// Group snapshot carried by the frame, if any
    pub fn group(&self) -> Option<&GroupSnapshot> {
        match self {
            InboundMessage::Telemetry(t) => t.group.as_ref(),
            InboundMessage::GroupState(g) => Some(g),
            _ => None,
        }
    }
}

/// Decode one text frame.
pub fn decode(text: &str) -> Result<InboundMessage, DecodeError> {
    let value: Value = serde_json::from_str(text)?;
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingType)?
        .to_string();

    match kind.as_str() {
        "telemetry" => Ok(InboundMessage::Telemetry(serde_json::from_value(value)?)),
        "group_state" => {
            let snapshot = match value.get("group") {
                Some(group) if group.is_object() => serde_json::from_value(group.clone())?,
                _ => serde_json::from_value(value)?,
            };
            Ok(InboundMessage::GroupState(snapshot))
        }
        "info" => {
            let text = value
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string();
            Ok(InboundMessage::Info(text))
        }
        _ => Ok(InboundMessage::Other(kind)),
    }
}
