//! Unit Status - Fleet member records for Convoy
//!
//! This crate holds the data the coordinator keeps about the fleet:
//! - Peer records with link status, attitude, group snapshot, local config
//! - The local node's own formation state
//! - Decoding of status frames pushed by vehicles
//! - The node registry and its single update subscriber
//!
//! # Examples
//!
//! ```
//! use convoy_unit_status::{schema, NodeConfigPatch, NodeRegistry};
//!
//! let mut registry = NodeRegistry::new();
//! registry.upsert("10.0.0.5", &NodeConfigPatch::default());
//!
//! let msg = schema::decode(r#"{"type":"group_state","group":{"group_id":2}}"#).unwrap();
//! if let Some(group) = msg.group() {
//!     registry.get_mut("10.0.0.5").unwrap().apply_group(group);
//! }
//! assert_eq!(registry.get("10.0.0.5").unwrap().group.as_ref().unwrap().group_id, 2);
//! ```

#![warn(missing_docs)]

pub mod registry;
pub mod schema;
pub mod types;

pub use registry::{NodeRegistry, UpdateHandler};
pub use schema::{DecodeError, DiscoveredPeer, GroupSnapshot, InboundMessage, Telemetry};
pub use types::{
    Attitude, FleetSummary, FormationField, FormationMode, FormationState, Invite, JoinRequest,
    LinkStatus, NodeConfig, NodeConfigPatch, PeerGroup, PeerNode,
};
