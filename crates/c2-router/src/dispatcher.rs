//! Control broadcaster
//!
//! Turns a control vector plus the formation state into per-peer frames and
//! fans them out. In formation mode every enabled peer gets its own
//! `group_cmd` carrying its role and index, and the local vehicle gets the
//! leader variant with index 0. In solo mode only the local vehicle is driven.

#![warn(missing_docs)]

use convoy_core::NodeRole;
use convoy_mesh::{ConnectionManager, MeshResult};
use convoy_unit_status::{FormationMode, FormationState, PeerNode};
use tracing::{trace, warn};

use crate::command_types::{ControlVector, GroupCommand, GroupConfig, ManualDrive, OutboundMessage};
use crate::formation::FormationMachine;

/// What a dispatch did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Solo mode: joystick frame to the local vehicle
    Manual {
        /// Local link accepted the frame
        sent: bool,
    },
    /// Formation drive fan-out
    Drive {
        /// Peers sent to
        peers: usize,
    },
    /// Brake fan-out
    Brake {
        /// Peers sent to
        peers: usize,
    },
    /// Nothing to send (follower in formation)
    Skipped,
}

/// Broadcast recipients: enabled peers plus the local vehicle, counted once.
pub fn member_count(mesh: &ConnectionManager) -> u32 {
    let peers = mesh
        .registry()
        .nodes()
        .iter()
        .filter(|n| n.config.enabled && !mesh.is_self(&n.host))
        .count() as u32;
    peers + 1
}

/// Check if any enabled peer other than the local vehicle is connected
pub fn has_active_targets(mesh: &ConnectionManager) -> bool {
    mesh.registry()
        .nodes()
        .iter()
        .any(|n| n.is_reachable_member() && !mesh.is_self(&n.host))
}

/// Formation command for one recipient
pub fn group_command(
    state: &FormationState,
    role: NodeRole,
    index: u32,
    count: u32,
    control: ControlVector,
    enable: bool,
) -> GroupCommand {
    GroupCommand {
        enable,
        group_id: state.group_id,
        name: state.group_name.clone(),
        role,
        index,
        count,
        v: control.linear,
        w: control.yaw,
        timeout_ms: state.timeout_ms,
    }
}

/// Holds the last control vector and fans commands out
#[derive(Debug, Clone, Default)]
pub struct ControlBroadcaster {
    last: ControlVector,
}

impl ControlBroadcaster {
    /// Create a broadcaster with a stationary last vector
    pub fn new() -> Self {
        Self::default()
    }

    /// Send operator input according to the current mode.
    ///
    /// While the emergency stop is latched in formation mode the brake goes
    /// out instead of the vector.
    pub fn dispatch(
        &mut self,
        mesh: &ConnectionManager,
        formation: &FormationMachine,
        control: ControlVector,
    ) -> MeshResult<DispatchOutcome> {
        let control = ControlVector::new(control.linear, control.yaw);
        self.last = control;
        self.send(mesh, formation, control)
    }

    /// Re-send the last vector if there is a connected enabled peer.
    ///
    /// Returns `None` if the tick had nothing to do.
    pub fn heartbeat(
        &self,
        mesh: &ConnectionManager,
        formation: &FormationMachine,
    ) -> MeshResult<Option<DispatchOutcome>> {
        if !formation.is_driving() {
            return Ok(None);
        }
        if !has_active_targets(mesh) {
            trace!("heartbeat idle, no connected members");
            return Ok(None);
        }
        self.send(mesh, formation, self.last).map(Some)
    }

    fn send(
        &self,
        mesh: &ConnectionManager,
        formation: &FormationMachine,
        control: ControlVector,
    ) -> MeshResult<DispatchOutcome> {
        match formation.mode() {
            FormationMode::Solo => {
                let drive = OutboundMessage::Joy(ManualDrive::from(control));
                Ok(DispatchOutcome::Manual {
                    sent: mesh.send_local_json(&drive)?,
                })
            }
            FormationMode::Formation if !formation.is_driving() => Ok(DispatchOutcome::Skipped),
            FormationMode::Formation if formation.is_stopped() => {
                Ok(DispatchOutcome::Brake {
                    peers: self.brake(mesh, formation)?,
                })
            }
            FormationMode::Formation => Ok(DispatchOutcome::Drive {
                peers: fan_out(mesh, formation, control, true)?,
            }),
        }
    }

    /// Send `enable=false, v=0, w=0` to every enabled connected peer and the
    /// local vehicle. Returns the number of peers sent to.
    pub fn brake(&self, mesh: &ConnectionManager, formation: &FormationMachine) -> MeshResult<usize> {
        let peers = fan_out(mesh, formation, ControlVector::ZERO, false)?;
        warn!(peers, "brake broadcast");
        Ok(peers)
    }

    /// Push group configuration to every enabled connected peer and the local vehicle
    pub fn sync_config(&self, mesh: &ConnectionManager, formation: &FormationMachine) -> MeshResult<usize> {
        let state = formation.state();
        let count = member_count(mesh);
        let config_for = |role: NodeRole, index: u32| {
            OutboundMessage::GroupCfg(GroupConfig {
                group_id: state.group_id,
                name: state.group_name.clone(),
                role,
                index,
                count,
                enable: true,
                timeout_ms: state.timeout_ms,
            })
        };
        let local = config_for(NodeRole::Leader, 0);
        mesh.broadcast_to_enabled(|node: &PeerNode| config_for(node.config.role, node.config.index), &local)
    }
}

fn fan_out(
    mesh: &ConnectionManager,
    formation: &FormationMachine,
    control: ControlVector,
    enable: bool,
) -> MeshResult<usize> {
    let state = formation.state();
    let count = member_count(mesh);
    let local = OutboundMessage::GroupCmd(group_command(
        state,
        formation.self_role(),
        0,
        count,
        control,
        enable,
    ));
    mesh.broadcast_to_enabled(
        |node: &PeerNode| {
            OutboundMessage::GroupCmd(group_command(
                state,
                node.config.role,
                node.config.index,
                count,
                control,
                enable,
            ))
        },
        &local,
    )
}
