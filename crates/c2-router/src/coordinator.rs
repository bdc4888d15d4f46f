//! Formation coordinator
//!
//! Single owner of the connection manager, the formation state machine and
//! the control broadcaster. Every public operation finishes with exactly one
//! registry notification when something visible changed.

use convoy_core::{Config, NodeRole};
use convoy_mesh::{ConnectionManager, LinkEvent, LinkId, LinkSpawner, MeshError, MeshResult, PeerTarget};
use convoy_unit_status::{
    FleetSummary, FormationField, FormationMode, FormationState, InboundMessage, NodeConfigPatch,
    PeerNode, UpdateHandler,
};
use tracing::{debug, info, warn};

use crate::command_types::{ControlVector, InviteTarget, JoinTarget, OutboundMessage};
use crate::dispatcher::{member_count, ControlBroadcaster, DispatchOutcome};
use crate::error::{FormationError, FormationResult};
use crate::formation::{sanitize_group_id, FormationMachine, Reconciled};

/// The coordination core, free of any I/O of its own
pub struct FormationCoordinator {
    mesh: ConnectionManager,
    formation: FormationMachine,
    broadcaster: ControlBroadcaster,
}

fn absorb<T>(result: MeshResult<T>, action: &str) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            warn!(action, error = %e, "send failed");
            None
        }
    }
}

/// Log prompts that now wait on the operator, or no longer do
fn announce(outcome: &Reconciled) {
    if let Some(invite) = &outcome.invite_shown {
        info!(group_id = invite.group_id, name = %invite.name, "invite awaiting answer");
    }
    if outcome.invite_withdrawn {
        info!("invite withdrawn by vehicle");
    }
    if let Some(request) = &outcome.request_latched {
        info!(
            from = %request.from_id,
            ip = %request.from_ip,
            group_id = request.group_id,
            "join request awaiting answer"
        );
    }
    if outcome.request_cleared {
        info!("join request withdrawn");
    }
}

fn parse_target(raw: &str) -> FormationResult<PeerTarget> {
    PeerTarget::parse(raw).ok_or_else(|| MeshError::InvalidHost(raw.to_string()).into())
}

impl FormationCoordinator {
    /// Build a coordinator from configuration and register the configured peers
    pub fn new(config: &Config, spawner: Box<dyn LinkSpawner>) -> Self {
        let mesh = ConnectionManager::new(spawner, config.link.clone(), config.node.self_host.as_deref());
        let formation = FormationMachine::new(
            config.formation.group_id,
            config.formation.group_name.clone(),
            config.formation.timeout_ms,
        );
        let mut coordinator = Self {
            mesh,
            formation,
            broadcaster: ControlBroadcaster::new(),
        };
        for entry in &config.peers {
            let patch = NodeConfigPatch {
                role: entry.role,
                index: entry.index,
                enabled: entry.enabled,
            };
            if let Err(e) = coordinator.mesh.add_peer(&entry.host, &patch) {
                warn!(host = %entry.host, error = %e, "configured peer skipped");
            }
        }
        coordinator
    }

    /// Local formation state
    pub fn formation(&self) -> &FormationState {
        self.formation.state()
    }

    /// Ordered copy of the peer records
    pub fn snapshot(&self) -> Vec<PeerNode> {
        self.mesh.registry().snapshot()
    }

    /// Online / enabled counter
    pub fn summary(&self) -> FleetSummary {
        self.mesh.registry().summary()
    }

    /// Broadcast recipient count
    pub fn member_count(&self) -> u32 {
        member_count(&self.mesh)
    }

    /// Connection manager, read-only
    pub fn mesh(&self) -> &ConnectionManager {
        &self.mesh
    }

    /// Register the render subscriber, replacing any previous one.
    ///
    /// The new subscriber is called once right away with the current state.
    pub fn set_update_handler(&mut self, handler: UpdateHandler) {
        self.mesh.registry_mut().set_update_handler(handler);
        self.notify();
    }

    fn notify(&mut self) {
        let Self {
            mesh, formation, ..
        } = self;
        mesh.registry_mut().notify(formation.state());
    }

    /// Register or update a peer
    pub fn add_peer(&mut self, raw_host: &str, overrides: &NodeConfigPatch) -> FormationResult<PeerNode> {
        let node = self.mesh.add_peer(raw_host, overrides)?;
        self.notify();
        Ok(node)
    }

    /// Unregister a peer and close its link
    pub fn remove_peer(&mut self, raw_host: &str) -> FormationResult<PeerNode> {
        let node = self.mesh.remove_peer(raw_host)?;
        self.notify();
        Ok(node)
    }

    /// Change a peer's local settings
    pub fn update_node_config(&mut self, raw_host: &str, patch: &NodeConfigPatch) -> FormationResult<()> {
        self.mesh.update_node_config(raw_host, patch)?;
        self.notify();
        Ok(())
    }

    /// Operator input
    pub fn dispatch(&mut self, linear: f32, yaw: f32) -> Option<DispatchOutcome> {
        let outcome = self
            .broadcaster
            .dispatch(&self.mesh, &self.formation, ControlVector::new(linear, yaw));
        absorb(outcome, "dispatch")
    }

    /// Heartbeat tick
    pub fn heartbeat(&mut self) -> Option<DispatchOutcome> {
        absorb(self.broadcaster.heartbeat(&self.mesh, &self.formation), "heartbeat").flatten()
    }

    /// Switch between solo and formation driving.
    ///
    /// Entering formation promotes this node to leader and lifts the
    /// emergency stop. Leaving it sends one brake broadcast.
    pub fn set_mode(&mut self, mode: FormationMode) {
        match mode {
            FormationMode::Formation => {
                if self.formation.enable_formation() {
                    info!(group_id = self.formation.state().group_id, "formation driving enabled");
                }
            }
            FormationMode::Solo => {
                if self.formation.disable_formation() {
                    info!("solo driving enabled");
                    absorb(self.broadcaster.brake(&self.mesh, &self.formation), "brake");
                }
            }
        }
        self.notify();
    }

    /// Brake the whole fleet and latch the stop until formation is re-entered
    pub fn emergency_stop(&mut self) {
        self.formation.emergency_stop();
        absorb(self.broadcaster.brake(&self.mesh, &self.formation), "brake");
        self.notify();
    }

    /// Push group configuration to every enabled member
    pub fn sync_config(&mut self) -> usize {
        let sent = absorb(self.broadcaster.sync_config(&self.mesh, &self.formation), "sync").unwrap_or(0);
        info!(peers = sent, "group configuration pushed");
        sent
    }

    /// Set the group number
    pub fn set_group_id(&mut self, group_id: u32) {
        self.formation.set_group_id(group_id);
        self.notify();
    }

    /// Set the group name
    pub fn set_group_name(&mut self, name: &str) {
        self.formation.set_group_name(name);
        self.notify();
    }

    /// Set the failsafe timeout
    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.formation.set_timeout_ms(timeout_ms);
        self.notify();
    }

    /// Operator focused an input
    pub fn begin_edit(&mut self, field: FormationField) {
        self.formation.begin_edit(field);
    }

    /// Operator left an input
    pub fn end_edit(&mut self, field: FormationField) {
        self.formation.end_edit(field);
    }

    /// Answer the invite shown to the operator
    pub fn respond_to_invite(&mut self, accept: bool) -> FormationResult<()> {
        self.formation.respond_to_invite(accept)?;
        absorb(
            self.mesh
                .send_local_json(&OutboundMessage::GroupInviteReply { accept }),
            "invite reply",
        );
        self.notify();
        Ok(())
    }

    /// Answer the latched join request
    pub fn respond_to_join_request(&mut self, accept: bool) -> FormationResult<()> {
        self.formation.respond_to_join_request(accept)?;
        let count = self.formation.state().member_count;
        absorb(
            self.mesh
                .send_local_json(&OutboundMessage::GroupRequestReply { accept, count }),
            "request reply",
        );
        self.notify();
        Ok(())
    }

    /// Invite a vehicle into the local group
    pub fn invite_peer(&mut self, raw_target: &str) -> FormationResult<()> {
        if self.formation.state().role == Some(NodeRole::Follower) {
            return Err(FormationError::NotLeader);
        }
        let target = parse_target(raw_target)?;
        let state = self.formation.state();
        let (mac, ip) = match &target {
            PeerTarget::Mac(mac) => (Some(mac.clone()), None),
            PeerTarget::Host(host) => (None, Some(host.clone())),
        };
        let invite = OutboundMessage::GroupInviteTarget(InviteTarget {
            mac,
            ip,
            group_id: state.group_id,
            name: state.group_name.clone(),
            count: member_count(&self.mesh),
            timeout_ms: state.timeout_ms,
        });
        info!(target = %target, group_id = state.group_id, "invite sent");
        absorb(self.mesh.send_local_json(&invite), "invite");
        Ok(())
    }

    /// Ask a leader to admit the local vehicle into `group_id`
    pub fn request_join(&mut self, raw_target: &str, group_id: u32) -> FormationResult<()> {
        let target = parse_target(raw_target)?;
        let group_id = sanitize_group_id(group_id);
        let request = OutboundMessage::GroupRequestJoinTarget(JoinTarget::new(
            &target,
            group_id,
            self.formation.state().group_name.clone(),
        ));
        info!(target = %target, group_id, "join request sent");
        absorb(self.mesh.send_local_json(&request), "join request");
        Ok(())
    }

    /// Apply one link event
    pub fn handle_link_event(&mut self, event: LinkEvent) {
        let update = self.mesh.handle_event(event);
        let mut changed = update.changed;

        if update.id == LinkId::Local {
            match &update.message {
                Some(InboundMessage::Telemetry(telemetry)) => {
                    if let Some(group) = &telemetry.group {
                        announce(&self.formation.reconcile(group));
                        changed = true;
                    }
                    if let Some(peers) = &telemetry.peers {
                        self.formation.set_discovered(peers.clone());
                        changed = true;
                    }
                }
                Some(InboundMessage::GroupState(group)) => {
                    announce(&self.formation.reconcile(group));
                    changed = true;
                }
                Some(InboundMessage::Info(text)) => info!(text = %text, "vehicle info"),
                Some(InboundMessage::Other(kind)) => debug!(kind = %kind, "local frame ignored"),
                None => {}
            }
        }

        if changed {
            self.notify();
        }
    }

    /// Close every link
    pub fn shutdown(&mut self) {
        self.mesh.shutdown();
    }
}
