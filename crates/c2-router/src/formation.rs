//! Formation state machine
//!
//! Holds the local node's group identity and runs the invite and join-request
//! handshakes. Snapshots reported by the local vehicle are merged field by
//! field; a field the operator is currently editing is left alone.

use std::collections::HashSet;

use convoy_core::config::{MAX_TIMEOUT_MS, MIN_TIMEOUT_MS};
use convoy_core::NodeRole;
use convoy_unit_status::{
    FormationField, FormationMode, FormationState, GroupSnapshot, Invite, JoinRequest,
};
use tracing::{debug, info};

use crate::error::{FormationError, FormationResult};

/// Prompts raised or withdrawn by one reconciliation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Reconciled {
    /// Invite newly shown to the operator
    pub invite_shown: Option<Invite>,
    /// The shown invite was withdrawn by the vehicle
    pub invite_withdrawn: bool,
    /// Join request newly latched
    pub request_latched: Option<JoinRequest>,
    /// The latched request was dropped
    pub request_cleared: bool,
}

/// Formation state plus the bookkeeping behind its prompts
#[derive(Debug, Clone)]
pub struct FormationMachine {
    state: FormationState,
    editing: HashSet<FormationField>,
    driving: bool,
    answered_invite: Option<u32>,
    answered_request: Option<(String, u32)>,
}

/// Group ids are positive; 0 falls back to 1.
pub fn sanitize_group_id(group_id: u32) -> u32 {
    group_id.max(1)
}

/// Clamp a failsafe timeout to the accepted range.
pub fn sanitize_timeout_ms(timeout_ms: u32) -> u32 {
    timeout_ms.clamp(MIN_TIMEOUT_MS, MAX_TIMEOUT_MS)
}

impl FormationMachine {
    /// Create a solo machine with the given group settings
    pub fn new(group_id: u32, group_name: impl Into<String>, timeout_ms: u32) -> Self {
        Self {
            state: FormationState::new(
                sanitize_group_id(group_id),
                group_name.into(),
                sanitize_timeout_ms(timeout_ms),
            ),
            editing: HashSet::new(),
            driving: false,
            answered_invite: None,
            answered_request: None,
        }
    }

    /// Current state
    pub fn state(&self) -> &FormationState {
        &self.state
    }

    /// Current mode
    pub fn mode(&self) -> FormationMode {
        self.state.mode
    }

    /// Check if this node entered formation itself and drives the group
    pub fn is_driving(&self) -> bool {
        self.driving && self.state.mode == FormationMode::Formation
    }

    /// Check if the emergency stop is latched
    pub fn is_stopped(&self) -> bool {
        self.state.emergency_stop
    }

    /// Role to put in commands addressed to the local vehicle
    pub fn self_role(&self) -> NodeRole {
        if self.driving {
            NodeRole::Leader
        } else {
            self.state.role.unwrap_or_default()
        }
    }

    /// Operator enables formation locally.
    ///
    /// Promotes to leader and lifts the emergency stop. Returns true if the
    /// mode changed.
    pub fn enable_formation(&mut self) -> bool {
        let changed = self.state.mode != FormationMode::Formation;
        self.state.mode = FormationMode::Formation;
        self.state.role = Some(NodeRole::Leader);
        self.state.emergency_stop = false;
        self.driving = true;
        if self.state.invite.take().is_some() {
            debug!("invite dropped, formation enabled locally");
        }
        changed
    }

    /// Operator disables formation. Returns true if the mode changed.
    pub fn disable_formation(&mut self) -> bool {
        let changed = self.state.mode != FormationMode::Solo;
        self.state.mode = FormationMode::Solo;
        self.driving = false;
        changed
    }

    /// Latch the emergency stop
    pub fn emergency_stop(&mut self) {
        self.state.emergency_stop = true;
    }

    /// Set the group number; 0 becomes 1
    pub fn set_group_id(&mut self, group_id: u32) {
        self.state.group_id = sanitize_group_id(group_id);
    }

    /// Set the group name
    pub fn set_group_name(&mut self, name: impl Into<String>) {
        self.state.group_name = name.into().trim().to_string();
    }

    /// Set the failsafe timeout, clamped to the accepted range
    pub fn set_timeout_ms(&mut self, timeout_ms: u32) {
        self.state.timeout_ms = sanitize_timeout_ms(timeout_ms);
    }

    /// Operator focused an input
    pub fn begin_edit(&mut self, field: FormationField) {
        self.editing.insert(field);
    }

    /// Operator left an input
    pub fn end_edit(&mut self, field: FormationField) {
        self.editing.remove(&field);
    }

    /// Check if an input has focus
    pub fn is_editing(&self, field: FormationField) -> bool {
        self.editing.contains(&field)
    }

    /// Merge a snapshot reported by the local vehicle and evaluate prompts
    pub fn reconcile(&mut self, snapshot: &GroupSnapshot) -> Reconciled {
        self.merge(snapshot);
        let mut outcome = Reconciled::default();
        self.evaluate_invite(snapshot, &mut outcome);
        self.evaluate_request(snapshot, &mut outcome);
        outcome
    }

    fn merge(&mut self, snapshot: &GroupSnapshot) {
        let state = &mut self.state;
        if !self.editing.contains(&FormationField::GroupId) {
            if let Some(group_id) = snapshot.group_id.filter(|id| *id > 0) {
                state.group_id = group_id;
            }
        }
        if !self.editing.contains(&FormationField::GroupName) {
            if let Some(name) = snapshot.name.as_deref().filter(|n| !n.is_empty()) {
                state.group_name = name.to_string();
            }
        }
        if !self.editing.contains(&FormationField::Timeout) {
            if let Some(timeout_ms) = snapshot.timeout_ms.filter(|t| *t > 0) {
                state.timeout_ms = timeout_ms;
            }
        }
        if let Some(count) = snapshot.count {
            state.member_count = count;
        }
        if let Some(role) = snapshot.role {
            state.role = Some(role);
        }
        if let Some(enabled) = snapshot.enabled {
            state.joined = enabled;
        }
        if let Some(ip) = snapshot.leader_ip.as_deref().filter(|ip| !ip.is_empty()) {
            state.leader_ip = ip.to_string();
        }
        if let Some(peers) = &snapshot.peers {
            state.discovered = peers.clone();
        }
    }

    fn evaluate_invite(&mut self, snapshot: &GroupSnapshot, outcome: &mut Reconciled) {
        match snapshot.invite_pending {
            Some(true) => {
                let Some(group_id) = snapshot.invite_group else {
                    return;
                };
                let shown = self.state.invite.as_ref().map(|i| i.group_id);
                let eligible = !self.state.is_leader()
                    && self.state.mode == FormationMode::Solo
                    && shown != Some(group_id)
                    && self.answered_invite != Some(group_id);
                if eligible {
                    let invite = Invite {
                        group_id,
                        name: snapshot.invite_name.clone().unwrap_or_default(),
                        count: None,
                    };
                    debug!(group_id, "invite latched");
                    self.state.invite = Some(invite.clone());
                    outcome.invite_shown = Some(invite);
                }
            }
            Some(false) => {
                if self.state.invite.take().is_some() {
                    outcome.invite_withdrawn = true;
                }
            }
            None => {}
        }
    }

    fn evaluate_request(&mut self, snapshot: &GroupSnapshot, outcome: &mut Reconciled) {
        if !self.state.is_leader() {
            if self.state.request.take().is_some() {
                debug!("join request dropped, not leader");
                outcome.request_cleared = true;
            }
            return;
        }

        match snapshot.request_pending {
            Some(true) => {
                let (Some(from), Some(group_id)) = (&snapshot.request_from, snapshot.request_group) else {
                    return;
                };
                let key = (from.as_str(), group_id);
                let latched = self.state.request.as_ref().map(JoinRequest::key);
                let answered = self
                    .answered_request
                    .as_ref()
                    .map(|(f, g)| (f.as_str(), *g));
                if latched == Some(key) || answered == Some(key) {
                    return;
                }
                let request = JoinRequest {
                    from_id: from.clone(),
                    from_ip: snapshot.request_from_ip.clone().unwrap_or_default(),
                    name: snapshot.request_name.clone().unwrap_or_default(),
                    group_id,
                };
                debug!(from = %request.from_id, group_id, "join request latched");
                self.state.request = Some(request.clone());
                outcome.request_latched = Some(request);
            }
            Some(false) => {
                // The vehicle let go; the same requester may ask again
                self.answered_request = None;
                if self.state.request.take().is_some() {
                    outcome.request_cleared = true;
                }
            }
            None => {}
        }
    }

    /// Answer the shown invite.
    ///
    /// Accepting adopts the offered group and enters formation as a follower.
    pub fn respond_to_invite(&mut self, accept: bool) -> FormationResult<Invite> {
        let invite = self
            .state
            .invite
            .take()
            .ok_or(FormationError::NoPendingInvite)?;
        self.answered_invite = Some(invite.group_id);
        if accept {
            self.state.group_id = sanitize_group_id(invite.group_id);
            if !invite.name.is_empty() {
                self.state.group_name = invite.name.clone();
            }
            self.state.mode = FormationMode::Formation;
            self.state.role = Some(NodeRole::Follower);
            self.state.emergency_stop = false;
            self.driving = false;
        }
        info!(group_id = invite.group_id, accept, "invite answered");
        Ok(invite)
    }

    /// Answer the latched join request. Approving adds one member.
    pub fn respond_to_join_request(&mut self, accept: bool) -> FormationResult<JoinRequest> {
        if !self.state.is_leader() {
            return Err(FormationError::NotLeader);
        }
        let request = self
            .state
            .request
            .take()
            .ok_or(FormationError::NoPendingRequest)?;
        self.answered_request = Some((request.from_id.clone(), request.group_id));
        if accept {
            self.state.member_count += 1;
        }
        info!(from = %request.from_id, accept, members = self.state.member_count, "join request answered");
        Ok(request)
    }

    /// Adopt a discovery list
    pub fn set_discovered(&mut self, peers: Vec<convoy_unit_status::DiscoveredPeer>) {
        self.state.discovered = peers;
    }
}
