//! Connection manager
//!
//! Owns the node registry, one link per registered peer, and the link to the
//! local vehicle. Link events are applied here; peer status is written by
//! nothing else.

use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, info, trace, warn};

use convoy_core::{monotonic_ms, LinkSection};
use convoy_unit_status::schema::{self, InboundMessage};
use convoy_unit_status::{LinkStatus, NodeConfigPatch, NodeRegistry, PeerNode};

use crate::error::{MeshError, MeshResult};
use crate::link::{LinkEvent, LinkEventKind, LinkHandle, LinkId, LinkSpawner};
use crate::peer::normalize_host;

/// Result of applying one link event
#[derive(Debug, Clone, PartialEq)]
pub struct LinkUpdate {
    /// Link the event came from
    pub id: LinkId,
    /// Registry content changed
    pub changed: bool,
    /// Decoded inbound frame, if the event carried one
    pub message: Option<InboundMessage>,
}

impl LinkUpdate {
    fn ignored(id: LinkId) -> Self {
        Self {
            id,
            changed: false,
            message: None,
        }
    }
}

/// Peer connection manager
pub struct ConnectionManager {
    spawner: Box<dyn LinkSpawner>,
    link: LinkSection,
    registry: NodeRegistry,
    links: HashMap<String, LinkHandle>,
    self_host: Option<String>,
    local: Option<LinkHandle>,
    local_status: LinkStatus,
    next_generation: u64,
}

impl ConnectionManager {
    /// Create a manager. Opens the local link if `self_host` is set.
    pub fn new(spawner: Box<dyn LinkSpawner>, link: LinkSection, self_host: Option<&str>) -> Self {
        let mut manager = Self {
            spawner,
            link,
            registry: NodeRegistry::new(),
            links: HashMap::new(),
            self_host: self_host.and_then(normalize_host),
            local: None,
            local_status: LinkStatus::Connecting,
            next_generation: 1,
        };
        match manager.self_host.clone() {
            Some(host) => manager.local = Some(manager.spawn_link(LinkId::Local, &host)),
            None => warn!("no self_host configured, local vehicle will not receive commands"),
        }
        manager
    }

    fn spawn_link(&mut self, id: LinkId, host: &str) -> LinkHandle {
        let generation = self.next_generation;
        self.next_generation += 1;
        self.spawner.spawn(id, generation, self.link.url(host))
    }

    /// Generation of the live link behind `id`, if there is one
    pub fn link_generation(&self, id: &LinkId) -> Option<u64> {
        match id {
            LinkId::Local => self.local.as_ref(),
            LinkId::Peer(host) => self.links.get(host),
        }
        .map(LinkHandle::generation)
    }

    /// Registered peers
    pub fn registry(&self) -> &NodeRegistry {
        &self.registry
    }

    /// Registered peers, for mutation of non-link state
    pub fn registry_mut(&mut self) -> &mut NodeRegistry {
        &mut self.registry
    }

    /// Check if a peer host is the local vehicle
    pub fn is_self(&self, host: &str) -> bool {
        self.self_host.as_deref() == Some(host)
    }

    /// Status of the local vehicle's link
    pub fn local_status(&self) -> LinkStatus {
        self.local_status
    }

    /// Register a peer, or merge `overrides` into an existing one.
    ///
    /// A link is started only for a newly created peer.
    pub fn add_peer(&mut self, raw_host: &str, overrides: &NodeConfigPatch) -> MeshResult<PeerNode> {
        let host = normalize_host(raw_host).ok_or_else(|| MeshError::InvalidHost(raw_host.to_string()))?;
        let (node, created) = self.registry.upsert(&host, overrides);
        let node = node.clone();
        if created {
            info!(host = %host, index = node.config.index, "peer added");
            let handle = self.spawn_link(LinkId::Peer(host.clone()), &host);
            self.links.insert(host, handle);
        } else {
            debug!(host = %host, "peer config merged");
        }
        Ok(node)
    }

    /// Unregister a peer and tear down its link
    pub fn remove_peer(&mut self, raw_host: &str) -> MeshResult<PeerNode> {
        let host = normalize_host(raw_host).ok_or_else(|| MeshError::InvalidHost(raw_host.to_string()))?;
        let node = self
            .registry
            .remove(&host)
            .ok_or_else(|| MeshError::PeerNotFound { host: host.clone() })?;
        if let Some(handle) = self.links.remove(&host) {
            handle.shutdown();
        }
        info!(host = %host, "peer removed");
        Ok(node)
    }

    /// Merge a config patch into a registered peer
    pub fn update_node_config(&mut self, raw_host: &str, patch: &NodeConfigPatch) -> MeshResult<()> {
        let host = normalize_host(raw_host).ok_or_else(|| MeshError::InvalidHost(raw_host.to_string()))?;
        if self.registry.update_config(&host, patch) {
            debug!(host = %host, ?patch, "peer config updated");
            Ok(())
        } else {
            Err(MeshError::PeerNotFound { host })
        }
    }

    /// Send a text frame to a peer. Dropped unless the peer is online.
    ///
    /// Returns whether the frame was handed to the link.
    pub fn send(&self, host: &str, text: String) -> bool {
        let online = self.registry.get(host).is_some_and(PeerNode::is_online);
        match self.links.get(host) {
            Some(handle) if online => handle.send(text).is_ok(),
            _ => {
                trace!(host = %host, "send dropped, peer not connected");
                false
            }
        }
    }

    /// Serialize and send to a peer
    pub fn send_json<T: Serialize>(&self, host: &str, message: &T) -> MeshResult<bool> {
        Ok(self.send(host, serde_json::to_string(message)?))
    }

    /// Send a text frame to the local vehicle. Dropped unless its link is open.
    pub fn send_local(&self, text: String) -> bool {
        match &self.local {
            Some(handle) if self.local_status == LinkStatus::Online => handle.send(text).is_ok(),
            _ => {
                trace!("send dropped, local link not connected");
                false
            }
        }
    }

    /// Serialize and send to the local vehicle
    pub fn send_local_json<T: Serialize>(&self, message: &T) -> MeshResult<bool> {
        Ok(self.send_local(serde_json::to_string(message)?))
    }

    /// Fan a message out to every enabled peer plus the local vehicle.
    ///
    /// `build` runs for every enabled peer other than the local vehicle's own
    /// entry; the result is sent only if that peer is online. `local` always
    /// goes to the local link. Returns the number of peers sent to.
    pub fn broadcast_to_enabled<T, F>(&self, mut build: F, local: &T) -> MeshResult<usize>
    where
        T: Serialize,
        F: FnMut(&PeerNode) -> T,
    {
        let mut sent = 0;
        for node in self.registry.nodes() {
            if !node.config.enabled || self.is_self(&node.host) {
                continue;
            }
            let message = build(node);
            if node.is_online() && self.send_json(&node.host, &message)? {
                sent += 1;
            }
        }
        self.send_local_json(local)?;
        Ok(sent)
    }

    /// Apply one link event.
    ///
    /// Events from a link that is no longer current are ignored: the peer was
    /// removed, or removed and added again with a fresh link.
    pub fn handle_event(&mut self, event: LinkEvent) -> LinkUpdate {
        if self.link_generation(&event.id) != Some(event.generation) {
            trace!(link = %event.id, generation = event.generation, "stale link event ignored");
            return LinkUpdate::ignored(event.id);
        }
        match event.id {
            LinkId::Local => self.handle_local(event.kind),
            LinkId::Peer(host) => self.handle_peer(host, event.kind),
        }
    }

    fn handle_local(&mut self, kind: LinkEventKind) -> LinkUpdate {
        let id = LinkId::Local;
        let status = match kind {
            LinkEventKind::Message(text) => {
                let message = decode_logged(&id, &text);
                return LinkUpdate {
                    id,
                    changed: false,
                    message,
                };
            }
            other => status_for(&other),
        };
        match status {
            Some(status) if status != self.local_status => {
                self.local_status = status;
                LinkUpdate {
                    id,
                    changed: true,
                    message: None,
                }
            }
            _ => LinkUpdate::ignored(id),
        }
    }

    fn handle_peer(&mut self, host: String, kind: LinkEventKind) -> LinkUpdate {
        let id = LinkId::Peer(host.clone());
        let Some(node) = self.registry.get_mut(&host) else {
            return LinkUpdate::ignored(id);
        };

        match kind {
            LinkEventKind::Message(text) => {
                node.last_seen_ms = monotonic_ms();
                let message = decode_logged(&id, &text);
                match &message {
                    Some(InboundMessage::Telemetry(telemetry)) => {
                        if let Some(attitude) = telemetry.attitude() {
                            node.attitude = Some(attitude);
                        }
                        if let Some(group) = &telemetry.group {
                            node.apply_group(group);
                        }
                    }
                    Some(InboundMessage::GroupState(group)) => node.apply_group(group),
                    Some(InboundMessage::Info(text)) => info!(host = %host, text = %text, "peer info"),
                    Some(InboundMessage::Other(kind)) => trace!(host = %host, kind = %kind, "frame ignored"),
                    None => {}
                }
                LinkUpdate {
                    id,
                    changed: true,
                    message,
                }
            }
            other => match status_for(&other) {
                Some(status) if status != node.status => {
                    node.status = status;
                    LinkUpdate {
                        id,
                        changed: true,
                        message: None,
                    }
                }
                _ => LinkUpdate::ignored(id),
            },
        }
    }

    /// Shut down every link
    pub fn shutdown(&mut self) {
        for (_, handle) in self.links.drain() {
            handle.shutdown();
        }
        if let Some(handle) = self.local.take() {
            handle.shutdown();
        }
    }
}

fn status_for(kind: &LinkEventKind) -> Option<LinkStatus> {
    match kind {
        LinkEventKind::Connecting => Some(LinkStatus::Connecting),
        LinkEventKind::Opened => Some(LinkStatus::Online),
        LinkEventKind::Closed => Some(LinkStatus::Offline),
        LinkEventKind::Error(_) => Some(LinkStatus::Error),
        LinkEventKind::Message(_) => None,
    }
}

fn decode_logged(id: &LinkId, text: &str) -> Option<InboundMessage> {
    match schema::decode(text) {
        Ok(message) => Some(message),
        Err(e) => {
            warn!(link = %id, error = %e, "malformed frame discarded");
            None
        }
    }
}
