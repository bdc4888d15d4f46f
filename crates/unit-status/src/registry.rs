//! Node registry
//!
//! Exclusive-owner collection of peer records keyed by normalized host.
//! Iteration follows insertion order so the fleet list renders stably.
//! Mutators never notify on their own; the owner calls [`NodeRegistry::notify`]
//! once per operation so the subscriber sees one update per state change.

use crate::types::{FleetSummary, FormationState, NodeConfig, NodeConfigPatch, PeerNode};

/// The single render/notify subscriber
pub type UpdateHandler = Box<dyn FnMut(&[PeerNode], &FormationState) + Send>;

/// Ordered set of peer records
#[derive(Default)]
pub struct NodeRegistry {
    nodes: Vec<PeerNode>,
    handler: Option<UpdateHandler>,
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.nodes)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

impl NodeRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of peers
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Check if no peers are registered
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a peer
    pub fn get(&self, host: &str) -> Option<&PeerNode> {
        self.nodes.iter().find(|n| n.host == host)
    }

    /// Look up a peer for mutation
    pub fn get_mut(&mut self, host: &str) -> Option<&mut PeerNode> {
        self.nodes.iter_mut().find(|n| n.host == host)
    }

    /// Peers in insertion order
    pub fn nodes(&self) -> &[PeerNode] {
        &self.nodes
    }

    /// Copy of the current peers in insertion order
    pub fn snapshot(&self) -> Vec<PeerNode> {
        self.nodes.clone()
    }

    /// Insert a peer, or merge `overrides` into an existing peer's config.
    ///
    /// Returns the record and whether it was newly created. A new peer's
    /// index defaults to the registry size before insertion.
    pub fn upsert(&mut self, host: &str, overrides: &NodeConfigPatch) -> (&PeerNode, bool) {
        match self.position(host) {
            Some(pos) => {
                let node = &mut self.nodes[pos];
                overrides.apply(&mut node.config);
                (&self.nodes[pos], false)
            }
            None => {
                let mut config = NodeConfig::for_index(self.nodes.len() as u32);
                overrides.apply(&mut config);
                self.nodes.push(PeerNode::new(host, config));
                let pos = self.nodes.len() - 1;
                (&self.nodes[pos], true)
            }
        }
    }

    /// Remove a peer, preserving the order of the rest
    pub fn remove(&mut self, host: &str) -> Option<PeerNode> {
        let pos = self.position(host)?;
        Some(self.nodes.remove(pos))
    }

    /// Merge a config patch into a peer. Returns false if the host is unknown.
    pub fn update_config(&mut self, host: &str, patch: &NodeConfigPatch) -> bool {
        match self.get_mut(host) {
            Some(node) => {
                patch.apply(&mut node.config);
                true
            }
            None => false,
        }
    }

    /// Online / enabled counter
    pub fn summary(&self) -> FleetSummary {
        FleetSummary::from_nodes(&self.nodes)
    }

    /// Register the subscriber, replacing any previous one
    pub fn set_update_handler(&mut self, handler: UpdateHandler) {
        self.handler = Some(handler);
    }

    /// Deliver the current snapshot to the subscriber
    pub fn notify(&mut self, formation: &FormationState) {
        if let Some(handler) = self.handler.as_mut() {
            handler(&self.nodes, formation);
        }
    }

    fn position(&self, host: &str) -> Option<usize> {
        self.nodes.iter().position(|n| n.host == host)
    }
}
