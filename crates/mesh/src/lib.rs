//! Convoy Mesh - Peer connection management
//!
//! Keeps one persistent WebSocket link per fleet member plus one to the local
//! vehicle, and turns everything those links observe into registry updates.
//!
//! # Core Components
//!
//! - **Addressing**: host normalization and MAC/host target classification
//! - **Links**: per-peer tasks with unconditional fixed-delay reconnect
//! - **Connection Manager**: registry owner, fan-out, link event handling
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use convoy_core::LinkSection;
//! use convoy_mesh::{ConnectionManager, WsLinkSpawner};
//! use convoy_unit_status::NodeConfigPatch;
//! use std::time::Duration;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let (events_tx, mut events_rx) = tokio::sync::mpsc::unbounded_channel();
//! let spawner = WsLinkSpawner::new(events_tx, Duration::from_millis(1500));
//! let mut manager = ConnectionManager::new(Box::new(spawner), LinkSection::default(), Some("192.168.4.1"));
//!
//! manager.add_peer("http://192.168.4.2/", &NodeConfigPatch::default())?;
//! while let Some(event) = events_rx.recv().await {
//!     let update = manager.handle_event(event);
//!     println!("{} changed: {}", update.id, update.changed);
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod link;
pub mod network;
pub mod peer;

pub use error::{MeshError, MeshResult};
pub use link::{LinkCommand, LinkEvent, LinkEventKind, LinkHandle, LinkId, LinkSpawner, WsLinkSpawner};
pub use network::{ConnectionManager, LinkUpdate};
pub use peer::{normalize_host, PeerTarget};
