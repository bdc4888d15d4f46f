//! Core functionality for the Convoy fleet formation system.
//!
//! This crate provides the fundamental types, configuration, error handling
//! and logging used across the Convoy workspace.

pub mod config;
pub mod error;
pub mod logging;
pub mod types;

pub use config::{Config, FormationSection, LinkScheme, LinkSection, NodeSection, PeerEntry};
pub use error::{CoreError, Result};
pub use types::{monotonic_ms, NodeRole};
