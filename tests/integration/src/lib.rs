//! Integration tests for the formation coordinator
//!
//! This test suite validates:
//! - Host normalization and self counting across the mesh and the broadcaster
//! - Brake and heartbeat behaviour on mode changes
//! - Invite and join-request handshakes end to end
//! - Link reconnect against a real WebSocket vehicle

pub mod test_utils;

#[cfg(test)]
mod formation_scenarios;

#[cfg(test)]
mod vehicle_link_tests;
