//! Convoy C2 Router - Formation command and control
//!
//! This crate turns operator intent into frames for the fleet.
//! It handles:
//! - Outbound frame definitions (`group_cmd`, `group_cfg`, `joy`, handshake replies)
//! - The formation state machine with its invite and join-request prompts
//! - Control fan-out with per-peer role and index
//! - The heartbeat that keeps followers inside their failsafe window
//! - The runtime task that serializes all of the above
//!
//! # Architecture
//!
//! Input flows through the following pipeline:
//! 1. Operator action arrives through a `FleetHandle`
//! 2. `FleetRuntime` applies it to the `FormationCoordinator`
//! 3. `FormationMachine` decides the mode, role and stop latch
//! 4. `ControlBroadcaster` fans the frame out over the mesh links
//! 5. The registry subscriber is notified once
//!
//! Snapshots reported by the local vehicle travel the other way and are
//! reconciled into the formation state.
//!
//! # Examples
//!
//! ```no_run
//! use convoy_c2_router::FleetRuntime;
//! use convoy_core::Config;
//! use convoy_unit_status::FormationMode;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_file("convoy.toml")?;
//! let (runtime, handle) = FleetRuntime::new(&config);
//! tokio::spawn(runtime.run());
//!
//! handle.set_mode(FormationMode::Formation).await?;
//! handle.dispatch(0.5, 0.0).await?;
//! handle.emergency_stop().await?;
//! # Ok(())
//! # }
//! ```

pub mod command_types;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod formation;
pub mod heartbeat;
pub mod runtime;

// Re-export commonly used types
pub use command_types::{
    ControlVector, GroupCommand, GroupConfig, InviteTarget, JoinTarget, ManualDrive, OutboundMessage,
};
pub use coordinator::FormationCoordinator;
pub use dispatcher::{ControlBroadcaster, DispatchOutcome};
pub use error::{FormationError, FormationResult};
pub use formation::{FormationMachine, Reconciled};
pub use runtime::{FleetCommand, FleetHandle, FleetRuntime};
