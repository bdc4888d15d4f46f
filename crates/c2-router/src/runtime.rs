//! Fleet runtime
//!
//! Async shell around [`FormationCoordinator`]. One task owns the coordinator
//! and serializes link events, operator commands and heartbeat ticks; the
//! rest of the program talks to it through a cloneable [`FleetHandle`].

use std::time::Duration;

use convoy_core::Config;
use convoy_mesh::{LinkEvent, LinkSpawner, WsLinkSpawner};
use convoy_unit_status::{
    FleetSummary, FormationField, FormationMode, FormationState, NodeConfigPatch, PeerNode,
    UpdateHandler,
};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

use crate::coordinator::FormationCoordinator;
use crate::dispatcher::DispatchOutcome;
use crate::error::{FormationError, FormationResult};
use crate::heartbeat;

const COMMAND_QUEUE: usize = 64;

type Reply<T> = oneshot::Sender<T>;

/// Requests served by the runtime task
pub enum FleetCommand {
    /// Register a peer or merge settings into it
    AddPeer {
        host: String,
        patch: NodeConfigPatch,
        reply: Reply<FormationResult<PeerNode>>,
    },
    /// Unregister a peer and close its link
    RemovePeer {
        host: String,
        reply: Reply<FormationResult<PeerNode>>,
    },
    /// Patch a peer's local settings
    UpdateNodeConfig {
        host: String,
        patch: NodeConfigPatch,
        reply: Reply<FormationResult<()>>,
    },
    /// Operator control input
    Dispatch {
        linear: f32,
        yaw: f32,
        reply: Reply<Option<DispatchOutcome>>,
    },
    /// Switch between solo and formation driving
    SetMode {
        mode: FormationMode,
        reply: Reply<()>,
    },
    /// Brake the fleet and latch the stop
    EmergencyStop {
        reply: Reply<()>,
    },
    /// Push group configuration; replies with the peer count
    SyncConfig {
        reply: Reply<usize>,
    },
    /// Set the group number
    SetGroupId {
        group_id: u32,
        reply: Reply<()>,
    },
    /// Set the group name
    SetGroupName {
        name: String,
        reply: Reply<()>,
    },
    /// Set the failsafe timeout
    SetTimeout {
        timeout_ms: u32,
        reply: Reply<()>,
    },
    /// Focus or release a group field
    Edit {
        field: FormationField,
        focused: bool,
        reply: Reply<()>,
    },
    /// Answer the shown invite
    RespondToInvite {
        accept: bool,
        reply: Reply<FormationResult<()>>,
    },
    /// Answer the latched join request
    RespondToJoinRequest {
        accept: bool,
        reply: Reply<FormationResult<()>>,
    },
    /// Invite a vehicle by MAC or host
    InvitePeer {
        target: String,
        reply: Reply<FormationResult<()>>,
    },
    /// Ask a leader to admit the local vehicle
    RequestJoin {
        target: String,
        group_id: u32,
        reply: Reply<FormationResult<()>>,
    },
    /// Read peers, formation state and counter together
    Snapshot {
        reply: Reply<(Vec<PeerNode>, FormationState, FleetSummary)>,
    },
    /// Replace the render subscriber
    SetUpdateHandler {
        handler: UpdateHandler,
        reply: Reply<()>,
    },
    /// Close every link and stop the task
    Shutdown,
}

/// Cloneable client of the runtime task
#[derive(Clone)]
pub struct FleetHandle {
    tx: mpsc::Sender<FleetCommand>,
}

impl FleetHandle {
    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> FleetCommand) -> FormationResult<T> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(build(reply))
            .await
            .map_err(|_| FormationError::RuntimeStopped)?;
        rx.await.map_err(|_| FormationError::RuntimeStopped)
    }

    /// Register or update a peer
    pub async fn add_peer(&self, host: &str, patch: NodeConfigPatch) -> FormationResult<PeerNode> {
        let host = host.to_string();
        self.request(|reply| FleetCommand::AddPeer { host, patch, reply })
            .await?
    }

    /// Unregister a peer
    pub async fn remove_peer(&self, host: &str) -> FormationResult<PeerNode> {
        let host = host.to_string();
        self.request(|reply| FleetCommand::RemovePeer { host, reply }).await?
    }

    /// Change a peer's local settings
    pub async fn update_node_config(&self, host: &str, patch: NodeConfigPatch) -> FormationResult<()> {
        let host = host.to_string();
        self.request(|reply| FleetCommand::UpdateNodeConfig { host, patch, reply })
            .await?
    }

    /// Send operator input
    pub async fn dispatch(&self, linear: f32, yaw: f32) -> FormationResult<Option<DispatchOutcome>> {
        self.request(|reply| FleetCommand::Dispatch { linear, yaw, reply })
            .await
    }

    /// Switch driving mode
    pub async fn set_mode(&self, mode: FormationMode) -> FormationResult<()> {
        self.request(|reply| FleetCommand::SetMode { mode, reply }).await
    }

    /// Brake everything and latch the stop
    pub async fn emergency_stop(&self) -> FormationResult<()> {
        self.request(|reply| FleetCommand::EmergencyStop { reply }).await
    }

    /// Push group configuration
    pub async fn sync_config(&self) -> FormationResult<usize> {
        self.request(|reply| FleetCommand::SyncConfig { reply }).await
    }

    /// Set the group number; 0 becomes 1
    pub async fn set_group_id(&self, group_id: u32) -> FormationResult<()> {
        self.request(|reply| FleetCommand::SetGroupId { group_id, reply })
            .await
    }

    /// Set the group name
    pub async fn set_group_name(&self, name: &str) -> FormationResult<()> {
        let name = name.to_string();
        self.request(|reply| FleetCommand::SetGroupName { name, reply })
            .await
    }

    /// Set the failsafe timeout, clamped to the accepted range
    pub async fn set_timeout_ms(&self, timeout_ms: u32) -> FormationResult<()> {
        self.request(|reply| FleetCommand::SetTimeout { timeout_ms, reply })
            .await
    }

    /// Mark an input as focused (`true`) or released (`false`)
    pub async fn edit(&self, field: FormationField, focused: bool) -> FormationResult<()> {
        self.request(|reply| FleetCommand::Edit {
            field,
            focused,
            reply,
        })
        .await
    }

    /// Answer the shown invite
    pub async fn respond_to_invite(&self, accept: bool) -> FormationResult<()> {
        self.request(|reply| FleetCommand::RespondToInvite { accept, reply })
            .await?
    }

    /// Answer the latched join request
    pub async fn respond_to_join_request(&self, accept: bool) -> FormationResult<()> {
        self.request(|reply| FleetCommand::RespondToJoinRequest { accept, reply })
            .await?
    }

    /// Invite a vehicle by MAC or host
    pub async fn invite_peer(&self, target: &str) -> FormationResult<()> {
        let target = target.to_string();
        self.request(|reply| FleetCommand::InvitePeer { target, reply })
            .await?
    }

    /// Ask a leader to admit the local vehicle
    pub async fn request_join(&self, target: &str, group_id: u32) -> FormationResult<()> {
        let target = target.to_string();
        self.request(|reply| FleetCommand::RequestJoin {
            target,
            group_id,
            reply,
        })
        .await?
    }

    /// Peer records, formation state and fleet counter in one read
    pub async fn snapshot(&self) -> FormationResult<(Vec<PeerNode>, FormationState, FleetSummary)> {
        self.request(|reply| FleetCommand::Snapshot { reply }).await
    }

    /// Replace the render subscriber
    pub async fn set_update_handler(&self, handler: UpdateHandler) -> FormationResult<()> {
        self.request(|reply| FleetCommand::SetUpdateHandler { handler, reply })
            .await
    }

    /// Stop the runtime task. Links are closed before it exits.
    pub async fn shutdown(&self) -> FormationResult<()> {
        self.tx
            .send(FleetCommand::Shutdown)
            .await
            .map_err(|_| FormationError::RuntimeStopped)
    }
}

/// The task that owns the coordinator
pub struct FleetRuntime {
    coordinator: FormationCoordinator,
    events: mpsc::UnboundedReceiver<LinkEvent>,
    commands: mpsc::Receiver<FleetCommand>,
    heartbeat: Duration,
}

impl FleetRuntime {
    /// Build a runtime with WebSocket links. Must be called inside a Tokio runtime.
    pub fn new(config: &Config) -> (Self, FleetHandle) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let spawner = WsLinkSpawner::new(event_tx, config.reconnect_delay());
        Self::with_spawner(config, Box::new(spawner), event_rx)
    }

    /// Build a runtime over any link spawner feeding `events`
    pub fn with_spawner(
        config: &Config,
        spawner: Box<dyn LinkSpawner>,
        events: mpsc::UnboundedReceiver<LinkEvent>,
    ) -> (Self, FleetHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let runtime = Self {
            coordinator: FormationCoordinator::new(config, spawner),
            events,
            commands,
            heartbeat: config.heartbeat_interval(),
        };
        (runtime, FleetHandle { tx })
    }

    /// Serve until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(
            peers = self.coordinator.snapshot().len(),
            heartbeat_ms = self.heartbeat.as_millis() as u64,
            "fleet runtime started"
        );
        let mut ticker = heartbeat::interval(self.heartbeat);

        loop {
            tokio::select! {
                Some(event) = self.events.recv() => {
                    self.coordinator.handle_link_event(event);
                }
                command = self.commands.recv() => match command {
                    Some(FleetCommand::Shutdown) | None => break,
                    Some(command) => self.apply(command),
                },
                _ = ticker.tick() => {
                    if let Some(outcome) = self.coordinator.heartbeat() {
                        debug!(?outcome, "heartbeat");
                    }
                }
            }
        }

        self.coordinator.shutdown();
        info!("fleet runtime stopped");
    }

    fn apply(&mut self, command: FleetCommand) {
        let c = &mut self.coordinator;
        // A dropped reply receiver only means the caller stopped waiting.
        match command {
            FleetCommand::AddPeer { host, patch, reply } => {
                let _ = reply.send(c.add_peer(&host, &patch));
            }
            FleetCommand::RemovePeer { host, reply } => {
                let _ = reply.send(c.remove_peer(&host));
            }
            FleetCommand::UpdateNodeConfig { host, patch, reply } => {
                let _ = reply.send(c.update_node_config(&host, &patch));
            }
            FleetCommand::Dispatch { linear, yaw, reply } => {
                let _ = reply.send(c.dispatch(linear, yaw));
            }
            FleetCommand::SetMode { mode, reply } => {
                c.set_mode(mode);
                let _ = reply.send(());
            }
            FleetCommand::EmergencyStop { reply } => {
                c.emergency_stop();
                let _ = reply.send(());
            }
            FleetCommand::SyncConfig { reply } => {
                let _ = reply.send(c.sync_config());
            }
            FleetCommand::SetGroupId { group_id, reply } => {
                c.set_group_id(group_id);
                let _ = reply.send(());
            }
            FleetCommand::SetGroupName { name, reply } => {
                c.set_group_name(&name);
                let _ = reply.send(());
            }
            FleetCommand::SetTimeout { timeout_ms, reply } => {
                c.set_timeout_ms(timeout_ms);
                let _ = reply.send(());
            }
            FleetCommand::Edit {
                field,
                focused,
                reply,
            } => {
                if focused {
                    c.begin_edit(field);
                } else {
                    c.end_edit(field);
                }
                let _ = reply.send(());
            }
            FleetCommand::RespondToInvite { accept, reply } => {
                let _ = reply.send(c.respond_to_invite(accept));
            }
            FleetCommand::RespondToJoinRequest { accept, reply } => {
                let _ = reply.send(c.respond_to_join_request(accept));
            }
            FleetCommand::InvitePeer { target, reply } => {
                let _ = reply.send(c.invite_peer(&target));
            }
            FleetCommand::RequestJoin {
                target,
                group_id,
                reply,
            } => {
                let _ = reply.send(c.request_join(&target, group_id));
            }
            FleetCommand::Snapshot { reply } => {
                let _ = reply.send((c.snapshot(), c.formation().clone(), c.summary()));
            }
            FleetCommand::SetUpdateHandler { handler, reply } => {
                c.set_update_handler(handler);
                let _ = reply.send(());
            }
            FleetCommand::Shutdown => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convoy_mesh::{LinkCommand, LinkEventKind, LinkHandle, LinkId};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use tokio::time::Instant;

    type Receivers = Arc<Mutex<HashMap<LinkId, mpsc::UnboundedReceiver<LinkCommand>>>>;

    struct FakeSpawner(Receivers);

    impl LinkSpawner for FakeSpawner {
        fn spawn(&self, id: LinkId, generation: u64, _url: String) -> LinkHandle {
            let (tx, rx) = mpsc::unbounded_channel();
            self.0.lock().unwrap().insert(id.clone(), rx);
            LinkHandle::new(id, generation, tx)
        }
    }

    fn drain(receivers: &Receivers, id: &LinkId) -> Vec<serde_json::Value> {
        let mut map = receivers.lock().unwrap();
        let rx = map.get_mut(id).unwrap();
        let mut out = Vec::new();
        while let Ok(LinkCommand::Send(text)) = rx.try_recv() {
            out.push(serde_json::from_str(&text).unwrap());
        }
        out
    }

    fn start() -> (FleetHandle, mpsc::UnboundedSender<LinkEvent>, Receivers) {
        let config = Config::from_toml_str(
            r#"
            [formation]
            timeout_ms = 800
            heartbeat_interval_ms = 200

            [[peers]]
            host = "10.0.0.5"
        "#,
        )
        .unwrap();
        let receivers: Receivers = Arc::default();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (runtime, handle) =
            FleetRuntime::with_spawner(&config, Box::new(FakeSpawner(receivers.clone())), event_rx);
        tokio::spawn(runtime.run());
        (handle, event_tx, receivers)
    }

    async fn wait_online(handle: &FleetHandle, online: usize) {
        loop {
            let (_, _, summary) = handle.snapshot().await.unwrap();
            if summary.online == online {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_repeats_last_vector() {
        let (handle, events, receivers) = start();
        let peer = LinkId::Peer("10.0.0.5".into());
        // The configured peer owns the first link
        events
            .send(LinkEvent::new(peer.clone(), 1, LinkEventKind::Opened))
            .unwrap();
        wait_online(&handle, 1).await;

        handle.set_mode(FormationMode::Formation).await.unwrap();
        handle.dispatch(0.5, -0.25).await.unwrap();

        let start = Instant::now();
        let mut stamps = vec![Duration::ZERO];
        drain(&receivers, &peer);
        while start.elapsed() < Duration::from_secs(2) {
            tokio::time::sleep(Duration::from_millis(50)).await;
            for frame in drain(&receivers, &peer) {
                assert_eq!(frame["type"], "group_cmd");
                assert_eq!(frame["v"], 0.5);
                assert_eq!(frame["w"], -0.25);
                assert_eq!(frame["enable"], true);
                stamps.push(start.elapsed());
            }
        }

        assert!(stamps.len() >= 9, "only {} frames", stamps.len());
        for pair in stamps.windows(2) {
            assert!(pair[1] - pair[0] <= Duration::from_millis(800));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_heartbeat_silent_in_solo() {
        let (handle, events, receivers) = start();
        let peer = LinkId::Peer("10.0.0.5".into());
        // The configured peer owns the first link
        events
            .send(LinkEvent::new(peer.clone(), 1, LinkEventKind::Opened))
            .unwrap();
        wait_online(&handle, 1).await;

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert!(drain(&receivers, &peer).is_empty());
    }

    #[tokio::test]
    async fn test_handle_after_shutdown() {
        let (handle, _events, _) = start();
        let node = handle.add_peer("http://10.0.0.9/", NodeConfigPatch::default()).await.unwrap();
        assert_eq!(node.host, "10.0.0.9");
        assert!(matches!(
            handle.add_peer("", NodeConfigPatch::default()).await,
            Err(FormationError::Mesh(_))
        ));

        handle.shutdown().await.unwrap();
        let mut stopped = false;
        for _ in 0..100 {
            if matches!(handle.snapshot().await, Err(FormationError::RuntimeStopped)) {
                stopped = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(stopped);
    }
}
