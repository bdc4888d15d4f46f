//! Test utilities for formation integration tests

use convoy_c2_router::FormationCoordinator;
use convoy_core::Config;
use convoy_mesh::{LinkCommand, LinkEvent, LinkEventKind, LinkHandle, LinkId, LinkSpawner};
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::time::{Duration, Instant};
use tokio_tungstenite::tungstenite::Message;

/// Command receivers of every link spawned so far
pub type Receivers = Arc<Mutex<HashMap<LinkId, mpsc::UnboundedReceiver<LinkCommand>>>>;

/// In-memory link spawner that keeps each link's command receiver
pub struct RecordingSpawner {
    receivers: Receivers,
}

impl RecordingSpawner {
    pub fn new() -> (Self, Receivers) {
        let receivers = Receivers::default();
        (
            Self {
                receivers: receivers.clone(),
            },
            receivers,
        )
    }
}

impl LinkSpawner for RecordingSpawner {
    fn spawn(&self, id: LinkId, generation: u64, _url: String) -> LinkHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        self.receivers.lock().unwrap().insert(id.clone(), rx);
        LinkHandle::new(id, generation, tx)
    }
}

/// Drain the JSON frames queued on one link
pub fn sent_frames(receivers: &Receivers, id: &LinkId) -> Vec<Value> {
    let mut map = receivers.lock().unwrap();
    let Some(rx) = map.get_mut(id) else {
        return Vec::new();
    };
    let mut frames = Vec::new();
    while let Ok(command) = rx.try_recv() {
        if let LinkCommand::Send(text) = command {
            frames.push(serde_json::from_str(&text).unwrap());
        }
    }
    frames
}

/// Check whether a link received a shutdown
pub fn was_shut_down(receivers: &Receivers, id: &LinkId) -> bool {
    let mut map = receivers.lock().unwrap();
    let Some(rx) = map.get_mut(id) else {
        return false;
    };
    let mut shut = false;
    while let Ok(command) = rx.try_recv() {
        shut |= command == LinkCommand::Shutdown;
    }
    shut
}

/// Coordinator over recording links, built from a TOML snippet
pub fn coordinator(toml: &str) -> (FormationCoordinator, Receivers) {
    let config = Config::from_toml_str(toml).unwrap();
    let (spawner, receivers) = RecordingSpawner::new();
    (FormationCoordinator::new(&config, Box::new(spawner)), receivers)
}

/// Event as reported by the current link behind `id`
pub fn link_event(coordinator: &FormationCoordinator, id: LinkId, kind: LinkEventKind) -> LinkEvent {
    let generation = coordinator.mesh().link_generation(&id).unwrap_or(0);
    LinkEvent::new(id, generation, kind)
}

/// Report a link as open
pub fn open(coordinator: &mut FormationCoordinator, id: LinkId) {
    let event = link_event(coordinator, id, LinkEventKind::Opened);
    coordinator.handle_link_event(event);
}

/// Deliver a frame from the local vehicle
pub fn local_frame(coordinator: &mut FormationCoordinator, json: &str) {
    let event = link_event(coordinator, LinkId::Local, LinkEventKind::Message(json.to_string()));
    coordinator.handle_link_event(event);
}

pub fn peer(host: &str) -> LinkId {
    LinkId::Peer(host.to_string())
}

/// Install a test log subscriber once
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::new("debug"))
        .try_init();
}

/// Feed link events into the coordinator until `done` holds after one of
/// them. Returns the arrival time of that event.
pub async fn pump_until<F>(
    coordinator: &mut FormationCoordinator,
    events: &mut mpsc::UnboundedReceiver<LinkEvent>,
    within: Duration,
    mut done: F,
) -> Option<Instant>
where
    F: FnMut(&LinkEvent, &FormationCoordinator) -> bool,
{
    let deadline = Instant::now() + within;
    loop {
        let event = tokio::time::timeout_at(deadline, events.recv()).await.ok()??;
        let at = Instant::now();
        coordinator.handle_link_event(event.clone());
        if done(&event, coordinator) {
            return Some(at);
        }
    }
}

#[derive(Debug, Clone)]
enum ServerControl {
    Push(String),
    DropClients,
}

/// A WebSocket endpoint standing in for a vehicle
pub struct VehicleServer {
    addr: SocketAddr,
    frames: mpsc::UnboundedReceiver<String>,
    control: broadcast::Sender<ServerControl>,
    connections: Arc<AtomicUsize>,
}

impl VehicleServer {
    pub async fn start() -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let (frame_tx, frames) = mpsc::unbounded_channel();
        let (control, _) = broadcast::channel(16);
        let connections = Arc::new(AtomicUsize::new(0));

        let accept_control = control.clone();
        let accepted = connections.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                accepted.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(stream, frame_tx.clone(), accept_control.subscribe()));
            }
        });

        Ok(Self {
            addr,
            frames,
            control,
            connections,
        })
    }

    /// `127.0.0.1:<port>`
    pub fn host(&self) -> String {
        self.addr.to_string()
    }

    /// TCP connections accepted so far
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Send a text frame to every connected client
    pub fn push(&self, text: &str) {
        let _ = self.control.send(ServerControl::Push(text.to_string()));
    }

    /// Close every client connection. The listener stays up.
    pub fn drop_clients(&self) {
        let _ = self.control.send(ServerControl::DropClients);
    }

    /// Next JSON frame received from any client
    pub async fn next_frame(&mut self, within: Duration) -> Option<Value> {
        let text = tokio::time::timeout(within, self.frames.recv()).await.ok()??;
        serde_json::from_str(&text).ok()
    }
}

async fn serve(
    stream: TcpStream,
    frames: mpsc::UnboundedSender<String>,
    mut control: broadcast::Receiver<ServerControl>,
) {
    let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
        return;
    };
    loop {
        tokio::select! {
            message = ws.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    let _ = frames.send(text);
                }
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
            command = control.recv() => match command {
                Ok(ServerControl::Push(text)) => {
                    if ws.send(Message::Text(text)).await.is_err() {
                        break;
                    }
                }
                Ok(ServerControl::DropClients) => {
                    let _ = ws.close(None).await;
                    break;
                }
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
}
