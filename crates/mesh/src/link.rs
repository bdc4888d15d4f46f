//! Per-peer WebSocket links
//!
//! Each link is an independent tokio task that owns one WebSocket and
//! reports everything it observes as [`LinkEvent`]s on a shared channel.
//! A closed or failed link waits a fixed delay and reconnects, forever,
//! until it is told to shut down.

use futures_util::{SinkExt, StreamExt};
use std::fmt;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, trace, warn};

use convoy_unit_status::schema::STATUS_QUERY;

use crate::error::{MeshError, MeshResult};

/// Identity of a link
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LinkId {
    /// The local vehicle's own channel
    Local,
    /// A fleet member, by normalized host
    Peer(String),
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkId::Local => f.write_str("local"),
            LinkId::Peer(host) => f.write_str(host),
        }
    }
}

/// Commands accepted by a link task
#[derive(Debug, Clone, PartialEq)]
pub enum LinkCommand {
    /// Send one text frame if the socket is open, drop it otherwise
    Send(String),
    /// Close the socket and stop reconnecting
    Shutdown,
}

/// What a link observed
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEventKind {
    /// A connect attempt started
    Connecting,
    /// Socket open, status query sent
    Opened,
    /// Socket closed; a reconnect is scheduled
    Closed,
    /// Transport failure; always followed by `Closed`
    Error(String),
    /// One inbound text frame
    Message(String),
}

/// Event reported by a link task
#[derive(Debug, Clone, PartialEq)]
pub struct LinkEvent {
    /// Which link
    pub id: LinkId,
    /// Task that reported it; a re-added host gets a new one
    pub generation: u64,
    /// What happened
    pub kind: LinkEventKind,
}

impl LinkEvent {
    /// Build an event
    pub fn new(id: LinkId, generation: u64, kind: LinkEventKind) -> Self {
        Self { id, generation, kind }
    }
}

/// Sending half of a link task's command channel
#[derive(Debug, Clone)]
pub struct LinkHandle {
    id: LinkId,
    generation: u64,
    tx: mpsc::UnboundedSender<LinkCommand>,
}

impl LinkHandle {
    /// Wrap a command sender
    pub fn new(id: LinkId, generation: u64, tx: mpsc::UnboundedSender<LinkCommand>) -> Self {
        Self { id, generation, tx }
    }

    /// Generation stamped on every event of this link's task
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Queue a text frame
    pub fn send(&self, text: String) -> MeshResult<()> {
        self.tx
            .send(LinkCommand::Send(text))
            .map_err(|_| MeshError::LinkClosed(self.id.clone()))
    }

    /// Ask the task to close and exit
    pub fn shutdown(&self) {
        let _ = self.tx.send(LinkCommand::Shutdown);
    }
}

/// Starts link tasks. Swapped out in tests for an in-memory fake.
pub trait LinkSpawner: Send {
    /// Start a link to `url` whose events carry `generation`
    fn spawn(&self, id: LinkId, generation: u64, url: String) -> LinkHandle;
}

/// Spawns real WebSocket link tasks onto the current tokio runtime
#[derive(Debug, Clone)]
pub struct WsLinkSpawner {
    events: mpsc::UnboundedSender<LinkEvent>,
    reconnect_delay: Duration,
}

impl WsLinkSpawner {
    /// Create a spawner reporting to `events`
    pub fn new(events: mpsc::UnboundedSender<LinkEvent>, reconnect_delay: Duration) -> Self {
        Self {
            events,
            reconnect_delay,
        }
    }
}

impl LinkSpawner for WsLinkSpawner {
    fn spawn(&self, id: LinkId, generation: u64, url: String) -> LinkHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let reporter = EventReporter {
            id: id.clone(),
            generation,
            events: self.events.clone(),
        };
        tokio::spawn(run_link(reporter, url, rx, self.reconnect_delay));
        LinkHandle::new(id, generation, tx)
    }
}

enum SessionEnd {
    Lost,
    Shutdown,
}

/// Stamps and forwards the events of one link task
struct EventReporter {
    id: LinkId,
    generation: u64,
    events: mpsc::UnboundedSender<LinkEvent>,
}

impl EventReporter {
    fn emit(&self, kind: LinkEventKind) {
        let _ = self
            .events
            .send(LinkEvent::new(self.id.clone(), self.generation, kind));
    }
}

/// Wait out the reconnect delay, dropping sends.
///
/// Returns `false` if the link should exit.
async fn reconnect_wait(cmd_rx: &mut mpsc::UnboundedReceiver<LinkCommand>, delay: Duration) -> bool {
    let sleep = tokio::time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return true,
            cmd = cmd_rx.recv() => match cmd {
                Some(LinkCommand::Send(_)) => {} // not connected
                Some(LinkCommand::Shutdown) | None => return false,
            }
        }
    }
}

/// Discard sends queued while the socket was connecting.
///
/// Returns `false` if a shutdown was queued.
fn drain_stale(cmd_rx: &mut mpsc::UnboundedReceiver<LinkCommand>) -> bool {
    while let Ok(cmd) = cmd_rx.try_recv() {
        if cmd == LinkCommand::Shutdown {
            return false;
        }
    }
    true
}

/// Link task body: connect, pump frames, reconnect after a fixed delay.
async fn run_link(
    reporter: EventReporter,
    url: String,
    mut cmd_rx: mpsc::UnboundedReceiver<LinkCommand>,
    reconnect_delay: Duration,
) {
    let id = &reporter.id;
    loop {
        reporter.emit(LinkEventKind::Connecting);
        debug!(link = %id, url = %url, "link connecting");

        let end = match tokio_tungstenite::connect_async(url.as_str()).await {
            Ok((ws, _)) => {
                if !drain_stale(&mut cmd_rx) {
                    return;
                }
                info!(link = %id, "link opened");
                reporter.emit(LinkEventKind::Opened);

                let (mut write, mut read) = ws.split();
                let mut end = SessionEnd::Lost;
                if let Err(e) = write.send(Message::Text(STATUS_QUERY.to_string())).await {
                    warn!(link = %id, error = %e, "status query failed");
                    reporter.emit(LinkEventKind::Error(e.to_string()));
                } else {
                    end = loop {
                        tokio::select! {
                            cmd = cmd_rx.recv() => match cmd {
                                Some(LinkCommand::Send(text)) => {
                                    if let Err(e) = write.send(Message::Text(text)).await {
                                        warn!(link = %id, error = %e, "link send failed");
                                        reporter.emit(LinkEventKind::Error(e.to_string()));
                                        break SessionEnd::Lost;
                                    }
                                }
                                Some(LinkCommand::Shutdown) | None => {
                                    let _ = write.send(Message::Close(None)).await;
                                    break SessionEnd::Shutdown;
                                }
                            },
                            frame = read.next() => match frame {
                                Some(Ok(Message::Text(text))) => {
                                    trace!(link = %id, len = text.len(), "frame received");
                                    reporter.emit(LinkEventKind::Message(text));
                                }
                                Some(Ok(Message::Close(_))) | None => {
                                    info!(link = %id, "link closed by remote");
                                    break SessionEnd::Lost;
                                }
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    warn!(link = %id, error = %e, "link error");
                                    reporter.emit(LinkEventKind::Error(e.to_string()));
                                    break SessionEnd::Lost;
                                }
                            }
                        }
                    };
                }
                end
            }
            Err(e) => {
                // Removed while connecting: the host may already belong to a new link
                if !drain_stale(&mut cmd_rx) {
                    debug!(link = %id, "link shut down");
                    return;
                }
                let err = MeshError::from(e);
                warn!(link = %id, error = %err, "link connect failed");
                reporter.emit(LinkEventKind::Error(err.to_string()));
                SessionEnd::Lost
            }
        };

        if let SessionEnd::Shutdown = end {
            debug!(link = %id, "link shut down");
            return;
        }

        reporter.emit(LinkEventKind::Closed);
        debug!(link = %id, delay_ms = reconnect_delay.as_millis() as u64, "reconnect scheduled");
        if !reconnect_wait(&mut cmd_rx, reconnect_delay).await {
            debug!(link = %id, "link shut down");
            return;
        }
    }
}
