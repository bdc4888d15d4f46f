//! Convoy operator console
//!
//! Runs the fleet runtime and drives it from line commands on stdin.

mod console;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use convoy_c2_router::{FleetHandle, FleetRuntime};
use convoy_core::{logging, Config};
use convoy_unit_status::{FleetSummary, FormationState, PeerNode};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use console::{ConsoleCommand, Prompt};

const NODE_PROTOCOL_VERSION: u32 = 1;
const NODE_RUNTIME_VERSION: u32 = 1;

#[derive(Debug, Serialize)]
struct NodeVersionHandshake {
    version: &'static str,
    runtime_version: u32,
    protocol_version: u32,
}

/// Convoy formation console
#[derive(Parser)]
#[command(name = "convoy-node", version, about)]
struct Cli {
    /// TOML configuration file. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// Print the version handshake as JSON and exit
    #[arg(long)]
    version_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if cli.version_json {
        let handshake = NodeVersionHandshake {
            version: env!("CARGO_PKG_VERSION"),
            runtime_version: NODE_RUNTIME_VERSION,
            protocol_version: NODE_PROTOCOL_VERSION,
        };
        println!("{}", serde_json::to_string(&handshake)?);
        return Ok(());
    }

    if cli.json_logs {
        logging::init_json();
    } else {
        logging::init();
    }

    let config = match &cli.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => Config::default(),
    };
    config.validate().context("invalid configuration")?;

    let (runtime, handle) = FleetRuntime::new(&config);
    let task = tokio::spawn(runtime.run());
    handle.set_update_handler(Box::new(render)).await?;

    info!(
        self_host = config.node.self_host.as_deref().unwrap_or("-"),
        peers = config.peers.len(),
        "console ready, type 'help' for commands"
    );

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = tokio::select! {
            line = lines.next_line() => match line? {
                Some(line) => line,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        };

        match console::parse(&line) {
            Ok(Some(ConsoleCommand::Quit)) => break,
            Ok(Some(command)) => {
                if let Err(e) = execute(&handle, command).await {
                    warn!(error = %e, "command failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(error = %e, "bad command"),
        }
    }

    handle.shutdown().await?;
    task.await?;
    Ok(())
}

fn render(nodes: &[PeerNode], state: &FormationState) {
    info!(
        mode = ?state.mode,
        title = %state.title(),
        detail = %state.detail(),
        fleet = %FleetSummary::from_nodes(nodes),
        stop = state.emergency_stop,
        "fleet update"
    );
    if let Some(invite) = &state.invite {
        info!(group_id = invite.group_id, name = %invite.name, "invite pending: 'accept invite' or 'reject invite'");
    }
    if let Some(request) = &state.request {
        info!(from = %request.from_id, ip = %request.from_ip, group_id = request.group_id, "join request pending: 'accept request' or 'reject request'");
    }
}

async fn execute(handle: &FleetHandle, command: ConsoleCommand) -> Result<()> {
    match command {
        ConsoleCommand::Add { host, patch } => {
            let node = handle.add_peer(&host, patch).await?;
            info!(host = %node.host, role = %node.config.role, index = node.config.index, "peer added");
        }
        ConsoleCommand::Remove { host } => {
            let node = handle.remove_peer(&host).await?;
            info!(host = %node.host, "peer removed");
        }
        ConsoleCommand::Configure { host, patch } => handle.update_node_config(&host, patch).await?,
        ConsoleCommand::Drive { linear, yaw } => {
            if let Some(outcome) = handle.dispatch(linear, yaw).await? {
                info!(?outcome, "dispatched");
            }
        }
        ConsoleCommand::Mode(mode) => handle.set_mode(mode).await?,
        ConsoleCommand::Stop => handle.emergency_stop().await?,
        ConsoleCommand::Sync => {
            handle.sync_config().await?;
        }
        ConsoleCommand::Group(group_id) => handle.set_group_id(group_id).await?,
        ConsoleCommand::Name(name) => handle.set_group_name(&name).await?,
        ConsoleCommand::Timeout(timeout_ms) => handle.set_timeout_ms(timeout_ms).await?,
        ConsoleCommand::Edit { field, focused } => handle.edit(field, focused).await?,
        ConsoleCommand::Invite(target) => handle.invite_peer(&target).await?,
        ConsoleCommand::Join { target, group_id } => handle.request_join(&target, group_id).await?,
        ConsoleCommand::Answer { prompt, accept } => match prompt {
            Prompt::Invite => handle.respond_to_invite(accept).await?,
            Prompt::Request => handle.respond_to_join_request(accept).await?,
        },
        ConsoleCommand::List => {
            let (nodes, _, summary) = handle.snapshot().await?;
            let now = convoy_core::monotonic_ms();
            for node in &nodes {
                info!(
                    host = %node.host,
                    status = ?node.status,
                    role = %node.config.role,
                    index = node.config.index,
                    enabled = node.config.enabled,
                    stale = node.is_stale(now),
                    failsafe = node.in_failsafe(),
                    "peer"
                );
            }
            info!(fleet = %summary, "{} peers", nodes.len());
        }
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => {}
    }
    Ok(())
}
