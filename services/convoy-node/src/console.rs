//! Operator console line commands

use anyhow::{anyhow, bail, Result};
use convoy_core::NodeRole;
use convoy_unit_status::{FormationField, FormationMode, NodeConfigPatch};

/// Which prompt an accept/reject answers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Prompt {
    Invite,
    Request,
}

/// One parsed console line
#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Add { host: String, patch: NodeConfigPatch },
    Remove { host: String },
    Configure { host: String, patch: NodeConfigPatch },
    Drive { linear: f32, yaw: f32 },
    Mode(FormationMode),
    Stop,
    Sync,
    Group(u32),
    Name(String),
    Timeout(u32),
    Edit { field: FormationField, focused: bool },
    Invite(String),
    Join { target: String, group_id: u32 },
    Answer { prompt: Prompt, accept: bool },
    List,
    Help,
    Quit,
}

pub const HELP: &str = "\
add <host> [leader|follower] [index]   register a peer
remove <host>                          unregister a peer
enable <host> on|off                   include or exclude a peer
role <host> leader|follower            set a peer's role
index <host> <n>                       set a peer's member index
drive <v> <w>                          send a control vector
mode solo|formation                    switch driving mode
stop                                   brake everything
sync                                   push group configuration
group <id> | name <text> | timeout <ms>
edit group|name|timeout on|off         hold a field while typing it
invite <mac|host>                      invite a vehicle
join <mac|host> <group>                ask a leader to admit us
accept|reject invite|request           answer a prompt
list                                   print every peer
quit";

fn arg<'a>(parts: &[&'a str], i: usize, what: &str) -> Result<&'a str> {
    parts.get(i).copied().ok_or_else(|| anyhow!("missing {}", what))
}

fn role(raw: &str) -> Result<NodeRole> {
    NodeRole::parse(raw).ok_or_else(|| anyhow!("unknown role '{}'", raw))
}

// Unparseable indices fall back to 0
fn index(raw: &str) -> u32 {
    raw.parse().unwrap_or(0)
}

fn number<T: std::str::FromStr>(raw: &str, what: &str) -> Result<T> {
    raw.parse().map_err(|_| anyhow!("invalid {} '{}'", what, raw))
}

fn field(raw: &str) -> Result<FormationField> {
    match raw {
        "group" => Ok(FormationField::GroupId),
        "name" => Ok(FormationField::GroupName),
        "timeout" => Ok(FormationField::Timeout),
        other => bail!("unknown field '{}'", other),
    }
}

fn on_off(raw: &str) -> Result<bool> {
    match raw {
        "on" => Ok(true),
        "off" => Ok(false),
        other => bail!("expected on|off, got '{}'", other),
    }
}

fn prompt(raw: &str) -> Result<Prompt> {
    match raw {
        "invite" => Ok(Prompt::Invite),
        "request" => Ok(Prompt::Request),
        other => bail!("nothing to answer called '{}'", other),
    }
}

/// Parse one line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<ConsoleCommand>> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some(&verb) = parts.first() else {
        return Ok(None);
    };

    let command = match verb {
        "add" => {
            let host = arg(&parts, 1, "host")?.to_string();
            let mut patch = NodeConfigPatch::default();
            for extra in &parts[2..] {
                match NodeRole::parse(extra) {
                    Some(r) => patch.role = Some(r),
                    None => patch.index = Some(index(extra)),
                }
            }
            ConsoleCommand::Add { host, patch }
        }
        "remove" => ConsoleCommand::Remove {
            host: arg(&parts, 1, "host")?.to_string(),
        },
        "enable" => {
            let host = arg(&parts, 1, "host")?.to_string();
            let enabled = on_off(arg(&parts, 2, "on|off")?)?;
            ConsoleCommand::Configure {
                host,
                patch: NodeConfigPatch::enabled(enabled),
            }
        }
        "role" => ConsoleCommand::Configure {
            host: arg(&parts, 1, "host")?.to_string(),
            patch: NodeConfigPatch {
                role: Some(role(arg(&parts, 2, "role")?)?),
                ..Default::default()
            },
        },
        "index" => ConsoleCommand::Configure {
            host: arg(&parts, 1, "host")?.to_string(),
            patch: NodeConfigPatch {
                index: Some(index(arg(&parts, 2, "index")?)),
                ..Default::default()
            },
        },
        "drive" => ConsoleCommand::Drive {
            linear: number(arg(&parts, 1, "v")?, "v")?,
            yaw: number(arg(&parts, 2, "w")?, "w")?,
        },
        "mode" => match arg(&parts, 1, "mode")? {
            "solo" => ConsoleCommand::Mode(FormationMode::Solo),
            "formation" => ConsoleCommand::Mode(FormationMode::Formation),
            other => bail!("unknown mode '{}'", other),
        },
        "stop" => ConsoleCommand::Stop,
        "sync" => ConsoleCommand::Sync,
        "group" => ConsoleCommand::Group(number(arg(&parts, 1, "group id")?, "group id")?),
        "name" => {
            let name = line.trim_start().strip_prefix("name").unwrap_or_default();
            ConsoleCommand::Name(name.trim().to_string())
        }
        "timeout" => ConsoleCommand::Timeout(number(arg(&parts, 1, "timeout")?, "timeout")?),
        "edit" => ConsoleCommand::Edit {
            field: field(arg(&parts, 1, "field")?)?,
            focused: on_off(arg(&parts, 2, "on|off")?)?,
        },
        "invite" => ConsoleCommand::Invite(arg(&parts, 1, "target")?.to_string()),
        "join" => ConsoleCommand::Join {
            target: arg(&parts, 1, "target")?.to_string(),
            group_id: number(arg(&parts, 2, "group id")?, "group id")?,
        },
        "accept" | "reject" => ConsoleCommand::Answer {
            prompt: prompt(arg(&parts, 1, "invite|request")?)?,
            accept: verb == "accept",
        },
        "list" => ConsoleCommand::List,
        "help" | "?" => ConsoleCommand::Help,
        "quit" | "exit" => ConsoleCommand::Quit,
        other => bail!("unknown command '{}', try 'help'", other),
    };
    Ok(Some(command))
}
