//! Operator console.
//!
//! Reads one command per line and feeds it to the [`UserManager`] the way the
//! host server's connect, disconnect and moderation events would:
//!
//! ```text
//! join <uuid> <name> <ip>
//! quit <uuid>
//! flag <uuid> <god|afk|mark> <on|off>
//! whois <name|uuid>
//! list
//! stats
//! stop
//! ```

use std::str::FromStr;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tools_core::{Flag, SessionInfo, UserHandle, UserId, UserManager};
use tracing::{info, warn};

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    Join { id: UserId, session: SessionInfo },
    Quit { id: UserId },
    SetFlag { id: UserId, flag: Flag, value: bool },
    Whois { query: String },
    List,
    Stats,
    Help,
    Stop,
}

const USAGE: &str = "commands: join <uuid> <name> <ip> | quit <uuid> | flag <uuid> <god|afk|mark> <on|off> | whois <name|uuid> | list | stats | stop";

impl FromStr for ConsoleCommand {
    type Err = String;

    fn from_str(line: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        let Some((&verb, args)) = parts.split_first() else {
            return Err("empty command".to_string());
        };

        match (verb.to_ascii_lowercase().as_str(), args) {
            ("join", [id, name, ip]) => Ok(ConsoleCommand::Join {
                id: parse_id(id)?,
                session: SessionInfo::new(*name, *ip),
            }),
            ("quit", [id]) => Ok(ConsoleCommand::Quit { id: parse_id(id)? }),
            ("flag", [id, flag, value]) => Ok(ConsoleCommand::SetFlag {
                id: parse_id(id)?,
                flag: flag.parse().map_err(|e| format!("{e}"))?,
                value: parse_switch(value)?,
            }),
            ("whois", [query]) => Ok(ConsoleCommand::Whois {
                query: query.to_string(),
            }),
            ("list", []) => Ok(ConsoleCommand::List),
            ("stats", []) => Ok(ConsoleCommand::Stats),
            ("help", []) => Ok(ConsoleCommand::Help),
            ("stop", []) => Ok(ConsoleCommand::Stop),
            ("join" | "quit" | "flag" | "whois" | "list" | "stats" | "help" | "stop", _) => {
                Err(format!("wrong arguments for '{verb}'; {USAGE}"))
            }
            _ => Err(format!("unknown command '{verb}'; {USAGE}")),
        }
    }
}

fn parse_id(text: &str) -> Result<UserId, String> {
    UserId::parse(text).map_err(|e| format!("{e}"))
}

fn parse_switch(text: &str) -> Result<bool, String> {
    match text.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => Err(format!("expected on or off, got '{other}'")),
    }
}

fn describe(handle: &UserHandle) -> String {
    let record = handle.snapshot();
    let flags: Vec<&str> = Flag::ALL
        .into_iter()
        .filter(|flag| record.flags.get(*flag))
        .map(|flag| flag.as_str())
        .collect();
    format!(
        "{} [{}] ip={} {} flags=[{}]",
        if record.name.is_empty() { "<unnamed>" } else { record.name.as_str() },
        record.id,
        if record.ip.is_empty() { "-" } else { record.ip.as_str() },
        if record.online { "online" } else { "offline" },
        flags.join(",")
    )
}

/// Runs one command and returns the reply for the operator.
pub async fn execute(manager: &UserManager, command: ConsoleCommand) -> String {
    match command {
        ConsoleCommand::Join { id, session } => describe(&manager.attach_session(id, &session)),
        ConsoleCommand::Quit { id } => {
            if manager.detach_session(id) {
                format!("{id} disconnected")
            } else {
                format!("{id} is not known")
            }
        }
        ConsoleCommand::SetFlag { id, flag, value } => {
            describe(&manager.set_flag(id, flag, value))
        }
        ConsoleCommand::Whois { query } => {
            if let Ok(id) = UserId::parse(&query) {
                return match manager.lookup(id) {
                    Some(handle) => describe(&handle),
                    None => format!("no player with id {id}"),
                };
            }
            match manager.get_by_name(&query).await {
                Ok(Some(handle)) => describe(&handle),
                Ok(None) => format!("no player named {query}"),
                Err(e) => format!("lookup failed: {e}"),
            }
        }
        ConsoleCommand::List => {
            let online = manager.online_users();
            let names: Vec<&str> = online.iter().map(|record| record.name.as_str()).collect();
            format!(
                "{} online of {} known: {}",
                online.len(),
                manager.len(),
                names.join(", ")
            )
        }
        ConsoleCommand::Stats => {
            let stats = manager.stats();
            format!(
                "enqueued={} completed={} skipped={} retried={} failed={} rejected={} pending={}",
                stats.enqueued,
                stats.completed,
                stats.skipped,
                stats.retried,
                stats.failed,
                stats.rejected,
                stats.pending
            )
        }
        ConsoleCommand::Help => USAGE.to_string(),
        ConsoleCommand::Stop => "stopping".to_string(),
    }
}

/// Why [`serve`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsoleExit {
    /// The operator typed `stop`
    Stop,
    /// Input closed
    EndOfInput,
}

/// Serves commands from `input` until `stop` or end of input.
pub async fn serve<R>(manager: &UserManager, input: R) -> ConsoleExit
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return ConsoleExit::EndOfInput,
            Err(e) => {
                warn!("⚠️ Console input failed: {}", e);
                return ConsoleExit::EndOfInput;
            }
        };
        if line.trim().is_empty() {
            continue;
        }

        match line.parse::<ConsoleCommand>() {
            Ok(ConsoleCommand::Stop) => {
                info!("🛑 Stop requested from console");
                return ConsoleExit::Stop;
            }
            Ok(command) => info!("💬 {}", execute(manager, command).await),
            Err(e) => warn!("❓ {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tools_core::{MemoryStore, WriterConfig};

    const STEVE: &str = "02cea57b-a0fb-4391-985e-89e76d642240";

    async fn manager() -> Arc<UserManager> {
        UserManager::start(Arc::new(MemoryStore::new()), &WriterConfig::default())
            .await
            .unwrap()
    }

    #[test]
    fn test_parse_join() {
        let command: ConsoleCommand = format!("join {STEVE} Steve 10.0.0.1").parse().unwrap();
        assert_eq!(
            command,
            ConsoleCommand::Join {
                id: UserId::parse(STEVE).unwrap(),
                session: SessionInfo::new("Steve", "10.0.0.1"),
            }
        );
    }

    #[test]
    fn test_parse_flag() {
        let command: ConsoleCommand = format!("FLAG {STEVE} God on").parse().unwrap();
        assert_eq!(
            command,
            ConsoleCommand::SetFlag {
                id: UserId::parse(STEVE).unwrap(),
                flag: Flag::God,
                value: true,
            }
        );
    }

    #[test]
    fn test_parse_errors() {
        assert!("".parse::<ConsoleCommand>().is_err());
        assert!("dance".parse::<ConsoleCommand>().is_err());
        assert!("quit".parse::<ConsoleCommand>().is_err());
        assert!("quit not-a-uuid".parse::<ConsoleCommand>().is_err());
        assert!(format!("flag {STEVE} fly on").parse::<ConsoleCommand>().is_err());
        assert!(format!("flag {STEVE} god maybe").parse::<ConsoleCommand>().is_err());
        assert_eq!("stop".parse::<ConsoleCommand>(), Ok(ConsoleCommand::Stop));
    }

    #[tokio::test]
    async fn test_execute_session_and_whois() {
        let manager = manager().await;
        let id = UserId::parse(STEVE).unwrap();

        let reply = execute(
            &manager,
            ConsoleCommand::Join {
                id,
                session: SessionInfo::new("Steve", "10.0.0.1"),
            },
        )
        .await;
        assert!(reply.contains("online"));

        execute(&manager, ConsoleCommand::SetFlag { id, flag: Flag::Mark, value: true }).await;
        let reply = execute(&manager, ConsoleCommand::Whois { query: "steve".to_string() }).await;
        assert!(reply.contains("flags=[mark]"));

        let reply = execute(&manager, ConsoleCommand::Quit { id }).await;
        assert!(reply.contains("disconnected"));
        assert!(!manager.is_online(id));

        let reply = execute(&manager, ConsoleCommand::Whois { query: "Nobody".to_string() }).await;
        assert_eq!(reply, "no player named Nobody");
    }

    #[tokio::test]
    async fn test_serve_until_stop() {
        let manager = manager().await;
        let script = format!("\njoin {STEVE} Steve 10.0.0.1\nbogus\nlist\nstop\njoin {STEVE} Late 1.1.1.1\n");

        let exit = serve(&manager, script.as_bytes()).await;
        assert_eq!(exit, ConsoleExit::Stop);
        // lines after stop are never read
        assert_eq!(manager.get(UserId::parse(STEVE).unwrap()).name(), "Steve");
    }

    #[tokio::test]
    async fn test_serve_reports_end_of_input() {
        let manager = manager().await;
        let exit = serve(&manager, "list\n".as_bytes()).await;
        assert_eq!(exit, ConsoleExit::EndOfInput);
    }
}
