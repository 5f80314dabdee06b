//! Control front end.
//!
//! Commands reach the driver through a `tokio::sync::mpsc` channel and are
//! applied between steps. Three sources feed it:
//!
//! - stdin, one command per line (see [`parse_command`]),
//! - Ctrl-C, which ends the run,
//! - JSON [`ControlMessage`]s on [`subjects::CONTROL`] when running on NATS.

use std::path::PathBuf;

use futures::StreamExt;
use nbody_net::{ControlMessage, NatsConnection, NetError, subjects};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// A stdin line that is not a valid command.
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum CommandError {
    #[error("unknown command `{0}`")]
    Unknown(String),

    #[error("`{0}` needs an argument")]
    MissingArgument(&'static str),

    #[error("invalid value `{value}` for `{command}`")]
    InvalidValue {
        command: &'static str,
        value: String,
    },
}

fn number<T: std::str::FromStr>(
    command: &'static str,
    arg: Option<&str>,
) -> Result<T, CommandError> {
    let value = arg.ok_or(CommandError::MissingArgument(command))?;
    value.parse().map_err(|_| CommandError::InvalidValue {
        command,
        value: value.to_string(),
    })
}

/// Parse one stdin line.
///
/// ```text
/// chunks 8      dt 1800      rate 30
/// pause         resume       save out.msgpack
/// load out.msgpack             quit
/// ```
///
/// Blank lines parse to `None`.
///
/// # Errors
///
/// Returns [`CommandError`] for unknown commands and bad arguments.
pub fn parse_command(line: &str) -> Result<Option<ControlMessage>, CommandError> {
    let mut words = line.split_whitespace();
    let Some(command) = words.next() else {
        return Ok(None);
    };
    let arg = words.next();

    let message = match command {
        "chunks" => {
            let chunks: usize = number("chunks", arg)?;
            if chunks == 0 {
                return Err(CommandError::InvalidValue {
                    command: "chunks",
                    value: "0".to_string(),
                });
            }
            ControlMessage::Chunks(chunks)
        }
        "dt" => ControlMessage::DeltaT(number("dt", arg)?),
        "rate" => ControlMessage::StepRate(number("rate", arg)?),
        "pause" => ControlMessage::Paused(true),
        "resume" => ControlMessage::Paused(false),
        "save" => {
            let path = arg.ok_or(CommandError::MissingArgument("save"))?;
            ControlMessage::SavePlanets(PathBuf::from(path))
        }
        "load" => {
            let path = arg.ok_or(CommandError::MissingArgument("load"))?;
            ControlMessage::LoadPlanets(PathBuf::from(path))
        }
        "quit" | "exit" => ControlMessage::End,
        other => return Err(CommandError::Unknown(other.to_string())),
    };
    Ok(Some(message))
}

/// Read commands from stdin until `quit` or end of input.
///
/// End of input only stops reading; it does not end the run, so the
/// coordinator can be started detached from a terminal.
pub fn spawn_stdin(tx: mpsc::Sender<ControlMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        loop {
            let line = match lines.next_line().await {
                Ok(Some(line)) => line,
                Ok(None) => {
                    debug!("stdin closed");
                    return;
                }
                Err(err) => {
                    warn!(%err, "failed to read stdin");
                    return;
                }
            };
            match parse_command(&line) {
                Ok(Some(message)) => {
                    let end = message == ControlMessage::End;
                    if tx.send(message).await.is_err() || end {
                        return;
                    }
                }
                Ok(None) => {}
                Err(err) => warn!(%err, "ignoring command"),
            }
        }
    })
}

/// End the run on Ctrl-C.
pub fn spawn_ctrl_c(tx: mpsc::Sender<ControlMessage>) -> JoinHandle<()> {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                let _ = tx.send(ControlMessage::End).await;
            }
            Err(err) => warn!(%err, "cannot listen for Ctrl-C"),
        }
    })
}

/// Forward JSON control messages published on [`subjects::CONTROL`].
///
/// # Errors
///
/// Returns [`NetError::Subscribe`] if the subscription fails.
pub async fn spawn_nats(
    conn: &NatsConnection,
    tx: mpsc::Sender<ControlMessage>,
) -> Result<JoinHandle<()>, NetError> {
    let mut sub = conn.subscribe(subjects::CONTROL).await?;
    info!(subject = subjects::CONTROL, "listening for control messages");
    Ok(tokio::spawn(async move {
        while let Some(msg) = sub.next().await {
            match serde_json::from_slice::<ControlMessage>(&msg.payload) {
                Ok(message) => {
                    let end = message == ControlMessage::End;
                    if tx.send(message).await.is_err() || end {
                        return;
                    }
                }
                Err(err) => warn!(%err, "ignoring malformed control message"),
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_commands() {
        assert_eq!(
            parse_command("chunks 8").unwrap(),
            Some(ControlMessage::Chunks(8))
        );
        assert_eq!(
            parse_command("  dt 1800.5 ").unwrap(),
            Some(ControlMessage::DeltaT(1800.5))
        );
        assert_eq!(
            parse_command("rate 30").unwrap(),
            Some(ControlMessage::StepRate(30.0))
        );
        assert_eq!(
            parse_command("pause").unwrap(),
            Some(ControlMessage::Paused(true))
        );
        assert_eq!(
            parse_command("resume").unwrap(),
            Some(ControlMessage::Paused(false))
        );
        assert_eq!(
            parse_command("save /tmp/state.msgpack").unwrap(),
            Some(ControlMessage::SavePlanets(PathBuf::from(
                "/tmp/state.msgpack"
            )))
        );
        assert_eq!(
            parse_command("load saved.msgpack").unwrap(),
            Some(ControlMessage::LoadPlanets(PathBuf::from("saved.msgpack")))
        );
        assert_eq!(parse_command("quit").unwrap(), Some(ControlMessage::End));
    }

    #[test]
    fn test_blank_line_is_ignored() {
        assert_eq!(parse_command("   ").unwrap(), None);
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            parse_command("warp 9"),
            Err(CommandError::Unknown("warp".to_string()))
        );
        assert_eq!(
            parse_command("chunks"),
            Err(CommandError::MissingArgument("chunks"))
        );
        assert_eq!(
            parse_command("dt soon"),
            Err(CommandError::InvalidValue {
                command: "dt",
                value: "soon".to_string()
            })
        );
        assert!(parse_command("chunks 0").is_err());
        assert_eq!(
            parse_command("save"),
            Err(CommandError::MissingArgument("save"))
        );
    }
}
