//! Hardware controller drivers
//!
//! A controller turns physical (or console) input into channel commands and
//! receives the router's controller feedback in return.

use playout_common::message::Source;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::router::Routed;

/// Input queue depth for a controller
const INPUT_CAPACITY: usize = 64;

/// A command produced by a controller, addressed to one channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerInput {
    pub channel: u8,
    /// Wire text, always carrying a source tag
    pub message: String,
}

pub trait HardwareController: Send {
    fn name(&self) -> &str;

    /// Spawn the controller's task and return its input stream
    fn start(
        self: Box<Self>,
        feedback: mpsc::Receiver<Routed>,
        shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<ControllerInput>;
}

/// No hardware attached; feedback is drained and discarded
#[derive(Debug, Default)]
pub struct NullController;

impl HardwareController for NullController {
    fn name(&self) -> &str {
        "none"
    }

    fn start(
        self: Box<Self>,
        mut feedback: mpsc::Receiver<Routed>,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<ControllerInput> {
        let (_inputs, rx) = mpsc::channel(1);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    msg = feedback.recv() => match msg {
                        Some(_) => {}
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
        rx
    }
}

/// Reads `<channel> <message>` lines from stdin
///
/// A message without a recognised source tag is sent as `CONTROLLER`.
/// Feedback is logged at debug level.
#[derive(Debug, Default)]
pub struct ConsoleController;

impl HardwareController for ConsoleController {
    fn name(&self) -> &str {
        "console"
    }

    fn start(
        self: Box<Self>,
        mut feedback: mpsc::Receiver<Routed>,
        mut shutdown: watch::Receiver<bool>,
    ) -> mpsc::Receiver<ControllerInput> {
        let (inputs, rx) = mpsc::channel(INPUT_CAPACITY);
        tokio::spawn(async move {
            info!("Console controller reading stdin");
            let mut lines = BufReader::new(tokio::io::stdin()).lines();
            let mut stdin_open = true;
            loop {
                tokio::select! {
                    line = lines.next_line(), if stdin_open => match line {
                        Ok(Some(line)) => {
                            if line.trim().is_empty() {
                                continue;
                            }
                            match parse_console_line(&line) {
                                Some(input) => {
                                    if inputs.send(input).await.is_err() {
                                        break;
                                    }
                                }
                                None => warn!("Console: expected '<channel> <message>', got '{}'", line),
                            }
                        }
                        Ok(None) => {
                            debug!("Console: stdin closed");
                            stdin_open = false;
                        }
                        Err(e) => {
                            warn!("Console: stdin read failed: {}", e);
                            stdin_open = false;
                        }
                    },
                    msg = feedback.recv() => match msg {
                        Some(routed) => debug!("Console feedback ch{}: {}", routed.channel, routed.message),
                        None => break,
                    },
                    _ = shutdown.changed() => break,
                }
            }
        });
        rx
    }
}

/// Parse `<channel> <message>`
pub fn parse_console_line(line: &str) -> Option<ControllerInput> {
    let (channel, message) = line.trim().split_once(char::is_whitespace)?;
    let channel = channel.parse::<u8>().ok()?;
    let message = message.trim();
    if message.is_empty() {
        return None;
    }

    let tagged = message
        .split_once(':')
        .is_some_and(|(tag, _)| tag.parse::<Source>().is_ok())
        || message.parse::<Source>().is_ok();
    let message = if tagged {
        message.to_string()
    } else {
        format!("{}:{}", Source::Controller, message)
    };
    Some(ControllerInput { channel, message })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_untagged_message_becomes_controller() {
        let input = parse_console_line("1 PLAY").unwrap();
        assert_eq!(input.channel, 1);
        assert_eq!(input.message, "CONTROLLER:PLAY");

        let input = parse_console_line("0   LOAD:2 ").unwrap();
        assert_eq!(input.message, "CONTROLLER:LOAD:2");
    }

    #[test]
    fn test_tagged_message_kept() {
        let input = parse_console_line("2 UI:SEEK:10").unwrap();
        assert_eq!(input.channel, 2);
        assert_eq!(input.message, "UI:SEEK:10");
    }

    #[test]
    fn test_bad_lines() {
        assert!(parse_console_line("PLAY").is_none());
        assert!(parse_console_line("x PLAY").is_none());
        assert!(parse_console_line("300 PLAY").is_none());
        assert!(parse_console_line("1 ").is_none());
    }

    #[tokio::test]
    async fn test_null_controller_produces_no_input() {
        let (feedback_tx, feedback_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut inputs = Box::new(NullController).start(feedback_rx, shutdown_rx);

        feedback_tx.send(Routed {
            channel: 0,
            message: playout_common::message::Outbound::broadcast(
                playout_common::message::Topic::Stopped,
                None,
            ),
        })
        .await
        .unwrap();
        assert!(inputs.recv().await.is_none());
    }
}
