//! Source-tag fan-out of channel output
//!
//! The router polls every channel's outbound queue on a fixed interval and
//! forwards each message to the destinations its source tag selects. Every
//! destination is a bounded queue fed with `try_send`, so a slow consumer
//! loses messages instead of stalling the others.

use playout_common::message::{Outbound, Source, Topic};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// An outbound message tagged with the channel that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct Routed {
    pub channel: u8,
    pub message: Outbound,
}

/// Which destinations a message goes to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Destinations {
    pub websocket: bool,
    pub ui: bool,
    pub controller: bool,
    pub file_lifecycle: bool,
}

/// Pick destinations for a message
///
/// Position ticks never go to the UI. Plan and status traffic also goes to
/// the file lifecycle regardless of source.
pub fn route(message: &Outbound) -> Destinations {
    let source = message.source;
    Destinations {
        websocket: matches!(source, Source::All | Source::WebSocket),
        ui: matches!(source, Source::All | Source::Ui) && !message.is_position_tick(),
        controller: matches!(source, Source::All | Source::Controller),
        file_lifecycle: matches!(message.topic, Topic::GetPlan | Topic::Status),
    }
}

/// Sending halves of the destination queues
#[derive(Debug, Clone)]
pub struct RouterOutputs {
    pub websocket: mpsc::Sender<Routed>,
    pub ui: mpsc::Sender<Routed>,
    pub controller: mpsc::Sender<Routed>,
    pub file_lifecycle: mpsc::Sender<Routed>,
}

/// Receiving halves of the destination queues
#[derive(Debug)]
pub struct RouterReceivers {
    pub websocket: mpsc::Receiver<Routed>,
    pub ui: mpsc::Receiver<Routed>,
    pub controller: mpsc::Receiver<Routed>,
    pub file_lifecycle: mpsc::Receiver<Routed>,
}

impl RouterOutputs {
    /// Create the four destination queues, each holding `capacity` messages
    pub fn channel(capacity: usize) -> (RouterOutputs, RouterReceivers) {
        let (websocket, websocket_rx) = mpsc::channel(capacity);
        let (ui, ui_rx) = mpsc::channel(capacity);
        let (controller, controller_rx) = mpsc::channel(capacity);
        let (file_lifecycle, file_lifecycle_rx) = mpsc::channel(capacity);
        (
            RouterOutputs {
                websocket,
                ui,
                controller,
                file_lifecycle,
            },
            RouterReceivers {
                websocket: websocket_rx,
                ui: ui_rx,
                controller: controller_rx,
                file_lifecycle: file_lifecycle_rx,
            },
        )
    }
}

pub struct MessageRouter {
    inputs: Vec<(u8, mpsc::UnboundedReceiver<Outbound>)>,
    outputs: RouterOutputs,
    interval: Duration,
}

impl MessageRouter {
    pub fn new(outputs: RouterOutputs, interval: Duration) -> Self {
        Self {
            inputs: Vec::new(),
            outputs,
            interval,
        }
    }

    /// Start polling a channel's outbound queue
    pub fn add_channel(&mut self, channel: u8, outbound: mpsc::UnboundedReceiver<Outbound>) {
        self.inputs.push((channel, outbound));
    }

    /// Forward one message; returns how many destinations accepted it
    pub fn dispatch(&self, channel: u8, message: Outbound) -> usize {
        let targets = route(&message);
        let routed = Routed { channel, message };
        trace!("Routing channel {} message {}", channel, routed.message);

        [
            (targets.websocket, &self.outputs.websocket, "websocket"),
            (targets.ui, &self.outputs.ui, "ui"),
            (targets.controller, &self.outputs.controller, "controller"),
            (targets.file_lifecycle, &self.outputs.file_lifecycle, "file lifecycle"),
        ]
        .into_iter()
        .filter(|(selected, _, _)| *selected)
        .filter(|(_, queue, name)| deliver(queue, &routed, name))
        .count()
    }

    /// One poll cycle: drain everything currently queued by every channel
    ///
    /// Returns the number of messages taken. Channels whose queue has closed
    /// are dropped from the poll set.
    pub fn drain(&mut self) -> usize {
        let mut taken = Vec::new();
        self.inputs.retain_mut(|(channel, queue)| loop {
            match queue.try_recv() {
                Ok(message) => taken.push((*channel, message)),
                Err(mpsc::error::TryRecvError::Empty) => break true,
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    debug!("Channel {} outbound queue closed", channel);
                    break false;
                }
            }
        });

        let count = taken.len();
        for (channel, message) in taken {
            self.dispatch(channel, message);
        }
        count
    }

    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        info!(
            "Message router started for {} channels ({}ms interval)",
            self.inputs.len(),
            self.interval.as_millis()
        );
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            self.drain();
            if *shutdown.borrow() {
                // Final pass so QUIT replies and last status reach consumers
                self.drain();
                break;
            }
        }
        info!("Message router stopped");
    }
}

fn deliver(queue: &mpsc::Sender<Routed>, routed: &Routed, name: &str) -> bool {
    match queue.try_send(routed.clone()) {
        Ok(()) => true,
        Err(mpsc::error::TrySendError::Full(_)) => {
            warn!("{} queue full, dropping {}", name, routed.message.topic);
            false
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("{} queue closed, dropping {}", name, routed.message.topic);
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reply(source: Source, topic: Topic) -> Outbound {
        Outbound::okay(source, topic)
    }

    #[test]
    fn test_route_by_source() {
        let all = route(&reply(Source::All, Topic::Play));
        assert!(all.websocket && all.ui && all.controller && !all.file_lifecycle);

        let ws = route(&reply(Source::WebSocket, Topic::Play));
        assert_eq!(
            ws,
            Destinations {
                websocket: true,
                ..Destinations::default()
            }
        );

        let ui = route(&reply(Source::Ui, Topic::Load));
        assert!(ui.ui && !ui.websocket && !ui.controller);

        let controller = route(&reply(Source::Controller, Topic::Stop));
        assert!(controller.controller && !controller.ui);

        let test = route(&reply(Source::Test, Topic::Stop));
        assert_eq!(test, Destinations::default());
    }

    #[test]
    fn test_position_ticks_skip_ui() {
        let tick = Outbound::broadcast(Topic::Pos, Some("12.5".into()));
        let targets = route(&tick);
        assert!(targets.websocket && targets.controller);
        assert!(!targets.ui);
    }

    #[test]
    fn test_plan_and_status_reach_file_lifecycle() {
        assert!(route(&reply(Source::Test, Topic::GetPlan)).file_lifecycle);
        assert!(route(&Outbound::broadcast(Topic::Status, None)).file_lifecycle);
        assert!(!route(&Outbound::broadcast(Topic::Stopped, None)).file_lifecycle);
    }
}
