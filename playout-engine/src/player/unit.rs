//! Player unit: one execution unit per (channel, player)
//!
//! Each cycle the unit drains its command queue, polls the audio engine and
//! reports its status to the controller whenever it changed. An item that
//! plays to its end is reported as ENDED unless the loop flag is set, in
//! which case it restarts from its cue point.

use playout_common::plan::PlanItem;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tokio::sync::watch;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::audio::AudioEngine;
use super::protocol::{PlayerCommand, PlayerReport, PlayerStatus, PlayerVerb, ReportSender};
use crate::files::content_path;
use crate::{Error, Result};

pub struct PlayerUnit {
    channel: u8,
    id: u8,
    root_folder: PathBuf,
    engine: Box<dyn AudioEngine>,
    status: PlayerStatus,
    last_reported: Option<PlayerStatus>,
    reports: ReportSender,
}

impl PlayerUnit {
    pub fn new(
        channel: u8,
        id: u8,
        root_folder: PathBuf,
        engine: Box<dyn AudioEngine>,
        reports: ReportSender,
    ) -> Self {
        Self {
            channel,
            id,
            root_folder,
            engine,
            status: PlayerStatus::new(id),
            last_reported: None,
            reports,
        }
    }

    pub fn status(&self) -> &PlayerStatus {
        &self.status
    }

    /// Main loop; returns after QUIT, a closed command queue or shutdown
    ///
    /// A QUIT acknowledgement is always the last report sent.
    pub async fn run(
        mut self,
        mut commands: mpsc::UnboundedReceiver<PlayerCommand>,
        shutdown: watch::Receiver<bool>,
        poll_interval: Duration,
    ) {
        info!("Channel {} player {} started", self.channel, self.id);
        self.status.initialised = true;

        let mut ticker = time::interval(poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        'run: loop {
            ticker.tick().await;

            loop {
                match commands.try_recv() {
                    Ok(PlayerCommand::Quit) => {
                        debug!("Channel {} player {}: quit requested", self.channel, self.id);
                        break 'run;
                    }
                    Ok(command) => self.handle(command),
                    Err(TryRecvError::Empty) => break,
                    Err(TryRecvError::Disconnected) => {
                        info!("Channel {} player {}: command queue closed", self.channel, self.id);
                        break 'run;
                    }
                }
            }

            self.tick();

            if *shutdown.borrow() {
                break;
            }
        }

        self.engine.unload();
        self.send(PlayerReport::ack(PlayerVerb::Quit));
        info!("Channel {} player {} stopped", self.channel, self.id);
    }

    /// Apply one command and acknowledge it
    pub fn handle(&mut self, command: PlayerCommand) {
        let verb = command.verb();
        debug!("Channel {} player {}: {}", self.channel, self.id, verb);
        match self.apply(command) {
            Ok(()) => self.send(PlayerReport::ack(verb)),
            Err(e) => {
                warn!("Channel {} player {}: {} failed: {}", self.channel, self.id, verb, e);
                self.send(PlayerReport::failed(verb, e));
            }
        }
    }

    /// Poll the engine once, handle end-of-item and report changes
    pub fn tick(&mut self) {
        if self.status.playing && self.engine.is_finished() {
            if self.status.looping {
                if let Err(e) = self.restart() {
                    warn!("Channel {} player {}: loop restart failed: {}", self.channel, self.id, e);
                }
            } else {
                self.finish();
                return;
            }
        }
        self.refresh();
        self.report_if_changed();
    }

    fn apply(&mut self, command: PlayerCommand) -> Result<()> {
        match command {
            PlayerCommand::Load(item) => self.load(*item),
            PlayerCommand::Unload => {
                self.engine.unload();
                self.clear_item();
                Ok(())
            }
            PlayerCommand::Play => {
                self.engine.play()?;
                self.status.paused = false;
                Ok(())
            }
            PlayerCommand::Pause => {
                self.engine.pause()?;
                self.status.paused = true;
                Ok(())
            }
            PlayerCommand::Unpause => {
                self.engine.unpause()?;
                self.status.paused = false;
                Ok(())
            }
            PlayerCommand::Stop => {
                self.engine.stop()?;
                self.cue()
            }
            PlayerCommand::Seek(pos) => self.engine.seek(pos),
            PlayerCommand::Output(device) => {
                self.engine.set_output(device.as_deref())?;
                self.status.output = device;
                Ok(())
            }
            PlayerCommand::SetLoop(on) => {
                self.status.looping = on;
                Ok(())
            }
            PlayerCommand::UpdateItem(item) => match &mut self.status.loaded_item {
                Some(current) if current.id == item.id => {
                    *current = *item;
                    Ok(())
                }
                _ => Err(Error::Audio(format!("item {} is not loaded", item.id))),
            },
            PlayerCommand::Quit => Ok(()),
        }
    }

    fn load(&mut self, item: PlanItem) -> Result<()> {
        self.engine.unload();
        self.clear_item();

        let path = content_path(&self.root_folder, &item.content);
        let length = self.engine.load(&path, item.length)?;
        debug!(
            "Channel {} player {}: loaded '{}' from {} ({:.1}s)",
            self.channel,
            self.id,
            item.title,
            path.display(),
            length
        );
        self.status.length = length;
        self.status.loaded_item = Some(item);
        self.cue()
    }

    /// Park on the loaded item's cue point
    fn cue(&mut self) -> Result<()> {
        let cue = self.status.loaded_item.as_ref().map(PlanItem::cue).unwrap_or(0.0);
        if cue > 0.0 {
            self.engine.seek(cue)?;
        }
        self.status.cued = true;
        self.status.paused = false;
        Ok(())
    }

    fn restart(&mut self) -> Result<()> {
        trace!("Channel {} player {}: looping", self.channel, self.id);
        let cue = self.status.loaded_item.as_ref().map(PlanItem::cue).unwrap_or(0.0);
        self.engine.seek(cue)?;
        self.engine.play()
    }

    fn finish(&mut self) {
        if let Err(e) = self.engine.stop().and_then(|_| self.cue()) {
            warn!("Channel {} player {}: rewind after end failed: {}", self.channel, self.id, e);
        }
        self.refresh();
        debug!("Channel {} player {}: item ended", self.channel, self.id);
        self.send(PlayerReport::ended(self.status.clone()));
        self.last_reported = Some(self.status.clone());
    }

    fn clear_item(&mut self) {
        self.status.loaded_item = None;
        self.status.length = 0.0;
        self.status.cued = false;
        self.status.paused = false;
    }

    fn refresh(&mut self) {
        let pos_true = self.engine.position();
        self.status.playing = self.engine.is_playing();
        self.status.loaded = self.status.loaded_item.is_some();
        self.status.pos_true = pos_true;
        self.status.pos = (pos_true * 10.0).round() / 10.0;
        self.status.remaining = (self.status.length - pos_true).max(0.0);
        if self.status.playing {
            self.status.cued = false;
        }
    }

    fn report_if_changed(&mut self) {
        if self.last_reported.as_ref() != Some(&self.status) {
            self.send(PlayerReport::status(self.status.clone()));
            self.last_reported = Some(self.status.clone());
        }
    }

    fn send(&self, report: PlayerReport) {
        if self.reports.send((self.id, report)).is_err() {
            trace!("Channel {} player {}: controller gone, report dropped", self.channel, self.id);
        }
    }
}
