//! Process supervisor: creates, owns and stops every execution unit
//!
//! One controller task per configured channel, the configured number of
//! player tasks inside each, and one router task. Units that exit or panic
//! are logged by [`ProcessSupervisor::reap`] and never restarted; recovery is
//! a fresh start, which reloads the persisted snapshots.

use playout_common::config::TomlConfig;
use playout_common::StateStore;
use serde_json::json;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, error, info, warn};

use crate::channel::{ChannelController, ChannelIo, ChannelSettings};
use crate::plan_source::PlanSource;
use crate::player::{AudioEngine, PlayerLink, PlayerUnit, ReportSender, SimulatedEngine};
use crate::router::{MessageRouter, RouterOutputs};
use crate::server::{ServerState, SERVER_STATE_NAME};
use crate::{Error, Result};

/// How long shutdown waits for each unit before giving up on it
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Builds the audio engine for a (channel, player)
pub type EngineFactory = Arc<dyn Fn(u8, u8) -> Box<dyn AudioEngine> + Send + Sync>;

/// Factory handing every player a [`SimulatedEngine`]
pub fn simulated_engines() -> EngineFactory {
    Arc::new(|_, _| Box::new(SimulatedEngine::new()) as Box<dyn AudioEngine>)
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub server_name: String,
    pub channels: u8,
    pub players_per_channel: u8,
    pub primary_player: u8,
    pub root_folder: PathBuf,
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub router_interval: Duration,
    pub position_persist_interval: Duration,
}

impl SupervisorConfig {
    pub fn from_toml(config: &TomlConfig, root_folder: &Path) -> Self {
        Self {
            server_name: config.server_name.clone(),
            channels: config.channels,
            players_per_channel: config.players_per_channel,
            primary_player: config.primary_player,
            root_folder: root_folder.to_path_buf(),
            state_dir: config.state_dir(root_folder),
            poll_interval: config.poll_interval(),
            router_interval: config.router_interval(),
            position_persist_interval: config.position_persist_interval(),
        }
    }
}

/// Names an execution unit in logs and reap results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitId {
    Controller(u8),
    Player { channel: u8, player: u8 },
    Router,
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitId::Controller(channel) => write!(f, "channel {} controller", channel),
            UnitId::Player { channel, player } => write!(f, "channel {} player {}", channel, player),
            UnitId::Router => write!(f, "message router"),
        }
    }
}

/// Queues and tasks belonging to one channel
struct ChannelSlot {
    commands: mpsc::UnboundedSender<String>,
    reports: ReportSender,
    attach: mpsc::UnboundedSender<PlayerLink>,
    /// Receiving side, held until the controller starts
    pending: Option<ChannelIo>,
    controller: Option<JoinHandle<()>>,
    players: BTreeMap<u8, JoinHandle<()>>,
}

impl ChannelSlot {
    fn new() -> Self {
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let (reports, reports_rx) = mpsc::unbounded_channel();
        let (attach, attach_rx) = mpsc::unbounded_channel();
        Self {
            commands,
            reports,
            attach,
            pending: Some(ChannelIo {
                commands: commands_rx,
                reports: reports_rx,
                attach: attach_rx,
            }),
            controller: None,
            players: BTreeMap::new(),
        }
    }
}

pub struct ProcessSupervisor {
    config: SupervisorConfig,
    engines: EngineFactory,
    plan_source: Arc<dyn PlanSource>,
    channels: BTreeMap<u8, ChannelSlot>,
    router: Option<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    server: StateStore,
}

impl ProcessSupervisor {
    pub fn new(config: SupervisorConfig, engines: EngineFactory, plan_source: Arc<dyn PlanSource>) -> Self {
        let session = ServerState::starting(&config.server_name, config.channels, config.players_per_channel);
        let mut server = StateStore::open(
            &config.state_dir,
            SERVER_STATE_NAME,
            session.to_map(),
            &[],
            Duration::ZERO,
        );
        // Identity of this session replaces whatever the last one left behind
        for (key, value) in session.to_map() {
            server.update(&key, value, None);
        }

        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            engines,
            plan_source,
            channels: BTreeMap::new(),
            router: None,
            shutdown,
            server,
        }
    }

    pub fn config(&self) -> &SupervisorConfig {
        &self.config
    }

    /// Receiver that flips to `true` when shutdown starts
    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    /// Start a player unit for (channel, player)
    ///
    /// Returns `Ok(false)` without doing anything when that unit is already
    /// running. A player started after its controller is attached to it
    /// through the controller's attach queue.
    pub fn init(&mut self, channel: u8, player: u8) -> Result<bool> {
        if channel >= self.config.channels {
            return Err(Error::UnknownChannel(channel));
        }
        let slot = self.channels.entry(channel).or_insert_with(ChannelSlot::new);

        if slot.players.get(&player).is_some_and(|handle| !handle.is_finished()) {
            debug!("Channel {} player {} already running", channel, player);
            return Ok(false);
        }

        let (commands, commands_rx) = mpsc::unbounded_channel();
        slot.attach
            .send(PlayerLink::new(player, commands))
            .map_err(|_| Error::UnitUnavailable(UnitId::Controller(channel).to_string()))?;

        let unit = PlayerUnit::new(
            channel,
            player,
            self.config.root_folder.clone(),
            (self.engines)(channel, player),
            slot.reports.clone(),
        );
        let handle = tokio::spawn(unit.run(commands_rx, self.shutdown.subscribe(), self.config.poll_interval));
        slot.players.insert(player, handle);
        info!("Started channel {} player {}", channel, player);
        Ok(true)
    }

    /// Start every configured channel, its players and the router
    pub fn start(&mut self, outputs: RouterOutputs) -> Result<()> {
        if self.router.is_some() {
            return Err(Error::UnitUnavailable("supervisor already started".into()));
        }
        let mut router = MessageRouter::new(outputs, self.config.router_interval);

        for channel in 0..self.config.channels {
            for player in 0..self.config.players_per_channel {
                self.init(channel, player)?;
            }

            let (outbound, outbound_rx) = mpsc::unbounded_channel();
            router.add_channel(channel, outbound_rx);

            let slot = self
                .channels
                .get_mut(&channel)
                .ok_or(Error::UnknownChannel(channel))?;
            let io = slot
                .pending
                .take()
                .ok_or_else(|| Error::UnitUnavailable(UnitId::Controller(channel).to_string()))?;

            let settings = ChannelSettings {
                channel,
                primary_player: self.config.primary_player,
                state_dir: self.config.state_dir.clone(),
                poll_interval: self.config.poll_interval,
                position_persist_interval: self.config.position_persist_interval,
            };
            let controller = ChannelController::open(settings, outbound, self.plan_source.clone());
            slot.controller = Some(tokio::spawn(controller.run(io, self.shutdown.subscribe())));
        }

        self.router = Some(tokio::spawn(router.run(self.shutdown.subscribe())));
        self.server.update("running", json!(true), None);
        info!(
            "Supervisor started {} channels with {} players each",
            self.config.channels, self.config.players_per_channel
        );
        Ok(())
    }

    /// Queue a wire command for a channel
    pub fn send(&self, channel: u8, wire: &str) -> Result<()> {
        let slot = self.channels.get(&channel).ok_or(Error::UnknownChannel(channel))?;
        slot.commands
            .send(wire.to_string())
            .map_err(|_| Error::UnitUnavailable(UnitId::Controller(channel).to_string()))
    }

    pub fn is_running(&self, unit: UnitId) -> bool {
        let alive = |handle: Option<&JoinHandle<()>>| handle.is_some_and(|h| !h.is_finished());
        match unit {
            UnitId::Controller(channel) => {
                alive(self.channels.get(&channel).and_then(|slot| slot.controller.as_ref()))
            }
            UnitId::Player { channel, player } => {
                alive(self.channels.get(&channel).and_then(|slot| slot.players.get(&player)))
            }
            UnitId::Router => alive(self.router.as_ref()),
        }
    }

    /// Number of channel controllers still running
    pub fn running_channels(&self) -> usize {
        (0..self.config.channels)
            .filter(|channel| self.is_running(UnitId::Controller(*channel)))
            .count()
    }

    /// Collect units that have exited, logging how each ended
    ///
    /// Nothing is restarted.
    pub async fn reap(&mut self) -> Vec<UnitId> {
        let mut finished = Vec::new();
        for (&channel, slot) in self.channels.iter_mut() {
            let done: Vec<u8> = slot
                .players
                .iter()
                .filter(|(_, handle)| handle.is_finished())
                .map(|(player, _)| *player)
                .collect();
            for player in done {
                if let Some(handle) = slot.players.remove(&player) {
                    finished.push((UnitId::Player { channel, player }, handle));
                }
            }
            if slot.controller.as_ref().is_some_and(JoinHandle::is_finished) {
                if let Some(handle) = slot.controller.take() {
                    finished.push((UnitId::Controller(channel), handle));
                }
            }
        }
        if self.router.as_ref().is_some_and(JoinHandle::is_finished) {
            if let Some(handle) = self.router.take() {
                finished.push((UnitId::Router, handle));
            }
        }

        let mut reaped = Vec::with_capacity(finished.len());
        for (unit, handle) in finished {
            match handle.await {
                Ok(()) => info!("{} exited, not restarting", unit),
                Err(e) if e.is_panic() => error!("{} panicked, not restarting", unit),
                Err(e) => warn!("{} ended abnormally: {}", unit, e),
            }
            reaped.push(unit);
        }
        reaped
    }

    /// Signal shutdown and join players, then controllers, then the router
    pub async fn shutdown(&mut self) {
        info!("Supervisor shutting down");
        self.shutdown.send_replace(true);

        for (&channel, slot) in self.channels.iter_mut() {
            for (player, handle) in std::mem::take(&mut slot.players) {
                join(UnitId::Player { channel, player }, handle).await;
            }
        }
        for (&channel, slot) in self.channels.iter_mut() {
            if let Some(handle) = slot.controller.take() {
                join(UnitId::Controller(channel), handle).await;
            }
        }
        if let Some(handle) = self.router.take() {
            join(UnitId::Router, handle).await;
        }

        self.server.update("running", json!(false), None);
        info!("Supervisor stopped");
    }
}

async fn join(unit: UnitId, handle: JoinHandle<()>) {
    let abort = handle.abort_handle();
    match time::timeout(JOIN_TIMEOUT, handle).await {
        Ok(Ok(())) => debug!("{} joined", unit),
        Ok(Err(e)) => warn!("{} ended abnormally: {}", unit, e),
        Err(_) => {
            warn!("{} did not stop within {:?}, aborting", unit, JOIN_TIMEOUT);
            abort.abort();
        }
    }
}

impl fmt::Debug for ProcessSupervisor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcessSupervisor")
            .field("config", &self.config)
            .field("channels", &self.channels.keys().collect::<Vec<_>>())
            .field("router_running", &self.router.is_some())
            .finish()
    }
}
