//! Channel controller: show plan, transport commands and auto-advance
//!
//! One controller per channel owns the show plan, the channel's state store
//! and the links to its player units. Commands arrive as wire text, are
//! decoded once into a [`Request`], applied, and answered with exactly one
//! reply. Transport state is whatever the primary player last reported.
//!
//! The loaded item is tracked as a [`LoadedItem`]: either a handle to a plan
//! entry, resolved against the plan on every access, or a detached copy once
//! its entry has been removed from the plan.

use playout_common::message::{Command, Outbound, Rejected, RepeatMode, Request, Topic};
use playout_common::plan::{ghost_id, EntryKey, Marker, PlanItem, ShowPlan, DETACHED_WEIGHT};
use playout_common::{Error, Result, StateMap, StateStore};
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};
use std::ops::ControlFlow;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

use super::state::{state_name, ChannelState, TransportState, POSITION_KEYS};
use crate::plan_source::PlanSource;
use crate::player::{PlayerCommand, PlayerLink, PlayerReport, PlayerStatus, PlayerVerb, ReportReceiver};

/// How long QUIT waits for player units to acknowledge
pub const QUIT_ACK_TIMEOUT: Duration = Duration::from_secs(2);

/// The controller's reference to its loaded item
#[derive(Debug, Clone, PartialEq)]
pub enum LoadedItem {
    /// Still in the plan
    InPlan(EntryKey),
    /// Removed from the plan while loaded; weight is [`DETACHED_WEIGHT`]
    Detached(PlanItem),
}

/// Per-channel settings fixed at start-up
#[derive(Debug, Clone)]
pub struct ChannelSettings {
    pub channel: u8,
    pub primary_player: u8,
    pub state_dir: PathBuf,
    pub poll_interval: Duration,
    pub position_persist_interval: Duration,
}

/// Queues a running controller reads from
#[derive(Debug)]
pub struct ChannelIo {
    pub commands: mpsc::UnboundedReceiver<String>,
    pub reports: ReportReceiver,
    /// Player units started after the controller
    pub attach: mpsc::UnboundedReceiver<PlayerLink>,
}

pub struct ChannelController {
    channel: u8,
    primary: u8,
    poll_interval: Duration,
    store: StateStore,
    plan: ShowPlan,
    loaded: Option<LoadedItem>,
    auto_advance: bool,
    repeat: RepeatMode,
    play_on_load: bool,
    output: Option<String>,
    primary_status: PlayerStatus,
    /// Restored position, applied when the primary player first attaches
    resume_at: Option<f64>,
    players: BTreeMap<u8, PlayerLink>,
    quit_acks: HashSet<u8>,
    outbound: mpsc::UnboundedSender<Outbound>,
    plan_source: Arc<dyn PlanSource>,
}

impl ChannelController {
    /// Restore the channel from its snapshot (or defaults)
    ///
    /// Transport flags are reset: they are re-derived from the primary
    /// player once it reports. Every committed store change is broadcast as
    /// `ALL:STATUS:<json>` on `outbound`.
    pub fn open(
        settings: ChannelSettings,
        outbound: mpsc::UnboundedSender<Outbound>,
        plan_source: Arc<dyn PlanSource>,
    ) -> Self {
        let channel = settings.channel;
        let defaults = ChannelState::defaults(channel, settings.primary_player);
        let mut store = StateStore::open(
            &settings.state_dir,
            &state_name(channel),
            defaults.to_map(),
            &POSITION_KEYS,
            settings.position_persist_interval,
        );
        let restored = ChannelState::from_map(channel, settings.primary_player, &store.get());

        let status_tx = outbound.clone();
        store.add_callback(Box::new(move |state: &StateMap| {
            let payload = Value::Object(state.clone()).to_string();
            status_tx
                .send(Outbound::broadcast(Topic::Status, Some(payload)))
                .map_err(|_| anyhow::anyhow!("outbound queue closed"))
        }));

        let plan = ShowPlan::from_items(restored.show_plan);
        let loaded = restored.loaded_item.map(|item| rebind(&plan, item));

        let mut controller = Self {
            channel,
            primary: settings.primary_player,
            poll_interval: settings.poll_interval,
            store,
            plan,
            loaded,
            auto_advance: restored.auto_advance,
            repeat: restored.repeat,
            play_on_load: restored.play_on_load,
            output: restored.output,
            primary_status: PlayerStatus::new(settings.primary_player),
            resume_at: Some(restored.pos_true).filter(|pos| *pos > 0.0),
            players: BTreeMap::new(),
            quit_acks: HashSet::new(),
            outbound,
            plan_source,
        };

        let primary = settings.primary_player;
        controller.set("primary_player", json!(primary));
        controller.apply_transport(&PlayerStatus::new(primary));
        controller.persist_plan();
        info!(
            "Channel {} opened: {} plan items, loaded: {}",
            channel,
            controller.plan.len(),
            controller
                .loaded_item()
                .map(|item| item.title.as_str())
                .unwrap_or("nothing")
        );
        controller
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn plan(&self) -> &ShowPlan {
        &self.plan
    }

    pub fn loaded(&self) -> Option<&LoadedItem> {
        self.loaded.as_ref()
    }

    /// The loaded item, resolved against the current plan
    pub fn loaded_item(&self) -> Option<&PlanItem> {
        match &self.loaded {
            Some(LoadedItem::InPlan(key)) => self.plan.entry(*key),
            Some(LoadedItem::Detached(item)) => Some(item),
            None => None,
        }
    }

    pub fn transport(&self) -> TransportState {
        TransportState::of(&self.primary_status)
    }

    pub fn repeat(&self) -> RepeatMode {
        self.repeat
    }

    pub fn auto_advance(&self) -> bool {
        self.auto_advance
    }

    pub fn play_on_load(&self) -> bool {
        self.play_on_load
    }

    /// Copy of the full channel state mapping
    pub fn state(&self) -> StateMap {
        self.store.get()
    }

    /// Start talking to a player unit
    ///
    /// The player is brought in line with the channel's output and, for the
    /// primary, its loop flag and any restored loaded item.
    pub fn attach(&mut self, link: PlayerLink) {
        let id = link.id();
        info!("Channel {}: player {} attached", self.channel, id);

        let mut setup = vec![PlayerCommand::Output(self.output.clone())];
        if id == self.primary {
            setup.push(PlayerCommand::SetLoop(self.repeat == RepeatMode::One));
            let resume_at = self.resume_at.take();
            if let Some(item) = self.loaded_item() {
                setup.push(PlayerCommand::Load(Box::new(item.clone())));
                if let Some(pos) = resume_at {
                    setup.push(PlayerCommand::Seek(pos));
                }
            }
        }
        for command in setup {
            if let Err(e) = link.send(command) {
                warn!("Channel {}: player {} setup failed: {}", self.channel, id, e);
                break;
            }
        }
        self.players.insert(id, link);
    }

    /// Handle one inbound wire message
    ///
    /// Messages from an unknown source are dropped without a reply. Every
    /// other message gets exactly one reply. Breaks after QUIT.
    pub fn handle_line(&mut self, line: &str) -> ControlFlow<()> {
        match Request::decode(line) {
            Ok(request) => self.handle_request(request),
            Err(Rejected { source: None, error, .. }) => {
                warn!("Channel {}: dropping '{}': {}", self.channel, line.trim_end(), error);
                ControlFlow::Continue(())
            }
            Err(Rejected {
                source: Some(source),
                topic,
                error,
            }) => {
                debug!("Channel {}: rejected '{}': {}", self.channel, line.trim_end(), error);
                self.emit(Outbound::fail(source, topic, error));
                ControlFlow::Continue(())
            }
        }
    }

    pub fn handle_request(&mut self, request: Request) -> ControlFlow<()> {
        let Request { source, command } = request;
        let topic = command.topic();
        let quit = command == Command::Quit;
        debug!("Channel {}: {} from {}", self.channel, topic, source);

        let reply = match self.execute(command) {
            Ok(Some(payload)) => Outbound::okay_with(source, topic, payload),
            Ok(None) => Outbound::okay(source, topic),
            Err(e) => {
                debug!("Channel {}: {} failed: {}", self.channel, topic, e);
                Outbound::fail(source, topic, e)
            }
        };
        self.emit(reply);

        if quit {
            ControlFlow::Break(())
        } else {
            ControlFlow::Continue(())
        }
    }

    fn execute(&mut self, command: Command) -> Result<Option<String>> {
        match command {
            Command::Status => return Ok(Some(Value::Object(self.store.get()).to_string())),
            Command::Play => self.play()?,
            Command::Pause => self.send_primary(PlayerCommand::Pause)?,
            Command::Unpause => self.send_primary(PlayerCommand::Unpause)?,
            Command::Stop => self.send_primary(PlayerCommand::Stop)?,
            Command::Seek(pos) => self.send_primary(PlayerCommand::Seek(pos))?,
            Command::AutoAdvance(on) => {
                self.auto_advance = on;
                self.set("auto_advance", json!(on));
            }
            Command::Repeat(mode) => {
                self.send_primary(PlayerCommand::SetLoop(mode == RepeatMode::One))?;
                self.repeat = mode;
                self.set("repeat", json!(mode));
            }
            Command::PlayOnLoad(on) => {
                self.play_on_load = on;
                self.set("play_on_load", json!(on));
            }
            Command::GetPlan(show_id) => self.get_plan(&show_id)?,
            Command::Load(weight) => self.load(weight)?,
            Command::Unload => {
                self.send_primary(PlayerCommand::Unload)?;
                self.loaded = None;
                self.persist_loaded();
            }
            Command::Output(device) => {
                for link in self.players.values() {
                    link.send(PlayerCommand::Output(device.clone()))
                        .map_err(|e| Error::Channel(e.to_string()))?;
                }
                self.set("output", json!(device));
                self.output = device;
            }
            Command::Add(item) => return self.add(*item).map(Some),
            Command::Remove(weight) => self.remove(weight)?,
            Command::Clear => {
                self.detach_all();
                self.persist_plan();
                self.persist_loaded();
            }
            Command::SetMarker { id, marker } => self.set_marker(&id, marker)?,
            Command::ResetPlayed(weight) => self.reset_played(weight)?,
            Command::Quit => {}
        }
        Ok(None)
    }

    fn play(&mut self) -> Result<()> {
        let already_playing = self.primary_status.playing;
        self.send_primary(PlayerCommand::Play)?;
        if already_playing {
            return Ok(());
        }
        let counted = match self.loaded_item_mut() {
            Some(item) => {
                item.play_count += 1;
                true
            }
            None => false,
        };
        if counted {
            self.persist_plan();
            self.persist_loaded();
        }
        Ok(())
    }

    /// Load the plan entry at `weight` into the primary player
    fn load(&mut self, weight: i64) -> Result<()> {
        if self.transport() == TransportState::Playing {
            return Err(Error::TransportRefused("cannot load while playing".into()));
        }
        let key = self
            .plan
            .key_at(weight)
            .ok_or_else(|| Error::NotFound(format!("no item at weight {}", weight)))?;
        let item = self
            .plan
            .entry(key)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("no item at weight {}", weight)))?;

        info!("Channel {}: loading '{}' (weight {})", self.channel, item.title, weight);
        self.send_primary(PlayerCommand::Unload)?;
        self.send_primary(PlayerCommand::Load(Box::new(item)))?;
        // Bound only once the player has both commands
        self.loaded = Some(LoadedItem::InPlan(key));
        self.persist_loaded();

        if self.play_on_load {
            self.play()?;
        }
        Ok(())
    }

    fn add(&mut self, mut item: PlanItem) -> Result<String> {
        if item.needs_id() {
            item.id = ghost_id(self.channel);
        }
        let id = item.id.clone();
        let rebinds = self.loaded_item().is_some_and(|loaded| loaded.id == id);

        let key = self.plan.insert(item);
        if rebinds {
            debug!("Channel {}: loaded item {} re-added, following new entry", self.channel, id);
            self.loaded = Some(LoadedItem::InPlan(key));
        }
        self.persist_plan();
        self.persist_loaded();
        Ok(id)
    }

    fn remove(&mut self, weight: i64) -> Result<()> {
        let (key, mut item) = self
            .plan
            .remove(weight)
            .ok_or_else(|| Error::NotFound(format!("no item at weight {}", weight)))?;

        if self.loaded == Some(LoadedItem::InPlan(key)) {
            debug!("Channel {}: loaded item '{}' removed from plan", self.channel, item.title);
            item.weight = DETACHED_WEIGHT;
            self.loaded = Some(LoadedItem::Detached(item));
        }
        self.persist_plan();
        self.persist_loaded();
        Ok(())
    }

    /// Empty the plan, detaching the loaded item if it was in it
    fn detach_all(&mut self) {
        for (key, mut item) in self.plan.clear() {
            if self.loaded == Some(LoadedItem::InPlan(key)) {
                item.weight = DETACHED_WEIGHT;
                self.loaded = Some(LoadedItem::Detached(item));
            }
        }
    }

    fn get_plan(&mut self, show_id: &str) -> Result<()> {
        let items = self.plan_source.fetch(show_id)?;
        self.detach_all();
        for mut item in items {
            if item.needs_id() {
                item.id = ghost_id(self.channel);
            }
            self.plan.insert(item);
        }
        info!("Channel {}: show plan {} loaded ({} items)", self.channel, show_id, self.plan.len());
        self.persist_plan();
        self.persist_loaded();
        Ok(())
    }

    fn set_marker(&mut self, id: &str, marker: Marker) -> Result<()> {
        let target = if id == "-1" {
            self.loaded_item()
                .map(|item| item.id.clone())
                .ok_or_else(|| Error::NotFound("no item loaded".into()))?
        } else {
            id.to_string()
        };

        let mut matched = 0;
        for item in self.plan.items_with_id_mut(&target) {
            item.set_marker(marker.clone());
            matched += 1;
        }
        if let Some(LoadedItem::Detached(item)) = &mut self.loaded {
            if item.id == target {
                item.set_marker(marker);
                matched += 1;
            }
        }
        if matched == 0 {
            return Err(Error::NotFound(format!("no item with id {}", target)));
        }

        self.persist_plan();
        self.persist_loaded();

        if let Some(item) = self.loaded_item().filter(|item| item.id == target).cloned() {
            if let Err(e) = self.send_primary(PlayerCommand::UpdateItem(Box::new(item))) {
                warn!("Channel {}: marker update not sent to player: {}", self.channel, e);
            }
        }
        Ok(())
    }

    fn reset_played(&mut self, weight: i64) -> Result<()> {
        if weight == -1 {
            for item in self.plan.iter_mut() {
                item.play_count = 0;
            }
            if let Some(LoadedItem::Detached(item)) = &mut self.loaded {
                item.play_count = 0;
            }
        } else {
            self.plan
                .get_mut(weight)
                .ok_or_else(|| Error::NotFound(format!("no item at weight {}", weight)))?
                .play_count = 0;
        }
        self.persist_plan();
        self.persist_loaded();
        Ok(())
    }

    /// Handle one report from a player unit
    pub fn handle_report(&mut self, player: u8, report: PlayerReport) {
        trace!("Channel {}: player {} reported {}", self.channel, player, report.command);
        let primary = player == self.primary;

        match report.command {
            PlayerVerb::Status if primary => {
                if let Some(status) = report.extra {
                    self.apply_primary_status(status);
                }
            }
            PlayerVerb::Ended if primary => {
                if let Some(status) = report.extra {
                    self.apply_primary_status(status);
                }
                self.on_item_ended();
            }
            PlayerVerb::Load if primary && !report.status => {
                warn!(
                    "Channel {}: player failed to load: {}",
                    self.channel,
                    report.message.as_deref().unwrap_or("unknown error")
                );
                self.loaded = None;
                self.persist_loaded();
            }
            PlayerVerb::Quit => {
                debug!("Channel {}: player {} quit", self.channel, player);
                self.quit_acks.insert(player);
            }
            verb if !report.status => warn!(
                "Channel {}: player {} {} failed: {}",
                self.channel,
                player,
                verb,
                report.message.as_deref().unwrap_or("unknown error")
            ),
            _ => {}
        }
    }

    /// Auto-advance on end of the loaded item
    fn on_item_ended(&mut self) {
        self.primary_status.playing = false;
        self.primary_status.paused = false;
        self.set("playing", json!(false));

        let weight = self.loaded_item().map(|item| item.weight);
        let next = match weight {
            Some(w) if self.auto_advance && w >= 0 => {
                if self.plan.get(w + 1).is_some() {
                    Some(w + 1)
                } else if self.repeat == RepeatMode::All && !self.plan.is_empty() {
                    Some(0)
                } else {
                    None
                }
            }
            _ => None,
        };

        match next {
            Some(w) => {
                debug!("Channel {}: advancing to weight {}", self.channel, w);
                if let Err(e) = self.load(w) {
                    warn!("Channel {}: auto-advance to weight {} failed: {}", self.channel, w, e);
                    self.stop_at_end();
                }
            }
            None => self.stop_at_end(),
        }
    }

    fn stop_at_end(&mut self) {
        info!("Channel {}: playback stopped at end of item", self.channel);
        if let Err(e) = self.send_primary(PlayerCommand::Stop) {
            warn!("Channel {}: stop not sent: {}", self.channel, e);
        }
        self.emit(Outbound::broadcast(Topic::Stopped, None));
    }

    fn apply_primary_status(&mut self, status: PlayerStatus) {
        let moved = status.pos != self.primary_status.pos;
        self.apply_transport(&status);
        if moved {
            self.emit(Outbound::broadcast(Topic::Pos, Some(status.pos.to_string())));
        }
        self.primary_status = status;
    }

    fn apply_transport(&mut self, status: &PlayerStatus) {
        self.set("initialised", json!(status.initialised));
        self.set("playing", json!(status.playing));
        self.set("paused", json!(status.paused));
        self.set("loaded", json!(status.loaded));
        self.set("cued", json!(status.cued));
        self.set("length", json!(status.length));
        self.set("pos", json!(status.pos));
        self.set("pos_true", json!(status.pos_true));
        self.set("remaining", json!(status.remaining));
    }

    /// Main loop; returns after QUIT, a closed command queue or shutdown
    pub async fn run(mut self, mut io: ChannelIo, shutdown: watch::Receiver<bool>) {
        info!("Channel {} controller started", self.channel);
        let mut ticker = time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            while let Ok(link) = io.attach.try_recv() {
                self.attach(link);
            }
            while let Ok((player, report)) = io.reports.try_recv() {
                self.handle_report(player, report);
            }

            match io.commands.try_recv() {
                Ok(line) => {
                    if self.handle_line(&line).is_break() {
                        break;
                    }
                }
                Err(mpsc::error::TryRecvError::Empty) => {}
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    info!("Channel {}: command queue closed", self.channel);
                    break;
                }
            }

            if *shutdown.borrow() {
                break;
            }
        }

        self.quit_players(&mut io.reports).await;
        info!("Channel {} controller stopped", self.channel);
    }

    /// Tell every player to quit and wait (bounded) for their acknowledgements
    async fn quit_players(&mut self, reports: &mut ReportReceiver) {
        let expected: HashSet<u8> = self
            .players
            .values()
            .filter(|link| link.send(PlayerCommand::Quit).is_ok())
            .map(PlayerLink::id)
            .collect();

        let deadline = Instant::now() + QUIT_ACK_TIMEOUT;
        while !expected.is_subset(&self.quit_acks) {
            match time::timeout_at(deadline, reports.recv()).await {
                Ok(Some((player, report))) if report.command == PlayerVerb::Quit => {
                    self.quit_acks.insert(player);
                }
                Ok(Some(_)) => {}
                Ok(None) => break,
                Err(_) => {
                    let missing: Vec<_> = expected.difference(&self.quit_acks).collect();
                    warn!("Channel {}: players {:?} did not acknowledge quit", self.channel, missing);
                    break;
                }
            }
        }
        self.set("initialised", json!(false));
    }

    fn loaded_item_mut(&mut self) -> Option<&mut PlanItem> {
        match &mut self.loaded {
            Some(LoadedItem::InPlan(key)) => self.plan.entry_mut(*key),
            Some(LoadedItem::Detached(item)) => Some(item),
            None => None,
        }
    }

    fn send_primary(&self, command: PlayerCommand) -> Result<()> {
        let link = self
            .players
            .get(&self.primary)
            .ok_or_else(|| Error::Channel(format!("primary player {} not attached", self.primary)))?;
        link.send(command)
            .map_err(|e| Error::Channel(e.to_string()))
    }

    fn set(&mut self, key: &str, value: Value) {
        self.store.update(key, value, None);
    }

    fn persist_plan(&mut self) {
        let plan = self.plan.to_value();
        self.set("show_plan", plan);
    }

    fn persist_loaded(&mut self) {
        let loaded = self.loaded_item().map(PlanItem::to_value).unwrap_or(Value::Null);
        self.set("loaded_item", loaded);
    }

    fn emit(&self, message: Outbound) {
        trace!("Channel {} emits {}", self.channel, message);
        if self.outbound.send(message).is_err() {
            debug!("Channel {}: outbound queue closed", self.channel);
        }
    }
}

/// Find the plan entry a restored loaded item belongs to
///
/// A stored weight still holding the same id binds to that entry; anything
/// else is kept detached.
fn rebind(plan: &ShowPlan, mut item: PlanItem) -> LoadedItem {
    if item.weight >= 0 {
        let same = plan.get(item.weight).is_some_and(|entry| entry.id == item.id);
        if let Some(key) = plan.key_at(item.weight).filter(|_| same) {
            return LoadedItem::InPlan(key);
        }
    }
    item.weight = DETACHED_WEIGHT;
    LoadedItem::Detached(item)
}

impl std::fmt::Debug for ChannelController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelController")
            .field("channel", &self.channel)
            .field("plan_items", &self.plan.len())
            .field("loaded", &self.loaded)
            .field("players", &self.players.keys().collect::<Vec<_>>())
            .finish()
    }
}
