//! Process supervisor tests on a paused clock
//!
//! Full units: players, controllers and the router, with simulated audio.

use playout_common::state_store::read_snapshot;
use playout_engine::plan_source::JsonPlanSource;
use playout_engine::router::{Routed, RouterOutputs, RouterReceivers};
use playout_engine::supervisor::{simulated_engines, SupervisorConfig, UnitId};
use playout_engine::{Error, ProcessSupervisor};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use tokio::time;

fn config(root: &Path, channels: u8) -> SupervisorConfig {
    SupervisorConfig {
        server_name: "Test Studio".into(),
        channels,
        players_per_channel: 1,
        primary_player: 0,
        root_folder: root.to_path_buf(),
        state_dir: root.join("state"),
        poll_interval: Duration::from_millis(20),
        router_interval: Duration::from_millis(20),
        position_persist_interval: Duration::from_secs(5),
    }
}

fn supervisor(root: &Path, channels: u8) -> ProcessSupervisor {
    ProcessSupervisor::new(
        config(root, channels),
        simulated_engines(),
        Arc::new(JsonPlanSource::new(root)),
    )
}

fn started(root: &Path, channels: u8) -> (ProcessSupervisor, RouterReceivers) {
    let mut supervisor = supervisor(root, channels);
    let (outputs, receivers) = RouterOutputs::channel(1024);
    supervisor.start(outputs).unwrap();
    (supervisor, receivers)
}

fn wires(rx: &mut mpsc::Receiver<Routed>, channel: u8) -> Vec<String> {
    let mut out = Vec::new();
    while let Ok(routed) = rx.try_recv() {
        if routed.channel == channel {
            out.push(routed.message.to_wire());
        }
    }
    out
}

#[tokio::test(start_paused = true)]
async fn test_init_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let mut supervisor = supervisor(dir.path(), 2);

    assert!(supervisor.init(0, 0).unwrap());
    assert!(!supervisor.init(0, 0).unwrap());
    assert!(supervisor.init(0, 1).unwrap());
    assert!(supervisor.is_running(UnitId::Player { channel: 0, player: 1 }));
    assert!(matches!(supervisor.init(2, 0), Err(Error::UnknownChannel(2))));

    supervisor.shutdown().await;
    assert!(!supervisor.is_running(UnitId::Player { channel: 0, player: 0 }));
}

#[tokio::test(start_paused = true)]
async fn test_start_runs_every_unit_and_records_server_state() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, _rx) = started(dir.path(), 3);
    time::sleep(Duration::from_millis(100)).await;

    for channel in 0..3 {
        assert!(supervisor.is_running(UnitId::Controller(channel)));
        assert!(supervisor.is_running(UnitId::Player { channel, player: 0 }));
    }
    assert!(supervisor.is_running(UnitId::Router));
    assert_eq!(supervisor.running_channels(), 3);

    let server = read_snapshot(dir.path().join("state"), "server").unwrap();
    assert_eq!(server["running"], true);
    assert_eq!(server["channels"], 3);
    assert_eq!(server["server_name"], "Test Studio");

    supervisor.shutdown().await;
    let server = read_snapshot(dir.path().join("state"), "server").unwrap();
    assert_eq!(server["running"], false);
    assert!(!supervisor.is_running(UnitId::Router));
}

#[tokio::test(start_paused = true)]
async fn test_quit_stops_players_then_controller() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = started(dir.path(), 2);

    supervisor.send(0, "WEBSOCKET:QUIT").unwrap();
    time::sleep(Duration::from_secs(1)).await;

    assert!(!supervisor.is_running(UnitId::Player { channel: 0, player: 0 }));
    assert!(!supervisor.is_running(UnitId::Controller(0)));
    assert!(supervisor.is_running(UnitId::Controller(1)));
    assert!(wires(&mut rx.websocket, 0).contains(&"WEBSOCKET:QUIT:OKAY".to_string()));

    // The controller only records itself uninitialised after its players acknowledged
    let channel = read_snapshot(dir.path().join("state"), "channel0").unwrap();
    assert_eq!(channel["initialised"], false);

    let reaped = supervisor.reap().await;
    assert!(reaped.contains(&UnitId::Controller(0)));
    assert!(reaped.contains(&UnitId::Player { channel: 0, player: 0 }));
    assert_eq!(supervisor.running_channels(), 1);
    assert!(matches!(
        supervisor.send(0, "UI:PLAY"),
        Err(Error::UnitUnavailable(_))
    ));

    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_send_to_unknown_channel_fails() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, _rx) = started(dir.path(), 1);
    assert!(matches!(supervisor.send(4, "UI:PLAY"), Err(Error::UnknownChannel(4))));
    supervisor.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn test_item_plays_through_and_channel_stops() {
    let dir = TempDir::new().unwrap();
    let (mut supervisor, mut rx) = started(dir.path(), 1);

    supervisor
        .send(0, r#"WEBSOCKET:ADD:{"id":"t1","title":"Short","filename":"short.mp3","length":0.5}"#)
        .unwrap();
    supervisor.send(0, "WEBSOCKET:LOAD:0").unwrap();
    supervisor.send(0, "WEBSOCKET:PLAY").unwrap();
    time::sleep(Duration::from_secs(2)).await;

    let seen = wires(&mut rx.websocket, 0);
    for expected in ["WEBSOCKET:ADD:OKAY:t1", "WEBSOCKET:LOAD:OKAY", "WEBSOCKET:PLAY:OKAY", "ALL:STOPPED"] {
        assert!(seen.iter().any(|w| w == expected), "missing {} in {:?}", expected, seen);
    }
    assert!(seen.iter().any(|w| w.starts_with("ALL:POS:")));

    // UI never sees position ticks
    let ui = wires(&mut rx.ui, 0);
    assert!(!ui.is_empty());
    assert!(!ui.iter().any(|w| w.starts_with("ALL:POS:")));

    supervisor.shutdown().await;

    let channel = read_snapshot(dir.path().join("state"), "channel0").unwrap();
    assert_eq!(channel["show_plan"][0]["play_count"], 1);
    assert_eq!(channel["loaded_item"]["id"], "t1");
    assert_eq!(channel["playing"], false);
}

#[tokio::test(start_paused = true)]
async fn test_restart_restores_channel_state() {
    let dir = TempDir::new().unwrap();
    {
        let (mut supervisor, _rx) = started(dir.path(), 1);
        supervisor
            .send(0, r#"UI:ADD:{"id":"a","title":"A","trackid":5,"length":60}"#)
            .unwrap();
        supervisor.send(0, "UI:REPEAT:all").unwrap();
        time::sleep(Duration::from_millis(200)).await;
        supervisor.shutdown().await;
    }

    let (mut supervisor, mut rx) = started(dir.path(), 1);
    supervisor.send(0, "UI:STATUS").unwrap();
    time::sleep(Duration::from_millis(200)).await;

    let status = wires(&mut rx.ui, 0)
        .into_iter()
        .find_map(|w| w.strip_prefix("UI:STATUS:OKAY:").map(str::to_string))
        .unwrap();
    let state: serde_json::Value = serde_json::from_str(&status).unwrap();
    assert_eq!(state["show_plan"][0]["id"], "a");
    assert_eq!(state["repeat"], "all");

    supervisor.shutdown().await;
}
