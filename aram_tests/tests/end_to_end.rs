//! Client sessions against the reference world over delayed in-memory links.

use std::f32::consts::FRAC_PI_2;

use aram_client::{input::InputState, ClientSession, SessionState};
use aram_server::GameServer;
use aram_shared::{
    config::{ClientConfig, ServerConfig},
    math::Vec3,
    net::{decode_from_bytes, BoxSpec, NetMsg, PlayerUpdate, SnapshotMessage},
    physics::MoveKeys,
    render::{Activity, NullPresentation, PresentationEvent},
};
use aram_tests::{scripted_input, Loopback, LoopbackConfig};
use tokio::sync::mpsc;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

fn walk_east() -> InputState {
    InputState::new(MoveKeys::FORWARD, FRAC_PI_2)
}

fn open_world() -> GameServer {
    GameServer::with_boxes(ServerConfig::default(), Vec::new())
}

#[test]
fn wall_stops_client_and_world_at_the_same_spot() -> anyhow::Result<()> {
    init_tracing();
    let server = GameServer::with_boxes(
        ServerConfig::default(),
        vec![BoxSpec {
            position: Vec3::new(10.0, 0.0, 0.0),
            material_index: 0,
        }],
    );
    let mut lb = Loopback::new(server, 6, 3);
    let idx = lb.connect(ClientConfig::default(), Some(Vec3::ZERO));

    lb.run(120, &[walk_east()])?;
    lb.run(60, &[InputState::default()])?;

    let client = lb.client(idx);
    let predicted = client.session.predicted().copied().unwrap();
    let authoritative = lb.server.player_state(&client.id).unwrap();

    // Box min x is 7.5 and the hull reaches 1.0 past the centre.
    assert!((predicted.position.x - 6.5).abs() < 1e-4, "client x = {}", predicted.position.x);
    assert!((authoritative.position.x - 6.5).abs() < 1e-4, "world x = {}", authoritative.position.x);
    assert_eq!(client.session.stats().resyncs, 0);
    Ok(())
}

#[test]
fn scripted_clients_converge_once_idle() -> anyhow::Result<()> {
    init_tracing();
    let cfg = LoopbackConfig::default();
    let mut lb = Loopback::from_config(&cfg);
    let a = lb.connect(cfg.client.clone(), None);
    let b = lb.connect(cfg.client.clone(), None);
    let hz = cfg.client.physics.tick_hz;

    for tick in 0..300 {
        let inputs = [scripted_input(tick, hz, 0.0), scripted_input(tick, hz, 2.0)];
        lb.step(&inputs)?;
    }
    // Long enough for the last jump to land and every input to be acknowledged.
    lb.run(180, &[])?;

    for idx in [a, b] {
        let client = lb.client(idx);
        let stats = client.session.stats();
        assert_eq!(stats.resyncs, 0);
        assert_eq!(stats.rejected, 0);
        assert!(stats.snapshots_applied > 100);

        let predicted = client.session.predicted().copied().unwrap();
        let authoritative = lb.server.player_state(&client.id).unwrap();
        let drift = predicted.position.distance(authoritative.position);
        assert!(drift < 1e-3, "{} drifted by {drift}", client.id);
        assert!(predicted.on_ground);
    }
    Ok(())
}

#[test]
fn remote_player_walks_then_leaves() -> anyhow::Result<()> {
    init_tracing();
    let mut lb = Loopback::new(open_world(), 6, 3);
    let watcher = lb.connect(ClientConfig::default(), Some(Vec3::ZERO));
    let walker = lb.connect(ClientConfig::default(), Some(Vec3::new(0.0, 0.0, 20.0)));
    let walker_id = lb.client(walker).id.clone();

    lb.run(120, &[InputState::default(), walk_east()])?;
    {
        let remote = lb.client(watcher).session.remotes().get(&walker_id).unwrap();
        assert_eq!(remote.activity, Activity::Walking);
    }

    lb.run(120, &[])?;
    {
        let remote = lb.client(watcher).session.remotes().get(&walker_id).unwrap();
        assert_eq!(remote.activity, Activity::Idle);
    }

    lb.disconnect(walker);
    assert!(matches!(
        lb.client(walker).session.state(),
        SessionState::Desynchronized { .. }
    ));
    lb.run(20, &[])?;

    let session = &lb.client(watcher).session;
    assert!(session.remotes().get(&walker_id).is_none());
    let events = &session.presentation().events;
    assert!(events
        .iter()
        .any(|e| matches!(e, PresentationEvent::Spawn(id, _) if *id == walker_id)));
    assert!(events.contains(&PresentationEvent::Activity(
        Some(walker_id.clone()),
        Activity::Idle,
        Activity::Walking
    )));
    assert_eq!(events.last(), Some(&PresentationEvent::Despawn(walker_id)));
    Ok(())
}

#[test]
fn acknowledgement_past_anything_sent_resyncs() -> anyhow::Result<()> {
    let mut server = open_world();
    let join = server.join_at(Vec3::ZERO);
    let id = join.player_id.clone();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (mut session, inbound) = ClientSession::new(ClientConfig::default(), out_tx, NullPresentation);
    inbound.joined(join, 0.0);
    for i in 0..5 {
        session.tick(walk_east(), i as f64 * 16.0);
    }
    assert_eq!(session.prediction().next_sequence(), 6);

    let mut snap = SnapshotMessage::default();
    snap.players.insert(
        id,
        PlayerUpdate {
            position: Vec3::new(3.0, 0.0, 4.0),
            rotation_y: 0.0,
            sequence_number: Some(1000),
            velocity_y: Some(0.0),
            on_ground: Some(true),
        },
    );
    inbound.snapshot(snap, 100.0);
    session.drain_inbox();

    assert!(session.is_active());
    assert_eq!(session.stats().resyncs, 1);
    assert!(session.prediction().buffer().is_empty());
    assert_eq!(session.prediction().next_sequence(), 1001);
    assert_eq!(session.predicted().unwrap().position, Vec3::new(3.0, 0.0, 4.0));

    while out_rx.try_recv().is_ok() {}
    session.tick(InputState::default(), 116.0);
    assert_eq!(out_rx.try_recv()?.sequence_number, 1001);
    Ok(())
}

#[test]
fn join_reply_decoded_from_raw_json() -> anyhow::Result<()> {
    let raw = br#"{
        "event": "join",
        "payload": {
            "player_id": "p1",
            "starting_position": { "x": 0.0, "y": 0.0, "z": 0.0 },
            "players": {
                "p2": { "position": { "x": 4.0, "y": 0.0, "z": -4.0 }, "rotation_y": 0.5 }
            },
            "boxes": [
                { "position": { "x": 10.0, "y": 0.0, "z": 0.0 }, "material_index": 2 }
            ]
        }
    }"#;
    let msg: NetMsg = decode_from_bytes(raw)?;

    let (out_tx, _out_rx) = mpsc::unbounded_channel();
    let (mut session, inbound) = ClientSession::new(ClientConfig::default(), out_tx, NullPresentation);
    assert!(inbound.net(msg, 0.0));
    session.tick(walk_east(), 0.0);

    assert!(session.is_active());
    assert_eq!(session.player_id().map(|p| p.as_str()), Some("p1"));
    assert_eq!(session.prediction().world().len(), 1);
    assert_eq!(session.remotes().len(), 1);
    Ok(())
}

#[tokio::test]
async fn transport_task_feeds_the_session() -> anyhow::Result<()> {
    init_tracing();
    let mut server = open_world();
    let join = server.join_at(Vec3::ZERO);
    let id = join.player_id.clone();

    let (out_tx, mut out_rx) = mpsc::unbounded_channel();
    let (mut session, inbound) = ClientSession::new(ClientConfig::default(), out_tx, NullPresentation);

    let transport = tokio::spawn(async move {
        inbound.net(NetMsg::Join(join), 0.0);
        inbound
    });
    let inbound = transport.await?;

    for tick in 0..10u64 {
        session.tick(walk_east(), tick as f64 * 16.0);
    }
    while let Ok(msg) = out_rx.try_recv() {
        server.handle_input(&id, &msg)?;
    }
    assert_eq!(server.last_processed(&id), Some(10));

    let snap = server.snapshot_for(&id);
    let feeder = tokio::spawn(async move {
        let delivered = inbound.net(NetMsg::UpdatePositions(snap), 200.0);
        (delivered, inbound)
    });
    let (delivered, _inbound) = feeder.await?;
    assert!(delivered);
    session.drain_inbox();

    assert!(session.is_active());
    assert!(session.prediction().buffer().is_empty());
    let predicted = session.predicted().copied().unwrap();
    let authoritative = server.player_state(&id).unwrap();
    assert_eq!(predicted.position, authoritative.position);
    Ok(())
}
