//! Headless loopback runner.
//!
//! Usage:
//!   cargo run -p aram_tests --bin loopback_runner -- [--config loopback.json]
//!       [--clients 2] [--ticks 600] [--latency-ticks 6]
//!
//! Runs the reference world and a number of scripted clients as separate
//! tokio tasks. Messages travel over mpsc channels with an artificial
//! one-way delay, and snapshots reach each session through its inbound
//! queue exactly as a real transport would deliver them.

use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use aram_client::{client::SessionStats, ClientSession, InboundSender};
use aram_server::GameServer;
use aram_shared::{
    clock::{Clock, SystemClock},
    config::load_json,
    net::{InputMessage, NetMsg, PlayerId},
    physics::KinematicState,
    render::NullPresentation,
};
use aram_tests::{scripted_input, LoopbackConfig};
use tokio::{sync::mpsc, time::MissedTickBehavior};
use tracing::{info, warn};

fn parse_args() -> anyhow::Result<LoopbackConfig> {
    let args: Vec<String> = env::args().collect();
    let mut cfg = LoopbackConfig::default();

    // The config file goes first so flags can override it.
    if let Some(pos) = args.iter().position(|a| a == "--config") {
        let path = args.get(pos + 1).context("--config needs a path")?;
        cfg = load_json(Path::new(path))?;
    }

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--clients" if i + 1 < args.len() => {
                cfg.clients = args[i + 1].parse().unwrap_or(cfg.clients);
                i += 2;
            }
            "--ticks" if i + 1 < args.len() => {
                cfg.run_ticks = args[i + 1].parse().unwrap_or(cfg.run_ticks);
                i += 2;
            }
            "--latency-ticks" if i + 1 < args.len() => {
                cfg.latency_ticks = args[i + 1].parse().unwrap_or(cfg.latency_ticks);
                i += 2;
            }
            _ => i += 1,
        }
    }
    Ok(cfg)
}

/// Hands `msg` to the session after `delay`, stamped with the arrival time.
fn deliver_later(inbound: InboundSender, msg: NetMsg, delay: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(delay).await;
        inbound.net(msg, SystemClock.now_ms());
    });
}

struct ClientReport {
    id: PlayerId,
    stats: SessionStats,
    predicted: Option<KinematicState>,
}

async fn run_client(
    id: PlayerId,
    mut session: ClientSession<NullPresentation>,
    ticks: u64,
    tick_hz: u32,
    phase: f32,
) -> ClientReport {
    let mut interval = tokio::time::interval(Duration::from_secs_f64(1.0 / tick_hz.max(1) as f64));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    for tick in 0..ticks {
        interval.tick().await;
        let now = SystemClock.now_ms();
        session.tick(scripted_input(tick, tick_hz, phase), now);

        if let Some(frame) = session.render_frame(now) {
            if tick % tick_hz as u64 == 0 {
                info!(
                    player_id = %id,
                    tick,
                    x = frame.local.position.x,
                    z = frame.local.position.z,
                    remotes = frame.remotes.len(),
                    buffered = session.prediction().buffer().len(),
                    "Client frame"
                );
            }
        }
    }

    ClientReport {
        id,
        stats: session.stats(),
        predicted: session.predicted().copied(),
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cfg = parse_args()?;
    let tick_hz = cfg.client.physics.tick_hz.max(1);
    let tick = Duration::from_secs_f64(1.0 / tick_hz as f64);
    let latency = tick * cfg.latency_ticks as u32;
    info!(
        clients = cfg.clients,
        ticks = cfg.run_ticks,
        latency_ms = latency.as_millis() as u64,
        "Starting loopback run"
    );

    let mut server = GameServer::new(cfg.server.clone());
    let (to_server, mut from_clients) = mpsc::unbounded_channel::<(PlayerId, InputMessage)>();

    let mut feeds = Vec::new();
    let mut client_tasks = Vec::new();
    for i in 0..cfg.clients {
        let join = server.join();
        let id = join.player_id.clone();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<InputMessage>();
        let (session, inbound) = ClientSession::new(cfg.client.clone(), out_tx, NullPresentation);
        deliver_later(inbound.clone(), NetMsg::Join(join), latency);
        feeds.push((id.clone(), inbound));

        // Uplink: forward each input to the world after the one-way delay.
        let up = to_server.clone();
        let up_id = id.clone();
        tokio::spawn(async move {
            while let Some(msg) = out_rx.recv().await {
                let up = up.clone();
                let up_id = up_id.clone();
                tokio::spawn(async move {
                    tokio::time::sleep(latency).await;
                    let _ = up.send((up_id, msg));
                });
            }
        });

        let phase = i as f32 * 1.3;
        client_tasks.push(tokio::spawn(run_client(id, session, cfg.run_ticks, tick_hz, phase)));
    }
    drop(to_server);

    let snapshot_every = tick * cfg.snapshot_every.max(1) as u32;
    let server_task = tokio::spawn(async move {
        let mut snapshots = tokio::time::interval(snapshot_every);
        loop {
            tokio::select! {
                msg = from_clients.recv() => match msg {
                    Some((id, input)) => {
                        if let Err(e) = server.handle_input(&id, &input) {
                            warn!(error = %e, "Input rejected");
                        }
                    }
                    None => break,
                },
                _ = snapshots.tick() => {
                    for (id, inbound) in &feeds {
                        let snap = server.snapshot_for(id);
                        deliver_later(inbound.clone(), NetMsg::UpdatePositions(snap), latency);
                    }
                }
            }
        }
        server
    });

    let mut reports = Vec::new();
    for task in client_tasks {
        reports.push(task.await.context("client task")?);
    }
    let server = server_task.await.context("server task")?;

    for report in reports {
        let authoritative = server.player_state(&report.id);
        let drift = match (report.predicted, authoritative) {
            (Some(p), Some(a)) => p.position.distance(a.position),
            _ => f32::NAN,
        };
        info!(
            player_id = %report.id,
            ticks = report.stats.ticks,
            snapshots = report.stats.snapshots_applied,
            rejected = report.stats.rejected,
            resyncs = report.stats.resyncs,
            drift,
            "Client finished"
        );
    }

    Ok(())
}
