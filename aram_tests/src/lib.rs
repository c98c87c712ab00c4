//! Loopback harness.
//!
//! Connects client sessions to the reference world through in-memory links
//! with a fixed latency measured in ticks. Everything runs on the calling
//! thread, one tick per [`Loopback::step`], so scenarios are reproducible.

use std::collections::VecDeque;
use std::f32::consts::TAU;

use anyhow::Context;
use aram_client::{input::InputState, ClientSession, InboundSender};
use aram_server::GameServer;
use aram_shared::{
    config::{ClientConfig, ServerConfig},
    math::Vec3,
    net::{InputMessage, NetMsg, PlayerId},
    physics::MoveKeys,
    render::RecordingPresentation,
};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Settings for loopback runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopbackConfig {
    #[serde(default)]
    pub client: ClientConfig,
    #[serde(default)]
    pub server: ServerConfig,
    /// One-way delay, in ticks, for both directions.
    #[serde(default = "default_latency_ticks")]
    pub latency_ticks: u64,
    /// The world sends a snapshot every this many ticks.
    #[serde(default = "default_snapshot_every")]
    pub snapshot_every: u64,
    /// Number of clients the runner connects.
    #[serde(default = "default_clients")]
    pub clients: usize,
    /// Length of a runner session in ticks.
    #[serde(default = "default_run_ticks")]
    pub run_ticks: u64,
}

fn default_latency_ticks() -> u64 {
    6
}

fn default_snapshot_every() -> u64 {
    3
}

fn default_clients() -> usize {
    2
}

fn default_run_ticks() -> u64 {
    600
}

impl Default for LoopbackConfig {
    fn default() -> Self {
        Self {
            client: ClientConfig::default(),
            server: ServerConfig::default(),
            latency_ticks: default_latency_ticks(),
            snapshot_every: default_snapshot_every(),
            clients: default_clients(),
            run_ticks: default_run_ticks(),
        }
    }
}

impl LoopbackConfig {
    pub fn from_json_str(s: &str) -> anyhow::Result<Self> {
        serde_json::from_str(s).context("parse loopback config")
    }
}

/// A one-way link that holds messages for a fixed number of ticks.
#[derive(Debug)]
pub struct DelayLink<T> {
    latency_ticks: u64,
    queue: VecDeque<(u64, T)>,
}

impl<T> DelayLink<T> {
    pub fn new(latency_ticks: u64) -> Self {
        Self {
            latency_ticks,
            queue: VecDeque::new(),
        }
    }

    pub fn send(&mut self, now_tick: u64, msg: T) {
        self.queue.push_back((now_tick + self.latency_ticks, msg));
    }

    /// Removes every message due at or before `now_tick`, in send order.
    pub fn deliver(&mut self, now_tick: u64) -> Vec<T> {
        let mut out = Vec::new();
        while self.queue.front().is_some_and(|(due, _)| *due <= now_tick) {
            if let Some((_, msg)) = self.queue.pop_front() {
                out.push(msg);
            }
        }
        out
    }

    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }
}

/// One connected client and its two links.
pub struct LoopbackClient {
    pub session: ClientSession<RecordingPresentation>,
    pub id: PlayerId,
    inbound: InboundSender,
    outbound: mpsc::UnboundedReceiver<InputMessage>,
    up: DelayLink<InputMessage>,
    down: DelayLink<NetMsg>,
    connected: bool,
}

/// Reference world plus clients, stepped one tick at a time.
pub struct Loopback {
    pub server: GameServer,
    clients: Vec<LoopbackClient>,
    latency_ticks: u64,
    snapshot_every: u64,
    tick: u64,
    tick_ms: f64,
}

impl Loopback {
    pub fn new(server: GameServer, latency_ticks: u64, snapshot_every: u64) -> Self {
        let tick_ms = 1000.0 / server.config().physics.tick_hz.max(1) as f64;
        Self {
            server,
            clients: Vec::new(),
            latency_ticks,
            snapshot_every: snapshot_every.max(1),
            tick: 0,
            tick_ms,
        }
    }

    pub fn from_config(cfg: &LoopbackConfig) -> Self {
        Self::new(
            GameServer::new(cfg.server.clone()),
            cfg.latency_ticks,
            cfg.snapshot_every,
        )
    }

    pub fn tick(&self) -> u64 {
        self.tick
    }

    pub fn now_ms(&self) -> f64 {
        self.tick as f64 * self.tick_ms
    }

    pub fn clients(&self) -> &[LoopbackClient] {
        &self.clients
    }

    pub fn client(&self, idx: usize) -> &LoopbackClient {
        &self.clients[idx]
    }

    pub fn client_mut(&mut self, idx: usize) -> &mut LoopbackClient {
        &mut self.clients[idx]
    }

    /// Joins a new client, at `spawn` if given. Returns its index.
    pub fn connect(&mut self, cfg: ClientConfig, spawn: Option<Vec3>) -> usize {
        let join = match spawn {
            Some(p) => self.server.join_at(p),
            None => self.server.join(),
        };
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let (session, inbound) = ClientSession::new(cfg, out_tx, RecordingPresentation::default());

        let mut down = DelayLink::new(self.latency_ticks);
        let id = join.player_id.clone();
        down.send(self.tick, NetMsg::Join(join));

        info!(player_id = %id, tick = self.tick, "Loopback client connected");
        self.clients.push(LoopbackClient {
            session,
            id,
            inbound,
            outbound: out_rx,
            up: DelayLink::new(self.latency_ticks),
            down,
            connected: true,
        });
        self.clients.len() - 1
    }

    /// Removes a client from the world and tells its session.
    pub fn disconnect(&mut self, idx: usize) {
        let client = &mut self.clients[idx];
        if !client.connected {
            return;
        }
        client.connected = false;
        self.server.leave(&client.id);
        client.inbound.disconnected("loopback disconnect");
        client.session.drain_inbox();
    }

    /// Runs one tick. `inputs[i]` drives client `i`; missing entries idle.
    pub fn step(&mut self, inputs: &[InputState]) -> anyhow::Result<()> {
        let now = self.now_ms();
        let tick = self.tick;

        for (i, client) in self.clients.iter_mut().enumerate() {
            if !client.connected {
                continue;
            }
            for msg in client.down.deliver(tick) {
                client.inbound.net(msg, now);
            }

            let input = inputs.get(i).copied().unwrap_or_default();
            client.session.tick(input, now);
            while let Ok(msg) = client.outbound.try_recv() {
                client.up.send(tick, msg);
            }

            for msg in client.up.deliver(tick) {
                self.server
                    .handle_input(&client.id, &msg)
                    .with_context(|| format!("tick {tick}"))?;
            }
        }

        if tick % self.snapshot_every == 0 {
            for client in self.clients.iter_mut().filter(|c| c.connected) {
                let snap = self.server.snapshot_for(&client.id);
                client.down.send(tick, NetMsg::UpdatePositions(snap));
            }
        }

        for client in self.clients.iter_mut().filter(|c| c.connected) {
            client.session.render_frame(now);
        }

        debug!(tick, "Loopback step");
        self.tick += 1;
        Ok(())
    }

    /// Runs `ticks` steps with the same inputs every tick.
    pub fn run(&mut self, ticks: u64, inputs: &[InputState]) -> anyhow::Result<()> {
        for _ in 0..ticks {
            self.step(inputs)?;
        }
        Ok(())
    }
}

/// Deterministic wandering input: walk forward while slowly turning,
/// strafe every few seconds, jump every two seconds.
pub fn scripted_input(tick: u64, tick_hz: u32, phase: f32) -> InputState {
    let hz = tick_hz.max(1) as u64;
    let t = tick as f32 / hz as f32;
    let mut keys = MoveKeys::FORWARD;
    if (tick / (hz * 3)) % 2 == 1 {
        keys |= MoveKeys::LEFT;
    }
    if tick % (hz * 2) == 0 {
        keys |= MoveKeys::JUMP;
    }
    InputState::new(keys, (phase + t * 0.4) % TAU)
}
