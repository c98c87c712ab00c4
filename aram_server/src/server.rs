//! Reference world implementation.
//!
//! An authoritative world that runs the same physics step as the client.
//! It supports:
//! - Player join with spawn selection and the join reply
//! - Per-player input processing in sequence order
//! - Per-recipient snapshots
//! - Leaving
//!
//! Determinism notes:
//! - Inputs are simulated one physics tick each, in sequence order.
//! - Randomness only comes from the seeded RNG (level and spawns).
//! - Players are kept in a `BTreeMap` so iteration order is stable.

use std::collections::BTreeMap;

use anyhow::{bail, Context};
use aram_shared::{
    collision::ObstacleSet,
    config::ServerConfig,
    math::Vec3,
    net::{
        validate_input, BoxSpec, InputMessage, JoinMessage, NetMsg, PlayerId, PlayerPose,
        PlayerUpdate, SnapshotMessage,
    },
    physics::KinematicState,
};
use rand::{rngs::StdRng, Rng, SeedableRng};
use tracing::{debug, info, trace, warn};

use crate::level::{generate_boxes, obstacle_set};

const SPAWN_ATTEMPTS: usize = 32;

/// Authoritative per-player state.
#[derive(Debug, Clone, Copy)]
struct ServerPlayer {
    state: KinematicState,
    /// Highest input sequence number simulated so far; 0 before any.
    last_processed: u64,
}

/// Headless authoritative world.
pub struct GameServer {
    cfg: ServerConfig,
    boxes: Vec<BoxSpec>,
    world: ObstacleSet,
    players: BTreeMap<PlayerId, ServerPlayer>,
    rng: StdRng,
    next_player: u64,
}

impl GameServer {
    /// Creates a world with a generated level.
    pub fn new(cfg: ServerConfig) -> Self {
        let mut rng = StdRng::seed_from_u64(cfg.seed);
        let boxes = generate_boxes(&mut rng, cfg.box_count, cfg.world_extent);
        Self::build(cfg, boxes, rng)
    }

    /// Creates a world with explicit geometry.
    pub fn with_boxes(cfg: ServerConfig, boxes: Vec<BoxSpec>) -> Self {
        let rng = StdRng::seed_from_u64(cfg.seed);
        Self::build(cfg, boxes, rng)
    }

    fn build(cfg: ServerConfig, boxes: Vec<BoxSpec>, rng: StdRng) -> Self {
        let world = obstacle_set(&boxes);
        info!(boxes = boxes.len(), seed = cfg.seed, "World created");
        Self {
            cfg,
            boxes,
            world,
            players: BTreeMap::new(),
            rng,
            next_player: 1,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.cfg
    }

    pub fn boxes(&self) -> &[BoxSpec] {
        &self.boxes
    }

    pub fn world(&self) -> &ObstacleSet {
        &self.world
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }

    pub fn player_state(&self, id: &PlayerId) -> Option<KinematicState> {
        self.players.get(id).map(|p| p.state)
    }

    pub fn last_processed(&self, id: &PlayerId) -> Option<u64> {
        self.players.get(id).map(|p| p.last_processed)
    }

    /// Adds a player at a random free spot and returns the join reply.
    pub fn join(&mut self) -> JoinMessage {
        let spawn = self.pick_spawn();
        self.join_at(spawn)
    }

    /// Adds a player at `spawn` and returns the join reply.
    pub fn join_at(&mut self, spawn: Vec3) -> JoinMessage {
        let id = PlayerId(format!("player_{}", self.next_player));
        self.next_player += 1;

        let players = self
            .players
            .iter()
            .map(|(id, p)| {
                (
                    id.clone(),
                    PlayerPose {
                        position: p.state.position,
                        rotation_y: p.state.yaw,
                    },
                )
            })
            .collect();

        self.players.insert(
            id.clone(),
            ServerPlayer {
                state: KinematicState::grounded_at(spawn),
                last_processed: 0,
            },
        );
        info!(player_id = %id, x = spawn.x, z = spawn.z, "Player joined");

        JoinMessage {
            player_id: id,
            starting_position: spawn,
            players,
            boxes: self.boxes.clone(),
        }
    }

    fn pick_spawn(&mut self) -> Vec3 {
        let extent = self.cfg.world_extent.max(0.0);
        for _ in 0..SPAWN_ATTEMPTS {
            let candidate = Vec3::new(
                self.rng.gen_range(-extent..=extent),
                0.0,
                self.rng.gen_range(-extent..=extent),
            );
            if self.world.intersecting(candidate).next().is_none() {
                return candidate;
            }
        }
        // Generated levels keep the origin free; explicit geometry may not.
        warn!(attempts = SPAWN_ATTEMPTS, "No free spawn found, using the origin");
        Vec3::ZERO
    }

    pub fn leave(&mut self, id: &PlayerId) -> bool {
        let removed = self.players.remove(id).is_some();
        if removed {
            info!(player_id = %id, "Player left");
        }
        removed
    }

    /// Simulates one input. Returns `false` if it was a duplicate or arrived
    /// after a later input had already been simulated.
    pub fn handle_input(&mut self, id: &PlayerId, msg: &InputMessage) -> anyhow::Result<bool> {
        let input = validate_input(msg).with_context(|| format!("input from {id}"))?;
        let physics = self.cfg.physics;
        let world = &self.world;
        let Some(player) = self.players.get_mut(id) else {
            bail!("input from unknown player {id}");
        };

        if msg.sequence_number <= player.last_processed {
            debug!(
                player_id = %id,
                seq = msg.sequence_number,
                last = player.last_processed,
                "Ignoring stale input"
            );
            return Ok(false);
        }

        player.state = physics.step(&player.state, &input, world);
        player.last_processed = msg.sequence_number;
        trace!(player_id = %id, seq = msg.sequence_number, "Input simulated");
        Ok(true)
    }

    /// Dispatches a client message.
    pub fn handle(&mut self, id: &PlayerId, msg: &NetMsg) -> anyhow::Result<()> {
        match msg {
            NetMsg::Move(input) => {
                self.handle_input(id, input)?;
                Ok(())
            }
            other => bail!("unexpected message from {id}: {other:?}"),
        }
    }

    /// Snapshot as seen by `recipient`: its own entry carries the full
    /// kinematic state and acknowledgement, the others only their pose.
    pub fn snapshot_for(&self, recipient: &PlayerId) -> SnapshotMessage {
        let players = self
            .players
            .iter()
            .map(|(id, p)| {
                let own = id == recipient;
                (
                    id.clone(),
                    PlayerUpdate {
                        position: p.state.position,
                        rotation_y: p.state.yaw,
                        sequence_number: own.then_some(p.last_processed),
                        velocity_y: own.then_some(p.state.velocity_y),
                        on_ground: own.then_some(p.state.on_ground),
                    },
                )
            })
            .collect();
        SnapshotMessage { players }
    }

    /// Ids of every connected player, in stable order.
    pub fn player_ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.players.keys()
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use aram_shared::net::KeyState;

    use super::*;

    fn forward(seq: u64) -> InputMessage {
        InputMessage {
            keys: KeyState {
                w: true,
                ..Default::default()
            },
            rotation_y: FRAC_PI_2,
            sequence_number: seq,
        }
    }

    fn empty_world() -> GameServer {
        GameServer::with_boxes(ServerConfig::default(), Vec::new())
    }

    #[test]
    fn join_lists_existing_players_and_boxes() {
        let mut server = GameServer::new(ServerConfig {
            box_count: 5,
            ..Default::default()
        });
        let a = server.join();
        assert_eq!(a.player_id, PlayerId::new("player_1"));
        assert!(a.players.is_empty());
        assert_eq!(a.boxes.len(), 5);
        assert_eq!(server.world().intersecting(a.starting_position).count(), 0);

        let b = server.join();
        assert_eq!(b.players.len(), 1);
        assert!(b.players.contains_key(&a.player_id));
    }

    #[test]
    fn duplicate_and_stale_inputs_are_ignored() -> anyhow::Result<()> {
        let mut server = empty_world();
        let id = server.join_at(Vec3::ZERO).player_id;

        assert!(server.handle_input(&id, &forward(1))?);
        assert!(server.handle_input(&id, &forward(2))?);
        assert!(!server.handle_input(&id, &forward(2))?);
        assert!(!server.handle_input(&id, &forward(1))?);
        assert_eq!(server.last_processed(&id), Some(2));

        let x = server.player_state(&id).unwrap().position.x;
        assert!((x - 2.0 * 10.0 / 60.0).abs() < 1e-5);
        Ok(())
    }

    #[test]
    fn unknown_player_and_bad_input_are_errors() {
        let mut server = empty_world();
        assert!(server.handle_input(&PlayerId::new("ghost"), &forward(1)).is_err());

        let id = server.join_at(Vec3::ZERO).player_id;
        let mut bad = forward(1);
        bad.rotation_y = f32::INFINITY;
        assert!(server.handle_input(&id, &bad).is_err());
    }

    #[test]
    fn snapshot_only_acknowledges_to_recipient() -> anyhow::Result<()> {
        let mut server = empty_world();
        let a = server.join_at(Vec3::ZERO).player_id;
        let b = server.join_at(Vec3::new(5.0, 0.0, 5.0)).player_id;
        server.handle(&a, &NetMsg::Move(forward(3)))?;

        let snap = server.snapshot_for(&a);
        assert_eq!(snap.players[&a].sequence_number, Some(3));
        assert_eq!(snap.players[&a].on_ground, Some(true));
        assert_eq!(snap.players[&b].sequence_number, None);
        assert_eq!(snap.players[&b].velocity_y, None);

        assert!(server.leave(&b));
        assert_eq!(server.snapshot_for(&a).players.len(), 1);
        Ok(())
    }

    #[test]
    fn blocked_spawn_area_falls_back_to_origin() {
        let cfg = ServerConfig {
            world_extent: 0.0,
            ..Default::default()
        };
        let boxes = vec![BoxSpec {
            position: Vec3::ZERO,
            material_index: 0,
        }];
        let mut server = GameServer::with_boxes(cfg, boxes);
        let join = server.join();
        assert_eq!(join.starting_position, Vec3::ZERO);
        assert_eq!(server.world().intersecting(join.starting_position).count(), 1);
    }

    #[test]
    fn fresh_player_reports_nothing_processed() {
        let mut server = empty_world();
        let id = server.join_at(Vec3::ZERO).player_id;
        assert_eq!(server.snapshot_for(&id).players[&id].sequence_number, Some(0));
    }
}
