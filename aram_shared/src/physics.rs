//! Deterministic physics step.
//!
//! One call advances a kinematic state by exactly one fixed tick. The same
//! function runs on the client (prediction and replay) and in the
//! authoritative world, so it must not read clocks, randomness or any state
//! other than its arguments.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

use crate::{
    collision::{resolve_x, resolve_y, resolve_z, ObstacleSet},
    math::Vec3,
};

/// Physics parameters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PhysicsConfig {
    /// Horizontal speed in units/s, also the cap for combined directions.
    #[serde(default = "default_move_speed")]
    pub move_speed: f32,
    /// Vertical velocity set when jumping from the ground.
    #[serde(default = "default_jump_impulse")]
    pub jump_impulse: f32,
    /// Downward acceleration in units/s².
    #[serde(default = "default_gravity")]
    pub gravity: f32,
    /// Fixed simulation rate.
    #[serde(default = "default_tick_hz")]
    pub tick_hz: u32,
}

fn default_move_speed() -> f32 {
    10.0
}

fn default_jump_impulse() -> f32 {
    35.0
}

fn default_gravity() -> f32 {
    9.8 * 4.0
}

fn default_tick_hz() -> u32 {
    60
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            move_speed: default_move_speed(),
            jump_impulse: default_jump_impulse(),
            gravity: default_gravity(),
            tick_hz: default_tick_hz(),
        }
    }
}

impl PhysicsConfig {
    /// Duration of one tick in seconds.
    pub fn dt(&self) -> f32 {
        1.0 / self.tick_hz.max(1) as f32
    }

    /// Advances `state` by one tick.
    pub fn step(&self, state: &KinematicState, input: &MoveInput, world: &ObstacleSet) -> KinematicState {
        let dt = self.dt();
        let (vx, vz) = self.horizontal_velocity(input);

        let mut vy = state.velocity_y - self.gravity * dt;
        if input.keys.contains(MoveKeys::JUMP) && state.on_ground {
            vy = self.jump_impulse;
        }

        let dx = vx * dt;
        let dy = vy * dt;
        let dz = vz * dt;

        // X, then Z, then Y. Changing the order changes results near corners.
        let mut p = state.position;
        p.x += dx;
        p = resolve_x(p, dx, world);

        p.z += dz;
        p = resolve_z(p, dz, world);

        p.y += dy;
        let vertical = resolve_y(p, dy, vy, world);
        p.y = vertical.y;

        KinematicState {
            position: p,
            yaw: input.yaw,
            velocity_y: vertical.velocity_y,
            on_ground: vertical.on_ground,
        }
    }

    fn horizontal_velocity(&self, input: &MoveInput) -> (f32, f32) {
        let speed = self.move_speed;
        let (sin, cos) = input.yaw.sin_cos();
        let mut vx = 0.0;
        let mut vz = 0.0;

        if input.keys.contains(MoveKeys::FORWARD) {
            vx += speed * sin;
            vz += speed * cos;
        }
        if input.keys.contains(MoveKeys::BACK) {
            vx -= speed * sin;
            vz -= speed * cos;
        }
        if input.keys.contains(MoveKeys::LEFT) {
            vx += speed * cos;
            vz -= speed * sin;
        }
        if input.keys.contains(MoveKeys::RIGHT) {
            vx -= speed * cos;
            vz += speed * sin;
        }

        let magnitude = (vx * vx + vz * vz).sqrt();
        if magnitude > speed && magnitude > 0.0 {
            let scale = speed / magnitude;
            vx *= scale;
            vz *= scale;
        }
        (vx, vz)
    }
}

/// Advances `state` by one tick with default parameters.
pub fn step(state: &KinematicState, input: &MoveInput, world: &ObstacleSet) -> KinematicState {
    PhysicsConfig::default().step(state, input, world)
}

bitflags! {
    /// Movement keys held during a tick.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct MoveKeys: u8 {
        const FORWARD = 1 << 0;
        const BACK = 1 << 1;
        const LEFT = 1 << 2;
        const RIGHT = 1 << 3;
        const JUMP = 1 << 4;
    }
}

impl MoveKeys {
    /// True if any horizontal movement key is held.
    pub fn is_moving(self) -> bool {
        self.intersects(Self::FORWARD | Self::BACK | Self::LEFT | Self::RIGHT)
    }
}

/// The part of an input sample the physics step consumes.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MoveInput {
    pub keys: MoveKeys,
    pub yaw: f32,
}

impl MoveInput {
    pub const fn new(keys: MoveKeys, yaw: f32) -> Self {
        Self { keys, yaw }
    }
}

/// Simulated state of a player-controlled entity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct KinematicState {
    pub position: Vec3,
    pub yaw: f32,
    pub velocity_y: f32,
    pub on_ground: bool,
}

impl KinematicState {
    /// Resting on the ground at `position`, facing yaw 0.
    pub fn grounded_at(position: Vec3) -> Self {
        Self {
            position,
            yaw: 0.0,
            velocity_y: 0.0,
            on_ground: true,
        }
    }
}

impl Default for KinematicState {
    fn default() -> Self {
        Self::grounded_at(Vec3::ZERO)
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::{FRAC_PI_2, FRAC_PI_4};

    use super::*;
    use crate::collision::Obstacle;

    #[test]
    fn step_is_deterministic() {
        let world = ObstacleSet::new([Obstacle::new(Vec3::new(4.0, 0.0, 3.0))]);
        let state = KinematicState {
            position: Vec3::new(0.3, 1.2, -0.7),
            yaw: 0.9,
            velocity_y: 4.0,
            on_ground: false,
        };
        let input = MoveInput::new(MoveKeys::FORWARD | MoveKeys::LEFT | MoveKeys::JUMP, 0.9);

        let first = step(&state, &input, &world);
        for _ in 0..100 {
            assert_eq!(step(&state, &input, &world), first);
        }
    }

    #[test]
    fn forward_follows_yaw() {
        let cfg = PhysicsConfig::default();
        let world = ObstacleSet::empty();
        let s0 = KinematicState::default();

        let s1 = cfg.step(&s0, &MoveInput::new(MoveKeys::FORWARD, 0.0), &world);
        assert!(s1.position.x.abs() < 1e-6);
        assert!((s1.position.z - 10.0 / 60.0).abs() < 1e-6);

        let s1 = cfg.step(&s0, &MoveInput::new(MoveKeys::FORWARD, FRAC_PI_2), &world);
        assert!((s1.position.x - 10.0 / 60.0).abs() < 1e-6);
        assert!(s1.position.z.abs() < 1e-6);
        assert_eq!(s1.yaw, FRAC_PI_2);
    }

    #[test]
    fn diagonal_is_capped_at_move_speed() {
        let world = ObstacleSet::empty();
        let s0 = KinematicState::default();
        let s1 = step(&s0, &MoveInput::new(MoveKeys::FORWARD | MoveKeys::RIGHT, 0.4), &world);
        let horizontal = Vec3::new(s1.position.x, 0.0, s1.position.z).len();
        assert!((horizontal - 10.0 / 60.0).abs() < 1e-5, "got {horizontal}");
    }

    #[test]
    fn opposite_keys_cancel() {
        let s1 = step(
            &KinematicState::default(),
            &MoveInput::new(MoveKeys::FORWARD | MoveKeys::BACK, 1.3),
            &ObstacleSet::empty(),
        );
        assert!(s1.position.x.abs() < 1e-6 && s1.position.z.abs() < 1e-6);
    }

    #[test]
    fn resting_on_floor_stays_grounded() {
        let s1 = step(&KinematicState::default(), &MoveInput::default(), &ObstacleSet::empty());
        assert_eq!(s1.position.y, 0.0);
        assert_eq!(s1.velocity_y, 0.0);
        assert!(s1.on_ground);
    }

    #[test]
    fn jump_needs_ground() {
        let world = ObstacleSet::empty();
        let jump = MoveInput::new(MoveKeys::JUMP, 0.0);

        let s1 = step(&KinematicState::default(), &jump, &world);
        assert_eq!(s1.velocity_y, 35.0);
        assert!(!s1.on_ground);
        assert!((s1.position.y - 35.0 / 60.0).abs() < 1e-5);

        // Still holding jump in the air only decays the velocity.
        let s2 = step(&s1, &jump, &world);
        assert!((s2.velocity_y - (35.0 - 39.2 / 60.0)).abs() < 1e-4);
    }

    #[test]
    fn jump_eventually_lands() {
        let world = ObstacleSet::empty();
        let mut s = step(&KinematicState::default(), &MoveInput::new(MoveKeys::JUMP, 0.0), &world);
        let mut ticks = 1;
        while !s.on_ground {
            s = step(&s, &MoveInput::default(), &world);
            ticks += 1;
            assert!(ticks < 600, "never landed");
        }
        assert_eq!(s.position.y, 0.0);
        assert_eq!(s.velocity_y, 0.0);
        // Flight time is about 2 * 35 / 39.2 seconds.
        assert!((100..=112).contains(&ticks), "ticks = {ticks}");
    }

    #[test]
    fn diagonal_into_corner_resolves_x_before_z() {
        // Hull starts just outside the cube's -X/-Z corner. Moving X alone
        // clears the cube on Z, so X passes; the following Z move then hits
        // the -Z face. Resolving Z first would instead stop X at -3.5.
        let world = ObstacleSet::new([Obstacle::new(Vec3::ZERO)]);
        let start = KinematicState::grounded_at(Vec3::new(-3.55, 0.0, -3.05));
        let s1 = step(&start, &MoveInput::new(MoveKeys::FORWARD, FRAC_PI_4), &world);

        let dx = 10.0 * FRAC_PI_4.sin() / 60.0;
        assert!((s1.position.x - (-3.55 + dx)).abs() < 1e-4, "x = {}", s1.position.x);
        assert!(s1.position.x > -3.45);
        assert_eq!(s1.position.z, -3.0);
        assert_eq!(s1.position.y, 0.0);
        assert!(s1.on_ground);
    }

    #[test]
    fn walks_into_cube_and_stops() {
        let world = ObstacleSet::new([Obstacle::new(Vec3::new(10.0, 0.0, 0.0))]);
        let input = MoveInput::new(MoveKeys::FORWARD, FRAC_PI_2);
        let mut s = KinematicState::default();
        for _ in 0..120 {
            s = step(&s, &input, &world);
        }
        assert_eq!(s.position.x, 6.5);
        assert!(s.on_ground);
    }
}
