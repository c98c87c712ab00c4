//! Network message contract.
//!
//! Goals:
//! - Describe the join, snapshot and input messages exchanged with the
//!   authoritative server, in their JSON wire shape.
//! - Validate inbound messages at the boundary so that nothing malformed
//!   reaches prediction or interpolation.
//! - Keep serialization explicit and versionable.
//!
//! The transport itself (sockets, channels, reconnects) lives outside this
//! workspace; it only has to move these messages.

use std::collections::BTreeMap;
use std::fmt;

use anyhow::Context;
use bytes::Bytes;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

use crate::{
    collision::{Obstacle, ObstacleSet},
    math::Vec3,
    physics::{KinematicState, MoveInput, MoveKeys},
};

/// Opaque player identifier assigned by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PlayerId(pub String);

impl PlayerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// High-level message envelope, named after the channel events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum NetMsg {
    /// Server -> client: reply to a successful join.
    Join(JoinMessage),
    /// Server -> client: periodic authoritative positions.
    UpdatePositions(SnapshotMessage),
    /// Client -> server: one tick of input.
    Move(InputMessage),
}

/// Key state as sent on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyState {
    #[serde(default)]
    pub w: bool,
    #[serde(default)]
    pub a: bool,
    #[serde(default)]
    pub s: bool,
    #[serde(default)]
    pub d: bool,
    #[serde(default)]
    pub space: bool,
}

impl From<KeyState> for MoveKeys {
    fn from(k: KeyState) -> Self {
        let mut keys = MoveKeys::empty();
        keys.set(MoveKeys::FORWARD, k.w);
        keys.set(MoveKeys::LEFT, k.a);
        keys.set(MoveKeys::BACK, k.s);
        keys.set(MoveKeys::RIGHT, k.d);
        keys.set(MoveKeys::JUMP, k.space);
        keys
    }
}

impl From<MoveKeys> for KeyState {
    fn from(keys: MoveKeys) -> Self {
        Self {
            w: keys.contains(MoveKeys::FORWARD),
            a: keys.contains(MoveKeys::LEFT),
            s: keys.contains(MoveKeys::BACK),
            d: keys.contains(MoveKeys::RIGHT),
            space: keys.contains(MoveKeys::JUMP),
        }
    }
}

/// Client input for one tick.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InputMessage {
    pub keys: KeyState,
    pub rotation_y: f32,
    #[serde(rename = "sequenceNumber")]
    pub sequence_number: u64,
}

impl InputMessage {
    pub fn move_input(&self) -> MoveInput {
        MoveInput::new(self.keys.into(), self.rotation_y)
    }
}

/// Pose of another player as listed in the join reply.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerPose {
    pub position: Vec3,
    pub rotation_y: f32,
}

/// One static box in the level.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoxSpec {
    pub position: Vec3,
    #[serde(default)]
    pub material_index: u32,
}

/// Join reply: identity, spawn, current roster and level geometry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinMessage {
    pub player_id: PlayerId,
    pub starting_position: Vec3,
    #[serde(default)]
    pub players: BTreeMap<PlayerId, PlayerPose>,
    #[serde(default)]
    pub boxes: Vec<BoxSpec>,
}

/// One player's entry in a periodic snapshot.
///
/// The optional fields are only present on the recipient's own entry.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerUpdate {
    pub position: Vec3,
    pub rotation_y: f32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence_number: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity_y: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_ground: Option<bool>,
}

/// Periodic authoritative snapshot of every connected player.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SnapshotMessage {
    pub players: BTreeMap<PlayerId, PlayerUpdate>,
}

/// A message that does not satisfy the contract.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ContractViolation {
    #[error("empty player id")]
    EmptyPlayerId,
    #[error("non-finite value in {field} of {subject}")]
    NonFinite { subject: String, field: &'static str },
    #[error("local entry for {player} is missing {field}")]
    MissingField { player: PlayerId, field: &'static str },
    /// No sequence number is left after this acknowledgement.
    #[error("acknowledged sequence {ack} for {player} is out of range")]
    AckOutOfRange { player: PlayerId, ack: u64 },
}

fn finite_vec(v: Vec3, subject: &dyn fmt::Display, field: &'static str) -> Result<Vec3, ContractViolation> {
    if v.is_finite() {
        Ok(v)
    } else {
        Err(ContractViolation::NonFinite {
            subject: subject.to_string(),
            field,
        })
    }
}

fn finite(x: f32, subject: &dyn fmt::Display, field: &'static str) -> Result<f32, ContractViolation> {
    if x.is_finite() {
        Ok(x)
    } else {
        Err(ContractViolation::NonFinite {
            subject: subject.to_string(),
            field,
        })
    }
}

fn checked_id(id: &PlayerId) -> Result<&PlayerId, ContractViolation> {
    if id.0.is_empty() {
        Err(ContractViolation::EmptyPlayerId)
    } else {
        Ok(id)
    }
}

/// Authoritative state for the local player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalSnapshot {
    /// Last input sequence number the server has processed.
    pub ack: u64,
    pub state: KinematicState,
}

/// Authoritative pose of a remote player.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSample {
    pub id: PlayerId,
    pub position: Vec3,
    pub yaw: f32,
}

/// Snapshot split into the local entry and the remote roster.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ValidatedSnapshot {
    pub local: Option<LocalSnapshot>,
    pub remotes: Vec<RemoteSample>,
}

/// Join reply ready for the core.
#[derive(Debug, Clone)]
pub struct ValidatedJoin {
    pub player_id: PlayerId,
    pub starting_position: Vec3,
    pub remotes: Vec<RemoteSample>,
    pub world: ObstacleSet,
}

pub fn validate_join(msg: &JoinMessage) -> Result<ValidatedJoin, ContractViolation> {
    let player_id = checked_id(&msg.player_id)?.clone();
    let starting_position = finite_vec(msg.starting_position, &player_id, "starting_position")?;

    let remotes = msg
        .players
        .iter()
        .filter(|(id, _)| **id != player_id)
        .map(|(id, pose)| -> Result<RemoteSample, ContractViolation> {
            Ok(RemoteSample {
                id: checked_id(id)?.clone(),
                position: finite_vec(pose.position, id, "position")?,
                yaw: finite(pose.rotation_y, id, "rotation_y")?,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;

    let obstacles = msg
        .boxes
        .iter()
        .enumerate()
        .map(|(i, b)| {
            finite_vec(b.position, &format!("box {i}"), "position").map(Obstacle::new)
        })
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ValidatedJoin {
        player_id,
        starting_position,
        remotes,
        world: ObstacleSet::new(obstacles),
    })
}

pub fn validate_snapshot(
    msg: &SnapshotMessage,
    local: &PlayerId,
) -> Result<ValidatedSnapshot, ContractViolation> {
    let mut out = ValidatedSnapshot::default();
    for (id, entry) in &msg.players {
        checked_id(id)?;
        let position = finite_vec(entry.position, id, "position")?;
        let yaw = finite(entry.rotation_y, id, "rotation_y")?;

        if id == local {
            let missing = |field| ContractViolation::MissingField {
                player: id.clone(),
                field,
            };
            let ack = entry.sequence_number.ok_or_else(|| missing("sequence_number"))?;
            if ack == u64::MAX {
                return Err(ContractViolation::AckOutOfRange {
                    player: id.clone(),
                    ack,
                });
            }
            let velocity_y = entry.velocity_y.ok_or_else(|| missing("velocity_y"))?;
            let on_ground = entry.on_ground.ok_or_else(|| missing("on_ground"))?;
            out.local = Some(LocalSnapshot {
                ack,
                state: KinematicState {
                    position,
                    yaw,
                    velocity_y: finite(velocity_y, id, "velocity_y")?,
                    on_ground,
                },
            });
        } else {
            out.remotes.push(RemoteSample {
                id: id.clone(),
                position,
                yaw,
            });
        }
    }
    Ok(out)
}

pub fn validate_input(msg: &InputMessage) -> Result<MoveInput, ContractViolation> {
    finite(msg.rotation_y, &format!("input {}", msg.sequence_number), "rotation_y")?;
    Ok(msg.move_input())
}

/// Convenience codec helpers.
pub fn encode_to_bytes<T: Serialize>(msg: &T) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize")?;
    Ok(Bytes::from(payload))
}

pub fn decode_from_bytes<T: DeserializeOwned>(b: &[u8]) -> anyhow::Result<T> {
    serde_json::from_slice(b).context("deserialize")
}
