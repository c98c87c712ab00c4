//! Input handling.
//!
//! Window/keyboard integration lives in the host; this module turns the
//! sampled key state and camera yaw into sequenced, immutable input samples.

use aram_shared::{
    net::{InputMessage, KeyState},
    physics::{MoveInput, MoveKeys},
};

/// User input state at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub keys: MoveKeys,
    /// Facing direction in radians around the vertical axis.
    pub yaw: f32,
}

impl InputState {
    pub fn new(keys: MoveKeys, yaw: f32) -> Self {
        Self { keys, yaw }
    }

    /// Sets or clears a key, e.g. from key-down/key-up events.
    pub fn set_key(&mut self, key: MoveKeys, held: bool) {
        self.keys.set(key, held);
    }

    pub fn move_input(self) -> MoveInput {
        MoveInput::new(self.keys, self.yaw)
    }
}

/// One tick of input, tagged with its sequence number.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputSample {
    pub sequence: u64,
    pub input: MoveInput,
}

impl InputSample {
    pub fn to_message(&self) -> InputMessage {
        InputMessage {
            keys: KeyState::from(self.input.keys),
            rotation_y: self.input.yaw,
            sequence_number: self.sequence,
        }
    }
}

/// Turns sampled input into an [`InputSample`] for a tick.
pub fn build_sample(sequence: u64, input: InputState) -> InputSample {
    InputSample {
        sequence,
        input: input.move_input(),
    }
}
