//! Prediction and reconciliation.
//!
//! The local player is simulated immediately from sampled input. Every
//! input is kept until the server acknowledges it; when an authoritative
//! state arrives, the predicted state is rebuilt by replaying the inputs
//! the server has not seen yet on top of it.
//!
//! Sequence numbers start at 1. The server reports 0 until it has
//! processed the first input.

use std::collections::VecDeque;

use aram_shared::{
    collision::ObstacleSet,
    math::Vec3,
    net::LocalSnapshot,
    physics::{KinematicState, PhysicsConfig},
};
use tracing::{debug, trace, warn};

use crate::input::{build_sample, InputSample, InputState};

/// Unacknowledged inputs in sequence order.
#[derive(Debug, Default, Clone)]
pub struct InputBuffer {
    entries: VecDeque<InputSample>,
}

impl InputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample. Samples that do not extend the sequence are refused.
    pub fn push(&mut self, sample: InputSample) -> bool {
        if let Some(last) = self.entries.back() {
            if sample.sequence <= last.sequence {
                return false;
            }
        }
        self.entries.push_back(sample);
        true
    }

    /// Drops every sample with sequence `<= ack`, returning how many went.
    pub fn acknowledge(&mut self, ack: u64) -> usize {
        let mut dropped = 0;
        while self.entries.front().is_some_and(|s| s.sequence <= ack) {
            self.entries.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = &InputSample> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn first_sequence(&self) -> Option<u64> {
        self.entries.front().map(|s| s.sequence)
    }
}

/// Outcome of applying one authoritative snapshot.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reconciliation {
    pub acknowledged: u64,
    /// Inputs dropped from the buffer by this acknowledgement.
    pub dropped: usize,
    /// Inputs replayed on top of the server state.
    pub replayed: usize,
    /// Distance between the old and corrected predicted positions.
    pub correction: f32,
    /// The acknowledgement was for an input never sent; state was resynced.
    pub resync: bool,
}

/// Owns the predicted local state and the unacknowledged inputs.
#[derive(Debug, Clone)]
pub struct PredictionReconciler {
    physics: PhysicsConfig,
    world: ObstacleSet,
    /// `None` until seeded from an authoritative state.
    predicted: Option<KinematicState>,
    buffer: InputBuffer,
    next_sequence: u64,
    resyncs: u64,
}

impl PredictionReconciler {
    pub fn new(physics: PhysicsConfig, world: ObstacleSet) -> Self {
        Self {
            physics,
            world,
            predicted: None,
            buffer: InputBuffer::new(),
            next_sequence: 1,
            resyncs: 0,
        }
    }

    /// Starts predicting from a spawn position.
    pub fn seed(&mut self, start: Vec3) {
        debug!(x = start.x, y = start.y, z = start.z, "Prediction seeded");
        self.predicted = Some(KinematicState::grounded_at(start));
        self.buffer.clear();
    }

    pub fn is_active(&self) -> bool {
        self.predicted.is_some()
    }

    pub fn predicted(&self) -> Option<&KinematicState> {
        self.predicted.as_ref()
    }

    pub fn buffer(&self) -> &InputBuffer {
        &self.buffer
    }

    pub fn world(&self) -> &ObstacleSet {
        &self.world
    }

    /// Sequence number the next tick will use.
    pub fn next_sequence(&self) -> u64 {
        self.next_sequence
    }

    /// Number of never-sent acknowledgements seen so far.
    pub fn resyncs(&self) -> u64 {
        self.resyncs
    }

    /// Samples input for one tick and advances the prediction.
    ///
    /// Returns the sample to send, or `None` while not yet seeded or once
    /// sequence numbers run out.
    pub fn tick(&mut self, input: InputState) -> Option<InputSample> {
        let current = self.predicted?;
        let Some(after) = self.next_sequence.checked_add(1) else {
            warn!(seq = self.next_sequence, "Input sequence numbers exhausted");
            return None;
        };
        let sample = build_sample(self.next_sequence, input);
        self.next_sequence = after;
        self.buffer.push(sample);
        let next = self.physics.step(&current, &sample.input, &self.world);
        trace!(seq = sample.sequence, x = next.position.x, y = next.position.y, z = next.position.z, "Predicted");
        self.predicted = Some(next);
        Some(sample)
    }

    /// Applies an authoritative state for the local player.
    ///
    /// Truncation, reset and replay happen as one step; the buffer and the
    /// predicted state are never observable half-updated.
    pub fn reconcile(&mut self, snap: &LocalSnapshot) -> Option<Reconciliation> {
        let before = self.predicted?;

        if snap.ack >= self.next_sequence {
            let Some(next_sequence) = snap.ack.checked_add(1) else {
                warn!(ack = snap.ack, "Acknowledgement leaves no sequence numbers, ignoring");
                return None;
            };
            warn!(
                ack = snap.ack,
                next_sequence = self.next_sequence,
                buffered = self.buffer.len(),
                "Server acknowledged an input that was never sent, resyncing"
            );
            let dropped = self.buffer.len();
            self.buffer.clear();
            self.next_sequence = next_sequence;
            self.predicted = Some(snap.state);
            self.resyncs += 1;
            return Some(Reconciliation {
                acknowledged: snap.ack,
                dropped,
                replayed: 0,
                correction: before.position.distance(snap.state.position),
                resync: true,
            });
        }

        let dropped = self.buffer.acknowledge(snap.ack);
        let corrected = replay(&self.physics, &self.world, snap.state, self.buffer.iter());
        self.predicted = Some(corrected);

        let outcome = Reconciliation {
            acknowledged: snap.ack,
            dropped,
            replayed: self.buffer.len(),
            correction: before.position.distance(corrected.position),
            resync: false,
        };
        debug!(
            ack = outcome.acknowledged,
            dropped = outcome.dropped,
            replayed = outcome.replayed,
            correction = outcome.correction,
            "Reconciled"
        );
        Some(outcome)
    }
}

/// Replays `inputs` in order on top of `base`.
pub fn replay<'a>(
    physics: &PhysicsConfig,
    world: &ObstacleSet,
    base: KinematicState,
    inputs: impl IntoIterator<Item = &'a InputSample>,
) -> KinematicState {
    inputs
        .into_iter()
        .fold(base, |state, sample| physics.step(&state, &sample.input, world))
}

/// Eases the drawn local position toward the predicted one.
#[derive(Debug, Clone, Copy)]
pub struct RenderSmoother {
    rendered: Vec3,
    factor: f32,
}

impl RenderSmoother {
    pub fn new(start: Vec3, factor: f32) -> Self {
        Self {
            rendered: start,
            factor,
        }
    }

    pub fn rendered(&self) -> Vec3 {
        self.rendered
    }

    /// Jumps straight to `position`, e.g. on spawn.
    pub fn snap_to(&mut self, position: Vec3) {
        self.rendered = position;
    }

    /// Moves a fixed fraction of the way toward `target`.
    pub fn update(&mut self, target: Vec3) -> Vec3 {
        self.rendered = self.rendered.lerp(target, self.factor);
        self.rendered
    }
}

#[cfg(test)]
mod tests {
    use std::f32::consts::FRAC_PI_2;

    use aram_shared::{collision::Obstacle, physics::MoveKeys};

    use super::*;

    fn sample(sequence: u64) -> InputSample {
        build_sample(sequence, InputState::new(MoveKeys::FORWARD, FRAC_PI_2))
    }

    fn active() -> PredictionReconciler {
        let world = ObstacleSet::new([Obstacle::new(Vec3::new(10.0, 0.0, 0.0))]);
        let mut r = PredictionReconciler::new(PhysicsConfig::default(), world);
        r.seed(Vec3::ZERO);
        r
    }

    fn snapshot(ack: u64, x: f32) -> LocalSnapshot {
        LocalSnapshot {
            ack,
            state: KinematicState::grounded_at(Vec3::new(x, 0.0, 0.0)),
        }
    }

    #[test]
    fn buffer_refuses_non_increasing_sequences() {
        let mut buf = InputBuffer::new();
        assert!(buf.push(sample(3)));
        assert!(!buf.push(sample(3)));
        assert!(!buf.push(sample(2)));
        assert!(buf.push(sample(7)));
        assert_eq!(buf.len(), 2);
    }

    #[test]
    fn acknowledge_keeps_only_later_entries_in_order() {
        let mut buf = InputBuffer::new();
        for seq in [1, 2, 4, 5, 9] {
            buf.push(sample(seq));
        }
        assert_eq!(buf.acknowledge(4), 3);
        let left: Vec<u64> = buf.iter().map(|s| s.sequence).collect();
        assert_eq!(left, vec![5, 9]);

        assert_eq!(buf.acknowledge(2), 0);
        assert_eq!(buf.acknowledge(100), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn uninitialized_reconciler_does_nothing() {
        let mut r = PredictionReconciler::new(PhysicsConfig::default(), ObstacleSet::empty());
        assert!(r.tick(InputState::default()).is_none());
        assert!(r.reconcile(&snapshot(0, 1.0)).is_none());
        assert!(r.buffer().is_empty());
        assert_eq!(r.next_sequence(), 1);
    }

    #[test]
    fn tick_buffers_and_advances() {
        let mut r = active();
        let s1 = r.tick(InputState::new(MoveKeys::FORWARD, FRAC_PI_2)).unwrap();
        let s2 = r.tick(InputState::new(MoveKeys::FORWARD, FRAC_PI_2)).unwrap();
        assert_eq!((s1.sequence, s2.sequence), (1, 2));
        assert_eq!(r.buffer().len(), 2);
        assert!((r.predicted().unwrap().position.x - 2.0 * 10.0 / 60.0).abs() < 1e-5);
    }

    #[test]
    fn reconcile_equals_sequential_replay() {
        let mut r = active();
        for i in 0..10 {
            let keys = if i % 3 == 0 { MoveKeys::FORWARD | MoveKeys::JUMP } else { MoveKeys::RIGHT };
            r.tick(InputState::new(keys, 0.3 * i as f32));
        }

        let snap = LocalSnapshot {
            ack: 4,
            state: KinematicState {
                position: Vec3::new(0.5, 1.0, -0.2),
                yaw: 0.9,
                velocity_y: 3.0,
                on_ground: false,
            },
        };

        let mut expected = snap.state;
        let pending: Vec<InputSample> = r.buffer().iter().filter(|s| s.sequence > 4).copied().collect();
        assert_eq!(pending.len(), 6);
        for s in &pending {
            expected = PhysicsConfig::default().step(&expected, &s.input, r.world());
        }

        let outcome = r.reconcile(&snap).unwrap();
        assert_eq!(outcome.dropped, 4);
        assert_eq!(outcome.replayed, 6);
        assert!(!outcome.resync);
        assert_eq!(*r.predicted().unwrap(), expected);

        // Running it again from the same base gives the same answer.
        r.reconcile(&snap).unwrap();
        assert_eq!(*r.predicted().unwrap(), expected);
    }

    #[test]
    fn ack_of_everything_adopts_server_state() {
        let mut r = active();
        for _ in 0..5 {
            r.tick(InputState::new(MoveKeys::FORWARD, FRAC_PI_2));
        }
        let snap = snapshot(5, 3.25);
        let outcome = r.reconcile(&snap).unwrap();
        assert!(r.buffer().is_empty());
        assert_eq!(outcome.replayed, 0);
        assert_eq!(*r.predicted().unwrap(), snap.state);
    }

    #[test]
    fn stale_ack_is_accepted_as_new_base() {
        let mut r = active();
        for _ in 0..6 {
            r.tick(InputState::new(MoveKeys::FORWARD, FRAC_PI_2));
        }
        r.reconcile(&snapshot(4, 0.0)).unwrap();
        assert_eq!(r.buffer().first_sequence(), Some(5));

        // Older acknowledgement: nothing more to drop, base still replaced.
        let outcome = r.reconcile(&snapshot(2, 1.0)).unwrap();
        assert_eq!(outcome.dropped, 0);
        assert_eq!(outcome.replayed, 2);
        let x = r.predicted().unwrap().position.x;
        assert!((x - (1.0 + 2.0 * 10.0 / 60.0)).abs() < 1e-5, "x = {x}");
    }

    #[test]
    fn never_sent_ack_triggers_resync() {
        let mut r = active();
        for _ in 0..3 {
            r.tick(InputState::new(MoveKeys::FORWARD, FRAC_PI_2));
        }
        assert_eq!(r.next_sequence(), 4);

        let snap = snapshot(50, 2.0);
        let outcome = r.reconcile(&snap).unwrap();
        assert!(outcome.resync);
        assert_eq!(outcome.dropped, 3);
        assert!(r.buffer().is_empty());
        assert_eq!(*r.predicted().unwrap(), snap.state);
        assert_eq!(r.resyncs(), 1);

        let next = r.tick(InputState::default()).unwrap();
        assert_eq!(next.sequence, 51);
    }

    #[test]
    fn exhausted_ack_is_ignored() {
        let mut r = active();
        r.tick(InputState::new(MoveKeys::FORWARD, FRAC_PI_2));
        let before = *r.predicted().unwrap();

        assert!(r.reconcile(&snapshot(u64::MAX, 2.0)).is_none());
        assert_eq!(*r.predicted().unwrap(), before);
        assert_eq!(r.buffer().len(), 1);
        assert_eq!(r.next_sequence(), 2);
        assert_eq!(r.resyncs(), 0);

        // The largest usable acknowledgement still resyncs.
        let outcome = r.reconcile(&snapshot(u64::MAX - 1, 2.0)).unwrap();
        assert!(outcome.resync);
        assert_eq!(r.next_sequence(), u64::MAX);
        assert!(r.tick(InputState::default()).is_none());
        assert!(r.buffer().is_empty());
    }

    #[test]
    fn smoother_closes_gap_by_factor() {
        let mut s = RenderSmoother::new(Vec3::ZERO, 0.2);
        let p = s.update(Vec3::new(10.0, 0.0, 0.0));
        assert!((p.x - 2.0).abs() < 1e-6);
        let p = s.update(Vec3::new(10.0, 0.0, 0.0));
        assert!((p.x - 3.6).abs() < 1e-5);
        s.snap_to(Vec3::new(1.0, 1.0, 1.0));
        assert_eq!(s.rendered(), Vec3::new(1.0, 1.0, 1.0));
    }
}
