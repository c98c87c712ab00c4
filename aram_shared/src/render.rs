//! Presentation abstraction.
//!
//! This crate intentionally does not depend on a graphics backend.
//! The core reports what should be shown; a scene/animation layer
//! implements [`PresentationSink`] to act on it.

use serde::{Deserialize, Serialize};

use crate::{math::Vec3, net::PlayerId};

/// Animation state of a player model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Activity {
    #[default]
    Idle,
    Walking,
}

/// Where to draw a player model.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RenderPose {
    pub position: Vec3,
    pub rotation_y: f32,
}

/// Which model an activity change applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Actor<'a> {
    Local,
    Remote(&'a PlayerId),
}

/// Receives render-side effects.
pub trait PresentationSink: Send {
    /// A remote player appeared; load its model at `pose`.
    fn spawn_remote(&mut self, id: &PlayerId, pose: RenderPose);
    /// A remote player left; release its model immediately.
    fn despawn_remote(&mut self, id: &PlayerId);
    /// Stop the `from` animation and start `to`. Only called on a real change.
    fn switch_activity(&mut self, actor: Actor<'_>, from: Activity, to: Activity);
}

/// A no-op sink useful for headless runs.
#[derive(Debug, Default)]
pub struct NullPresentation;

impl PresentationSink for NullPresentation {
    fn spawn_remote(&mut self, _id: &PlayerId, _pose: RenderPose) {}
    fn despawn_remote(&mut self, _id: &PlayerId) {}
    fn switch_activity(&mut self, _actor: Actor<'_>, _from: Activity, _to: Activity) {}
}

/// One recorded call on a [`RecordingPresentation`].
#[derive(Debug, Clone, PartialEq)]
pub enum PresentationEvent {
    Spawn(PlayerId, RenderPose),
    Despawn(PlayerId),
    /// `None` is the local player.
    Activity(Option<PlayerId>, Activity, Activity),
}

/// Sink that records every call, for tests and debugging.
#[derive(Debug, Default)]
pub struct RecordingPresentation {
    pub events: Vec<PresentationEvent>,
}

impl RecordingPresentation {
    pub fn take(&mut self) -> Vec<PresentationEvent> {
        std::mem::take(&mut self.events)
    }
}

impl PresentationSink for RecordingPresentation {
    fn spawn_remote(&mut self, id: &PlayerId, pose: RenderPose) {
        self.events.push(PresentationEvent::Spawn(id.clone(), pose));
    }

    fn despawn_remote(&mut self, id: &PlayerId) {
        self.events.push(PresentationEvent::Despawn(id.clone()));
    }

    fn switch_activity(&mut self, actor: Actor<'_>, from: Activity, to: Activity) {
        let who = match actor {
            Actor::Local => None,
            Actor::Remote(id) => Some(id.clone()),
        };
        self.events.push(PresentationEvent::Activity(who, from, to));
    }
}
