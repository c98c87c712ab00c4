//! Client session.
//!
//! The session owns everything the render loop needs per local player:
//! - Predicted local state and unacknowledged inputs
//! - Remote player histories for interpolation
//! - Render-side smoothing of the local position
//! - An inbound queue that the transport fills asynchronously and the
//!   session drains once per tick, so a snapshot is always applied whole
//!   between two ticks
//! - An outbound channel that receives one input message per tick

use aram_shared::{
    collision::ObstacleSet,
    config::ClientConfig,
    net::{
        validate_join, validate_snapshot, InputMessage, JoinMessage, NetMsg, PlayerId,
        SnapshotMessage,
    },
    physics::KinematicState,
    render::{Activity, Actor, NullPresentation, PresentationSink, RenderPose},
};
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, info, trace, warn};

use crate::{
    input::{InputSample, InputState},
    interp::{InterpSettings, RemoteInterpolator, RemoteView},
    prediction::{PredictionReconciler, RenderSmoother},
};

/// A notification from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Joined { msg: JoinMessage, received_ms: f64 },
    Snapshot { msg: SnapshotMessage, received_ms: f64 },
    /// The transport lost the connection or the join failed.
    Disconnected { reason: String },
}

/// Handle the transport uses to feed the session.
#[derive(Debug, Clone)]
pub struct InboundSender {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl InboundSender {
    /// Queues a notification. Returns `false` once the session is gone.
    pub fn send(&self, inbound: Inbound) -> bool {
        self.tx.send(inbound).is_ok()
    }

    pub fn joined(&self, msg: JoinMessage, received_ms: f64) -> bool {
        self.send(Inbound::Joined { msg, received_ms })
    }

    pub fn snapshot(&self, msg: SnapshotMessage, received_ms: f64) -> bool {
        self.send(Inbound::Snapshot { msg, received_ms })
    }

    pub fn disconnected(&self, reason: impl Into<String>) -> bool {
        self.send(Inbound::Disconnected {
            reason: reason.into(),
        })
    }

    /// Routes a decoded server message. Client-bound messages only.
    pub fn net(&self, msg: NetMsg, received_ms: f64) -> bool {
        match msg {
            NetMsg::Join(join) => self.joined(join, received_ms),
            NetMsg::UpdatePositions(snap) => self.snapshot(snap, received_ms),
            NetMsg::Move(_) => {
                debug!("Ignoring client-bound Move message");
                false
            }
        }
    }
}

/// Session lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the join reply.
    Joining,
    /// Predicting, reconciling and interpolating.
    Active,
    /// Terminal: tear the session down and join again.
    Desynchronized { reason: String },
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    pub ticks: u64,
    pub snapshots_applied: u64,
    pub rejected: u64,
    pub resyncs: u64,
}

/// What to draw this frame.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameView {
    /// Smoothed local pose.
    pub local: RenderPose,
    pub predicted: KinematicState,
    pub local_activity: Activity,
    pub remotes: Vec<RemoteView>,
}

/// One local player's view of the game.
pub struct ClientSession<P: PresentationSink = NullPresentation> {
    cfg: ClientConfig,
    state: SessionState,
    player_id: Option<PlayerId>,
    prediction: PredictionReconciler,
    remotes: RemoteInterpolator,
    smoother: RenderSmoother,
    local_activity: Activity,
    inbox: mpsc::UnboundedReceiver<Inbound>,
    outbound: mpsc::UnboundedSender<InputMessage>,
    presentation: P,
    stats: SessionStats,
}

impl<P: PresentationSink> ClientSession<P> {
    /// Creates a session waiting for its join reply.
    ///
    /// Returns the session and the sender the transport feeds.
    pub fn new(
        cfg: ClientConfig,
        outbound: mpsc::UnboundedSender<InputMessage>,
        presentation: P,
    ) -> (Self, InboundSender) {
        let (tx, inbox) = mpsc::unbounded_channel();
        let session = Self {
            prediction: PredictionReconciler::new(cfg.physics, ObstacleSet::empty()),
            remotes: RemoteInterpolator::new(InterpSettings::from(&cfg)),
            smoother: RenderSmoother::new(Default::default(), cfg.correction_factor),
            cfg,
            state: SessionState::Joining,
            player_id: None,
            local_activity: Activity::Idle,
            inbox,
            outbound,
            presentation,
            stats: SessionStats::default(),
        };
        (session, InboundSender { tx })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.cfg
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn player_id(&self) -> Option<&PlayerId> {
        self.player_id.as_ref()
    }

    pub fn predicted(&self) -> Option<&KinematicState> {
        self.prediction.predicted()
    }

    pub fn prediction(&self) -> &PredictionReconciler {
        &self.prediction
    }

    pub fn remotes(&self) -> &RemoteInterpolator {
        &self.remotes
    }

    pub fn local_activity(&self) -> Activity {
        self.local_activity
    }

    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    pub fn presentation(&self) -> &P {
        &self.presentation
    }

    pub fn presentation_mut(&mut self) -> &mut P {
        &mut self.presentation
    }

    /// Runs one fixed tick: apply everything received since the last tick,
    /// then predict and send this tick's input.
    pub fn tick(&mut self, input: InputState, now_ms: f64) -> Option<InputSample> {
        self.drain_inbox();
        if !self.is_active() {
            return None;
        }

        let sample = self.prediction.tick(input)?;
        self.stats.ticks += 1;
        if self.outbound.send(sample.to_message()).is_err() {
            trace!(seq = sample.sequence, "Outbound channel closed, input dropped");
        }

        let activity = if input.keys.is_moving() {
            Activity::Walking
        } else {
            Activity::Idle
        };
        if activity != self.local_activity {
            self.presentation
                .switch_activity(Actor::Local, self.local_activity, activity);
            self.local_activity = activity;
        }

        trace!(seq = sample.sequence, now_ms, "Tick");
        Some(sample)
    }

    /// Produces this frame's smoothed local pose and remote poses.
    pub fn render_frame(&mut self, now_ms: f64) -> Option<FrameView> {
        if !self.is_active() {
            return None;
        }
        let predicted = *self.prediction.predicted()?;
        let position = self.smoother.update(predicted.position);
        let remotes = self.remotes.frame(now_ms, &mut self.presentation);

        Some(FrameView {
            local: RenderPose {
                position,
                rotation_y: predicted.yaw,
            },
            predicted,
            local_activity: self.local_activity,
            remotes,
        })
    }

    /// Applies every queued notification in arrival order.
    pub fn drain_inbox(&mut self) {
        loop {
            match self.inbox.try_recv() {
                Ok(inbound) => self.apply(inbound),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    self.desync("inbound queue closed");
                    break;
                }
            }
        }
    }

    fn apply(&mut self, inbound: Inbound) {
        if matches!(self.state, SessionState::Desynchronized { .. }) {
            return;
        }
        match inbound {
            Inbound::Joined { msg, received_ms } => self.apply_join(&msg, received_ms),
            Inbound::Snapshot { msg, received_ms } => self.apply_snapshot(&msg, received_ms),
            Inbound::Disconnected { reason } => self.desync(&reason),
        }
    }

    fn apply_join(&mut self, msg: &JoinMessage, received_ms: f64) {
        if self.state != SessionState::Joining {
            self.desync("received a second join reply");
            return;
        }
        let join = match validate_join(msg) {
            Ok(join) => join,
            Err(e) => {
                warn!(error = %e, "Rejected join reply");
                self.stats.rejected += 1;
                self.desync(&format!("invalid join reply: {e}"));
                return;
            }
        };

        info!(
            player_id = %join.player_id,
            boxes = join.world.len(),
            remotes = join.remotes.len(),
            "Joined game"
        );

        self.prediction = PredictionReconciler::new(self.cfg.physics, join.world);
        self.prediction.seed(join.starting_position);
        self.smoother.snap_to(join.starting_position);
        self.remotes
            .apply_roster(&join.remotes, received_ms, &mut self.presentation);
        self.player_id = Some(join.player_id);
        self.state = SessionState::Active;
    }

    fn apply_snapshot(&mut self, msg: &SnapshotMessage, received_ms: f64) {
        let Some(local_id) = self.player_id.as_ref() else {
            debug!("Snapshot before join reply, ignoring");
            return;
        };
        let snap = match validate_snapshot(msg, local_id) {
            Ok(snap) => snap,
            Err(e) => {
                warn!(error = %e, "Rejected snapshot");
                self.stats.rejected += 1;
                return;
            }
        };

        if let Some(local) = snap.local {
            if let Some(outcome) = self.prediction.reconcile(&local) {
                if outcome.resync {
                    self.stats.resyncs += 1;
                }
            }
        }
        self.remotes
            .apply_roster(&snap.remotes, received_ms, &mut self.presentation);
        self.stats.snapshots_applied += 1;
    }

    fn desync(&mut self, reason: &str) {
        if matches!(self.state, SessionState::Desynchronized { .. }) {
            return;
        }
        warn!(reason, "Session desynchronized");
        self.remotes.clear(&mut self.presentation);
        self.state = SessionState::Desynchronized {
            reason: reason.to_string(),
        };
    }
}
