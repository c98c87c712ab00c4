//! Interpolation.
//!
//! The server sends discrete snapshots; the client renders at its own rate.
//! Remote players are drawn a fixed delay behind real time, between the two
//! received samples that bracket that moment, so their motion stays smooth
//! while updates arrive in steps.

use std::collections::{BTreeMap, VecDeque};

use aram_shared::{
    config::ClientConfig,
    math::{lerp_angle, Vec3},
    net::{PlayerId, RemoteSample},
    render::{Activity, Actor, PresentationSink, RenderPose},
};
use tracing::{debug, info, trace};

/// One received pose, stamped with its local receipt time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HistorySample {
    pub time_ms: f64,
    pub position: Vec3,
    pub yaw: f32,
}

/// Result of sampling a history.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interpolated {
    pub pose: RenderPose,
    /// Speed between the bracketing samples in units/s; 0 with one sample.
    pub speed: f32,
}

/// Receipt-ordered poses of one remote player.
#[derive(Debug, Clone, Default)]
pub struct RemoteEntityHistory {
    samples: VecDeque<HistorySample>,
}

impl RemoteEntityHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a sample, keeping timestamps strictly increasing.
    ///
    /// A sample at the same time as the newest one replaces it; an older
    /// sample is ignored and `false` is returned.
    pub fn push(&mut self, sample: HistorySample) -> bool {
        match self.samples.back_mut() {
            Some(last) if sample.time_ms < last.time_ms => false,
            Some(last) if sample.time_ms == last.time_ms => {
                *last = sample;
                true
            }
            _ => {
                self.samples.push_back(sample);
                true
            }
        }
    }

    /// Drops samples at or before `now_ms - retention_ms`.
    pub fn prune(&mut self, now_ms: f64, retention_ms: f64) -> usize {
        let cutoff = now_ms - retention_ms;
        let mut dropped = 0;
        while self.samples.front().is_some_and(|s| s.time_ms <= cutoff) {
            self.samples.pop_front();
            dropped += 1;
        }
        dropped
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn latest(&self) -> Option<&HistorySample> {
        self.samples.back()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HistorySample> {
        self.samples.iter()
    }

    /// Pose at `render_time_ms`, clamped to the buffered range.
    pub fn sample(&self, render_time_ms: f64) -> Option<Interpolated> {
        let n = self.samples.len();
        if n < 2 {
            return self.samples.front().map(|s| Interpolated {
                pose: RenderPose {
                    position: s.position,
                    rotation_y: s.yaw,
                },
                speed: 0.0,
            });
        }

        let (i, alpha) = if render_time_ms < self.samples[0].time_ms {
            (0, 0.0)
        } else if render_time_ms >= self.samples[n - 1].time_ms {
            (n - 2, 1.0)
        } else {
            // The checks above guarantee a bracketing pair exists.
            let i = (0..n - 1)
                .find(|&i| {
                    self.samples[i].time_ms <= render_time_ms
                        && render_time_ms < self.samples[i + 1].time_ms
                })
                .unwrap_or(n - 2);
            let (t0, t1) = (self.samples[i].time_ms, self.samples[i + 1].time_ms);
            (i, ((render_time_ms - t0) / (t1 - t0)) as f32)
        };

        let a = &self.samples[i];
        let b = &self.samples[i + 1];

        let dt_sec = (b.time_ms - a.time_ms) / 1000.0;
        let speed = if dt_sec > 0.0 {
            (b.position - a.position).len() / dt_sec as f32
        } else {
            0.0
        };

        Some(Interpolated {
            pose: RenderPose {
                position: a.position.lerp(b.position, alpha),
                rotation_y: lerp_angle(a.yaw, b.yaw, alpha),
            },
            speed,
        })
    }
}

/// A remote player as tracked by the client.
#[derive(Debug, Clone)]
pub struct RemoteEntity {
    pub id: PlayerId,
    pub history: RemoteEntityHistory,
    pub activity: Activity,
}

/// Rendered state of one remote player for the current frame.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteView {
    pub id: PlayerId,
    pub pose: RenderPose,
    pub activity: Activity,
}

/// Interpolation tunables.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpSettings {
    pub delay_ms: f64,
    pub retention_ms: f64,
    pub walk_speed_threshold: f32,
}

impl From<&ClientConfig> for InterpSettings {
    fn from(cfg: &ClientConfig) -> Self {
        Self {
            delay_ms: cfg.interpolation_delay_ms,
            retention_ms: cfg.history_retention_ms,
            walk_speed_threshold: cfg.walk_speed_threshold,
        }
    }
}

impl Default for InterpSettings {
    fn default() -> Self {
        Self::from(&ClientConfig::default())
    }
}

/// Tracks every remote player and produces their per-frame poses.
#[derive(Debug, Default)]
pub struct RemoteInterpolator {
    settings: InterpSettings,
    entities: BTreeMap<PlayerId, RemoteEntity>,
}

impl RemoteInterpolator {
    pub fn new(settings: InterpSettings) -> Self {
        Self {
            settings,
            entities: BTreeMap::new(),
        }
    }

    pub fn settings(&self) -> &InterpSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, id: &PlayerId) -> Option<&RemoteEntity> {
        self.entities.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &PlayerId> {
        self.entities.keys()
    }

    /// Records a received pose, creating the entity on first sight.
    pub fn observe(&mut self, sample: &RemoteSample, received_ms: f64, sink: &mut dyn PresentationSink) {
        let entry = HistorySample {
            time_ms: received_ms,
            position: sample.position,
            yaw: sample.yaw,
        };

        match self.entities.get_mut(&sample.id) {
            Some(entity) => {
                if !entity.history.push(entry) {
                    debug!(player_id = %sample.id, time_ms = received_ms, "Dropped out-of-order remote sample");
                }
                let pruned = entity.history.prune(received_ms, self.settings.retention_ms);
                if pruned > 0 {
                    trace!(player_id = %sample.id, pruned, "Pruned remote history");
                }
            }
            None => {
                info!(player_id = %sample.id, "Remote player appeared");
                let mut history = RemoteEntityHistory::new();
                history.push(entry);
                sink.spawn_remote(
                    &sample.id,
                    RenderPose {
                        position: sample.position,
                        rotation_y: sample.yaw,
                    },
                );
                self.entities.insert(
                    sample.id.clone(),
                    RemoteEntity {
                        id: sample.id.clone(),
                        history,
                        activity: Activity::Idle,
                    },
                );
            }
        }
    }

    /// Applies a full roster: records every listed pose and removes every
    /// tracked entity the roster no longer lists.
    pub fn apply_roster(&mut self, remotes: &[RemoteSample], received_ms: f64, sink: &mut dyn PresentationSink) {
        for sample in remotes {
            self.observe(sample, received_ms, sink);
        }

        let gone: Vec<PlayerId> = self
            .entities
            .keys()
            .filter(|id| !remotes.iter().any(|r| &r.id == *id))
            .cloned()
            .collect();
        for id in gone {
            self.remove(&id, sink);
        }
    }

    /// Forgets an entity and releases its render resources.
    pub fn remove(&mut self, id: &PlayerId, sink: &mut dyn PresentationSink) -> bool {
        if self.entities.remove(id).is_some() {
            info!(player_id = %id, "Remote player left");
            sink.despawn_remote(id);
            true
        } else {
            false
        }
    }

    /// Drops every entity, e.g. on teardown.
    pub fn clear(&mut self, sink: &mut dyn PresentationSink) {
        for id in self.entities.keys() {
            sink.despawn_remote(id);
        }
        self.entities.clear();
    }

    /// Computes this frame's pose and activity for every remote player.
    pub fn frame(&mut self, now_ms: f64, sink: &mut dyn PresentationSink) -> Vec<RemoteView> {
        let render_time = now_ms - self.settings.delay_ms;
        let threshold = self.settings.walk_speed_threshold;
        let mut views = Vec::with_capacity(self.entities.len());

        for entity in self.entities.values_mut() {
            let Some(interp) = entity.history.sample(render_time) else {
                continue;
            };
            let activity = if interp.speed > threshold {
                Activity::Walking
            } else {
                Activity::Idle
            };
            if activity != entity.activity {
                sink.switch_activity(Actor::Remote(&entity.id), entity.activity, activity);
                entity.activity = activity;
            }
            views.push(RemoteView {
                id: entity.id.clone(),
                pose: interp.pose,
                activity,
            });
        }
        views
    }
}
