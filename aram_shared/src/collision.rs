//! Axis-separated AABB collision against static world geometry.
//!
//! The player hull is an axis-aligned box anchored at its feet; obstacles
//! are cubes. Resolution is greedy: when several obstacles overlap the hull,
//! only the nearest one along the direction of travel is used to push the
//! hull out. After the push the hull may still overlap another obstacle;
//! that is a known limitation for tightly packed geometry.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::math::Vec3;

/// Half-extent of every obstacle cube on all three axes.
pub const OBSTACLE_HALF_EXTENT: f32 = 2.5;

/// Player hull half-width along X.
pub const HULL_HALF_WIDTH: f32 = 1.0;
/// Player hull half-depth along Z.
pub const HULL_HALF_DEPTH: f32 = 0.5;
/// Player hull height above its feet.
pub const HULL_HEIGHT: f32 = 4.5;

/// Axis-aligned bounding box.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Aabb {
    pub min: Vec3,
    pub max: Vec3,
}

impl Aabb {
    /// Hull of an entity whose feet are at `position`.
    pub fn hull(position: Vec3) -> Self {
        Self {
            min: Vec3::new(
                position.x - HULL_HALF_WIDTH,
                position.y,
                position.z - HULL_HALF_DEPTH,
            ),
            max: Vec3::new(
                position.x + HULL_HALF_WIDTH,
                position.y + HULL_HEIGHT,
                position.z + HULL_HALF_DEPTH,
            ),
        }
    }

    /// Strict overlap test: boxes that only touch do not intersect.
    pub fn intersects(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && self.max.x > other.min.x
            && self.min.y < other.max.y
            && self.max.y > other.min.y
            && self.min.z < other.max.z
            && self.max.z > other.min.z
    }
}

/// A static cube in the world.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Obstacle {
    pub center: Vec3,
}

impl Obstacle {
    pub const fn new(center: Vec3) -> Self {
        Self { center }
    }

    pub fn bounds(&self) -> Aabb {
        let h = OBSTACLE_HALF_EXTENT;
        Aabb {
            min: Vec3::new(self.center.x - h, self.center.y - h, self.center.z - h),
            max: Vec3::new(self.center.x + h, self.center.y + h, self.center.z + h),
        }
    }
}

/// Immutable world geometry, shared read-only between physics calls.
#[derive(Debug, Clone, Default)]
pub struct ObstacleSet {
    obstacles: Arc<[Obstacle]>,
}

impl ObstacleSet {
    pub fn new(obstacles: impl IntoIterator<Item = Obstacle>) -> Self {
        Self {
            obstacles: obstacles.into_iter().collect(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.obstacles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.obstacles.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Obstacle> {
        self.obstacles.iter()
    }

    /// Obstacles overlapping the hull of an entity at `position`.
    pub fn intersecting(&self, position: Vec3) -> impl Iterator<Item = Aabb> + '_ {
        let hull = Aabb::hull(position);
        self.obstacles
            .iter()
            .map(Obstacle::bounds)
            .filter(move |b| hull.intersects(b))
    }
}

/// Result of resolving the vertical axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VerticalResolution {
    pub y: f32,
    pub velocity_y: f32,
    pub on_ground: bool,
}

/// Picks the blocking obstacle for a move of sign `delta` along one axis.
///
/// Moving positive picks the smallest lower bound, otherwise the largest
/// upper bound. Returns `(min, max)` of the chosen obstacle on that axis.
fn blocking<F>(hits: impl Iterator<Item = Aabb>, delta: f32, axis: F) -> Option<(f32, f32)>
where
    F: Fn(Vec3) -> f32,
{
    let spans = hits.map(|b| (axis(b.min), axis(b.max)));
    if delta > 0.0 {
        spans.reduce(|best, s| if s.0 < best.0 { s } else { best })
    } else {
        spans.reduce(|best, s| if s.1 > best.1 { s } else { best })
    }
}

/// Resolves `position.x` after a move of `dx`.
pub fn resolve_x(position: Vec3, dx: f32, world: &ObstacleSet) -> Vec3 {
    match blocking(world.intersecting(position), dx, |v| v.x) {
        None => position,
        Some((min, max)) => {
            let x = if dx > 0.0 {
                min - HULL_HALF_WIDTH
            } else {
                max + HULL_HALF_WIDTH
            };
            Vec3 { x, ..position }
        }
    }
}

/// Resolves `position.z` after a move of `dz`.
pub fn resolve_z(position: Vec3, dz: f32, world: &ObstacleSet) -> Vec3 {
    match blocking(world.intersecting(position), dz, |v| v.z) {
        None => position,
        Some((min, max)) => {
            let z = if dz > 0.0 {
                min - HULL_HALF_DEPTH
            } else {
                max + HULL_HALF_DEPTH
            };
            Vec3 { z, ..position }
        }
    }
}

/// Resolves `position.y` after a move of `dy` with vertical velocity `vy`.
///
/// With nothing in the way the implicit floor at `y = 0` applies.
pub fn resolve_y(position: Vec3, dy: f32, vy: f32, world: &ObstacleSet) -> VerticalResolution {
    match blocking(world.intersecting(position), dy, |v| v.y) {
        None if position.y < 0.0 => VerticalResolution {
            y: 0.0,
            velocity_y: 0.0,
            on_ground: true,
        },
        None => VerticalResolution {
            y: position.y,
            velocity_y: vy,
            on_ground: false,
        },
        // Head hit the underside.
        Some((min, _)) if dy > 0.0 => VerticalResolution {
            y: min - HULL_HEIGHT,
            velocity_y: vy,
            on_ground: false,
        },
        Some((_, max)) => VerticalResolution {
            y: max,
            velocity_y: 0.0,
            on_ground: true,
        },
    }
}
