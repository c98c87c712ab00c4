//! `aram_shared`
//!
//! Shared libraries used by both the client core and the reference world.
//!
//! Design goals:
//! - Deterministic where it matters: the physics step must give identical
//!   results on client and server for identical inputs.
//! - Clear separation of concerns (math, collision, physics, net, config).
//! - Traits for abstraction at the presentation boundary.
//! - No `unsafe`.

pub mod clock;
pub mod collision;
pub mod config;
pub mod math;
pub mod net;
pub mod physics;
pub mod render;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::collision::{Obstacle, ObstacleSet};
    pub use crate::config::*;
    pub use crate::math::*;
    pub use crate::net::*;
    pub use crate::physics::*;
    pub use crate::render::{Activity, RenderPose};
}
