//! Math types.
//!
//! This module intentionally stays small and deterministic.
//! It avoids SIMD/unsafe and focuses on stable semantics: every operation
//! is plain `f32` arithmetic evaluated in a fixed order, so the client and
//! the authoritative world produce bit-identical results for the same inputs.

use std::f32::consts::{PI, TAU};
use std::ops::{Add, Mul, Sub};

use serde::{Deserialize, Serialize};

/// 3D vector. Serializes as `{x, y, z}`, which is also the wire shape.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self {
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn dot(self, rhs: Self) -> f32 {
        self.x * rhs.x + self.y * rhs.y + self.z * rhs.z
    }

    pub fn len_sq(self) -> f32 {
        self.dot(self)
    }

    pub fn len(self) -> f32 {
        self.len_sq().sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        (other - self).len()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }

    /// Linear interpolation; `t` is clamped to $[0,1]$.
    pub fn lerp(self, to: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        Self::new(
            self.x + (to.x - self.x) * t,
            self.y + (to.y - self.y) * t,
            self.z + (to.z - self.z) * t,
        )
    }
}

impl Add for Vec3 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Mul<f32> for Vec3 {
    type Output = Self;

    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs, self.z * rhs)
    }
}

/// Wraps an angle difference into $(-\pi, \pi]$.
pub fn wrap_angle(delta: f32) -> f32 {
    let mut d = delta % TAU;
    if d > PI {
        d -= TAU;
    } else if d <= -PI {
        d += TAU;
    }
    d
}

/// Interpolates yaw along the shortest angular path.
pub fn lerp_angle(from: f32, to: f32, t: f32) -> f32 {
    from + wrap_angle(to - from) * t
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec3_lerp_midpoint() {
        let a = Vec3::new(0.0, 0.0, 0.0);
        let b = Vec3::new(2.0, 4.0, 6.0);
        let mid = a.lerp(b, 0.5);
        assert_eq!(mid, Vec3::new(1.0, 2.0, 3.0));
    }

    #[test]
    fn vec3_lerp_clamps_alpha() {
        let a = Vec3::new(1.0, 1.0, 1.0);
        let b = Vec3::new(3.0, 3.0, 3.0);
        assert_eq!(a.lerp(b, 2.0), b);
        assert_eq!(a.lerp(b, -1.0), a);
    }

    #[test]
    fn wrap_angle_takes_short_way_round() {
        let d = wrap_angle(-3.0 - 3.0);
        assert!((d - (TAU - 6.0)).abs() < 1e-5, "got {d}");
        assert!((wrap_angle(PI) - PI).abs() < 1e-6);
        assert!((wrap_angle(-PI) - PI).abs() < 1e-6);
        assert_eq!(wrap_angle(0.5), 0.5);
    }

    #[test]
    fn lerp_angle_crosses_pi() {
        let r = lerp_angle(3.0, -3.0, 0.5);
        let expected = 3.0 + (TAU - 6.0) * 0.5;
        assert!((r - expected).abs() < 1e-5, "got {r}");
    }
}
