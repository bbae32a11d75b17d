//! Planar vector math shared by the range model and the protocols.
//!
//! Agents are dimensionless points in a 2-D world, so everything here works on
//! plain `f64` pairs. Every operation that could produce a non-finite value
//! (normalisation of a zero vector, clamping of NaN) has a total fallback.

use std::ops::{Add, AddAssign, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

/// Two positions closer than this are treated as coincident.
pub const COINCIDENT_EPSILON: f64 = 1e-9;

/// Displacement applied to separate coincident agents.
pub const SEPARATION_NUDGE: f64 = 1e-6;

/// Golden angle in radians; spreads fallback directions evenly by id.
const GOLDEN_ANGLE: f64 = 2.399_963_229_728_653;

/// A 2-D vector or position.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f64,
    pub y: f64,
}

impl Vec2 {
    pub const ZERO: Vec2 = Vec2 { x: 0.0, y: 0.0 };

    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Unit vector pointing at `theta` radians from the +x axis.
    pub fn from_angle(theta: f64) -> Self {
        Self::new(theta.cos(), theta.sin())
    }

    pub fn length(self) -> f64 {
        self.x.hypot(self.y)
    }

    pub fn length_squared(self) -> f64 {
        self.x * self.x + self.y * self.y
    }

    pub fn distance(self, other: Vec2) -> f64 {
        (other - self).length()
    }

    pub fn dot(self, other: Vec2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    /// Z component of the 3-D cross product.
    pub fn cross(self, other: Vec2) -> f64 {
        self.x * other.y - self.y * other.x
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }

    pub fn angle(self) -> f64 {
        self.y.atan2(self.x)
    }

    /// Unit vector in the same direction, or `None` for zero/non-finite input.
    pub fn normalized(self) -> Option<Vec2> {
        let len = self.length();
        if !len.is_finite() || len < COINCIDENT_EPSILON {
            return None;
        }
        Some(Vec2::new(self.x / len, self.y / len))
    }

    pub fn normalize_or(self, fallback: Vec2) -> Vec2 {
        self.normalized().unwrap_or(fallback)
    }

    /// Scale down to at most `max` length. Non-finite vectors collapse to zero.
    pub fn clamp_length(self, max: f64) -> Vec2 {
        if !self.is_finite() || !max.is_finite() || max <= 0.0 {
            return Vec2::ZERO;
        }
        let len = self.length();
        if len <= max {
            self
        } else {
            self * (max / len)
        }
    }
}

impl Add for Vec2 {
    type Output = Vec2;

    fn add(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Vec2) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Vec2;

    fn sub(self, rhs: Vec2) -> Vec2 {
        Vec2::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f64> for Vec2 {
    type Output = Vec2;

    fn mul(self, rhs: f64) -> Vec2 {
        Vec2::new(self.x * rhs, self.y * rhs)
    }
}

impl Neg for Vec2 {
    type Output = Vec2;

    fn neg(self) -> Vec2 {
        Vec2::new(-self.x, -self.y)
    }
}

impl From<[f64; 2]> for Vec2 {
    fn from(value: [f64; 2]) -> Self {
        Vec2::new(value[0], value[1])
    }
}

/// Deterministic unit direction for agent `id`, used whenever a direction
/// would otherwise be undefined (coincident points, zero offsets).
pub fn fallback_direction(id: usize) -> Vec2 {
    Vec2::from_angle(id as f64 * GOLDEN_ANGLE)
}

/// Separate coincident positions in place.
///
/// For every pair closer than [`COINCIDENT_EPSILON`] the higher index is nudged
/// by [`SEPARATION_NUDGE`] along its fallback direction. Returns how many
/// nudges were applied.
pub fn separate_coincident(positions: &mut [Vec2]) -> usize {
    let mut nudges = 0;
    // A nudge can in principle land on a third point; a few passes settle it.
    for _ in 0..4 {
        let mut moved = false;
        for j in 1..positions.len() {
            for i in 0..j {
                if positions[i].distance(positions[j]) < COINCIDENT_EPSILON {
                    positions[j] += fallback_direction(j) * SEPARATION_NUDGE;
                    nudges += 1;
                    moved = true;
                }
            }
        }
        if !moved {
            break;
        }
    }
    nudges
}
