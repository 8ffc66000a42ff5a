//! Input handling.
//!
//! There is no window or keyboard here, so the binary drives the local player
//! from a scripted input source instead. Axes follow the usual game-controller
//! convention: each in `[-1, 1]`, mapped onto the XZ plane.

use cubesync_shared::{math::Vec3, message::InputAxes};

/// Default distance covered at full deflection.
pub const DEFAULT_SPEED: f32 = 2.0;

/// Two-axis input at a moment in time.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct InputState {
    pub horizontal: f32,
    pub vertical: f32,
}

impl InputState {
    pub fn new(horizontal: f32, vertical: f32) -> Self {
        Self {
            horizontal: horizontal.clamp(-1.0, 1.0),
            vertical: vertical.clamp(-1.0, 1.0),
        }
    }

    /// Slow circular wander, sampled at `t` seconds.
    pub fn wander(t: f32) -> Self {
        Self::new(t.sin(), (t * 0.7).cos())
    }

    /// Position the axes point at: the player sits at `axes * speed`
    /// rather than accumulating velocity.
    pub fn to_position(self, speed: f32) -> Vec3 {
        Vec3::new(self.horizontal * speed, 0.0, self.vertical * speed)
    }

    pub fn to_axes(self) -> InputAxes {
        InputAxes {
            horizontal: self.horizontal,
            vertical: self.vertical,
        }
    }
}
