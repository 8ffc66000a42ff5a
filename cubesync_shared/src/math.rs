//! Math types.
//!
//! Only what the replicated player state needs: a position vector and an RGB
//! color. Both serialize as field-tagged JSON objects.

use serde::{Deserialize, Serialize};

/// 3D vector.
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
}

/// Linear RGB color, each channel in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const WHITE: Self = Self::new(1.0, 1.0, 1.0);

    pub const fn new(r: f32, g: f32, b: f32) -> Self {
        Self { r, g, b }
    }

    /// Builds a color with every channel clamped into `[0, 1]`.
    pub fn clamped(r: f32, g: f32, b: f32) -> Self {
        Self::new(r.clamp(0.0, 1.0), g.clamp(0.0, 1.0), b.clamp(0.0, 1.0))
    }
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_and_color_wire_shape() {
        let v = serde_json::to_string(&Vec3::new(1.0, 2.0, 3.0)).unwrap();
        assert_eq!(v, r#"{"x":1.0,"y":2.0,"z":3.0}"#);
        let c: Color = serde_json::from_str(r#"{"r":0.5,"g":0.0,"b":1.0}"#).unwrap();
        assert_eq!(c, Color::new(0.5, 0.0, 1.0));
    }

    #[test]
    fn color_clamps_out_of_range_channels() {
        let c = Color::clamped(-0.5, 0.25, 3.0);
        assert_eq!(c, Color::new(0.0, 0.25, 1.0));
    }
}
