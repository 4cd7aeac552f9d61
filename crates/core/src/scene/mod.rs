//! Closed sets of visual modes and the single normalisation rule that maps
//! any stored or requested integer onto them.

use serde::{Deserialize, Serialize};

pub const SHADER_MODE_COUNT: usize = 6;
pub const FALLBACK_MODE_COUNT: usize = 3;

/// A closed enumeration of selectable visual modes.
pub trait ModeSet: Copy + Sized + 'static {
    const COUNT: usize;
    const ALL: &'static [Self];

    fn index(self) -> usize;

    fn name(self) -> &'static str;
}

/// Wraps any integer into `0..M::COUNT`, negative values included.
pub fn normalize_mode<M: ModeSet>(raw: i64) -> M {
    let count = M::COUNT as i64;
    let index = ((raw % count) + count) % count;
    M::ALL[index as usize]
}

/// Coordinate-warp algorithms of the feedback shader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShaderMode {
    #[default]
    Swirl,
    Tunnel,
    Kaleidoscope,
    Ripple,
    Spiral,
    Grid,
}

impl ModeSet for ShaderMode {
    const COUNT: usize = SHADER_MODE_COUNT;
    const ALL: &'static [Self] = &[
        Self::Swirl,
        Self::Tunnel,
        Self::Kaleidoscope,
        Self::Ripple,
        Self::Spiral,
        Self::Grid,
    ];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Swirl => "swirl",
            Self::Tunnel => "tunnel",
            Self::Kaleidoscope => "kaleidoscope",
            Self::Ripple => "ripple",
            Self::Spiral => "spiral",
            Self::Grid => "grid",
        }
    }
}

/// Scenes of the 2D canvas renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FallbackMode {
    #[default]
    Particles,
    Blooms,
    Bars,
}

impl ModeSet for FallbackMode {
    const COUNT: usize = FALLBACK_MODE_COUNT;
    const ALL: &'static [Self] = &[Self::Particles, Self::Blooms, Self::Bars];

    fn index(self) -> usize {
        self as usize
    }

    fn name(self) -> &'static str {
        match self {
            Self::Particles => "particles",
            Self::Blooms => "blooms",
            Self::Bars => "bars",
        }
    }
}
