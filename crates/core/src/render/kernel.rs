//! CPU evaluation of the fragment stages in `feedback.wgsl`. Keep the two in
//! lockstep: every constant here has a twin in the shader.

use std::f32::consts::TAU;

use glam::{Vec2, Vec3};

use super::device::FeedbackUniforms;
use crate::scene::ShaderMode;

const GRID_CELLS: f32 = 6.0;

/// Per-pixel feedback colour for the normalised coordinate `uv`.
///
/// `sample` reads the previous frame at a (possibly out of range) uv.
pub fn shade_feedback(uv: Vec2, u: &FeedbackUniforms, sample: impl Fn(Vec2) -> Vec3) -> Vec3 {
    let aspect = u.resolution[0] / u.resolution[1].max(1.0);
    let scale = Vec2::new(aspect, 1.0);
    let p = (uv - Vec2::splat(0.5)) * scale;
    let r = p.length();
    let e = u.energy;
    let t = u.time;

    let warped = warp(u.mode, p, t, e) / scale + Vec2::splat(0.5);
    let prev = sample(warped) * u.decay;

    let mut col = palette(u, r * 1.2 + t * 0.07 + e * 0.5);
    match u.mode {
        ShaderMode::Kaleidoscope => {
            col = col * col * (Vec3::splat(3.0) - 2.0 * col);
        }
        ShaderMode::Ripple => {
            let ring = 1.0 - smoothstep(0.0, 0.05, (fract(r * 6.0 - t * 0.5) - 0.5).abs());
            col += Vec3::splat(ring * 0.25 * (0.4 + e));
        }
        ShaderMode::Grid => {
            let g = (p + grid_offset(t)) * GRID_CELLS;
            let edge = (fract(g.x) - 0.5).abs().max((fract(g.y) - 0.5).abs());
            let line = if edge > 0.47 { 1.0 } else { 0.0 };
            col += Vec3::splat(line * 0.2 * (0.5 + e));
        }
        _ => {}
    }
    if u.beat {
        col += Vec3::splat(u.beat_boost);
    }

    let fresh = col * u.mix;
    prev.max(fresh).clamp(Vec3::ZERO, Vec3::ONE)
}

/// Maps a centred, aspect-corrected coordinate to where the previous frame
/// is sampled for the given mode.
pub fn warp(mode: ShaderMode, p: Vec2, t: f32, e: f32) -> Vec2 {
    let r = p.length();
    let a = p.y.atan2(p.x);
    match mode {
        ShaderMode::Swirl => {
            let twist = (0.02 + 0.06 * e) * (1.0 - r).max(0.0) + 0.004 * (t * 0.7).sin();
            rotate(p, twist) * (0.992 - 0.012 * e)
        }
        ShaderMode::Tunnel => polar(r.powf(1.05 + 0.1 * e), a + 0.01 + 0.05 * e),
        ShaderMode::Kaleidoscope => {
            let seg = TAU / kaleidoscope_segments(e);
            let k = a + t * 0.1;
            let folded = ((k - seg * (k / seg).floor()) - seg * 0.5).abs();
            polar(r * 0.985, folded)
        }
        ShaderMode::Ripple => {
            let rr = r + 0.008 * (0.5 + e) * (r * 28.0 - t * 4.0).sin();
            polar(rr * 0.994, a)
        }
        ShaderMode::Spiral => {
            let spin = 0.03 + 0.06 * e + 0.015 * r.max(0.001).ln();
            polar(r * (0.975 - 0.02 * e), a + spin)
        }
        ShaderMode::Grid => {
            let off = grid_offset(t);
            let g = (p + off) * GRID_CELLS;
            let cell = g.floor();
            let f = g - cell - Vec2::splat(0.5);
            (cell + Vec2::splat(0.5) + f * 0.985) / GRID_CELLS - off
        }
    }
}

/// Mirrored segment count of the kaleidoscope fold.
pub fn kaleidoscope_segments(energy: f32) -> f32 {
    5.0 + (10.0 * energy).floor()
}

fn palette(u: &FeedbackUniforms, t: f32) -> Vec3 {
    let a = Vec3::from_array(u.palette.a);
    let b = Vec3::from_array(u.palette.b);
    let c = Vec3::from_array(u.palette.c);
    let d = Vec3::from_array(u.palette.d);
    let phase = (c * t + d) * TAU;
    a + b * Vec3::new(phase.x.cos(), phase.y.cos(), phase.z.cos())
}

fn grid_offset(t: f32) -> Vec2 {
    Vec2::new(t * 0.02, t * 0.013)
}

fn polar(r: f32, a: f32) -> Vec2 {
    Vec2::new(a.cos(), a.sin()) * r
}

fn rotate(p: Vec2, a: f32) -> Vec2 {
    let (s, c) = a.sin_cos();
    Vec2::new(p.x * c - p.y * s, p.x * s + p.y * c)
}

// WGSL fract, which differs from f32::fract for negative input.
fn fract(x: f32) -> f32 {
    x - x.floor()
}

fn smoothstep(edge0: f32, edge1: f32, x: f32) -> f32 {
    let t = ((x - edge0) / (edge1 - edge0)).clamp(0.0, 1.0);
    t * t * (3.0 - 2.0 * t)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::palette::Palette;

    fn uniforms(mode: ShaderMode) -> FeedbackUniforms {
        FeedbackUniforms {
            resolution: [64.0, 64.0],
            time: 1.0,
            energy: 0.5,
            bass: 0.3,
            beat: false,
            decay: 0.98,
            mix: 0.4,
            beat_boost: 0.12,
            mode,
            palette: Palette::DEFAULT,
        }
    }

    #[test]
    fn every_mode_warps_differently() {
        let p = Vec2::new(0.21, -0.13);
        let warped: Vec<Vec2> = [
            ShaderMode::Swirl,
            ShaderMode::Tunnel,
            ShaderMode::Kaleidoscope,
            ShaderMode::Ripple,
            ShaderMode::Spiral,
            ShaderMode::Grid,
        ]
        .iter()
        .map(|&mode| warp(mode, p, 2.0, 0.6))
        .collect();

        for i in 0..warped.len() {
            for j in (i + 1)..warped.len() {
                assert!(warped[i].distance(warped[j]) > 1e-5, "modes {i} and {j} coincide");
            }
        }
    }

    #[test]
    fn kaleidoscope_segments_follow_energy() {
        assert_eq!(kaleidoscope_segments(0.0), 5.0);
        assert_eq!(kaleidoscope_segments(0.55), 10.0);
        assert_eq!(kaleidoscope_segments(1.0), 15.0);
    }

    #[test]
    fn tunnel_spins_faster_with_energy() {
        let p = Vec2::new(0.3, 0.0);
        let calm = warp(ShaderMode::Tunnel, p, 0.0, 0.0);
        let loud = warp(ShaderMode::Tunnel, p, 0.0, 1.0);
        assert!(loud.y.atan2(loud.x) > calm.y.atan2(calm.x));
    }

    #[test]
    fn bright_history_decays_but_survives_the_max() {
        let u = uniforms(ShaderMode::Swirl);
        let out = shade_feedback(Vec2::new(0.5, 0.5), &u, |_| Vec3::ONE);
        assert!((out.x - 0.98).abs() < 1e-5);
        assert!(out.max_element() <= 1.0);
    }

    #[test]
    fn dark_history_takes_the_fresh_colour() {
        let u = uniforms(ShaderMode::Ripple);
        let out = shade_feedback(Vec2::new(0.2, 0.7), &u, |_| Vec3::ZERO);
        assert!(out.max_element() > 0.0);
        assert!(out.max_element() <= 1.0);
    }

    #[test]
    fn beat_adds_flat_boost() {
        let mut u = uniforms(ShaderMode::Spiral);
        let calm = shade_feedback(Vec2::new(0.3, 0.3), &u, |_| Vec3::ZERO);
        u.beat = true;
        let hit = shade_feedback(Vec2::new(0.3, 0.3), &u, |_| Vec3::ZERO);
        let expected = (calm.x + u.beat_boost * u.mix).min(1.0);
        assert!((hit.x - expected).abs() < 1e-4);
    }

    #[test]
    fn fract_matches_shader_semantics() {
        assert!((fract(-0.25) - 0.75).abs() < 1e-6);
        assert!((fract(1.25) - 0.25).abs() < 1e-6);
    }
}
