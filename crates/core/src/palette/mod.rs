//! Track-derived colour palettes for the cosine colour function
//! `color(t) = a + b * cos(2π (c * t + d))`.

use std::f32::consts::TAU;

use image::imageops::FilterType;
use serde::{Deserialize, Serialize};

use crate::{assets::ArtworkFetcher, config::PaletteTuning, Result, VisualError};

pub type Rgb = [f32; 3];

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub a: Rgb,
    pub b: Rgb,
    pub c: Rgb,
    pub d: Rgb,
}

impl Palette {
    /// Used until a track palette has been derived.
    pub const DEFAULT: Self = Self {
        a: [0.5, 0.5, 0.5],
        b: [0.5, 0.5, 0.5],
        c: [1.0, 1.0, 1.0],
        d: [0.0, 0.33, 0.67],
    };

    pub fn new(a: Rgb, b: Rgb, c: Rgb, d: Rgb) -> Self {
        Self { a, b, c, d }
    }

    /// Evaluates the cosine colour function, clamped to displayable range.
    pub fn color_at(&self, t: f32) -> Rgb {
        std::array::from_fn(|i| {
            (self.a[i] + self.b[i] * (TAU * (self.c[i] * t + self.d[i])).cos()).clamp(0.0, 1.0)
        })
    }

    /// Palette built around a base colour and its rotated accent.
    pub fn from_base(base: Rgb) -> Self {
        let accent = accent_of(base);
        Self {
            a: [0.42; 3],
            b: [0.34; 3],
            c: base.map(|v| v * 1.1),
            d: accent.map(|v| v * 0.8),
        }
    }

    /// Deterministic palette for tracks without usable artwork.
    pub fn from_seed(seed: &str) -> Self {
        Self::from_base(seed_color(seed))
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::DEFAULT
    }
}

/// Derives palettes from artwork, falling back to the seed hash on any
/// load or decode failure.
pub struct PaletteDeriver<F> {
    fetcher: F,
    tuning: PaletteTuning,
}

impl<F: ArtworkFetcher> PaletteDeriver<F> {
    pub fn new(fetcher: F, tuning: PaletteTuning) -> Self {
        Self { fetcher, tuning }
    }

    pub fn derive(&self, image_url: Option<&str>, seed: &str) -> Palette {
        let Some(url) = image_url else {
            return Palette::from_seed(seed);
        };
        match self.artwork_color(url) {
            Ok(base) => Palette::from_base(base),
            Err(err) => {
                tracing::warn!(%err, url, "artwork palette unavailable, using seed colour");
                Palette::from_seed(seed)
            }
        }
    }

    fn artwork_color(&self, url: &str) -> Result<Rgb> {
        let bytes = self.fetcher.fetch(url)?;
        average_color(&bytes, &self.tuning)
    }
}

/// Averages the opaque pixels of an encoded image after downsampling it to
/// a `grid × grid` thumbnail.
pub fn average_color(bytes: &[u8], tuning: &PaletteTuning) -> Result<Rgb> {
    let grid = tuning.grid.max(1);
    let image = image::load_from_memory(bytes)?;
    let thumb = image.resize_exact(grid, grid, FilterType::Triangle).to_rgba8();
    let min_alpha = (tuning.min_alpha.clamp(0.0, 1.0) * 255.0).round() as u8;

    let mut sum = [0_u64; 3];
    let mut count = 0_u64;
    for pixel in thumb.pixels() {
        let [r, g, b, a] = pixel.0;
        if a < min_alpha {
            continue;
        }
        sum[0] += u64::from(r);
        sum[1] += u64::from(g);
        sum[2] += u64::from(b);
        count += 1;
    }

    if count == 0 {
        return Err(VisualError::InvalidInput("artwork has no opaque pixels"));
    }
    Ok(sum.map(|channel| channel as f32 / count as f32 / 255.0))
}

/// 32-bit FNV-1a.
pub fn fnv1a(text: &str) -> u32 {
    text.bytes().fold(0x811c_9dc5_u32, |hash, byte| {
        (hash ^ u32::from(byte)).wrapping_mul(0x0100_0193)
    })
}

/// Hue in `[0, 360)` chosen by the seed hash.
pub fn seed_hue(seed: &str) -> f32 {
    (fnv1a(seed) % 360) as f32
}

fn seed_color(seed: &str) -> Rgb {
    hsl_to_rgb(seed_hue(seed), 0.65, 0.52)
}

fn accent_of(base: Rgb) -> Rgb {
    let (h, s, l) = rgb_to_hsl(base);
    hsl_to_rgb((h + 35.0) % 360.0, (s + 0.1).min(0.9), (l + 0.05).min(0.75))
}

/// Converts RGB in `[0, 1]` to (hue degrees, saturation, lightness).
pub fn rgb_to_hsl([r, g, b]: Rgb) -> (f32, f32, f32) {
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;
    if (max - min).abs() <= f32::EPSILON {
        return (0.0, 0.0, l);
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };
    (h * 60.0, s, l)
}

pub fn hsl_to_rgb(h: f32, s: f32, l: f32) -> Rgb {
    if s <= 0.0 {
        return [l; 3];
    }
    let h = h.rem_euclid(360.0) / 360.0;
    let q = if l < 0.5 { l * (1.0 + s) } else { l + s - l * s };
    let p = 2.0 * l - q;
    [
        hue_channel(p, q, h + 1.0 / 3.0),
        hue_channel(p, q, h),
        hue_channel(p, q, h - 1.0 / 3.0),
    ]
}

fn hue_channel(p: f32, q: f32, t: f32) -> f32 {
    let t = t.rem_euclid(1.0);
    if t < 1.0 / 6.0 {
        p + (q - p) * 6.0 * t
    } else if t < 0.5 {
        q
    } else if t < 2.0 / 3.0 {
        p + (q - p) * (2.0 / 3.0 - t) * 6.0
    } else {
        p
    }
}
