use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{scene::SHADER_MODE_COUNT, Result};

/// Top-level configuration structure for the visual engine.
///
/// Every tuning constant the engine uses lives here. The values are aesthetic
/// choices rather than derived quantities, so hosts may override any of them
/// from a JSON file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyser: AnalyserConfig,
    pub energy: EnergyTuning,
    pub feedback: FeedbackTuning,
    pub fallback: FallbackTuning,
    pub overlay: OverlayTuning,
    pub palette: PaletteTuning,
    pub accent: AccentTuning,
    pub engine: ActivationConfig,
}

impl EngineConfig {
    /// Reads a JSON config file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = match std::fs::read_to_string(path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(?path, "config file missing, using defaults");
                return Ok(Self::default());
            }
            Err(err) => return Err(err.into()),
        };
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        Ok(())
    }
}

/// Settings of the live spectral analyser feeding the energy extractor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalyserConfig {
    pub fft_size: usize,
    pub smoothing: f32,
    pub min_decibels: f32,
    pub max_decibels: f32,
    pub sample_rate: u32,
}

impl Default for AnalyserConfig {
    fn default() -> Self {
        Self {
            fft_size: 256,
            smoothing: 0.8,
            min_decibels: -100.0,
            max_decibels: -30.0,
            sample_rate: 44_100,
        }
    }
}

/// Loudness gains and beat detector constants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnergyTuning {
    pub overall_gain: f32,
    pub bass_gain: f32,
    pub bass_cutoff_hz: f32,
    pub min_bass_bins: usize,
    pub ema_alpha: f32,
    pub beat_threshold: f32,
    pub beat_cooldown_ms: f64,
}

impl Default for EnergyTuning {
    fn default() -> Self {
        Self {
            overall_gain: 1.3,
            bass_gain: 1.4,
            bass_cutoff_hz: 200.0,
            min_bass_bins: 4,
            ema_alpha: 0.12,
            beat_threshold: 0.12,
            beat_cooldown_ms: 200.0,
        }
    }
}

/// Constants of the ping-pong feedback renderer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackTuning {
    pub max_pixel_ratio: f32,
    pub mix_base: f32,
    pub mix_energy: f32,
    pub beat_boost: f32,
    /// Feedback decay per shader mode, indexed by `ShaderMode::index`.
    pub decay: [f32; SHADER_MODE_COUNT],
}

impl Default for FeedbackTuning {
    fn default() -> Self {
        Self {
            max_pixel_ratio: 2.0,
            mix_base: 0.18,
            mix_energy: 0.55,
            beat_boost: 0.12,
            decay: [0.985, 0.975, 0.970, 0.988, 0.980, 0.992],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FallbackTuning {
    pub particle_count: usize,
    pub particle_lifetime: u32,
    pub bar_count: usize,
}

impl Default for FallbackTuning {
    fn default() -> Self {
        Self {
            particle_count: 120,
            particle_lifetime: 1200,
            bar_count: 48,
        }
    }
}

/// Scheduling and lifetime constants for the pulse overlay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayTuning {
    pub density: f32,
    /// Anchor indices that surges fan out from.
    pub surge_origins: Vec<usize>,
    pub max_pulses: usize,
    pub pulse_lifetime_ms: f64,
    pub surge_lifetime_ms: f64,
    pub surge_cooldown_ms: f64,
    pub base_interval_ms: f64,
    pub energy_gate: f32,
    pub jitter_px: f32,
}

impl Default for OverlayTuning {
    fn default() -> Self {
        Self {
            density: 2.0,
            surge_origins: vec![0, 1],
            max_pulses: 300,
            pulse_lifetime_ms: 1000.0,
            surge_lifetime_ms: 420.0,
            surge_cooldown_ms: 180.0,
            base_interval_ms: 1000.0,
            energy_gate: 0.05,
            jitter_px: 60.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PaletteTuning {
    /// Side length of the downsampling grid used to average artwork colour.
    pub grid: u32,
    /// Minimum alpha (0..1) for a pixel to count as opaque.
    pub min_alpha: f32,
}

impl Default for PaletteTuning {
    fn default() -> Self {
        Self {
            grid: 24,
            min_alpha: 0.03,
        }
    }
}

/// Timing of the stats-background boost that follows detected beats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccentTuning {
    pub boost_cooldown_ms: f64,
    pub boost_hold_ms: f64,
}

impl Default for AccentTuning {
    fn default() -> Self {
        Self {
            boost_cooldown_ms: 220.0,
            boost_hold_ms: 160.0,
        }
    }
}

/// Which backdrop implementation the engine should try to activate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RendererChoice {
    /// Shader renderer when shading is available, otherwise the 2D renderer.
    #[default]
    Auto,
    Shader,
    Canvas2d,
    None,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ActivationConfig {
    pub renderer: RendererChoice,
    /// Preference key under which the selected mode index is persisted.
    pub mode_key: String,
}

impl Default for ActivationConfig {
    fn default() -> Self {
        Self {
            renderer: RendererChoice::Auto,
            mode_key: "backdrop_mode".to_string(),
        }
    }
}
