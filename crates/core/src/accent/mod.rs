//! Secondary page accents that follow the music: a two-layer brand glow and
//! a short "boost" pulse on the stats background.

use crate::{
    analysis::EnergyFrame,
    config::AccentTuning,
    timeline::{Cooldown, Millis},
};

/// Opacities of the two brand glow layers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BrandGlow {
    pub inner: f32,
    pub outer: f32,
}

impl BrandGlow {
    pub const RESTING: Self = Self {
        inner: 0.35,
        outer: 0.15,
    };

    pub fn from_energy(overall: f32) -> Self {
        let e = overall.clamp(0.0, 1.0);
        Self {
            inner: 0.15 + e * 0.55,
            outer: 0.08 + e * 0.35,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AccentDriver {
    playing: bool,
    glow: BrandGlow,
    boost: Cooldown,
    hold: Millis,
}

impl Default for AccentDriver {
    fn default() -> Self {
        Self::new(&AccentTuning::default())
    }
}

impl AccentDriver {
    pub fn new(tuning: &AccentTuning) -> Self {
        Self {
            playing: false,
            glow: BrandGlow::RESTING,
            boost: Cooldown::new(tuning.boost_cooldown_ms),
            hold: tuning.boost_hold_ms,
        }
    }

    pub fn start(&mut self) {
        self.playing = true;
    }

    /// Stops following the music and restores the resting glow.
    pub fn stop(&mut self) {
        self.playing = false;
        self.glow = BrandGlow::RESTING;
    }

    pub fn update(&mut self, frame: EnergyFrame, now: Millis) {
        if !self.playing {
            return;
        }
        self.glow = BrandGlow::from_energy(frame.overall);
        if frame.beat {
            self.boost.try_fire(now);
        }
    }

    pub fn glow(&self) -> BrandGlow {
        self.glow
    }

    /// Whether the stats background is inside a boost window.
    pub fn boosted(&self, now: Millis) -> bool {
        self.boost
            .last_fired()
            .map(|at| now >= at && now - at < self.hold)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn glow_tracks_energy_only_while_playing() {
        let mut accent = AccentDriver::default();
        accent.update(EnergyFrame::new(1.0, 0.0, false), 0.0);
        assert_eq!(accent.glow(), BrandGlow::RESTING);

        accent.start();
        accent.update(EnergyFrame::new(1.0, 0.0, false), 16.0);
        assert!((accent.glow().inner - 0.70).abs() < 1e-6);
        assert!((accent.glow().outer - 0.43).abs() < 1e-6);

        accent.stop();
        assert_eq!(accent.glow(), BrandGlow::RESTING);
    }

    #[test]
    fn beat_boost_is_rate_limited_and_short() {
        let mut accent = AccentDriver::default();
        accent.start();
        let beat = EnergyFrame::new(0.5, 0.9, true);

        accent.update(beat, 1_000.0);
        assert!(accent.boosted(1_100.0));
        assert!(!accent.boosted(1_160.0));

        accent.update(beat, 1_200.0);
        assert!(!accent.boosted(1_200.0));

        accent.update(beat, 1_220.0);
        assert!(accent.boosted(1_230.0));
    }

    #[test]
    fn boost_timing_comes_from_tuning() {
        let mut accent = AccentDriver::new(&AccentTuning {
            boost_cooldown_ms: 500.0,
            boost_hold_ms: 40.0,
        });
        accent.start();
        let beat = EnergyFrame::new(0.5, 0.9, true);

        accent.update(beat, 0.0);
        assert!(accent.boosted(30.0));
        assert!(!accent.boosted(40.0));

        accent.update(beat, 300.0);
        assert!(!accent.boosted(310.0));
        accent.update(beat, 500.0);
        assert!(accent.boosted(510.0));
    }
}
