use std::{
    fmt,
    sync::{Arc, Mutex},
};

use serde::{Deserialize, Serialize};

use crate::{
    audio::AnalysisHandle,
    config::EnergyTuning,
    timeline::{Cooldown, Millis},
};

/// Loudness summary for one animation tick. Always valid: silence and every
/// failure mode read as [`EnergyFrame::SILENT`].
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct EnergyFrame {
    /// Overall loudness in `[0, 1]`.
    pub overall: f32,
    /// Loudness of the bins below the bass cutoff, in `[0, 1]`.
    pub bass: f32,
    pub beat: bool,
}

impl EnergyFrame {
    pub const SILENT: Self = Self {
        overall: 0.0,
        bass: 0.0,
        beat: false,
    };

    /// Builds a frame, clamping both levels into `[0, 1]`.
    pub fn new(overall: f32, bass: f32, beat: bool) -> Self {
        Self {
            overall: clamp01(overall),
            bass: clamp01(bass),
            beat,
        }
    }
}

/// Capability handed to every renderer that reacts to audio.
pub trait EnergySource {
    fn sample(&self, now: Millis) -> EnergyFrame;
}

impl<F> EnergySource for F
where
    F: Fn(Millis) -> EnergyFrame,
{
    fn sample(&self, now: Millis) -> EnergyFrame {
        self(now)
    }
}

/// Exponential moving average of bass with a cooldown-gated threshold.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    alpha: f32,
    threshold: f32,
    ema: Option<f32>,
    cooldown: Cooldown,
}

impl BeatDetector {
    pub fn new(tuning: &EnergyTuning) -> Self {
        Self {
            alpha: tuning.ema_alpha,
            threshold: tuning.beat_threshold,
            ema: None,
            cooldown: Cooldown::new(tuning.beat_cooldown_ms),
        }
    }

    /// Current bass average, `None` until the first observation.
    pub fn average(&self) -> Option<f32> {
        self.ema
    }

    pub fn last_beat(&self) -> Option<Millis> {
        self.cooldown.last_fired()
    }

    /// Folds `bass` into the average and reports whether it is a beat.
    /// The average starts at the first sample so the first tick never fires.
    pub fn observe(&mut self, bass: f32, now: Millis) -> bool {
        let ema = match self.ema {
            Some(prev) => self.alpha * bass + (1.0 - self.alpha) * prev,
            None => bass,
        };
        self.ema = Some(ema);

        bass > ema + self.threshold && self.cooldown.try_fire(now)
    }

    pub fn reset(&mut self) {
        self.ema = None;
        self.cooldown.reset();
    }
}

/// Turns the live byte spectrum into [`EnergyFrame`]s.
pub struct EnergyExtractor {
    handle: Option<AnalysisHandle>,
    tuning: EnergyTuning,
    bins: Vec<u8>,
    beat: BeatDetector,
    session: Option<u64>,
}

impl EnergyExtractor {
    pub fn new(handle: AnalysisHandle, tuning: EnergyTuning) -> Self {
        Self::with_handle(Some(handle), tuning)
    }

    /// Extractor for hosts where audio analysis never came up.
    pub fn disconnected(tuning: EnergyTuning) -> Self {
        Self::with_handle(None, tuning)
    }

    fn with_handle(handle: Option<AnalysisHandle>, tuning: EnergyTuning) -> Self {
        Self {
            handle,
            beat: BeatDetector::new(&tuning),
            tuning,
            bins: Vec::new(),
            session: None,
        }
    }

    pub fn beat_detector(&self) -> &BeatDetector {
        &self.beat
    }

    /// Samples the analyser once. Never blocks and never fails.
    pub fn sample(&mut self, now: Millis) -> EnergyFrame {
        let Some(handle) = self.handle.as_ref() else {
            return EnergyFrame::SILENT;
        };
        let mut bins = std::mem::take(&mut self.bins);
        let frame = match handle.read_frequency_data(&mut bins) {
            Some(snapshot) => {
                if self.session != Some(snapshot.session) {
                    self.session = Some(snapshot.session);
                    self.beat.reset();
                }
                self.measure(&bins, snapshot.sample_rate, now)
            }
            None => EnergyFrame::SILENT,
        };
        self.bins = bins;
        frame
    }

    /// Computes a frame from an explicit spectrum.
    pub fn measure(&mut self, bins: &[u8], sample_rate: u32, now: Millis) -> EnergyFrame {
        let n = bins.len();
        if n == 0 {
            return EnergyFrame::SILENT;
        }

        let total: u32 = bins.iter().map(|&b| u32::from(b)).sum();
        let overall = total as f32 / (n as f32 * 255.0) * self.tuning.overall_gain;

        let nyquist = (sample_rate.max(1) as f32) * 0.5;
        let bass_idx = ((self.tuning.bass_cutoff_hz / nyquist) * n as f32).round() as usize;
        let bass_idx = bass_idx.clamp(self.tuning.min_bass_bins.min(n).max(1), n);
        let bass_total: u32 = bins[..bass_idx].iter().map(|&b| u32::from(b)).sum();
        let bass = clamp01(bass_total as f32 / (bass_idx as f32 * 255.0) * self.tuning.bass_gain);

        let beat = self.beat.observe(bass, now);
        EnergyFrame::new(overall, bass, beat)
    }
}

impl fmt::Debug for EnergyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnergyExtractor")
            .field("connected", &self.handle.is_some())
            .field("beat", &self.beat)
            .field("session", &self.session)
            .finish()
    }
}

/// Cloneable [`EnergySource`] backed by a single extractor. Beat state is
/// owned here and never exposed to the renderers holding clones.
///
/// Every `sample` advances the one beat detector, so when several layers
/// sample the same tick only the first of them sees `beat == true`; the
/// cooldown hides it from the rest. Give a layer its own extractor when it
/// must react to every beat.
#[derive(Clone)]
pub struct SharedEnergy {
    extractor: Arc<Mutex<EnergyExtractor>>,
}

impl SharedEnergy {
    pub fn new(extractor: EnergyExtractor) -> Self {
        Self {
            extractor: Arc::new(Mutex::new(extractor)),
        }
    }
}

impl EnergySource for SharedEnergy {
    fn sample(&self, now: Millis) -> EnergyFrame {
        match self.extractor.lock() {
            Ok(mut extractor) => extractor.sample(now),
            Err(_) => EnergyFrame::SILENT,
        }
    }
}

impl fmt::Debug for SharedEnergy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedEnergy").finish()
    }
}

fn clamp01(value: f32) -> f32 {
    if value.is_nan() {
        0.0
    } else {
        value.clamp(0.0, 1.0)
    }
}
