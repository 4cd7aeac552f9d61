use std::{f32::consts::PI, fmt, sync::Arc};

use realfft::{num_complex::Complex32, RealFftPlanner, RealToComplex};

use crate::{config::AnalyserConfig, Result, VisualError};

/// Byte-scaled frequency analyser with the semantics of a browser analyser
/// node: Blackman window, temporal smoothing, decibel range mapped to 0..=255.
pub struct SpectrumAnalyser {
    fft_size: usize,
    smoothing: f32,
    min_decibels: f32,
    max_decibels: f32,
    history: Vec<f32>,
    write_pos: usize,
    window: Vec<f32>,
    smoothed: Vec<f32>,
    fft: FftResources,
}

impl SpectrumAnalyser {
    pub fn new(config: &AnalyserConfig) -> Result<Self> {
        let fft_size = config.fft_size;
        if fft_size < 32 || !fft_size.is_power_of_two() {
            return Err(VisualError::InvalidInput(
                "analyser fft size must be a power of two of at least 32",
            ));
        }
        if config.max_decibels <= config.min_decibels {
            return Err(VisualError::InvalidInput(
                "analyser decibel range must be non-empty",
            ));
        }

        let mut planner = RealFftPlanner::<f32>::new();
        let plan = planner.plan_fft_forward(fft_size);
        let fft = FftResources {
            input: plan.make_input_vec(),
            spectrum: plan.make_output_vec(),
            scratch: plan.make_scratch_vec(),
            plan,
        };

        Ok(Self {
            fft_size,
            smoothing: config.smoothing.clamp(0.0, 1.0),
            min_decibels: config.min_decibels,
            max_decibels: config.max_decibels,
            history: vec![0.0; fft_size],
            write_pos: 0,
            window: (0..fft_size).map(|i| blackman(i, fft_size)).collect(),
            smoothed: vec![0.0; fft_size / 2],
            fft,
        })
    }

    /// Number of bins produced per read, half the FFT size.
    pub fn frequency_bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    /// Appends mono time-domain samples; only the newest `fft_size` are kept.
    pub fn push(&mut self, samples: &[f32]) {
        let tail = samples.len().saturating_sub(self.fft_size);
        for &sample in &samples[tail..] {
            self.history[self.write_pos] = sample;
            self.write_pos = (self.write_pos + 1) % self.fft_size;
        }
    }

    /// Clears sample history and smoothing memory.
    pub fn reset(&mut self) {
        self.history.iter_mut().for_each(|s| *s = 0.0);
        self.smoothed.iter_mut().for_each(|s| *s = 0.0);
        self.write_pos = 0;
    }

    /// Fills `out` with one byte magnitude per frequency bin.
    pub fn byte_frequency_data(&mut self, out: &mut Vec<u8>) -> Result<()> {
        let n = self.fft_size;
        for i in 0..n {
            let sample = self.history[(self.write_pos + i) % n];
            self.fft.input[i] = sample * self.window[i];
        }

        self.fft.plan.process_with_scratch(
            &mut self.fft.input,
            &mut self.fft.spectrum,
            &mut self.fft.scratch,
        )?;

        let bins = self.frequency_bin_count();
        let scale = 255.0 / (self.max_decibels - self.min_decibels);
        out.clear();
        out.reserve(bins);
        for k in 0..bins {
            let magnitude = self.fft.spectrum[k].norm() / n as f32;
            let smoothed = self.smoothing * self.smoothed[k] + (1.0 - self.smoothing) * magnitude;
            self.smoothed[k] = if smoothed.is_finite() { smoothed } else { 0.0 };

            let byte = if self.smoothed[k] <= 0.0 {
                0
            } else {
                let db = 20.0 * self.smoothed[k].log10();
                (scale * (db - self.min_decibels)).floor().clamp(0.0, 255.0) as u8
            };
            out.push(byte);
        }
        Ok(())
    }
}

struct FftResources {
    plan: Arc<dyn RealToComplex<f32>>,
    input: Vec<f32>,
    spectrum: Vec<Complex32>,
    scratch: Vec<Complex32>,
}

impl fmt::Debug for SpectrumAnalyser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SpectrumAnalyser")
            .field("fft_size", &self.fft_size)
            .field("smoothing", &self.smoothing)
            .field("min_decibels", &self.min_decibels)
            .field("max_decibels", &self.max_decibels)
            .finish()
    }
}

fn blackman(index: usize, len: usize) -> f32 {
    let x = index as f32 / len as f32;
    0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyser() -> SpectrumAnalyser {
        SpectrumAnalyser::new(&AnalyserConfig {
            smoothing: 0.0,
            ..AnalyserConfig::default()
        })
        .unwrap()
    }

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    #[test]
    fn rejects_non_power_of_two_sizes() {
        let config = AnalyserConfig {
            fft_size: 300,
            ..AnalyserConfig::default()
        };
        assert!(SpectrumAnalyser::new(&config).is_err());
    }

    #[test]
    fn silence_reads_as_zero_bytes() {
        let mut analyser = analyser();
        analyser.push(&[0.0; 256]);
        let mut bins = Vec::new();
        analyser.byte_frequency_data(&mut bins).unwrap();
        assert_eq!(bins.len(), 128);
        assert!(bins.iter().all(|&b| b == 0));
    }

    #[test]
    fn low_tone_lights_up_low_bins() {
        let mut analyser = analyser();
        analyser.push(&sine(86.0, 44_100.0, 1024));
        let mut bins = Vec::new();
        analyser.byte_frequency_data(&mut bins).unwrap();

        let low: u32 = bins[..4].iter().map(|&b| b as u32).sum();
        let high: u32 = bins[64..68].iter().map(|&b| b as u32).sum();
        assert!(low > 400, "low bins {:?}", &bins[..4]);
        assert!(low > high * 2);
    }

    #[test]
    fn smoothing_decays_towards_silence() {
        let mut analyser = SpectrumAnalyser::new(&AnalyserConfig::default()).unwrap();
        analyser.push(&sine(172.0, 44_100.0, 256));
        let mut loud = Vec::new();
        analyser.byte_frequency_data(&mut loud).unwrap();

        analyser.push(&[0.0; 256]);
        let mut quieter = Vec::new();
        analyser.byte_frequency_data(&mut quieter).unwrap();
        assert!(quieter[1] <= loud[1]);
        assert!(quieter[1] > 0);
    }
}
