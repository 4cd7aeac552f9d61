mod analyser;

use std::sync::{Arc, Mutex, MutexGuard};

pub use analyser::SpectrumAnalyser;

use crate::{config::AnalyserConfig, Result, VisualError};

/// Playback state of the audio element the engine is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackState {
    #[default]
    Idle,
    Playing,
    Paused,
    Ended,
}

/// High level audio façade: playback state plus the live analyser.
///
/// Decoding and streaming stay with the host; it pushes mono samples in as
/// they are played so the analyser always reflects what is audible.
#[derive(Debug, Clone)]
pub struct AudioEngine {
    sample_rate: u32,
    shared: Arc<Mutex<AudioShared>>,
}

#[derive(Debug)]
struct AudioShared {
    analyser: Option<SpectrumAnalyser>,
    playback: PlaybackState,
    session: u64,
}

impl AudioEngine {
    /// Creates an engine with a live analyser. If the analyser cannot be
    /// built the engine still works, it simply reports no spectrum.
    pub fn new(config: &AnalyserConfig) -> Self {
        let analyser = match SpectrumAnalyser::new(config) {
            Ok(analyser) => Some(analyser),
            Err(err) => {
                tracing::warn!(%err, "audio analysis unavailable, energy will read as silence");
                None
            }
        };
        Self::from_parts(config.sample_rate, analyser)
    }

    /// Engine for hosts without any audio analysis support.
    pub fn unsupported(sample_rate: u32) -> Self {
        Self::from_parts(sample_rate, None)
    }

    fn from_parts(sample_rate: u32, analyser: Option<SpectrumAnalyser>) -> Self {
        Self {
            sample_rate,
            shared: Arc::new(Mutex::new(AudioShared {
                analyser,
                playback: PlaybackState::Idle,
                session: 0,
            })),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn has_analyser(&self) -> bool {
        self.lock().map(|s| s.analyser.is_some()).unwrap_or(false)
    }

    pub fn playback(&self) -> Result<PlaybackState> {
        Ok(self.lock()?.playback)
    }

    /// Marks playback as running. Entering `Playing` from any other state
    /// opens a new session, which downstream beat tracking treats as a reset.
    pub fn play(&self) -> Result<()> {
        let mut shared = self.lock()?;
        if shared.playback != PlaybackState::Playing {
            shared.playback = PlaybackState::Playing;
            shared.session += 1;
            tracing::debug!(session = shared.session, "playback started");
        }
        Ok(())
    }

    pub fn pause(&self) -> Result<()> {
        self.transition(PlaybackState::Paused)
    }

    pub fn end(&self) -> Result<()> {
        self.transition(PlaybackState::Ended)?;
        if let Some(analyser) = self.lock()?.analyser.as_mut() {
            analyser.reset();
        }
        Ok(())
    }

    /// Feeds a block of mono samples into the analyser.
    pub fn push_samples(&self, samples: &[f32]) -> Result<()> {
        if samples.is_empty() {
            return Ok(());
        }
        if let Some(analyser) = self.lock()?.analyser.as_mut() {
            analyser.push(samples);
        }
        Ok(())
    }

    /// Returns a shareable read handle over the analyser.
    pub fn analysis(&self) -> AnalysisHandle {
        AnalysisHandle {
            sample_rate: self.sample_rate,
            shared: self.shared.clone(),
        }
    }

    fn transition(&self, next: PlaybackState) -> Result<()> {
        self.lock()?.playback = next;
        Ok(())
    }

    fn lock(&self) -> Result<MutexGuard<'_, AudioShared>> {
        self.shared
            .lock()
            .map_err(|_| VisualError::msg("audio state has been poisoned"))
    }
}

/// What a successful spectrum read observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisSnapshot {
    pub sample_rate: u32,
    /// Playback session the spectrum belongs to.
    pub session: u64,
}

/// Shared view over the analyser managed by [`AudioEngine`].
#[derive(Clone)]
pub struct AnalysisHandle {
    sample_rate: u32,
    shared: Arc<Mutex<AudioShared>>,
}

impl AnalysisHandle {
    /// Reads the current byte spectrum. Returns `None` when nothing is
    /// playing or analysis is unavailable; never blocks on a poisoned lock.
    pub fn read_frequency_data(&self, out: &mut Vec<u8>) -> Option<AnalysisSnapshot> {
        let mut shared = self.shared.lock().ok()?;
        if shared.playback != PlaybackState::Playing {
            return None;
        }
        let session = shared.session;
        let analyser = shared.analyser.as_mut()?;
        match analyser.byte_frequency_data(out) {
            Ok(()) => Some(AnalysisSnapshot {
                sample_rate: self.sample_rate,
                session,
            }),
            Err(err) => {
                tracing::debug!(%err, "spectrum read failed");
                None
            }
        }
    }
}

impl std::fmt::Debug for AnalysisHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisHandle")
            .field("sample_rate", &self.sample_rate)
            .finish()
    }
}
