//! The host-facing engine handle.
//!
//! [`VisualEngine`] owns every layer and is passed by reference to whatever
//! drives it (shortcut handler, control panel, palette updater). Nothing is
//! allocated until audio first plays.

use std::{fmt, sync::Arc};

use crate::{
    accent::AccentDriver,
    analysis::EnergySource,
    audio::AudioEngine,
    config::EngineConfig,
    overlay::{AnchorSource, PulseOverlay},
    palette::Palette,
    prefs::PreferenceStore,
    render::{self, Backdrop, Canvas, CanvasLayout, Layer, NoopBackdrop},
    timeline::Millis,
    Result,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    Play,
    Pause,
    Ended,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Visibility {
    #[default]
    Visible,
    Hidden,
}

/// User intents routed to the engine by shortcuts or on-screen controls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineCommand {
    NextMode,
    SetMode(i64),
    TogglePlayback,
}

/// Builds the engine's layers at activation time.
pub trait LayerFactory {
    /// Only construction-fatal failures (broken shaders) may be returned.
    fn backdrop(
        &mut self,
        energy: Arc<dyn EnergySource>,
        config: &EngineConfig,
    ) -> Result<Box<dyn Backdrop>>;

    fn overlay(
        &mut self,
        energy: Arc<dyn EnergySource>,
        config: &EngineConfig,
    ) -> Option<Box<dyn Layer>>;

    /// Receives the canvas of a disposed backdrop for the next activation.
    fn reclaim(&mut self, _canvas: Canvas) {}
}

/// Default factory: the capability-selected backdrop for `canvas` plus a
/// pulse overlay when an anchor source is supplied.
pub struct CanvasLayerFactory {
    canvas: Option<Canvas>,
    anchors: Option<Arc<dyn AnchorSource>>,
    overlay_layout: CanvasLayout,
    seed: Option<u64>,
}

impl CanvasLayerFactory {
    pub fn new(canvas: Canvas) -> Self {
        let overlay_layout = canvas.layout();
        Self {
            canvas: Some(canvas),
            anchors: None,
            overlay_layout,
            seed: None,
        }
    }

    pub fn with_overlay(mut self, anchors: Arc<dyn AnchorSource>, layout: CanvasLayout) -> Self {
        self.anchors = Some(anchors);
        self.overlay_layout = layout;
        self
    }

    /// Makes the overlay's randomness reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }
}

impl LayerFactory for CanvasLayerFactory {
    fn backdrop(
        &mut self,
        energy: Arc<dyn EnergySource>,
        config: &EngineConfig,
    ) -> Result<Box<dyn Backdrop>> {
        match self.canvas.take() {
            Some(canvas) => render::init(canvas, energy, config),
            None => {
                tracing::warn!("canvas already consumed, backdrop disabled");
                Ok(Box::new(NoopBackdrop))
            }
        }
    }

    fn overlay(
        &mut self,
        energy: Arc<dyn EnergySource>,
        config: &EngineConfig,
    ) -> Option<Box<dyn Layer>> {
        let anchors = self.anchors.clone()?;
        match PulseOverlay::new(
            self.overlay_layout,
            anchors,
            energy,
            config.overlay.clone(),
            config.feedback.max_pixel_ratio,
        ) {
            Ok(overlay) => {
                let overlay = match self.seed {
                    Some(seed) => overlay.with_seed(seed),
                    None => overlay,
                };
                Some(Box::new(overlay))
            }
            Err(err) => {
                tracing::warn!(%err, "pulse overlay unavailable");
                None
            }
        }
    }

    fn reclaim(&mut self, canvas: Canvas) {
        self.canvas = Some(canvas);
    }
}

pub struct VisualEngine {
    config: EngineConfig,
    energy: Arc<dyn EnergySource>,
    factory: Box<dyn LayerFactory>,
    prefs: Box<dyn PreferenceStore>,
    audio: Option<AudioEngine>,
    backdrop: Option<Box<dyn Backdrop>>,
    overlay: Option<Box<dyn Layer>>,
    /// Latest palette; replayed whenever a backdrop is built.
    palette: Option<Palette>,
    layout: Option<CanvasLayout>,
    accent: AccentDriver,
    playing: bool,
    visibility: Visibility,
}

impl VisualEngine {
    pub fn new(
        config: EngineConfig,
        energy: Arc<dyn EnergySource>,
        factory: impl LayerFactory + 'static,
        prefs: impl PreferenceStore + 'static,
    ) -> Self {
        let accent = AccentDriver::new(&config.accent);
        Self {
            config,
            energy,
            factory: Box::new(factory),
            prefs: Box::new(prefs),
            audio: None,
            backdrop: None,
            overlay: None,
            palette: None,
            layout: None,
            accent,
            playing: false,
            visibility: Visibility::Visible,
        }
    }

    /// Lets [`EngineCommand::TogglePlayback`] drive the audio engine too.
    pub fn with_audio(mut self, audio: AudioEngine) -> Self {
        self.audio = Some(audio);
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn is_active(&self) -> bool {
        self.backdrop.is_some()
    }

    pub fn is_playing(&self) -> bool {
        self.playing
    }

    pub fn visibility(&self) -> Visibility {
        self.visibility
    }

    pub fn backdrop(&self) -> Option<&dyn Backdrop> {
        self.backdrop.as_deref()
    }

    pub fn overlay(&self) -> Option<&dyn Layer> {
        self.overlay.as_deref()
    }

    pub fn accent(&self) -> &AccentDriver {
        &self.accent
    }

    pub fn palette(&self) -> Option<&Palette> {
        self.palette.as_ref()
    }

    /// The palette still waiting for a backdrop, if any.
    pub fn pending_palette(&self) -> Option<&Palette> {
        self.palette.as_ref().filter(|_| !self.is_active())
    }

    fn activate(&mut self) -> Result<()> {
        if self.is_active() {
            return Ok(());
        }
        let mut backdrop = self.factory.backdrop(self.energy.clone(), &self.config)?;
        let stored = self.prefs.get_int(&self.config.engine.mode_key).unwrap_or(0);
        backdrop.set_mode(stored);
        if let Some(palette) = self.palette {
            backdrop.set_palette(palette);
        }
        let mut overlay = self.factory.overlay(self.energy.clone(), &self.config);
        if let Some(layout) = self.layout {
            backdrop.resize(layout);
            if let Some(overlay) = overlay.as_mut() {
                overlay.resize(layout);
            }
        }
        tracing::info!(
            mode = backdrop.mode(),
            modes = backdrop.mode_count(),
            overlay = overlay.is_some(),
            "visual engine activated"
        );
        self.backdrop = Some(backdrop);
        self.overlay = overlay;
        Ok(())
    }

    fn start_layers(&mut self) {
        if let Some(backdrop) = self.backdrop.as_mut() {
            backdrop.start();
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.start();
        }
        self.accent.start();
    }

    fn stop_layers(&mut self) {
        if let Some(backdrop) = self.backdrop.as_mut() {
            backdrop.stop();
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.stop();
        }
        self.accent.stop();
    }

    /// Reacts to the audio element's play/pause/ended notifications.
    pub fn on_playback(&mut self, event: PlaybackEvent) -> Result<()> {
        match event {
            PlaybackEvent::Play => {
                self.activate()?;
                self.playing = true;
                if self.visibility == Visibility::Visible {
                    self.start_layers();
                }
            }
            PlaybackEvent::Pause | PlaybackEvent::Ended => {
                self.playing = false;
                self.stop_layers();
            }
        }
        tracing::debug!(?event, "playback changed");
        Ok(())
    }

    pub fn on_visibility(&mut self, visibility: Visibility) {
        if visibility == self.visibility {
            return;
        }
        self.visibility = visibility;
        match visibility {
            Visibility::Hidden => self.stop_layers(),
            Visibility::Visible if self.playing => self.start_layers(),
            Visibility::Visible => {}
        }
    }

    pub fn resize(&mut self, layout: CanvasLayout) {
        self.layout = Some(layout);
        if let Some(backdrop) = self.backdrop.as_mut() {
            backdrop.resize(layout);
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.resize(layout);
        }
    }

    /// One display refresh: backdrop first, then the overlay on top.
    pub fn frame(&mut self, now: Millis) {
        if let Some(backdrop) = self.backdrop.as_mut() {
            backdrop.tick(now);
        }
        if let Some(overlay) = self.overlay.as_mut() {
            overlay.tick(now);
        }
        if self.playing && self.visibility == Visibility::Visible {
            self.accent.update(self.energy.sample(now), now);
        }
    }

    pub fn mode(&self) -> usize {
        self.backdrop.as_ref().map_or(0, |b| b.mode())
    }

    pub fn set_mode(&mut self, mode: i64) -> Result<()> {
        match self.backdrop.as_mut() {
            Some(backdrop) => {
                backdrop.set_mode(mode);
                self.persist_mode()
            }
            // normalised when read back at activation
            None => self.prefs.set_int(&self.config.engine.mode_key, mode),
        }
    }

    pub fn next_mode(&mut self) -> Result<()> {
        match self.backdrop.as_mut() {
            Some(backdrop) => {
                backdrop.next_mode();
                self.persist_mode()
            }
            None => Ok(()),
        }
    }

    fn persist_mode(&mut self) -> Result<()> {
        let Some(backdrop) = self.backdrop.as_ref() else {
            return Ok(());
        };
        // An inert backdrop always reads 0; keep the stored choice instead.
        if backdrop.mode_count() <= 1 {
            return Ok(());
        }
        self.prefs
            .set_int(&self.config.engine.mode_key, backdrop.mode() as i64)
    }

    /// Applies a palette now and keeps it for any backdrop built later.
    pub fn set_palette(&mut self, palette: Palette) {
        self.palette = Some(palette);
        if let Some(backdrop) = self.backdrop.as_mut() {
            backdrop.set_palette(palette);
        }
    }

    pub fn apply(&mut self, command: EngineCommand) -> Result<()> {
        match command {
            EngineCommand::NextMode => self.next_mode(),
            EngineCommand::SetMode(mode) => self.set_mode(mode),
            EngineCommand::TogglePlayback => {
                let event = if self.playing {
                    PlaybackEvent::Pause
                } else {
                    PlaybackEvent::Play
                };
                if let Some(audio) = self.audio.as_ref() {
                    match event {
                        PlaybackEvent::Play => audio.play()?,
                        _ => audio.pause()?,
                    }
                }
                self.on_playback(event)
            }
        }
    }

    /// Stops and releases every layer. The backdrop's canvas goes back to
    /// the factory, so a later `Play` builds fresh layers on it with the
    /// stored mode and the latest palette.
    pub fn dispose(&mut self) {
        self.stop_layers();
        if let Some(mut backdrop) = self.backdrop.take() {
            backdrop.dispose();
            if let Some(canvas) = backdrop.into_canvas() {
                self.factory.reclaim(canvas);
            }
        }
        self.overlay = None;
        self.playing = false;
    }
}

impl fmt::Debug for VisualEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisualEngine")
            .field("active", &self.is_active())
            .field("mode", &self.mode())
            .field("playing", &self.playing)
            .field("visibility", &self.visibility)
            .field("overlay", &self.overlay.is_some())
            .field("palette", &self.palette.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        analysis::EnergyFrame,
        prefs::MemoryPreferences,
        render::SoftwareDevice,
    };

    fn silence() -> Arc<dyn EnergySource> {
        Arc::new(|_now: Millis| EnergyFrame::SILENT)
    }

    fn shader_engine(prefs: MemoryPreferences) -> VisualEngine {
        let canvas = Canvas::new(CanvasLayout::new(8.0, 6.0, 1.0))
            .with_shading(Box::new(SoftwareDevice::new()));
        VisualEngine::new(
            EngineConfig::default(),
            silence(),
            CanvasLayerFactory::new(canvas),
            prefs,
        )
    }

    #[test]
    fn activation_reads_and_normalises_stored_mode() {
        let mut prefs = MemoryPreferences::new();
        prefs.set_int("backdrop_mode", -1).unwrap();
        let mut engine = shader_engine(prefs);
        assert_eq!(engine.mode(), 0);

        engine.on_playback(PlaybackEvent::Play).unwrap();
        assert_eq!(engine.mode(), 5);
        assert!(engine.backdrop().unwrap().is_running());
    }

    #[test]
    fn mode_changes_are_persisted_normalised() {
        let prefs = MemoryPreferences::new();
        let mut engine = shader_engine(prefs.clone());
        engine.on_playback(PlaybackEvent::Play).unwrap();

        engine.apply(EngineCommand::SetMode(8)).unwrap();
        assert_eq!(prefs.get_int("backdrop_mode"), Some(2));
        engine.apply(EngineCommand::NextMode).unwrap();
        assert_eq!(prefs.get_int("backdrop_mode"), Some(3));
        assert_eq!(engine.mode(), 3);
    }

    #[test]
    fn toggle_playback_flips_between_play_and_pause() {
        let mut engine = shader_engine(MemoryPreferences::new());
        engine.apply(EngineCommand::TogglePlayback).unwrap();
        assert!(engine.is_playing());
        engine.apply(EngineCommand::TogglePlayback).unwrap();
        assert!(!engine.is_playing());
        assert!(!engine.backdrop().unwrap().is_running());
    }

    #[test]
    fn toggle_playback_drives_attached_audio() {
        let audio = AudioEngine::new(&Default::default());
        let mut engine = shader_engine(MemoryPreferences::new()).with_audio(audio.clone());
        engine.apply(EngineCommand::TogglePlayback).unwrap();
        assert_eq!(audio.playback().unwrap(), crate::audio::PlaybackState::Playing);
        engine.apply(EngineCommand::TogglePlayback).unwrap();
        assert_eq!(audio.playback().unwrap(), crate::audio::PlaybackState::Paused);
    }

    #[test]
    fn play_after_dispose_rebuilds_on_the_same_canvas() {
        let device = SoftwareDevice::new();
        let stats = device.stats();
        let canvas = Canvas::new(CanvasLayout::new(8.0, 6.0, 1.0)).with_shading(Box::new(device));
        let mut engine = VisualEngine::new(
            EngineConfig::default(),
            silence(),
            CanvasLayerFactory::new(canvas),
            MemoryPreferences::new(),
        );
        engine.on_playback(PlaybackEvent::Play).unwrap();
        engine.apply(EngineCommand::SetMode(3)).unwrap();
        engine.set_palette(Palette::from_seed("cover art"));
        engine.dispose();
        assert_eq!(stats.live_targets(), 0);

        engine.on_playback(PlaybackEvent::Play).unwrap();
        engine.frame(0.0);
        let backdrop = engine.backdrop().unwrap();
        assert_eq!(backdrop.mode_count(), 6);
        assert_eq!(engine.mode(), 3);
        assert!(backdrop.is_running());
        assert_eq!(stats.live_targets(), 2);
        assert_eq!(engine.palette(), Some(&Palette::from_seed("cover art")));
        assert!(engine.pending_palette().is_none());
    }

    #[test]
    fn dispose_returns_to_inactive() {
        let mut engine = shader_engine(MemoryPreferences::new());
        engine.on_playback(PlaybackEvent::Play).unwrap();
        engine.dispose();
        assert!(!engine.is_active());
        assert!(!engine.is_playing());
        engine.frame(16.0);
    }
}
