//! Core library of the audio-reactive backdrop engine.
//!
//! A live spectrum is reduced to an [`EnergyFrame`] every display refresh.
//! Two layers consume it independently: a full-screen backdrop (ping-pong
//! feedback shader, or a simpler 2D scene where shading is unavailable) and a
//! foreground overlay of pulses between page anchors. [`VisualEngine`] ties
//! both to the audio playback lifecycle.

pub mod accent;
pub mod analysis;
pub mod assets;
pub mod audio;
pub mod config;
pub mod engine;
pub mod error;
pub mod gate;
pub mod overlay;
pub mod palette;
pub mod prefs;
pub mod record;
pub mod render;
pub mod scene;
pub mod shortcuts;
pub mod timeline;

pub use analysis::{EnergyExtractor, EnergyFrame, EnergySource, SharedEnergy};
pub use assets::{ArtworkFetcher, ArtworkStore, FileArtwork};
pub use audio::{AnalysisHandle, AudioEngine, PlaybackState};
pub use config::{EngineConfig, RendererChoice};
pub use engine::{
    CanvasLayerFactory, EngineCommand, LayerFactory, PlaybackEvent, Visibility, VisualEngine,
};
pub use error::{Result, ShaderError, VisualError};
pub use overlay::{Anchor, AnchorSource, PulseOverlay};
pub use palette::{Palette, PaletteDeriver};
pub use prefs::{FilePreferences, MemoryPreferences, PreferenceStore};
pub use record::{Recorder, RecordingSettings};
pub use render::{Backdrop, Canvas, CanvasLayout, Layer};
pub use scene::{normalize_mode, FallbackMode, ModeSet, ShaderMode};
pub use timeline::Millis;
