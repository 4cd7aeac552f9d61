use std::path::{Path, PathBuf};

use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};

use crate::{engine::VisualEngine, Result};

/// Configuration options for headless frame capture.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingSettings {
    pub output_dir: PathBuf,
    pub fps: u32,
    /// File name prefix; frames are written as `<prefix>_00000.png`.
    pub prefix: String,
}

impl Default for RecordingSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("frames"),
            fps: 60,
            prefix: "frame".to_string(),
        }
    }
}

/// Flattens the engine's layers and writes them out as numbered PNGs.
#[derive(Debug, Default)]
pub struct Recorder {
    settings: RecordingSettings,
    is_recording: bool,
    frames: u64,
}

impl Recorder {
    pub fn new(settings: RecordingSettings) -> Self {
        Self {
            settings,
            is_recording: false,
            frames: 0,
        }
    }

    pub fn settings(&self) -> &RecordingSettings {
        &self.settings
    }

    pub fn start(&mut self) -> Result<()> {
        std::fs::create_dir_all(&self.settings.output_dir)?;
        self.is_recording = true;
        tracing::info!(dir = ?self.settings.output_dir, "recording started");
        Ok(())
    }

    pub fn stop(&mut self) -> Result<()> {
        if self.is_recording {
            tracing::info!(frames = self.frames, "recording stopped");
        }
        self.is_recording = false;
        Ok(())
    }

    pub fn is_recording(&self) -> bool {
        self.is_recording
    }

    pub fn frames_written(&self) -> u64 {
        self.frames
    }

    /// Writes the engine's current picture. Returns the file written, or
    /// `None` when not recording or nothing has been drawn yet.
    pub fn capture(&mut self, engine: &VisualEngine) -> Result<Option<PathBuf>> {
        if !self.is_recording {
            return Ok(None);
        }
        let backdrop = engine.backdrop().and_then(|b| b.capture());
        let overlay = engine.overlay().and_then(|o| o.capture());
        let Some(frame) = composite(backdrop, overlay) else {
            return Ok(None);
        };
        let path = self.frame_path(self.frames);
        frame.save(&path)?;
        self.frames += 1;
        Ok(Some(path))
    }

    fn frame_path(&self, index: u64) -> PathBuf {
        frame_path(&self.settings.output_dir, &self.settings.prefix, index)
    }
}

fn frame_path(dir: &Path, prefix: &str, index: u64) -> PathBuf {
    dir.join(format!("{prefix}_{index:05}.png"))
}

/// Draws `overlay` over `backdrop` (source-over). The overlay is scaled to
/// the backdrop when their backing stores differ.
pub fn composite(backdrop: Option<RgbaImage>, overlay: Option<RgbaImage>) -> Option<RgbaImage> {
    match (backdrop, overlay) {
        (None, None) => None,
        (Some(base), None) => Some(base),
        (None, Some(top)) => {
            let mut base = RgbaImage::new(top.width(), top.height());
            imageops::overlay(&mut base, &top, 0, 0);
            Some(base)
        }
        (Some(mut base), Some(top)) => {
            let top = if top.dimensions() == base.dimensions() {
                top
            } else {
                imageops::resize(&top, base.width(), base.height(), imageops::FilterType::Triangle)
            };
            imageops::overlay(&mut base, &top, 0, 0);
            Some(base)
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Rgba;

    use super::*;

    #[test]
    fn overlay_is_drawn_over_backdrop() {
        let base = RgbaImage::from_pixel(4, 4, Rgba([0, 0, 255, 255]));
        let mut top = RgbaImage::new(4, 4);
        top.put_pixel(1, 1, Rgba([255, 0, 0, 255]));

        let frame = composite(Some(base), Some(top)).unwrap();
        assert_eq!(frame.get_pixel(1, 1).0, [255, 0, 0, 255]);
        assert_eq!(frame.get_pixel(0, 0).0, [0, 0, 255, 255]);
    }

    #[test]
    fn mismatched_overlay_is_scaled_to_backdrop() {
        let base = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 0, 255]));
        let top = RgbaImage::from_pixel(4, 4, Rgba([0, 255, 0, 255]));
        let frame = composite(Some(base), Some(top)).unwrap();
        assert_eq!(frame.dimensions(), (8, 8));
        assert_eq!(frame.get_pixel(7, 7).0[1], 255);
    }

    #[test]
    fn nothing_to_flatten() {
        assert!(composite(None, None).is_none());
    }

    #[test]
    fn frame_names_are_zero_padded() {
        assert_eq!(
            frame_path(Path::new("out"), "frame", 42),
            Path::new("out").join("frame_00042.png")
        );
    }

    #[test]
    fn idle_recorder_writes_nothing() {
        let mut recorder = Recorder::default();
        assert!(!recorder.is_recording());
        recorder.stop().unwrap();
        assert_eq!(recorder.frames_written(), 0);
    }
}
