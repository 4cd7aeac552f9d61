use std::borrow::Cow;

use image::RgbaImage;

use crate::{error::ShaderError, palette::Palette, scene::ShaderMode};

/// WGSL module holding the full-screen vertex stage plus the feedback and
/// blit fragment stages.
pub const FEEDBACK_WGSL: &str = include_str!("feedback.wgsl");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramId(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(pub u64);

/// Shader source plus the entry points that form one program.
#[derive(Debug, Clone)]
pub struct ShaderSource {
    pub label: &'static str,
    pub code: Cow<'static, str>,
    pub vertex_entry: &'static str,
    pub fragment_entry: &'static str,
}

impl ShaderSource {
    pub fn feedback() -> Self {
        Self {
            label: "feedback",
            code: Cow::Borrowed(FEEDBACK_WGSL),
            vertex_entry: "vs_main",
            fragment_entry: "fs_feedback",
        }
    }

    pub fn blit() -> Self {
        Self {
            label: "blit",
            code: Cow::Borrowed(FEEDBACK_WGSL),
            vertex_entry: "vs_main",
            fragment_entry: "fs_blit",
        }
    }
}

/// Per-draw parameters of the feedback pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackUniforms {
    pub resolution: [f32; 2],
    pub time: f32,
    pub energy: f32,
    pub bass: f32,
    pub beat: bool,
    pub decay: f32,
    pub mix: f32,
    pub beat_boost: f32,
    pub mode: ShaderMode,
    pub palette: Palette,
}

/// Hardware shading capability of a canvas.
///
/// Targets are render textures; a draw samples `source` and writes
/// `destination`, `present` blits a target to the visible screen.
pub trait ShadingDevice {
    fn compile(&mut self, source: &ShaderSource) -> Result<ProgramId, ShaderError>;

    fn create_target(&mut self, width: u32, height: u32) -> TargetId;

    fn release_target(&mut self, target: TargetId);

    fn target_size(&self, target: TargetId) -> Option<(u32, u32)>;

    fn draw_feedback(
        &mut self,
        program: ProgramId,
        source: TargetId,
        destination: TargetId,
        uniforms: &FeedbackUniforms,
    );

    fn present(&mut self, program: ProgramId, target: TargetId);

    /// Copy of the visible screen, when the device can read it back.
    fn capture(&self) -> Option<RgbaImage> {
        None
    }
}
