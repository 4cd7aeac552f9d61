//! Backdrop renderers and the capability-driven factory that picks one.
//!
//! Every renderer exposes the same [`Backdrop`] surface, so hosts never need
//! to check which engine they received.

mod canvas2d;
mod device;
mod feedback;
mod kernel;
mod noop;
pub(crate) mod raster;
mod software;

use std::{fmt, sync::Arc};

use image::RgbaImage;
use serde::{Deserialize, Serialize};

pub use canvas2d::Canvas2dRenderer;
pub use device::{
    FeedbackUniforms, ProgramId, ShaderSource, ShadingDevice, TargetId, FEEDBACK_WGSL,
};
pub use feedback::{FeedbackRenderer, PingPongSurface};
pub use noop::NoopBackdrop;
pub use software::{DeviceStats, SoftwareDevice};

use crate::{
    analysis::EnergySource,
    config::{EngineConfig, RendererChoice},
    palette::Palette,
    timeline::Millis,
    Result,
};

/// Something driven once per display refresh by the host frame scheduler.
pub trait Layer {
    fn start(&mut self);

    /// Cancels the next tick. Safe to call repeatedly.
    fn stop(&mut self);

    fn is_running(&self) -> bool;

    fn resize(&mut self, layout: CanvasLayout);

    /// Runs one frame to completion. Does nothing unless running.
    fn tick(&mut self, now: Millis);

    /// Copy of what the layer last drew, if it can be read back.
    fn capture(&self) -> Option<RgbaImage> {
        None
    }
}

/// Full-screen background engine with selectable modes.
pub trait Backdrop: Layer {
    /// Selects `mode` wrapped into the renderer's mode count.
    fn set_mode(&mut self, mode: i64);

    fn next_mode(&mut self) {
        let next = self.mode() as i64 + 1;
        self.set_mode(next);
    }

    fn mode(&self) -> usize;

    fn mode_count(&self) -> usize;

    fn set_palette(&mut self, _palette: Palette) {}

    /// Releases rendering resources; the backdrop is inert afterwards.
    fn dispose(&mut self) {}

    /// Gives the canvas back so a later activation can draw on it again.
    /// Backdrops without a rendering context return `None`.
    fn into_canvas(self: Box<Self>) -> Option<Canvas> {
        None
    }
}

/// Lifecycle of an initialised renderer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RendererState {
    Ready,
    Running,
    Stopped,
    Disposed,
}

impl RendererState {
    pub(crate) fn start(&mut self) -> bool {
        match self {
            Self::Ready | Self::Stopped => {
                *self = Self::Running;
                true
            }
            Self::Running | Self::Disposed => false,
        }
    }

    pub(crate) fn stop(&mut self) -> bool {
        if *self == Self::Running {
            *self = Self::Stopped;
            true
        } else {
            false
        }
    }
}

/// CSS size and pixel density of a canvas element.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CanvasLayout {
    pub css_width: f32,
    pub css_height: f32,
    pub device_pixel_ratio: f32,
}

impl CanvasLayout {
    pub fn new(css_width: f32, css_height: f32, device_pixel_ratio: f32) -> Self {
        Self {
            css_width,
            css_height,
            device_pixel_ratio,
        }
    }

    /// Device pixel ratio clamped into `[1, max_ratio]`.
    pub fn pixel_ratio(&self, max_ratio: f32) -> f32 {
        let ratio = self.device_pixel_ratio;
        if ratio.is_finite() {
            ratio.clamp(1.0, max_ratio.max(1.0))
        } else {
            1.0
        }
    }

    /// Backing-store size: `floor(css * ratio)`, never zero.
    pub fn backing_size(&self, max_ratio: f32) -> (u32, u32) {
        let ratio = self.pixel_ratio(max_ratio);
        (
            backing_dim(self.css_width, ratio),
            backing_dim(self.css_height, ratio),
        )
    }
}

fn backing_dim(css: f32, ratio: f32) -> u32 {
    let px = (css.max(0.0) * ratio).floor();
    if px.is_finite() {
        (px as u32).max(1)
    } else {
        1
    }
}

/// A host canvas and the rendering capabilities it offers.
pub struct Canvas {
    layout: CanvasLayout,
    shading: Option<Box<dyn ShadingDevice>>,
    context_2d: bool,
}

impl Canvas {
    pub fn new(layout: CanvasLayout) -> Self {
        Self {
            layout,
            shading: None,
            context_2d: true,
        }
    }

    pub fn with_shading(mut self, device: Box<dyn ShadingDevice>) -> Self {
        self.shading = Some(device);
        self
    }

    /// Marks the 2D context as unobtainable.
    pub fn without_2d(mut self) -> Self {
        self.context_2d = false;
        self
    }

    pub fn layout(&self) -> CanvasLayout {
        self.layout
    }

    pub fn has_shading(&self) -> bool {
        self.shading.is_some()
    }
}

impl fmt::Debug for Canvas {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas")
            .field("layout", &self.layout)
            .field("shading", &self.shading.is_some())
            .field("context_2d", &self.context_2d)
            .finish()
    }
}

/// Builds the backdrop the configuration asks for, degrading to what the
/// canvas supports. Only a broken shader program is an error.
pub fn init(
    canvas: Canvas,
    energy: Arc<dyn EnergySource>,
    config: &EngineConfig,
) -> Result<Box<dyn Backdrop>> {
    let choice = config.engine.renderer;
    match choice {
        RendererChoice::None => Ok(Box::new(NoopBackdrop)),
        RendererChoice::Shader => init_feedback(canvas, energy, config),
        RendererChoice::Canvas2d => Ok(init_canvas2d(canvas, energy, config)),
        RendererChoice::Auto if canvas.has_shading() => init_feedback(canvas, energy, config),
        RendererChoice::Auto => {
            tracing::info!("hardware shading unavailable, using 2D backdrop");
            Ok(init_canvas2d(canvas, energy, config))
        }
    }
}

/// Shader backdrop, or the inert [`NoopBackdrop`] without shading support.
pub fn init_feedback(
    canvas: Canvas,
    energy: Arc<dyn EnergySource>,
    config: &EngineConfig,
) -> Result<Box<dyn Backdrop>> {
    let Canvas { layout, shading, .. } = canvas;
    let Some(device) = shading else {
        tracing::warn!("hardware shading unavailable, backdrop disabled");
        return Ok(Box::new(NoopBackdrop));
    };
    let renderer = FeedbackRenderer::new(device, layout, energy, config.feedback.clone())?;
    Ok(Box::new(renderer))
}

fn init_canvas2d(
    canvas: Canvas,
    energy: Arc<dyn EnergySource>,
    config: &EngineConfig,
) -> Box<dyn Backdrop> {
    if !canvas.context_2d {
        tracing::warn!("2D context unavailable, backdrop disabled");
        return Box::new(NoopBackdrop);
    }
    match Canvas2dRenderer::new(
        canvas.layout,
        energy,
        config.fallback.clone(),
        config.feedback.max_pixel_ratio,
    ) {
        Ok(renderer) => Box::new(renderer),
        Err(err) => {
            tracing::warn!(%err, "2D backdrop unavailable");
            Box::new(NoopBackdrop)
        }
    }
}
