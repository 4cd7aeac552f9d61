use std::{fmt, sync::Arc};

use image::RgbaImage;

use super::{
    device::{FeedbackUniforms, ProgramId, ShaderSource, ShadingDevice, TargetId},
    Backdrop, Canvas, CanvasLayout, Layer, RendererState,
};
use crate::{
    analysis::EnergySource,
    config::FeedbackTuning,
    error::ShaderError,
    palette::Palette,
    scene::{normalize_mode, ModeSet, ShaderMode},
    timeline::{FrameClock, Millis},
};

/// Two equally sized render targets. One is read while the other is
/// written; the roles swap after every completed frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PingPongSurface {
    targets: [TargetId; 2],
    source: usize,
    width: u32,
    height: u32,
}

impl PingPongSurface {
    pub fn allocate(device: &mut dyn ShadingDevice, width: u32, height: u32) -> Self {
        Self {
            targets: [
                device.create_target(width, height),
                device.create_target(width, height),
            ],
            source: 0,
            width,
            height,
        }
    }

    /// Replaces both targets with fresh ones of the new size. The old
    /// contents are discarded.
    pub fn reallocate(&mut self, device: &mut dyn ShadingDevice, width: u32, height: u32) {
        let fresh = Self::allocate(device, width, height);
        let stale = std::mem::replace(self, fresh);
        stale.release(device);
    }

    pub fn release(self, device: &mut dyn ShadingDevice) {
        for target in self.targets {
            device.release_target(target);
        }
    }

    pub fn source(&self) -> TargetId {
        self.targets[self.source]
    }

    pub fn destination(&self) -> TargetId {
        self.targets[1 - self.source]
    }

    pub fn swap(&mut self) {
        self.source = 1 - self.source;
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn targets(&self) -> [TargetId; 2] {
        self.targets
    }
}

/// Full-screen feedback backdrop running the six warp modes.
pub struct FeedbackRenderer {
    device: Box<dyn ShadingDevice>,
    feedback: ProgramId,
    blit: ProgramId,
    surfaces: Option<PingPongSurface>,
    energy: Arc<dyn EnergySource>,
    tuning: FeedbackTuning,
    layout: CanvasLayout,
    mode: ShaderMode,
    palette: Option<Palette>,
    clock: FrameClock,
    state: RendererState,
}

impl FeedbackRenderer {
    /// Compiles the programs and allocates both surfaces. A compile or link
    /// failure is returned as-is: it means the shipped shader is broken.
    pub fn new(
        device: Box<dyn ShadingDevice>,
        layout: CanvasLayout,
        energy: Arc<dyn EnergySource>,
        tuning: FeedbackTuning,
    ) -> Result<Self, ShaderError> {
        Self::with_sources(
            device,
            layout,
            energy,
            tuning,
            &ShaderSource::feedback(),
            &ShaderSource::blit(),
        )
    }

    pub fn with_sources(
        mut device: Box<dyn ShadingDevice>,
        layout: CanvasLayout,
        energy: Arc<dyn EnergySource>,
        tuning: FeedbackTuning,
        feedback: &ShaderSource,
        blit: &ShaderSource,
    ) -> Result<Self, ShaderError> {
        let feedback = device.compile(feedback)?;
        let blit = device.compile(blit)?;
        let (width, height) = layout.backing_size(tuning.max_pixel_ratio);
        let surfaces = PingPongSurface::allocate(device.as_mut(), width, height);
        tracing::info!(width, height, "feedback backdrop ready");

        Ok(Self {
            device,
            feedback,
            blit,
            surfaces: Some(surfaces),
            energy,
            tuning,
            layout,
            mode: ShaderMode::default(),
            palette: None,
            clock: FrameClock::new(),
            state: RendererState::Ready,
        })
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn shader_mode(&self) -> ShaderMode {
        self.mode
    }

    pub fn surfaces(&self) -> Option<&PingPongSurface> {
        self.surfaces.as_ref()
    }

    /// Sizes of both targets as the device reports them.
    pub fn surface_sizes(&self) -> Option<[(u32, u32); 2]> {
        let surfaces = self.surfaces.as_ref()?;
        let [a, b] = surfaces.targets();
        Some([self.device.target_size(a)?, self.device.target_size(b)?])
    }

    pub fn layout(&self) -> CanvasLayout {
        self.layout
    }

    fn uniforms(&self, time: f32, now: Millis) -> FeedbackUniforms {
        let frame = self.energy.sample(now);
        let (width, height) = self
            .surfaces
            .as_ref()
            .map(PingPongSurface::size)
            .unwrap_or((1, 1));
        FeedbackUniforms {
            resolution: [width as f32, height as f32],
            time,
            energy: frame.overall,
            bass: frame.bass,
            beat: frame.beat,
            decay: self.tuning.decay[self.mode.index()],
            mix: self.tuning.mix_base + self.tuning.mix_energy * frame.overall,
            beat_boost: self.tuning.beat_boost,
            mode: self.mode,
            palette: self.palette.unwrap_or(Palette::DEFAULT),
        }
    }
}

impl Layer for FeedbackRenderer {
    fn start(&mut self) {
        if self.state.start() {
            tracing::debug!(mode = self.mode.name(), "feedback backdrop started");
        }
    }

    fn stop(&mut self) {
        if self.state.stop() {
            tracing::debug!("feedback backdrop stopped");
        }
    }

    fn is_running(&self) -> bool {
        self.state == RendererState::Running
    }

    fn resize(&mut self, layout: CanvasLayout) {
        if self.state == RendererState::Disposed {
            return;
        }
        self.layout = layout;
        let (width, height) = layout.backing_size(self.tuning.max_pixel_ratio);
        if let Some(surfaces) = self.surfaces.as_mut() {
            surfaces.reallocate(self.device.as_mut(), width, height);
        }
        tracing::debug!(width, height, "feedback surfaces reallocated");
    }

    fn tick(&mut self, now: Millis) {
        if self.state != RendererState::Running {
            return;
        }
        let time = self.clock.advance(now);
        let uniforms = self.uniforms(time, now);
        let Some(surfaces) = self.surfaces.as_mut() else {
            return;
        };

        let (source, destination) = (surfaces.source(), surfaces.destination());
        self.device
            .draw_feedback(self.feedback, source, destination, &uniforms);
        self.device.present(self.blit, destination);
        surfaces.swap();
    }

    fn capture(&self) -> Option<RgbaImage> {
        self.device.capture()
    }
}

impl Backdrop for FeedbackRenderer {
    fn set_mode(&mut self, mode: i64) {
        self.mode = normalize_mode(mode);
    }

    fn mode(&self) -> usize {
        self.mode.index()
    }

    fn mode_count(&self) -> usize {
        ShaderMode::COUNT
    }

    fn set_palette(&mut self, palette: Palette) {
        self.palette = Some(palette);
    }

    fn dispose(&mut self) {
        if let Some(surfaces) = self.surfaces.take() {
            surfaces.release(self.device.as_mut());
        }
        self.state = RendererState::Disposed;
        tracing::debug!("feedback backdrop disposed");
    }

    fn into_canvas(self: Box<Self>) -> Option<Canvas> {
        let mut this = *self;
        if let Some(surfaces) = this.surfaces.take() {
            surfaces.release(this.device.as_mut());
        }
        Some(Canvas::new(this.layout).with_shading(this.device))
    }
}

impl fmt::Debug for FeedbackRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FeedbackRenderer")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("surfaces", &self.surfaces)
            .field("layout", &self.layout)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;
    use crate::{
        analysis::EnergyFrame,
        render::software::{DeviceStats, SoftwareDevice},
    };

    fn renderer_with(energy: Arc<dyn EnergySource>, layout: CanvasLayout) -> (FeedbackRenderer, DeviceStats) {
        let device = SoftwareDevice::new();
        let stats = device.stats();
        let renderer =
            FeedbackRenderer::new(Box::new(device), layout, energy, FeedbackTuning::default()).unwrap();
        (renderer, stats)
    }

    fn renderer() -> (FeedbackRenderer, DeviceStats) {
        let energy: Arc<dyn EnergySource> = Arc::new(|_now: Millis| EnergyFrame::new(0.5, 0.4, false));
        renderer_with(energy, CanvasLayout::new(12.0, 8.0, 1.0))
    }

    #[test]
    fn set_mode_wraps_any_integer() {
        let (mut renderer, _) = renderer();
        for raw in [-13_i64, -7, -1, 0, 1, 5, 6, 7, 1_000_003] {
            renderer.set_mode(raw);
            assert_eq!(renderer.mode() as i64, ((raw % 6) + 6) % 6);
        }
        renderer.set_mode(-1);
        assert_eq!(renderer.mode(), 5);
        renderer.set_mode(7);
        assert_eq!(renderer.mode(), 1);
        renderer.set_mode(5);
        renderer.next_mode();
        assert_eq!(renderer.mode(), 0);
    }

    #[test]
    fn resize_reallocates_both_surfaces_at_clamped_ratio() {
        let (mut renderer, stats) = renderer();
        renderer.resize(CanvasLayout::new(800.0, 600.0, 3.0));

        assert_eq!(renderer.surfaces().unwrap().size(), (1600, 1200));
        assert_eq!(renderer.surface_sizes().unwrap(), [(1600, 1200), (1600, 1200)]);
        assert_eq!(stats.live_targets(), 2);
        assert_eq!(stats.allocations(), 4);
    }

    #[test]
    fn ticks_only_while_running_and_swaps_roles() {
        let (mut renderer, stats) = renderer();
        renderer.tick(0.0);
        assert_eq!(stats.draw_calls(), 0);

        renderer.start();
        let before = renderer.surfaces().unwrap().source();
        renderer.tick(16.0);
        let after = renderer.surfaces().unwrap().source();
        assert_ne!(before, after);
        assert_eq!(stats.draw_calls(), 2);
        assert_eq!(stats.presents(), 1);

        renderer.stop();
        renderer.stop();
        renderer.tick(32.0);
        assert_eq!(stats.presents(), 1);
        assert_eq!(renderer.state(), RendererState::Stopped);
    }

    #[test]
    fn samples_energy_once_per_tick() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let energy: Arc<dyn EnergySource> = Arc::new(move |_now: Millis| {
            counter.fetch_add(1, Ordering::Relaxed);
            EnergyFrame::SILENT
        });
        let (mut renderer, _) = renderer_with(energy, CanvasLayout::new(4.0, 4.0, 1.0));
        renderer.start();
        for tick in 0..5 {
            renderer.tick(tick as f64 * 16.0);
        }
        assert_eq!(calls.load(Ordering::Relaxed), 5);
    }

    #[test]
    fn palette_changes_do_not_touch_surfaces() {
        let (mut renderer, stats) = renderer();
        let targets = renderer.surfaces().unwrap().targets();
        renderer.set_palette(Palette::from_seed("fresh"));
        assert_eq!(renderer.surfaces().unwrap().targets(), targets);
        assert_eq!(stats.allocations(), 2);
    }

    #[test]
    fn draws_visible_output() {
        let (mut renderer, _) = renderer();
        renderer.set_palette(Palette::from_seed("visible"));
        renderer.start();
        renderer.tick(0.0);
        renderer.tick(16.0);
        let frame = renderer.capture().unwrap();
        assert_eq!(frame.dimensions(), (12, 8));
        assert!(frame.pixels().any(|p| p.0[..3].iter().any(|&c| c > 0)));
    }

    #[test]
    fn dispose_releases_everything_and_ignores_later_calls() {
        let (mut renderer, stats) = renderer();
        renderer.start();
        renderer.dispose();
        assert_eq!(stats.live_targets(), 0);
        renderer.start();
        renderer.resize(CanvasLayout::new(10.0, 10.0, 1.0));
        renderer.tick(10.0);
        assert_eq!(renderer.state(), RendererState::Disposed);
        assert_eq!(stats.draw_calls(), 0);
        assert!(renderer.surface_sizes().is_none());
    }

    #[test]
    fn broken_shader_is_fatal() {
        let energy: Arc<dyn EnergySource> = Arc::new(|_now: Millis| EnergyFrame::SILENT);
        let bad = ShaderSource {
            code: "@fragment fn fs_feedback() -> @location(0) vec4<f32> { return 1.0; }".into(),
            ..ShaderSource::feedback()
        };
        let result = FeedbackRenderer::with_sources(
            Box::new(SoftwareDevice::new()),
            CanvasLayout::new(4.0, 4.0, 1.0),
            energy,
            FeedbackTuning::default(),
            &bad,
            &ShaderSource::blit(),
        );
        assert!(result.is_err());
    }
}
