use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc,
    },
};

use glam::{Vec2, Vec3};
use image::{Rgba, RgbaImage};
use naga::valid::{Capabilities, ValidationFlags, Validator};

use super::{
    device::{FeedbackUniforms, ProgramId, ShaderSource, ShadingDevice, TargetId},
    kernel,
};
use crate::error::ShaderError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProgramKind {
    Feedback,
    Blit,
}

struct Target {
    width: u32,
    height: u32,
    pixels: Vec<Vec3>,
}

impl Target {
    fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            pixels: vec![Vec3::ZERO; width as usize * height as usize],
        }
    }

    fn texel(&self, x: i64, y: i64) -> Vec3 {
        let x = x.clamp(0, self.width as i64 - 1) as usize;
        let y = y.clamp(0, self.height as i64 - 1) as usize;
        self.pixels[y * self.width as usize + x]
    }

    /// Bilinear sample with clamp-to-edge addressing.
    fn sample(&self, uv: Vec2) -> Vec3 {
        if self.pixels.is_empty() {
            return Vec3::ZERO;
        }
        let x = uv.x * self.width as f32 - 0.5;
        let y = uv.y * self.height as f32 - 0.5;
        let (x0, y0) = (x.floor(), y.floor());
        let (fx, fy) = (x - x0, y - y0);
        let (x0, y0) = (x0 as i64, y0 as i64);

        let top = self.texel(x0, y0).lerp(self.texel(x0 + 1, y0), fx);
        let bottom = self.texel(x0, y0 + 1).lerp(self.texel(x0 + 1, y0 + 1), fx);
        top.lerp(bottom, fy)
    }
}

/// Counters observable while the device is owned by a renderer.
#[derive(Debug, Clone, Default)]
pub struct DeviceStats {
    inner: Arc<StatsInner>,
}

#[derive(Debug, Default)]
struct StatsInner {
    draw_calls: AtomicU64,
    presents: AtomicU64,
    allocations: AtomicU64,
    live_targets: AtomicUsize,
}

impl DeviceStats {
    pub fn draw_calls(&self) -> u64 {
        self.inner.draw_calls.load(Ordering::Relaxed)
    }

    pub fn presents(&self) -> u64 {
        self.inner.presents.load(Ordering::Relaxed)
    }

    /// Total render targets ever created.
    pub fn allocations(&self) -> u64 {
        self.inner.allocations.load(Ordering::Relaxed)
    }

    pub fn live_targets(&self) -> usize {
        self.inner.live_targets.load(Ordering::Relaxed)
    }
}

/// Reference shading device that runs the feedback program on the CPU.
///
/// Programs are validated with naga exactly as a GPU backend would receive
/// them; the fragment entry point then selects the matching CPU kernel.
pub struct SoftwareDevice {
    programs: Vec<ProgramKind>,
    targets: HashMap<TargetId, Target>,
    next_target: u64,
    screen: Option<Target>,
    stats: DeviceStats,
}

impl SoftwareDevice {
    pub fn new() -> Self {
        Self {
            programs: Vec::new(),
            targets: HashMap::new(),
            next_target: 0,
            screen: None,
            stats: DeviceStats::default(),
        }
    }

    pub fn stats(&self) -> DeviceStats {
        self.stats.clone()
    }

    fn program(&self, id: ProgramId) -> Option<ProgramKind> {
        self.programs.get(id.0 as usize).copied()
    }
}

impl Default for SoftwareDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl ShadingDevice for SoftwareDevice {
    fn compile(&mut self, source: &ShaderSource) -> Result<ProgramId, ShaderError> {
        let code = source.code.as_ref();
        let module = naga::front::wgsl::parse_str(code).map_err(|err| ShaderError::Compile {
            stage: "wgsl",
            message: err.emit_to_string(code),
        })?;
        Validator::new(ValidationFlags::all(), Capabilities::all())
            .validate(&module)
            .map_err(|err| ShaderError::Compile {
                stage: "validation",
                message: err.emit_to_string(code),
            })?;

        let has_entry = |name: &str, stage: naga::ShaderStage| {
            module
                .entry_points
                .iter()
                .any(|ep| ep.name == name && ep.stage == stage)
        };
        if !has_entry(source.vertex_entry, naga::ShaderStage::Vertex) {
            return Err(ShaderError::Link {
                message: format!("`{}` has no vertex entry `{}`", source.label, source.vertex_entry),
            });
        }
        if !has_entry(source.fragment_entry, naga::ShaderStage::Fragment) {
            return Err(ShaderError::Link {
                message: format!(
                    "`{}` has no fragment entry `{}`",
                    source.label, source.fragment_entry
                ),
            });
        }

        let kind = match source.fragment_entry {
            "fs_feedback" => ProgramKind::Feedback,
            "fs_blit" => ProgramKind::Blit,
            other => {
                return Err(ShaderError::Link {
                    message: format!("no software kernel for fragment entry `{other}`"),
                })
            }
        };
        self.programs.push(kind);
        tracing::debug!(label = source.label, "compiled shader program");
        Ok(ProgramId(self.programs.len() as u32 - 1))
    }

    fn create_target(&mut self, width: u32, height: u32) -> TargetId {
        let id = TargetId(self.next_target);
        self.next_target += 1;
        self.targets.insert(id, Target::new(width.max(1), height.max(1)));
        self.stats.inner.allocations.fetch_add(1, Ordering::Relaxed);
        self.stats
            .inner
            .live_targets
            .store(self.targets.len(), Ordering::Relaxed);
        id
    }

    fn release_target(&mut self, target: TargetId) {
        self.targets.remove(&target);
        self.stats
            .inner
            .live_targets
            .store(self.targets.len(), Ordering::Relaxed);
    }

    fn target_size(&self, target: TargetId) -> Option<(u32, u32)> {
        self.targets.get(&target).map(|t| (t.width, t.height))
    }

    fn draw_feedback(
        &mut self,
        program: ProgramId,
        source: TargetId,
        destination: TargetId,
        uniforms: &FeedbackUniforms,
    ) {
        if self.program(program) != Some(ProgramKind::Feedback) || source == destination {
            tracing::warn!(?program, ?source, ?destination, "rejected feedback draw");
            return;
        }
        let Some(mut dst) = self.targets.remove(&destination) else {
            return;
        };
        if let Some(src) = self.targets.get(&source) {
            let (w, h) = (dst.width as usize, dst.height as usize);
            for y in 0..h {
                for x in 0..w {
                    let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
                    dst.pixels[y * w + x] = kernel::shade_feedback(uv, uniforms, |at| src.sample(at));
                }
            }
            self.stats.inner.draw_calls.fetch_add(1, Ordering::Relaxed);
        }
        self.targets.insert(destination, dst);
    }

    fn present(&mut self, program: ProgramId, target: TargetId) {
        if self.program(program) != Some(ProgramKind::Blit) {
            tracing::warn!(?program, "rejected present with non-blit program");
            return;
        }
        let Some(src) = self.targets.get(&target) else {
            return;
        };
        let screen = Target {
            width: src.width,
            height: src.height,
            pixels: src.pixels.clone(),
        };
        self.screen = Some(screen);
        self.stats.inner.draw_calls.fetch_add(1, Ordering::Relaxed);
        self.stats.inner.presents.fetch_add(1, Ordering::Relaxed);
    }

    fn capture(&self) -> Option<RgbaImage> {
        let screen = self.screen.as_ref()?;
        let width = screen.width;
        Some(RgbaImage::from_fn(screen.width, screen.height, |x, y| {
            let c = screen.pixels[(y * width + x) as usize].clamp(Vec3::ZERO, Vec3::ONE) * 255.0;
            Rgba([c.x.round() as u8, c.y.round() as u8, c.z.round() as u8, 255])
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{palette::Palette, scene::ShaderMode};

    fn uniforms() -> FeedbackUniforms {
        FeedbackUniforms {
            resolution: [8.0, 6.0],
            time: 0.5,
            energy: 0.4,
            bass: 0.2,
            beat: false,
            decay: 0.98,
            mix: 0.5,
            beat_boost: 0.12,
            mode: ShaderMode::Tunnel,
            palette: Palette::DEFAULT,
        }
    }

    #[test]
    fn bundled_programs_compile() {
        let mut device = SoftwareDevice::new();
        let feedback = device.compile(&ShaderSource::feedback()).unwrap();
        let blit = device.compile(&ShaderSource::blit()).unwrap();
        assert_ne!(feedback, blit);
    }

    #[test]
    fn syntax_errors_fail_compilation() {
        let mut device = SoftwareDevice::new();
        let source = ShaderSource {
            code: "fn broken( -> {".into(),
            ..ShaderSource::feedback()
        };
        let err = device.compile(&source).unwrap_err();
        assert!(matches!(err, ShaderError::Compile { stage: "wgsl", .. }));
    }

    #[test]
    fn missing_entry_point_fails_linking() {
        let mut device = SoftwareDevice::new();
        let source = ShaderSource {
            fragment_entry: "fs_missing",
            ..ShaderSource::feedback()
        };
        assert!(matches!(
            device.compile(&source),
            Err(ShaderError::Link { .. })
        ));
    }

    #[test]
    fn tracks_target_lifecycle() {
        let mut device = SoftwareDevice::new();
        let stats = device.stats();
        let a = device.create_target(4, 3);
        let b = device.create_target(4, 3);
        assert_eq!(stats.live_targets(), 2);
        assert_eq!(device.target_size(a), Some((4, 3)));
        device.release_target(a);
        device.release_target(b);
        assert_eq!(stats.live_targets(), 0);
        assert_eq!(stats.allocations(), 2);
        assert_eq!(device.target_size(a), None);
    }

    #[test]
    fn draws_and_presents_to_screen() {
        let mut device = SoftwareDevice::new();
        let feedback = device.compile(&ShaderSource::feedback()).unwrap();
        let blit = device.compile(&ShaderSource::blit()).unwrap();
        let src = device.create_target(8, 6);
        let dst = device.create_target(8, 6);

        assert!(device.capture().is_none());
        device.draw_feedback(feedback, src, dst, &uniforms());
        device.present(blit, dst);

        let frame = device.capture().unwrap();
        assert_eq!(frame.dimensions(), (8, 6));
        assert!(frame.pixels().any(|p| p.0[0] > 0 || p.0[1] > 0 || p.0[2] > 0));
        assert_eq!(device.stats().draw_calls(), 2);
        assert_eq!(device.stats().presents(), 1);
    }

    #[test]
    fn rejects_programs_used_for_the_wrong_pass() {
        let mut device = SoftwareDevice::new();
        let blit = device.compile(&ShaderSource::blit()).unwrap();
        let src = device.create_target(2, 2);
        let dst = device.create_target(2, 2);
        device.draw_feedback(blit, src, dst, &uniforms());
        assert_eq!(device.stats().draw_calls(), 0);
    }
}
