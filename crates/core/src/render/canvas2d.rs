use std::{f32::consts::TAU, fmt, sync::Arc};

use fastrand::Rng;
use image::RgbaImage;
use tiny_skia::{
    BlendMode, Color, FillRule, GradientStop, LinearGradient, Paint, Path, PathBuilder, Pixmap,
    Point, RadialGradient, Rect, Shader, SpreadMode, Transform,
};

use super::{raster, Backdrop, Canvas, CanvasLayout, Layer, RendererState};
use crate::{
    analysis::EnergySource,
    config::FallbackTuning,
    palette::Palette,
    scene::{normalize_mode, FallbackMode, ModeSet},
    timeline::Millis,
    VisualError,
};

/// Particles that leave the canvas by more than this are respawned.
const MARGIN: f32 = 40.0;
const SPAWN_OFFSET: f32 = 20.0;

#[derive(Debug, Clone, PartialEq)]
struct Particle {
    x: f32,
    y: f32,
    vx: f32,
    vy: f32,
    radius: f32,
    life: u32,
}

#[derive(Debug, Clone, PartialEq)]
struct Bloom {
    x: f32,
    y: f32,
    radius: f32,
    max_radius: f32,
    hue: f32,
    speed: f32,
}

/// Reduced-capability backdrop drawn with a plain 2D raster context.
pub struct Canvas2dRenderer {
    pixmap: Pixmap,
    layout: CanvasLayout,
    max_ratio: f32,
    ratio: f32,
    width: f32,
    height: f32,
    energy: Arc<dyn EnergySource>,
    tuning: FallbackTuning,
    rng: Rng,
    mode: FallbackMode,
    particles: Vec<Particle>,
    blooms: Vec<Bloom>,
    phase: f32,
    state: RendererState,
}

impl Canvas2dRenderer {
    pub fn new(
        layout: CanvasLayout,
        energy: Arc<dyn EnergySource>,
        tuning: FallbackTuning,
        max_ratio: f32,
    ) -> crate::Result<Self> {
        let (px_width, px_height) = layout.backing_size(max_ratio);
        let pixmap = Pixmap::new(px_width, px_height)
            .ok_or(VisualError::ContextUnavailable("2d"))?;

        let mut renderer = Self {
            pixmap,
            layout,
            max_ratio,
            ratio: layout.pixel_ratio(max_ratio),
            width: layout.css_width.max(0.0).floor(),
            height: layout.css_height.max(0.0).floor(),
            energy,
            tuning,
            rng: Rng::new(),
            mode: FallbackMode::default(),
            particles: Vec::new(),
            blooms: Vec::new(),
            phase: 0.0,
            state: RendererState::Ready,
        };
        renderer.reset_scene();
        tracing::info!(px_width, px_height, "2D backdrop ready");
        Ok(renderer)
    }

    /// Reseeds the random source and restarts the current scene, making
    /// every following frame reproducible.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Rng::with_seed(seed);
        self.reset_scene();
        self
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    pub fn fallback_mode(&self) -> FallbackMode {
        self.mode
    }

    pub fn backing_size(&self) -> (u32, u32) {
        (self.pixmap.width(), self.pixmap.height())
    }

    fn reset_scene(&mut self) {
        let count = self.tuning.particle_count;
        self.particles = (0..count).map(|_| self.spawn_particle(true)).collect();
        self.blooms.clear();
        self.phase = 0.0;
    }

    fn spawn_particle(&mut self, initial: bool) -> Particle {
        let x = self.rng.f32() * self.width;
        let y = if initial {
            self.rng.f32() * self.height
        } else if self.rng.f32() < 0.5 {
            -SPAWN_OFFSET
        } else {
            self.height + SPAWN_OFFSET
        };
        let angle = self.rng.f32() * TAU;
        let speed = 0.4 + self.rng.f32() * 1.2;
        Particle {
            x,
            y,
            vx: angle.cos() * speed,
            vy: angle.sin() * speed,
            radius: 3.0 + self.rng.f32() * 10.0,
            life: 0,
        }
    }

    fn spawn_bloom(&mut self, energy: f32, big: bool) {
        let x = self.rng.f32() * self.width;
        let y = self.rng.f32() * self.height;
        let reach = if big { 260.0 } else { 140.0 };
        let speed = 1.2 + self.rng.f32() * 0.8;
        self.blooms.push(Bloom {
            x,
            y,
            radius: 0.0,
            max_radius: reach * (0.6 + energy * 0.8),
            hue: energy_hue(energy),
            speed,
        });
    }

    fn transform(&self) -> Transform {
        Transform::from_scale(self.ratio, self.ratio)
    }

    /// Darkens the whole canvas so earlier frames fade into trails.
    fn fade(&mut self, alpha: f32) {
        let Some(rect) = Rect::from_xywh(
            0.0,
            0.0,
            self.pixmap.width() as f32,
            self.pixmap.height() as f32,
        ) else {
            return;
        };
        let mut paint = Paint::default();
        paint.set_color(raster::hex(0x0a0c10, alpha));
        self.pixmap
            .fill_rect(rect, &paint, Transform::identity(), None);
    }

    fn glow(&mut self, x: f32, y: f32, radius: f32, inner: Color, outer: Color) {
        let Some(path) = PathBuilder::from_circle(x, y, radius) else {
            return;
        };
        let Some(shader) = RadialGradient::new(
            Point::from_xy(x, y),
            Point::from_xy(x, y),
            radius,
            vec![GradientStop::new(0.0, inner), GradientStop::new(1.0, outer)],
            SpreadMode::Pad,
            Transform::identity(),
        ) else {
            return;
        };
        let transform = self.transform();
        self.pixmap
            .fill_path(&path, &additive(shader), FillRule::Winding, transform, None);
    }

    fn draw_particles(&mut self, energy: f32) {
        self.fade(0.06 + energy * 0.04);

        let hue = energy_hue(energy);
        let amp = 0.8 + energy * 3.2;
        let (width, height) = (self.width, self.height);
        let lifetime = self.tuning.particle_lifetime;

        for i in 0..self.particles.len() {
            let p = &mut self.particles[i];
            p.x += p.vx * amp;
            p.y += p.vy * amp;
            p.vx *= 0.998;
            p.vy *= 0.998;
            p.life += 1;

            let escaped = p.x < -MARGIN
                || p.x > width + MARGIN
                || p.y < -MARGIN
                || p.y > height + MARGIN;
            let expired = escaped || p.life > lifetime;
            let (x, y) = (p.x, p.y);
            let radius = p.radius * (0.7 + energy * 0.6);

            if expired {
                self.particles[i] = self.spawn_particle(false);
                continue;
            }
            self.glow(
                x,
                y,
                radius,
                raster::hsla(hue, 0.95, 0.65 + energy * 0.2, 0.18 + energy * 0.18),
                raster::hsla((hue + 40.0) % 360.0, 1.0, 0.55 + energy * 0.25, 0.0),
            );
        }
    }

    fn draw_blooms(&mut self, energy: f32, beat: bool) {
        self.fade(0.08 + energy * 0.05);

        if self.rng.f32() < 0.25 + energy * 0.35 {
            self.spawn_bloom(energy, false);
        }
        if beat {
            let boosted = (energy + 0.2).min(1.0);
            self.spawn_bloom(boosted, true);
            self.spawn_bloom(boosted, true);
        }

        let mut i = self.blooms.len();
        while i > 0 {
            i -= 1;
            let bloom = &mut self.blooms[i];
            bloom.radius += bloom.speed * (1.2 + energy * 2.5);
            let alpha = (0.24 - (bloom.radius / bloom.max_radius) * 0.24).max(0.0);
            let (x, y, radius, hue) = (bloom.x, bloom.y, bloom.radius.max(1.0), bloom.hue);
            let done = bloom.radius >= bloom.max_radius;

            self.glow(
                x,
                y,
                radius,
                raster::hsla(hue, 0.95, 0.6 + energy * 0.25, alpha),
                raster::hsla((hue + 50.0) % 360.0, 0.95, 0.55 + energy * 0.25, 0.0),
            );
            if done {
                self.blooms.remove(i);
            }
        }
    }

    fn draw_bars(&mut self, energy: f32, bass: f32) {
        self.fade(0.12);

        let hue = energy_hue(energy);
        let count = self.tuning.bar_count.max(1);
        let bar_width = (self.width / count as f32).floor().max(2.0);
        let height = self.height;
        let transform = self.transform();
        self.phase += 0.003 + energy * 0.01;

        for i in 0..count {
            let x = i as f32 * bar_width + bar_width * 0.15;
            let n = (self.phase * 6.0 + i as f32 * 0.5).sin() * 0.5 + 0.5;
            let bar_height =
                (0.12 + energy * 0.68) * height * (0.6 + n * 0.8) * (0.7 + bass * 0.6);
            let y = height - bar_height - 2.0;

            let Some(shader) = LinearGradient::new(
                Point::from_xy(0.0, y),
                Point::from_xy(0.0, height),
                vec![
                    GradientStop::new(
                        0.0,
                        raster::hsla(
                            (hue + 20.0) % 360.0,
                            0.95,
                            0.65 + energy * 0.2,
                            0.35 + energy * 0.25,
                        ),
                    ),
                    GradientStop::new(
                        1.0,
                        raster::hsla((hue + 80.0) % 360.0, 0.95, 0.55 + energy * 0.2, 0.0),
                    ),
                ],
                SpreadMode::Pad,
                Transform::identity(),
            ) else {
                continue;
            };
            let radius = (bar_width * 0.4).min(6.0);
            if let Some(path) = rounded_rect(x, y, bar_width * 0.7, bar_height, radius) {
                self.pixmap
                    .fill_path(&path, &additive(shader), FillRule::Winding, transform, None);
            }
        }
    }
}

fn energy_hue(energy: f32) -> f32 {
    180.0 + energy * 150.0
}

fn additive(shader: Shader<'static>) -> Paint<'static> {
    Paint {
        shader,
        blend_mode: BlendMode::Plus,
        anti_alias: true,
        ..Paint::default()
    }
}

fn rounded_rect(x: f32, y: f32, width: f32, height: f32, radius: f32) -> Option<Path> {
    let r = radius.min(width / 2.0).min(height / 2.0).max(0.0);
    let mut pb = PathBuilder::new();
    pb.move_to(x + r, y);
    pb.line_to(x + width - r, y);
    pb.quad_to(x + width, y, x + width, y + r);
    pb.line_to(x + width, y + height - r);
    pb.quad_to(x + width, y + height, x + width - r, y + height);
    pb.line_to(x + r, y + height);
    pb.quad_to(x, y + height, x, y + height - r);
    pb.line_to(x, y + r);
    pb.quad_to(x, y, x + r, y);
    pb.close();
    pb.finish()
}

impl Layer for Canvas2dRenderer {
    fn start(&mut self) {
        if self.state.start() {
            tracing::debug!(mode = self.mode.name(), "2D backdrop started");
        }
    }

    fn stop(&mut self) {
        self.state.stop();
    }

    fn is_running(&self) -> bool {
        self.state == RendererState::Running
    }

    fn resize(&mut self, layout: CanvasLayout) {
        if self.state == RendererState::Disposed {
            return;
        }
        let (px_width, px_height) = layout.backing_size(self.max_ratio);
        let Some(pixmap) = Pixmap::new(px_width, px_height) else {
            tracing::warn!(px_width, px_height, "could not allocate 2D backing store");
            return;
        };
        self.pixmap = pixmap;
        self.layout = layout;
        self.ratio = layout.pixel_ratio(self.max_ratio);
        self.width = layout.css_width.max(0.0).floor();
        self.height = layout.css_height.max(0.0).floor();
    }

    fn tick(&mut self, now: Millis) {
        if self.state != RendererState::Running {
            return;
        }
        let frame = self.energy.sample(now);
        let energy = frame.overall.clamp(0.0, 1.0);
        match self.mode {
            FallbackMode::Particles => self.draw_particles(energy),
            FallbackMode::Blooms => self.draw_blooms(energy, frame.beat),
            FallbackMode::Bars => self.draw_bars(energy, frame.bass.clamp(0.0, 1.0)),
        }
    }

    fn capture(&self) -> Option<RgbaImage> {
        Some(raster::to_image(&self.pixmap))
    }
}

impl Backdrop for Canvas2dRenderer {
    /// Switching scenes restarts the particle pool and clears all blooms.
    fn set_mode(&mut self, mode: i64) {
        self.mode = normalize_mode(mode);
        self.reset_scene();
    }

    fn mode(&self) -> usize {
        self.mode.index()
    }

    fn mode_count(&self) -> usize {
        FallbackMode::COUNT
    }

    // The 2D scenes derive their colours from energy alone.
    fn set_palette(&mut self, _palette: Palette) {}

    fn dispose(&mut self) {
        self.state = RendererState::Disposed;
        self.particles.clear();
        self.blooms.clear();
    }

    fn into_canvas(self: Box<Self>) -> Option<Canvas> {
        Some(Canvas::new(self.layout))
    }
}

impl fmt::Debug for Canvas2dRenderer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Canvas2dRenderer")
            .field("state", &self.state)
            .field("mode", &self.mode)
            .field("layout", &self.layout)
            .field("particles", &self.particles.len())
            .field("blooms", &self.blooms.len())
            .finish()
    }
}
