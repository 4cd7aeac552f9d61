//! Foreground layer of glowing connections between page anchors.
//!
//! Two schedulers feed the layer. Ambient pulses follow sustained loudness
//! and are spawned on an energy-dependent interval; surges follow detected
//! beats and fan out from configured origin anchors. They share nothing but
//! the canvas.

use std::{collections::VecDeque, fmt, sync::Arc};

use fastrand::Rng;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use tiny_skia::{
    Color, GradientStop, LineCap, LinearGradient, Paint, Path, PathBuilder, Pixmap, Point,
    SpreadMode, Stroke, Transform,
};

use crate::{
    analysis::EnergySource,
    config::OverlayTuning,
    render::{raster, CanvasLayout, Layer, RendererState},
    timeline::{Cooldown, Interval, Millis},
    VisualError,
};

/// Neon gradients cycled by wall-clock time.
const NEON: [[u32; 3]; 4] = [
    [0x00d1ff, 0xffe600, 0x29ffb6],
    [0xff00e6, 0x00ffee, 0xffd000],
    [0x8a5cff, 0x00ff9e, 0xffd1ff],
    [0x00b3ff, 0x7cff00, 0xffea00],
];
const PALETTE_PERIOD_MS: Millis = 2000.0;
const SURGE_PALETTE_OFFSET_MS: Millis = 500.0;

fn neon_at(now: Millis) -> [u32; 3] {
    let index = (now.max(0.0) / PALETTE_PERIOD_MS).floor() as usize % NEON.len();
    NEON[index]
}

/// A page-relative point in CSS pixels.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Anchor {
    pub x: f32,
    pub y: f32,
}

impl Anchor {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    fn midpoint(self, other: Anchor) -> Anchor {
        Anchor::new((self.x + other.x) / 2.0, (self.y + other.y) / 2.0)
    }
}

/// Host accessor for the current ordered anchor set. Called every tick.
pub trait AnchorSource {
    fn anchors(&self) -> Vec<Anchor>;
}

impl<F> AnchorSource for F
where
    F: Fn() -> Vec<Anchor>,
{
    fn anchors(&self) -> Vec<Anchor> {
        self()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PulseKind {
    Ambient,
    Surge,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Pulse {
    pub spawn_time: Millis,
    pub endpoints: (Anchor, Anchor),
    pub hue: f32,
    /// Overall energy for ambient pulses, bass for surges.
    pub energy: f32,
    pub kind: PulseKind,
}

impl Pulse {
    /// Remaining lifetime fraction, `None` once expired.
    fn remaining(&self, now: Millis, lifetime: Millis) -> Option<f32> {
        let age = now - self.spawn_time;
        if age > lifetime {
            None
        } else {
            Some((1.0 - age / lifetime).max(0.0) as f32)
        }
    }
}

pub struct PulseOverlay {
    pixmap: Pixmap,
    layout: CanvasLayout,
    max_ratio: f32,
    ratio: f32,
    anchors: Arc<dyn AnchorSource>,
    energy: Arc<dyn EnergySource>,
    tuning: OverlayTuning,
    rng: Rng,
    pulses: VecDeque<Pulse>,
    surges: Vec<Pulse>,
    schedule: Interval,
    surge_cooldown: Cooldown,
    state: RendererState,
}

impl PulseOverlay {
    pub fn new(
        layout: CanvasLayout,
        anchors: Arc<dyn AnchorSource>,
        energy: Arc<dyn EnergySource>,
        tuning: OverlayTuning,
        max_ratio: f32,
    ) -> crate::Result<Self> {
        let (width, height) = layout.backing_size(max_ratio);
        let pixmap =
            Pixmap::new(width, height).ok_or(VisualError::ContextUnavailable("overlay"))?;
        Ok(Self {
            pixmap,
            layout,
            max_ratio,
            ratio: layout.pixel_ratio(max_ratio),
            anchors,
            energy,
            surge_cooldown: Cooldown::new(tuning.surge_cooldown_ms),
            tuning,
            rng: Rng::new(),
            pulses: VecDeque::new(),
            surges: Vec::new(),
            schedule: Interval::new(),
            state: RendererState::Ready,
        })
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Rng::with_seed(seed);
        self
    }

    pub fn pulse_count(&self) -> usize {
        self.pulses.len()
    }

    pub fn surge_count(&self) -> usize {
        self.surges.len()
    }

    /// Live ambient pulses, oldest first.
    pub fn pulses(&self) -> impl Iterator<Item = &Pulse> {
        self.pulses.iter()
    }

    pub fn surges(&self) -> &[Pulse] {
        &self.surges
    }

    pub fn state(&self) -> RendererState {
        self.state
    }

    /// Adds an ambient pulse, evicting the oldest ones beyond the cap.
    pub fn admit(&mut self, pulse: Pulse) {
        self.pulses.push_back(pulse);
        self.enforce_cap();
    }

    fn enforce_cap(&mut self) {
        while self.pulses.len() > self.tuning.max_pulses {
            self.pulses.pop_front();
        }
    }

    fn schedule_ambient(&mut self, anchors: &[Anchor], energy: f32, now: Millis) {
        self.schedule.prime(now);
        if energy <= self.tuning.energy_gate {
            return;
        }
        let interval = self.tuning.base_interval_ms / (0.4 + 3.5 * energy as f64);
        if !self.schedule.elapsed(now, interval) || anchors.len() < 2 {
            return;
        }

        let pairs = unique_pairs(anchors.len());
        let count = (self.tuning.density * (1.0 + energy * 3.0)).ceil().max(1.0) as usize;
        for _ in 0..count {
            let (i, j) = pairs[self.rng.usize(..pairs.len())];
            let hue = 180.0 + self.rng.f32() * 60.0;
            self.admit(Pulse {
                spawn_time: now,
                endpoints: (anchors[i], anchors[j]),
                hue,
                energy,
                kind: PulseKind::Ambient,
            });
        }
    }

    fn schedule_surges(&mut self, anchors: &[Anchor], bass: f32, now: Millis) {
        if anchors.len() < 2 || !self.surge_cooldown.is_ready(now) {
            return;
        }
        for &origin in &self.tuning.surge_origins {
            let Some(&from) = anchors.get(origin) else {
                continue;
            };
            for (index, &to) in anchors.iter().enumerate() {
                if index == origin {
                    continue;
                }
                let hue = 200.0 + self.rng.f32() * 40.0;
                self.surges.push(Pulse {
                    spawn_time: now,
                    endpoints: (from, to),
                    hue,
                    energy: bass,
                    kind: PulseKind::Surge,
                });
            }
        }
        self.surge_cooldown.try_fire(now);
    }

    fn jitter(&mut self) -> f32 {
        (self.rng.f32() - 0.5) * self.tuning.jitter_px
    }

    fn curve(&mut self, pulse: &Pulse) -> Option<Path> {
        let (from, to) = pulse.endpoints;
        let mid = from.midpoint(to);
        let control = Anchor::new(mid.x + self.jitter(), mid.y + self.jitter());
        let mut pb = PathBuilder::new();
        pb.move_to(from.x, from.y);
        pb.quad_to(control.x, control.y, to.x, to.y);
        pb.finish()
    }

    fn stroke(&mut self, path: &Path, paint: &Paint, width: f32) {
        let stroke = Stroke {
            width,
            line_cap: LineCap::Round,
            ..Stroke::default()
        };
        let transform = Transform::from_scale(self.ratio, self.ratio);
        self.pixmap.stroke_path(path, paint, &stroke, transform, None);
    }

    /// Soft halo standing in for a canvas shadow blur.
    fn halo(&mut self, path: &Path, color: u32, alpha: f32, width: f32, blur: f32) {
        let mut paint = Paint::default();
        paint.anti_alias = true;
        for (spread, weight) in [(1.0, 0.35), (0.5, 0.65)] {
            paint.set_color(raster::hex(color, alpha * weight));
            self.stroke(path, &paint, width + blur * spread);
        }
    }

    fn draw_ambient(&mut self, pulse: &Pulse, now: Millis) {
        let Some(a) = pulse.remaining(now, self.tuning.pulse_lifetime_ms) else {
            return;
        };
        let Some(path) = self.curve(pulse) else {
            return;
        };
        let e = pulse.energy;
        let colors = neon_at(now);
        let width = 1.0 + 5.0 * a * (0.3 + 0.7 * e);
        let edge = 0.1 * a * e;
        let core = 0.2 + 0.8 * a * e;

        self.halo(&path, colors[1], 0.12 * core, width, 16.0 + 40.0 * a * e);
        let (from, to) = pulse.endpoints;
        let stops = vec![
            GradientStop::new(0.0, raster::hex(colors[0], edge)),
            GradientStop::new(0.5, raster::hex(colors[1], core)),
            GradientStop::new(1.0, raster::hex(colors[2], edge)),
        ];
        if let Some(paint) = gradient_paint(from, to, stops) {
            self.stroke(&path, &paint, width);
        }
    }

    fn draw_surge(&mut self, surge: &Pulse, now: Millis) {
        let Some(a) = surge.remaining(now, self.tuning.surge_lifetime_ms) else {
            return;
        };
        let Some(path) = self.curve(surge) else {
            return;
        };
        let e = surge.energy.max(0.5);
        let colors = neon_at(now + SURGE_PALETTE_OFFSET_MS);
        let width = 3.0 + 9.0 * a * e;

        self.halo(&path, colors[1], 0.25 * a, width, 40.0 + 60.0 * a * e);
        let (from, to) = surge.endpoints;
        let stops = vec![
            GradientStop::new(0.0, raster::hex(colors[0], 1.0)),
            GradientStop::new(1.0, raster::hex(colors[2], 1.0)),
        ];
        if let Some(paint) = gradient_paint(from, to, stops) {
            self.stroke(&path, &paint, width);
        }
    }

    fn render(&mut self, now: Millis) {
        self.pixmap.fill(Color::TRANSPARENT);

        let ambient_life = self.tuning.pulse_lifetime_ms;
        self.pulses
            .retain(|p| p.remaining(now, ambient_life).is_some());
        let pulses: Vec<Pulse> = self.pulses.iter().cloned().collect();
        for pulse in &pulses {
            self.draw_ambient(pulse, now);
        }

        let surge_life = self.tuning.surge_lifetime_ms;
        self.surges.retain(|s| s.remaining(now, surge_life).is_some());
        let surges = self.surges.clone();
        for surge in &surges {
            self.draw_surge(surge, now);
        }
    }
}

fn unique_pairs(count: usize) -> Vec<(usize, usize)> {
    (0..count)
        .flat_map(|i| (i + 1..count).map(move |j| (i, j)))
        .collect()
}

fn gradient_paint(from: Anchor, to: Anchor, stops: Vec<GradientStop>) -> Option<Paint<'static>> {
    let shader = LinearGradient::new(
        Point::from_xy(from.x, from.y),
        Point::from_xy(to.x, to.y),
        stops,
        SpreadMode::Pad,
        Transform::identity(),
    )?;
    Some(Paint {
        shader,
        anti_alias: true,
        ..Paint::default()
    })
}

impl Layer for PulseOverlay {
    fn start(&mut self) {
        if self.state.start() {
            tracing::debug!("pulse overlay started");
        }
    }

    fn stop(&mut self) {
        self.state.stop();
    }

    fn is_running(&self) -> bool {
        self.state == RendererState::Running
    }

    fn resize(&mut self, layout: CanvasLayout) {
        let (width, height) = layout.backing_size(self.max_ratio);
        match Pixmap::new(width, height) {
            Some(pixmap) => {
                self.pixmap = pixmap;
                self.layout = layout;
                self.ratio = layout.pixel_ratio(self.max_ratio);
            }
            None => tracing::warn!(width, height, "could not allocate overlay backing store"),
        }
    }

    fn tick(&mut self, now: Millis) {
        if self.state != RendererState::Running {
            return;
        }
        let anchors = self.anchors.anchors();
        let frame = self.energy.sample(now);
        let energy = frame.overall.clamp(0.0, 1.0);
        let bass = frame.bass.clamp(0.0, 1.0);

        self.schedule_ambient(&anchors, energy, now);
        if frame.beat {
            self.schedule_surges(&anchors, bass, now);
        }
        self.render(now);
    }

    fn capture(&self) -> Option<RgbaImage> {
        Some(raster::to_image(&self.pixmap))
    }
}

impl fmt::Debug for PulseOverlay {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PulseOverlay")
            .field("state", &self.state)
            .field("layout", &self.layout)
            .field("pulses", &self.pulses.len())
            .field("surges", &self.surges.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::EnergyFrame;

    fn triangle() -> Vec<Anchor> {
        vec![
            Anchor::new(10.0, 10.0),
            Anchor::new(150.0, 20.0),
            Anchor::new(80.0, 80.0),
        ]
    }

    fn overlay_with(anchors: Vec<Anchor>, frame: EnergyFrame) -> PulseOverlay {
        let anchors: Arc<dyn AnchorSource> = Arc::new(move || anchors.clone());
        let energy: Arc<dyn EnergySource> = Arc::new(move |_now: Millis| frame);
        let mut overlay = PulseOverlay::new(
            CanvasLayout::new(160.0, 90.0, 1.0),
            anchors,
            energy,
            OverlayTuning::default(),
            2.0,
        )
        .unwrap()
        .with_seed(42);
        overlay.start();
        overlay
    }

    fn ambient(spawn_time: Millis, hue: f32) -> Pulse {
        Pulse {
            spawn_time,
            endpoints: (Anchor::new(0.0, 0.0), Anchor::new(10.0, 10.0)),
            hue,
            energy: 0.5,
            kind: PulseKind::Ambient,
        }
    }

    #[test]
    fn cap_evicts_oldest_pulse_first() {
        let mut overlay = overlay_with(triangle(), EnergyFrame::SILENT);
        for i in 0..300 {
            overlay.admit(ambient(i as f64, i as f32));
        }
        assert_eq!(overlay.pulse_count(), 300);

        overlay.admit(ambient(300.0, 300.0));
        assert_eq!(overlay.pulse_count(), 300);
        assert_eq!(overlay.pulses().next().unwrap().hue, 1.0);
        assert_eq!(overlay.pulses().last().unwrap().hue, 300.0);
    }

    #[test]
    fn scheduled_pulses_respect_the_cap_during_ticks() {
        let mut overlay = overlay_with(triangle(), EnergyFrame::new(0.9, 0.0, false));
        overlay.tick(0.0);
        for i in 0..300 {
            overlay.admit(ambient(1_000.0 + i as f64 * 0.001, i as f32));
        }
        overlay.tick(1_500.0);
        assert_eq!(overlay.pulse_count(), 300);
        // ceil(2 * (1 + 2.7)) = 8 new pulses displaced the eight oldest.
        assert_eq!(overlay.pulses().next().unwrap().hue, 8.0);
    }

    #[test]
    fn ambient_interval_follows_energy() {
        let mut overlay = overlay_with(triangle(), EnergyFrame::new(0.5, 0.0, false));
        overlay.tick(0.0);
        overlay.tick(400.0);
        assert_eq!(overlay.pulse_count(), 0);

        // interval = 1000 / (0.4 + 1.75) ≈ 465 ms, count = ceil(2 * 2.5) = 5
        overlay.tick(500.0);
        assert_eq!(overlay.pulse_count(), 5);
        assert!(overlay.pulses().all(|p| p.kind == PulseKind::Ambient && p.energy == 0.5));
        overlay.tick(600.0);
        assert_eq!(overlay.pulse_count(), 5);
    }

    #[test]
    fn quiet_audio_spawns_nothing() {
        let mut overlay = overlay_with(triangle(), EnergyFrame::new(0.05, 0.0, false));
        for step in 0..100 {
            overlay.tick(step as f64 * 100.0);
        }
        assert_eq!(overlay.pulse_count(), 0);
    }

    #[test]
    fn single_anchor_spawns_nothing() {
        let mut overlay = overlay_with(vec![Anchor::new(5.0, 5.0)], EnergyFrame::new(1.0, 1.0, true));
        overlay.tick(0.0);
        overlay.tick(5_000.0);
        assert_eq!(overlay.pulse_count(), 0);
        assert_eq!(overlay.surge_count(), 0);
    }

    #[test]
    fn ambient_endpoints_are_distinct_anchors() {
        let anchors = triangle();
        let mut overlay = overlay_with(anchors.clone(), EnergyFrame::new(1.0, 0.0, false));
        overlay.tick(0.0);
        overlay.tick(1_000.0);
        assert!(overlay.pulse_count() > 0);
        for pulse in overlay.pulses() {
            let (a, b) = pulse.endpoints;
            assert_ne!(a, b);
            assert!(anchors.contains(&a) && anchors.contains(&b));
        }
    }

    #[test]
    fn surges_fan_out_from_each_origin_with_cooldown() {
        let mut overlay = overlay_with(triangle(), EnergyFrame::new(0.0, 0.7, true));
        overlay.tick(1_000.0);
        // origins 0 and 1, two targets each
        assert_eq!(overlay.surge_count(), 4);
        assert!(overlay.surges().iter().all(|s| s.energy == 0.7));
        assert_eq!(overlay.surges()[0].endpoints.0, triangle()[0]);

        overlay.tick(1_100.0);
        assert_eq!(overlay.surge_count(), 4);
        overlay.tick(1_180.0);
        assert_eq!(overlay.surge_count(), 8);
    }

    #[test]
    fn out_of_range_origins_are_skipped() {
        let anchors: Arc<dyn AnchorSource> = Arc::new(triangle);
        let energy: Arc<dyn EnergySource> = Arc::new(|_now: Millis| EnergyFrame::new(0.0, 1.0, true));
        let tuning = OverlayTuning {
            surge_origins: vec![2, 9],
            ..OverlayTuning::default()
        };
        let mut overlay =
            PulseOverlay::new(CanvasLayout::new(100.0, 100.0, 1.0), anchors, energy, tuning, 2.0)
                .unwrap();
        overlay.start();
        overlay.tick(0.0);
        assert_eq!(overlay.surge_count(), 2);
    }

    #[test]
    fn expired_pulses_are_culled_and_canvas_cleared() {
        let mut overlay = overlay_with(triangle(), EnergyFrame::new(0.0, 0.8, true));
        overlay.admit(ambient(0.0, 200.0));
        overlay.tick(0.0);
        assert_eq!(overlay.surge_count(), 4);
        let frame = overlay.capture().unwrap();
        assert!(frame.pixels().any(|p| p.0[3] > 0));

        // past both lifetimes, and stop the beat so nothing respawns
        overlay.energy = Arc::new(|_now: Millis| EnergyFrame::SILENT);
        overlay.tick(1_001.0);
        assert_eq!(overlay.pulse_count(), 0);
        assert_eq!(overlay.surge_count(), 0);
        let frame = overlay.capture().unwrap();
        assert!(frame.pixels().all(|p| p.0[3] == 0));
    }

    #[test]
    fn neon_palette_cycles_every_two_seconds() {
        assert_eq!(neon_at(0.0), NEON[0]);
        assert_eq!(neon_at(1_999.0), NEON[0]);
        assert_eq!(neon_at(2_000.0), NEON[1]);
        assert_eq!(neon_at(8_000.0), NEON[0]);
    }

    #[test]
    fn unique_pairs_cover_every_combination() {
        assert_eq!(unique_pairs(3), vec![(0, 1), (0, 2), (1, 2)]);
        assert!(unique_pairs(1).is_empty());
    }
}
