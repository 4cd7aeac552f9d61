//! Timing primitives shared by every per-frame component.
//!
//! All timestamps are host milliseconds (the value a display-refresh callback
//! receives), so the engine never reads a wall clock on its own.

/// Millisecond timestamp handed in by the host frame callback.
pub type Millis = f64;

/// Elapsed-time bookkeeping for a renderer's tick loop.
#[derive(Debug, Default, Clone)]
pub struct FrameClock {
    origin: Option<Millis>,
    last: Option<Millis>,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.origin = None;
        self.last = None;
    }

    /// Records a tick and returns seconds elapsed since the first tick.
    pub fn advance(&mut self, now: Millis) -> f32 {
        let origin = *self.origin.get_or_insert(now);
        self.last = Some(now);
        ((now - origin).max(0.0) / 1000.0) as f32
    }

    /// Milliseconds since the previous tick, zero on the first one.
    pub fn delta(&self, now: Millis) -> Millis {
        self.last.map(|last| (now - last).max(0.0)).unwrap_or(0.0)
    }
}

/// Rate limiter that fires at most once per `period` milliseconds.
#[derive(Debug, Clone)]
pub struct Cooldown {
    period: Millis,
    last: Option<Millis>,
}

impl Cooldown {
    pub fn new(period: Millis) -> Self {
        Self { period, last: None }
    }

    pub fn period(&self) -> Millis {
        self.period
    }

    pub fn last_fired(&self) -> Option<Millis> {
        self.last
    }

    /// True once at least `period` has elapsed since the last trigger.
    pub fn is_ready(&self, now: Millis) -> bool {
        self.last.map(|last| now - last >= self.period).unwrap_or(true)
    }

    /// Fires if ready, recording `now` as the new trigger time.
    pub fn try_fire(&mut self, now: Millis) -> bool {
        if self.is_ready(now) {
            self.last = Some(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

/// Variable-period scheduler: the caller supplies the interval on every
/// check because it follows the live energy level.
#[derive(Debug, Default, Clone)]
pub struct Interval {
    last: Option<Millis>,
}

impl Interval {
    pub fn new() -> Self {
        Self::default()
    }

    /// Anchors the interval at `now` the first time it is observed.
    pub fn prime(&mut self, now: Millis) {
        self.last.get_or_insert(now);
    }

    pub fn elapsed(&mut self, now: Millis, interval: Millis) -> bool {
        let last = *self.last.get_or_insert(now);
        if now - last > interval {
            self.last = Some(now);
            true
        } else {
            false
        }
    }

    pub fn reset(&mut self) {
        self.last = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_clock_measures_from_first_tick() {
        let mut clock = FrameClock::new();
        assert_eq!(clock.advance(5_000.0), 0.0);
        assert_eq!(clock.delta(5_016.0), 16.0);
        assert!((clock.advance(6_500.0) - 1.5).abs() < 1e-6);
    }

    #[test]
    fn cooldown_allows_exactly_at_period() {
        let mut cooldown = Cooldown::new(200.0);
        assert!(cooldown.try_fire(1_000.0));
        assert!(!cooldown.try_fire(1_199.0));
        assert!(cooldown.try_fire(1_200.0));
        assert_eq!(cooldown.last_fired(), Some(1_200.0));
    }

    #[test]
    fn interval_waits_for_strictly_more_than_period() {
        let mut interval = Interval::new();
        interval.prime(0.0);
        assert!(!interval.elapsed(100.0, 100.0));
        assert!(interval.elapsed(100.5, 100.0));
        assert!(!interval.elapsed(150.0, 100.0));
    }
}
