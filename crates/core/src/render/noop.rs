use super::{Backdrop, CanvasLayout, Layer};
use crate::timeline::Millis;

/// Backdrop handed out when the canvas offers no usable rendering context.
/// Every call is accepted and ignored; the mode always reads as zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBackdrop;

impl Layer for NoopBackdrop {
    fn start(&mut self) {}

    fn stop(&mut self) {}

    fn is_running(&self) -> bool {
        false
    }

    fn resize(&mut self, _layout: CanvasLayout) {}

    fn tick(&mut self, _now: Millis) {}
}

impl Backdrop for NoopBackdrop {
    fn set_mode(&mut self, _mode: i64) {}

    fn next_mode(&mut self) {}

    fn mode(&self) -> usize {
        0
    }

    fn mode_count(&self) -> usize {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_call_is_inert() {
        let mut backdrop = NoopBackdrop;
        backdrop.start();
        backdrop.resize(CanvasLayout::new(800.0, 600.0, 2.0));
        backdrop.set_mode(3);
        backdrop.next_mode();
        backdrop.tick(16.0);
        backdrop.stop();
        backdrop.dispose();
        assert_eq!(backdrop.mode(), 0);
        assert!(!backdrop.is_running());
        assert!(backdrop.capture().is_none());
    }
}
