//! One-shot unlock for browsers that refuse audio before a user gesture.

/// Input events that count as a user gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputKind {
    PointerDown,
    KeyDown,
    TouchStart,
    Click,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoplayGate {
    #[default]
    Locked,
    Unlocked,
}

impl AutoplayGate {
    pub fn new() -> Self {
        Self::Locked
    }

    pub fn is_unlocked(self) -> bool {
        self == Self::Unlocked
    }

    /// Feeds one input event. Returns `true` only for the event that
    /// unlocks the gate; later events are ignored.
    pub fn observe(&mut self, input: InputKind) -> bool {
        match self {
            Self::Locked => {
                *self = Self::Unlocked;
                tracing::debug!(?input, "autoplay unlocked");
                true
            }
            Self::Unlocked => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unlocks_exactly_once() {
        let mut gate = AutoplayGate::new();
        assert!(!gate.is_unlocked());
        assert!(gate.observe(InputKind::TouchStart));
        assert!(gate.is_unlocked());
        for input in [InputKind::PointerDown, InputKind::KeyDown, InputKind::Click, InputKind::TouchStart] {
            assert!(!gate.observe(input));
        }
        assert!(gate.is_unlocked());
    }

    #[test]
    fn any_gesture_kind_unlocks() {
        for input in [InputKind::PointerDown, InputKind::KeyDown, InputKind::TouchStart, InputKind::Click] {
            let mut gate = AutoplayGate::default();
            assert!(gate.observe(input));
        }
    }
}
