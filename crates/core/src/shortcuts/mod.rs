use crate::engine::EngineCommand;

/// A key press as the host page reports it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct KeyEvent {
    /// `KeyboardEvent.key` style value, e.g. `" "`, `"k"`, `"3"`.
    pub key: String,
    pub meta: bool,
    pub ctrl: bool,
    pub alt: bool,
    /// The focused element accepts text input.
    pub editable_target: bool,
}

impl KeyEvent {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    fn is_bare(&self) -> bool {
        !(self.meta || self.ctrl || self.alt || self.editable_target)
    }
}

/// Maps a key press to an engine command. Typing into inputs and chorded
/// shortcuts never reach the engine.
pub fn command_for(event: &KeyEvent) -> Option<EngineCommand> {
    if !event.is_bare() {
        return None;
    }
    match event.key.as_str() {
        " " | "Space" | "k" | "K" => Some(EngineCommand::TogglePlayback),
        "v" | "V" => Some(EngineCommand::NextMode),
        digit => match digit.parse::<i64>() {
            Ok(n @ 1..=6) => Some(EngineCommand::SetMode(n - 1)),
            _ => None,
        },
    }
}
