/// Result alias that carries the custom [`VisualError`] type.
pub type Result<T> = std::result::Result<T, VisualError>;

/// Common error type for the core crate.
#[derive(Debug, thiserror::Error)]
pub enum VisualError {
    /// Free-form failure surfaced to the host with a readable message.
    #[error("{0}")]
    Message(String),
    /// A caller handed the engine data it cannot work with.
    #[error("invalid input: {0}")]
    InvalidInput(&'static str),
    /// Wrapper around standard IO errors.
    #[error("{0}")]
    Io(#[from] std::io::Error),
    /// Shader program failed to compile or link. Always a build defect.
    #[error(transparent)]
    Shader(#[from] ShaderError),
    /// A rendering context could not be acquired for a canvas.
    #[error("rendering context unavailable: {0}")]
    ContextUnavailable(&'static str),
    #[error("image decode failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("config error: {0}")]
    Config(#[from] serde_json::Error),
    #[error("spectrum analysis failed: {0}")]
    Fft(#[from] realfft::FftError),
    #[error("preference store: {0}")]
    Prefs(String),
}

impl VisualError {
    /// Creates a new error that simply wraps the provided message.
    pub fn msg<T: Into<String>>(msg: T) -> Self {
        Self::Message(msg.into())
    }
}

impl From<&str> for VisualError {
    fn from(value: &str) -> Self {
        Self::msg(value)
    }
}

impl From<String> for VisualError {
    fn from(value: String) -> Self {
        Self::Message(value)
    }
}

/// Failures raised while turning shader source into a usable program.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ShaderError {
    #[error("{stage} shader failed to compile: {message}")]
    Compile { stage: &'static str, message: String },
    #[error("shader program failed to link: {message}")]
    Link { message: String },
}
