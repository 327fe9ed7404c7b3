use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

/// Crate-wide error enum. Each variant maps to one of the error kinds a caller needs to
/// branch on (configuration vs. input vs. processing failure) without string matching.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("input error: {0}")]
    Input(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("gpu error: {0}")]
    Gpu(String),

    #[error("session error: {0}")]
    Session(String),

    #[error("mux error: {0}")]
    Mux(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn input(msg: impl Into<String>) -> Self {
        Self::Input(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn gpu(msg: impl Into<String>) -> Self {
        Self::Gpu(msg.into())
    }

    pub fn session(msg: impl Into<String>) -> Self {
        Self::Session(msg.into())
    }

    pub fn mux(msg: impl Into<String>) -> Self {
        Self::Mux(msg.into())
    }

    pub fn missing_asset(what: &str, path: &std::path::Path) -> Self {
        Self::config(format!("missing {what}: '{}'", path.display()))
    }

    /// Whether this error is caller-fixable (bad config/input) as opposed to an environment
    /// or hardware failure during processing. Mirrors the 4xx/5xx split an HTTP facade would
    /// make without this crate depending on an HTTP status type.
    pub fn is_caller_fault(&self) -> bool {
        matches!(self, Self::Config(_) | Self::Input(_))
    }
}

pub(crate) fn path_must_exist(path: &std::path::Path, what: &str) -> Result<PathBuf> {
    if !path.exists() {
        return Err(Error::missing_asset(what, path));
    }
    Ok(path.to_path_buf())
}
