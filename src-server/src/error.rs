//! Error types for server initialization.

use std::fmt;

/// Fatal initialization failures. Anything surfacing this aborts startup;
/// per-frame and per-message failures are logged and counted instead.
#[derive(Debug)]
pub enum InitError {
    /// GPU device or capture session creation failed
    Capture(String),
    /// No hardware encoder candidate could be opened
    Encoder(String),
    /// Peer transport could not be constructed
    Transport(String),
    /// Audio subsystem failure during required setup
    Audio(String),
}

impl fmt::Display for InitError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InitError::Capture(msg) => write!(f, "Capture init failed: {}", msg),
            InitError::Encoder(msg) => write!(f, "Encoder init failed: {}", msg),
            InitError::Transport(msg) => write!(f, "Transport init failed: {}", msg),
            InitError::Audio(msg) => write!(f, "Audio init failed: {}", msg),
        }
    }
}

impl std::error::Error for InitError {}

impl From<InitError> for String {
    fn from(err: InitError) -> Self {
        err.to_string()
    }
}
