// Error type shared by the practice pipeline

/// Errors surfaced to the caller of the session controller.
///
/// `DeviceDisconnected` is recoverable (the session pauses). `EmptyScore`,
/// `InvalidConfig` and `NotReady` happen before a session ever runs.
#[derive(Debug, thiserror::Error)]
pub enum PracticeError {
    #[error("Input device disconnected: {0}")]
    DeviceDisconnected(String),

    #[error("Score contains no playable notes")]
    EmptyScore,

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Session has no expected sequence loaded")]
    NotReady,

    #[error("Session already finished")]
    SessionAlreadyFinished,

    #[error("Session is already running")]
    SessionActive,

    #[error("MIDI device not found: {0}")]
    DeviceNotFound(String),

    #[error("MIDI error: {0}")]
    Midi(String),

    #[error("Failed to parse score: {0}")]
    ScoreParse(String),

    #[error("Config format error: {0}")]
    ConfigFormat(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, PracticeError>;
