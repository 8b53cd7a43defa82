use thiserror::Error;

/// Plantar tracker error types
#[derive(Error, Debug, Clone)]
pub enum TrackerError {
    #[error("Session already running")]
    AlreadyRunning,

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Session already ended")]
    SessionEnded,

    #[error("Invalid tracker state: {0}")]
    InvalidState(String),

    #[error("Sensor failed: {0}")]
    SensorFailed(String),

    #[error("Storage error: {0}")]
    StorageError(String),
}

/// Result type for tracker operations
pub type TrackerResult<T> = Result<T, TrackerError>;
