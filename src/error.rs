use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DriftlessError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("JSON error: {0}")]
    Json(String),

    #[error("Queue store error: {0}")]
    Store(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),

    #[error("Central service error: {0}")]
    Remote(String),

    #[error("Push timed out after {0} ms")]
    PushTimeout(u64),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("Queue item not found: {0}")]
    ItemNotFound(String),

    #[error("Recovery engine is disabled")]
    RecoveryDisabled,

    #[error("Recovery in cooldown for another {remaining_ms} ms")]
    RecoveryCooldown { remaining_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, DriftlessError>;

impl From<std::io::Error> for DriftlessError {
    fn from(e: std::io::Error) -> Self {
        DriftlessError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for DriftlessError {
    fn from(e: serde_json::Error) -> Self {
        DriftlessError::Json(e.to_string())
    }
}
