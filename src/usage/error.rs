//! Error type shared by the usage engine

/// Errors surfaced by the usage engine.
///
/// Malformed lines and unreadable files never reach this type; they are
/// skipped where they occur. Only conditions that stop a whole call end up
/// here.
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Lock poisoned: {0}")]
    LockPoisoned(&'static str),
    #[error("File watcher error: {0}")]
    Watch(#[from] notify::Error),
    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

pub type Result<T> = std::result::Result<T, UsageError>;

impl<T> From<std::sync::PoisonError<T>> for UsageError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        UsageError::LockPoisoned("usage state")
    }
}
