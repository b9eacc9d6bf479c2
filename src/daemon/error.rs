use std::path::PathBuf;

/// Errors surfaced by the recorder to its callers.
#[derive(Debug, thiserror::Error)]
pub enum RecorderError {
    #[error("Tracking is already running")]
    AlreadyTracking,

    #[error("Tracking is not running")]
    NotTracking,

    #[error("Failed to persist sessions into {path}: {source}")]
    Persistence {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Stored record {key:?} is malformed: {reason}")]
    MalformedRecord { key: String, reason: String },

    #[error("Failed to sample the foreground window: {0}")]
    Sampling(#[source] anyhow::Error),

    #[error("Recorder connection failed: {0}")]
    Ipc(String),

    /// Failure reported by the daemon that has no local counterpart, such as a failed flush.
    #[error("Recorder failed with {code}: {message}")]
    Remote { code: String, message: String },
}

impl RecorderError {
    pub fn persistence(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Persistence {
            path: path.into(),
            source,
        }
    }

    pub fn malformed(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedRecord {
            key: key.into(),
            reason: reason.into(),
        }
    }

    /// Stable identifier used on the wire.
    pub fn code(&self) -> &str {
        match self {
            RecorderError::AlreadyTracking => "already_tracking",
            RecorderError::NotTracking => "not_tracking",
            RecorderError::Persistence { .. } => "persistence_error",
            RecorderError::MalformedRecord { .. } => "malformed_record",
            RecorderError::Sampling(_) => "sampling_error",
            RecorderError::Ipc(_) => "internal",
            RecorderError::Remote { code, .. } => code,
        }
    }
}

pub type RecorderResult<T> = Result<T, RecorderError>;
