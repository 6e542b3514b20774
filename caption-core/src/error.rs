use std::path::PathBuf;

use thiserror::Error;

/// All errors produced by caption-core.
///
/// Load-time variants (`EngineNotFound`, `EngineLoadFailed`,
/// `OsVersionIncompatible`, `LibraryMissing`) indicate an environment or
/// installation defect and are not retried. `Cancelled` is a deliberate
/// outcome, not a failure — callers must not surface it as an error.
#[derive(Debug, Error)]
pub enum CaptionError {
    #[error("transcription engine not found: {0}")]
    EngineNotFound(String),

    #[error("transcription engine failed to load: {0}")]
    EngineLoadFailed(String),

    #[error("{0}")]
    OsVersionIncompatible(String),

    #[error("a native library required by the engine is missing: {0}")]
    LibraryMissing(String),

    #[error("model file appears to be corrupted or incomplete ({}): {message}", model.display())]
    ModelCorrupted { model: PathBuf, message: String },

    #[error("transcription cancelled")]
    Cancelled,

    #[error("transcription failed for {} (model {}): {message}", audio.display(), model.display())]
    TranscriptionFailed {
        audio: PathBuf,
        model: PathBuf,
        message: String,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl CaptionError {
    /// `true` only for the cooperative-cancellation outcome.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CaptionError::Cancelled)
    }

    /// `true` for the load-time categories that make transcription
    /// impossible until the installation is repaired.
    pub fn is_fatal_to_engine(&self) -> bool {
        matches!(
            self,
            CaptionError::EngineNotFound(_)
                | CaptionError::EngineLoadFailed(_)
                | CaptionError::OsVersionIncompatible(_)
                | CaptionError::LibraryMissing(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CaptionError>;
