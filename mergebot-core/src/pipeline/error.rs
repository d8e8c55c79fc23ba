use std::path::PathBuf;

use thiserror::Error;

use crate::session::SessionError;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    Session(#[from] SessionError),
    #[error("download failed: {0}")]
    Download(String),
    #[error("transcode failed for {input}: {detail}")]
    Transcode { input: String, detail: String },
    #[error("concatenation failed: {0}")]
    Concat(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
}

impl PipelineError {
    /// Recoverable errors leave the user's session intact; everything else
    /// ends the attempt and the accumulated videos with it.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, PipelineError::Session(_))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
