use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Per-attempt scratch layout. Everything below `root` is owned by one
/// merge attempt and removed wholesale during cleanup.
#[derive(Debug, Clone)]
pub struct StagingPaths {
    pub root: PathBuf,
    pub source: PathBuf,
    pub converted: PathBuf,
}

impl StagingPaths {
    pub fn new(root: PathBuf) -> Self {
        let source = root.join("source");
        let converted = root.join("converted");
        Self {
            root,
            source,
            converted,
        }
    }
}

/// A video reference materialized to local storage and guaranteed to be in
/// the canonical container. `index` is the submission position; merge order
/// follows it strictly.
#[derive(Debug, Clone)]
pub struct NormalizedAsset {
    pub index: usize,
    pub path: PathBuf,
    pub transcoded: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct MergeReport {
    pub user_id: i64,
    pub attempt_id: String,
    pub segments: usize,
    pub transcoded: usize,
    pub output_bytes: u64,
    pub completed_at: DateTime<Utc>,
}

impl MergeReport {
    pub fn new(
        user_id: i64,
        attempt_id: impl Into<String>,
        segments: usize,
        transcoded: usize,
        output_bytes: u64,
    ) -> Self {
        Self {
            user_id,
            attempt_id: attempt_id.into(),
            segments,
            transcoded,
            output_bytes,
            completed_at: Utc::now(),
        }
    }
}
