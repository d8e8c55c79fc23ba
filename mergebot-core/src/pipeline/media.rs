//! Media normalization and stream-copy concatenation over an external
//! ffmpeg binary. Both go through the [`CommandExecutor`] seam so tests can
//! substitute the subprocess, and only the exit status drives control flow.

use std::path::PathBuf;
use std::process::Output;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs;
use tokio::process::Command;
use tracing::{debug, warn};

use crate::config::{ConcatSection, TranscodeSection};
use crate::transport::{Transport, VideoRef};

use super::error::{PipelineError, PipelineResult};
use super::types::{NormalizedAsset, StagingPaths};

#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output>;
}

#[derive(Debug, Default)]
pub struct SystemCommandExecutor;

#[async_trait]
impl CommandExecutor for SystemCommandExecutor {
    async fn run(&self, command: &mut Command) -> std::io::Result<Output> {
        // An abandoned caller must not leave a subprocess behind.
        command.kill_on_drop(true);
        command.output().await
    }
}

fn stderr_excerpt(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let trimmed = stderr.trim();
    let excerpt: String = trimmed.chars().rev().take(400).collect();
    excerpt.chars().rev().collect()
}

/// Converts an arbitrary input into the canonical container/codec pair.
/// Inputs already in the canonical container skip the transcode entirely.
pub struct Normalizer {
    executor: Arc<dyn CommandExecutor>,
    config: TranscodeSection,
}

impl Normalizer {
    pub fn new(executor: Arc<dyn CommandExecutor>, config: TranscodeSection) -> Self {
        Self { executor, config }
    }

    pub async fn normalize(
        &self,
        transport: &dyn Transport,
        reference: &VideoRef,
        staging: &StagingPaths,
        index: usize,
    ) -> PipelineResult<NormalizedAsset> {
        let stem = staging.source.join(format!("{index:02}"));
        let raw = transport
            .download(reference, &stem)
            .await
            .map_err(|err| PipelineError::Download(err.to_string()))?;

        let canonical = raw
            .extension()
            .map(|ext| ext.eq_ignore_ascii_case(&self.config.container))
            .unwrap_or(false);
        if canonical {
            debug!(index, path = %raw.display(), "already canonical, skipping transcode");
            return Ok(NormalizedAsset {
                index,
                path: raw,
                transcoded: false,
            });
        }

        fs::create_dir_all(&staging.converted)
            .await
            .map_err(|source| PipelineError::Io {
                path: staging.converted.clone(),
                source,
            })?;
        let output_path = staging
            .converted
            .join(format!("{index:02}.{}", self.config.container));

        let input_label = raw
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| raw.display().to_string());
        let mut command = Command::new(&self.config.ffmpeg_binary);
        command
            .arg("-y")
            .arg("-i")
            .arg(&raw)
            .arg("-c:v")
            .arg(&self.config.video_codec)
            .arg("-c:a")
            .arg(&self.config.audio_codec)
            .arg("-preset")
            .arg(&self.config.preset)
            .arg("-crf")
            .arg(self.config.crf.to_string())
            .arg(&output_path);
        let result = self
            .executor
            .run(&mut command)
            .await
            .map_err(|err| PipelineError::Transcode {
                input: input_label.clone(),
                detail: err.to_string(),
            })?;
        if !result.status.success() {
            return Err(PipelineError::Transcode {
                input: input_label,
                detail: stderr_excerpt(&result),
            });
        }

        // Never keep both the raw download and the transcoded copy.
        fs::remove_file(&raw)
            .await
            .map_err(|source| PipelineError::Io {
                path: raw.clone(),
                source,
            })?;

        Ok(NormalizedAsset {
            index,
            path: output_path,
            transcoded: true,
        })
    }
}

/// Joins normalized assets with ffmpeg's concat demuxer. Pure stream copy;
/// the normalizer guarantees compatible codec parameters.
pub struct ConcatEngine {
    executor: Arc<dyn CommandExecutor>,
    ffmpeg_binary: String,
    config: ConcatSection,
}

impl ConcatEngine {
    pub fn new(
        executor: Arc<dyn CommandExecutor>,
        ffmpeg_binary: impl Into<String>,
        config: ConcatSection,
    ) -> Self {
        Self {
            executor,
            ffmpeg_binary: ffmpeg_binary.into(),
            config,
        }
    }

    pub async fn concatenate(
        &self,
        assets: &[NormalizedAsset],
        staging: &StagingPaths,
    ) -> PipelineResult<PathBuf> {
        let manifest = staging.root.join("concat.txt");
        let mut body = String::new();
        for asset in assets {
            body.push_str(&format!("file '{}'\n", asset.path.display()));
        }
        fs::write(&manifest, body)
            .await
            .map_err(|source| PipelineError::Io {
                path: manifest.clone(),
                source,
            })?;

        let output_path = staging.root.join(format!("merged.{}", self.config.container));
        let mut command = Command::new(&self.ffmpeg_binary);
        command
            .arg("-y")
            .arg("-f")
            .arg("concat")
            .arg("-safe")
            .arg("0")
            .arg("-i")
            .arg(&manifest)
            .arg("-c")
            .arg("copy")
            .arg(&output_path);
        let result = self.executor.run(&mut command).await;

        // The manifest is transient, gone whatever the demuxer did.
        if let Err(err) = fs::remove_file(&manifest).await {
            warn!(path = %manifest.display(), error = %err, "failed to remove concat manifest");
        }

        let output = result.map_err(|err| PipelineError::Concat(err.to_string()))?;
        if !output.status.success() {
            return Err(PipelineError::Concat(stderr_excerpt(&output)));
        }
        Ok(output_path)
    }
}
