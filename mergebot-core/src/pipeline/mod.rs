mod error;
mod media;
mod types;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::fs;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{MergebotConfig, PipelineConfig};
use crate::progress;
use crate::session::{SessionResult, SessionStore};
use crate::transport::{MessageId, TransferSnapshot, Transport, VideoRef};

pub use error::{PipelineError, PipelineResult};
pub use media::{CommandExecutor, ConcatEngine, Normalizer, SystemCommandExecutor};
pub use types::{MergeReport, NormalizedAsset, StagingPaths};

/// Drives one user's merge end to end: drain the session, normalize each
/// reference in submission order, concatenate, upload with progress
/// feedback, then clean up every temporary artifact whatever the outcome.
pub struct MergePipeline {
    sessions: Arc<SessionStore>,
    transport: Arc<dyn Transport>,
    normalizer: Normalizer,
    concat: ConcatEngine,
    work_dir: PathBuf,
    progress_interval: Duration,
    caption: String,
}

impl MergePipeline {
    pub fn new(
        sessions: Arc<SessionStore>,
        transport: Arc<dyn Transport>,
        pipeline_config: PipelineConfig,
        mergebot_config: &MergebotConfig,
        executor: Option<Arc<dyn CommandExecutor>>,
    ) -> Self {
        let executor = executor.unwrap_or_else(|| Arc::new(SystemCommandExecutor));
        let normalizer = Normalizer::new(executor.clone(), pipeline_config.transcode.clone());
        let concat = ConcatEngine::new(
            executor,
            pipeline_config.transcode.ffmpeg_binary.clone(),
            pipeline_config.concat.clone(),
        );
        Self {
            sessions,
            transport,
            normalizer,
            concat,
            work_dir: PathBuf::from(&mergebot_config.paths.work_dir),
            progress_interval: Duration::from_millis(pipeline_config.upload.progress_interval_ms),
            caption: pipeline_config.upload.caption.clone(),
        }
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    /// Collecting stage: append one reference, returning the new count and
    /// the user's limit for "added n/limit" feedback.
    pub fn add_video(&self, user_id: i64, reference: VideoRef) -> SessionResult<(usize, usize)> {
        let tier = self.sessions.touch(user_id)?;
        let limit = self.sessions.limit_for(tier);
        let count = self.sessions.add_video(user_id, reference)?;
        Ok((count, limit))
    }

    /// Runs one merge attempt for the user. Exactly one attempt per user
    /// may be in flight; a concurrent trigger fails fast with
    /// `AttemptInProgress` and changes nothing.
    pub async fn run_merge(&self, user_id: i64) -> PipelineResult<MergeReport> {
        self.sessions.begin_attempt(user_id)?;
        let references = match self.sessions.drain(user_id) {
            Ok(references) => references,
            Err(err) => {
                // Too few videos: keep the session so the user can add more.
                self.sessions.end_attempt(user_id);
                return Err(err.into());
            }
        };

        let attempt_id = Uuid::new_v4().simple().to_string();
        let staging = StagingPaths::new(
            self.work_dir
                .join("attempts")
                .join(user_id.to_string())
                .join(&attempt_id),
        );
        // Cleanup must survive this future being dropped mid-await, so it
        // lives in the guard's Drop rather than after `execute`.
        let _cleanup = AttemptCleanup {
            sessions: self.sessions.clone(),
            user_id,
            staging_root: staging.root.clone(),
        };
        info!(user_id, attempt_id = %attempt_id, segments = references.len(), "merge attempt started");

        let result = self
            .execute(user_id, &attempt_id, &references, &staging)
            .await;

        match &result {
            Ok(report) => {
                info!(user_id, attempt_id = %attempt_id, output_bytes = report.output_bytes, "merge attempt completed")
            }
            Err(err) => warn!(user_id, attempt_id = %attempt_id, error = %err, "merge attempt failed"),
        }
        result
    }

    async fn execute(
        &self,
        user_id: i64,
        attempt_id: &str,
        references: &[VideoRef],
        staging: &StagingPaths,
    ) -> PipelineResult<MergeReport> {
        fs::create_dir_all(&staging.source)
            .await
            .map_err(|source| PipelineError::Io {
                path: staging.source.clone(),
                source,
            })?;

        let status = self
            .transport
            .send_message(user_id, "Downloading videos...")
            .await
            .ok();

        let mut assets = Vec::with_capacity(references.len());
        for (index, reference) in references.iter().enumerate() {
            let asset = self
                .normalizer
                .normalize(self.transport.as_ref(), reference, staging, index)
                .await?;
            self.notify(
                user_id,
                status,
                &format!("Ready: {}/{}", index + 1, references.len()),
            )
            .await;
            assets.push(asset);
        }

        self.notify(user_id, status, "Merging...").await;
        let output_path = self.concat.concatenate(&assets, staging).await?;
        let output_bytes = fs::metadata(&output_path)
            .await
            .map_err(|source| PipelineError::Io {
                path: output_path.clone(),
                source,
            })?
            .len();

        self.notify(user_id, status, "Uploading...").await;
        self.upload(user_id, status, &output_path).await?;

        let transcoded = assets.iter().filter(|asset| asset.transcoded).count();
        Ok(MergeReport::new(
            user_id,
            attempt_id,
            assets.len(),
            transcoded,
            output_bytes,
        ))
    }

    async fn upload(
        &self,
        user_id: i64,
        status: Option<MessageId>,
        output_path: &Path,
    ) -> PipelineResult<()> {
        let (tx, rx) = watch::channel(TransferSnapshot::default());
        let sampler = tokio::spawn(sample_progress(
            self.transport.clone(),
            user_id,
            status,
            rx,
            self.progress_interval,
        ));

        let upload = self
            .transport
            .send_video(user_id, output_path, &self.caption, tx)
            .await;
        let _ = sampler.await;
        upload.map_err(|err| PipelineError::Upload(err.to_string()))
    }

    /// Stage banners are best effort; a dropped edit never fails the run.
    async fn notify(&self, user_id: i64, status: Option<MessageId>, text: &str) {
        let Some(message) = status else { return };
        if let Err(err) = self.transport.edit_message(user_id, message, text).await {
            debug!(user_id, error = %err, "status update dropped");
        }
    }
}

/// Cleanup for one merge attempt, run exactly once on every exit path.
/// Dropping it removes the whole staging tree and the session entry
/// (releasing the per-user attempt lock), even when the attempt's future
/// is aborted mid-await and never reaches the code after `execute`.
struct AttemptCleanup {
    sessions: Arc<SessionStore>,
    user_id: i64,
    staging_root: PathBuf,
}

impl Drop for AttemptCleanup {
    fn drop(&mut self) {
        if let Err(err) = std::fs::remove_dir_all(&self.staging_root) {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.staging_root.display(), error = %err, "failed to clean attempt staging");
            }
        }
        self.sessions.clear(self.user_id);
    }
}

/// Bounded-rate sampling loop for upload progress. Reads only the latest
/// snapshot each tick, so a burst of counter updates coalesces instead of
/// queueing, and exits when the transport drops the sender.
async fn sample_progress(
    transport: Arc<dyn Transport>,
    user_id: i64,
    status: Option<MessageId>,
    mut snapshots: watch::Receiver<TransferSnapshot>,
    every: Duration,
) {
    let Some(message) = status else { return };
    let started = Instant::now();
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if snapshots.has_changed().is_err() {
            break;
        }
        let snapshot = *snapshots.borrow_and_update();
        if snapshot.total_bytes == 0 {
            continue;
        }
        let view = progress::project(
            snapshot.bytes_sent,
            snapshot.total_bytes,
            started,
            Instant::now(),
        );
        let text = format!("Uploading...\n{}", progress::render(&view));
        if let Err(err) = transport.edit_message(user_id, message, &text).await {
            debug!(user_id, error = %err, "progress update dropped");
        }
    }
}
