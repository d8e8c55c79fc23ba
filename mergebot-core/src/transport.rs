//! The chat-transport boundary. The pipeline only ever talks to the
//! [`Transport`] trait; the shipped [`HttpTransport`] resolves references
//! over HTTP or the local filesystem and delivers output into a directory,
//! which is enough for the CLI driver and the test suite.

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use thiserror::Error;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::watch;
use tracing::info;
use url::Url;

/// Opaque download token for a pending video. The core never interprets it;
/// only a transport can turn it into bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoRef(String);

impl VideoRef {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for VideoRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageId(pub i64);

/// Byte counters published by a transport while an upload is in flight.
/// Carried over a watch channel, so a slow consumer only ever sees the
/// latest snapshot and stale samples coalesce instead of queueing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferSnapshot {
    pub bytes_sent: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("download failed: {0}")]
    Download(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("message delivery failed: {0}")]
    Delivery(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("io error at {path}: {source}")]
    Io { source: io::Error, path: PathBuf },
}

impl From<reqwest::Error> for TransportError {
    fn from(error: reqwest::Error) -> Self {
        TransportError::Network(error.to_string())
    }
}

pub type TransportResult<T> = Result<T, TransportError>;

#[async_trait]
pub trait Transport: Send + Sync {
    /// Materializes a reference next to `dest_stem`; the returned path
    /// carries the source's extension so the caller can tell whether the
    /// file already matches the canonical container.
    async fn download(&self, reference: &VideoRef, dest_stem: &Path) -> TransportResult<PathBuf>;

    async fn send_message(&self, user_id: i64, text: &str) -> TransportResult<MessageId>;

    async fn edit_message(
        &self,
        user_id: i64,
        message: MessageId,
        text: &str,
    ) -> TransportResult<()>;

    /// Uploads the finished video, publishing byte counters into `progress`
    /// as the transfer advances. Implementations drop the sender on return,
    /// which ends the orchestrator's sampling loop.
    async fn send_video(
        &self,
        user_id: i64,
        path: &Path,
        caption: &str,
        progress: watch::Sender<TransferSnapshot>,
    ) -> TransportResult<()>;
}

const UPLOAD_CHUNK_BYTES: usize = 64 * 1024;

/// Transport backed by HTTP(S)/`file://` sources and a local delivery
/// directory. Message sends are structured log lines, which keeps the CLI
/// driver honest without a real chat backend.
pub struct HttpTransport {
    http_client: reqwest::Client,
    delivery_dir: PathBuf,
}

impl HttpTransport {
    pub fn new(delivery_dir: impl Into<PathBuf>) -> TransportResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent("mergebot/0.1")
            .build()
            .map_err(|err| TransportError::Network(err.to_string()))?;
        Ok(Self {
            http_client,
            delivery_dir: delivery_dir.into(),
        })
    }

    fn extension_of(reference: &str) -> String {
        let trimmed = reference.split(['?', '#']).next().unwrap_or(reference);
        trimmed
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.is_empty() && !ext.contains('/'))
            .unwrap_or_else(|| "bin".to_string())
    }

    async fn copy_local(&self, from: &Path, to: &Path) -> TransportResult<()> {
        if let Some(parent) = to.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| TransportError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        fs::copy(from, to)
            .await
            .map(|_| ())
            .map_err(|source| TransportError::Io {
                path: to.to_path_buf(),
                source,
            })
    }

    async fn fetch_http(&self, url: &str, dest: &Path) -> TransportResult<()> {
        let response = self
            .http_client
            .get(url)
            .send()
            .await?
            .error_for_status()?;
        let mut stream = response.bytes_stream();
        let mut file = fs::File::create(dest)
            .await
            .map_err(|source| TransportError::Io {
                path: dest.to_path_buf(),
                source,
            })?;
        use futures::StreamExt;
        while let Some(chunk) = stream.next().await {
            let data = chunk?;
            file.write_all(&data)
                .await
                .map_err(|source| TransportError::Io {
                    path: dest.to_path_buf(),
                    source,
                })?;
        }
        Ok(())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn download(&self, reference: &VideoRef, dest_stem: &Path) -> TransportResult<PathBuf> {
        let token = reference.as_str();
        let extension = Self::extension_of(token);
        let dest = dest_stem.with_extension(&extension);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| TransportError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        match Url::parse(token) {
            Ok(url) if url.scheme() == "file" => {
                let source_path = url
                    .to_file_path()
                    .map_err(|_| TransportError::Download("invalid file url".into()))?;
                self.copy_local(&source_path, &dest).await?;
            }
            Ok(url) if matches!(url.scheme(), "http" | "https") => {
                self.fetch_http(url.as_str(), &dest).await?;
            }
            Ok(url) => {
                return Err(TransportError::Download(format!(
                    "unsupported scheme {}",
                    url.scheme()
                )));
            }
            // Bare filesystem path.
            Err(_) => self.copy_local(Path::new(token), &dest).await?,
        }
        Ok(dest)
    }

    async fn send_message(&self, user_id: i64, text: &str) -> TransportResult<MessageId> {
        info!(user_id, text, "send message");
        Ok(MessageId(0))
    }

    async fn edit_message(
        &self,
        user_id: i64,
        message: MessageId,
        text: &str,
    ) -> TransportResult<()> {
        info!(user_id, message = message.0, text, "edit message");
        Ok(())
    }

    async fn send_video(
        &self,
        user_id: i64,
        path: &Path,
        caption: &str,
        progress: watch::Sender<TransferSnapshot>,
    ) -> TransportResult<()> {
        let file_name = path
            .file_name()
            .ok_or_else(|| TransportError::Upload("output has no file name".into()))?;
        let dest = self.delivery_dir.join(format!("{user_id}_{}", file_name.to_string_lossy()));
        fs::create_dir_all(&self.delivery_dir)
            .await
            .map_err(|source| TransportError::Io {
                path: self.delivery_dir.clone(),
                source,
            })?;

        let mut source = fs::File::open(path)
            .await
            .map_err(|source| TransportError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        let total_bytes = source
            .metadata()
            .await
            .map_err(|source| TransportError::Io {
                path: path.to_path_buf(),
                source,
            })?
            .len();
        let mut sink = fs::File::create(&dest)
            .await
            .map_err(|source| TransportError::Io {
                path: dest.clone(),
                source,
            })?;

        let mut buffer = vec![0u8; UPLOAD_CHUNK_BYTES];
        let mut bytes_sent = 0u64;
        loop {
            let read = source
                .read(&mut buffer)
                .await
                .map_err(|source| TransportError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
            if read == 0 {
                break;
            }
            sink.write_all(&buffer[..read])
                .await
                .map_err(|source| TransportError::Io {
                    path: dest.clone(),
                    source,
                })?;
            bytes_sent += read as u64;
            let _ = progress.send(TransferSnapshot {
                bytes_sent,
                total_bytes,
            });
        }
        sink.flush().await.map_err(|source| TransportError::Io {
            path: dest.clone(),
            source,
        })?;
        info!(user_id, caption, delivered = %dest.display(), "video delivered");
        Ok(())
    }
}
