pub mod config;
pub mod health;
pub mod pipeline;
pub mod progress;
pub mod session;
pub mod transport;
pub mod users;

pub use config::{
    load_mergebot_config, load_pipeline_config, ConfigBundle, ConfigError, ConfigResult,
    MergebotConfig, PipelineConfig, QuotaSection,
};
pub use pipeline::{
    CommandExecutor, MergePipeline, MergeReport, NormalizedAsset, PipelineError, PipelineResult,
    SystemCommandExecutor,
};
pub use progress::{project, render, ProgressView};
pub use session::{SessionError, SessionStore, Tier};
pub use transport::{
    HttpTransport, MessageId, TransferSnapshot, Transport, TransportError, TransportResult,
    VideoRef,
};
pub use users::{SqliteUserStore, SqliteUserStoreBuilder, UserRecord, UserStoreError};
