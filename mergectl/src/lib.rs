use std::path::PathBuf;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;

use mergebot_core::{
    ConfigBundle, HttpTransport, MergePipeline, MergeReport, PipelineError, SessionError,
    SessionStore, SqliteUserStore, Transport, TransportError, UserRecord, UserStoreError, VideoRef,
};

pub type Result<T> = std::result::Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(#[from] mergebot_core::ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("user store error: {0}")]
    Users(#[from] UserStoreError),
    #[error("session error: {0}")]
    Session(#[from] SessionError),
    #[error("pipeline error: {0}")]
    Pipeline(#[from] PipelineError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("invalid listen address: {0}")]
    ListenAddr(#[from] std::net::AddrParseError),
}

#[derive(Parser, Debug)]
#[command(author, version, about = "mergebot command-line control interface", long_about = None)]
pub struct Cli {
    /// Directory containing mergebot.toml and pipeline.toml
    #[arg(long, default_value = "configs")]
    pub config_dir: PathBuf,
    /// Alternative path for users.sqlite
    #[arg(long)]
    pub users_db: Option<PathBuf>,
    /// Override for the delivery directory
    #[arg(long)]
    pub delivery_dir: Option<PathBuf>,
    /// Output format
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// User record administration
    #[command(subcommand)]
    Users(UserCommands),
    /// Best-effort text fan-out to every known user
    Broadcast(BroadcastArgs),
    /// Run one merge attempt over local or remote video references
    Merge(MergeArgs),
    /// Serve the liveness endpoint
    ServeHealth(ServeHealthArgs),
}

#[derive(Subcommand, Debug)]
pub enum UserCommands {
    /// List all user records
    List,
    /// Grant the premium tier
    Promote(UserIdArg),
    /// Revoke the premium tier
    Demote(UserIdArg),
}

#[derive(Args, Debug)]
pub struct UserIdArg {
    pub user_id: i64,
}

#[derive(Args, Debug)]
pub struct BroadcastArgs {
    pub text: String,
}

#[derive(Args, Debug)]
pub struct MergeArgs {
    /// User the merge session belongs to
    #[arg(long)]
    pub user: i64,
    /// Video references (paths or file://, http(s):// URLs), in merge order
    #[arg(required = true)]
    pub refs: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ServeHealthArgs {
    /// Override for [health].bind_addr
    #[arg(long)]
    pub addr: Option<String>,
}

pub fn run(cli: Cli) -> Result<()> {
    let context = AppContext::new(&cli)?;
    let runtime = tokio::runtime::Runtime::new()?;

    match &cli.command {
        Commands::Users(UserCommands::List) => {
            let users = context.users_list()?;
            render(&UserListing { users }, cli.format)
        }
        Commands::Users(UserCommands::Promote(args)) => {
            let outcome = context.set_premium(args.user_id, true)?;
            render(&outcome, cli.format)
        }
        Commands::Users(UserCommands::Demote(args)) => {
            let outcome = context.set_premium(args.user_id, false)?;
            render(&outcome, cli.format)
        }
        Commands::Broadcast(args) => {
            let report = runtime.block_on(context.broadcast(&args.text))?;
            render(&report, cli.format)
        }
        Commands::Merge(args) => {
            let report = runtime.block_on(context.merge(args))?;
            render(&report, cli.format)
        }
        Commands::ServeHealth(args) => {
            let addr = args
                .addr
                .clone()
                .unwrap_or_else(|| context.bundle.mergebot.health.bind_addr.clone())
                .parse()?;
            runtime.block_on(mergebot_core::health::serve(addr))?;
            Ok(())
        }
    }
}

pub struct AppContext {
    pub bundle: ConfigBundle,
    users_db: PathBuf,
    delivery_dir: PathBuf,
}

impl AppContext {
    pub fn new(cli: &Cli) -> Result<Self> {
        let bundle = ConfigBundle::from_directory(&cli.config_dir)?;
        let users_db = cli
            .users_db
            .clone()
            .unwrap_or_else(|| PathBuf::from(&bundle.mergebot.paths.data_dir).join("users.sqlite"));
        let delivery_dir = cli
            .delivery_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from(&bundle.mergebot.paths.delivery_dir));
        Ok(Self {
            bundle,
            users_db,
            delivery_dir,
        })
    }

    fn user_store(&self) -> Result<SqliteUserStore> {
        if let Some(parent) = self.users_db.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let store = SqliteUserStore::new(&self.users_db)?;
        store.initialize()?;
        Ok(store)
    }

    pub fn users_list(&self) -> Result<Vec<UserRecord>> {
        Ok(self.user_store()?.list_all()?)
    }

    pub fn set_premium(&self, user_id: i64, premium: bool) -> Result<TierChange> {
        let store = self.user_store()?;
        store.get_or_create(user_id)?;
        store.set_premium(user_id, premium)?;
        Ok(TierChange { user_id, premium })
    }

    pub async fn broadcast(&self, text: &str) -> Result<BroadcastReport> {
        let store = self.user_store()?;
        let transport = HttpTransport::new(&self.delivery_dir)?;
        let mut delivered = 0usize;
        let mut failed = 0usize;
        for user in store.list_all()? {
            match transport.send_message(user.id, text).await {
                Ok(_) => delivered += 1,
                Err(err) => {
                    failed += 1;
                    debug!(user_id = user.id, error = %err, "broadcast delivery failed");
                }
            }
        }
        Ok(BroadcastReport { delivered, failed })
    }

    pub async fn merge(&self, args: &MergeArgs) -> Result<MergeReport> {
        let sessions = Arc::new(SessionStore::new(
            self.user_store()?,
            self.bundle.mergebot.quota.clone(),
        ));
        let transport = Arc::new(HttpTransport::new(&self.delivery_dir)?);
        let pipeline = MergePipeline::new(
            sessions,
            transport,
            self.bundle.pipeline.clone(),
            &self.bundle.mergebot,
            None,
        );
        for reference in &args.refs {
            let (count, limit) = pipeline.add_video(args.user, VideoRef::new(reference))?;
            println!("added {count}/{limit}: {reference}");
        }
        Ok(pipeline.run_merge(args.user).await?)
    }
}

fn render<T>(value: &T, format: OutputFormat) -> Result<()>
where
    T: Serialize + DisplayFallback,
{
    match format {
        OutputFormat::Text => {
            println!("{}", value.display());
            Ok(())
        }
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(value)?;
            println!("{}", json);
            Ok(())
        }
    }
}

trait DisplayFallback {
    fn display(&self) -> String;
}

#[derive(Debug, Serialize)]
pub struct UserListing {
    pub users: Vec<UserRecord>,
}

impl DisplayFallback for UserListing {
    fn display(&self) -> String {
        if self.users.is_empty() {
            return "no users registered".to_string();
        }
        self.users
            .iter()
            .map(|user| {
                format!(
                    "{} {}",
                    user.id,
                    if user.premium { "premium" } else { "free" }
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Serialize)]
pub struct TierChange {
    pub user_id: i64,
    pub premium: bool,
}

impl DisplayFallback for TierChange {
    fn display(&self) -> String {
        format!(
            "user {} is now {}",
            self.user_id,
            if self.premium { "premium" } else { "free" }
        )
    }
}

#[derive(Debug, Serialize)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub failed: usize,
}

impl DisplayFallback for BroadcastReport {
    fn display(&self) -> String {
        format!("broadcast delivered to {} users ({} failed)", self.delivered, self.failed)
    }
}

impl DisplayFallback for MergeReport {
    fn display(&self) -> String {
        format!(
            "merged {} segments ({} transcoded) into {} bytes, attempt {}",
            self.segments, self.transcoded, self.output_bytes, self.attempt_id
        )
    }
}
