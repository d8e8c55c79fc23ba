use std::io;
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::session::Tier;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { source: io::Error, path: PathBuf },
    #[error("{path} is not valid TOML: {source}")]
    Toml {
        source: toml::de::Error,
        path: PathBuf,
    },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct MergebotConfig {
    pub system: SystemSection,
    pub paths: PathsSection,
    pub quota: QuotaSection,
    pub health: HealthSection,
}

impl MergebotConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SystemSection {
    pub node_name: String,
    pub environment: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub work_dir: String,
    pub delivery_dir: String,
    pub logs_dir: String,
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuotaSection {
    pub free_limit: usize,
    pub premium_limit: usize,
    pub min_merge_videos: usize,
}

impl QuotaSection {
    pub fn limit(&self, tier: Tier) -> usize {
        match tier {
            Tier::Free => self.free_limit,
            Tier::Premium => self.premium_limit,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HealthSection {
    pub bind_addr: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub transcode: TranscodeSection,
    pub concat: ConcatSection,
    pub upload: UploadSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TranscodeSection {
    pub ffmpeg_binary: String,
    pub container: String,
    pub video_codec: String,
    pub audio_codec: String,
    pub preset: String,
    pub crf: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ConcatSection {
    pub container: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadSection {
    pub progress_interval_ms: u64,
    pub caption: String,
}

#[derive(Debug, Clone)]
pub struct ConfigBundle {
    pub mergebot: MergebotConfig,
    pub pipeline: PipelineConfig,
}

impl ConfigBundle {
    pub fn from_directory<P: AsRef<Path>>(dir: P) -> ConfigResult<Self> {
        let dir = dir.as_ref();
        let mergebot = load_mergebot_config(dir.join("mergebot.toml"))?;
        let pipeline = load_pipeline_config(dir.join("pipeline.toml"))?;
        Ok(Self { mergebot, pipeline })
    }
}

pub fn load_mergebot_config<P: AsRef<Path>>(path: P) -> ConfigResult<MergebotConfig> {
    load_toml(path)
}

pub fn load_pipeline_config<P: AsRef<Path>>(path: P) -> ConfigResult<PipelineConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> ConfigResult<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Toml {
        source,
        path: path.to_path_buf(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_fixture_configs() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let bundle = ConfigBundle::from_directory(dir).expect("configs should parse");
        assert_eq!(bundle.mergebot.system.node_name, "mergebot-primary");
        assert_eq!(bundle.mergebot.quota.free_limit, 2);
        assert_eq!(bundle.mergebot.quota.premium_limit, 10);
        assert_eq!(bundle.pipeline.transcode.video_codec, "libx264");
        assert_eq!(bundle.pipeline.transcode.audio_codec, "aac");
    }

    #[test]
    fn quota_limits_follow_tier() {
        let quota = QuotaSection {
            free_limit: 2,
            premium_limit: 10,
            min_merge_videos: 2,
        };
        assert_eq!(quota.limit(Tier::Free), 2);
        assert_eq!(quota.limit(Tier::Premium), 10);
    }

    #[test]
    fn resolve_path_keeps_absolute() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("../configs");
        let config = load_mergebot_config(dir.join("mergebot.toml")).unwrap();
        assert_eq!(
            config.resolve_path("/tmp/override"),
            PathBuf::from("/tmp/override")
        );
        assert!(config
            .resolve_path("relative")
            .starts_with(&config.paths.base_dir));
    }
}
