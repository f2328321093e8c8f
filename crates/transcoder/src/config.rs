use std::path::{Path, PathBuf};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use crate::error::ConfigError;

/// Object-storage connection settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Access key ID; falls back to the AWS default chain when unset
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    /// Custom S3 endpoint (MinIO, R2, ...); enables path-style addressing
    pub endpoint_url: Option<String>,
    pub region: Option<String>,
}

impl StorageConfig {
    /// Override fields from the process environment, where set
    pub fn with_env_overrides(mut self) -> Self {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.is_empty());
        if let Some(v) = read("aws_access_key_id") {
            self.access_key_id = Some(v);
        }
        if let Some(v) = read("aws_secret_access_key") {
            self.secret_access_key = Some(v);
        }
        if let Some(v) = read("endpoint_url") {
            self.endpoint_url = Some(v);
        }
        if let Some(v) = read("region") {
            self.region = Some(v);
        }
        self
    }
}

/// Configuration for the transcoding pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub storage: StorageConfig,
    /// Number of workers draining the job queue
    pub workers: usize,
    /// Path to the ffmpeg binary
    pub ffmpeg_bin: PathBuf,
    /// Path to the ffprobe binary
    pub ffprobe_bin: PathBuf,
    /// Files larger than this are uploaded in multiple parts
    pub multipart_threshold_bytes: u64,
    /// Size of each multipart chunk
    pub multipart_chunk_bytes: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl PipelineConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            storage: StorageConfig::default(),
            workers: 3,
            ffmpeg_bin: PathBuf::from("ffmpeg"),
            ffprobe_bin: PathBuf::from("ffprobe"),
            multipart_threshold_bytes: 64 * 1024 * 1024, // 64MB
            multipart_chunk_bytes: 64 * 1024 * 1024,
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        if config.workers == 0 {
            anyhow::bail!(ConfigError::Invalid("workers must be at least 1".to_string()));
        }
        if config.multipart_chunk_bytes < 5 * 1024 * 1024 {
            anyhow::bail!(ConfigError::Invalid(
                "multipart_chunk_bytes must be at least 5MB".to_string()
            ));
        }

        Ok(config)
    }
}

/// Per-run settings that come from the command line
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub src_dir: PathBuf,
    pub dst_dir: PathBuf,
    pub ignored_subdir: String,
    pub obj_prefix: String,
    pub file_extension: String,
    pub concat: bool,
    /// Target bucket; `None` stores outputs under `dst_dir` instead
    pub bucket_name: Option<String>,
    pub force_cleanup: bool,
    pub noop: bool,
    pub verbose: bool,
    pub recheck_remote: bool,
}

impl RunOptions {
    pub fn upload_enabled(&self) -> bool {
        self.bucket_name.is_some()
    }
}

/// Check source/destination directories before any job is created
pub fn validate_directories(src_dir: &Path, dst_dir: &Path) -> Result<(), ConfigError> {
    if !src_dir.exists() {
        return Err(ConfigError::MissingSourceDir(src_dir.to_path_buf()));
    }
    if !dst_dir.exists() {
        return Err(ConfigError::MissingDestinationDir(dst_dir.to_path_buf()));
    }
    let same = match (src_dir.canonicalize(), dst_dir.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if same {
        return Err(ConfigError::SameDirectory);
    }
    Ok(())
}
