use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the object-storage adapter
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("List failed for bucket {bucket}: {message}")]
    ListFailed { bucket: String, message: String },

    #[error("Put failed for {key}: {message}")]
    PutFailed { key: String, message: String },

    #[error("Upload failed for {key}: {message}")]
    UploadFailed { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised by the encoder adapter
#[derive(Debug, Error)]
pub enum EncoderError {
    /// Encoder ran and exited non-zero
    #[error("encoder exited with code {exit_code}: {stderr}")]
    Failed {
        exit_code: i32,
        stdout: String,
        stderr: String,
    },

    /// Encoder could not be started or its inputs could not be prepared
    #[error("failed to launch encoder: {0}")]
    Launch(String),

    #[error("failed to probe {path}: {message}")]
    Probe { path: PathBuf, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-job failures; never abort the run
#[derive(Debug, Error)]
pub enum JobError {
    #[error("transcode of {object_name} failed: {source}")]
    EncoderFailure {
        object_name: String,
        #[source]
        source: EncoderError,
    },

    #[error("upload of {object_name} failed: {source}")]
    UploadFailure {
        object_name: String,
        #[source]
        source: StorageError,
    },

    #[error("temporary file {} for {object_name} not found", temp_path.display())]
    MissingArtifact {
        object_name: String,
        temp_path: PathBuf,
    },

    #[error("storing {object_name} at {} failed: {source}", dest_path.display())]
    Store {
        object_name: String,
        dest_path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Pre-run configuration errors; fatal before any job runs
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Source directory {} does not exist", .0.display())]
    MissingSourceDir(PathBuf),

    #[error("Destination directory {} does not exist", .0.display())]
    MissingDestinationDir(PathBuf),

    #[error("Source and destination directory can not be the same")]
    SameDirectory,

    #[error("Only one of qp and crf may be set (qp={qp}, crf={crf})")]
    ConflictingRateControl { qp: u32, crf: u32 },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl ConfigError {
    /// Process exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            ConfigError::MissingSourceDir(_) => 1,
            ConfigError::MissingDestinationDir(_) => 2,
            ConfigError::SameDirectory => 3,
            ConfigError::ConflictingRateControl { .. } | ConfigError::Invalid(_) => 4,
        }
    }
}
