pub mod config;
pub mod error;
pub mod params;
pub mod scan;
pub mod remote;
pub mod storage;
pub mod ffprobe;
pub mod encoder;
pub mod job;
pub mod engine;
pub mod pool;
pub mod pipeline;

#[cfg(test)]
mod testing;

pub use config::{PipelineConfig, RunOptions, StorageConfig};
pub use error::{ConfigError, JobError};
pub use job::{JobStatus, ProcessedFile};
pub use params::ProcessingParams;
pub use pool::RunSummary;
