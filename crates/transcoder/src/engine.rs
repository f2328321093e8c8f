use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use tokio::sync::Mutex;

use crate::config::RunOptions;
use crate::encoder::{EncodeRequest, Encoder};
use crate::error::JobError;
use crate::job::{JobStatus, ProcessedFile};
use crate::storage::ObjectStore;

/// Run-wide switches for the engine
#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    /// Upload target; `None` moves outputs into the destination tree
    pub bucket_name: Option<String>,
    /// Delete the temp output even when its upload failed
    pub force_cleanup: bool,
    /// Report intended actions without performing any
    pub noop: bool,
    pub verbose: bool,
    /// Head-check lock and object before evaluating each job
    pub recheck_remote: bool,
}

impl EngineOptions {
    pub fn upload_enabled(&self) -> bool {
        self.bucket_name.is_some()
    }
}

impl From<&RunOptions> for EngineOptions {
    fn from(opts: &RunOptions) -> Self {
        Self {
            bucket_name: opts.bucket_name.clone(),
            force_cleanup: opts.force_cleanup,
            noop: opts.noop,
            verbose: opts.verbose,
            recheck_remote: opts.recheck_remote,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscodeOutcome {
    Transcoded { duration: Duration },
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishOutcome {
    Uploaded,
    AlreadyUploaded,
    Stored,
    AlreadyStored,
    DryRun,
}

/// What happened to one job
#[derive(Debug)]
pub struct JobReport {
    pub object_name: String,
    /// `None` when no transcode was needed
    pub transcode: Option<Result<TranscodeOutcome, JobError>>,
    pub publish: Result<PublishOutcome, JobError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl JobReport {
    pub fn succeeded(&self) -> bool {
        self.transcode.as_ref().map_or(true, |t| t.is_ok()) && self.publish.is_ok()
    }
}

/// Runs the per-job protocol: decide, transcode under the shared slot, mark, publish
pub struct Engine {
    store: Arc<dyn ObjectStore>,
    encoder: Arc<dyn Encoder>,
    options: EngineOptions,
    /// Held for the duration of every encoder call
    transcode_slot: Mutex<()>,
}

impl Engine {
    pub fn new(store: Arc<dyn ObjectStore>, encoder: Arc<dyn Encoder>, options: EngineOptions) -> Self {
        Self {
            store,
            encoder,
            options,
            transcode_slot: Mutex::new(()),
        }
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Run the full protocol for one job; failures are captured in the report
    pub async fn process_job(&self, job: &mut ProcessedFile) -> JobReport {
        let started_at = Utc::now();
        let upload_enabled = self.options.upload_enabled();

        if let (true, Some(bucket)) = (self.options.recheck_remote, &self.options.bucket_name) {
            job.refresh_remote_state(self.store.as_ref(), bucket).await;
        }

        let transcode = if job.needs_transcoding(upload_enabled) {
            Some(self.transcode(job).await)
        } else {
            info!("{}: lock marker exists, skipping transcode", job.object_name);
            None
        };

        let publish = match &self.options.bucket_name {
            Some(bucket) => self.upload(job, bucket).await,
            None => self.store_locally(job).await,
        };

        let report = JobReport {
            object_name: job.object_name.clone(),
            transcode,
            publish,
            started_at,
            finished_at: Utc::now(),
        };

        if report.succeeded() {
            job.status = JobStatus::Done;
            info!("✅ {}: done", job.object_name);
        } else {
            job.status = JobStatus::Failed;
            warn!("❌ {}: finished with errors", job.object_name);
        }
        report
    }

    async fn transcode(&self, job: &mut ProcessedFile) -> Result<TranscodeOutcome, JobError> {
        if self.options.noop {
            info!("Would have started transcode for {}", job.object_name);
            return Ok(TranscodeOutcome::DryRun);
        }

        let result = {
            let _slot = self.transcode_slot.lock().await;
            job.status = JobStatus::Transcoding;
            info!(
                "Starting transcode for {} ({} source file(s))",
                job.object_name,
                job.source_paths.len()
            );
            self.encoder
                .transcode(EncodeRequest {
                    object_name: &job.object_name,
                    inputs: &job.source_paths,
                    output: &job.dest_temp_path,
                    params: &job.processing_params,
                })
                .await
        };

        let output = match result {
            Ok(output) => output,
            Err(e) => {
                error!("Transcode of {} failed: {}", job.object_name, e);
                remove_if_present(&job.dest_temp_path, &job.object_name).await;
                return Err(JobError::EncoderFailure {
                    object_name: job.object_name.clone(),
                    source: e,
                });
            }
        };

        if self.options.verbose {
            info!("Transcode of {} took: {:?}", job.object_name, output.duration);
            if !output.stdout.is_empty() {
                info!("ffmpeg standard output for {}:\n{}", job.object_name, output.stdout);
            }
            if !output.stderr.is_empty() {
                info!("ffmpeg standard error for {}:\n{}", job.object_name, output.stderr);
            }
        }

        if let Some(bucket) = &self.options.bucket_name {
            self.write_lock_marker(job, bucket).await;
        }

        Ok(TranscodeOutcome::Transcoded {
            duration: output.duration,
        })
    }

    /// Put `<object_name>.lock` with the run's parameters as body.
    ///
    /// Check-then-write is not atomic: two runs racing on one object can both
    /// transcode it before either marker lands.
    async fn write_lock_marker(&self, job: &mut ProcessedFile, bucket: &str) {
        let body = match job.processing_params.to_canonical_json() {
            Ok(body) => body,
            Err(e) => {
                error!("Failed to serialize parameters for {}: {}", job.object_name, e);
                return;
            }
        };
        match self.store.put(bucket, &job.lock_key(), body.into_bytes()).await {
            Ok(()) => {
                debug!("Created lock marker {}", job.lock_key());
                job.mark_locked();
            }
            Err(e) => error!("Failed to create lock marker for {}: {}", job.object_name, e),
        }
    }

    async fn upload(&self, job: &mut ProcessedFile, bucket: &str) -> Result<PublishOutcome, JobError> {
        if job.is_uploaded {
            info!("File {} is already uploaded", job.object_name);
            // a transcode may still have run when only the lock was missing
            if !self.options.noop {
                remove_if_present(&job.dest_temp_path, &job.object_name).await;
            }
            return Ok(PublishOutcome::AlreadyUploaded);
        }
        if self.options.noop {
            info!("Would have started upload for {}", job.object_name);
            return Ok(PublishOutcome::DryRun);
        }
        if !job.dest_temp_path.is_file() {
            warn!("Temporary file for {} not found for the upload job", job.object_name);
            return Err(JobError::MissingArtifact {
                object_name: job.object_name.clone(),
                temp_path: job.dest_temp_path.clone(),
            });
        }

        job.status = JobStatus::Uploading;
        info!("Starting upload for {}", job.object_name);
        let start = Instant::now();
        let result = self
            .store
            .upload_file(bucket, &job.dest_temp_path, &job.object_name)
            .await;
        if self.options.verbose {
            info!("Upload of {} took: {:?}", job.object_name, start.elapsed());
        }

        match result {
            Ok(()) => {
                job.mark_uploaded();
                remove_if_present(&job.dest_temp_path, &job.object_name).await;
                Ok(PublishOutcome::Uploaded)
            }
            Err(e) => {
                error!("Upload of {} failed: {}", job.object_name, e);
                if self.options.force_cleanup {
                    remove_if_present(&job.dest_temp_path, &job.object_name).await;
                } else {
                    info!(
                        "Keeping {} for inspection",
                        job.dest_temp_path.display()
                    );
                }
                Err(JobError::UploadFailure {
                    object_name: job.object_name.clone(),
                    source: e,
                })
            }
        }
    }

    async fn store_locally(&self, job: &mut ProcessedFile) -> Result<PublishOutcome, JobError> {
        let temp_present = job.dest_temp_path.is_file();

        if !temp_present && job.dest_path.is_file() {
            info!("File {} is already stored in destination directory", job.object_name);
            return Ok(PublishOutcome::AlreadyStored);
        }
        if self.options.noop {
            info!("Would have stored {} in destination directory", job.object_name);
            return Ok(PublishOutcome::DryRun);
        }
        if !temp_present {
            warn!(
                "Temporary file for {} not found to be stored in destination directory",
                job.object_name
            );
            return Err(JobError::MissingArtifact {
                object_name: job.object_name.clone(),
                temp_path: job.dest_temp_path.clone(),
            });
        }

        job.status = JobStatus::Storing;
        info!("Storing file {} in destination directory", job.object_name);
        move_file(&job.dest_temp_path, &job.dest_path)
            .await
            .map_err(|source| JobError::Store {
                object_name: job.object_name.clone(),
                dest_path: job.dest_path.clone(),
                source,
            })?;
        Ok(PublishOutcome::Stored)
    }
}

async fn remove_if_present(path: &Path, object_name: &str) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("🗑️  Deleted temp file for {}: {}", object_name, path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete temp file {}: {}", path.display(), e),
    }
}

/// Move `from` to `to`, creating parents; copies across filesystems
async fn move_file(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    if tokio::fs::rename(from, to).await.is_ok() {
        return Ok(());
    }
    tokio::fs::copy(from, to).await?;
    tokio::fs::remove_file(from).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ProcessingParams;
    use crate::scan::WorkUnit;
    use crate::testing::{sample_params, FakeEncoder, MemoryStore};
    use std::path::PathBuf;

    const BUCKET: &str = "media";

    fn job(dst: &Path, name: &str, has_lock: bool, is_uploaded: bool) -> ProcessedFile {
        let unit = WorkUnit {
            object_name: name.to_string(),
            source_paths: vec![PathBuf::from("/src/movie/a.mkv"), PathBuf::from("/src/movie/b.mkv")],
        };
        ProcessedFile::new(unit, dst, "mkv", has_lock, is_uploaded, Arc::new(sample_params()))
    }

    fn engine(store: Arc<MemoryStore>, encoder: Arc<FakeEncoder>, options: EngineOptions) -> Engine {
        Engine::new(store, encoder, options)
    }

    fn upload_options() -> EngineOptions {
        EngineOptions {
            bucket_name: Some(BUCKET.to_string()),
            ..EngineOptions::default()
        }
    }

    #[tokio::test]
    async fn test_successful_upload_writes_lock_and_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        let encoder = Arc::new(FakeEncoder::default());
        let engine = engine(store.clone(), encoder.clone(), upload_options());

        let mut job = job(dir.path(), "movie", false, false);
        let report = engine.process_job(&mut job).await;

        assert!(report.succeeded());
        assert_eq!(encoder.calls(), 1);
        assert!(job.has_lock);
        assert!(job.is_uploaded);
        assert_eq!(job.status, JobStatus::Done);
        assert!(!job.dest_temp_path.exists());
        assert_eq!(report.publish.unwrap(), PublishOutcome::Uploaded);

        let body = store.get(BUCKET, "movie.lock").await.unwrap();
        assert_eq!(ProcessingParams::from_lock_body(&body).unwrap(), sample_params());
        let uploaded = store.get(BUCKET, "movie").await.unwrap();
        assert_eq!(uploaded, b"/src/movie/a.mkv|/src/movie/b.mkv");
    }

    #[tokio::test]
    async fn test_existing_lock_skips_transcode() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        let encoder = Arc::new(FakeEncoder::default());
        let engine = engine(store.clone(), encoder.clone(), upload_options());

        let mut job = job(dir.path(), "movie", true, true);
        let report = engine.process_job(&mut job).await;

        assert_eq!(encoder.calls(), 0);
        assert!(report.transcode.is_none());
        assert_eq!(report.publish.unwrap(), PublishOutcome::AlreadyUploaded);
        assert_eq!(store.upload_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_uploaded_without_lock_cleans_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        store.insert(BUCKET, "movie/a.mkv", b"data").await;
        let encoder = Arc::new(FakeEncoder::default());
        let engine = engine(store.clone(), encoder.clone(), upload_options());

        let mut job = job(dir.path(), "movie/a.mkv", false, true);
        let report = engine.process_job(&mut job).await;

        assert!(report.succeeded());
        assert_eq!(encoder.calls(), 1);
        assert!(job.has_lock);
        assert_eq!(report.publish.unwrap(), PublishOutcome::AlreadyUploaded);
        assert!(!job.dest_temp_path.exists());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        assert_eq!(store.upload_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_encoder_failure_reports_missing_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        let encoder = Arc::new(FakeEncoder {
            partial_output_on_failure: true,
            ..FakeEncoder::failing()
        });
        let engine = engine(store.clone(), encoder.clone(), upload_options());

        let mut job = job(dir.path(), "movie", false, false);
        let report = engine.process_job(&mut job).await;

        assert!(!report.succeeded());
        assert!(matches!(report.transcode, Some(Err(JobError::EncoderFailure { .. }))));
        assert!(matches!(report.publish, Err(JobError::MissingArtifact { .. })));
        assert!(!job.has_lock);
        assert!(!job.dest_temp_path.exists());
        assert!(store.get(BUCKET, "movie.lock").await.is_none());
        assert_eq!(job.status, JobStatus::Failed);
    }

    #[tokio::test]
    async fn test_upload_failure_keeps_temp_without_force_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        store.fail_upload(true);
        let engine = engine(store.clone(), Arc::new(FakeEncoder::default()), upload_options());

        let mut job = job(dir.path(), "movie", false, false);
        let report = engine.process_job(&mut job).await;

        assert!(matches!(report.publish, Err(JobError::UploadFailure { .. })));
        assert!(job.has_lock);
        assert!(!job.is_uploaded);
        assert!(job.dest_temp_path.exists());
    }

    #[tokio::test]
    async fn test_upload_failure_with_force_cleanup_removes_temp() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        store.fail_upload(true);
        let options = EngineOptions {
            force_cleanup: true,
            ..upload_options()
        };
        let engine = engine(store.clone(), Arc::new(FakeEncoder::default()), options);

        let mut job = job(dir.path(), "movie", false, false);
        let report = engine.process_job(&mut job).await;

        assert!(!report.succeeded());
        assert!(!job.dest_temp_path.exists());
    }

    #[tokio::test]
    async fn test_lock_write_failure_still_uploads() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        store.fail_put(true);
        let engine = engine(store.clone(), Arc::new(FakeEncoder::default()), upload_options());

        let mut job = job(dir.path(), "movie", false, false);
        let report = engine.process_job(&mut job).await;

        assert!(report.succeeded());
        assert!(!job.has_lock);
        assert!(job.is_uploaded);
    }

    #[tokio::test]
    async fn test_local_mode_retranscodes_and_moves_output() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::default());
        let encoder = Arc::new(FakeEncoder::default());
        let engine = engine(store.clone(), encoder.clone(), EngineOptions::default());

        let mut job = job(dir.path(), "library/movie/a.mkv", true, false);
        let report = engine.process_job(&mut job).await;

        assert!(report.succeeded());
        assert_eq!(encoder.calls(), 1);
        assert_eq!(report.publish.unwrap(), PublishOutcome::Stored);
        assert!(!job.dest_temp_path.exists());
        assert_eq!(
            std::fs::read(dir.path().join("library/movie/a.mkv")).unwrap(),
            b"/src/movie/a.mkv|/src/movie/b.mkv"
        );
        // no marker is written without a bucket
        assert!(store.keys(BUCKET).await.is_empty());
    }

    #[tokio::test]
    async fn test_local_mode_already_stored() {
        let dir = tempfile::tempdir().unwrap();
        let encoder = Arc::new(FakeEncoder::default());
        let engine = engine(Arc::new(MemoryStore::default()), encoder.clone(), EngineOptions::default());

        let mut job = job(dir.path(), "movie.mkv", true, false);
        std::fs::write(&job.dest_path, b"done").unwrap();
        let report = engine.process_job(&mut job).await;

        assert_eq!(encoder.calls(), 0);
        assert_eq!(report.publish.unwrap(), PublishOutcome::AlreadyStored);
    }

    #[tokio::test]
    async fn test_noop_performs_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        let encoder = Arc::new(FakeEncoder::default());
        let options = EngineOptions {
            noop: true,
            ..upload_options()
        };
        let engine = engine(store.clone(), encoder.clone(), options);

        let mut job = job(dir.path(), "movie", false, false);
        let report = engine.process_job(&mut job).await;

        assert!(report.succeeded());
        assert_eq!(encoder.calls(), 0);
        assert_eq!(report.transcode.unwrap().unwrap(), TranscodeOutcome::DryRun);
        assert_eq!(report.publish.unwrap(), PublishOutcome::DryRun);
        assert!(store.keys(BUCKET).await.is_empty());
        assert!(!job.has_lock);
    }

    #[tokio::test]
    async fn test_recheck_remote_picks_up_new_lock() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(MemoryStore::with_bucket(BUCKET));
        store.insert(BUCKET, "movie.lock", b"{}").await;
        store.insert(BUCKET, "movie", b"data").await;
        let encoder = Arc::new(FakeEncoder::default());
        let options = EngineOptions {
            recheck_remote: true,
            ..upload_options()
        };
        let engine = engine(store.clone(), encoder.clone(), options);

        let mut job = job(dir.path(), "movie", false, false);
        let report = engine.process_job(&mut job).await;

        assert_eq!(encoder.calls(), 0);
        assert_eq!(report.publish.unwrap(), PublishOutcome::AlreadyUploaded);
    }
}
