use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use log::debug;
use sha2::{Digest, Sha256};

use crate::params::ProcessingParams;
use crate::remote::{lock_key, RemoteState};
use crate::scan::WorkUnit;
use crate::storage::{HeadStatus, ObjectStore};

/// Lifecycle phase of a job within one run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStatus {
    Pending,
    Transcoding,
    /// Transcoded and the lock marker is in place
    Locked,
    Uploading,
    Storing,
    Done,
    Failed,
}

/// Hex SHA-256 of `s`
pub fn hash_string(s: &str) -> String {
    format!("{:x}", Sha256::digest(s.as_bytes()))
}

/// One logical output and everything needed to produce it
#[derive(Debug, Clone)]
pub struct ProcessedFile {
    pub object_name: String,
    pub source_paths: Vec<PathBuf>,
    pub has_lock: bool,
    pub is_uploaded: bool,
    pub dest_path: PathBuf,
    pub dest_temp_path: PathBuf,
    pub processing_params: Arc<ProcessingParams>,
    pub status: JobStatus,
}

impl ProcessedFile {
    pub fn new(
        unit: WorkUnit,
        dst_dir: &Path,
        file_extension: &str,
        has_lock: bool,
        is_uploaded: bool,
        processing_params: Arc<ProcessingParams>,
    ) -> Self {
        let dest_temp_path = temp_path_for(&unit.object_name, dst_dir, file_extension);
        let dest_path = dest_path_for(&unit.object_name, dst_dir, file_extension);
        Self {
            object_name: unit.object_name,
            source_paths: unit.source_paths,
            has_lock,
            is_uploaded,
            dest_path,
            dest_temp_path,
            processing_params,
            status: JobStatus::Pending,
        }
    }

    pub fn lock_key(&self) -> String {
        lock_key(&self.object_name)
    }

    pub fn is_concatenation(&self) -> bool {
        self.source_paths.len() > 1
    }

    /// Whether the encoder has to run for this job.
    ///
    /// A lock marker alone is not enough when outputs are stored locally:
    /// with no upload step there is nothing to fetch a lost output back from.
    pub fn needs_transcoding(&self, upload_enabled: bool) -> bool {
        !self.has_lock
            || (!upload_enabled && !self.dest_temp_path.is_file() && !self.dest_path.is_file())
    }

    /// Record a lock marker; never reverts
    pub fn mark_locked(&mut self) {
        self.has_lock = true;
        self.status = JobStatus::Locked;
    }

    /// Record a completed upload; never reverts
    pub fn mark_uploaded(&mut self) {
        self.is_uploaded = true;
    }

    /// Re-check remote flags with head requests. Only a definitive `Exists`
    /// changes state, so flags stay monotonic.
    pub async fn refresh_remote_state(&mut self, store: &dyn ObjectStore, bucket: &str) {
        if !self.has_lock && store.head(bucket, &self.lock_key()).await == HeadStatus::Exists {
            debug!("{}: lock marker appeared since the run started", self.object_name);
            self.has_lock = true;
        }
        if !self.is_uploaded && store.head(bucket, &self.object_name).await == HeadStatus::Exists {
            debug!("{}: object appeared since the run started", self.object_name);
            self.is_uploaded = true;
        }
    }
}

impl fmt::Display for ProcessedFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "object_name: {}", self.object_name)?;
        for path in &self.source_paths {
            writeln!(f, "source_path: {}", path.display())?;
        }
        writeln!(f, "has_lock: {}", self.has_lock)?;
        writeln!(f, "is_uploaded: {}", self.is_uploaded)?;
        write!(f, "temp_path: {}", self.dest_temp_path.display())
    }
}

/// `<dst_dir>/<sha256(object_name)>.<extension>`
pub fn temp_path_for(object_name: &str, dst_dir: &Path, file_extension: &str) -> PathBuf {
    dst_dir.join(format!(
        "{}.{}",
        hash_string(object_name),
        file_extension.trim_start_matches('.')
    ))
}

/// `<dst_dir>/<object_name>`, with `.<extension>` appended when the name does
/// not already carry it. Concatenation units are named after their directory,
/// so without the suffix `show` and `show/s2` would need `dst/show` to be both
/// a file and a directory.
pub fn dest_path_for(object_name: &str, dst_dir: &Path, file_extension: &str) -> PathBuf {
    let relative = object_name.trim_start_matches('/');
    let extension = file_extension.trim_start_matches('.');
    let suffix = format!(".{}", extension.to_lowercase());
    if extension.is_empty() || relative.to_lowercase().ends_with(&suffix) {
        dst_dir.join(relative)
    } else {
        dst_dir.join(format!("{}.{}", relative, extension))
    }
}

/// Join work units with the remote snapshot into jobs
pub fn build_jobs(
    units: Vec<WorkUnit>,
    remote: &RemoteState,
    dst_dir: &Path,
    file_extension: &str,
    params: Arc<ProcessingParams>,
) -> Vec<ProcessedFile> {
    units
        .into_iter()
        .map(|unit| {
            let has_lock = remote.has_lock(&unit.object_name);
            let is_uploaded = remote.is_uploaded(&unit.object_name);
            ProcessedFile::new(unit, dst_dir, file_extension, has_lock, is_uploaded, Arc::clone(&params))
        })
        .collect()
}
