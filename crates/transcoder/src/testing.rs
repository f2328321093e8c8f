use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::encoder::{EncodeOutput, EncodeRequest, Encoder};
use crate::error::{EncoderError, StorageError};
use crate::params::ProcessingParams;
use crate::storage::{HeadStatus, ObjectStore, StorageResult};

pub fn sample_params() -> ProcessingParams {
    ProcessingParams::new(
        false,
        1920,
        1080,
        "libx265",
        Some("yuv420p10le".to_string()),
        vec!["pol".to_string(), "eng".to_string()],
        None,
        Some(22),
    )
    .unwrap()
}

/// Tracks how many callers are inside a section at once
#[derive(Default)]
pub struct ConcurrencyGauge {
    current: AtomicUsize,
    max: AtomicUsize,
}

impl ConcurrencyGauge {
    fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.max.fetch_max(now, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn max(&self) -> usize {
        self.max.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
pub struct MemoryStore {
    buckets: Mutex<HashMap<String, HashMap<String, Vec<u8>>>>,
    fail_list: AtomicBool,
    fail_head: AtomicBool,
    fail_upload: AtomicBool,
    fail_put: AtomicBool,
    upload_delay: Duration,
    pub uploads: ConcurrencyGauge,
    pub upload_calls: AtomicUsize,
}

impl MemoryStore {
    pub fn with_bucket(bucket: &str) -> Self {
        let store = Self::default();
        store
            .buckets
            .try_lock()
            .unwrap()
            .insert(bucket.to_string(), HashMap::new());
        store
    }

    pub async fn insert(&self, bucket: &str, key: &str, body: &[u8]) {
        self.buckets
            .lock()
            .await
            .entry(bucket.to_string())
            .or_default()
            .insert(key.to_string(), body.to_vec());
    }

    pub async fn get(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.buckets.lock().await.get(bucket)?.get(key).cloned()
    }

    pub async fn keys(&self, bucket: &str) -> HashSet<String> {
        self.buckets
            .lock()
            .await
            .get(bucket)
            .map(|objects| objects.keys().cloned().collect())
            .unwrap_or_default()
    }

    pub fn with_upload_delay(mut self, delay: Duration) -> Self {
        self.upload_delay = delay;
        self
    }

    pub fn fail_list(&self, fail: bool) {
        self.fail_list.store(fail, Ordering::SeqCst);
    }

    pub fn fail_head(&self, fail: bool) {
        self.fail_head.store(fail, Ordering::SeqCst);
    }

    pub fn fail_upload(&self, fail: bool) {
        self.fail_upload.store(fail, Ordering::SeqCst);
    }

    pub fn fail_put(&self, fail: bool) {
        self.fail_put.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn head(&self, bucket: &str, key: &str) -> HeadStatus {
        if self.fail_head.load(Ordering::SeqCst) {
            return HeadStatus::Indeterminate;
        }
        match self.get(bucket, key).await {
            Some(_) => HeadStatus::Exists,
            None => HeadStatus::Absent,
        }
    }

    async fn list(&self, bucket: &str) -> StorageResult<Vec<String>> {
        if self.fail_list.load(Ordering::SeqCst) {
            return Err(StorageError::ListFailed {
                bucket: bucket.to_string(),
                message: "simulated".to_string(),
            });
        }
        Ok(self.keys(bucket).await.into_iter().collect())
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        if self.fail_put.load(Ordering::SeqCst) {
            return Err(StorageError::PutFailed {
                key: key.to_string(),
                message: "simulated".to_string(),
            });
        }
        self.insert(bucket, key, &body).await;
        Ok(())
    }

    async fn upload_file(&self, bucket: &str, local_path: &Path, key: &str) -> StorageResult<()> {
        self.upload_calls.fetch_add(1, Ordering::SeqCst);
        self.uploads.enter();
        tokio::time::sleep(self.upload_delay).await;
        let result = if self.fail_upload.load(Ordering::SeqCst) {
            Err(StorageError::UploadFailed {
                key: key.to_string(),
                message: "simulated".to_string(),
            })
        } else {
            match tokio::fs::read(local_path).await {
                Ok(body) => {
                    self.insert(bucket, key, &body).await;
                    Ok(())
                }
                Err(e) => Err(StorageError::Io(e)),
            }
        };
        self.uploads.exit();
        result
    }

    async fn bucket_exists(&self, bucket: &str) -> bool {
        self.buckets.lock().await.contains_key(bucket)
    }
}

/// Encoder that writes a fixed body to the output, or fails
#[derive(Default)]
pub struct FakeEncoder {
    pub fail: bool,
    /// Leave a partial output behind when failing
    pub partial_output_on_failure: bool,
    /// Panic instead of returning, taking the calling task down
    pub panic: bool,
    pub delay: Duration,
    pub calls: AtomicUsize,
    pub running: ConcurrencyGauge,
    /// Object names in call order
    pub seen: Mutex<Vec<String>>,
}

impl FakeEncoder {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub async fn seen(&self) -> Vec<String> {
        self.seen.lock().await.clone()
    }
}

#[async_trait]
impl Encoder for FakeEncoder {
    async fn transcode(&self, request: EncodeRequest<'_>) -> Result<EncodeOutput, EncoderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().await.push(request.object_name.to_string());
        if self.panic {
            panic!("encoder crashed on {}", request.object_name);
        }
        self.running.enter();
        tokio::time::sleep(self.delay).await;
        let result = if self.fail {
            if self.partial_output_on_failure {
                tokio::fs::write(request.output, b"partial").await?;
            }
            Err(EncoderError::Failed {
                exit_code: 1,
                stdout: String::new(),
                stderr: "simulated failure".to_string(),
            })
        } else {
            let body = request
                .inputs
                .iter()
                .map(|p| p.to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("|");
            tokio::fs::write(request.output, body).await?;
            Ok(EncodeOutput {
                stdout: String::new(),
                stderr: String::new(),
                duration: self.delay,
            })
        };
        self.running.exit();
        result
    }
}
