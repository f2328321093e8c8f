use std::path::Path;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Credentials, Region};
use aws_sdk_s3::primitives::{ByteStream, Length};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use humansize::{format_size, DECIMAL};
use log::{debug, info, warn};

use crate::config::StorageConfig;
use crate::error::StorageError;

pub type StorageResult<T> = Result<T, StorageError>;

/// Outcome of an existence check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeadStatus {
    Exists,
    /// Definitive 404
    Absent,
    /// Any other failure; must not be used to change known state
    Indeterminate,
}

/// Primitive operations the pipeline needs from a bucket
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn head(&self, bucket: &str, key: &str) -> HeadStatus;

    /// Every key in the bucket
    async fn list(&self, bucket: &str) -> StorageResult<Vec<String>>;

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()>;

    async fn upload_file(&self, bucket: &str, local_path: &Path, key: &str) -> StorageResult<()>;

    async fn bucket_exists(&self, bucket: &str) -> bool;
}

/// Store used when uploading is disabled; holds nothing and accepts nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledStore;

#[async_trait]
impl ObjectStore for DisabledStore {
    async fn head(&self, _bucket: &str, _key: &str) -> HeadStatus {
        HeadStatus::Absent
    }

    async fn list(&self, _bucket: &str) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }

    async fn put(&self, _bucket: &str, key: &str, _body: Vec<u8>) -> StorageResult<()> {
        Err(StorageError::PutFailed {
            key: key.to_string(),
            message: "upload is disabled".to_string(),
        })
    }

    async fn upload_file(&self, _bucket: &str, _local_path: &Path, key: &str) -> StorageResult<()> {
        Err(upload_failed(key, "upload is disabled"))
    }

    async fn bucket_exists(&self, _bucket: &str) -> bool {
        false
    }
}

/// S3-compatible object store on top of the AWS SDK; also covers MinIO, R2
/// and other custom endpoints
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    multipart_threshold: u64,
    chunk_size: u64,
}

impl S3Store {
    /// Build a client from explicit configuration, falling back to the AWS
    /// default provider chain for anything left unset
    pub async fn new(config: &StorageConfig, multipart_threshold: u64, chunk_size: u64) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());

        if let (Some(id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(id, secret, None, None, "static"));
        }
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        } else if config.endpoint_url.is_some() {
            loader = loader.region(Region::new("us-east-1"));
        }
        if let Some(endpoint) = &config.endpoint_url {
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(config.endpoint_url.is_some())
            .build();

        Self {
            client: Client::from_conf(s3_config),
            multipart_threshold,
            chunk_size: chunk_size.max(5 * 1024 * 1024),
        }
    }

    async fn upload_single(&self, bucket: &str, local_path: &Path, key: &str) -> StorageResult<()> {
        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| upload_failed(key, e))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .send()
            .await
            .map_err(|e| upload_failed(key, e))?;
        Ok(())
    }

    async fn upload_multipart(
        &self,
        bucket: &str,
        local_path: &Path,
        key: &str,
        size: u64,
    ) -> StorageResult<()> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| upload_failed(key, e))?;
        let upload_id = created
            .upload_id()
            .ok_or_else(|| upload_failed(key, "no upload id returned"))?
            .to_string();

        match self.upload_parts(bucket, local_path, key, &upload_id, size).await {
            Ok(parts) => {
                self.client
                    .complete_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(parts)).build())
                    .send()
                    .await
                    .map_err(|e| upload_failed(key, e))?;
                Ok(())
            }
            Err(e) => {
                if let Err(abort_err) = self
                    .client
                    .abort_multipart_upload()
                    .bucket(bucket)
                    .key(key)
                    .upload_id(&upload_id)
                    .send()
                    .await
                {
                    warn!("Failed to abort multipart upload of {}: {}", key, abort_err);
                }
                Err(e)
            }
        }
    }

    async fn upload_parts(
        &self,
        bucket: &str,
        local_path: &Path,
        key: &str,
        upload_id: &str,
        size: u64,
    ) -> StorageResult<Vec<CompletedPart>> {
        let mut parts = Vec::new();
        let mut offset = 0u64;
        let mut part_number = 1i32;

        while offset < size {
            let length = self.chunk_size.min(size - offset);
            let body = ByteStream::read_from()
                .path(local_path)
                .offset(offset)
                .length(Length::Exact(length))
                .build()
                .await
                .map_err(|e| upload_failed(key, e))?;

            let uploaded = self
                .client
                .upload_part()
                .bucket(bucket)
                .key(key)
                .upload_id(upload_id)
                .part_number(part_number)
                .body(body)
                .send()
                .await
                .map_err(|e| upload_failed(key, e))?;

            debug!("Uploaded part {} of {} ({} bytes)", part_number, key, length);
            parts.push(
                CompletedPart::builder()
                    .set_e_tag(uploaded.e_tag().map(str::to_string))
                    .part_number(part_number)
                    .build(),
            );
            offset += length;
            part_number += 1;
        }
        Ok(parts)
    }
}

fn upload_failed(key: &str, e: impl std::fmt::Display) -> StorageError {
    StorageError::UploadFailed {
        key: key.to_string(),
        message: e.to_string(),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn head(&self, bucket: &str, key: &str) -> HeadStatus {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(_) => HeadStatus::Exists,
            Err(e) => {
                if e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    HeadStatus::Absent
                } else {
                    warn!("Could not determine whether {} exists: {}", key, e);
                    HeadStatus::Indeterminate
                }
            }
        }
    }

    async fn list(&self, bucket: &str) -> StorageResult<Vec<String>> {
        debug!("Listing objects in bucket: {}", bucket);

        let mut keys = Vec::new();
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self.client.list_objects_v2().bucket(bucket);
            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| StorageError::ListFailed {
                bucket: bucket.to_string(),
                message: e.to_string(),
            })?;

            keys.extend(response.contents().iter().filter_map(|obj| obj.key().map(str::to_string)));

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(str::to_string);
                if continuation_token.is_none() {
                    break;
                }
            } else {
                break;
            }
        }

        Ok(keys)
    }

    async fn put(&self, bucket: &str, key: &str, body: Vec<u8>) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| StorageError::PutFailed {
                key: key.to_string(),
                message: e.to_string(),
            })?;
        Ok(())
    }

    async fn upload_file(&self, bucket: &str, local_path: &Path, key: &str) -> StorageResult<()> {
        let size = tokio::fs::metadata(local_path).await?.len();
        debug!(
            "Uploading {} ({}) to {}/{}",
            local_path.display(),
            format_size(size, DECIMAL),
            bucket,
            key
        );

        if size > self.multipart_threshold {
            self.upload_multipart(bucket, local_path, key, size).await?;
        } else {
            self.upload_single(bucket, local_path, key).await?;
        }

        info!("Uploaded {} to {}/{}", format_size(size, DECIMAL), bucket, key);
        Ok(())
    }

    async fn bucket_exists(&self, bucket: &str) -> bool {
        match self.client.head_bucket().bucket(bucket).send().await {
            Ok(_) => true,
            Err(e) => {
                if !e.as_service_error().map(|se| se.is_not_found()).unwrap_or(false) {
                    warn!("Exception occurred while checking bucket {}: {}", bucket, e);
                }
                false
            }
        }
    }
}
