use std::collections::HashSet;
use log::{info, warn};
use crate::scan::nfc;
use crate::storage::ObjectStore;

/// Suffix appended to an object name to form its lock marker key
pub const LOCK_SUFFIX: &str = ".lock";

pub fn lock_key(object_name: &str) -> String {
    format!("{}{}", object_name, LOCK_SUFFIX)
}

/// Snapshot of the bucket keys taken once at the start of a run
#[derive(Debug, Clone, Default)]
pub struct RemoteState {
    objects: HashSet<String>,
}

impl RemoteState {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            objects: keys.into_iter().map(|k| nfc(k.as_ref())).collect(),
        }
    }

    pub fn is_uploaded(&self, object_name: &str) -> bool {
        self.objects.contains(object_name)
    }

    pub fn has_lock(&self, object_name: &str) -> bool {
        self.objects.contains(&lock_key(object_name))
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

/// Read every key of `bucket`; an unset, missing or unreadable bucket yields an empty snapshot
pub async fn resolve_remote_state(store: &dyn ObjectStore, bucket: Option<&str>) -> RemoteState {
    let Some(bucket) = bucket else {
        return RemoteState::default();
    };

    if !store.bucket_exists(bucket).await {
        warn!("Bucket {} does not exist or is unreachable, assuming it is empty", bucket);
        return RemoteState::default();
    }

    match store.list(bucket).await {
        Ok(keys) => {
            let state = RemoteState::new(keys);
            info!("Bucket {} holds {} object(s)", bucket, state.len());
            state
        }
        Err(e) => {
            warn!("Failed to list bucket {}, assuming it is empty: {}", bucket, e);
            RemoteState::default()
        }
    }
}
