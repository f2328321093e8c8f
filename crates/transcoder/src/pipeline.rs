use std::sync::Arc;
use anyhow::{Context, Result};
use log::{debug, info};

use crate::config::RunOptions;
use crate::encoder::Encoder;
use crate::engine::{Engine, EngineOptions};
use crate::job::{build_jobs, ProcessedFile};
use crate::params::ProcessingParams;
use crate::pool::{run_jobs, RunSummary};
use crate::remote::resolve_remote_state;
use crate::scan::{find_source_files, ScanOptions};
use crate::storage::ObjectStore;

impl From<&RunOptions> for ScanOptions {
    fn from(opts: &RunOptions) -> Self {
        Self {
            root: opts.src_dir.clone(),
            ignored_subdir: opts.ignored_subdir.clone(),
            obj_prefix: opts.obj_prefix.clone(),
            file_extension: opts.file_extension.clone(),
            concat: opts.concat,
        }
    }
}

/// Discover sources and join them with the bucket snapshot
pub async fn plan_jobs(
    opts: &RunOptions,
    params: Arc<ProcessingParams>,
    store: &dyn ObjectStore,
) -> Result<Vec<ProcessedFile>> {
    let scan_opts = ScanOptions::from(opts);
    let units = tokio::task::spawn_blocking(move || find_source_files(&scan_opts))
        .await
        .context("Source scan task failed")?
        .context("Failed to scan source directory")?;

    let remote = resolve_remote_state(store, opts.bucket_name.as_deref()).await;
    let jobs = build_jobs(units, &remote, &opts.dst_dir, &opts.file_extension, params);

    for job in &jobs {
        debug!("Planned job:\n{}", job);
    }
    Ok(jobs)
}

/// Run one full pass: scan, resolve remote state, process every job
pub async fn run_pipeline(
    opts: &RunOptions,
    params: ProcessingParams,
    store: Arc<dyn ObjectStore>,
    encoder: Arc<dyn Encoder>,
    workers: usize,
) -> Result<RunSummary> {
    params.validate()?;
    let params = Arc::new(params);

    let jobs = plan_jobs(opts, Arc::clone(&params), store.as_ref()).await?;
    let locked = jobs.iter().filter(|j| j.has_lock).count();
    let uploaded = jobs.iter().filter(|j| j.is_uploaded).count();
    info!(
        "Planned {} job(s): {} already locked, {} already uploaded",
        jobs.len(),
        locked,
        uploaded
    );

    if opts.noop {
        info!("noop enabled, will not take any actions");
    }

    let engine = Arc::new(Engine::new(store, encoder, EngineOptions::from(opts)));
    Ok(run_jobs(engine, jobs, workers).await)
}
