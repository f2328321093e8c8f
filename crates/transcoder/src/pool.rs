use std::collections::VecDeque;
use std::sync::Arc;
use log::{debug, error, info};
use tokio::sync::Mutex;

use crate::engine::{Engine, JobReport};
use crate::job::ProcessedFile;

/// Outcome of a whole run
#[derive(Debug, Default)]
pub struct RunSummary {
    pub reports: Vec<JobReport>,
    /// Jobs that never produced a report because their worker died
    pub lost: usize,
}

impl RunSummary {
    pub fn total(&self) -> usize {
        self.reports.len() + self.lost
    }

    pub fn succeeded(&self) -> usize {
        self.reports.iter().filter(|r| r.succeeded()).count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    pub fn all_succeeded(&self) -> bool {
        self.failed() == 0
    }
}

/// Drain `jobs` with `workers` parallel workers and wait for all of them.
///
/// Jobs are dequeued in FIFO order; completion order is not preserved since
/// only the transcode phase is serialized. Reports are collected as each job
/// finishes, so a worker that dies loses only the job it was running.
pub async fn run_jobs(engine: Arc<Engine>, jobs: Vec<ProcessedFile>, workers: usize) -> RunSummary {
    let total = jobs.len();
    let workers = workers.max(1).min(total.max(1));
    let queue = Arc::new(Mutex::new(VecDeque::from(jobs)));
    let reports = Arc::new(Mutex::new(Vec::with_capacity(total)));

    info!("Processing {} job(s) with {} worker(s)", total, workers);

    let mut handles = Vec::with_capacity(workers);
    for worker_id in 0..workers {
        let engine = Arc::clone(&engine);
        let queue = Arc::clone(&queue);
        let reports = Arc::clone(&reports);
        handles.push(tokio::spawn(async move {
            loop {
                // the queue guard is dropped before the job runs
                let next = queue.lock().await.pop_front();
                let Some(mut job) = next else {
                    break;
                };
                debug!("Worker {} picked up {}", worker_id, job.object_name);
                let report = engine.process_job(&mut job).await;
                reports.lock().await.push(report);
            }
        }));
    }

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Worker task failed: {}", e);
        }
    }

    let reports = std::mem::take(&mut *reports.lock().await);
    let lost = total - reports.len();
    let summary = RunSummary { reports, lost };

    info!(
        "Run complete: {} succeeded, {} failed, {} total",
        summary.succeeded(),
        summary.failed(),
        summary.total()
    );
    if lost > 0 {
        error!("  {} job(s) lost to crashed workers", lost);
    }
    for report in summary.reports.iter().filter(|r| !r.succeeded()) {
        if let Some(Err(e)) = &report.transcode {
            error!("  {}: {}", report.object_name, e);
        }
        if let Err(e) = &report.publish {
            error!("  {}: {}", report.object_name, e);
        }
    }
    summary
}
