//! Async driver for a reassembly job
//!
//! Waits for the analysis job to finish, then walks its paginated results
//! strictly in sequence, feeding every page to [`StreamState`] before the
//! next one is requested.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use ocrstream_core::{Phase, Reassembly, StreamState};
use serde::Serialize;

use crate::config::PollConfig;
use crate::prelude::*;
use crate::service::{AnalysisService, JobState, JobStatus};

/// Outcome of one job, as printed by `--json`.
#[derive(Debug, Clone, Serialize)]
pub struct JobReport {
    pub job_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    #[serde(flatten)]
    pub reassembly: Reassembly,
}

impl JobReport {
    pub fn new(job_id: &str, started_at: DateTime<Utc>, reassembly: Reassembly) -> Self {
        Self {
            job_id: job_id.to_string(),
            started_at,
            finished_at: Utc::now(),
            reassembly,
        }
    }
}

/// Poll the job until it succeeds.
pub async fn wait_for_job(
    service: &dyn AnalysisService,
    job_id: &str,
    poll: PollConfig,
) -> Result<JobStatus, Error> {
    for attempt in 1..=poll.max_attempts {
        let status = service.poll_status(job_id).await?;

        match status.state {
            JobState::Succeeded => return Ok(status),
            JobState::Failed => {
                return Err(Error::SourceFailure(format!(
                    "job {job_id} failed: {}",
                    status.message.as_deref().unwrap_or("no status message")
                )))
            }
            JobState::InProgress => {
                log::debug!(
                    "Job {} in progress (attempt {}/{})",
                    job_id,
                    attempt,
                    poll.max_attempts
                );
                if attempt < poll.max_attempts {
                    tokio::time::sleep(poll.interval).await;
                }
            }
        }
    }

    Err(Error::PollTimeout {
        job_id: job_id.to_string(),
        attempts: poll.max_attempts,
    })
}

/// Read every result page of a finished job and reassemble it.
///
/// `page_count` is the count reported by the job status, when known; it lets
/// progress move before the result pages carry it. `on_progress` receives a
/// 0-100 percentage after every page, and 100 once the stream is finished.
pub async fn reassemble<F>(
    service: &dyn AnalysisService,
    job_id: &str,
    page_count: Option<u32>,
    mut on_progress: F,
) -> Result<Reassembly, Error>
where
    F: FnMut(u8) + Send,
{
    let mut state = StreamState::new().with_page_count(page_count.unwrap_or_default());

    while state.phase() == Phase::Streaming {
        let page = service.get_results(job_id, state.next_token()).await?;
        state.apply(page)?;
        on_progress(state.progress().percent());
    }

    let steps = state.steps();
    let reassembly = state.finish()?;
    on_progress(reassembly.progress);

    log::info!(
        "Job {} reassembled in {} steps: {} pages, {} tables, {} key-value pairs",
        job_id,
        steps,
        reassembly.page_count(),
        reassembly.table_count(),
        reassembly.pair_count()
    );
    if !reassembly.is_clean() {
        log::warn!(
            "Job {} has {} integrity fault(s)",
            job_id,
            reassembly.faults.len()
        );
    }

    Ok(reassembly)
}

/// Wait for the job, then reassemble it.
pub async fn run_job<F>(
    service: &dyn AnalysisService,
    job_id: &str,
    poll: PollConfig,
    on_progress: F,
) -> Result<JobReport, Error>
where
    F: FnMut(u8) + Send,
{
    let started_at = Utc::now();
    let status = wait_for_job(service, job_id, poll).await?;
    let reassembly = reassemble(service, job_id, status.page_count, on_progress).await?;

    Ok(JobReport::new(job_id, started_at, reassembly))
}

/// Race `job` against `cancel`. Cancellation drops the job future along with
/// everything it accumulated.
pub async fn with_cancel<T, J, C>(job_id: &str, job: J, cancel: C) -> Result<T, Error>
where
    J: Future<Output = Result<T, Error>>,
    C: Future<Output = ()>,
{
    tokio::select! {
        biased;
        _ = cancel => {
            log::info!("Job {} cancelled", job_id);
            Err(Error::Cancelled(job_id.to_string()))
        }
        result = job => result,
    }
}

pub async fn reassemble_with_cancel<F, C>(
    service: &dyn AnalysisService,
    job_id: &str,
    page_count: Option<u32>,
    on_progress: F,
    cancel: C,
) -> Result<Reassembly, Error>
where
    F: FnMut(u8) + Send,
    C: Future<Output = ()>,
{
    let job = reassemble(service, job_id, page_count, on_progress);
    with_cancel(job_id, job, cancel).await
}

/// Run independent jobs concurrently, one task each. Results come back in
/// the order of `job_ids`.
pub async fn reassemble_many(
    service: Arc<dyn AnalysisService>,
    job_ids: Vec<String>,
    poll: PollConfig,
) -> Vec<(String, Result<JobReport, Error>)> {
    let handles: Vec<_> = job_ids
        .iter()
        .cloned()
        .map(|job_id| {
            let service = Arc::clone(&service);
            tokio::spawn(async move { run_job(service.as_ref(), &job_id, poll, |_| {}).await })
        })
        .collect();

    job_ids
        .into_iter()
        .zip(join_all(handles).await)
        .map(|(job_id, joined)| {
            let result = joined.map_err(Error::from).and_then(|result| result);
            (job_id, result)
        })
        .collect()
}
