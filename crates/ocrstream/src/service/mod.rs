use async_trait::async_trait;
use ocrstream_core::ResultsPage;
use serde::{Deserialize, Serialize};

use crate::prelude::*;

pub mod fixture;
pub mod http;

pub use fixture::FixtureService;
pub use http::HttpAnalysisService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobState {
    InProgress,
    Succeeded,
    Failed,
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            JobState::InProgress => "IN_PROGRESS",
            JobState::Succeeded => "SUCCEEDED",
            JobState::Failed => "FAILED",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobStatus {
    pub state: JobState,
    /// Known once the service has looked at the document.
    pub page_count: Option<u32>,
    pub message: Option<String>,
}

impl JobStatus {
    pub fn new(state: JobState) -> Self {
        Self {
            state,
            page_count: None,
            message: None,
        }
    }

    pub fn with_page_count(mut self, page_count: u32) -> Self {
        self.page_count = Some(page_count);
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Asynchronous document analysis service.
///
/// A job is started once, polled until it reaches a terminal state, then its
/// results are read one page at a time by following continuation tokens.
#[async_trait]
pub trait AnalysisService: Send + Sync {
    /// Start analysing `document` and return the new job id.
    async fn start_job(&self, document: &str) -> Result<String, Error>;

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, Error>;

    /// Fetch one page of results. `next_token` is `None` on the first call.
    async fn get_results(&self, job_id: &str, next_token: Option<&str>)
        -> Result<ResultsPage, Error>;
}
