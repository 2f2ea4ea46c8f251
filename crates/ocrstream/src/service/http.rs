use async_trait::async_trait;
use ocrstream_core::ResultsPage;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};

use super::{AnalysisService, JobState, JobStatus};
use crate::config::ServiceConfig;
use crate::prelude::*;

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StartJobRequest<'a> {
    document_location: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StartJobResponse {
    job_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StatusResponse {
    job_status: JobState,
    #[serde(default)]
    status_message: Option<String>,
    #[serde(default)]
    document_metadata: Option<DocumentMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DocumentMetadata {
    pages: Option<u32>,
}

impl From<StatusResponse> for JobStatus {
    fn from(response: StatusResponse) -> Self {
        let mut status = JobStatus::new(response.job_status);
        if let Some(pages) = response.document_metadata.and_then(|m| m.pages) {
            status = status.with_page_count(pages);
        }
        if let Some(message) = response.status_message {
            status = status.with_message(message);
        }
        status
    }
}

/// Analysis service reached over its JSON HTTP API.
#[derive(Debug, Clone)]
pub struct HttpAnalysisService {
    client: reqwest::Client,
    base_url: String,
}

impl HttpAnalysisService {
    pub fn new(config: &ServiceConfig) -> Result<Self, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = &config.api_token {
            headers.insert(
                AUTHORIZATION,
                HeaderValue::from_str(&format!("Bearer {token}"))
                    .map_err(|e| Error::Config(format!("Invalid API token: {e}")))?,
            );
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    fn job_url(&self, job_id: &str) -> String {
        format!("{}/jobs/{}", self.base_url, job_id)
    }

    /// Send the request and return the body of a successful response.
    async fn send(&self, request: reqwest::RequestBuilder, what: &str) -> Result<String, Error> {
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::SourceFailure(format!(
                "Failed to {what} [{status}]: {body}"
            )));
        }

        Ok(response.text().await?)
    }
}

#[async_trait]
impl AnalysisService for HttpAnalysisService {
    async fn start_job(&self, document: &str) -> Result<String, Error> {
        let request = self
            .client
            .post(format!("{}/jobs", self.base_url))
            .json(&StartJobRequest {
                document_location: document,
            });

        let body = self.send(request, "start analysis job").await?;
        let response: StartJobResponse = serde_json::from_str(&body)?;
        log::info!("Started job {} for {}", response.job_id, document);

        Ok(response.job_id)
    }

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, Error> {
        let request = self.client.get(self.job_url(job_id));
        let body = self
            .send(request, &format!("fetch status of job {job_id}"))
            .await?;
        let response: StatusResponse = serde_json::from_str(&body)?;

        Ok(response.into())
    }

    async fn get_results(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultsPage, Error> {
        let mut request = self
            .client
            .get(format!("{}/results", self.job_url(job_id)));
        if let Some(token) = next_token {
            request = request.query(&[("nextToken", token)]);
        }

        let body = self
            .send(request, &format!("fetch results of job {job_id}"))
            .await?;

        Ok(ResultsPage::from_json(&body)?)
    }
}
