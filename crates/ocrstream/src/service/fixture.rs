//! Recorded results replayed from disk.
//!
//! A fixture directory holds one service response per file, named
//! `page-0001.json`, `page-0002.json`, ... in pagination order. Recorded
//! continuation tokens are ignored: the replay hands out its own tokens
//! and ends after the last file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use ocrstream_core::ResultsPage;

use super::{AnalysisService, JobState, JobStatus};
use crate::prelude::*;

const PREFIX: &str = "page-";
const EXTENSION: &str = "json";

#[derive(Debug, Clone)]
pub struct FixtureService {
    job_id: String,
    pages: Vec<PathBuf>,
}

impl FixtureService {
    pub async fn open(dir: impl AsRef<Path>) -> Result<Self, Error> {
        let dir = dir.as_ref();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| Error::Fixture(format!("Failed to read {}: {e}", dir.display())))?;

        let mut pages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Fixture(format!("Failed to read {}: {e}", dir.display())))?
        {
            let path = entry.path();
            if is_page_file(&path) {
                pages.push(path);
            }
        }

        if pages.is_empty() {
            return Err(Error::Fixture(format!(
                "No {PREFIX}*.{EXTENSION} files in {}",
                dir.display()
            )));
        }
        pages.sort();

        let name = dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| dir.display().to_string());
        log::debug!("Fixture {} with {} result pages", name, pages.len());

        Ok(Self {
            job_id: format!("fixture:{name}"),
            pages,
        })
    }

    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    fn check_job(&self, job_id: &str) -> Result<(), Error> {
        if job_id == self.job_id {
            Ok(())
        } else {
            Err(Error::Fixture(format!(
                "Unknown job {job_id}, this fixture replays {}",
                self.job_id
            )))
        }
    }
}

fn is_page_file(path: &Path) -> bool {
    let stem_matches = path
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|s| s.starts_with(PREFIX));
    let extension_matches = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e == EXTENSION);

    path.is_file() && stem_matches && extension_matches
}

#[async_trait]
impl AnalysisService for FixtureService {
    async fn start_job(&self, _document: &str) -> Result<String, Error> {
        Ok(self.job_id.clone())
    }

    async fn poll_status(&self, job_id: &str) -> Result<JobStatus, Error> {
        self.check_job(job_id)?;
        Ok(JobStatus::new(JobState::Succeeded))
    }

    async fn get_results(
        &self,
        job_id: &str,
        next_token: Option<&str>,
    ) -> Result<ResultsPage, Error> {
        self.check_job(job_id)?;

        let index = match next_token {
            None => 0,
            Some(token) => token
                .parse::<usize>()
                .map_err(|_| Error::Fixture(format!("Invalid continuation token {token}")))?,
        };
        let path = self
            .pages
            .get(index)
            .ok_or_else(|| Error::Fixture(format!("No result page {index}")))?;

        let body = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| Error::Fixture(format!("Failed to read {}: {e}", path.display())))?;
        let mut page = ResultsPage::from_json(&body)?;

        page.next_token = (index + 1 < self.pages.len()).then(|| (index + 1).to_string());
        Ok(page)
    }
}
