use ocrstream_core::{IntegrityFault, StreamError};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// The job reported FAILED, or the service answered with a non-success status.
    #[error("Analysis service failure: {0}")]
    SourceFailure(String),

    #[error("Job {job_id} did not finish after {attempts} status checks")]
    PollTimeout { job_id: String, attempts: u32 },

    #[error("Job {0} was cancelled")]
    Cancelled(String),

    #[error("Transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Malformed service response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error("Job {job_id} finished with {} integrity fault(s)", faults.len())]
    Integrity {
        job_id: String,
        faults: Vec<IntegrityFault>,
    },

    #[error("Job task failed: {0}")]
    Task(#[from] tokio::task::JoinError),

    #[error("Fixture error: {0}")]
    Fixture(String),

    #[error("Configuration error: {0}")]
    Config(String),
}
