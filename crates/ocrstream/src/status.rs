use crate::prelude::{println, *};
use crate::service::{AnalysisService, JobState};
use colored::Colorize;

#[derive(Debug, clap::Args, Clone)]
pub struct StatusOptions {
    /// Analysis job id
    #[arg(value_name = "JOB_ID")]
    pub job_id: String,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn run(options: StatusOptions, global: crate::Global) -> Result<()> {
    let service = global.http_service()?;
    let status = service.poll_status(&options.job_id).await?;

    if options.json {
        let json_output = serde_json::to_string_pretty(&status)
            .map_err(|e| eyre!("Failed to serialize output: {}", e))?;
        println!("{}", json_output);
        return Ok(());
    }

    let state = match status.state {
        JobState::InProgress => status.state.to_string().bright_yellow(),
        JobState::Succeeded => status.state.to_string().bright_green(),
        JobState::Failed => status.state.to_string().bright_red(),
    };
    println!("{} {}", options.job_id.bold(), state);

    if let Some(pages) = status.page_count {
        println!("Pages: {}", pages);
    }
    if let Some(message) = &status.message {
        println!("{}", message.dimmed());
    }

    Ok(())
}
