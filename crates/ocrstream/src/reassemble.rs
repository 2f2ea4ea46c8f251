use std::path::PathBuf;
use std::sync::Arc;

use crate::orchestrator::{
    reassemble_many, reassemble_with_cancel, wait_for_job, with_cancel, JobReport,
};
use crate::prelude::{eprintln, println, *};
use crate::service::{AnalysisService, FixtureService};
use chrono::Utc;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Debug, clap::Args, Clone)]
#[command(group(
    clap::ArgGroup::new("source")
        .required(true)
        .args(["job_ids", "document", "fixture"])
))]
pub struct ReassembleOptions {
    /// Existing analysis job id (repeat to reassemble several jobs concurrently)
    #[arg(long = "job-id", value_name = "ID")]
    pub job_ids: Vec<String>,

    /// Document reference to start a new analysis job for
    #[arg(long, value_name = "REF")]
    pub document: Option<String>,

    /// Directory of recorded result pages (page-0001.json, ...) to replay
    #[arg(long, value_name = "DIR")]
    pub fixture: Option<PathBuf>,

    /// Output as JSON
    #[arg(long)]
    pub json: bool,

    /// Fail when any table or key-value pair could not be resolved
    #[arg(long)]
    pub strict: bool,
}

pub async fn run(options: ReassembleOptions, global: crate::Global) -> Result<()> {
    let poll = global.poll_config()?;

    let (service, job_ids): (Arc<dyn AnalysisService>, Vec<String>) = match &options.fixture {
        Some(dir) => {
            let fixture = FixtureService::open(dir).await?;
            let job_id = fixture.job_id().to_string();
            (Arc::new(fixture), vec![job_id])
        }
        None => {
            let http = global.http_service()?;
            let job_ids = match &options.document {
                Some(document) => vec![http.start_job(document).await?],
                None => options.job_ids.clone(),
            };
            (Arc::new(http), job_ids)
        }
    };

    if global.verbose {
        eprintln!("Reassembling {}", job_ids.join(", "));
    }

    let (reports, failed) = if job_ids.len() == 1 {
        let report = run_single(service.as_ref(), &job_ids[0], poll).await?;
        (vec![report], Vec::new())
    } else {
        split_outcomes(reassemble_many(service, job_ids, poll).await)
    };

    if options.json {
        let json_output = serde_json::to_string_pretty(&reports)
            .map_err(|e| eyre!("Failed to serialize output: {}", e))?;
        println!("{}", json_output);
    } else {
        for report in &reports {
            output_formatted(report);
        }
    }

    ensure_all_succeeded(&failed)?;

    if options.strict {
        if let Some(report) = reports.iter().find(|r| !r.reassembly.is_clean()) {
            return Err(Error::Integrity {
                job_id: report.job_id.clone(),
                faults: report.reassembly.faults.clone(),
            }
            .into());
        }
    }

    Ok(())
}

/// Reports of the jobs that succeeded and ids of those that did not. Each
/// failure is printed as it is found.
fn split_outcomes(
    outcomes: Vec<(String, Result<JobReport, Error>)>,
) -> (Vec<JobReport>, Vec<String>) {
    let mut reports = Vec::new();
    let mut failed = Vec::new();
    for (job_id, result) in outcomes {
        match result {
            Ok(report) => reports.push(report),
            Err(err) => {
                eprintln!("{} {}: {}", "Job failed".bright_red(), job_id, err);
                failed.push(job_id);
            }
        }
    }
    (reports, failed)
}

fn ensure_all_succeeded(failed: &[String]) -> Result<()> {
    if failed.is_empty() {
        return Ok(());
    }
    Err(eyre!("{} job(s) failed: {}", failed.len(), failed.join(", ")))
}

/// Resolves on Ctrl-C; never, if the signal cannot be installed.
async fn interrupted() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

/// One job with a progress bar, cancelled by Ctrl-C.
async fn run_single(
    service: &dyn AnalysisService,
    job_id: &str,
    poll: crate::config::PollConfig,
) -> Result<JobReport, Error> {
    let started_at = Utc::now();

    let bar = ProgressBar::new(100);
    bar.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.cyan} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar()),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(100));

    bar.set_message(format!("Waiting for job {job_id}..."));
    let waited = with_cancel(job_id, wait_for_job(service, job_id, poll), interrupted()).await;
    let status = match waited {
        Ok(status) => status,
        Err(err) => {
            bar.finish_and_clear();
            return Err(err);
        }
    };

    bar.set_message(format!("Reading results of {job_id}..."));
    let result = reassemble_with_cancel(
        service,
        job_id,
        status.page_count,
        |percent| bar.set_position(u64::from(percent)),
        interrupted(),
    )
    .await;
    bar.finish_and_clear();

    Ok(JobReport::new(job_id, started_at, result?))
}

fn output_formatted(report: &JobReport) {
    let result = &report.reassembly;

    println!(
        "\nJob {}: {} page(s), {} table(s), {} key-value pair(s) in {}s\n",
        report.job_id.bold(),
        result.page_count().to_string().bold(),
        result.table_count().to_string().bold(),
        result.pair_count().to_string().bold(),
        (report.finished_at - report.started_at).num_seconds()
    );

    let mut table = crate::prelude::new_table();
    table.add_row(prettytable::row![
        "Page".bold().cyan(),
        "Lines".bold().cyan(),
        "Tables".bold().cyan(),
        "Key-value pairs".bold().cyan()
    ]);

    for index in 0..result.page_count() {
        let lines = result.text_pages.get(index).map_or(0, |blocks| {
            blocks
                .iter()
                .filter(|b| b.kind == ocrstream_core::BlockKind::Line)
                .count()
        });
        let tables = result.tables.get(index).map_or(0, Vec::len);
        let pairs = result.key_value_pairs.get(index).map_or(0, Vec::len);

        table.add_row(prettytable::row![
            (index + 1).to_string().bright_yellow(),
            lines,
            tables,
            pairs
        ]);
    }

    table.printstd();

    if !result.is_clean() {
        eprintln!();
        eprintln!(
            "{}",
            format!("{} integrity fault(s):", result.faults.len()).yellow()
        );
        for fault in &result.faults {
            eprintln!("  {}", fault.to_string().yellow());
        }
    }
}
