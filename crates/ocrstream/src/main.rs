use crate::prelude::{eprintln, *};
use clap::Parser;

mod config;
mod error;
mod orchestrator;
mod prelude;
mod reassemble;
mod service;
mod status;

#[derive(Debug, clap::Parser)]
#[command(
    author,
    version,
    about,
    long_about = "Reassemble pages, tables and form fields from paginated document analysis results"
)]
pub struct App {
    #[command(subcommand)]
    pub command: SubCommands,

    #[clap(flatten)]
    global: Global,
}

#[derive(Debug, Clone, clap::Args)]
pub struct Global {
    /// Analysis service base URL (overrides OCR_BASE_URL)
    #[clap(long, global = true)]
    base_url: Option<String>,

    /// Analysis service API token (overrides OCR_API_TOKEN)
    #[clap(long, global = true)]
    api_token: Option<String>,

    /// Milliseconds between job status checks
    #[clap(
        long,
        env = "OCR_POLL_INTERVAL_MS",
        global = true,
        default_value = "5000"
    )]
    poll_interval_ms: u64,

    /// Status checks before giving up on a job
    #[clap(
        long,
        env = "OCR_POLL_MAX_ATTEMPTS",
        global = true,
        default_value = "120"
    )]
    poll_max_attempts: u32,

    /// Whether to display additional information.
    #[clap(long, env = "OCRSTREAM_VERBOSE", global = true, default_value = "false")]
    verbose: bool,
}

impl Global {
    fn poll_config(&self) -> Result<config::PollConfig, Error> {
        config::PollConfig::new(
            std::time::Duration::from_millis(self.poll_interval_ms),
            self.poll_max_attempts,
        )
    }

    fn http_service(&self) -> Result<service::HttpAnalysisService, Error> {
        let config =
            config::ServiceConfig::resolve(self.base_url.clone(), self.api_token.clone())?;
        if self.verbose {
            eprintln!("Analysis service: {}", config.base_url);
        }
        service::HttpAnalysisService::new(&config)
    }
}

#[derive(Debug, clap::Parser)]
pub enum SubCommands {
    /// Reassemble the results of one or more analysis jobs
    Reassemble(crate::reassemble::ReassembleOptions),

    /// Show the status of an analysis job
    Status(crate::status::StatusOptions),
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    color_eyre::install()?;

    let app = App::parse();

    match app.command {
        SubCommands::Reassemble(options) => crate::reassemble::run(options, app.global).await,
        SubCommands::Status(options) => crate::status::run(options, app.global).await,
    }
    .map_err(|err: color_eyre::eyre::Report| eyre!(err))
}
