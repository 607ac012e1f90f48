use anyhow::{Context, Result};
use clap::Parser;
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use webassess_ai::{LogPullObserver, PullObserver};
use webassess_cli::{init_logging, write_report, OutputFormat, PullProgress, UrlAssessor};
use webassess_core::{ConfigManager, UrlReport, WebAssessConfig};

#[derive(Parser)]
#[command(name = "assess-url")]
#[command(
    about = "Assess a web resource for vulnerabilities and exposed sensitive data with a local model",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// URL target to assess
    #[arg(short, long)]
    target: String,

    /// Inference runtime URL; when unset a local runtime is found or started
    #[arg(short = 'u', long)]
    runtime_url: Option<String>,

    /// Model and version to use for the assessment
    #[arg(short, long)]
    model: Option<String>,

    /// Allow downloading the model if it is not already available
    #[arg(short = 'd', long)]
    allow_download: bool,

    /// Output format
    #[arg(short, long, value_enum, default_value = "signal")]
    output: OutputFormat,

    /// Path to output file; stdout when unset
    #[arg(short = 'f', long)]
    output_file: Option<PathBuf>,

    /// Suppress progress and log output
    #[arg(short, long)]
    quiet: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

impl Cli {
    fn apply_overrides(&self, config: &mut WebAssessConfig) {
        if let Some(url) = &self.runtime_url {
            config.runtime.url = Some(url.clone());
        }
        if let Some(model) = &self.model {
            config.model.name = model.clone();
        }
        if self.allow_download {
            config.model.allow_download = true;
        }
    }
}

/// Report for a run that stopped before the assessment could start.
fn setup_failure_report(target: &str, error: &anyhow::Error) -> UrlReport {
    let mut report = UrlReport::new(target);
    report.fail(format!("{:#}", error));
    report.complete();
    report
}

fn load_config(cli: &Cli) -> Result<WebAssessConfig> {
    let mut manager =
        ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    cli.apply_overrides(manager.config_mut());
    ConfigManager::validate_config(manager.config()).context("Invalid configuration")?;
    Ok(manager.into_config())
}

fn finish(cli: &Cli, report: &UrlReport) -> Result<()> {
    write_report(report, cli.output, cli.output_file.as_deref())?;

    if !report.is_success() {
        if !cli.quiet {
            for error in &report.errors {
                eprintln!("{} {}", "✗".red(), error);
            }
        }
        std::process::exit(1);
    }

    if !cli.quiet {
        if let Some(path) = &cli.output_file {
            eprintln!("{} Report written to {}", "✓".green(), path.display());
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let logging = init_logging(cli.verbose, cli.quiet);

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => return finish(&cli, &setup_failure_report(&cli.target, &e)),
    };
    logging.apply_configured_level(&config.logging.level);

    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling assessment");
            interrupt.cancel();
        }
    });

    let progress = (!cli.quiet).then(|| Arc::new(PullProgress::new()));
    let observer: Arc<dyn PullObserver> = match &progress {
        Some(progress) => progress.clone(),
        None => Arc::new(LogPullObserver),
    };

    let report = match UrlAssessor::new(&config, observer, cancel.clone())
        .context("Failed to initialize assessment")
    {
        Ok(assessor) => assessor.assess(&cli.target).await,
        Err(e) => setup_failure_report(&cli.target, &e),
    };

    if let Some(progress) = &progress {
        progress.finish();
    }

    finish(&cli, &report)
}
