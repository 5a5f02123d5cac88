//! Dimensional data pipeline - reset, load, transform and merge the warehouse

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::Parser;
use dimensional_pipeline::logging::{LogContext, LogSettings};
use dimensional_pipeline::pipeline::config::PipelineConfig;
use dimensional_pipeline::pipeline::flow::{DimensionalDataFlow, WarehouseTasks};
use dimensional_pipeline::pipeline::{DateRange, PipelineStatus};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "dimensional-pipeline", about = "Run the dimensional data pipeline")]
struct Cli {
    /// First order date to merge into the fact table (YYYY-MM-DD)
    #[arg(long = "start_date", value_parser = DateRange::parse_bound, requires = "end_date")]
    start_date: Option<NaiveDate>,

    /// Last order date to merge into the fact table, inclusive (YYYY-MM-DD)
    #[arg(long = "end_date", value_parser = DateRange::parse_bound, requires = "start_date")]
    end_date: Option<NaiveDate>,

    /// Configuration file
    #[arg(long, env = "PIPELINE_CONFIG", default_value = "pipeline.toml")]
    config: PathBuf,

    /// Workbook to load instead of the configured one
    #[arg(long)]
    workbook: Option<PathBuf>,

    /// Log to the file only
    #[arg(long)]
    no_console: bool,
}

impl Cli {
    fn range(&self) -> Option<DateRange> {
        self.start_date
            .zip(self.end_date)
            .map(|(start, end)| DateRange::new(start, end))
    }
}

fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Configuration errors are fatal before any database work
    let config = match PipelineConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            let _log = LogContext::init(&LogSettings::console_only());
            error!("Pipeline execution failed: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match run(cli, config) {
        Ok(status) if status.is_success() => ExitCode::SUCCESS,
        Ok(_) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("Pipeline execution failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli, config: PipelineConfig) -> Result<PipelineStatus> {
    let settings = LogSettings {
        file: Some(config.settings.log_file.clone()),
        console: config.settings.console_log && !cli.no_console,
        level: config.settings.level_filter()?,
    };
    let _log = LogContext::init(&settings)
        .with_context(|| format!("Failed to open log file {:?}", settings.file))?;

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to start runtime")?;

    let range = cli.range();
    match range {
        Some(range) => info!("Starting pipeline execution from {} to {}", range.start, range.end),
        None => info!("Starting pipeline execution without a fact date range"),
    }

    let flow = DimensionalDataFlow::new(config.settings.flow_policy);
    let mut tasks = WarehouseTasks::new(config, range);
    if let Some(workbook) = cli.workbook {
        tasks = tasks.with_workbook(workbook);
    }

    let status = runtime.block_on(flow.exec(&tasks));

    let summary = serde_json::to_string(&status)?;
    if status.is_success() {
        info!("Final pipeline status: {}", summary);
    } else {
        if let Some((step, step_status)) = status.first_failure() {
            error!(
                "Pipeline failed at {}: {}",
                step,
                step_status.error.as_deref().unwrap_or("unknown error")
            );
        }
        error!("Final pipeline status: {}", summary);
    }

    Ok(status)
}
