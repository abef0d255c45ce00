//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, WrapErr, eyre};
use extractflow_artifacts::FlowAllocator;
use extractflow_core::stages::{
    EXTRACTION_CODE_FILE, EXTRACTION_SCHEMA_FILE, MARKDOWN_CONVERTER_FILE,
};
use extractflow_core::{PipelineObserver, PipelineReport, StageOutcome, run_pipeline};
use extractflow_shared::{
    AppConfig, CheckpointStatus, LlmCredentials, RunOptions, StageId, init_config, load_config,
    locate_config,
};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// extractflow: turn a batch of HTML pages into a validated extractor.
#[derive(Parser)]
#[command(
    name = "extractflow",
    version,
    about = "Resumable AI pipeline that learns how to extract content from a batch of HTML pages.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file (defaults to ./extractflow.toml, then ~/.extractflow/extractflow.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Run the pipeline over an input batch, resuming from earlier checkpoints.
    Run {
        /// Input batch directory (HTML files, an html/ subdirectory, or urls.txt).
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output root holding the flow slots.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Batch the validated extractor runs over instead of the input batch.
        #[arg(long)]
        spread: Option<PathBuf>,

        /// Skip the visual analysis stage.
        #[arg(long)]
        no_visual: bool,

        /// Skip the Markdown conversion stage.
        #[arg(long)]
        no_markdown: bool,

        /// Ignore existing checkpoints and start a fresh set of slots.
        #[arg(long)]
        no_resume: bool,
    },

    /// Show the checkpoint of every flow slot under the output root.
    Status {
        /// Output root to inspect.
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Print the slots as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Write a config file with defaults.
    Init {
        /// Overwrite an existing file.
        #[arg(long)]
        force: bool,
    },
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "extractflow=info",
        1 => "extractflow=debug",
        _ => "extractflow=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.as_deref();
    match cli.command {
        Command::Run {
            input,
            output_dir,
            spread,
            no_visual,
            no_markdown,
            no_resume,
        } => {
            let config = load_config(config_path)?;
            let mut options = RunOptions::from(&config);
            if let Some(dir) = input {
                options.input_dir = dir;
            }
            if let Some(dir) = output_dir {
                options.output_dir = dir;
            }
            if spread.is_some() {
                options.spread_dir = spread;
            }
            options.visual &= !no_visual;
            options.markdown &= !no_markdown;
            options.resume &= !no_resume;
            cmd_run(&config, &options).await
        }
        Command::Status { output_dir, json } => {
            let config = load_config(config_path)?;
            let root = output_dir.unwrap_or_else(|| PathBuf::from(&config.paths.output_dir));
            cmd_status(&root, json)
        }
        Command::Config { action } => match action {
            ConfigAction::Init { force } => cmd_config_init(config_path, force),
            ConfigAction::Show => cmd_config_show(config_path),
        },
    }
}

// ---------------------------------------------------------------------------
// Command handlers
// ---------------------------------------------------------------------------

async fn cmd_run(config: &AppConfig, options: &RunOptions) -> Result<()> {
    // Keys are read here and nowhere else.
    let credentials = LlmCredentials::from_env(&config.llm)?;

    if options.visual != config.pipeline.visual && config.visual.renderer.trim().is_empty() {
        warn!("no renderer configured, visual analysis is disabled");
    }
    info!(
        input = %options.input_dir.display(),
        output = %options.output_dir.display(),
        visual = options.visual,
        markdown = options.markdown,
        resume = options.resume,
        "running extraction pipeline"
    );

    let observer = CliObserver::new();
    let result = run_pipeline(config, options, &credentials, &observer).await;
    observer.finish();

    let report = result.wrap_err("pipeline run failed")?;
    print_summary(&report);
    Ok(())
}

fn print_summary(report: &PipelineReport) {
    for (stage, file) in [
        (StageId::Schema, EXTRACTION_SCHEMA_FILE),
        (StageId::CodeValidated, EXTRACTION_CODE_FILE),
        (StageId::MarkdownConverted, MARKDOWN_CONVERTER_FILE),
    ] {
        if let Some(path) = report.slot_dir(stage).map(|d| d.join(file)).filter(|p| p.is_file()) {
            info!(stage = %stage, path = %path.display(), "artifact");
        }
    }

    println!();
    println!("  Run {} finished.", report.run_id);
    for entry in &report.stages {
        let slot = entry
            .outcome
            .slot()
            .map(|s| format!("flow{s}"))
            .unwrap_or_else(|| "-".into());
        println!(
            "  {:<20} {:<9} {slot}",
            entry.stage.as_str(),
            entry.outcome.label()
        );
    }
    if let Some(extraction) = &report.outputs.extraction {
        println!(
            "  Extracted: {}/{} files → {}",
            extraction.processed_files,
            extraction.total_files,
            extraction.results_dir.display()
        );
    }
    if let Some(conversion) = &report.outputs.conversion {
        println!(
            "  Markdown:  {} files → {}",
            conversion.converted_files,
            conversion.output_dir.display()
        );
    }
    println!();
}

fn cmd_status(root: &Path, json: bool) -> Result<()> {
    let entries = FlowAllocator::new(root).scan();

    if json {
        let slots: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                serde_json::json!({
                    "flow_id": e.slot.id,
                    "dir": e.slot.dir,
                    "checkpoint": e.checkpoint,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&slots)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!("No flow slots under {}", root.display());
        return Ok(());
    }

    println!("  {:<8} {:<12} {:<20} {:<20} Updated", "Slot", "Status", "Step", "Attempted");
    for entry in &entries {
        let name = format!("flow{}", entry.slot.id);
        let Some(checkpoint) = &entry.checkpoint else {
            println!("  {name:<8} {:<12}", "empty");
            continue;
        };
        let status = match checkpoint.status {
            CheckpointStatus::Completed => "completed",
            CheckpointStatus::Failed => "failed",
            CheckpointStatus::InProgress => "in_progress",
        };
        let step = checkpoint.step.map_or("-", |s| s.as_str());
        let attempted = checkpoint.attempted.map_or("-", |s| s.as_str());
        println!(
            "  {name:<8} {status:<12} {step:<20} {attempted:<20} {}",
            checkpoint.timestamp.format("%Y-%m-%d %H:%M:%S")
        );
        if let Some(error) = &checkpoint.error {
            println!("           error: {error}");
        }
    }
    Ok(())
}

fn cmd_config_init(path: Option<&Path>, force: bool) -> Result<()> {
    let target = match path {
        Some(p) => p.to_path_buf(),
        None => extractflow_shared::config_file_path()?,
    };
    if target.exists() && !force {
        return Err(eyre!(
            "{} already exists, pass --force to overwrite it",
            target.display()
        ));
    }
    let path = init_config(Some(&target))?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(path: Option<&Path>) -> Result<()> {
    match path.map(Path::to_path_buf).or_else(locate_config) {
        Some(p) => println!("# {}", p.display()),
        None => println!("# defaults (no config file found)"),
    }
    let config: AppConfig = load_config(path)?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}

// ---------------------------------------------------------------------------
// CLI progress observer
// ---------------------------------------------------------------------------

/// Stage progress on an indicatif spinner.
struct CliObserver {
    spinner: ProgressBar,
}

impl CliObserver {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::with_template("{spinner:.cyan} {msg}") {
            spinner.set_style(
                style.tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
            );
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self { spinner }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn stage_started(&self, stage: StageId, slot: u32) {
        self.spinner.set_message(format!("{stage} (flow{slot})"));
    }

    fn stage_finished(&self, stage: StageId, outcome: &StageOutcome) {
        let line = match outcome {
            StageOutcome::Gap { error, .. } => format!("  {stage}: skipped after failure ({error})"),
            StageOutcome::Failed { slot, error } => format!("  {stage}: failed in flow{slot} ({error})"),
            other => format!("  {stage}: {}", other.label()),
        };
        self.spinner.println(line);
    }
}
