//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use kwresearch_core::{ProgressReporter, ResearchOptions, run_research};
use kwresearch_providers::build_providers;
use kwresearch_shared::{
    AppConfig, KeywordOutcome, PipelineState, ResearchSessionResult, init_config, load_config,
    validate_api_key,
};
use tracing::info;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// kwresearch: research many keywords at once.
#[derive(Parser)]
#[command(
    name = "kwresearch",
    version,
    about = "Search, fetch and analyze web content for many keywords concurrently.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Result output format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Research one or more keywords against an objective.
    Research(ResearchArgs),

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(clap::Args)]
pub(crate) struct ResearchArgs {
    /// Keywords to research.
    #[arg(required = true)]
    pub keywords: Vec<String>,

    /// What the analysis should focus on.
    #[arg(short, long)]
    pub objective: String,

    /// Maximum keywords processed at the same time.
    #[arg(short, long)]
    pub concurrency: Option<usize>,

    /// Per-keyword timeout in seconds.
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Search results requested per keyword.
    #[arg(long)]
    pub max_results: Option<usize>,

    /// Relevance at or above which a report counts as high quality.
    #[arg(long)]
    pub quality_threshold: Option<f64>,

    /// Stop dispatching new keywords after this many seconds.
    #[arg(long)]
    pub deadline: Option<u64>,

    /// Output format for the result.
    #[arg(short, long, default_value = "text")]
    pub format: OutputFormat,

    /// Also write the JSON result to this file.
    #[arg(long)]
    pub out: Option<PathBuf>,
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr so stdout stays
/// clean for results.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "kwresearch=info",
        1 => "kwresearch=debug",
        _ => "kwresearch=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(false)
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
    match cli.command {
        Command::Research(args) => cmd_research(args).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

// ---------------------------------------------------------------------------
// research
// ---------------------------------------------------------------------------

async fn cmd_research(args: ResearchArgs) -> Result<()> {
    // Validate API key before doing anything
    let config = load_config()?;
    let api_key = validate_api_key(&config)?;

    let options = research_options(&config, &args)?;
    let providers = build_providers(&config, api_key)?;

    info!(
        keywords = args.keywords.len(),
        concurrency = options.max_concurrency,
        model = %config.openrouter.default_model,
        "starting research"
    );

    let reporter = Arc::new(CliProgress::new(args.format == OutputFormat::Text));
    let result = run_research(
        &args.keywords,
        &args.objective,
        &options,
        &providers,
        reporter,
    )
    .await;

    if let Some(path) = &args.out {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json).map_err(|e| eyre!("cannot write {}: {e}", path.display()))?;
        info!(path = %path.display(), "result written");
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&result)?),
        OutputFormat::Text => print_summary(&result),
    }

    if result.all_failed() {
        return Err(eyre!(
            "all {} keyword(s) failed",
            result.summary.coverage.total_keywords
        ));
    }
    Ok(())
}

/// Config defaults overridden by command-line flags.
fn research_options(config: &AppConfig, args: &ResearchArgs) -> Result<ResearchOptions> {
    let mut options = ResearchOptions::from(config);

    if let Some(concurrency) = args.concurrency {
        if concurrency == 0 {
            return Err(eyre!("--concurrency must be at least 1"));
        }
        options.max_concurrency = concurrency;
    }
    if let Some(secs) = args.timeout {
        options.per_keyword_timeout = Duration::from_secs(secs);
    }
    if let Some(max_results) = args.max_results {
        options.max_results_per_keyword = max_results;
    }
    if let Some(threshold) = args.quality_threshold {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(eyre!("--quality-threshold must be between 0 and 1"));
        }
        options.quality_threshold = threshold;
    }
    if let Some(secs) = args.deadline {
        options.overall_deadline = Some(Duration::from_secs(secs));
    }
    Ok(options)
}

fn print_summary(result: &ResearchSessionResult) {
    let summary = &result.summary;
    let elapsed = (result.completed_at - result.started_at).num_milliseconds() as f64 / 1000.0;

    println!();
    println!("  {}", summary.overall_summary);
    println!(
        "  Session: {}  High quality: {}  Time: {elapsed:.1}s",
        result.session_id, summary.coverage.high_quality_count
    );

    print_list("Key findings", &summary.key_findings);
    print_list("Technical insights", &summary.technical_insights);
    print_list("Recommendations", &summary.recommendations);

    if !result.reports.is_empty() {
        println!();
        println!("  Sources:");
        for report in &result.reports {
            println!(
                "    {:<24} {:.2}  {}",
                report.keyword, report.analysis.relevance_score, report.url
            );
        }
    }

    if !result.failures.is_empty() {
        println!();
        println!("  Failures:");
        for failure in &result.failures {
            println!(
                "    {:<24} {} ({}, {} attempt(s)): {}",
                failure.keyword,
                failure.stage,
                failure.error_kind,
                failure.attempts,
                failure.message
            );
        }
    }
    println!();
}

fn print_list(heading: &str, items: &[String]) {
    if items.is_empty() {
        return;
    }
    println!();
    println!("  {heading}:");
    for item in items {
        println!("    - {item}");
    }
}

// ---------------------------------------------------------------------------
// CLI progress reporter
// ---------------------------------------------------------------------------

/// CLI progress reporter using an indicatif spinner.
struct CliProgress {
    spinner: ProgressBar,
    total: AtomicUsize,
    finished: AtomicUsize,
}

impl CliProgress {
    fn new(visible: bool) -> Self {
        let spinner = if visible {
            ProgressBar::new_spinner()
        } else {
            ProgressBar::hidden()
        };
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(Duration::from_millis(80));
        Self {
            spinner,
            total: AtomicUsize::new(0),
            finished: AtomicUsize::new(0),
        }
    }

    fn counter(&self) -> String {
        format!(
            "[{}/{}]",
            self.finished.load(Ordering::Relaxed),
            self.total.load(Ordering::Relaxed)
        )
    }
}

impl ProgressReporter for CliProgress {
    fn session_started(&self, total_keywords: usize) {
        self.total.store(total_keywords, Ordering::Relaxed);
        self.spinner
            .set_message(format!("{} starting research", self.counter()));
    }

    fn state_changed(&self, _index: usize, keyword: &str, state: PipelineState) {
        let label = match state {
            PipelineState::Pending => return,
            PipelineState::Searching => "searching",
            PipelineState::Fetching => "fetching",
            PipelineState::Analyzing => "analyzing",
            PipelineState::Assembling => "assembling",
            PipelineState::Done | PipelineState::Failed => return,
        };
        self.spinner
            .set_message(format!("{} {label} \"{keyword}\"", self.counter()));
    }

    fn keyword_finished(&self, _index: usize, outcome: &KeywordOutcome) {
        self.finished.fetch_add(1, Ordering::Relaxed);
        let line = match outcome {
            KeywordOutcome::Success(report) => {
                format!("  ✓ {} ({:.2})", report.keyword, report.analysis.relevance_score)
            }
            KeywordOutcome::Failure(failure) => {
                format!("  ✗ {} ({} at {})", failure.keyword, failure.error_kind, failure.stage)
            }
        };
        self.spinner.println(line);
    }

    fn session_finished(&self, _result: &ResearchSessionResult) {
        self.spinner.finish_and_clear();
    }
}

// ---------------------------------------------------------------------------
// config
// ---------------------------------------------------------------------------

async fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

async fn cmd_config_show() -> Result<()> {
    let config: AppConfig = load_config()?;
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
