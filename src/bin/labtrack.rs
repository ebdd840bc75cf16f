//! CLI binary for labtrack-ingest.
//!
//! `labtrack ingest` runs one local PDF through the whole pipeline and prints
//! the classified biomarkers. `labtrack serve` exposes the same pipeline over
//! HTTP.

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use labtrack_ingest::server::{self, AppState};
use labtrack_ingest::{
    AnalysisMode, BiomarkerResult, BiomarkerStatus, FailurePolicy, FsObjectStore, Gateway,
    IngestConfig, InlineTrigger, MappingTable, Orchestrator, ProcessingObserver, ProviderSettings,
    Report, ReportStatus, SpawnTrigger, Stage, Stores, Upload,
};
use serde::Serialize;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

// ── Spinner observer ─────────────────────────────────────────────────────────

/// Renders the report's current stage as a spinner and prints one line per
/// committed status change.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("Uploading");
        bar.set_message("checking file…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }
}

impl ProcessingObserver for CliObserver {
    fn on_transition(&self, _report_id: &str, from: ReportStatus, to: ReportStatus) {
        self.bar
            .println(format!("  {} {} → {}", cyan("◆"), dim(from.as_str()), bold(to.as_str())));
    }

    fn on_stage(&self, _report_id: &str, stage: Stage) {
        self.bar.set_prefix("Processing");
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_completed(&self, _report_id: &str, count: usize) {
        self.bar.finish_and_clear();
        eprintln!("{} {} biomarkers extracted", green("✔"), bold(&count.to_string()));
    }

    fn on_failed(&self, _report_id: &str, error: &str) {
        self.bar.finish_and_clear();
        // Keep the line readable when a provider returns a long body.
        let msg: String = if error.chars().count() > 100 {
            format!("{}\u{2026}", error.chars().take(99).collect::<String>())
        } else {
            error.to_string()
        };
        eprintln!("{} {}", red("✘"), red(&msg));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Ingest a report with the default layout-analysis provider
  labtrack ingest bilan.pdf

  # Password-protected report, vision transcription
  labtrack ingest --password 0102 --mode vision bilan.pdf

  # Let the extraction model read the PDF directly, JSON output
  labtrack ingest --mode direct --json bilan.pdf > results.json

  # Custom biomarker mapping table
  labtrack ingest --mappings mappings.json bilan.pdf

  # HTTP server
  labtrack serve --addr 0.0.0.0:8080

ANALYSIS MODES:
  layout   Azure Document Intelligence job, polled until done (default)
  vision   Pages rendered with pdfium and transcribed by a vision LLM
  direct   The extraction model receives the PDF itself

ENVIRONMENT VARIABLES:
  AZURE_OCR_ENDPOINT            Document Intelligence endpoint (layout mode)
  AZURE_OCR_KEY                 Document Intelligence key (layout mode)
  AZURE_OPENAI_API_BASE         Azure OpenAI resource URL (extraction)
  AZURE_OPENAI_API_KEY          Azure OpenAI key (extraction)
  AZURE_OPENAI_DEPLOYMENT_NAME  Azure OpenAI deployment (extraction)
  MISTRAL_API_KEY               Mistral key (extraction fallback, vision)
  EDGEQUAKE_LLM_PROVIDER        Vision provider override
  EDGEQUAKE_MODEL               Vision model override
  RUST_LOG                      Log filter, overrides -v / -q
"#;

/// Ingest laboratory blood-test PDFs into classified biomarker records.
#[derive(Parser, Debug)]
#[command(
    name = "labtrack",
    version,
    about = "Ingest laboratory blood-test PDFs into classified biomarker records",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, global = true, env = "LABTRACK_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, global = true, env = "LABTRACK_QUIET")]
    quiet: bool,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run one local PDF through upload, analysis, extraction and normalization.
    Ingest(IngestArgs),
    /// Serve the upload, trigger and report endpoints over HTTP.
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct IngestArgs {
    /// Local PDF file.
    input: PathBuf,

    /// PDF user password for protected reports.
    #[arg(long, env = "LABTRACK_PASSWORD")]
    password: Option<String>,

    /// Owner the report is filed under.
    #[arg(long, env = "LABTRACK_OWNER", default_value = "local")]
    owner: String,

    /// Output structured JSON (report plus results) instead of a table.
    #[arg(long, env = "LABTRACK_JSON")]
    json: bool,

    /// Disable the spinner.
    #[arg(long, env = "LABTRACK_NO_PROGRESS")]
    no_progress: bool,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

#[derive(Args, Debug)]
struct ServeArgs {
    /// Address to listen on.
    #[arg(long, env = "LABTRACK_ADDR", default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    #[command(flatten)]
    pipeline: PipelineArgs,
}

/// Flags shared by both subcommands.
#[derive(Args, Debug)]
struct PipelineArgs {
    /// Where the text handed to the extractor comes from.
    #[arg(long, env = "LABTRACK_ANALYSIS_MODE", value_enum, default_value = "layout")]
    mode: ModeArg,

    /// Directory holding stored artifacts.
    #[arg(long, env = "LABTRACK_STORE_DIR", default_value = "labtrack-data")]
    store_dir: PathBuf,

    /// JSON file with biomarker mappings; replaces the built-in table.
    #[arg(long, env = "LABTRACK_MAPPINGS")]
    mappings: Option<PathBuf>,

    /// What happens to a report whose processing failed.
    #[arg(long, env = "LABTRACK_FAILURE_POLICY", value_enum, default_value = "mark-failed")]
    failure_policy: PolicyArg,

    /// Free-plan upload quota per account.
    #[arg(long, env = "LABTRACK_FREE_UPLOAD_LIMIT", default_value_t = 3)]
    free_upload_limit: u32,

    /// Vision model ID (vision mode).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// Vision provider: mistral, openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_PROVIDER")]
    provider: Option<String>,

    /// Rendering DPI for vision mode (72–400).
    #[arg(long, env = "LABTRACK_DPI", default_value_t = 150,
          value_parser = clap::value_parser!(u32).range(72..=400))]
    dpi: u32,

    /// Concurrent page transcriptions in vision mode.
    #[arg(short, long, env = "LABTRACK_CONCURRENCY", default_value_t = 4)]
    concurrency: usize,

    /// Retries per LLM call.
    #[arg(long, env = "LABTRACK_MAX_RETRIES", default_value_t = 3)]
    max_retries: u32,

    /// Delay between layout-job polls in milliseconds.
    #[arg(long, env = "LABTRACK_POLL_INTERVAL_MS", default_value_t = 2000)]
    poll_interval_ms: u64,

    /// Polls before a layout job is abandoned.
    #[arg(long, env = "LABTRACK_MAX_POLL_ATTEMPTS", default_value_t = 30)]
    max_poll_attempts: u32,

    /// Per-call provider timeout in seconds.
    #[arg(long, env = "LABTRACK_API_TIMEOUT", default_value_t = 60)]
    api_timeout: u64,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum ModeArg {
    Layout,
    Vision,
    Direct,
}

impl From<ModeArg> for AnalysisMode {
    fn from(v: ModeArg) -> Self {
        match v {
            ModeArg::Layout => AnalysisMode::Layout,
            ModeArg::Vision => AnalysisMode::Vision,
            ModeArg::Direct => AnalysisMode::Direct,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum PolicyArg {
    MarkFailed,
    Rollback,
}

impl From<PolicyArg> for FailurePolicy {
    fn from(v: PolicyArg) -> Self {
        match v {
            PolicyArg::MarkFailed => FailurePolicy::MarkFailed,
            PolicyArg::Rollback => FailurePolicy::Rollback,
        }
    }
}

/// `--json` output.
#[derive(Serialize)]
struct IngestReport<'a> {
    report: &'a Report,
    results: &'a [BiomarkerResult],
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // The spinner replaces INFO logs for a local ingest.
    let show_progress = match &cli.command {
        Command::Ingest(args) => !cli.quiet && !args.no_progress && !args.json,
        Command::Serve(_) => false,
    };
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    match cli.command {
        Command::Ingest(args) => run_ingest(args, show_progress, cli.quiet).await,
        Command::Serve(args) => run_serve(args).await,
    }
}

/// Map shared flags to `IngestConfig`.
fn build_config(args: &PipelineArgs) -> Result<IngestConfig> {
    let mut builder = IngestConfig::builder()
        .failure_policy(args.failure_policy.into())
        .free_upload_limit(args.free_upload_limit)
        .dpi(args.dpi)
        .concurrency(args.concurrency)
        .max_retries(args.max_retries)
        .poll_interval_ms(args.poll_interval_ms)
        .max_poll_attempts(args.max_poll_attempts)
        .api_timeout_secs(args.api_timeout);
    if let Some(model) = &args.model {
        builder = builder.model(model.clone());
    }
    if let Some(provider) = &args.provider {
        builder = builder.provider_name(provider.clone());
    }
    builder.build().context("Invalid configuration")
}

fn load_table(path: Option<&Path>) -> Result<MappingTable> {
    match path {
        Some(path) => MappingTable::from_json_file(path)
            .with_context(|| format!("Failed to load biomarker mappings from {path:?}")),
        None => Ok(MappingTable::builtin()),
    }
}

fn build_orchestrator(args: &PipelineArgs, stores: Stores, config: IngestConfig) -> Result<Orchestrator> {
    let table = load_table(args.mappings.as_deref())?;
    let orchestrator = Orchestrator::from_settings(
        args.mode.into(),
        &ProviderSettings::from_env(),
        stores,
        config,
    )
    .context("Failed to configure analysis providers")?;
    Ok(orchestrator.with_table(Arc::new(table)))
}

async fn run_ingest(args: IngestArgs, show_progress: bool, quiet: bool) -> Result<()> {
    let bytes = tokio::fs::read(&args.input)
        .await
        .with_context(|| format!("Failed to read {:?}", args.input))?;
    let file_name = args
        .input
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document.pdf".to_string());

    let config = build_config(&args.pipeline)?;
    let stores = Stores::in_memory(Arc::new(FsObjectStore::new(&args.pipeline.store_dir)));
    let mut orchestrator = build_orchestrator(&args.pipeline, stores.clone(), config.clone())?;

    let observer = show_progress.then(CliObserver::new);
    if let Some(observer) = &observer {
        orchestrator = orchestrator.with_observer(observer.clone() as Arc<dyn ProcessingObserver>);
    }

    // The gateway takes the password for its own decryption step; the
    // orchestrator then works on the decrypted artifact.
    let gateway = Gateway::new(
        stores.clone(),
        Arc::new(InlineTrigger::new(orchestrator)),
        config,
    );
    let upload = Upload {
        file_name,
        bytes,
        password: args.password.clone(),
    };
    let receipt = match gateway.upload(&args.owner, upload).await {
        Ok(receipt) => receipt,
        Err(e) => {
            if let Some(observer) = &observer {
                observer.bar.finish_and_clear();
            }
            return Err(e).context("Upload rejected");
        }
    };

    let report = stores
        .reports
        .get(&receipt.report_id)
        .await
        .context("Failed to read report")?;
    let results = stores
        .results
        .list_for_report(&report.id)
        .await
        .context("Failed to read results")?;

    if args.json {
        let json = serde_json::to_string_pretty(&IngestReport {
            report: &report,
            results: &results,
        })
        .context("Failed to serialise output")?;
        println!("{json}");
    } else {
        print_results(&report, &results);
    }

    match report.status {
        ReportStatus::Completed => Ok(()),
        _ if report.needs_password() => {
            anyhow::bail!("{} is password protected; rerun with --password", report.file_name)
        }
        status => {
            if !quiet && !show_progress {
                eprintln!("report {} ended {}", report.id, status);
            }
            anyhow::bail!("Processing of {} failed", report.file_name)
        }
    }
}

fn print_results(report: &Report, results: &[BiomarkerResult]) {
    println!(
        "{}  {}  {}",
        bold(&report.file_name),
        dim(report.lab_name.as_deref().unwrap_or("laboratoire inconnu")),
        dim(&report
            .report_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "-".to_string())),
    );
    for r in results {
        let range = match (r.reference_min, r.reference_max) {
            (Some(lo), Some(hi)) => format!("{lo} - {hi}"),
            (Some(lo), None) => format!("> {lo}"),
            (None, Some(hi)) => format!("< {hi}"),
            (None, None) => String::new(),
        };
        let status = match r.status {
            BiomarkerStatus::Normal => green(r.status.as_str()),
            BiomarkerStatus::Low | BiomarkerStatus::High => yellow(r.status.as_str()),
            BiomarkerStatus::Critical => red(r.status.as_str()),
        };
        println!(
            "  {:<32} {:>10} {:<10} {:<16} {}  {}",
            r.normalized_name,
            r.value,
            r.unit.as_deref().unwrap_or(""),
            dim(&range),
            status,
            dim(&r.category),
        );
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let config = build_config(&args.pipeline)?;
    let stores = Stores::in_memory(Arc::new(FsObjectStore::new(&args.pipeline.store_dir)));
    let orchestrator = build_orchestrator(&args.pipeline, stores.clone(), config.clone())?;

    let gateway = Gateway::new(
        stores.clone(),
        Arc::new(SpawnTrigger::new(orchestrator.clone())),
        config.clone(),
    );
    let state = AppState {
        gateway: Arc::new(gateway),
        orchestrator,
        stores,
        max_upload_bytes: config.max_upload_bytes,
    };
    server::serve(args.addr, state)
        .await
        .context("Server stopped")
}
