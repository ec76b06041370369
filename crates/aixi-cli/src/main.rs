//! `aixi` – runs one bounded-lifespan action–perception loop.
//!
//! 1. Loads `~/.aixi/config.toml` (writing the defaults on first run) and the
//!    constitution it points to.
//! 2. Wires the inference backend, the sub-environments, the access gate and
//!    the [`Orchestrator`].
//! 3. Prints each cycle as it completes and stores it in
//!    `<histories>/cycles.sqlite3`.
//! 4. Asks for an overall evaluation, then writes the history file and the
//!    token report next to the database.
//!
//! Ctrl-C stops the run after the current cycle.  Exit codes: `0` when every
//! cycle ran, `1` on a fatal error, `130` when cancelled.

mod config;
mod report;

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use aixi_env::{
    CodeExecutorEnv, ConsultantEnv, FileSystemEnv, SubEnvRegistry, WebSearchEnv,
};
use aixi_kernel::{AccessGate, ActionVerifier, CapabilityManager};
use aixi_memory::{CycleStore, History};
use aixi_runtime::{
    CancelFlag, FatalKind, IDEATOR_AGENT_ID, Ideator, Judge, LlmDriver, MeteredBackend,
    Orchestrator, RunReport, TokenTracker, init_tracing,
};
use aixi_types::{CallKind, Constitution, Cycle, InferenceBackend, SubEnvKind};
use anyhow::Context;
use chrono::Local;
use colored::Colorize;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::config::AixiConfig;

const CYCLE_DB: &str = "cycles.sqlite3";

fn main() -> ExitCode {
    // Installed before the runtime exists: the OTLP exporter may block.
    let _tracing = init_tracing("aixi");

    print_banner();

    match run() {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {e:#}", "Fatal error:".red().bold());
            ExitCode::from(1)
        }
    }
}

fn run() -> anyhow::Result<ExitCode> {
    let cfg = load_config()?;
    cfg.validate()?;
    info!(config = ?cfg, "configuration loaded");

    let constitution = std::fs::read_to_string(&cfg.constitution_path).with_context(|| {
        format!(
            "failed to read constitution at {}",
            cfg.constitution_path.display()
        )
    })?;
    let constitution = Constitution::new(constitution);
    if constitution.is_blank() {
        anyhow::bail!(
            "constitution at {} is empty",
            cfg.constitution_path.display()
        );
    }
    println!(
        "  {} Constitution loaded ({} characters)",
        "✓".green().bold(),
        constitution.text().chars().count()
    );

    let cancel = CancelFlag::new();
    let on_signal = cancel.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!(
            "{}",
            "⚠  Ctrl-C received – stopping after the current cycle …"
                .yellow()
                .bold()
        );
        on_signal.cancel();
    }) {
        warn!(error = %e, "failed to install Ctrl-C handler; the run can only stop at its lifespan");
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the Tokio runtime")?;
    runtime.block_on(run_loop(cfg, constitution, cancel))
}

/// Load the config file, writing the defaults when none exists yet.
fn load_config() -> anyhow::Result<AixiConfig> {
    let path = config::config_path();
    if let Some(cfg) = config::load()? {
        println!("  Config loaded from {}", path.display().to_string().bold());
        return Ok(cfg);
    }
    let mut cfg = AixiConfig::default();
    match config::save_to(&cfg, &path) {
        Ok(()) => println!(
            "  No config found; defaults written to {}",
            path.display().to_string().bold()
        ),
        Err(e) => warn!(error = %e, "could not write default config"),
    }
    config::apply_env_overrides(&mut cfg);
    Ok(cfg)
}

async fn run_loop(
    cfg: AixiConfig,
    constitution: Constitution,
    cancel: CancelFlag,
) -> anyhow::Result<ExitCode> {
    // ── Inference ─────────────────────────────────────────────────────────
    let tracker = TokenTracker::with_pricing(cfg.pricing());
    let driver: Arc<dyn InferenceBackend> = Arc::new(
        LlmDriver::new(&cfg.backend_url, &cfg.model)
            .with_api_key(cfg.api_key.clone())
            .with_request_timeout(Duration::from_secs(cfg.inference_timeout_secs)),
    );
    let metered = |kind| MeteredBackend::shared(Arc::clone(&driver), tracker.clone(), kind);

    let ideator = Ideator::new(metered(CallKind::Ideator), constitution.clone())
        .with_temperature(cfg.ideator_temperature)
        .with_structured_output(cfg.structured_output);
    let judge = Judge::new(metered(CallKind::Judge), constitution.clone())
        .with_temperature(cfg.judge_temperature);
    let reviewer = Judge::new(metered(CallKind::RunReview), constitution)
        .with_temperature(cfg.judge_temperature);

    // ── Sub-environments and access control ───────────────────────────────
    let registry = build_registry(&cfg, metered(CallKind::Consultant))?;
    let mut capabilities = CapabilityManager::new();
    capabilities.grant_subenvironments(IDEATOR_AGENT_ID, cfg.subenvironments.iter().copied());
    let gate = AccessGate::new(capabilities, ActionVerifier::with_defaults(cfg.max_input_bytes))
        .with_registered(registry.kinds());

    let orchestrator = Orchestrator::new(
        ideator,
        judge,
        registry,
        gate,
        tracker.clone(),
        cfg.orchestrator_config(),
    )
    .with_cancel_flag(cancel);
    println!(
        "  {} Tool documentation loaded ({} characters)",
        "✓".green().bold(),
        orchestrator.tool_docs().chars().count()
    );

    // ── Cycle feed ────────────────────────────────────────────────────────
    let feed = orchestrator.subscribe();
    let db_path = cfg.histories_directory.join(CYCLE_DB);
    let max_cycles = cfg.max_cycles;
    let recorder = tokio::task::spawn_blocking(move || record_cycles(feed, &db_path, max_cycles));

    // ── Run ───────────────────────────────────────────────────────────────
    let started = Local::now();
    println!(
        "\n🚀 Starting execution at {} (maximum cycles: {})",
        started.to_rfc3339(),
        max_cycles
    );
    let report = orchestrator.run(max_cycles).await;
    let finished = Local::now();
    match recorder.await {
        Ok(recorded) => info!(recorded, "cycle recorder finished"),
        Err(e) => warn!(error = %e, "cycle recorder task failed"),
    }

    print_outcome(&report, started, finished);

    // ── Overall evaluation and artifacts ──────────────────────────────────
    println!("\nGetting overall performance evaluation...");
    let overall = overall_evaluation(
        &reviewer,
        &report.history,
        Duration::from_secs(cfg.inference_timeout_secs),
    )
    .await;

    println!("{}", report::usage_summary(&tracker));

    let history_file = report::history_path(&cfg.histories_directory, started);
    std::fs::write(
        &history_file,
        report::render_history(&report, &overall, started, finished),
    )
    .with_context(|| format!("failed to write {}", history_file.display()))?;
    println!("  {} History saved to: {}", "✓".green().bold(), history_file.display());

    let token_file = report::token_report_path(&history_file);
    std::fs::write(&token_file, report::render_usage_report(&tracker, Local::now()))
        .with_context(|| format!("failed to write {}", token_file.display()))?;
    println!("  {} Token report saved to: {}", "✓".green().bold(), token_file.display());

    Ok(exit_code(&report))
}

/// Host exactly the configured sub-environments.
fn build_registry(
    cfg: &AixiConfig,
    consultant_backend: Arc<dyn InferenceBackend>,
) -> anyhow::Result<SubEnvRegistry> {
    let mut registry = SubEnvRegistry::new();
    for kind in &cfg.subenvironments {
        match kind {
            SubEnvKind::FileSystem => registry.register(Arc::new(
                FileSystemEnv::new(&cfg.working_directory)
                    .context("failed to open the file_system working directory")?,
            )),
            SubEnvKind::WebSearch => registry.register(Arc::new(
                WebSearchEnv::new(cfg.search_url.clone())
                    .context("failed to set up web_search")?,
            )),
            SubEnvKind::CodeExecutor => registry.register(Arc::new(
                CodeExecutorEnv::new(&cfg.working_directory)
                    .context("failed to open the code_executor working directory")?
                    .with_python(cfg.python.clone()),
            )),
            SubEnvKind::Consultant => registry.register(Arc::new(
                ConsultantEnv::new(Arc::clone(&consultant_backend))
                    .with_temperature(cfg.consultant_temperature),
            )),
        }
    }
    info!(hosted = ?registry.kinds(), "sub-environments registered");
    Ok(registry)
}

/// Print and persist every cycle published on the feed.  Runs on a blocking
/// thread because SQLite calls block.
fn record_cycles(mut feed: broadcast::Receiver<Cycle>, db_path: &Path, max_cycles: u64) -> usize {
    let store = match CycleStore::open(db_path) {
        Ok(store) => Some(store),
        Err(e) => {
            warn!(path = %db_path.display(), error = %e, "cycle database unavailable; cycles will not be persisted");
            None
        }
    };
    let run_id = CycleStore::new_run_id();
    info!(%run_id, path = %db_path.display(), "recording cycles");

    let mut recorded = 0;
    loop {
        match feed.blocking_recv() {
            Ok(cycle) => {
                println!("{}", report::cycle_summary(&cycle, max_cycles));
                if let Some(store) = &store {
                    match store.record(&run_id, &cycle) {
                        Ok(()) => recorded += 1,
                        Err(e) => warn!(cycle = cycle.index(), error = %e, "failed to persist cycle"),
                    }
                }
            }
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                warn!(missed, "cycle recorder fell behind; some cycles were not persisted");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    recorded
}

async fn overall_evaluation(reviewer: &Judge, history: &History, limit: Duration) -> String {
    if history.is_empty() {
        return "No cycles were completed; there is nothing to evaluate.".to_string();
    }
    match tokio::time::timeout(limit, reviewer.evaluate_run(history)).await {
        Ok(Ok(text)) => text,
        Ok(Err(e)) => {
            warn!(error = %e, "overall evaluation failed");
            format!("ERROR: Overall evaluation failed: {e}")
        }
        Err(_) => {
            warn!(limit_ms = limit.as_millis() as u64, "overall evaluation timed out");
            "ERROR: Overall evaluation timed out".to_string()
        }
    }
}

fn print_outcome(
    report: &RunReport,
    started: chrono::DateTime<Local>,
    finished: chrono::DateTime<Local>,
) {
    let duration = (finished - started).num_milliseconds() as f64 / 1000.0;
    match &report.halt {
        None => println!("\n🏁 Execution completed at {}", finished.to_rfc3339()),
        Some(halt) if halt.kind == FatalKind::Cancelled => {
            println!("\n{}", "⚠  Execution interrupted by user".yellow().bold())
        }
        Some(halt) => println!(
            "\n{} {} – {}",
            "❌ Run halted:".red().bold(),
            halt.kind,
            halt.message
        ),
    }
    println!("Duration: {duration:.2} seconds");
    println!("Cycles completed: {}", report.history.len());
}

fn exit_code(report: &RunReport) -> ExitCode {
    match report.halt.as_ref().map(|h| h.kind) {
        None => ExitCode::SUCCESS,
        Some(FatalKind::Cancelled) => ExitCode::from(130),
        Some(_) => ExitCode::from(1),
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"    ___    _____  __ ____"#.bold().cyan());
    println!("{}", r#"   /   |  /  _/ |/ //  _/"#.bold().cyan());
    println!("{}", r#"  / /| |  / / |   / / /  "#.bold().cyan());
    println!("{}", r#" / ___ |_/ / /   |_/ /   "#.bold().cyan());
    println!("{}", r#"/_/  |_/___//_/|_/___/   "#.bold().cyan());
    println!();
    println!(
        "  {} {}",
        "LLM-AIXI".bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).dimmed()
    );
    println!("  Constitution-guided action–perception loop");
    println!();
}
