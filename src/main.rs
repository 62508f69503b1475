//! DocAudit - windowed, cited question answering over long documents
//!
//! A CLI tool that runs a question battery against a document through
//! Ollama and writes one merged, page-cited answer set per run.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (configuration, ingestion, cancellation, I/O)
//!   2 - A required question has no answer and --fail-on-missing is set

mod progress;

use anyhow::{Context, Result};
use docaudit::analysis::{Orchestrator, ProgressSink};
use docaudit::cli::Args;
use docaudit::config::{Config, DEFAULT_CONFIG_FILE};
use docaudit::document::{make_windows, source_for_path, validate_pages, TextSource};
use docaudit::models::AnswerStatus;
use docaudit::oracle::{OllamaOracle, Oracle, RetryingOracle};
use docaudit::questions::{QuestionRegistry, RegistryConfig};
use docaudit::report::{self, CompiledAnswers};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    // Initialize logging
    init_logging(&args);

    info!("DocAudit v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run_analysis(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Analysis failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default .docaudit.toml.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to customize model, windowing, thresholds, and more.");
    Ok(())
}

/// Initialize logging based on verbosity settings. `RUST_LOG` wins when set.
fn init_logging(args: &Args) {
    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let result = match EnvFilter::try_from_default_env() {
        Ok(filter) => tracing::subscriber::set_global_default(builder.with_env_filter(filter).finish()),
        Err(_) => tracing::subscriber::set_global_default(
            builder.with_max_level(args.log_level()).finish(),
        ),
    };

    result.expect("Failed to set tracing subscriber");
}

/// Run the complete analysis. Returns the exit code (0 or 2).
async fn run_analysis(args: Args) -> Result<i32> {
    // Load configuration
    let mut config = load_config(&args)?;
    config.merge_with_args(&args);
    config.validate()?;

    let document = args
        .document
        .as_deref()
        .context("--document is required")?;
    let source = source_for_path(document);

    let questions_path = config.questions_path();
    let questions = RegistryConfig::load(&questions_path)
        .with_context(|| format!("Failed to load questions from {}", questions_path.display()))?;

    // Handle --dry-run: ingest and plan, no model calls
    if args.dry_run {
        return handle_dry_run(source.as_ref(), questions, &config);
    }

    println!("📄 Document: {}", source.describe());
    println!("🤖 Model: {} at {}", config.model.name, config.model.ollama_url);
    println!(
        "   Window size: {} pages | Concurrency: {} | Timeout: {}s | Retries: {}",
        config.windowing.window_size,
        config.general.concurrency,
        config.model.timeout_seconds,
        config.retry.max_retries
    );

    let ollama = OllamaOracle::new(config.ollama_config())?;
    let oracle: Arc<dyn Oracle> = Arc::new(RetryingOracle::new(ollama, config.retry_policy()));

    let (sink, receiver) = ProgressSink::channel();
    let orchestrator = Orchestrator::new(oracle, config.run_settings()).with_events(sink);

    // Ctrl-C stops the run after the window in flight
    let cancel = orchestrator.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received; stopping after the current window");
            cancel.cancel();
        }
    });

    let display = tokio::spawn(progress::drive(
        receiver,
        config.windowing.window_size,
        !args.quiet,
    ));

    println!("\n🔬 Analyzing...\n");
    let result = orchestrator.run(source.as_ref(), questions).await;
    let tally = display.await.unwrap_or_default();
    let outcome = result?;

    let compiled = report::compile(
        &outcome,
        &source.describe(),
        &config.model.name,
        config.thresholds.acceptance_floor,
    );

    let output = config.output_path();
    report::write_report(&compiled, &output)
        .with_context(|| format!("Failed to write answers to {}", output.display()))?;

    print_summary(&compiled, tally.errors);
    println!("\n✅ Analysis complete! Answers saved to: {}", output.display());

    if args.fail_on_missing && !compiled.summary.required_unanswered.is_empty() {
        eprintln!(
            "\n⛔ Required questions without an answer: {}. Failing (exit code 2).",
            compiled.summary.required_unanswered.join(", ")
        );
        return Ok(2);
    }

    Ok(0)
}

fn print_summary(compiled: &CompiledAnswers, errors: usize) {
    let summary = &compiled.summary;
    println!("\n📊 Analysis Summary:");
    println!(
        "   Pages: {} | Windows: {} | Second pass questions: {}",
        compiled.metadata.page_count,
        compiled.metadata.window_count,
        compiled.metadata.second_pass_questions
    );
    println!(
        "   {} Answered: {} | {} Low confidence: {} | {} Unanswered: {} (of {})",
        AnswerStatus::Answered.emoji(),
        summary.answered,
        AnswerStatus::LowConfidence.emoji(),
        summary.low_confidence,
        AnswerStatus::Unanswered.emoji(),
        summary.unanswered,
        summary.total
    );
    for question in &compiled.questions {
        println!("     {}", question.summary_line());
    }
    println!(
        "   Oracle calls: {} | Estimated tokens: {} | Reported tokens: {}",
        compiled.budget.calls_issued,
        compiled.budget.tokens_estimated,
        compiled.budget.tokens_recorded
    );

    let diagnostics = &compiled.diagnostics;
    if errors > 0 || diagnostics.dropped_answers > 0 || diagnostics.budget_trims > 0 {
        println!(
            "   ⚠️  Failed calls: {} | Dropped answers: {} | Budget trims: {}",
            diagnostics.failed_calls() + diagnostics.persona_failures,
            diagnostics.dropped_answers,
            diagnostics.budget_trims
        );
    }
    println!("   Duration: {:.1}s", compiled.metadata.duration_seconds);
}

/// Handle --dry-run: show windows and question batches, exit.
fn handle_dry_run(source: &dyn TextSource, questions: RegistryConfig, config: &Config) -> Result<i32> {
    println!("\n🔍 Dry run: {} (no model calls)\n", source.describe());

    let pages = source.get_pages()?;
    validate_pages(&pages)?;
    let registry = QuestionRegistry::new(questions)?;
    let windows = make_windows(&pages, config.windowing.window_size)?;

    println!("   {} pages in {} windows:", pages.len(), windows.len());
    for window in &windows {
        let numbers = window.page_numbers();
        println!(
            "     🪟 window {}: pages {}-{} ({} chars)",
            window.index,
            numbers.first().copied().unwrap_or_default(),
            numbers.last().copied().unwrap_or_default(),
            window.text.chars().count()
        );
    }

    println!("\n   {} sections, {} questions:", registry.sections().len(), registry.question_count());
    for section in registry.sections() {
        println!("     📋 {} ({} questions)", section.name, section.question_ids.len());
    }

    let calls = windows.len() * registry.sections().len();
    println!("\n   First pass: up to {} answer calls.", calls);
    println!("\n✅ Dry run complete. No model calls were made.");
    Ok(0)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}
