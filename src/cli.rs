//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation. Settings that also live in `.docaudit.toml`
//! are optional here so that only explicit flags override the file.

use clap::Parser;
use std::path::PathBuf;

/// DocAudit - answer a question battery from a long document
///
/// Splits the document into page windows, asks every section's questions
/// of every window through a local Ollama model, and merges the answers
/// into one cited response per question.
///
/// Examples:
///   docaudit --document manual.txt --questions questions.toml
///   docaudit --document pages/ --window-size 5 --concurrency 3
///   docaudit --document manual.txt --dry-run
///   docaudit --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// Document to analyze
    ///
    /// A text file with pages separated by form feeds, or a directory of
    /// one .txt file per page.
    #[arg(short, long, value_name = "PATH", required_unless_present = "init_config")]
    pub document: Option<PathBuf>,

    /// Question registry (TOML)
    ///
    /// Defaults to the config file value, then questions.toml.
    #[arg(long, value_name = "FILE")]
    pub questions: Option<PathBuf>,

    /// Output file for the compiled answers (JSON)
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .docaudit.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Ollama model to use
    #[arg(short, long, env = "DOCAUDIT_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Pages per window
    #[arg(short, long, value_name = "PAGES")]
    pub window_size: Option<usize>,

    /// Concurrent section calls per window
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Per-call timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Retries for failed or timed-out oracle calls (exponential backoff)
    #[arg(long, value_name = "COUNT")]
    pub retries: Option<u32>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Dry run: load the document and questions without calling the model
    ///
    /// Shows the windows and question batches that would be sent and exits.
    #[arg(long)]
    pub dry_run: bool,

    /// Exit with code 2 when a required question gets no answer
    #[arg(long)]
    pub fail_on_missing: bool,

    /// Generate a default .docaudit.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        // Skip validation for --init-config
        if self.init_config {
            return Ok(());
        }

        match self.document {
            Some(ref path) if !path.exists() => {
                return Err(format!("Document does not exist: {}", path.display()));
            }
            None => return Err("--document is required".to_string()),
            _ => {}
        }

        if let Some(ref path) = self.questions {
            if !path.is_file() {
                return Err(format!(
                    "Question registry does not exist: {}",
                    path.display()
                ));
            }
        }

        // Validate Ollama URL format (not needed for dry-run)
        if !self.dry_run {
            if let Some(ref url) = self.ollama_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
                }
            }
        }

        if self.window_size == Some(0) {
            return Err("Window size must be at least 1 page".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.timeout == Some(0) {
            return Err("Timeout must be at least 1 second".to_string());
        }

        // Check for conflicting options
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}
