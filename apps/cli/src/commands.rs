//! CLI command definitions, routing, and tracing setup.

use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;
use url::Url;

use ragline_core::{Collaborators, Pipeline, RunObserver};
use ragline_providers::{BraveSearch, HttpPageSource, OpenAiClient};
use ragline_shared::{
    AppConfig, EventPayload, PipelineConfig, RunId, init_config, load_config, resolve_db_path,
};
use ragline_storage::{MemorySink, MessageSink, Storage};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// Ragline: sourced answers from the web, streamed.
#[derive(Parser)]
#[command(
    name = "ragline",
    version,
    about = "Answer questions from live web sources with a streamed, grounded response.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
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

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Ask a question and stream a sourced answer.
    Ask {
        /// The question.
        #[arg(required = true, num_args = 1..)]
        query: Vec<String>,

        /// Keep events in memory instead of the message history database.
        #[arg(long)]
        ephemeral: bool,

        /// Message history database (defaults to the configured path).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Show persisted runs, or the events of one run.
    History {
        /// Run ID to show in full.
        #[arg(long)]
        run: Option<String>,

        /// Number of runs to list.
        #[arg(short, long, default_value = "20")]
        limit: u32,

        /// Message history database (defaults to the configured path).
        #[arg(long)]
        db: Option<PathBuf>,
    },

    /// Delete all persisted events.
    Clear {
        /// Message history database (defaults to the configured path).
        #[arg(long)]
        db: Option<PathBuf>,
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
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags. Logs go to stderr; stdout carries the answer.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "ragline=warn",
        1 => "ragline=info",
        2 => "ragline=debug",
        _ => "ragline=trace",
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
    match cli.command {
        Command::Ask {
            query,
            ephemeral,
            db,
        } => cmd_ask(&query.join(" "), ephemeral, db).await,
        Command::History { run, limit, db } => cmd_history(run.as_deref(), limit, db).await,
        Command::Clear { db } => cmd_clear(db).await,
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init().await,
            ConfigAction::Show => cmd_config_show().await,
        },
    }
}

async fn open_storage(config: &AppConfig, db: Option<PathBuf>) -> Result<Storage> {
    let path = match db {
        Some(path) => path,
        None => resolve_db_path(config)?,
    };
    info!(path = %path.display(), "opening message history");
    Ok(Storage::open(&path).await?)
}

async fn cmd_ask(query: &str, ephemeral: bool, db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;

    // Fail on missing keys before touching the network or the database.
    let completion = Arc::new(OpenAiClient::from_config(&config.openai)?);
    let search = Arc::new(BraveSearch::from_config(&config.search)?);
    let pages =
        Arc::new(HttpPageSource::with_private_hosts(config.pipeline.allow_private_hosts)?);

    let sink: Arc<dyn MessageSink> = if ephemeral {
        Arc::new(MemorySink::new())
    } else {
        Arc::new(open_storage(&config, db).await?)
    };

    let pipeline = Pipeline::new(
        &PipelineConfig::from(&config),
        Collaborators {
            completion: completion.clone(),
            search,
            pages,
            embedder: completion,
            sink,
        },
    )?;

    info!(query, ephemeral, "asking");

    let observer = Arc::new(TerminalObserver::new());
    let summary = pipeline.run(query, observer.clone()).await;
    observer.finish();
    let summary = summary?;

    println!(
        "  Run {} · {} sources · {:.1}s",
        summary.run_id,
        summary.fragments.len(),
        summary.elapsed.as_secs_f64()
    );
    println!();

    Ok(())
}

// ---------------------------------------------------------------------------
// Terminal observer
// ---------------------------------------------------------------------------

/// Spinner for phases, then the answer streamed to stdout as it grows.
struct TerminalObserver {
    spinner: ProgressBar,
    /// Bytes of the answer already printed.
    printed: Mutex<usize>,
}

impl TerminalObserver {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner())
                .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
        );
        spinner.enable_steady_tick(std::time::Duration::from_millis(80));
        Self {
            spinner,
            printed: Mutex::new(0),
        }
    }

    fn finish(&self) {
        self.spinner.finish_and_clear();
    }

    fn print_answer(&self, text: &str) {
        let Ok(mut printed) = self.printed.lock() else {
            return;
        };
        if let Some(suffix) = new_suffix(text, *printed) {
            if *printed == 0 {
                // Stop redrawing over the streamed answer.
                self.spinner.finish_and_clear();
                println!("Answer:");
            }
            print!("{suffix}");
            let _ = std::io::stdout().flush();
            *printed = text.len();
        }
    }
}

/// The part of `text` after the first `printed` bytes, if any.
fn new_suffix(text: &str, printed: usize) -> Option<&str> {
    text.get(printed..).filter(|s| !s.is_empty())
}

impl RunObserver for TerminalObserver {
    fn phase(&self, name: &str) {
        self.spinner.set_message(name.to_string());
    }

    fn source_processed(&self, link: &Url, found: bool, processed: usize, total: usize) {
        let mark = if found { "✓" } else { "·" };
        self.spinner
            .set_message(format!("Scanning [{processed}/{total}] {mark} {link}"));
    }

    fn published(&self, payload: &EventPayload) {
        match payload {
            EventPayload::Sources(sources) => self.spinner.suspend(|| {
                println!("Sources:");
                for (i, source) in sources.iter().enumerate() {
                    println!("  {}. {} <{}>", i + 1, source.title, source.link);
                }
                println!();
            }),
            EventPayload::Gpt(text) => self.print_answer(text),
            EventPayload::FollowUp(questions) => {
                self.finish();
                println!();
                println!();
                if !questions.is_empty() {
                    println!("Related:");
                    for question in questions {
                        println!("  - {question}");
                    }
                    println!();
                }
            }
            EventPayload::Query(_) | EventPayload::VectorCreation(_) => {}
        }
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

async fn cmd_history(run: Option<&str>, limit: u32, db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;

    if let Some(run) = run {
        let run_id: RunId = run
            .parse()
            .map_err(|e| eyre!("invalid run id '{run}': {e}"))?;
        let events = storage.list_run_events(run_id).await?;
        if events.is_empty() {
            println!("No events for run {run_id}.");
            return Ok(());
        }
        for entry in events {
            println!("[{}] {}", entry.created_at, entry.kind());
            println!("{}", describe(&entry.event.payload));
            println!();
        }
        return Ok(());
    }

    let runs = storage.list_runs(limit).await?;
    if runs.is_empty() {
        println!("No runs recorded.");
        return Ok(());
    }
    for record in runs {
        println!(
            "{}  {}  {:>2} events  {}",
            record.run_id,
            record.started_at,
            record.event_count,
            record.query.as_deref().unwrap_or("(query not stored)")
        );
    }
    Ok(())
}

fn describe(payload: &EventPayload) -> String {
    match payload {
        EventPayload::Query(q) => format!("  {q}"),
        EventPayload::Sources(sources) => sources
            .iter()
            .map(|s| format!("  {} <{}>", s.title, s.link))
            .collect::<Vec<_>>()
            .join("\n"),
        EventPayload::VectorCreation(msg) => format!("  {msg}"),
        EventPayload::Gpt(text) => format!("  {text}"),
        EventPayload::FollowUp(questions) => questions
            .iter()
            .map(|q| format!("  - {q}"))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

async fn cmd_clear(db: Option<PathBuf>) -> Result<()> {
    let config = load_config()?;
    let storage = open_storage(&config, db).await?;
    let removed = storage.clear().await?;
    println!("Removed {removed} events.");
    Ok(())
}

// ---------------------------------------------------------------------------
// Config
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
