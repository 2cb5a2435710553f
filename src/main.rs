//! # Gap Harness CLI (`gap`)
//!
//! ```bash
//! gap --config ./config/gap.toml <command>
//! ```
//!
//! | Command | Description |
//! |---------|-------------|
//! | `gap init` | Create the SQLite database and schema |
//! | `gap rcm generate --context <text or file>` | Generate a risk-and-control matrix |
//! | `gap index [rcm.json]` | Load a risk-and-control matrix into the index |
//! | `gap search <collection> "<query>"` | Query one index collection |
//! | `gap rubrics show` | Print the loaded rubrics |
//! | `gap rubrics generate` | Generate rubrics with the chat model |
//! | `gap extract <doc>` | Extract standard requirements from a regulation |
//! | `gap analyze` | Run the gap analysis and save the results |
//! | `gap stats [results.json]` | Summarise a saved run |

use clap::{Parser, Subcommand};
use gap_harness::analyze::{self, AnalyzeOptions};
use gap_harness::config;
use gap_harness::progress::ProgressMode;
use gap_harness::{extract, index, migrate, rcm_gen, rubrics, search, stats};
use gap_harness_core::models::Collection;
use std::path::PathBuf;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Gap Harness: compliance gap analysis between internal controls and
/// external regulations.
#[derive(Parser)]
#[command(
    name = "gap",
    about = "Gap Harness: compliance gap analysis between internal controls and external regulations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/gap.toml")]
    config: PathBuf,

    /// Log progress details to stderr (same as RUST_LOG=info).
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database schema. Safe to run repeatedly.
    Init,

    /// Load a risk-and-control matrix JSON file into the index.
    ///
    /// Unchanged items are skipped; changed items are re-embedded when an
    /// embedding provider is configured.
    Index {
        /// Path to the RCM JSON file (defaults to `[inputs] rcm`).
        rcm: Option<PathBuf>,
    },

    /// Generate a synthetic risk-and-control matrix with the chat model.
    Rcm {
        #[command(subcommand)]
        action: RcmAction,
    },

    /// Search one collection of the index.
    Search {
        /// processes, standards, requirements, controls, or risks.
        collection: Collection,

        /// Query text.
        query: String,

        /// Maximum results (defaults to `[retrieval] limit`).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Show or generate gap-analysis rubrics.
    Rubrics {
        #[command(subcommand)]
        action: RubricsAction,
    },

    /// Extract standard requirements from a regulation (PDF or text).
    Extract {
        /// Document to read.
        input: PathBuf,

        /// Where to write the requirements (defaults to `[inputs] requirements`).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Run the gap analysis over every relevant requirement and rubric.
    Analyze {
        /// Only consider the first N requirements.
        #[arg(long)]
        limit: Option<usize>,

        /// Progress output on stderr. Defaults to human on a TTY, otherwise off.
        #[arg(long, value_enum)]
        progress: Option<ProgressMode>,

        /// Result file (defaults to `[output] results`).
        #[arg(long, short)]
        output: Option<PathBuf>,

        /// Pause after each completed record, in milliseconds.
        #[arg(long)]
        delay_ms: Option<u64>,

        /// List coverage for every record, not only incomplete ones.
        #[arg(long)]
        coverage: bool,
    },

    /// Summarise a saved result file.
    Stats {
        /// Result file (defaults to `[output] results`).
        path: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RcmAction {
    /// Derive business processes from a description, then one RCM per process.
    Generate {
        /// Business description, or a path to a file containing it.
        #[arg(long)]
        context: String,

        /// Where to write the RCM (defaults to `[inputs] rcm`).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum RubricsAction {
    /// Print every rubric and its questions.
    Show,

    /// Generate one rubric per personality with the chat model.
    Generate {
        /// Personality to generate; repeatable. Defaults to the four built-in ones.
        #[arg(long = "personality")]
        personalities: Vec<String>,

        /// Where to write the rubrics (defaults to `[inputs] rubrics`).
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Commands that only read files can run without a config file
    let load = || config::load_config(&cli.config);
    let load_or_minimal = || config::load_config_or_minimal(&cli.config);

    match cli.command {
        Commands::Init => {
            let cfg = load()?;
            migrate::run_migrations(&cfg).await?;
            println!("Database initialized at {}", cfg.db.path.display());
        }
        Commands::Index { rcm } => {
            let cfg = load()?;
            let rcm = rcm.unwrap_or_else(|| cfg.inputs.rcm.clone());
            migrate::run_migrations(&cfg).await?;
            index::run_index(&cfg, &rcm).await?;
        }
        Commands::Rcm { action } => match action {
            RcmAction::Generate { context, output } => {
                let cfg = load()?;
                rcm_gen::run_generate(&cfg, &context, output.as_deref()).await?;
            }
        },
        Commands::Search {
            collection,
            query,
            limit,
        } => {
            let cfg = load()?;
            search::run_search(&cfg, collection, &query, limit).await?;
        }
        Commands::Rubrics { action } => match action {
            RubricsAction::Show => rubrics::run_show(&load_or_minimal()?)?,
            RubricsAction::Generate {
                personalities,
                output,
            } => {
                let cfg = load()?;
                rubrics::run_generate(&cfg, &personalities, output.as_deref()).await?;
            }
        },
        Commands::Extract { input, output } => {
            let cfg = load()?;
            extract::run_extract(&cfg, &input, output.as_deref()).await?;
        }
        Commands::Analyze {
            limit,
            progress,
            output,
            delay_ms,
            coverage,
        } => {
            let cfg = load()?;
            analyze::run_analyze(
                &cfg,
                AnalyzeOptions {
                    requirement_limit: limit,
                    progress,
                    output,
                    delay_ms,
                    show_coverage: coverage,
                },
            )
            .await?;
        }
        Commands::Stats { path } => {
            let path = match path {
                Some(path) => path,
                None => load_or_minimal()?.output.results,
            };
            stats::run_stats(&path)?;
        }
    }

    Ok(())
}
