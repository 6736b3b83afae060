//! # Catalog Harness CLI (`catalog`)
//!
//! ## Usage
//!
//! ```bash
//! catalog --config ./config/catalog.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `catalog check` | Run one load and print what it produced |
//! | `catalog run` | Keep the catalog loaded, reloading periodically, until Ctrl-C |
//! | `catalog sources` | Report whether the configured source is reachable |

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::{info, level_filters::LevelFilter, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use catalog_harness::config::{load_config, Config};
use catalog_harness::database::Database;
use catalog_harness::driver::CatalogDriver;
use catalog_harness::loader::{Loader, LoaderOptions};
use catalog_harness::progress::{format_number, StatusMode, StatusSurface, StatusUpdate};
use catalog_harness::sources::list_sources;
use catalog_harness::traits::source_from_config;

/// Catalog Harness CLI: loads a media catalog from an exported library file
/// or a media server and keeps it current.
#[derive(Parser)]
#[command(name = "catalog", version)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/catalog.toml")]
    config: PathBuf,

    /// Status output: human, json, or off. Defaults to human on a TTY.
    #[arg(long, global = true, value_enum)]
    status: Option<StatusArg>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum StatusArg {
    Human,
    Json,
    Off,
}

impl From<StatusArg> for StatusMode {
    fn from(arg: StatusArg) -> Self {
        match arg {
            StatusArg::Human => StatusMode::Human,
            StatusArg::Json => StatusMode::Json,
            StatusArg::Off => StatusMode::Off,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run one load and print a summary. Exits non-zero if the load fails.
    Check {
        /// Print the summary as JSON on stdout.
        #[arg(long)]
        json: bool,
    },

    /// Keep the catalog loaded until interrupted.
    Run,

    /// Report whether the configured source is reachable.
    Sources,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to install log subscriber: {}", e))?;

    let config = load_config(&cli.config)?;
    let mode = cli
        .status
        .map(StatusMode::from)
        .unwrap_or_else(StatusMode::default_for_tty);

    match cli.command {
        Commands::Check { json } => check(&config, mode.surface(), json),
        Commands::Run => run(&config, mode.surface()),
        Commands::Sources => list_sources(&config),
    }
}

fn check(config: &Config, status: Arc<dyn StatusSurface>, json: bool) -> Result<()> {
    let source = source_from_config(config)?;
    let options = LoaderOptions {
        kind: config.catalog.kind.clone(),
        art: config.art.policy(&config.source)?,
    };
    let mut loader = Loader::new(source, options);
    if loader.start_load(Database::new()).is_err() {
        bail!("loader refused to start");
    }

    let done = loop {
        if let Ok(done) = loader.complete_load() {
            break done;
        }
        let progress = loader.status();
        status.publish(StatusUpdate::LoadStatus(format!(
            "Loading: {} titles processed so far",
            format_number(progress.records_done)
        )));
        std::thread::sleep(config.catalog.poll_interval());
    };

    let summary = done.outcome.context("catalog load failed")?;
    status.publish(StatusUpdate::PersistentId(summary.persistent_id.clone()));
    status.publish(StatusUpdate::TitleCount(summary.titles as u64));

    if json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }
    println!("{:<16} {}", "titles", format_number(summary.titles as u64));
    println!("{:<16} {}", "collections", format_number(summary.collections as u64));
    println!("{:<16} {}", "items", format_number(summary.items as u64));
    println!("{:<16} {}", "categories", format_number(summary.categories as u64));
    println!("{:<16} {}", "images", format_number(summary.images as u64));
    println!(
        "{:<16} {} (no id {}, no name {}, duplicate {})",
        "skipped",
        summary.stats.skipped(),
        summary.stats.skipped_missing_id,
        summary.stats.skipped_missing_name,
        summary.stats.skipped_duplicate
    );
    println!("{:<16} {}", "art failures", summary.stats.art_failures);
    println!("{:<16} {}", "persistent id", summary.persistent_id);
    Ok(())
}

fn run(config: &Config, status: Arc<dyn StatusSurface>) -> Result<()> {
    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        ctrlc::set_handler(move || stop.store(true, Ordering::Release))
            .context("failed to install Ctrl-C handler")?;
    }

    let mut driver = CatalogDriver::from_config(config, status)?;
    driver.request_reload();
    let poll = config.catalog.poll_interval();

    while !stop.load(Ordering::Acquire) {
        driver.tick(Instant::now());
        sleep_unless_stopped(poll, &stop);
    }

    info!("shutting down");
    if !driver.shutdown() {
        warn!(
            "{} loader thread(s) still running at exit",
            driver.abandoned_loaders()
        );
    }
    Ok(())
}

/// Sleep for `total`, waking early if `stop` is raised.
fn sleep_unless_stopped(total: Duration, stop: &AtomicBool) {
    let deadline = Instant::now() + total;
    while !stop.load(Ordering::Acquire) {
        let now = Instant::now();
        if now >= deadline {
            return;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(50)));
    }
}
