//! Filegate CLI - directory watching for the integration gateway
//!
//! This binary provides the command-line interface for the watch engine.

#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]

use filegate::output::{format_batch, format_change};
use filegate::PolicyArgs;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use filegate_core::config::Config;
use filegate_watcher::{WatchEngine, WatchPolicy};
use std::path::{Path, PathBuf};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "filegate")]
#[command(about = "Directory watching for the integration gateway")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Watch directories and print accepted changes until Ctrl-C
    Watch {
        /// Directories to watch
        #[arg(required = true, value_name = "PATH")]
        paths: Vec<PathBuf>,

        #[command(flatten)]
        policy: PolicyArgs,

        /// Print changes as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_logging(cli.verbose, &config.logging.level);

    match cli.command {
        Commands::Watch {
            paths,
            policy,
            json,
        } => watch(&config, &paths, &policy, json).await,
        Commands::Config => {
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

/// Initialize logging system
///
/// `RUST_LOG` takes precedence over the configured level.
fn init_logging(verbose: bool, configured: &str) {
    let level = if verbose { "debug" } else { configured };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "filegate={level},filegate_core={level},filegate_watcher={level}"
        ))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Watch `paths` until Ctrl-C
async fn watch(config: &Config, paths: &[PathBuf], args: &PolicyArgs, json: bool) -> Result<()> {
    let mut policy_config = config.policy.clone();
    args.apply(&mut policy_config);
    let policy = WatchPolicy::from(&policy_config);

    let engine = WatchEngine::new(&config.engine).context("Failed to create watch engine")?;

    engine.on_change(move |event| match format_change(event, json) {
        Ok(line) => println!("{line}"),
        Err(e) => error!("Failed to render change: {e:#}"),
    });
    engine.on_batch(move |events| match format_batch(events, json) {
        Ok(text) => println!("{text}"),
        Err(e) => error!("Failed to render batch: {e:#}"),
    });

    for path in paths {
        start(&engine, path, &policy)?;
    }
    info!(
        "Watching {} directories ({:?}), press Ctrl-C to stop",
        paths.len(),
        policy.dispatch_mode()
    );

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;

    info!("Received Ctrl-C, stopping watches");
    engine.shutdown();
    Ok(())
}

fn start(engine: &WatchEngine, path: &Path, policy: &WatchPolicy) -> Result<()> {
    engine
        .start_watching(path, policy.clone())
        .with_context(|| format!("Failed to watch {}", path.display()))
}
