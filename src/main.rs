//! Command-line entry point for the cache-warming daemon.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use log::error;

use cachewarm::config;
use cachewarm::orchestrator::{Orchestrator, install_signal_handlers};
use cachewarm::CancelToken;

#[derive(Parser)]
#[command(name = "cachewarm", version, about = "Keeps a site's HTTP cache warm by re-fetching sitemap-discovered URLs")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        #[arg(long, default_value = "cachewarm.toml")]
        config: PathBuf,
        /// Overwrite an existing config file.
        #[arg(long)]
        force: bool,
    },
    /// Print warm/sitemap stats and recent activity.
    Status {
        #[arg(long, default_value = "cachewarm.toml")]
        config: PathBuf,
        #[arg(long, default_value_t = 10)]
        recent: i64,
        #[arg(long, default_value_t = 10)]
        failed: i64,
    },
    /// Run a single warming pass and exit.
    Once {
        #[arg(long, default_value = "cachewarm.toml")]
        config: PathBuf,
    },
    /// Run continuously until signalled.
    Run {
        #[arg(long, default_value = "cachewarm.toml")]
        config: PathBuf,
    },
    /// Force every URL to be treated as stale on the next pass.
    Flush {
        #[arg(long, default_value = "cachewarm.toml")]
        config: PathBuf,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            // Logging may not be initialized yet (e.g. config load failed),
            // so always echo to stderr too.
            eprintln!("cachewarm: {e:#}");
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();

    if let Command::Init { config, force } = &cli.command {
        config::write_default(config, *force)?;
        println!("wrote default config to {}", config.display());
        return Ok(());
    }

    let config_path = match &cli.command {
        Command::Status { config, .. }
        | Command::Once { config }
        | Command::Run { config }
        | Command::Flush { config, .. } => config,
        Command::Init { .. } => unreachable!("handled above"),
    };
    let config = config::load(config_path)?;
    init_logging(&config);

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(dispatch(cli.command, config))
}

async fn dispatch(command: Command, config: config::Config) -> Result<()> {
    match command {
        Command::Init { .. } => unreachable!("handled before config load"),
        Command::Status { recent, failed, .. } => run_status(config, recent, failed).await,
        Command::Once { .. } => run_once(config).await,
        Command::Run { .. } => run_loop(config).await,
        Command::Flush { reason, .. } => run_flush(config, reason).await,
    }
}

async fn run_status(config: config::Config, recent: i64, failed: i64) -> Result<()> {
    let orchestrator = Orchestrator::new(config).await?;
    let stats = orchestrator.store().stats().await?;
    println!("warmed_total: {}", stats.warmed_total);
    println!("ok_total:     {}", stats.ok_total);
    println!("err_total:    {}", stats.err_total);
    println!(
        "last_flush:   {}",
        stats.last_flush_utc.as_deref().unwrap_or("(never)")
    );

    println!("\nrecent warmed:");
    for row in orchestrator.store().recent_warmed(recent).await? {
        println!("  {} [{}] {}", row.url, row.last_status, row.last_warmed_utc);
    }

    println!("\nfailed:");
    for row in orchestrator.store().failed(failed).await? {
        println!("  {} [{}] {}", row.url, row.last_status, row.last_error);
    }

    Ok(())
}

async fn run_once(config: config::Config) -> Result<()> {
    let cancel = CancelToken::new();
    install_signal_handlers(cancel.clone());
    let orchestrator = Orchestrator::new(config).await?;
    orchestrator.run_once(&cancel).await
}

async fn run_loop(config: config::Config) -> Result<()> {
    let cancel = CancelToken::new();
    install_signal_handlers(cancel.clone());
    let orchestrator = Orchestrator::new(config).await?;
    orchestrator.run_loop(&cancel).await
}

async fn run_flush(config: config::Config, reason: Option<String>) -> Result<()> {
    let orchestrator = Orchestrator::new(config).await?;
    orchestrator.store().mark_flush(reason.as_deref()).await?;
    println!("flush recorded");
    Ok(())
}

fn init_logging(config: &config::Config) {
    let level = config.app.log_level.parse().unwrap_or(log::LevelFilter::Info);
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level);

    if let Some(path) = &config.app.log_file {
        if let Ok(file) = std::fs::OpenOptions::new().create(true).append(true).open(path) {
            builder.target(env_logger::Target::Pipe(Box::new(file)));
        } else {
            eprintln!("cachewarm: could not open log file {}, logging to stderr", path.display());
        }
    }

    let _ = builder.try_init();
}
