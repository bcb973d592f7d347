//! singleapp - single-primary coordination demo
//!
//! CLI entry point for simulating instances and holding the host lock.

use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use colored::Colorize;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use singleapp::channel::ChannelHub;
use singleapp::cli::{Cli, Command, OutputFormat, get_log_path};
use singleapp::config::Config;
use singleapp::consumer::AppInstance;
use singleapp::coordinator::{ElectionSnapshot, Role};
use singleapp::host_lock::HostLock;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log here since logging isn't initialized yet
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
    let level = match cli_log_level.or(config_log_level).map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Options for the simulate command
struct SimulateOptions {
    instances: usize,
    stagger: Duration,
    shutdown_primary: bool,
    format: OutputFormat,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    // Setup logging with priority: CLI > config > INFO default
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let mut config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(channel = %config.election.channel_name, window_ms = config.election.window_ms, "singleapp loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Simulate {
            instances,
            stagger_ms,
            window_ms,
            channel,
            no_tie_break,
            rejoin,
            shutdown_primary,
            format,
        } => {
            if let Some(window_ms) = window_ms {
                config.election.window_ms = window_ms;
            }
            if let Some(channel) = channel {
                config.election.channel_name = channel;
            }
            if no_tie_break {
                config.election.tie_break = false;
            }
            if rejoin {
                config.election.rejoin_on_resign = true;
            }
            let options = SimulateOptions {
                instances,
                stagger: Duration::from_millis(stagger_ms),
                shutdown_primary,
                format,
            };
            cmd_simulate(&config, options).await
        }
        Command::Hold { lock_file, hold_secs } => cmd_hold(&config, lock_file, hold_secs).await,
        Command::Config => cmd_config(&config),
    }
}

/// Mount instances on one hub, wait for the elections, print the roles
async fn cmd_simulate(config: &Config, options: SimulateOptions) -> Result<()> {
    debug!(instances = options.instances, stagger = ?options.stagger, "cmd_simulate: called");
    if options.instances == 0 {
        return Err(eyre::eyre!("At least one instance is required"));
    }

    let hub = ChannelHub::from_config(&config.hub);
    let mut apps = Vec::with_capacity(options.instances);
    for i in 0..options.instances {
        if i > 0 && !options.stagger.is_zero() {
            tokio::time::sleep(options.stagger).await;
        }
        apps.push(AppInstance::mount(hub.clone(), config));
    }

    for app in &apps {
        app.settled().await;
    }
    report(&apps, "Initial election", &options.format).await?;

    if options.shutdown_primary {
        match apps.iter().find(|app| app.is_primary()) {
            Some(primary) => {
                info!(instance_id = %primary.coordinator().id(), "cmd_simulate: shutting down primary");
                primary.coordinator().shutdown().await;
                tokio::time::sleep(config.election.window() * 2).await;
                report(&apps, "After primary shutdown", &options.format).await?;
            }
            None => warn!("cmd_simulate: no primary to shut down"),
        }
    }

    for app in apps {
        app.unmount().await;
    }
    Ok(())
}

async fn report(apps: &[AppInstance], title: &str, format: &OutputFormat) -> Result<()> {
    let mut snapshots: Vec<ElectionSnapshot> = Vec::with_capacity(apps.len());
    for app in apps {
        if let Some(snapshot) = app.coordinator().snapshot().await {
            snapshots.push(snapshot);
        }
    }

    match format {
        OutputFormat::Json => {
            let json = serde_json::to_string_pretty(&snapshots).context("Failed to serialize snapshots")?;
            println!("{}", json);
        }
        OutputFormat::Text => {
            println!("{}", title.bold());
            for snapshot in &snapshots {
                let role = match snapshot.role {
                    Role::Primary => "primary".green(),
                    Role::Secondary => "secondary".yellow(),
                    Role::Unknown => "unknown".dimmed(),
                };
                let liveness = if snapshot.running { "" } else { " (stopped)" };
                println!(
                    "  {:<14} {:<10} elections={} probes={} answered={}{}",
                    snapshot.instance_id.to_string(),
                    role,
                    snapshot.elections,
                    snapshot.probes_sent,
                    snapshot.probes_answered,
                    liveness
                );
            }

            let primaries = snapshots
                .iter()
                .filter(|s| s.running && s.role == Role::Primary)
                .count();
            if primaries == 1 {
                println!("  {} live primary", "1".green());
            } else {
                println!("  {} live primaries", primaries.to_string().red());
            }
        }
    }
    Ok(())
}

/// Hold the host lock, or report who holds it
async fn cmd_hold(config: &Config, lock_file: Option<PathBuf>, hold_secs: u64) -> Result<()> {
    let path = lock_file.unwrap_or_else(|| config.host_lock.resolve_path(&config.election.channel_name));
    debug!(?path, hold_secs, "cmd_hold: called");

    match HostLock::try_acquire(&path).context("Failed to take host lock")? {
        Some(lock) => {
            println!(
                "{} holding {} for {}s (PID {})",
                "primary".green(),
                path.display(),
                hold_secs,
                std::process::id()
            );
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(hold_secs)) => {}
                _ = tokio::signal::ctrl_c() => info!("cmd_hold: interrupted"),
            }
            lock.release();
            println!("released {}", path.display());
        }
        None => match HostLock::read_owner(&path) {
            Some(pid) => println!("{}: lock held by PID {}", "secondary".yellow(), pid),
            None => println!("{}: lock held by another process", "secondary".yellow()),
        },
    }
    Ok(())
}

fn cmd_config(config: &Config) -> Result<()> {
    let yaml = serde_yaml::to_string(config).context("Failed to serialize config")?;
    print!("{}", yaml);
    Ok(())
}
