//! CLI command definitions and subcommands

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

/// singleapp - single-primary coordination demo
#[derive(Parser)]
#[command(
    name = "sa",
    about = "Elect one primary among application instances sharing a channel",
    version
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start several instances on one channel and report the settled roles
    Simulate {
        /// Number of instances
        #[arg(short = 'n', long, default_value = "3")]
        instances: usize,

        /// Delay between instance starts in milliseconds
        #[arg(short, long, default_value = "0")]
        stagger_ms: u64,

        /// Election window in milliseconds (overrides config)
        #[arg(short, long)]
        window_ms: Option<u64>,

        /// Channel name (overrides config)
        #[arg(long)]
        channel: Option<String>,

        /// Disable id tie-breaking (simultaneous starts may both win)
        #[arg(long)]
        no_tie_break: bool,

        /// Let secondaries re-elect when the primary resigns
        #[arg(long)]
        rejoin: bool,

        /// Shut the primary down after the first election and report again
        #[arg(long)]
        shutdown_primary: bool,

        /// Output format
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Take the host-wide lock; the holder is the primary process
    Hold {
        /// Lock file path (overrides config)
        #[arg(long)]
        lock_file: Option<PathBuf>,

        /// Seconds to hold the lock before exiting
        #[arg(long, default_value = "10")]
        hold_secs: u64,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Location of the log file
pub fn get_log_path() -> PathBuf {
    debug!("get_log_path: called");
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("singleapp")
        .join("logs")
        .join("singleapp.log")
}

/// Output format for reports
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        debug!(%s, "OutputFormat::from_str: called");
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use: text or json", s)),
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Text => write!(f, "text"),
            Self::Json => write!(f, "json"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_output_format_parse() {
        assert_eq!("json".parse::<OutputFormat>().unwrap(), OutputFormat::Json);
        assert_eq!("PLAIN".parse::<OutputFormat>().unwrap(), OutputFormat::Text);
        assert!("table".parse::<OutputFormat>().is_err());
    }

    #[test]
    fn test_parse_simulate_flags() {
        let cli = Cli::try_parse_from([
            "sa",
            "simulate",
            "-n",
            "5",
            "--stagger-ms",
            "20",
            "--no-tie-break",
            "--format",
            "json",
        ])
        .unwrap();

        match cli.command {
            Command::Simulate {
                instances,
                stagger_ms,
                window_ms,
                no_tie_break,
                rejoin,
                format,
                ..
            } => {
                assert_eq!(instances, 5);
                assert_eq!(stagger_ms, 20);
                assert_eq!(window_ms, None);
                assert!(no_tie_break);
                assert!(!rejoin);
                assert_eq!(format, OutputFormat::Json);
            }
            other => panic!("Expected Simulate, got {:?}", other),
        }
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["sa", "config", "-l", "debug"]).unwrap();
        assert_eq!(cli.log_level.as_deref(), Some("debug"));
        assert!(matches!(cli.command, Command::Config));
    }

    #[test]
    fn test_log_path_location() {
        assert!(get_log_path().ends_with("singleapp/logs/singleapp.log"));
    }
}
