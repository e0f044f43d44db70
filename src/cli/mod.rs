//! CLI argument parsing using clap.

mod config;

pub use config::{load_config, RunCliConfig};

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// selfheal - self-healing fault tolerance for the trading platform
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Set the verbosity level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    pub verbose: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true, default_value_t = false)]
    pub json_logs: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the self-healing loop until Ctrl-C
    Run {
        /// JSON configuration file; built-in defaults when absent
        #[arg(long)]
        config: Option<PathBuf>,
        /// Port for the /health and /metrics endpoint
        #[arg(long, default_value_t = 8080)]
        health_port: u16,
        /// Use simulated metrics and recovery steps
        #[arg(long, default_value_t = false)]
        sandbox: bool,
        /// CSV file recording sandbox recovery steps
        #[arg(long, requires = "sandbox")]
        journal: Option<PathBuf>,
    },

    /// Load and validate a configuration file
    CheckConfig {
        #[arg(long)]
        config: PathBuf,
    },

    /// Print the default configuration as JSON
    DefaultConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_arguments() {
        let cli = Cli::try_parse_from([
            "selfheal",
            "run",
            "--sandbox",
            "--health-port",
            "9090",
            "--verbose",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.verbose, "debug");
        match cli.command {
            Commands::Run {
                config,
                health_port,
                sandbox,
                journal,
            } => {
                assert!(config.is_none());
                assert_eq!(health_port, 9090);
                assert!(sandbox);
                assert!(journal.is_none());
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_journal_requires_sandbox() {
        assert!(Cli::try_parse_from(["selfheal", "run", "--journal", "steps.csv"]).is_err());
    }

    #[test]
    fn test_check_config_requires_path() {
        assert!(Cli::try_parse_from(["selfheal", "check-config"]).is_err());
        assert!(Cli::try_parse_from(["selfheal", "default-config"]).is_ok());
    }
}
