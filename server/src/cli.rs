//! Command-line interface for `specforged`.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Scrape job orchestration daemon.
#[derive(Parser, Debug)]
#[command(author, version, about = "Specforge scrape job daemon", long_about = None)]
pub struct Cli {
    /// Path to config.toml (defaults to the platform config directory)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// What to run; `serve` when omitted
    #[command(subcommand)]
    pub command: Option<Command>,
}

/// Daemon subcommands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Run the worker pool, the reaper and the protocol gateway
    Serve,
    /// Run normalization passes over the cache and exit
    Normalize {
        /// Run only this pass (e.g. `pipe-delimited-arrays`)
        #[arg(long)]
        pass: Option<String>,
    },
    /// Release dead claims and requeue stale jobs once, then exit
    Reap,
}

impl Cli {
    /// The subcommand to run.
    #[must_use]
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Serve)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_to_serve() {
        let cli = Cli::parse_from(["specforged"]);
        assert_eq!(cli.command(), Command::Serve);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_normalize_with_pass() {
        let cli = Cli::parse_from([
            "specforged",
            "normalize",
            "--pass",
            "double-encoded-json",
            "--config",
            "/etc/specforge.toml",
        ]);
        assert_eq!(
            cli.command(),
            Command::Normalize {
                pass: Some("double-encoded-json".to_string())
            }
        );
        assert_eq!(cli.config, Some(PathBuf::from("/etc/specforge.toml")));
    }

    #[test]
    fn test_reap() {
        let cli = Cli::parse_from(["specforged", "reap"]);
        assert_eq!(cli.command(), Command::Reap);
    }
}
