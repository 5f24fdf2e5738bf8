//! countdown - runs the countdown video pipeline against the record table
//!
//! Each pass picks one pending record, generates the script, products,
//! media and video, archives the assets and publishes to every configured
//! platform.

mod commands;
mod output;

use std::{path::PathBuf, time::Duration};

use anyhow::Result;
use clap::{Parser, Subcommand};

/// Countdown video pipeline
#[derive(Parser)]
#[command(name = "countdown")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Turn pending records into published countdown videos")]
#[command(long_about = r#"
Runs the countdown video pipeline: script, products, affiliate links,
images and voice, render, archive and publish, with every result written
back to the record table.

Examples:
  countdown                              # Process the next pending record
  countdown run --loop --interval 30     # Keep going until the queue is empty
  countdown run --record recXXXXXXXXXXXXXX
  countdown status recXXXXXXXXXXXXXX
  countdown link --asin B07GBZ4Q68 --tag mytag-20
"#)]
struct Cli {
    /// Config file (defaults to ~/.countdown/config.json)
    #[arg(short, long, env = "COUNTDOWN_CONFIG", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Process pending records (default)
    Run {
        /// Reprocess this record instead of the next pending one
        #[arg(short, long)]
        record: Option<String>,

        /// Keep running passes until no pending record remains
        #[arg(long = "loop", conflicts_with = "record")]
        repeat: bool,

        /// Seconds to wait between passes with --loop
        #[arg(short, long, default_value = "0")]
        interval: u64,
    },

    /// Show a record
    Status {
        /// Record ID
        id: String,
    },

    /// Configuration management
    #[command(arg_required_else_help = true)]
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },

    /// Print an affiliate link
    Link {
        /// Product ASIN
        #[arg(long, conflicts_with = "url")]
        asin: Option<String>,

        /// Product URL
        #[arg(long)]
        url: Option<String>,

        /// Associate tag (defaults to affiliate.tag from the config)
        #[arg(long)]
        tag: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::logging::init(cli.verbose, cli.json_logs);

    let config_path = utils::paths::config_path(cli.config);
    tracing::debug!("Using config {}", config_path.display());

    match cli.command {
        None => {
            commands::run(&config_path, None, false, Duration::ZERO).await?;
        }
        Some(Commands::Run {
            record,
            repeat,
            interval,
        }) => {
            commands::run(
                &config_path,
                record.as_deref(),
                repeat,
                Duration::from_secs(interval),
            )
            .await?;
        }
        Some(Commands::Status { id }) => {
            commands::status(&config_path, &id).await?;
        }
        Some(Commands::Config { show }) => {
            if show {
                commands::show_config(&config_path)?;
            }
        }
        Some(Commands::Link { asin, url, tag }) => {
            commands::link(&config_path, asin.as_deref(), url.as_deref(), tag.as_deref())?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_flags() {
        let cli = Cli::parse_from(["countdown", "run", "--loop", "--interval", "30"]);
        match cli.command {
            Some(Commands::Run {
                record,
                repeat,
                interval,
            }) => {
                assert!(record.is_none());
                assert!(repeat);
                assert_eq!(interval, 30);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_loop_conflicts_with_record() {
        assert!(Cli::try_parse_from(["countdown", "run", "--loop", "--record", "rec1"]).is_err());
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::parse_from(["countdown", "status", "rec1", "--verbose", "--json-logs"]);
        assert!(cli.verbose);
        assert!(cli.json_logs);
    }

    #[test]
    fn test_config_requires_show() {
        let err = Cli::try_parse_from(["countdown", "config"]).err().unwrap();
        assert_eq!(
            err.kind(),
            clap::error::ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
        );

        let cli = Cli::parse_from(["countdown", "config", "--show"]);
        assert!(matches!(cli.command, Some(Commands::Config { show: true })));
    }
}
