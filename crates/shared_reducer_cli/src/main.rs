//! Shared Reducer CLI
//!
//! Command-line client for resources served over the shared reducer
//! protocol, using the field set/add algebra.
//!
//! # Commands
//!
//! - `watch` - Print every state observed on a resource
//! - `apply` - Apply one delta and print the confirmed state

mod commands;

use clap::{Parser, Subcommand};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Shared reducer command-line client.
#[derive(Parser)]
#[command(name = "shared-reducer")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Auth token sent as the first frame
    #[arg(global = true, short, long)]
    token: Option<String>,

    /// Keepalive interval in milliseconds
    #[arg(global = true, long, default_value = "20000")]
    ping_interval: u64,

    /// Pretty-print JSON output
    #[arg(global = true, short, long)]
    pretty: bool,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print every state observed on a resource
    Watch {
        /// WebSocket URL of the resource
        url: String,

        /// Stop after this many states
        #[arg(short, long)]
        count: Option<usize>,
    },

    /// Apply one delta and print the confirmed state
    Apply {
        /// WebSocket URL of the resource
        url: String,

        /// Delta as JSON, e.g. '{"bar": ["+", 5]}'
        delta: String,

        /// Seconds to wait for confirmation
        #[arg(long, default_value = "30")]
        timeout: u64,
    },
}

impl Cli {
    fn options(&self) -> commands::Options {
        commands::Options {
            token: self.token.clone(),
            ping_interval: Duration::from_millis(self.ping_interval),
            pretty: self.pretty,
        }
    }
}

// The reducer batches per turn of a current-thread runtime.
#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let options = cli.options();

    match cli.command {
        Commands::Watch { url, count } => {
            commands::watch::run(&url, count, &options).await?;
        }
        Commands::Apply {
            url,
            delta,
            timeout,
        } => {
            commands::apply::run(&url, &delta, Duration::from_secs(timeout), &options).await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_interval_is_in_milliseconds() {
        let cli =
            Cli::try_parse_from(["shared-reducer", "--ping-interval", "250", "watch", "ws://h/a"])
                .unwrap();
        assert_eq!(cli.options().ping_interval, Duration::from_millis(250));

        let cli = Cli::try_parse_from(["shared-reducer", "watch", "ws://h/a"]).unwrap();
        assert_eq!(
            cli.options().ping_interval,
            shared_reducer::protocol::DEFAULT_PING_INTERVAL
        );
    }
}
