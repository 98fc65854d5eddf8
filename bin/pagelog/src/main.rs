//! Page-view log pipeline.
//!
//! Streams raw page-view events into partitioned structured storage, quarantining anything malformed, and aggregates
//! committed partitions into per-page timing metrics.

#![deny(warnings)]

use clap::Parser as _;
use pagelog_app::prelude::*;
use tracing::error;

mod cli;
use self::cli::{aggregate::handle_aggregate_command, config::handle_config_command, stream::handle_stream_command};

mod config;
use self::config::{load_configuration, Action, Cli};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let configuration = load_configuration(cli.config_file.as_deref())
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to load configuration: {:#}", e)));

    // Print configuration without log noise around it.
    if let Action::Config = cli.action {
        if let Err(e) = handle_config_command(&configuration) {
            fatal_and_exit(format!("invalid configuration: {:#}", e));
        }
        return;
    }

    let logging_config = LoggingConfiguration::from_configuration(&configuration)
        .unwrap_or_else(|e| fatal_and_exit(format!("invalid logging configuration: {}", e)));
    let logging_guard = initialize_logging(&logging_config, env!("CARGO_PKG_NAME"))
        .unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize logging: {:#}", e)));

    let metrics = initialize_metrics().unwrap_or_else(|e| fatal_and_exit(format!("failed to initialize metrics: {}", e)));

    let result = match cli.action {
        Action::Stream(command) => handle_stream_command(&configuration, command).await,
        Action::Aggregate(command) => handle_aggregate_command(&configuration, command).await,
        Action::Config => Ok(()),
    };

    metrics.log_summary();

    if let Err(e) = result {
        error!("{:?}", e);
        drop(logging_guard);
        std::process::exit(1);
    }
}
