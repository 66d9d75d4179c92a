// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # dispers node CLI
//!
//! The `dispers` binary runs a dispers node and talks to a running Conductor.
//!
//! ## Commands
//!
//! - `dispers serve` - Run the Conductor and/or roles configured for this node
//! - `dispers query submit|status|cancel|subscribe` - Conductor client operations
//! - `dispers tree show|eval` - Inspect and evaluate target profiles offline
//! - `dispers config show|validate|generate` - Configuration management

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use tracing::info;

use dispers_conductor::commands::{self, ConfigCommand, QueryCommand, TreeCommand};
use dispers_conductor::node;
use dispers_core::domain::config::DispersConfigManifest;

/// dispers node - privacy-preserving distributed queries
#[derive(Parser)]
#[command(name = "dispers")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(
        short,
        long,
        global = true,
        env = "DISPERS_CONFIG_PATH",
        value_name = "FILE"
    )]
    config: Option<PathBuf>,

    /// HTTP API port (overrides spec.network.port)
    #[arg(long, global = true, env = "DISPERS_PORT")]
    port: Option<u16>,

    /// HTTP API host (overrides spec.network.bind_address)
    #[arg(long, global = true, env = "DISPERS_HOST")]
    host: Option<String>,

    /// Conductor used by `query` commands (default: http://<host>:<port>)
    #[arg(long, global = true, env = "DISPERS_CONDUCTOR_URL")]
    conductor_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "DISPERS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Log format (compact, json)
    #[arg(long, global = true, env = "DISPERS_LOG_FORMAT", default_value = "compact")]
    log_format: String,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run this node's HTTP server
    #[command(name = "serve")]
    Serve,

    /// Conductor query operations
    #[command(name = "query")]
    Query {
        #[command(subcommand)]
        command: QueryCommand,
    },

    /// Target profile tools
    #[command(name = "tree")]
    Tree {
        #[command(subcommand)]
        command: TreeCommand,
    },

    /// Configuration management
    #[command(name = "config")]
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is fine
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level, &cli.log_format)?;

    match cli.command {
        Some(Commands::Serve) => {
            let mut config = DispersConfigManifest::load_or_default(cli.config)
                .context("Failed to load configuration")?;
            if let Some(host) = cli.host {
                config.spec.network.bind_address = host;
            }
            if let Some(port) = cli.port {
                config.spec.network.port = port;
            }
            info!("Starting dispers node {}", config.spec.node.id);
            node::serve(config).await
        }
        Some(Commands::Query { command }) => {
            let conductor_url = match cli.conductor_url {
                Some(url) => url,
                None => format!(
                    "http://{}:{}",
                    cli.host.as_deref().unwrap_or("127.0.0.1"),
                    cli.port.unwrap_or(8000)
                ),
            };
            commands::query::handle_command(command, &conductor_url).await
        }
        Some(Commands::Tree { command }) => commands::tree::handle_command(command).await,
        Some(Commands::Config { command }) => {
            commands::config::handle_command(command, cli.config).await
        }
        None => {
            eprintln!("{}", "No command specified. Use --help for usage.".yellow());
            std::process::exit(1);
        }
    }
}

/// Initialize tracing subscriber for logging
fn init_logging(level: &str, format: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Failed to create log filter")?;

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if format == "json" {
        builder.json().init();
    } else {
        builder.compact().init();
    }

    Ok(())
}
