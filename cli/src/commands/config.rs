// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Configuration management commands
//!
//! Commands: show, validate, generate

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::path::PathBuf;

use dispers_core::domain::config::DispersConfigManifest;
use dispers_core::domain::messages::RoleKind;

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Show current configuration
    Show {
        /// Show config file paths checked
        #[arg(long)]
        paths: bool,
    },

    /// Validate configuration file
    Validate {
        /// Path to config file (default: discover)
        #[arg(value_name = "FILE")]
        file: Option<PathBuf>,
    },

    /// Generate sample configuration
    Generate {
        /// Output path (default: ./dispers-config.yaml)
        #[arg(short, long, default_value = "./dispers-config.yaml")]
        output: PathBuf,

        /// Node identifier written to the file
        #[arg(long, default_value = "dispers-node")]
        node_id: String,
    },
}

pub async fn handle_command(
    command: ConfigCommand,
    config_override: Option<PathBuf>,
) -> Result<()> {
    match command {
        ConfigCommand::Show { paths } => show(config_override, paths).await,
        ConfigCommand::Validate { file } => validate(file.or(config_override)).await,
        ConfigCommand::Generate { output, node_id } => generate(output, node_id).await,
    }
}

async fn show(config_override: Option<PathBuf>, show_paths: bool) -> Result<()> {
    let config = DispersConfigManifest::load_or_default(config_override.clone())
        .context("Failed to load configuration")?;

    if show_paths {
        println!("{}", "Configuration discovery paths:".bold());
        if let Some(path) = &config_override {
            println!("  1. --config flag: {}", path.display());
        } else {
            println!("  1. --config flag: {}", "(not set)".dimmed());
        }
        println!(
            "  2. DISPERS_CONFIG_PATH: {}",
            std::env::var("DISPERS_CONFIG_PATH")
                .unwrap_or_else(|_| "(not set)".to_string())
                .dimmed()
        );
        println!("  3. ./dispers-config.yaml");
        println!("  4. ~/.dispers/config.yaml");
        println!("  5. /etc/dispers/config.yaml");
        println!();
    }

    println!("{}", "Current configuration:".bold());
    println!();

    let spec = &config.spec;
    println!("{}", "Node Identity:".bold());
    println!("  ID: {}", spec.node.id);
    println!("  Conductor: {}", if spec.node.conductor { "yes" } else { "no" });
    println!();

    println!("{}", "Network:".bold());
    println!("  Listen: {}:{}", spec.network.bind_address, spec.network.port);
    match config.public_url() {
        Ok(url) => println!("  Public URL: {}", url),
        Err(e) => println!("  Public URL: {}", e.to_string().red()),
    }
    println!();

    println!("{}", "Roles:".bold());
    for role in RoleKind::ALL {
        let placement = if spec.node.roles.contains(&role) {
            "in-process".green()
        } else {
            "not served".dimmed()
        };
        match spec.roles.get(role) {
            Some(endpoint) => println!("  {:<16} {} (conductor uses {})", role.as_str(), placement, endpoint),
            None => println!("  {:<16} {}", role.as_str(), placement),
        }
    }
    println!();

    println!("{}", "Target:".bold());
    println!("  Stack scheme: {}", spec.target.stack_scheme);
    println!("  Request timeout: {}s", spec.target.request_timeout_secs);
    println!(
        "  Hash salt: {}",
        if spec.concept_indexer.salt.is_empty() { "(empty)" } else { "(set)" }
    );
    println!();

    Ok(())
}

async fn validate(config_path: Option<PathBuf>) -> Result<()> {
    println!("Validating configuration...");

    let config = DispersConfigManifest::load_or_default(config_path)
        .context("Failed to load configuration")?;

    config
        .validate()
        .context("Configuration validation failed")?;

    println!("{}", "✓ Configuration is valid".green());

    Ok(())
}

async fn generate(output: PathBuf, node_id: String) -> Result<()> {
    let mut config = DispersConfigManifest::default();
    config.metadata.name = node_id.clone();
    config.spec.node.id = node_id;

    config
        .to_yaml_file(&output)
        .with_context(|| format!("Failed to write config to {:?}", output))?;

    println!(
        "{}",
        format!("✓ Configuration generated: {}", output.display()).green()
    );

    Ok(())
}
