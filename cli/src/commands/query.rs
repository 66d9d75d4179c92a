// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Conductor query commands
//!
//! Commands: submit, status, cancel, subscribe

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::Colorize;
use std::time::Duration;
use tracing::info;

use dispers_sdk::{DispersClient, InputNewQuery, InputSubscribe, Instance, QueryId, QueryStatus, QueryView};

use super::read_json;

#[derive(Subcommand)]
pub enum QueryCommand {
    /// Submit a query to the Conductor
    Submit {
        /// Query document (JSON string or @file.json)
        #[arg(value_name = "QUERY")]
        query: String,

        /// Wait for the query to complete
        #[arg(short, long)]
        wait: bool,

        /// Give up waiting after this many seconds
        #[arg(long, default_value = "300")]
        timeout: u64,
    },

    /// Show the state of a query
    Status {
        #[arg(value_name = "QUERY_ID")]
        query_id: String,
    },

    /// Cancel a query
    Cancel {
        #[arg(value_name = "QUERY_ID")]
        query_id: String,
    },

    /// Register an instance under a set of concepts
    Subscribe {
        /// Instance domain, e.g. alice.example.org
        #[arg(long)]
        domain: String,

        /// Bearer token the instance issued for its data API
        #[arg(long, env = "DISPERS_INSTANCE_TOKEN")]
        token: String,

        /// Registration version; higher versions replace older ones
        #[arg(long, default_value = "1")]
        version: u64,

        /// Concepts the instance holds data for
        #[arg(long, value_delimiter = ',', required = true)]
        concepts: Vec<String>,
    },
}

pub async fn handle_command(command: QueryCommand, conductor_url: &str) -> Result<()> {
    let client = DispersClient::new(conductor_url);
    match command {
        QueryCommand::Submit { query, wait, timeout } => submit(&client, &query, wait, timeout).await,
        QueryCommand::Status { query_id } => {
            let view = client.get_query(&QueryId::from(query_id)).await?;
            print_view(&view)
        }
        QueryCommand::Cancel { query_id } => {
            client.cancel_query(&QueryId::from(query_id.as_str())).await?;
            println!("{}", format!("✓ Query {} cancelled", query_id).green());
            Ok(())
        }
        QueryCommand::Subscribe {
            domain,
            token,
            version,
            concepts,
        } => {
            let registered = client
                .subscribe(&InputSubscribe {
                    is_encrypted: false,
                    concepts,
                    enc_concepts: vec![],
                    instance: Instance::new(domain.clone(), token, version),
                })
                .await?;
            println!(
                "{}",
                format!("✓ {} registered under {} concept(s)", domain, registered).green()
            );
            Ok(())
        }
    }
}

async fn submit(client: &DispersClient, raw: &str, wait: bool, timeout: u64) -> Result<()> {
    let query: InputNewQuery =
        serde_json::from_value(read_json(raw)?).context("Invalid query document")?;

    info!(conductor = client.base_url(), "Submitting query");
    let query_id = client.submit_query(&query).await?;
    println!("{}", format!("✓ Query submitted: {}", query_id).green());

    if wait {
        println!("Waiting for completion...");
        let view = client
            .wait_for_query(&query_id, Duration::from_millis(500), Duration::from_secs(timeout))
            .await?;
        print_view(&view)?;
    }
    Ok(())
}

fn print_view(view: &QueryView) -> Result<()> {
    println!("Query {}", view.query_id);
    println!("  Status: {}", format_status(&view.status));
    match view.expected_targets {
        Some(expected) => println!("  Targets: {}/{}", view.reports_received, expected),
        None => println!("  Targets: resolving ({} early report(s))", view.pending_reports),
    }
    println!("  Created: {}", view.created_at);
    println!("  Updated: {}", view.updated_at);
    if let Some(error) = &view.error {
        println!("  Error: {}", error.red());
    }
    if let Some(results) = &view.results {
        println!("  Results:");
        println!("{}", serde_json::to_string_pretty(results)?);
    }
    Ok(())
}

fn format_status(status: &QueryStatus) -> colored::ColoredString {
    match status {
        QueryStatus::IndexingConcepts => "indexing concepts".yellow(),
        QueryStatus::ResolvingTargets => "resolving targets".yellow(),
        QueryStatus::CollectingData => "collecting data".yellow(),
        QueryStatus::Aggregating { stage } => format!("aggregating (stage {})", stage).cyan(),
        QueryStatus::Completed => "completed".green(),
        QueryStatus::Failed => "failed".red(),
    }
}
