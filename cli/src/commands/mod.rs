// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Command implementations for the dispers CLI

pub mod config;
pub mod query;
pub mod tree;

pub use self::config::ConfigCommand;
pub use self::query::QueryCommand;
pub use self::tree::TreeCommand;

use anyhow::{Context, Result};
use serde_json::Value;

/// Parse a JSON argument given inline or as `@path`.
pub(crate) fn read_json(raw: &str) -> Result<Value> {
    match raw.strip_prefix('@') {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read input file: {}", path))?;
            serde_json::from_str(&content).context("Failed to parse input JSON")
        }
        None => serde_json::from_str(raw).context("Failed to parse input JSON"),
    }
}
