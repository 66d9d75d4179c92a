// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

/// dispers Rust SDK
///
/// Submit queries to a Conductor, follow them and register instances.

pub mod client;
pub mod types;

pub use client::DispersClient;
pub use types::*;
