// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Presentation Layer (`dispers-core`)
//!
//! HTTP surface that translates external requests into application service
//! calls. **No business logic lives here**: all real work is delegated to
//! services in `crate::application`.
//!
//! | Router | Prefix | Description |
//! |--------|--------|-------------|
//! | [`api::conductor_router`] | `/conductor` | submit, inspect, patch, cancel queries; subscribe instances |
//! | [`api::concept_indexer_router`] | `/conceptindexor` | concept hashing |
//! | [`api::target_finder_router`] | `/targetfinder` | target resolution |
//! | [`api::target_router`] | `/target` | local query fan-out |
//! | [`api::data_aggregator_router`] | `/dataaggregation` | aggregation stages |

pub mod api;

pub use api::{app, ApiError, NodeServices};
