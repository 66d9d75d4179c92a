// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `dispers-core`
//!
//! Conductor, processing roles and target-resolution algebra for the dispers
//! privacy-preserving query pipeline.
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `OperationTree`, wire messages, `Query` aggregate, address book |
//! | [`application`] | Application | Concept Indexer, Target Finder, Target, Data Aggregator, Conductor services |
//! | [`infrastructure`] | Infrastructure | event bus, in-memory stores, HTTP role/stack/callback clients |
//! | [`presentation`] | Presentation | Axum routers for the conductor and every role |

pub mod domain;
pub mod application;
pub mod infrastructure;
pub mod presentation;

pub use domain::*;
