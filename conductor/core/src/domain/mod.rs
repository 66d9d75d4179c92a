// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Domain Layer
//!
//! Pure domain types for the query pipeline. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`operation_tree`] | `OperationTree`, `OperationTreeError` |
//! | [`messages`] | role input/output records, `RoleResult` |
//! | [`query`] | `QueryId`, `LocalQuery`, `StackQuery`, `Query` aggregate |
//! | [`instance`] | `Instance`, `AddressBook` |
//! | [`aggregation`] | `AggregationJob`, `AggregationFunction`, `AggregationPatch` |
//! | [`cipher`] | `PayloadCipher` seam |
//! | [`events`] | `QueryEvent` |
//! | [`repository`] | `QueryRepository` |
//! | [`config`] | `DispersConfigManifest` |

pub mod operation_tree;
pub mod messages;
pub mod query;
pub mod instance;
pub mod aggregation;
pub mod cipher;
pub mod events;
pub mod repository;
pub mod config;
