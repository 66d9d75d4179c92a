// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Application Layer (`dispers-core`)
//!
//! Use cases for the Conductor and the four processing roles. Every role is a
//! service trait with a `Standard*` in-process implementation; the HTTP
//! clients in `crate::infrastructure::role_client` implement the same traits
//! so the Conductor never knows where a role runs.
//!
//! | Module | Service | Role path |
//! |--------|---------|-----------|
//! | [`concept_indexer`] | `ConceptIndexerService` | `/conceptindexor` |
//! | [`target_finder`] | `TargetFinderService` | `/targetfinder` |
//! | [`target`] | `TargetService` | `/target` |
//! | [`data_aggregator`] | `DataAggregatorService` | `/dataaggregation` |
//! | [`conductor`] | `ConductorService` | `/conductor` |

pub mod role;
pub mod concept_indexer;
pub mod target_finder;
pub mod target;
pub mod data_aggregator;
pub mod conductor;

pub use concept_indexer::{ConceptHasher, ConceptIndexerService, Sha256ConceptHasher, StandardConceptIndexer};
pub use conductor::{ConductorError, ConductorService, RoleSet, StandardConductorService};
pub use data_aggregator::{DataAggregatorService, StandardDataAggregator};
pub use role::{ConductorCallback, RoleError};
pub use target::{StackClient, StackError, StandardTargetService, TargetService};
pub use target_finder::{StandardTargetFinder, TargetFinderService};
