// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Types
//!
//! Wire types exchanged with a Conductor. Query and registration messages
//! are the ones the Conductor itself deserializes.

use serde::{Deserialize, Serialize};

pub use dispers_core::domain::aggregation::{AggregationJob, Args, LayerDA};
pub use dispers_core::domain::instance::Instance;
pub use dispers_core::domain::messages::{InputNewQuery, InputSubscribe, QueryCreated};
pub use dispers_core::domain::operation_tree::OperationTree;
pub use dispers_core::domain::query::{FindParams, LocalQuery, QueryId, QueryStatus, QueryView};

/// Answer of `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Health {
    pub status: String,
    #[serde(default)]
    pub serves: Vec<String>,
}

/// Answer of `POST /conductor/subscribe`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Registered {
    pub registered: usize,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ErrorResponse {
    pub error: String,
}
