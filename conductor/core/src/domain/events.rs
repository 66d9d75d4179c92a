// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::domain::aggregation::AggregationId;
use crate::domain::query::QueryId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of one query through the pipeline, published by the Conductor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum QueryEvent {
    QueryCreated {
        query_id: QueryId,
        is_encrypted: bool,
        created_at: DateTime<Utc>,
    },
    ConceptsIndexed {
        query_id: QueryId,
        concept_count: usize,
        indexed_at: DateTime<Utc>,
    },
    TargetsResolved {
        query_id: QueryId,
        target_count: usize,
        resolved_at: DateTime<Utc>,
    },
    TargetReported {
        query_id: QueryId,
        received: usize,
        expected: Option<usize>,
        reported_at: DateTime<Utc>,
    },
    AggregationReported {
        query_id: QueryId,
        aggregation_id: AggregationId,
        reported_at: DateTime<Utc>,
    },
    StageStarted {
        query_id: QueryId,
        stage: usize,
        branches: usize,
        started_at: DateTime<Utc>,
    },
    QueryCompleted {
        query_id: QueryId,
        completed_at: DateTime<Utc>,
    },
    QueryFailed {
        query_id: QueryId,
        reason: String,
        failed_at: DateTime<Utc>,
    },
    QueryCancelled {
        query_id: QueryId,
        cancelled_at: DateTime<Utc>,
    },
}

impl QueryEvent {
    pub fn query_id(&self) -> &QueryId {
        match self {
            Self::QueryCreated { query_id, .. }
            | Self::ConceptsIndexed { query_id, .. }
            | Self::TargetsResolved { query_id, .. }
            | Self::TargetReported { query_id, .. }
            | Self::AggregationReported { query_id, .. }
            | Self::StageStarted { query_id, .. }
            | Self::QueryCompleted { query_id, .. }
            | Self::QueryFailed { query_id, .. }
            | Self::QueryCancelled { query_id, .. } => query_id,
        }
    }

    /// Whether no further event will follow for this query.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::QueryCompleted { .. } | Self::QueryFailed { .. } | Self::QueryCancelled { .. }
        )
    }
}
