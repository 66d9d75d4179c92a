// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Query Domain Model
//!
//! Identifiers and per-instance work units, plus the [`Query`] aggregate the
//! Conductor keeps to correlate every message of one end-to-end query.
//!
//! # Invariants
//!
//! - A query id is unique per query and stable for its whole lifetime.
//! - Target reports received before the expected target count is known are
//!   queued, never dropped.
//! - Completion is decided by counts and aggregation slots, not by arrival
//!   order.
//! - An aggregation slot is written at most once.

use crate::domain::aggregation::{AggregationId, AggregationJob, LayerDA};
use crate::domain::instance::Instance;
use crate::domain::messages::{Concept, OutputDA, OutputT, Row};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;
use url::Url;
use uuid::Uuid;

// ============================================================================
// Value Objects
// ============================================================================

/// Correlates all messages belonging to one end-to-end query.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryId(String);

impl QueryId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for QueryId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for QueryId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for QueryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Mango find request run by a target instance. Follows CouchDB conventions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FindParams {
    #[serde(default)]
    pub selector: Map<String, Value>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub skip: usize,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub limit: usize,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sort: Vec<HashMap<String, String>>,
}

/// Describes which data a target instance has to retrieve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LocalQuery {
    #[serde(rename = "findrequest", default)]
    pub find_request: FindParams,
    #[serde(default)]
    pub doctype: String,
    #[serde(default)]
    pub index: Map<String, Value>,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub limit: usize,
}

fn is_zero(value: &usize) -> bool {
    *value == 0
}

/// Everything needed to run a local query against one instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackQuery {
    pub domain: String,
    pub local_query: LocalQuery,
    pub token_bearer: String,
    pub is_encrypted: bool,
    pub conductor_url: Url,
    #[serde(rename = "queryid")]
    pub query_id: QueryId,
    #[serde(rename = "number_targets")]
    pub number_of_targets: usize,
}

pub fn build_stack_query(
    number_of_targets: usize,
    conductor_url: Url,
    query_id: QueryId,
    instance: &Instance,
    local_query: LocalQuery,
    is_encrypted: bool,
) -> StackQuery {
    StackQuery {
        domain: instance.domain.clone(),
        local_query,
        token_bearer: instance.token_bearer.clone(),
        is_encrypted,
        conductor_url,
        query_id,
        number_of_targets,
    }
}

/// Splits rows into `branches` contiguous chunks whose sizes differ by at
/// most one. Chunks are empty when there are fewer rows than branches.
pub fn split_into_branches(rows: Vec<Row>, branches: usize) -> Vec<Vec<Row>> {
    let branches = branches.max(1);
    let base = rows.len() / branches;
    let extra = rows.len() % branches;
    let mut rows = rows.into_iter();
    (0..branches)
        .map(|i| {
            let take = base + usize::from(i < extra);
            rows.by_ref().take(take).collect()
        })
        .collect()
}

// ============================================================================
// Aggregate Root: Query
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueryStatus {
    IndexingConcepts,
    ResolvingTargets,
    CollectingData,
    Aggregating { stage: usize },
    Completed,
    Failed,
}

impl QueryStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryError {
    #[error("a query needs at least one aggregation layer")]
    NoLayers,

    #[error("aggregation layer {0} must have at least one branch")]
    EmptyLayer(usize),

    #[error("the last aggregation layer must have exactly one branch, found {0}")]
    FinalLayerNotSingle(usize),

    #[error("query {0} is already closed")]
    Closed(QueryId),

    #[error("target count for query {0} is already known")]
    TargetCountAlreadySet(QueryId),

    #[error("query {query_id} expected {expected} target reports, received one more")]
    TooManyTargetReports { query_id: QueryId, expected: usize },

    #[error("aggregation id {0} is outside the pipeline")]
    UnknownAggregationSlot(AggregationId),

    #[error("aggregation id {0} was already reported")]
    DuplicateAggregation(AggregationId),

    #[error("aggregation id {id} reported while stage {current} is running")]
    StageNotRunning { id: AggregationId, current: usize },
}

/// Outcome of recording target reports.
#[derive(Debug, Clone, PartialEq)]
pub enum TargetProgress {
    /// Count still unknown; the report waits in the queue.
    Queued { pending: usize },
    Collecting { received: usize, expected: usize },
    /// Every report is in; the collected rows start stage 0.
    Complete { rows: Vec<Row> },
}

/// Outcome of recording one aggregation output.
#[derive(Debug, Clone, PartialEq)]
pub enum StageProgress {
    Waiting { stage: usize, remaining: usize },
    /// Stage done; its branch results feed the next stage.
    StageComplete { next_stage: usize, rows: Vec<Row> },
    QueryComplete { results: Map<String, Value> },
}

/// Correlation state for one query.
#[derive(Debug, Clone)]
pub struct Query {
    pub id: QueryId,
    pub status: QueryStatus,
    pub is_encrypted: bool,
    layers: Vec<LayerDA>,
    concepts: Vec<Concept>,
    expected_targets: Option<usize>,
    reports_received: usize,
    pending_reports: Vec<OutputT>,
    rows: Vec<Row>,
    stage_slots: Vec<Vec<Option<Map<String, Value>>>>,
    results: Option<Map<String, Value>>,
    error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Query {
    /// Create a query with validated aggregation layers.
    pub fn new(id: QueryId, is_encrypted: bool, layers: Vec<LayerDA>) -> Result<Self, QueryError> {
        if layers.is_empty() {
            return Err(QueryError::NoLayers);
        }
        if let Some(index) = layers.iter().position(|layer| layer.size == 0) {
            return Err(QueryError::EmptyLayer(index));
        }
        let last = layers.last().map(|layer| layer.size).unwrap_or_default();
        if last != 1 {
            return Err(QueryError::FinalLayerNotSingle(last));
        }

        let stage_slots = layers.iter().map(|layer| vec![None; layer.size]).collect();
        let now = Utc::now();
        Ok(Self {
            id,
            status: QueryStatus::IndexingConcepts,
            is_encrypted,
            layers,
            concepts: Vec::new(),
            expected_targets: None,
            reports_received: 0,
            pending_reports: Vec::new(),
            rows: Vec::new(),
            stage_slots,
            results: None,
            error: None,
            created_at: now,
            updated_at: now,
        })
    }

    pub fn layers(&self) -> &[LayerDA] {
        &self.layers
    }

    pub fn layer_jobs(&self, stage: usize) -> Option<(&[AggregationJob], &[u8])> {
        self.layers
            .get(stage)
            .map(|layer| (layer.jobs.as_slice(), layer.encrypted_jobs.as_slice()))
    }

    pub fn concepts(&self) -> &[Concept] {
        &self.concepts
    }

    pub fn expected_targets(&self) -> Option<usize> {
        self.expected_targets
    }

    pub fn reports_received(&self) -> usize {
        self.reports_received
    }

    pub fn pending_reports(&self) -> usize {
        self.pending_reports.len()
    }

    pub fn results(&self) -> Option<&Map<String, Value>> {
        self.results.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    pub fn record_concepts(&mut self, concepts: Vec<Concept>) -> Result<(), QueryError> {
        self.ensure_open()?;
        self.concepts = concepts;
        self.transition(QueryStatus::ResolvingTargets);
        Ok(())
    }

    /// Fix the number of target reports to wait for and drain any report
    /// that arrived early.
    pub fn set_expected_targets(&mut self, expected: usize) -> Result<TargetProgress, QueryError> {
        self.ensure_open()?;
        if self.expected_targets.is_some() {
            return Err(QueryError::TargetCountAlreadySet(self.id.clone()));
        }
        self.expected_targets = Some(expected);
        self.transition(QueryStatus::CollectingData);

        let queued = std::mem::take(&mut self.pending_reports);
        let mut progress = self.collecting_progress(expected);
        for report in queued {
            progress = self.accept_report(report, expected)?;
        }
        Ok(progress)
    }

    pub fn record_target_report(&mut self, report: OutputT) -> Result<TargetProgress, QueryError> {
        self.ensure_open()?;
        match self.expected_targets {
            None => {
                self.pending_reports.push(report);
                self.updated_at = Utc::now();
                Ok(TargetProgress::Queued {
                    pending: self.pending_reports.len(),
                })
            }
            Some(expected) => self.accept_report(report, expected),
        }
    }

    fn accept_report(&mut self, report: OutputT, expected: usize) -> Result<TargetProgress, QueryError> {
        if self.reports_received >= expected {
            return Err(QueryError::TooManyTargetReports {
                query_id: self.id.clone(),
                expected,
            });
        }
        self.reports_received += 1;
        self.rows.extend(report.data);
        self.updated_at = Utc::now();
        Ok(self.collecting_progress(expected))
    }

    fn collecting_progress(&mut self, expected: usize) -> TargetProgress {
        if self.reports_received == expected {
            self.transition(QueryStatus::Aggregating { stage: 0 });
            TargetProgress::Complete {
                rows: std::mem::take(&mut self.rows),
            }
        } else {
            TargetProgress::Collecting {
                received: self.reports_received,
                expected,
            }
        }
    }

    /// Store one aggregator output in its slot.
    pub fn record_aggregation(&mut self, output: OutputDA) -> Result<StageProgress, QueryError> {
        self.ensure_open()?;
        let id = output.aggregation_id;
        let current = match self.status {
            QueryStatus::Aggregating { stage } => stage,
            _ => return Err(QueryError::StageNotRunning { id, current: 0 }),
        };
        if id.stage != current {
            return Err(if id.stage < self.stage_slots.len() {
                QueryError::StageNotRunning { id, current }
            } else {
                QueryError::UnknownAggregationSlot(id)
            });
        }
        let slot = self
            .stage_slots
            .get_mut(id.stage)
            .and_then(|branches| branches.get_mut(id.branch))
            .ok_or(QueryError::UnknownAggregationSlot(id))?;
        if slot.is_some() {
            return Err(QueryError::DuplicateAggregation(id));
        }
        *slot = Some(output.results);
        self.updated_at = Utc::now();

        let branches = &self.stage_slots[id.stage];
        let remaining = branches.iter().filter(|slot| slot.is_none()).count();
        if remaining > 0 {
            return Ok(StageProgress::Waiting {
                stage: id.stage,
                remaining,
            });
        }

        let rows: Vec<Row> = branches.iter().flatten().cloned().collect();
        let next_stage = id.stage + 1;
        if next_stage == self.layers.len() {
            let results = rows.into_iter().next().unwrap_or_default();
            self.results = Some(results.clone());
            self.transition(QueryStatus::Completed);
            Ok(StageProgress::QueryComplete { results })
        } else {
            self.transition(QueryStatus::Aggregating { stage: next_stage });
            Ok(StageProgress::StageComplete { next_stage, rows })
        }
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.error = Some(reason.into());
        self.transition(QueryStatus::Failed);
    }

    pub fn view(&self) -> QueryView {
        QueryView {
            query_id: self.id.clone(),
            status: self.status,
            expected_targets: self.expected_targets,
            reports_received: self.reports_received,
            pending_reports: self.pending_reports.len(),
            results: self.results.clone(),
            error: self.error.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    fn ensure_open(&self) -> Result<(), QueryError> {
        if self.status.is_terminal() {
            Err(QueryError::Closed(self.id.clone()))
        } else {
            Ok(())
        }
    }

    fn transition(&mut self, status: QueryStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}

/// Read model returned to queriers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryView {
    #[serde(rename = "queryid")]
    pub query_id: QueryId,
    pub status: QueryStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_targets: Option<usize>,
    pub reports_received: usize,
    pub pending_reports: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
