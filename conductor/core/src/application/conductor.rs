// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Conductor
//!
//! Orchestrates one query end to end and correlates every message by query
//! id:
//!
//! 1. the Concept Indexer hashes the query's concepts;
//! 2. the Address Book yields the instances registered under each hash;
//! 3. the Target Finder resolves the target profile into target addresses;
//! 4. the Target role fans out and answers with the number of targets it
//!    queried, which becomes the query's expected report count;
//! 5. target reports arrive through [`ConductorService::patch`]; once all are
//!    in, the rows feed stage 0 of the aggregation pipeline;
//! 6. each stage's branch results feed the next stage; the single branch of
//!    the last stage holds the query results.
//!
//! Steps 1 to 4 run in a background task so submitting a query returns its id
//! immediately. Any failure marks the query failed and publishes
//! `QueryFailed`.

use crate::application::concept_indexer::ConceptIndexerService;
use crate::application::data_aggregator::DataAggregatorService;
use crate::application::role::RoleError;
use crate::application::target::TargetService;
use crate::application::target_finder::TargetFinderService;
use crate::domain::aggregation::AggregationId;
use crate::domain::cipher::{seal_json, CipherError, PayloadCipher};
use crate::domain::events::QueryEvent;
use crate::domain::instance::RegistrationOutcome;
use crate::domain::messages::{
    Concept, InputCI, InputDA, InputNewQuery, InputSubscribe, InputT, InputTF, OutputCI, OutputDA,
    OutputT, PatchError, RoleKind, RoleResult, Row, TaskMetadata,
};
use crate::domain::query::{
    split_into_branches, Query, QueryError, QueryId, QueryView, StageProgress, TargetProgress,
};
use crate::domain::repository::{InstanceRepository, QueryRepository, RepositoryError};
use crate::infrastructure::event_bus::EventBus;
use async_trait::async_trait;
use chrono::Utc;
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum ConductorError {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error(transparent)]
    Patch(#[from] PatchError),

    #[error(transparent)]
    Cipher(#[from] CipherError),

    #[error("{role} failed: {source}")]
    Role {
        role: RoleKind,
        #[source]
        source: RoleError,
    },

    #[error("patch for query {body} sent to query {path}")]
    QueryMismatch { path: QueryId, body: QueryId },
}

impl From<QueryError> for ConductorError {
    fn from(e: QueryError) -> Self {
        Self::Repository(RepositoryError::Query(e))
    }
}

fn role_error(role: RoleKind) -> impl FnOnce(RoleError) -> ConductorError {
    move |source| ConductorError::Role { role, source }
}

#[async_trait]
pub trait ConductorService: Send + Sync {
    async fn new_query(&self, input: InputNewQuery) -> Result<QueryId, ConductorError>;
    async fn patch(&self, id: &QueryId, result: RoleResult) -> Result<(), ConductorError>;
    async fn get_query(&self, id: &QueryId) -> Result<QueryView, ConductorError>;
    async fn cancel_query(&self, id: &QueryId) -> Result<(), ConductorError>;
    async fn subscribe(&self, input: InputSubscribe) -> Result<Vec<RegistrationOutcome>, ConductorError>;
}

/// The four processing roles, in-process or remote.
#[derive(Clone)]
pub struct RoleSet {
    pub concept_indexer: Arc<dyn ConceptIndexerService>,
    pub target_finder: Arc<dyn TargetFinderService>,
    pub target: Arc<dyn TargetService>,
    pub data_aggregator: Arc<dyn DataAggregatorService>,
}

#[derive(Clone)]
pub struct StandardConductorService {
    queries: Arc<dyn QueryRepository>,
    instances: Arc<dyn InstanceRepository>,
    roles: RoleSet,
    cipher: Arc<dyn PayloadCipher>,
    event_bus: Arc<EventBus>,
    conductor_url: Url,
}

impl StandardConductorService {
    pub fn new(
        queries: Arc<dyn QueryRepository>,
        instances: Arc<dyn InstanceRepository>,
        roles: RoleSet,
        cipher: Arc<dyn PayloadCipher>,
        event_bus: Arc<EventBus>,
        conductor_url: Url,
    ) -> Self {
        Self {
            queries,
            instances,
            roles,
            cipher,
            event_bus,
            conductor_url,
        }
    }

    fn validate(input: &InputNewQuery) -> Result<(), ConductorError> {
        let missing = |field: &str| Err(ConductorError::InvalidQuery(format!("missing {field}")));
        if input.is_encrypted {
            if input.enc_concepts.is_empty() {
                return missing("enc_concepts");
            }
            if input.enc_target_profile.is_empty() {
                return missing("enc_operation");
            }
            if input.enc_local_query.is_empty() {
                return missing("enc_local_query");
            }
        } else {
            if input.concepts.is_empty() {
                return missing("concepts");
            }
            if input.target_profile.is_none() {
                return missing("target_profile");
            }
            if input.local_query.is_none() {
                return missing("local_query");
            }
        }
        Ok(())
    }

    async fn run_pipeline(&self, id: QueryId, input: InputNewQuery) {
        if let Err(e) = self.resolve_and_dispatch(&id, input).await {
            self.fail_query(&id, e.to_string());
        }
    }

    async fn resolve_and_dispatch(&self, id: &QueryId, input: InputNewQuery) -> Result<(), ConductorError> {
        let is_encrypted = input.is_encrypted;
        let cipher = self.cipher.as_ref();

        // 1. Concept identifiers
        let indexed = self.index_concepts(is_encrypted, input.concepts.clone(), input.enc_concepts).await?;
        let concept_count = indexed.hashes.len();
        self.queries.modify(id, |query| query.record_concepts(indexed.hashes.clone()))?;
        self.event_bus.publish_query_event(QueryEvent::ConceptsIndexed {
            query_id: id.clone(),
            concept_count,
            indexed_at: Utc::now(),
        });

        // 2. Address lists keyed by the names the target profile uses
        let mut lists = HashMap::with_capacity(concept_count);
        for (index, concept) in indexed.hashes.iter().enumerate() {
            let key = match input.concepts.get(index) {
                Some(name) if !is_encrypted => input
                    .pseudo_concepts
                    .get(name)
                    .cloned()
                    .unwrap_or_else(|| name.clone()),
                _ => concept.hash_hex(),
            };
            let addresses = self.instances.addresses(&concept.hash_hex())?;
            lists.insert(key, seal_json(cipher, is_encrypted, "enc_instances", &addresses)?);
        }

        // 3. Targets
        let encrypted_target_profile = if is_encrypted {
            input.enc_target_profile
        } else {
            seal_json(cipher, false, "enc_operation", &input.target_profile)?
        };
        let found = self
            .roles
            .target_finder
            .find_targets(InputTF {
                is_encrypted,
                encrypted_lists_of_addresses: lists,
                encrypted_target_profile,
                task_metadata: indexed.task_metadata,
            })
            .await
            .map_err(role_error(RoleKind::TargetFinder))?;

        // 4. Fan out; the Target role answers with the target count
        let encrypted_local_query = if is_encrypted {
            input.enc_local_query
        } else {
            seal_json(cipher, false, "enc_local_query", &input.local_query.unwrap_or_default())?
        };
        let target_count = self
            .roles
            .target
            .dispatch(InputT {
                is_encrypted,
                encrypted_local_query,
                encrypted_targets: found.encrypted_targets,
                conductor_url: self.conductor_url.clone(),
                query_id: id.clone(),
                task_metadata: found.task_metadata,
            })
            .await
            .map_err(role_error(RoleKind::Target))?;
        self.event_bus.publish_query_event(QueryEvent::TargetsResolved {
            query_id: id.clone(),
            target_count,
            resolved_at: Utc::now(),
        });
        info!(query_id = %id, targets = target_count, "Targets dispatched");

        // 5. Reports that arrived before the count are already queued
        let progress = self.queries.modify(id, |query| query.set_expected_targets(target_count))?;
        if let TargetProgress::Complete { rows } = progress {
            debug!(query_id = %id, rows = rows.len(), "Target reports complete when the count is set");
            self.launch_stage(id, 0, rows).await?;
        }
        Ok(())
    }

    async fn index_concepts(
        &self,
        is_encrypted: bool,
        concepts: Vec<String>,
        enc_concepts: Vec<Concept>,
    ) -> Result<OutputCI, ConductorError> {
        self.roles
            .concept_indexer
            .hash_concepts(InputCI {
                is_encrypted,
                concepts,
                enc_concepts,
            })
            .await
            .map_err(role_error(RoleKind::ConceptIndexer))
    }

    /// Split `rows` across the stage's branches and submit each branch.
    async fn launch_stage(&self, id: &QueryId, stage: usize, rows: Vec<Row>) -> Result<(), ConductorError> {
        let (is_encrypted, size, encrypted_jobs) = {
            let query = self
                .queries
                .find_by_id(id)?
                .ok_or_else(|| RepositoryError::QueryNotFound(id.clone()))?;
            let layer = query
                .layers()
                .get(stage)
                .ok_or(QueryError::UnknownAggregationSlot(AggregationId::new(stage, 0)))?;
            let encrypted_jobs = if query.is_encrypted {
                layer.encrypted_jobs.clone()
            } else {
                seal_json(self.cipher.as_ref(), false, "enc_jobs", &layer.jobs)?
            };
            (query.is_encrypted, layer.size, encrypted_jobs)
        };

        self.event_bus.publish_query_event(QueryEvent::StageStarted {
            query_id: id.clone(),
            stage,
            branches: size,
            started_at: Utc::now(),
        });
        info!(query_id = %id, stage, branches = size, rows = rows.len(), "Launching aggregation stage");

        let mut inputs = Vec::with_capacity(size);
        for (branch, chunk) in split_into_branches(rows, size).into_iter().enumerate() {
            inputs.push(InputDA {
                query_id: id.clone(),
                aggregation_id: AggregationId::new(stage, branch),
                conductor_url: self.conductor_url.clone(),
                is_encrypted,
                encrypted_jobs: encrypted_jobs.clone(),
                encrypted_data: seal_json(self.cipher.as_ref(), is_encrypted, "enc_data", &chunk)?,
                task_metadata: TaskMetadata::default(),
            });
        }

        let aggregator = &self.roles.data_aggregator;
        let submitted = join_all(inputs.into_iter().map(|input| aggregator.submit(input))).await;
        for outcome in submitted {
            outcome.map_err(role_error(RoleKind::DataAggregator))?;
        }
        Ok(())
    }

    fn fail_query(&self, id: &QueryId, reason: String) {
        error!(query_id = %id, "Query failed: {}", reason);
        let failed = self.queries.modify(id, |query| {
            query.fail(reason.clone());
            Ok(())
        });
        match failed {
            Ok(()) => self.event_bus.publish_query_event(QueryEvent::QueryFailed {
                query_id: id.clone(),
                reason,
                failed_at: Utc::now(),
            }),
            Err(e) => warn!(query_id = %id, "Could not record failure: {}", e),
        }
    }

    async fn on_target_report(&self, id: &QueryId, result: OutputT) -> Result<(), ConductorError> {
        let progress = self.queries.modify(id, |query| query.record_target_report(result))?;
        let (received, expected) = match &progress {
            TargetProgress::Queued { .. } => (0, None),
            TargetProgress::Collecting { received, expected } => (*received, Some(*expected)),
            TargetProgress::Complete { .. } => {
                let query = self.queries.find_by_id(id)?;
                let received = query.as_ref().map(Query::reports_received).unwrap_or_default();
                (received, Some(received))
            }
        };
        self.event_bus.publish_query_event(QueryEvent::TargetReported {
            query_id: id.clone(),
            received,
            expected,
            reported_at: Utc::now(),
        });

        if let TargetProgress::Complete { rows } = progress {
            if let Err(e) = self.launch_stage(id, 0, rows).await {
                self.fail_query(id, e.to_string());
                return Err(e);
            }
        }
        Ok(())
    }

    async fn on_aggregation_report(
        &self,
        id: &QueryId,
        output: OutputDA,
    ) -> Result<(), ConductorError> {
        let aggregation_id = output.aggregation_id;
        let progress = self.queries.modify(id, |query| query.record_aggregation(output))?;
        self.event_bus.publish_query_event(QueryEvent::AggregationReported {
            query_id: id.clone(),
            aggregation_id,
            reported_at: Utc::now(),
        });

        match progress {
            StageProgress::Waiting { stage, remaining } => {
                debug!(query_id = %id, stage, remaining, "Waiting for aggregation branches");
            }
            StageProgress::StageComplete { next_stage, rows } => {
                if let Err(e) = self.launch_stage(id, next_stage, rows).await {
                    self.fail_query(id, e.to_string());
                    return Err(e);
                }
            }
            StageProgress::QueryComplete { results } => {
                info!(query_id = %id, results = results.len(), "Query completed");
                self.event_bus.publish_query_event(QueryEvent::QueryCompleted {
                    query_id: id.clone(),
                    completed_at: Utc::now(),
                });
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConductorService for StandardConductorService {
    async fn new_query(&self, input: InputNewQuery) -> Result<QueryId, ConductorError> {
        Self::validate(&input)?;

        let id = QueryId::new();
        let query = Query::new(id.clone(), input.is_encrypted, input.layers_da.clone())
            .map_err(|e| ConductorError::InvalidQuery(e.to_string()))?;
        self.queries.insert(query)?;
        self.event_bus.publish_query_event(QueryEvent::QueryCreated {
            query_id: id.clone(),
            is_encrypted: input.is_encrypted,
            created_at: Utc::now(),
        });
        info!(query_id = %id, encrypted = input.is_encrypted, "Query created");

        let conductor = self.clone();
        let pipeline_id = id.clone();
        tokio::spawn(async move {
            conductor.run_pipeline(pipeline_id, input).await;
        });

        Ok(id)
    }

    async fn patch(&self, id: &QueryId, result: RoleResult) -> Result<(), ConductorError> {
        match result {
            RoleResult::Target(output) => {
                if !output.query_id.is_empty() && output.query_id != *id {
                    return Err(ConductorError::QueryMismatch {
                        path: id.clone(),
                        body: output.query_id,
                    });
                }
                self.on_target_report(id, output).await
            }
            RoleResult::Aggregator(output) => {
                if !output.query_id.is_empty() && output.query_id != *id {
                    return Err(ConductorError::QueryMismatch {
                        path: id.clone(),
                        body: output.query_id,
                    });
                }
                self.on_aggregation_report(id, output).await
            }
        }
    }

    async fn get_query(&self, id: &QueryId) -> Result<QueryView, ConductorError> {
        self.queries
            .find_by_id(id)?
            .map(|query| query.view())
            .ok_or_else(|| RepositoryError::QueryNotFound(id.clone()).into())
    }

    async fn cancel_query(&self, id: &QueryId) -> Result<(), ConductorError> {
        self.queries.remove(id)?;
        self.event_bus.publish_query_event(QueryEvent::QueryCancelled {
            query_id: id.clone(),
            cancelled_at: Utc::now(),
        });
        info!(query_id = %id, "Query cancelled");
        Ok(())
    }

    async fn subscribe(&self, input: InputSubscribe) -> Result<Vec<RegistrationOutcome>, ConductorError> {
        let indexed = self
            .index_concepts(input.is_encrypted, input.concepts, input.enc_concepts)
            .await?;

        let mut outcomes = Vec::with_capacity(indexed.hashes.len());
        for concept in &indexed.hashes {
            let outcome = self
                .instances
                .register(&concept.hash_hex(), input.instance.clone())?;
            debug!(domain = %input.instance.domain, ?outcome, "Instance registered");
            outcomes.push(outcome);
        }
        info!(
            domain = %input.instance.domain,
            version = input.instance.version,
            concepts = outcomes.len(),
            "Instance subscribed"
        );
        Ok(outcomes)
    }
}
