// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # Target
//!
//! Fans a local query out to every resolved instance. Each instance is
//! queried in the background and reports its rows to the Conductor on its
//! own; a failing instance still reports, with no rows, so the Conductor's
//! target count can complete.
//!
//! A domain listed more than once is queried once, with its most recent
//! record.

use crate::application::role::{ConductorCallback, RoleError};
use crate::domain::cipher::{open_json, PayloadCipher};
use crate::domain::instance::Instance;
use crate::domain::messages::{InputT, OutputT, RoleResult, Row, TaskMetadata};
use crate::domain::query::{build_stack_query, LocalQuery, QueryId, StackQuery};
use async_trait::async_trait;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};
use url::Url;

#[derive(Debug, Error)]
pub enum StackError {
    #[error("request to {domain} failed: {reason}")]
    Request { domain: String, reason: String },

    #[error("{domain} answered {status}: {body}")]
    Status {
        domain: String,
        status: u16,
        body: String,
    },

    #[error("unexpected response from {domain}: {reason}")]
    Decode { domain: String, reason: String },
}

/// Runs a local query against one instance.
#[async_trait]
pub trait StackClient: Send + Sync {
    async fn find(&self, query: &StackQuery) -> Result<Vec<Row>, StackError>;
}

#[async_trait]
pub trait TargetService: Send + Sync {
    /// Start the per-target work and return the number of targets.
    async fn dispatch(&self, input: InputT) -> Result<usize, RoleError>;
}

pub struct StandardTargetService {
    stack: Arc<dyn StackClient>,
    callback: Arc<dyn ConductorCallback>,
    cipher: Arc<dyn PayloadCipher>,
}

impl StandardTargetService {
    pub fn new(
        stack: Arc<dyn StackClient>,
        callback: Arc<dyn ConductorCallback>,
        cipher: Arc<dyn PayloadCipher>,
    ) -> Self {
        Self {
            stack,
            callback,
            cipher,
        }
    }
}

#[async_trait]
impl TargetService for StandardTargetService {
    async fn dispatch(&self, input: InputT) -> Result<usize, RoleError> {
        let cipher = self.cipher.as_ref();
        let addresses: Vec<String> =
            open_json(cipher, input.is_encrypted, "enc_addresses", &input.encrypted_targets)?;
        let local_query: LocalQuery = open_json(
            cipher,
            input.is_encrypted,
            "enc_local_query",
            &input.encrypted_local_query,
        )?;

        let targets = latest_per_domain(addresses);
        let number_of_targets = targets.len();
        info!(
            query_id = %input.query_id,
            targets = number_of_targets,
            doctype = %local_query.doctype,
            "Dispatching local query to targets"
        );

        let jobs: Vec<_> = targets
            .into_iter()
            .map(|target| TargetJob {
                target,
                number_of_targets,
                local_query: local_query.clone(),
                is_encrypted: input.is_encrypted,
                conductor_url: input.conductor_url.clone(),
                query_id: input.query_id.clone(),
                task_metadata: input.task_metadata.clone(),
                stack: self.stack.clone(),
                callback: self.callback.clone(),
            })
            .map(TargetJob::run)
            .collect();

        tokio::spawn(async move {
            join_all(jobs).await;
        });

        Ok(number_of_targets)
    }
}

/// Parse addresses and keep one entry per domain, the highest version.
/// Unparseable addresses are kept so that they report their failure.
fn latest_per_domain(addresses: Vec<String>) -> Vec<Result<Instance, String>> {
    let mut targets: Vec<Result<Instance, String>> = Vec::with_capacity(addresses.len());
    for address in addresses {
        let instance = match Instance::from_address(&address) {
            Ok(instance) => instance,
            Err(e) => {
                targets.push(Err(format!("invalid target address: {e}")));
                continue;
            }
        };
        let known = targets
            .iter_mut()
            .filter_map(|target| target.as_mut().ok())
            .find(|known| known.domain == instance.domain);
        match known {
            Some(known) if instance.version > known.version => *known = instance,
            Some(_) => {}
            None => targets.push(Ok(instance)),
        }
    }
    targets
}

struct TargetJob {
    target: Result<Instance, String>,
    number_of_targets: usize,
    local_query: LocalQuery,
    is_encrypted: bool,
    conductor_url: Url,
    query_id: QueryId,
    task_metadata: TaskMetadata,
    stack: Arc<dyn StackClient>,
    callback: Arc<dyn ConductorCallback>,
}

impl TargetJob {
    async fn run(self) {
        let output = match self.query_instance().await {
            Ok((domain, data)) => {
                debug!(query_id = %self.query_id, %domain, rows = data.len(), "Target answered");
                OutputT {
                    data,
                    query_id: self.query_id.clone(),
                    task_metadata: self.task_metadata.clone(),
                }
            }
            Err(reason) => {
                warn!(query_id = %self.query_id, "Target failed: {}", reason);
                OutputT {
                    data: Vec::new(),
                    query_id: self.query_id.clone(),
                    task_metadata: TaskMetadata(json!({
                        "error": reason,
                        "metadata_task": self.task_metadata.0,
                    })),
                }
            }
        };

        let patch = RoleResult::Target(output).into_patch(self.is_encrypted);
        if let Err(e) = self
            .callback
            .report(&self.conductor_url, &self.query_id, patch)
            .await
        {
            warn!(query_id = %self.query_id, "Failed to report target output: {}", e);
        }
    }

    async fn query_instance(&self) -> Result<(String, Vec<Row>), String> {
        let instance = self.target.as_ref().map_err(Clone::clone)?;
        let stack_query = build_stack_query(
            self.number_of_targets,
            self.conductor_url.clone(),
            self.query_id.clone(),
            instance,
            self.local_query.clone(),
            self.is_encrypted,
        );
        let rows = self
            .stack
            .find(&stack_query)
            .await
            .map_err(|e| e.to_string())?;
        Ok((instance.domain.clone(), rows))
    }
}
