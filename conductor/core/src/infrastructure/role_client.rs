// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Remote role client
//
// Implements the role service traits over HTTP so the Conductor can drive a
// role hosted on another node exactly like an in-process one. Non-2xx
// answers are mapped to `RoleError::Remote` carrying the role's own error
// message.

use crate::application::concept_indexer::ConceptIndexerService;
use crate::application::data_aggregator::DataAggregatorService;
use crate::application::role::RoleError;
use crate::application::target::TargetService;
use crate::application::target_finder::TargetFinderService;
use crate::domain::messages::{InputCI, InputDA, InputT, InputTF, OutputCI, OutputDA, OutputTF, RoleKind};
use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const CONCEPT_INDEXER_HASH: &str = "conceptindexor/hash";
pub const TARGET_FINDER_ADDRESSES: &str = "targetfinder/addresses";
pub const TARGET_QUERY: &str = "target/query";
pub const DATA_AGGREGATOR_AGGREGATE: &str = "dataaggregation/aggregate";
pub const DATA_AGGREGATOR_COMPUTE: &str = "dataaggregation/compute";

/// Body of a `202 Accepted` answer from the Target role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dispatched {
    pub dispatched: usize,
}

/// Error body shared by every route.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[derive(Clone)]
pub struct HttpRoleClient {
    role: RoleKind,
    base_url: Url,
    client: Client,
}

impl HttpRoleClient {
    pub fn new(role: RoleKind, base_url: Url, timeout: Duration) -> Result<Self, RoleError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| RoleError::Transport {
                role,
                reason: e.to_string(),
            })?;
        Ok(Self {
            role,
            base_url,
            client,
        })
    }

    pub fn role(&self) -> RoleKind {
        self.role
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    async fn send<B: Serialize + Sync>(&self, path: &str, body: &B) -> Result<Response, RoleError> {
        let url = self.endpoint(path);
        debug!(role = %self.role, %url, "Calling remote role");
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| RoleError::Transport {
                role: self.role,
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        Err(RoleError::Remote {
            role: self.role,
            status: status.as_u16(),
            message,
        })
    }

    async fn call<B: Serialize + Sync, O: DeserializeOwned>(&self, path: &str, body: &B) -> Result<O, RoleError> {
        self.send(path, body)
            .await?
            .json()
            .await
            .map_err(|e| RoleError::Transport {
                role: self.role,
                reason: format!("invalid response body: {e}"),
            })
    }
}

#[async_trait]
impl ConceptIndexerService for HttpRoleClient {
    async fn hash_concepts(&self, input: InputCI) -> Result<OutputCI, RoleError> {
        self.call(CONCEPT_INDEXER_HASH, &input).await
    }
}

#[async_trait]
impl TargetFinderService for HttpRoleClient {
    async fn find_targets(&self, input: InputTF) -> Result<OutputTF, RoleError> {
        self.call(TARGET_FINDER_ADDRESSES, &input).await
    }
}

#[async_trait]
impl TargetService for HttpRoleClient {
    async fn dispatch(&self, input: InputT) -> Result<usize, RoleError> {
        let accepted: Dispatched = self.call(TARGET_QUERY, &input).await?;
        Ok(accepted.dispatched)
    }
}

#[async_trait]
impl DataAggregatorService for HttpRoleClient {
    async fn aggregate(&self, input: InputDA) -> Result<OutputDA, RoleError> {
        self.call(DATA_AGGREGATOR_COMPUTE, &input).await
    }

    async fn submit(&self, input: InputDA) -> Result<(), RoleError> {
        self.send(DATA_AGGREGATOR_AGGREGATE, &input).await?;
        Ok(())
    }
}
