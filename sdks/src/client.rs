// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::types::{ErrorResponse, Health, InputNewQuery, InputSubscribe, QueryCreated, QueryId, QueryView, Registered};
use anyhow::{bail, Context, Result};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

/// Client for a dispers Conductor.
#[derive(Clone)]
pub struct DispersClient {
    base_url: String,
    client: Client,
    api_key: Option<String>,
}

impl DispersClient {
    /// Create a new client for the Conductor at `base_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: Client::new(),
            api_key: None,
        }
    }

    /// Set a bearer token sent with every request.
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder) -> Result<Response> {
        let response = self
            .authorize(req)
            .send()
            .await
            .with_context(|| format!("Failed to reach conductor at {}", self.base_url))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|body| body.error)
            .unwrap_or(text);
        bail!("Conductor returned {}: {}", status, message)
    }

    async fn json<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let response = self.send(req).await?;
        response.json().await.context("Invalid response body")
    }

    /// Check that the node is up and list the roles it serves.
    pub async fn health(&self) -> Result<Health> {
        let url = format!("{}/health", self.base_url);
        self.json(self.client.get(&url)).await
    }

    /// Submit a query. Returns as soon as the Conductor accepted it.
    pub async fn submit_query(&self, query: &InputNewQuery) -> Result<QueryId> {
        let url = format!("{}/conductor/query", self.base_url);
        let created: QueryCreated = self.json(self.client.post(&url).json(query)).await?;
        Ok(created.query_id)
    }

    /// Get the current state of a query.
    pub async fn get_query(&self, query_id: &QueryId) -> Result<QueryView> {
        let url = format!("{}/conductor/query/{}", self.base_url, query_id);
        self.json(self.client.get(&url)).await
    }

    /// Cancel a query and drop its state on the Conductor.
    pub async fn cancel_query(&self, query_id: &QueryId) -> Result<()> {
        let url = format!("{}/conductor/query/{}", self.base_url, query_id);
        self.send(self.client.delete(&url)).await?;
        Ok(())
    }

    /// Register an instance under a set of concepts.
    pub async fn subscribe(&self, input: &InputSubscribe) -> Result<usize> {
        let url = format!("{}/conductor/subscribe", self.base_url);
        let registered: Registered = self.json(self.client.post(&url).json(input)).await?;
        Ok(registered.registered)
    }

    /// Poll a query until it completes or fails.
    pub async fn wait_for_query(
        &self,
        query_id: &QueryId,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Result<QueryView> {
        let poll = async {
            loop {
                let view = self.get_query(query_id).await?;
                if view.status.is_terminal() {
                    return Ok(view);
                }
                tokio::time::sleep(poll_interval).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .with_context(|| format!("Query {} still running after {:?}", query_id, timeout))?
    }
}
