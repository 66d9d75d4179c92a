// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Runs a target's local query as a Mango find request against the instance's
// data API: `POST {scheme}://{domain}/data/{doctype}/_find` authenticated
// with the bearer token the instance issued, reading back the `docs` array.

use crate::application::target::{StackClient, StackError};
use crate::domain::messages::Row;
use crate::domain::query::StackQuery;
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct FindResponse {
    #[serde(default)]
    docs: Vec<Row>,
}

#[derive(Clone)]
pub struct HttpStackClient {
    client: Client,
    scheme: String,
}

impl HttpStackClient {
    pub fn new(scheme: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
            scheme: scheme.into(),
        })
    }

    fn find_url(&self, query: &StackQuery) -> String {
        format!(
            "{}://{}/data/{}/_find",
            self.scheme, query.domain, query.local_query.doctype
        )
    }
}

#[async_trait]
impl StackClient for HttpStackClient {
    async fn find(&self, query: &StackQuery) -> Result<Vec<Row>, StackError> {
        let mut find = query.local_query.find_request.clone();
        if find.limit == 0 {
            find.limit = query.local_query.limit;
        }

        let url = self.find_url(query);
        debug!(%url, query_id = %query.query_id, "Running local query");

        let response = self
            .client
            .post(&url)
            .bearer_auth(&query.token_bearer)
            .json(&find)
            .send()
            .await
            .map_err(|e| StackError::Request {
                domain: query.domain.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(StackError::Status {
                domain: query.domain.clone(),
                status: status.as_u16(),
                body: response.text().await.unwrap_or_default(),
            });
        }

        let body: FindResponse = response.json().await.map_err(|e| StackError::Decode {
            domain: query.domain.clone(),
            reason: e.to_string(),
        })?;
        Ok(body.docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::instance::Instance;
    use crate::domain::query::{build_stack_query, FindParams, LocalQuery, QueryId};
    use mockito::Matcher;
    use serde_json::{json, Map};
    use url::Url;

    fn stack_query(domain: &str) -> StackQuery {
        let mut selector = Map::new();
        selector.insert("category".to_string(), json!("food"));
        let local_query = LocalQuery {
            find_request: FindParams {
                selector,
                ..Default::default()
            },
            doctype: "io.cozy.bank.operations".to_string(),
            index: Map::new(),
            limit: 50,
        };
        build_stack_query(
            1,
            Url::parse("http://conductor.local").unwrap(),
            QueryId::from("q-1"),
            &Instance::new(domain, "secret-token", 1),
            local_query,
            false,
        )
    }

    #[tokio::test]
    async fn test_find_posts_mango_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/data/io.cozy.bank.operations/_find")
            .match_header("authorization", "Bearer secret-token")
            .match_body(Matcher::Json(json!({
                "selector": {"category": "food"},
                "limit": 50
            })))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"docs":[{"amount":12.5},{"amount":3}],"next":false}"#)
            .create_async()
            .await;

        let client = HttpStackClient::new("http", Duration::from_secs(5)).unwrap();
        let rows = client.find(&stack_query(&server.host_with_port())).await.unwrap();

        mock.assert_async().await;
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["amount"], json!(12.5));
    }

    #[tokio::test]
    async fn test_non_success_status_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/data/io.cozy.bank.operations/_find")
            .with_status(403)
            .with_body("forbidden")
            .create_async()
            .await;

        let client = HttpStackClient::new("http", Duration::from_secs(5)).unwrap();
        let err = client
            .find(&stack_query(&server.host_with_port()))
            .await
            .unwrap_err();
        match err {
            StackError::Status { status, body, .. } => {
                assert_eq!(status, 403);
                assert_eq!(body, "forbidden");
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
