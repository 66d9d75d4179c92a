// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Conductor callbacks
//
// `HttpConductorCallback` sends a role's partial output as
// `PATCH {conductor_url}/conductor/query/{queryid}`.
// `LocalConductorCallback` hands it to a Conductor living in the same
// process through a channel, drained by `spawn_patch_pump`.

use crate::application::conductor::ConductorService;
use crate::application::role::{ConductorCallback, RoleError};
use crate::domain::messages::{InputPatchQuery, RoleResult};
use crate::domain::query::QueryId;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use url::Url;

pub fn patch_url(conductor_url: &Url, query_id: &QueryId) -> String {
    format!(
        "{}/conductor/query/{}",
        conductor_url.as_str().trim_end_matches('/'),
        query_id
    )
}

#[derive(Clone)]
pub struct HttpConductorCallback {
    client: Client,
}

impl HttpConductorCallback {
    pub fn new(timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: Client::builder().timeout(timeout).build()?,
        })
    }
}

#[async_trait]
impl ConductorCallback for HttpConductorCallback {
    async fn report(
        &self,
        conductor_url: &Url,
        query_id: &QueryId,
        patch: InputPatchQuery,
    ) -> Result<(), RoleError> {
        let url = patch_url(conductor_url, query_id);
        debug!(%url, role = %patch.role, "Reporting to conductor");

        let response = self
            .client
            .patch(&url)
            .json(&patch)
            .send()
            .await
            .map_err(|e| RoleError::Callback {
                url: url.clone(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(RoleError::Callback {
                url,
                reason: format!("{}: {}", status, response.text().await.unwrap_or_default()),
            })
        }
    }
}

/// A patch waiting to be applied by an in-process Conductor.
pub type PendingPatch = (QueryId, InputPatchQuery);

#[derive(Clone)]
pub struct LocalConductorCallback {
    sender: mpsc::UnboundedSender<PendingPatch>,
}

impl LocalConductorCallback {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<PendingPatch>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl ConductorCallback for LocalConductorCallback {
    async fn report(
        &self,
        conductor_url: &Url,
        query_id: &QueryId,
        patch: InputPatchQuery,
    ) -> Result<(), RoleError> {
        self.sender
            .send((query_id.clone(), patch))
            .map_err(|_| RoleError::Callback {
                url: conductor_url.to_string(),
                reason: "conductor is gone".to_string(),
            })
    }
}

/// Applies queued patches to `conductor` until every sender is dropped.
pub fn spawn_patch_pump(
    mut receiver: mpsc::UnboundedReceiver<PendingPatch>,
    conductor: Arc<dyn ConductorService>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((query_id, patch)) = receiver.recv().await {
            let result = match RoleResult::try_from(patch) {
                Ok(result) => result,
                Err(e) => {
                    warn!(%query_id, "Dropping invalid patch: {}", e);
                    continue;
                }
            };
            // Applied concurrently: a patch may launch a whole aggregation stage.
            let conductor = conductor.clone();
            tokio::spawn(async move {
                if let Err(e) = conductor.patch(&query_id, result).await {
                    warn!(%query_id, "Patch rejected: {}", e);
                }
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::messages::OutputT;
    use mockito::Matcher;
    use serde_json::json;

    #[test]
    fn test_patch_url() {
        let url = Url::parse("http://conductor.local:8000/").unwrap();
        assert_eq!(
            patch_url(&url, &QueryId::from("q-1")),
            "http://conductor.local:8000/conductor/query/q-1"
        );
    }

    #[tokio::test]
    async fn test_http_callback_patches_query() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PATCH", "/conductor/query/q-1")
            .match_body(Matcher::PartialJson(json!({
                "role": "target",
                "output_t": {"queryid": "q-1"}
            })))
            .with_status(200)
            .create_async()
            .await;

        let callback = HttpConductorCallback::new(Duration::from_secs(5)).unwrap();
        let patch = RoleResult::Target(OutputT {
            query_id: QueryId::from("q-1"),
            ..Default::default()
        })
        .into_patch(false);
        callback
            .report(&Url::parse(&server.url()).unwrap(), &QueryId::from("q-1"), patch)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_callback_surfaces_rejection() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("PATCH", "/conductor/query/gone")
            .with_status(404)
            .with_body(r#"{"error":"query gone not found"}"#)
            .create_async()
            .await;

        let callback = HttpConductorCallback::new(Duration::from_secs(5)).unwrap();
        let err = callback
            .report(
                &Url::parse(&server.url()).unwrap(),
                &QueryId::from("gone"),
                InputPatchQuery::default(),
            )
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn test_local_callback_queues_patch() {
        let (callback, mut receiver) = LocalConductorCallback::channel();
        callback
            .report(
                &Url::parse("http://local").unwrap(),
                &QueryId::from("q-2"),
                InputPatchQuery {
                    role: "target".to_string(),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let (query_id, patch) = receiver.recv().await.unwrap();
        assert_eq!(query_id.as_str(), "q-2");
        assert_eq!(patch.role, "target");

        drop(receiver);
        assert!(callback
            .report(&Url::parse("http://local").unwrap(), &QueryId::from("q-3"), InputPatchQuery::default())
            .await
            .is_err());
    }
}
