// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Node wiring and HTTP server
//!
//! Builds the services a node hosts from its [`DispersConfigManifest`]:
//!
//! - roles listed in `spec.node.roles` run in-process and get HTTP routes
//! - the Conductor (when `spec.node.conductor` is set) drives each role either
//!   through the in-process service or, when `spec.roles.<role>` names an
//!   endpoint, through [`HttpRoleClient`]
//! - roles always report to the Conductor over HTTP, so a role can serve
//!   Conductors running on other nodes
//! - finished queries are swept from the Conductor after
//!   `spec.query_retention.ttl_secs`

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{debug, error, info};

use dispers_core::{
    application::{
        ConceptIndexerService, ConductorCallback, DataAggregatorService, RoleSet,
        Sha256ConceptHasher, StandardConceptIndexer, StandardConductorService,
        StandardDataAggregator, StandardTargetFinder, StandardTargetService, TargetFinderService,
        TargetService,
    },
    domain::cipher::{DisabledCipher, PayloadCipher},
    domain::config::DispersConfigManifest,
    domain::messages::RoleKind,
    domain::repository::QueryRepository,
    infrastructure::{
        spawn_query_eviction, EventBus, HttpConductorCallback, HttpRoleClient, HttpStackClient,
        InMemoryInstanceRepository, InMemoryQueryRepository,
    },
    presentation::{app, NodeServices},
};

/// Services hosted by this node plus the bus the Conductor publishes on.
pub struct Node {
    pub services: NodeServices,
    pub event_bus: Arc<EventBus>,
    /// Conductor query store, when this node runs the Conductor
    pub queries: Option<Arc<dyn QueryRepository>>,
}

pub fn build_node(config: &DispersConfigManifest) -> Result<Node> {
    let spec = &config.spec;
    let timeout = Duration::from_secs(spec.target.request_timeout_secs);
    let cipher: Arc<dyn PayloadCipher> = Arc::new(DisabledCipher);
    let callback: Arc<dyn ConductorCallback> = Arc::new(
        HttpConductorCallback::new(timeout).context("Failed to build conductor callback client")?,
    );
    let hosts = |role: RoleKind| spec.node.roles.contains(&role);

    let mut services = NodeServices::default();
    if hosts(RoleKind::ConceptIndexer) {
        let hasher = Arc::new(Sha256ConceptHasher::new(spec.concept_indexer.salt.clone()));
        services.concept_indexer = Some(Arc::new(StandardConceptIndexer::new(hasher, cipher.clone())));
    }
    if hosts(RoleKind::TargetFinder) {
        services.target_finder = Some(Arc::new(StandardTargetFinder::new(cipher.clone())));
    }
    if hosts(RoleKind::Target) {
        let stack = HttpStackClient::new(spec.target.stack_scheme.clone(), timeout)
            .context("Failed to build stack client")?;
        services.target = Some(Arc::new(StandardTargetService::new(
            Arc::new(stack),
            callback.clone(),
            cipher.clone(),
        )));
    }
    if hosts(RoleKind::DataAggregator) {
        services.data_aggregator = Some(Arc::new(StandardDataAggregator::new(callback, cipher.clone())));
    }

    let event_bus = Arc::new(EventBus::with_default_capacity());
    let mut queries: Option<Arc<dyn QueryRepository>> = None;
    if spec.node.conductor {
        let roles = RoleSet {
            concept_indexer: role_for(config, RoleKind::ConceptIndexer, timeout, &services.concept_indexer)?,
            target_finder: role_for(config, RoleKind::TargetFinder, timeout, &services.target_finder)?,
            target: role_for(config, RoleKind::Target, timeout, &services.target)?,
            data_aggregator: role_for(config, RoleKind::DataAggregator, timeout, &services.data_aggregator)?,
        };
        let conductor_url = config.public_url()?;
        info!(%conductor_url, "Conductor enabled");
        let store: Arc<dyn QueryRepository> = Arc::new(InMemoryQueryRepository::new());
        queries = Some(store.clone());
        services.conductor = Some(Arc::new(StandardConductorService::new(
            store,
            Arc::new(InMemoryInstanceRepository::new()),
            roles,
            cipher,
            event_bus.clone(),
            conductor_url,
        )));
    }

    Ok(Node {
        services,
        event_bus,
        queries,
    })
}

/// Pick the remote endpoint when configured, the in-process service otherwise.
fn role_for<S>(
    config: &DispersConfigManifest,
    role: RoleKind,
    timeout: Duration,
    local: &Option<Arc<S>>,
) -> Result<Arc<S>>
where
    S: ?Sized,
    HttpRoleClient: IntoRole<S>,
{
    if let Some(endpoint) = config.role_endpoint(role)? {
        info!(%role, %endpoint, "Using remote role");
        let client = HttpRoleClient::new(role, endpoint, timeout)?;
        return Ok(client.into_role());
    }
    match local {
        Some(service) => {
            info!(%role, "Using in-process role");
            Ok(service.clone())
        }
        None => bail!(
            "Role {} is neither served by this node nor configured under spec.roles",
            role
        ),
    }
}

/// Upcast of the HTTP client into one role's service trait object.
trait IntoRole<S: ?Sized> {
    fn into_role(self) -> Arc<S>;
}

impl IntoRole<dyn ConceptIndexerService> for HttpRoleClient {
    fn into_role(self) -> Arc<dyn ConceptIndexerService> {
        Arc::new(self)
    }
}

impl IntoRole<dyn TargetFinderService> for HttpRoleClient {
    fn into_role(self) -> Arc<dyn TargetFinderService> {
        Arc::new(self)
    }
}

impl IntoRole<dyn TargetService> for HttpRoleClient {
    fn into_role(self) -> Arc<dyn TargetService> {
        Arc::new(self)
    }
}

impl IntoRole<dyn DataAggregatorService> for HttpRoleClient {
    fn into_role(self) -> Arc<dyn DataAggregatorService> {
        Arc::new(self)
    }
}

/// Run the node until Ctrl+C or SIGTERM.
pub async fn serve(config: DispersConfigManifest) -> Result<()> {
    config.validate().context("Configuration validation failed")?;
    info!(
        node_id = %config.spec.node.id,
        conductor = config.spec.node.conductor,
        roles = ?config.spec.node.roles,
        "Configuration loaded"
    );

    let node = build_node(&config)?;
    spawn_event_logger(&node.event_bus);
    if let Some(queries) = &node.queries {
        let retention = &config.spec.query_retention;
        spawn_query_eviction(
            queries.clone(),
            Duration::from_secs(retention.ttl_secs),
            Duration::from_secs(retention.sweep_interval_secs),
        );
    }

    let addr = format!("{}:{}", config.spec.network.bind_address, config.spec.network.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;
    info!("Node listening on {}", addr);

    axum::serve(listener, app(node.services))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Node shutting down");
    Ok(())
}

fn spawn_event_logger(event_bus: &EventBus) {
    let mut events = event_bus.subscribe();
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => debug!(query_id = %event.query_id(), ?event, "Query event"),
                Err(e) => {
                    debug!("Event logger stopped: {}", e);
                    break;
                }
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received SIGTERM signal");
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(yaml: &str) -> DispersConfigManifest {
        DispersConfigManifest::from_yaml_str(yaml).unwrap()
    }

    #[test]
    fn test_default_config_hosts_everything() {
        let node = build_node(&DispersConfigManifest::default()).unwrap();
        assert!(node.services.conductor.is_some());
        assert!(node.queries.is_some());
        assert!(node.services.concept_indexer.is_some());
        assert!(node.services.target_finder.is_some());
        assert!(node.services.target.is_some());
        assert!(node.services.data_aggregator.is_some());
    }

    #[test]
    fn test_role_only_node_has_no_conductor() {
        let node = build_node(&config(
            r#"
apiVersion: dispers/v1
kind: DispersConfig
metadata:
  name: aggregator
spec:
  node:
    id: da-1
    conductor: false
    roles: [dataaggregation]
"#,
        ))
        .unwrap();
        assert!(node.services.conductor.is_none());
        assert!(node.queries.is_none());
        assert!(node.services.data_aggregator.is_some());
        assert!(node.services.target.is_none());
    }

    #[test]
    fn test_conductor_with_remote_roles() {
        let node = build_node(&config(
            r#"
apiVersion: dispers/v1
kind: DispersConfig
metadata:
  name: conductor
spec:
  node:
    id: conductor-1
    roles: [conceptindexor, targetfinder]
  roles:
    target: "http://target.internal:8000"
    data_aggregator: "http://da.internal:8000"
"#,
        ))
        .unwrap();
        assert!(node.services.conductor.is_some());
        assert!(node.services.target.is_none());
    }

    #[test]
    fn test_conductor_missing_role_is_rejected() {
        let result = build_node(&config(
            r#"
apiVersion: dispers/v1
kind: DispersConfig
metadata:
  name: conductor
spec:
  node:
    id: conductor-1
    roles: [conceptindexor, targetfinder, target]
"#,
        ));
        let err = result.err().unwrap().to_string();
        assert!(err.contains("dataaggregation"), "{err}");
    }
}
