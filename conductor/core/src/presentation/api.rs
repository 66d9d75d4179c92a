// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use crate::application::concept_indexer::ConceptIndexerService;
use crate::application::conductor::{ConductorError, ConductorService};
use crate::application::data_aggregator::DataAggregatorService;
use crate::application::role::RoleError;
use crate::application::target::TargetService;
use crate::application::target_finder::TargetFinderService;
use crate::domain::instance::AddressBookError;
use crate::domain::messages::{
    InputCI, InputDA, InputNewQuery, InputPatchQuery, InputSubscribe, InputT, InputTF, OutputCI,
    OutputDA, OutputTF, QueryCreated, RoleKind, RoleResult,
};
use crate::domain::query::{QueryId, QueryView};
use crate::domain::repository::RepositoryError;
use crate::infrastructure::role_client::{Dispatched, ErrorBody};
use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::json;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::warn;

/// Error answered as `{"error": message}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            warn!(status = %self.status, "Request failed: {}", self.message);
        }
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::new(StatusCode::BAD_REQUEST, rejection.body_text())
    }
}

impl From<RoleError> for ApiError {
    fn from(e: RoleError) -> Self {
        let status = match &e {
            RoleError::Remote { status, .. } => {
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY)
            }
            RoleError::Hash(_) => StatusCode::INTERNAL_SERVER_ERROR,
            e if e.is_client_error() => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

impl From<ConductorError> for ApiError {
    fn from(e: ConductorError) -> Self {
        let status = match &e {
            ConductorError::InvalidQuery(_)
            | ConductorError::Patch(_)
            | ConductorError::Cipher(_)
            | ConductorError::QueryMismatch { .. } => StatusCode::BAD_REQUEST,
            ConductorError::Repository(repository) => match repository {
                RepositoryError::QueryNotFound(_) => StatusCode::NOT_FOUND,
                RepositoryError::QueryExists(_)
                | RepositoryError::Query(_)
                | RepositoryError::AddressBook(AddressBookError::VersionConflict { .. }) => {
                    StatusCode::CONFLICT
                }
                RepositoryError::AddressBook(AddressBookError::EmptyDomain) => StatusCode::BAD_REQUEST,
                RepositoryError::Address(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ConductorError::Role { .. } => StatusCode::BAD_GATEWAY,
        };
        Self::new(status, e.to_string())
    }
}

type ApiResult<T> = Result<T, ApiError>;

/// Services hosted by one node. Absent services get no routes.
#[derive(Clone, Default)]
pub struct NodeServices {
    pub conductor: Option<Arc<dyn ConductorService>>,
    pub concept_indexer: Option<Arc<dyn ConceptIndexerService>>,
    pub target_finder: Option<Arc<dyn TargetFinderService>>,
    pub target: Option<Arc<dyn TargetService>>,
    pub data_aggregator: Option<Arc<dyn DataAggregatorService>>,
}

impl NodeServices {
    fn served(&self) -> Vec<&'static str> {
        let mut served = Vec::new();
        if self.conductor.is_some() {
            served.push("conductor");
        }
        let roles = [
            (RoleKind::ConceptIndexer, self.concept_indexer.is_some()),
            (RoleKind::TargetFinder, self.target_finder.is_some()),
            (RoleKind::Target, self.target.is_some()),
            (RoleKind::DataAggregator, self.data_aggregator.is_some()),
        ];
        served.extend(roles.into_iter().filter(|(_, on)| *on).map(|(role, _)| role.as_str()));
        served
    }
}

/// Full HTTP surface of a node.
pub fn app(services: NodeServices) -> Router {
    let served = services.served();
    let mut router = Router::new().route(
        "/health",
        get(move || async move { Json(json!({ "status": "healthy", "serves": served })) }),
    );

    if let Some(conductor) = services.conductor {
        router = router.merge(conductor_router(conductor));
    }
    if let Some(service) = services.concept_indexer {
        router = router.merge(concept_indexer_router(service));
    }
    if let Some(service) = services.target_finder {
        router = router.merge(target_finder_router(service));
    }
    if let Some(service) = services.target {
        router = router.merge(target_router(service));
    }
    if let Some(service) = services.data_aggregator {
        router = router.merge(data_aggregator_router(service));
    }
    router.layer(TraceLayer::new_for_http())
}

// ============================================================================
// Conductor
// ============================================================================

pub fn conductor_router(conductor: Arc<dyn ConductorService>) -> Router {
    Router::new()
        .route("/conductor/query", post(new_query))
        .route(
            "/conductor/query/{queryid}",
            get(get_query).patch(patch_query).delete(cancel_query),
        )
        .route("/conductor/subscribe", post(subscribe))
        .with_state(conductor)
}

async fn new_query(
    State(conductor): State<Arc<dyn ConductorService>>,
    payload: Result<Json<InputNewQuery>, JsonRejection>,
) -> ApiResult<Json<QueryCreated>> {
    let Json(input) = payload?;
    let query_id = conductor.new_query(input).await?;
    Ok(Json(QueryCreated { query_id }))
}

async fn get_query(
    State(conductor): State<Arc<dyn ConductorService>>,
    Path(query_id): Path<String>,
) -> ApiResult<Json<QueryView>> {
    Ok(Json(conductor.get_query(&QueryId::from(query_id)).await?))
}

async fn patch_query(
    State(conductor): State<Arc<dyn ConductorService>>,
    Path(query_id): Path<String>,
    payload: Result<Json<InputPatchQuery>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(patch) = payload?;
    let result = RoleResult::try_from(patch).map_err(ConductorError::from)?;
    conductor.patch(&QueryId::from(query_id), result).await?;
    Ok(StatusCode::OK)
}

async fn cancel_query(
    State(conductor): State<Arc<dyn ConductorService>>,
    Path(query_id): Path<String>,
) -> ApiResult<StatusCode> {
    conductor.cancel_query(&QueryId::from(query_id)).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn subscribe(
    State(conductor): State<Arc<dyn ConductorService>>,
    payload: Result<Json<InputSubscribe>, JsonRejection>,
) -> ApiResult<Json<serde_json::Value>> {
    let Json(input) = payload?;
    let outcomes = conductor.subscribe(input).await?;
    Ok(Json(json!({ "registered": outcomes.len() })))
}

// ============================================================================
// Roles
// ============================================================================

pub fn concept_indexer_router(service: Arc<dyn ConceptIndexerService>) -> Router {
    Router::new()
        .route("/conceptindexor/hash", post(hash_concepts))
        .with_state(service)
}

async fn hash_concepts(
    State(service): State<Arc<dyn ConceptIndexerService>>,
    payload: Result<Json<InputCI>, JsonRejection>,
) -> ApiResult<Json<OutputCI>> {
    let Json(input) = payload?;
    Ok(Json(service.hash_concepts(input).await?))
}

pub fn target_finder_router(service: Arc<dyn TargetFinderService>) -> Router {
    Router::new()
        .route("/targetfinder/addresses", post(find_targets))
        .with_state(service)
}

async fn find_targets(
    State(service): State<Arc<dyn TargetFinderService>>,
    payload: Result<Json<InputTF>, JsonRejection>,
) -> ApiResult<Json<OutputTF>> {
    let Json(input) = payload?;
    Ok(Json(service.find_targets(input).await?))
}

pub fn target_router(service: Arc<dyn TargetService>) -> Router {
    Router::new()
        .route("/target/query", post(dispatch_targets))
        .with_state(service)
}

async fn dispatch_targets(
    State(service): State<Arc<dyn TargetService>>,
    payload: Result<Json<InputT>, JsonRejection>,
) -> ApiResult<(StatusCode, Json<Dispatched>)> {
    let Json(input) = payload?;
    let dispatched = service.dispatch(input).await?;
    Ok((StatusCode::ACCEPTED, Json(Dispatched { dispatched })))
}

pub fn data_aggregator_router(service: Arc<dyn DataAggregatorService>) -> Router {
    Router::new()
        .route("/dataaggregation/aggregate", post(submit_aggregation))
        .route("/dataaggregation/compute", post(compute_aggregation))
        .with_state(service)
}

async fn submit_aggregation(
    State(service): State<Arc<dyn DataAggregatorService>>,
    payload: Result<Json<InputDA>, JsonRejection>,
) -> ApiResult<StatusCode> {
    let Json(input) = payload?;
    service.submit(input).await?;
    Ok(StatusCode::ACCEPTED)
}

async fn compute_aggregation(
    State(service): State<Arc<dyn DataAggregatorService>>,
    payload: Result<Json<InputDA>, JsonRejection>,
) -> ApiResult<Json<OutputDA>> {
    let Json(input) = payload?;
    Ok(Json(service.aggregate(input).await?))
}
