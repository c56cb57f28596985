//! HTTP routes over `UptimeService`, one per operation in spec.md §6.
//! Request validation/shaping beyond what `uptime-core` already validates
//! is intentionally thin here — that plumbing is explicitly out of scope
//! (spec.md §1).

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, patch, post};
use axum::{Json, Router};
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::instrument;
use uptime_core::model::{NodePatch, NodeSpec, NodeStatus};
use uptime_core::probe::ProbeTarget;
use uptime_core::store::{ListNodesQuery, NodeSortBy, SortOrder};
use uptime_core::UptimeService;

use crate::auth::UserId;
use crate::error_response::ApiError;

pub fn router(service: UptimeService) -> Router {
    Router::new()
        .route("/api/v1/nodes", post(create_node).get(list_nodes))
        .route(
            "/api/v1/nodes/:node_id",
            get(get_node).patch(update_node).delete(delete_node),
        )
        .route("/api/v1/nodes/:node_id/pause", post(pause_node))
        .route("/api/v1/nodes/:node_id/resume", post(resume_node))
        .route("/api/v1/nodes/:node_id/test", post(test_probe))
        .route("/api/v1/test-connection", post(test_connection))
        .route("/api/v1/dashboard", get(dashboard_overview))
        .route("/api/v1/status", get(system_status))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(service)
}

#[instrument(skip(service, spec))]
async fn create_node(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Json(spec): Json<NodeSpec>,
) -> Result<(StatusCode, Json<uptime_core::model::Node>), ApiError> {
    let node = service.create_node(&user_id, spec).await?;
    Ok((StatusCode::CREATED, Json(node)))
}

#[instrument(skip(service, patch))]
async fn update_node(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Path(node_id): Path<String>,
    Json(patch): Json<NodePatch>,
) -> Result<Json<uptime_core::model::Node>, ApiError> {
    let node = service.update_node(&user_id, &node_id, patch).await?;
    Ok(Json(node))
}

#[instrument(skip(service))]
async fn pause_node(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Path(node_id): Path<String>,
) -> Result<Json<uptime_core::model::Node>, ApiError> {
    let node = service.pause_node(&user_id, &node_id).await?;
    Ok(Json(node))
}

#[instrument(skip(service))]
async fn resume_node(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Path(node_id): Path<String>,
) -> Result<Json<uptime_core::model::Node>, ApiError> {
    let node = service.resume_node(&user_id, &node_id).await?;
    Ok(Json(node))
}

#[instrument(skip(service))]
async fn delete_node(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Path(node_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    service.delete_node(&user_id, &node_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[instrument(skip(service))]
async fn test_probe(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Path(node_id): Path<String>,
) -> Result<Json<uptime_core::probe::ProbeOutcome>, ApiError> {
    let outcome = service.test_probe(&user_id, &node_id).await?;
    Ok(Json(outcome))
}

/// Same shape as `NodeSpec` minus `node_id`/`name`/`failure_threshold`:
/// `TestConnection` probes an arbitrary configuration with no node
/// behind it (spec.md §6).
#[derive(Debug, Deserialize)]
struct TestConnectionRequest {
    endpoint_url: String,
    #[serde(default)]
    method: Option<uptime_core::model::HttpMethod>,
    #[serde(default)]
    headers: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    body: Vec<u8>,
    #[serde(default)]
    expected_status_codes: Option<std::collections::BTreeSet<u16>>,
}

#[instrument(skip(service, request))]
async fn test_connection(
    State(service): State<UptimeService>,
    Json(request): Json<TestConnectionRequest>,
) -> Json<uptime_core::probe::ProbeOutcome> {
    let target = ProbeTarget {
        endpoint_url: request.endpoint_url,
        method: request.method.unwrap_or_default(),
        headers: request.headers,
        body: request.body,
        expected_status_codes: request
            .expected_status_codes
            .unwrap_or_else(|| service.default_expected_status_codes().clone()),
    };
    Json(service.test_connection(target).await)
}

#[instrument(skip(service))]
async fn get_node(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Path(node_id): Path<String>,
) -> Result<Json<uptime_core::service::NodeDetail>, ApiError> {
    let detail = service.get_node(&user_id, &node_id).await?;
    Ok(Json(detail))
}

#[derive(Debug, Deserialize)]
struct ListNodesParams {
    page: Option<u32>,
    limit: Option<u32>,
    search: Option<String>,
    status: Option<NodeStatus>,
    sort_by: Option<NodeSortBy>,
    sort_order: Option<SortOrder>,
}

#[instrument(skip(service))]
async fn list_nodes(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
    Query(params): Query<ListNodesParams>,
) -> Result<Json<uptime_core::store::PaginatedNodes>, ApiError> {
    let query = ListNodesQuery {
        page: params.page.unwrap_or(1),
        limit: params.limit.unwrap_or(20),
        search: params.search,
        status: params.status,
        sort_by: params.sort_by.unwrap_or(NodeSortBy::CreatedAt),
        sort_order: params.sort_order.unwrap_or(SortOrder::Descending),
    };
    let result = service.list_nodes(&user_id, query).await?;
    Ok(Json(result))
}

#[instrument(skip(service))]
async fn dashboard_overview(
    State(service): State<UptimeService>,
    UserId(user_id): UserId,
) -> Result<Json<uptime_core::telemetry::DashboardReport>, ApiError> {
    let report = service.dashboard_overview(&user_id).await?;
    Ok(Json(report))
}

/// Unauthenticated (spec.md §6).
#[instrument(skip(service))]
async fn system_status(
    State(service): State<UptimeService>,
) -> Result<Json<uptime_core::service::SystemStatusReport>, ApiError> {
    let report = service.system_status().await?;
    Ok(Json(report))
}
