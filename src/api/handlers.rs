use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Serialize;
use std::sync::Arc;

use crate::bus::DispatchBus;
use crate::metrics::Metrics;
use crate::notify::{
    send_test_notification, ChannelRegistry, Dispatcher, TestNotificationError,
    TestNotificationRequest,
};
use crate::tenant::{MultiOrgAlertmanager, SupervisorError};

/// Application state shared across handlers
pub struct AppState {
    pub supervisor: Arc<MultiOrgAlertmanager>,
    pub dispatcher: Arc<Dispatcher>,
    pub registry: Arc<ChannelRegistry>,
    pub bus: Arc<dyn DispatchBus>,
    pub metrics: Arc<Metrics>,
}

// ============================================================================
// Health Check
// ============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
    })
}

// ============================================================================
// Tenant status
// ============================================================================

#[derive(Serialize)]
pub struct AlertmanagerStatusResponse {
    pub org_id: i64,
    pub ready: bool,
    pub receiver_count: usize,
}

pub async fn alertmanager_status(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i64>,
) -> Result<Json<AlertmanagerStatusResponse>, ApiError> {
    let am = state.supervisor.alertmanager_for(org_id)?;
    let receiver_count = am.config().map(|c| c.receivers.len()).unwrap_or(0);
    Ok(Json(AlertmanagerStatusResponse {
        org_id,
        ready: am.ready(),
        receiver_count,
    }))
}

// ============================================================================
// Test notifications
// ============================================================================

#[derive(Serialize)]
pub struct TestNotificationResponse {
    pub sent: bool,
}

pub async fn test_notification(
    State(state): State<Arc<AppState>>,
    Path(org_id): Path<i64>,
    Json(request): Json<TestNotificationRequest>,
) -> Result<Json<TestNotificationResponse>, ApiError> {
    send_test_notification(
        state.bus.clone(),
        &state.dispatcher,
        &state.registry,
        org_id,
        &request,
    )
    .await?;
    Ok(Json(TestNotificationResponse { sent: true }))
}

// ============================================================================
// Channel catalog
// ============================================================================

pub async fn list_notifiers(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let descriptors: Vec<_> = state.registry.descriptors().collect();
    Json(serde_json::json!({ "notifiers": descriptors }))
}

// ============================================================================
// Cluster status
// ============================================================================

#[derive(Serialize)]
pub struct ClusterStatusResponse {
    pub name: String,
    pub position: usize,
    pub members: usize,
}

pub async fn cluster_status(State(state): State<Arc<AppState>>) -> Json<ClusterStatusResponse> {
    let peer = state.supervisor.peer();
    Json(ClusterStatusResponse {
        name: peer.name(),
        position: peer.position(),
        members: peer.member_count(),
    })
}

// ============================================================================
// Stats
// ============================================================================

pub async fn stats(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "evaluations": state.metrics.evaluations(),
        "notifications_sent": state.metrics.notifications_sent(),
        "notifications_failed": state.metrics.notifications_failed(),
        "version_conflicts": state.metrics.version_conflicts(),
        "discovered_org_configs": state.metrics.discovered_org_configs(),
        "active_org_configs": state.metrics.active_org_configs(),
        "tracked_orgs": state.supervisor.org_count(),
    }))
}

// ============================================================================
// Errors
// ============================================================================

pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Conflict(String),
    Internal(String),
}

impl From<SupervisorError> for ApiError {
    fn from(err: SupervisorError) -> Self {
        match err {
            SupervisorError::NoAlertmanagerForOrg(_) => ApiError::NotFound(err.to_string()),
            SupervisorError::AlertmanagerNotReady(_) => ApiError::Conflict(err.to_string()),
            SupervisorError::Bus(_) => ApiError::Internal(err.to_string()),
        }
    }
}

impl From<TestNotificationError> for ApiError {
    fn from(err: TestNotificationError) -> Self {
        match err {
            TestNotificationError::MissingTarget | TestNotificationError::Validation(_) => {
                ApiError::BadRequest(err.to_string())
            }
            TestNotificationError::Bus(crate::bus::BusError::NotFound(_)) => {
                ApiError::NotFound(err.to_string())
            }
            _ => ApiError::Internal(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
