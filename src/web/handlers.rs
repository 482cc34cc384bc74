//! HTTP request handlers.

use super::AppState;
use crate::db::{DbError, ProbeResult, Status, Target, TargetStateRow, VALID_PROBE_KINDS};
use crate::engine::{EngineError, Thresholds};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

fn error_response(e: EngineError) -> Response {
    match e {
        EngineError::UnknownTarget(_) => (StatusCode::NOT_FOUND, e.to_string()).into_response(),
        EngineError::InvalidThresholdConfig { .. } => {
            (StatusCode::BAD_REQUEST, e.to_string()).into_response()
        }
        EngineError::Db(_) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// ============================================================================
// API: Targets
// ============================================================================

pub async fn handle_get_targets(State(state): State<AppState>) -> impl IntoResponse {
    match state.store.get_targets() {
        Ok(targets) => Json(targets).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct TargetRequest {
    pub name: String,
    pub url: String,
    pub probe_kind: String,
    #[serde(default)]
    pub keyword: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_slow_threshold")]
    pub slow_threshold_ms: f64,
    #[serde(default = "default_down_threshold")]
    pub down_threshold_ms: f64,
    #[serde(default)]
    pub check_interval_secs: i64,
    #[serde(default)]
    pub ssl_monitoring: bool,
}

fn default_slow_threshold() -> f64 {
    5_000.0
}

fn default_down_threshold() -> f64 {
    30_000.0
}

fn validate_target_request(req: &TargetRequest) -> Result<(), Response> {
    if !VALID_PROBE_KINDS.contains(&req.probe_kind.as_str()) {
        return Err((StatusCode::BAD_REQUEST, "Invalid probe kind").into_response());
    }
    Thresholds::new(req.slow_threshold_ms, req.down_threshold_ms)
        .map_err(|e| error_response(e))?;
    Ok(())
}

pub async fn handle_create_target(
    State(state): State<AppState>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    if let Err(resp) = validate_target_request(&req) {
        return resp;
    }

    let mut target = Target {
        id: 0,
        name: req.name,
        url: req.url,
        probe_kind: req.probe_kind,
        keyword: req.keyword,
        port: req.port,
        slow_threshold_ms: req.slow_threshold_ms,
        down_threshold_ms: req.down_threshold_ms,
        check_interval_secs: if req.check_interval_secs <= 0 {
            60
        } else {
            req.check_interval_secs
        },
        ssl_monitoring: req.ssl_monitoring,
        created_at: Utc::now(),
    };

    match state.store.add_target(&mut target) {
        Ok(_) => Json(target).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_update_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<TargetRequest>,
) -> impl IntoResponse {
    if let Err(resp) = validate_target_request(&req) {
        return resp;
    }

    let existing = match state.store.get_target(id) {
        Ok(t) => t,
        Err(_) => return (StatusCode::NOT_FOUND, "Target not found").into_response(),
    };

    let updated = Target {
        id,
        name: req.name,
        url: req.url,
        probe_kind: req.probe_kind,
        keyword: req.keyword,
        port: req.port,
        slow_threshold_ms: req.slow_threshold_ms,
        down_threshold_ms: req.down_threshold_ms,
        check_interval_secs: if req.check_interval_secs <= 0 {
            existing.check_interval_secs
        } else {
            req.check_interval_secs
        },
        ssl_monitoring: req.ssl_monitoring,
        created_at: existing.created_at,
    };

    match state.store.update_target(&updated) {
        Ok(_) => {
            // Edited thresholds apply from the next result onward.
            state.engine.reset_target(id).await;
            Json(updated).into_response()
        }
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_delete_target(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    if state.store.get_target(id).is_err() {
        return (StatusCode::NOT_FOUND, "Target not found").into_response();
    }

    match state.engine.remove_target(id).await {
        Ok(_) => StatusCode::NO_CONTENT.into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Probe Result Ingestion
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct SubmitResultRequest {
    pub target_id: i64,
    #[serde(default)]
    pub time: Option<DateTime<Utc>>,
    pub success: bool,
    #[serde(default)]
    pub latency_ms: Option<f64>,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub tls_days_remaining: Option<i64>,
}

pub async fn handle_post_result(
    State(state): State<AppState>,
    Json(req): Json<SubmitResultRequest>,
) -> impl IntoResponse {
    let result = ProbeResult {
        target_id: req.target_id,
        time: req.time.unwrap_or_else(Utc::now),
        success: req.success,
        latency_ms: req.latency_ms,
        status_code: req.status_code,
        tls_days_remaining: req.tls_days_remaining,
    };

    match state.engine.ingest(result).await {
        Ok(_) => StatusCode::ACCEPTED.into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Queries
// ============================================================================

#[derive(Debug, Serialize)]
pub struct OverviewEntry {
    #[serde(flatten)]
    pub target: Target,
    pub status: Status,
    pub last_change: Option<DateTime<Utc>>,
    pub last_result: Option<DateTime<Utc>>,
}

pub async fn handle_overview(State(state): State<AppState>) -> impl IntoResponse {
    let targets = match state.store.get_targets() {
        Ok(t) => t,
        Err(e) => return (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    };

    let mut entries = Vec::with_capacity(targets.len());
    for target in targets {
        let row = state
            .store
            .get_state(target.id)
            .ok()
            .flatten()
            .unwrap_or(TargetStateRow {
                target_id: target.id,
                status: Status::Unknown,
                last_change: None,
                last_result: None,
            });
        entries.push(OverviewEntry {
            target,
            status: row.status,
            last_change: row.last_change,
            last_result: row.last_result,
        });
    }

    Json(entries).into_response()
}

pub async fn handle_get_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.engine.current_status(id) {
        Ok(row) => Json(row).into_response(),
        Err(e) => error_response(e),
    }
}

#[derive(Debug, Deserialize)]
pub struct IncidentsQuery {
    #[serde(default = "default_incident_limit")]
    pub limit: i32,
}

fn default_incident_limit() -> i32 {
    50
}

impl Default for IncidentsQuery {
    fn default() -> Self {
        Self {
            limit: default_incident_limit(),
        }
    }
}

pub async fn handle_get_target_incidents(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<IncidentsQuery>,
) -> impl IntoResponse {
    if state.store.get_target(id).is_err() {
        return (StatusCode::NOT_FOUND, "Target not found").into_response();
    }

    match state.store.get_incidents_for_target(id, query.limit) {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_incident(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> impl IntoResponse {
    match state.store.get_incident(id) {
        Ok(incident) => Json(incident).into_response(),
        Err(DbError::NotFound) => (StatusCode::NOT_FOUND, "Incident not found").into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

pub async fn handle_get_incidents(
    State(state): State<AppState>,
    Query(query): Query<IncidentsQuery>,
) -> impl IntoResponse {
    match state.store.get_incidents(query.limit) {
        Ok(incidents) => Json(incidents).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

#[derive(Debug, Deserialize)]
pub struct UptimeQuery {
    #[serde(default = "default_window_hours")]
    pub window_hours: i64,
}

fn default_window_hours() -> i64 {
    24
}

pub async fn handle_get_uptime(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Query(query): Query<UptimeQuery>,
) -> impl IntoResponse {
    match state.engine.uptime_stats(id, query.window_hours.max(1)) {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => error_response(e),
    }
}

// ============================================================================
// API: Notifications
// ============================================================================

pub async fn handle_test_notification(State(state): State<AppState>) -> impl IntoResponse {
    if state.engine.queue_test_alert() {
        (StatusCode::ACCEPTED, "Test notification queued").into_response()
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            "Alert queue unavailable",
        )
            .into_response()
    }
}
