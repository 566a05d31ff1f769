use super::{ApiState, ErrorResponse};
use crate::error::SchedulerError;
use crate::schedule::{ScheduleConfig, SchedulePatch};
use crate::stats::SchedulerStats;
use crate::status::StatusSnapshot;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::info;

/// Create entity administration router
pub fn create_entity_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/entities", get(list_entities))
        .route(
            "/api/entities/:id",
            get(get_entity)
                .put(put_entity)
                .patch(patch_entity)
                .delete(delete_entity),
        )
        .route("/api/entities/:id/enable", post(enable_entity))
        .route("/api/entities/:id/disable", post(disable_entity))
        .route("/api/entities/:id/refresh", post(refresh_entity))
        .route("/api/entities/:id/status", get(entity_status))
        .route("/api/status", get(all_statuses))
        .route("/api/stats", get(stats))
        .with_state(state)
}

/// GET /api/entities - All schedules, ordered by entity id
async fn list_entities(State(state): State<Arc<ApiState>>) -> Json<Vec<ScheduleConfig>> {
    Json(state.scheduler.list_schedules())
}

/// GET /api/entities/:id
async fn get_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleConfig>, ApiError> {
    state
        .scheduler
        .get_schedule(&id)
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// PUT /api/entities/:id - Register or replace an entity.
///
/// Body fields are optional; omitted intervals use the configured defaults.
/// Returns 201 for a new entity, 200 for a replacement, 400 for an invalid
/// schedule.
async fn put_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(body): Json<SchedulePatch>,
) -> Result<(StatusCode, Json<ScheduleConfig>), ApiError> {
    let mut config = state.scheduler.new_schedule(id.clone());
    config.apply(&body);

    let replaced = state.scheduler.add_entity(config.clone())?;
    info!(entity_id = %id, replaced = replaced.is_some(), "Entity registered via API");

    let status = if replaced.is_some() {
        StatusCode::OK
    } else {
        StatusCode::CREATED
    };
    Ok((status, Json(config)))
}

/// PATCH /api/entities/:id - Partial update, intervals merged key by key
async fn patch_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
    Json(patch): Json<SchedulePatch>,
) -> Result<Json<ScheduleConfig>, ApiError> {
    let config = state.scheduler.update_schedule(&id, patch)?;
    Ok(Json(config))
}

/// DELETE /api/entities/:id
async fn delete_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.remove_entity(&id)?;
    info!(entity_id = %id, "Entity removed via API");
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/entities/:id/enable
async fn enable_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleConfig>, ApiError> {
    state.scheduler.resume(&id)?;
    current_schedule(&state, id)
}

/// POST /api/entities/:id/disable
async fn disable_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<ScheduleConfig>, ApiError> {
    state.scheduler.pause(&id)?;
    current_schedule(&state, id)
}

fn current_schedule(state: &ApiState, id: String) -> Result<Json<ScheduleConfig>, ApiError> {
    state
        .scheduler
        .get_schedule(&id)
        .map(Json)
        .ok_or(ApiError::NotFound(id))
}

/// POST /api/entities/:id/refresh - Out-of-band fetch; result arrives as events
async fn refresh_entity(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<StatusCode, ApiError> {
    state.scheduler.refresh_now(&id)?;
    Ok(StatusCode::ACCEPTED)
}

/// GET /api/entities/:id/status - Last known snapshot
async fn entity_status(
    State(state): State<Arc<ApiState>>,
    Path(id): Path<String>,
) -> Result<Json<StatusSnapshot>, ApiError> {
    if state.scheduler.get_schedule(&id).is_none() {
        return Err(ApiError::NotFound(id));
    }

    state
        .scheduler
        .last_status(&id)
        .map(Json)
        .ok_or(ApiError::NoStatus(id))
}

/// GET /api/status - Last known snapshot of every entity
async fn all_statuses(State(state): State<Arc<ApiState>>) -> Json<BTreeMap<String, StatusSnapshot>> {
    Json(state.scheduler.all_statuses())
}

/// GET /api/stats
async fn stats(State(state): State<Arc<ApiState>>) -> Json<SchedulerStats> {
    Json(state.scheduler.stats())
}

/// API error types
#[derive(Debug)]
pub enum ApiError {
    /// Entity is not registered
    NotFound(String),
    /// Entity is registered but has never been fetched successfully
    NoStatus(String),
    /// Request would produce an unusable schedule
    BadRequest(String),
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        match err {
            SchedulerError::NotFound(id) => ApiError::NotFound(id),
            err @ SchedulerError::InvalidSchedule { .. } => ApiError::BadRequest(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::NotFound(id) => (
                StatusCode::NOT_FOUND,
                SchedulerError::NotFound(id).to_string(),
            ),
            ApiError::NoStatus(id) => (
                StatusCode::NOT_FOUND,
                format!("no status known yet for entity '{}'", id),
            ),
            ApiError::BadRequest(message) => (StatusCode::BAD_REQUEST, message),
        };

        let body = Json(ErrorResponse {
            error: error_message,
        });

        (status, body).into_response()
    }
}
