// Administrative HTTP API and event stream

pub mod entities;
pub mod stream;

pub use entities::{create_entity_router, ApiError};
pub use stream::create_stream_router;

use crate::scheduler::Scheduler;
use axum::Router;
use serde::Serialize;
use std::sync::Arc;

/// Shared state for every API router
pub struct ApiState {
    pub scheduler: Scheduler,
}

/// Error response
#[derive(Serialize)]
pub(crate) struct ErrorResponse {
    pub(crate) error: String,
}

/// Full API: entity administration, status and stats reads, SSE stream
pub fn create_router(state: Arc<ApiState>) -> Router {
    create_entity_router(state.clone()).merge(create_stream_router(state))
}
