use super::ApiState;
use axum::{
    body::Body,
    extract::{Query, State},
    http::header,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use futures::StreamExt;
use serde::Deserialize;
use std::collections::HashSet;
use std::convert::Infallible;
use std::sync::Arc;
use tracing::info;

/// Query parameters for the event stream
#[derive(Deserialize)]
pub struct StreamParams {
    /// Comma-separated entity ids; absent or empty streams every entity
    pub entities: Option<String>,
}

/// Create event stream router
pub fn create_stream_router(state: Arc<ApiState>) -> Router {
    Router::new()
        .route("/api/events/stream", get(event_stream))
        .with_state(state)
}

/// Parse `?entities=a,b` into a filter set
pub(crate) fn parse_filter(raw: Option<&str>) -> Option<HashSet<String>> {
    let ids: HashSet<String> = raw?
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    if ids.is_empty() {
        None
    } else {
        Some(ids)
    }
}

/// GET /api/events/stream - Server-Sent Events
///
/// The connection owns its subscription; the client disconnecting drops the
/// body stream, which unsubscribes and stops the heartbeat.
async fn event_stream(
    State(state): State<Arc<ApiState>>,
    Query(params): Query<StreamParams>,
) -> Response {
    let filter = parse_filter(params.entities.as_deref());
    info!(
        filtered = filter.is_some(),
        subscribers = state.scheduler.dispatcher().subscriber_count() + 1,
        "Event stream connected"
    );

    let stream = state.scheduler.stream_for(filter);
    let body = Body::from_stream(stream.map(Ok::<_, Infallible>));

    (
        [
            (header::CONTENT_TYPE, "text/event-stream"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}
