//! HTTP router and handler

use std::sync::Arc;

use axum::{
    Router,
    body::to_bytes,
    extract::{Request, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

/// Reply to every request that made it through the handshake.
pub const ACKNOWLEDGEMENT: &str = "I really think secret messages are silly *chuckle*";

/// Reply when the request body cannot be read.
pub const BODY_ERROR: &str = "Unable to read body";

/// Shared application state
#[derive(Debug)]
pub struct AppState {
    /// Upper bound on request bodies
    pub max_body_bytes: usize,
}

/// Create the router: every method and path lands on the same handler.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .fallback(acknowledge)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn acknowledge(State(state): State<Arc<AppState>>, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    match to_bytes(body, state.max_body_bytes).await {
        Ok(body) => {
            debug!(
                method = %parts.method,
                path = parts.uri.path(),
                bytes = body.len(),
                "Message received"
            );
            (StatusCode::OK, ACKNOWLEDGEMENT).into_response()
        }
        Err(e) => {
            warn!(
                method = %parts.method,
                path = parts.uri.path(),
                error = %e,
                "Failed to read request body"
            );
            (StatusCode::BAD_REQUEST, BODY_ERROR).into_response()
        }
    }
}
