//! Health check endpoint for liveness checks.
//!
//! Backport jobs run in the background, so a successful response only means
//! the process is up and its runtime is scheduling tasks.

use axum::http::StatusCode;

/// Returns 200 OK with the text "OK".
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
