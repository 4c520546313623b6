//! HTTP surface of the bot.
//!
//! Only a liveness check is served:
//!
//! - `GET /health` - Returns 200 if the server is running

pub mod health;

pub use health::health_handler;

/// Builds the axum Router.
pub fn build_router() -> axum::Router {
    use axum::routing::get;

    axum::Router::new().route("/health", get(health_handler))
}
