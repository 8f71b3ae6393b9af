pub mod admin;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod ratelimit;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::middleware::{from_fn, from_fn_with_state};
use axum::routing::{get, post};

pub use error::{ApiError, ErrorType};
pub use state::{AppState, CredentialSource};

/// Assembles the full ingress router: client endpoints behind the
/// key/rate/model gates, the admin surface behind the master secret, and
/// CORS plus request logging around everything.
pub fn build_router(state: Arc<AppState>) -> Router {
    let client = Router::new()
        .route("/v1/models", get(handlers::list_models))
        .route("/v1/chat/completions", post(handlers::chat_completions))
        .route("/v1/responses", post(handlers::responses))
        .route("/v1/messages", post(handlers::messages))
        .layer(from_fn_with_state(state.clone(), middleware::model_access))
        .layer(from_fn_with_state(state.clone(), middleware::rate_limit))
        .layer(from_fn_with_state(state.clone(), middleware::api_key_auth))
        .with_state(state.clone());

    Router::new()
        .route("/health", get(handlers::health))
        .merge(client)
        .nest("/admin", admin::admin_router(state))
        .layer(from_fn(middleware::request_logger))
        .layer(from_fn(middleware::cors))
}
