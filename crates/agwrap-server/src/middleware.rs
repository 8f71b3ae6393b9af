//! Ingress middleware: CORS, request logging, API-key validation, rate
//! limiting, model-access enforcement and the admin guard.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body;
use axum::extract::{ConnectInfo, Request, State};
use axum::http::{HeaderMap, HeaderValue, Method, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::{info, warn};

use agwrap_common::json;

use crate::error::ApiError;
use crate::state::AppState;

pub async fn cors(req: Request, next: Next) -> Response {
    let origin = req
        .headers()
        .get(header::ORIGIN)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);

    if req.method() == Method::OPTIONS {
        let mut resp = StatusCode::NO_CONTENT.into_response();
        apply_cors_headers(resp.headers_mut(), origin.as_deref());
        return resp;
    }

    let mut resp = next.run(req).await;
    apply_cors_headers(resp.headers_mut(), origin.as_deref());
    resp
}

fn apply_cors_headers(headers: &mut HeaderMap, origin: Option<&str>) {
    let allow_origin = origin
        .and_then(|o| HeaderValue::from_str(o).ok())
        .unwrap_or(HeaderValue::from_static("*"));
    headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, allow_origin);
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_CREDENTIALS,
        HeaderValue::from_static("true"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("GET, POST, PUT, PATCH, DELETE, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type, Authorization, X-API-Key, X-Requested-With"),
    );
    headers.insert(
        header::ACCESS_CONTROL_MAX_AGE,
        HeaderValue::from_static("86400"),
    );
}

pub async fn request_logger(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();

    let resp = next.run(req).await;

    info!(
        event = "request_completed",
        method = %method,
        path = %path,
        status = resp.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis(),
    );
    resp
}

/// Validates the bearer API key against the static list and the key
/// store. A no-op when neither is configured.
pub async fn api_key_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let store_active = state.key_store.is_some();
    if state.cfg.api_keys.is_empty() && !store_active {
        return next.run(req).await;
    }

    let key = extract_api_key(req.headers()).unwrap_or_default();
    let mut valid = state.is_static_key(&key);
    if !valid && store_active {
        valid = state
            .key_store
            .as_ref()
            .is_some_and(|store| store.validate(&key));
    }

    if !valid {
        return ApiError::authentication("Invalid API key").into_response();
    }
    next.run(req).await
}

/// Token-bucket rate limiting per key (or per client IP when the request
/// carries no key). Per-key ceilings from the key store override the
/// global limit; zero means unlimited.
pub async fn rate_limit(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    let key = extract_api_key(req.headers());

    let mut limit = state.cfg.rate_limit;
    if let Some(key) = key.as_deref()
        && let Some(record) = state.key_record(key)
        && record.rate_limit > 0
    {
        limit = record.rate_limit;
    }

    if limit == 0 {
        return next.run(req).await;
    }

    let bucket_key = key.unwrap_or_else(|| client_ip(&req));
    if !state.limiters.allow(&bucket_key, limit) {
        return ApiError::rate_limit("Rate limit exceeded. Please try again later.")
            .into_response();
    }
    next.run(req).await
}

/// Enforces the calling key's model allow-list on POST bodies. The body
/// is buffered, inspected and restored for the handler.
pub async fn model_access(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if req.method() != Method::POST {
        return next.run(req).await;
    }

    let Some(key) = extract_api_key(req.headers()) else {
        return next.run(req).await;
    };
    let Some(record) = state.key_record(&key) else {
        return next.run(req).await;
    };
    if record.allowed_models.is_empty() {
        return next.run(req).await;
    }

    let (parts, body) = req.into_parts();
    let bytes = match axum::body::to_bytes(body, usize::MAX).await {
        Ok(bytes) => bytes,
        Err(_) => {
            return ApiError::invalid_request("Failed to read request body").into_response();
        }
    };

    // An absent model field passes; the default is applied downstream.
    if let Ok(parsed) = serde_json::from_slice::<serde_json::Value>(&bytes)
        && let Some(model) = json::get_str(&parsed, "model")
        && !model.is_empty()
        && !record.allowed_models.iter().any(|m| m == model)
    {
        warn!(model, "api key attempted to use restricted model");
        return ApiError::permission(format!(
            "Model '{model}' is not allowed for this API key"
        ))
        .into_response();
    }

    let req = Request::from_parts(parts, Body::from(bytes));
    next.run(req).await
}

/// Guards the admin surface with the configured master secret.
pub async fn admin_auth(
    State(state): State<Arc<AppState>>,
    req: Request,
    next: Next,
) -> Response {
    if state.cfg.master_secret.is_empty() {
        return ApiError::configuration("Master secret not configured").into_response();
    }

    let Some(value) = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    else {
        return ApiError::authentication("Missing authorization header").into_response();
    };

    match value.trim().strip_prefix("Bearer ") {
        Some(token) if token == state.cfg.master_secret => next.run(req).await,
        _ => ApiError::authentication("Invalid master secret").into_response(),
    }
}

/// Bearer token from `Authorization` or the `x-api-key` header.
pub fn extract_api_key(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers.get(header::AUTHORIZATION)
        && let Ok(text) = value.to_str()
        && let Some(token) = text.trim().strip_prefix("Bearer ")
        && !token.trim().is_empty()
    {
        return Some(token.trim().to_string());
    }
    headers
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn client_ip(req: &Request) -> String {
    if let Some(forwarded) = req
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        && let Some(first) = forwarded.split(',').next()
        && !first.trim().is_empty()
    {
        return first.trim().to_string();
    }
    req.extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|info| info.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}
