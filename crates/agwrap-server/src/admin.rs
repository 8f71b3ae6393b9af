//! Admin surface: API-key lifecycle and the admin-facing model list,
//! guarded by the master secret.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::middleware;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use agwrap_auth::keystore::{KeyStore, KeyUpdate};
use agwrap_auth::KeyStoreError;

use crate::error::ApiError;
use crate::middleware::admin_auth;
use crate::state::AppState;

pub fn admin_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/keys", get(list_keys).post(create_key))
        .route("/keys/{key}", axum::routing::put(update_key).delete(revoke_key))
        .route("/models", get(admin_models))
        .layer(middleware::from_fn_with_state(state.clone(), admin_auth))
        .with_state(state)
}

#[derive(Debug, Default, Deserialize)]
struct CreateKeyRequest {
    #[serde(default)]
    note: String,
    #[serde(default)]
    rate_limit: u32,
    #[serde(default)]
    allowed_models: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct UpdateKeyRequest {
    note: Option<String>,
    rate_limit: Option<u32>,
    allowed_models: Option<Vec<String>>,
}

async fn list_keys(State(state): State<Arc<AppState>>) -> Response {
    match key_store(&state) {
        Ok(store) => Json(store.list()).into_response(),
        Err(err) => err.into_response(),
    }
}

async fn create_key(State(state): State<Arc<AppState>>, body: bytes::Bytes) -> Response {
    let store = match key_store(&state) {
        Ok(store) => store,
        Err(err) => return err.into_response(),
    };
    let req: CreateKeyRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(err) => return err.into_response(),
    };
    match store.generate(req.note, req.rate_limit, req.allowed_models) {
        Ok(record) => (StatusCode::CREATED, Json(record)).into_response(),
        Err(err) => {
            ApiError::internal(format!("Failed to generate API key: {err}")).into_response()
        }
    }
}

async fn update_key(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    body: bytes::Bytes,
) -> Response {
    let store = match key_store(&state) {
        Ok(store) => store,
        Err(err) => return err.into_response(),
    };
    let req: UpdateKeyRequest = match parse_body(&body) {
        Ok(req) => req,
        Err(err) => return err.into_response(),
    };
    let update = KeyUpdate {
        note: req.note,
        rate_limit: req.rate_limit,
        allowed_models: req.allowed_models,
    };
    match store.update(&key, update) {
        Ok(record) => Json(record).into_response(),
        Err(KeyStoreError::NotFound) => ApiError::not_found("key not found").into_response(),
        Err(err) => {
            ApiError::internal(format!("Failed to update API key: {err}")).into_response()
        }
    }
}

async fn revoke_key(State(state): State<Arc<AppState>>, Path(key): Path<String>) -> Response {
    let store = match key_store(&state) {
        Ok(store) => store,
        Err(err) => return err.into_response(),
    };
    match store.revoke(&key) {
        Ok(()) => Json(json!({"status": "revoked", "key": key})).into_response(),
        Err(KeyStoreError::NotFound) => ApiError::not_found("key not found").into_response(),
        Err(err) => {
            ApiError::internal(format!("Failed to revoke API key: {err}")).into_response()
        }
    }
}

/// Full model descriptors, thinking metadata included.
async fn admin_models(State(state): State<Arc<AppState>>) -> Response {
    let data: Vec<_> = state.registry.list().into_iter().cloned().collect();
    Json(json!({"object": "list", "data": data})).into_response()
}

fn key_store(state: &AppState) -> Result<&KeyStore, ApiError> {
    state
        .key_store
        .as_ref()
        .ok_or_else(|| ApiError::configuration("Key store not configured"))
}

/// An empty body is valid and means "all defaults".
fn parse_body<T: Default + serde::de::DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    if body.is_empty() {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|_| ApiError::invalid_request("Invalid request body"))
}
