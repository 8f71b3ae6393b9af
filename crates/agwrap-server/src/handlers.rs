//! Client-endpoint handlers: model listing, the two OpenAI surfaces and
//! the Anthropic Messages surface.

use std::collections::VecDeque;
use std::convert::Infallible;
use std::sync::Arc;

use axum::Json;
use axum::body::Body;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use serde_json::{Value, json};
use tracing::warn;

use agwrap_common::json;
use agwrap_executor::{ExecuteError, StreamChunk, UpstreamRequest};
use agwrap_translate::claude::ClaudeStreamState;
use agwrap_translate::openai::OpenAiStreamState;
use agwrap_translate::{claude, openai, thinking};

use crate::error::ApiError;
use crate::middleware::extract_api_key;
use crate::state::AppState;

const DEFAULT_MODEL: &str = "gemini-3-flash";

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

/// OpenAI-compatible model listing, filtered by the calling key's
/// allow-list when one is set.
pub async fn list_models(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> impl IntoResponse {
    let allowed = extract_api_key(&headers)
        .and_then(|key| state.key_record(&key))
        .map(|record| record.allowed_models)
        .filter(|models| !models.is_empty());

    let data: Vec<Value> = state
        .registry
        .list()
        .into_iter()
        .filter(|model| {
            allowed
                .as_ref()
                .is_none_or(|allowed| allowed.iter().any(|m| *m == model.id))
        })
        .map(|model| {
            json!({
                "id": model.id,
                "object": model.object,
                "created": model.created,
                "owned_by": model.owned_by,
            })
        })
        .collect();

    Json(json!({"object": "list", "data": data}))
}

/// OpenAI Chat Completions.
pub async fn chat_completions(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    openai_generate(state, body).await
}

/// OpenAI Responses. Reuses the Chat Completions translator.
pub async fn responses(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    openai_generate(state, body).await
}

async fn openai_generate(state: Arc<AppState>, body: Bytes) -> Response {
    let (raw, model, stream) = match parse_generate_request(&state, &body) {
        Ok(parts) => parts,
        Err(err) => return err.into_response(),
    };

    let mut payload = openai::to_upstream(&state.registry, &model, &raw);
    thinking::finalize(&state.registry, &model, &mut payload);

    let Some(mut creds) = state.checkout_credentials() else {
        return no_credentials();
    };
    let request = UpstreamRequest {
        model: model.clone(),
        payload,
        stream,
    };
    let thinking_as_content = state.cfg.thinking_as_content;

    if stream {
        let result = state.executor.execute_stream(&mut creds, request).await;
        state.commit_credentials(creds);
        match result {
            Ok(rx) => sse_response(rx, OpenAiStreamState::new(model, thinking_as_content)),
            Err(err) => upstream_error_response(err),
        }
    } else {
        let result = state.executor.execute(&mut creds, request).await;
        state.commit_credentials(creds);
        match result {
            Ok(resp) => {
                match openai::to_openai_non_stream(&resp.body, thinking_as_content) {
                    Some(converted) => Json(converted).into_response(),
                    None => ApiError::api(
                        StatusCode::BAD_GATEWAY,
                        "unexpected upstream response shape",
                    )
                    .into_response(),
                }
            }
            Err(err) => upstream_error_response(err),
        }
    }
}

/// Anthropic Messages.
pub async fn messages(State(state): State<Arc<AppState>>, body: Bytes) -> Response {
    let (raw, model, stream) = match parse_generate_request(&state, &body) {
        Ok(parts) => parts,
        Err(err) => return err.into_response(),
    };

    let mut payload = claude::to_upstream(&state.registry, &model, &raw);
    thinking::finalize(&state.registry, &model, &mut payload);

    let Some(mut creds) = state.checkout_credentials() else {
        return no_credentials();
    };
    let request = UpstreamRequest {
        model: model.clone(),
        payload,
        stream,
    };

    if stream {
        let result = state.executor.execute_stream(&mut creds, request).await;
        state.commit_credentials(creds);
        match result {
            Ok(rx) => sse_response(rx, ClaudeStreamState::new(model)),
            Err(err) => upstream_error_response(err),
        }
    } else {
        let result = state.executor.execute(&mut creds, request).await;
        state.commit_credentials(creds);
        match result {
            Ok(resp) => match claude::to_claude_non_stream(&resp.body) {
                Some(converted) => Json(converted).into_response(),
                None => ApiError::api(
                    StatusCode::BAD_GATEWAY,
                    "unexpected upstream response shape",
                )
                .into_response(),
            },
            Err(err) => upstream_error_response(err),
        }
    }
}

fn parse_generate_request(
    state: &AppState,
    body: &Bytes,
) -> Result<(Value, String, bool), ApiError> {
    if !state.has_credentials() {
        return Err(ApiError::authentication(
            "No credentials configured. Run 'agwrap login' to authenticate.",
        ));
    }
    let raw: Value = serde_json::from_slice(body)
        .map_err(|_| ApiError::invalid_request("Request body is not valid JSON"))?;
    let model = json::get_str(&raw, "model")
        .filter(|m| !m.is_empty())
        .unwrap_or(DEFAULT_MODEL)
        .to_string();
    let stream = json::get_bool(&raw, "stream").unwrap_or(false);
    Ok((raw, model, stream))
}

fn no_credentials() -> Response {
    ApiError::authentication("No credentials configured. Run 'agwrap login' to authenticate.")
        .into_response()
}

/// Upstream failures after translation. A non-2xx with a body passes
/// through with the upstream's status; transport exhaustion maps to
/// `api_error`.
fn upstream_error_response(err: ExecuteError) -> Response {
    match err {
        ExecuteError::Upstream { status, body } if !body.is_empty() => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            let mut resp = Response::new(Body::from(body));
            *resp.status_mut() = status;
            resp.headers_mut().insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/json"),
            );
            resp
        }
        ExecuteError::Upstream { status, .. } => {
            let status =
                StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
            ApiError::api(status, format!("upstream error: status {status}")).into_response()
        }
        ExecuteError::Exhausted(message) => {
            ApiError::api(StatusCode::BAD_GATEWAY, message).into_response()
        }
    }
}

/// The two streaming state machines behind one driving loop.
trait StreamTranslator: Send + 'static {
    fn push_chunk(&mut self, raw: &[u8]) -> Vec<Bytes>;
    fn finish(&mut self) -> Vec<Bytes>;
}

impl StreamTranslator for OpenAiStreamState {
    fn push_chunk(&mut self, raw: &[u8]) -> Vec<Bytes> {
        OpenAiStreamState::push_chunk(self, raw)
    }
    fn finish(&mut self) -> Vec<Bytes> {
        OpenAiStreamState::finish(self)
    }
}

impl StreamTranslator for ClaudeStreamState {
    fn push_chunk(&mut self, raw: &[u8]) -> Vec<Bytes> {
        ClaudeStreamState::push_chunk(self, raw)
    }
    fn finish(&mut self) -> Vec<Bytes> {
        ClaudeStreamState::finish(self)
    }
}

/// Drives the translator state machine over the executor channel and
/// streams the resulting SSE frames to the client. Errors after the
/// headers are flushed can only be logged; the stream is closed after the
/// translator's terminal frames.
fn sse_response<T: StreamTranslator>(
    rx: tokio::sync::mpsc::Receiver<StreamChunk>,
    translator: T,
) -> Response {
    let stream = futures_util::stream::unfold(
        (rx, translator, VecDeque::<Bytes>::new(), false),
        |(mut rx, mut translator, mut pending, mut done)| async move {
            loop {
                if let Some(frame) = pending.pop_front() {
                    return Some((Ok::<_, Infallible>(frame), (rx, translator, pending, done)));
                }
                if done {
                    return None;
                }
                match rx.recv().await {
                    Some(StreamChunk::Data(bytes)) => {
                        pending.extend(translator.push_chunk(&bytes));
                    }
                    Some(StreamChunk::Error(message)) => {
                        warn!(error = %message, "stream terminated mid-flight");
                        pending.extend(translator.finish());
                        done = true;
                    }
                    None => {
                        pending.extend(translator.finish());
                        done = true;
                    }
                }
            }
        },
    );

    let mut resp = Response::new(Body::from_stream(stream));
    let headers = resp.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream"),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    resp
}
