//! Upstream HTTP dispatch with base-URL fallback and SSE streaming.

use std::sync::Arc;

use bytes::Bytes;
use futures_util::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use agwrap_auth::{Credentials, TokenManager};
use agwrap_models::registry::Registry;

use crate::envelope::{self, DEFAULT_USER_AGENT};
use crate::sse::{LineReader, extract_json_payload, strip_nonterminal_usage};

pub const BASE_URL_DAILY: &str = "https://daily-cloudcode-pa.sandbox.googleapis.com";
pub const BASE_URL_PROD: &str = "https://cloudcode-pa.googleapis.com";
const GENERATE_PATH: &str = "/v1internal:generateContent";
const STREAM_PATH: &str = "/v1internal:streamGenerateContent?alt=sse";

const STREAM_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, thiserror::Error)]
pub enum ExecuteError {
    /// Non-2xx answer that is not eligible for fallback, surfaced with
    /// the upstream's status and body.
    #[error("upstream error: status {status}")]
    Upstream { status: u16, body: Bytes },
    /// Every base URL failed at the transport level or with 429.
    #[error("all base urls exhausted: {0}")]
    Exhausted(String),
}

#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub model: String,
    pub payload: Value,
    pub stream: bool,
}

#[derive(Debug)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Bytes,
}

/// One element of a streaming response. `Error` is terminal; the channel
/// closes after it.
#[derive(Debug)]
pub enum StreamChunk {
    Data(Bytes),
    Error(String),
}

/// Dispatches shaped envelopes to the upstream, refreshing tokens on the
/// way in and fanning streaming bodies out line-by-line.
pub struct Executor {
    client: wreq::Client,
    token_manager: Arc<TokenManager>,
    registry: Arc<Registry>,
}

impl Executor {
    pub fn new(
        proxy: Option<&str>,
        token_manager: Arc<TokenManager>,
        registry: Arc<Registry>,
    ) -> Result<Self, wreq::Error> {
        let mut builder = wreq::Client::builder();
        if let Some(proxy) = proxy {
            builder = builder.proxy(wreq::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            token_manager,
            registry,
        })
    }

    /// Non-streaming dispatch with base-URL fallback.
    pub async fn execute(
        &self,
        creds: &mut Credentials,
        req: UpstreamRequest,
    ) -> Result<UpstreamResponse, ExecuteError> {
        self.token_manager.ensure_valid(creds).await;
        let body = self.shaped_body(creds, &req);

        let urls = base_url_order(creds);
        let mut last_error = String::new();
        for (idx, base) in urls.iter().enumerate() {
            let has_fallback = idx + 1 < urls.len();
            let resp = match self.send(creds, base, GENERATE_PATH, &body, false).await {
                Ok(resp) => resp,
                Err(err) => {
                    debug!(base = %base, error = %err, "upstream request failed");
                    last_error = err.to_string();
                    if has_fallback {
                        continue;
                    }
                    return Err(ExecuteError::Exhausted(last_error));
                }
            };

            let status = resp.status().as_u16();
            let bytes = resp.bytes().await.map_err(|err| {
                ExecuteError::Exhausted(err.to_string())
            })?;

            if (200..300).contains(&status) {
                return Ok(UpstreamResponse {
                    status,
                    body: bytes,
                });
            }
            if status == 429 && has_fallback {
                debug!(base = %base, "rate limited, trying fallback");
                last_error = "status 429".to_string();
                continue;
            }
            return Err(ExecuteError::Upstream {
                status,
                body: bytes,
            });
        }
        Err(ExecuteError::Exhausted(last_error))
    }

    /// Streaming dispatch. On success the returned channel yields parsed
    /// SSE payloads (usage-filtered); reader failures surface as a final
    /// [`StreamChunk::Error`].
    pub async fn execute_stream(
        &self,
        creds: &mut Credentials,
        req: UpstreamRequest,
    ) -> Result<mpsc::Receiver<StreamChunk>, ExecuteError> {
        self.token_manager.ensure_valid(creds).await;
        let body = self.shaped_body(creds, &req);

        let urls = base_url_order(creds);
        let mut last_error = String::new();
        for (idx, base) in urls.iter().enumerate() {
            let has_fallback = idx + 1 < urls.len();
            let resp = match self.send(creds, base, STREAM_PATH, &body, true).await {
                Ok(resp) => resp,
                Err(err) => {
                    debug!(base = %base, error = %err, "upstream request failed");
                    last_error = err.to_string();
                    if has_fallback {
                        continue;
                    }
                    return Err(ExecuteError::Exhausted(last_error));
                }
            };

            let status = resp.status().as_u16();
            if !(200..300).contains(&status) {
                let bytes = resp.bytes().await.unwrap_or_default();
                if status == 429 && has_fallback {
                    debug!(base = %base, "rate limited, trying fallback");
                    last_error = "status 429".to_string();
                    continue;
                }
                return Err(ExecuteError::Upstream {
                    status,
                    body: bytes,
                });
            }

            let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
            tokio::spawn(read_stream(resp, tx));
            return Ok(rx);
        }
        Err(ExecuteError::Exhausted(last_error))
    }

    fn shaped_body(&self, creds: &Credentials, req: &UpstreamRequest) -> Bytes {
        let mut payload = req.payload.clone();
        envelope::shape(&self.registry, &req.model, &mut payload, &creds.project_id);
        Bytes::from(payload.to_string())
    }

    async fn send(
        &self,
        creds: &Credentials,
        base: &str,
        path: &str,
        body: &Bytes,
        stream: bool,
    ) -> Result<wreq::Response, wreq::Error> {
        let url = format!("{}{path}", base.trim_end_matches('/'));
        let accept = if stream {
            "text/event-stream"
        } else {
            "application/json"
        };
        let user_agent = if creds.user_agent.is_empty() {
            DEFAULT_USER_AGENT
        } else {
            creds.user_agent.as_str()
        };
        self.client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Authorization", format!("Bearer {}", creds.access_token))
            .header("User-Agent", user_agent)
            .header("Accept", accept)
            .body(body.clone())
            .send()
            .await
    }
}

/// Reads the upstream body line-by-line and publishes parsed payloads.
/// Closing the receiver cancels the task, which drops the upstream
/// connection.
async fn read_stream(resp: wreq::Response, tx: mpsc::Sender<StreamChunk>) {
    let mut reader = LineReader::new();
    let mut stream = resp.bytes_stream();

    while let Some(item) = stream.next().await {
        let chunk = match item {
            Ok(chunk) => chunk,
            Err(err) => {
                warn!(error = %err, "upstream stream read failed");
                let _ = tx.send(StreamChunk::Error(err.to_string())).await;
                return;
            }
        };
        let lines = match reader.push(&chunk) {
            Ok(lines) => lines,
            Err(err) => {
                let _ = tx.send(StreamChunk::Error(err.to_string())).await;
                return;
            }
        };
        for line in lines {
            if !publish_line(&tx, &line).await {
                return;
            }
        }
    }

    if let Some(line) = reader.finish() {
        publish_line(&tx, &line).await;
    }
}

async fn publish_line(tx: &mpsc::Sender<StreamChunk>, line: &[u8]) -> bool {
    let Some(mut payload) = extract_json_payload(line) else {
        return true;
    };
    strip_nonterminal_usage(&mut payload);
    tx.send(StreamChunk::Data(Bytes::from(payload.to_string())))
        .await
        .is_ok()
}

fn base_url_order(creds: &Credentials) -> Vec<String> {
    if !creds.base_url.trim().is_empty() {
        return vec![creds.base_url.trim().trim_end_matches('/').to_string()];
    }
    vec![BASE_URL_DAILY.to_string(), BASE_URL_PROD.to_string()]
}
