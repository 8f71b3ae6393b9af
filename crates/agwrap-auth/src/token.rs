use std::time::Duration;

use serde::Deserialize;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;
use tracing::{debug, warn};

use crate::credentials::Credentials;
use crate::store::CredentialStore;

pub const CLIENT_ID: &str =
    "1071006060591-tmhssin2h21lcre235vtolojh4g403ep.apps.googleusercontent.com";
pub const CLIENT_SECRET: &str = "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";

const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const DEFAULT_USER_AGENT: &str = "antigravity/1.11.5 windows/amd64";
const OAUTH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, thiserror::Error)]
pub enum TokenError {
    #[error("no refresh token available")]
    MissingRefreshToken,
    #[error("token endpoint: {0}")]
    Http(#[from] wreq::Error),
    #[error("refresh failed with status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("parse token response: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: i64,
}

/// Expiry-aware token refresher. Refreshed records are written back to the
/// credential store so restarts pick up the newest token.
pub struct TokenManager {
    client: wreq::Client,
    store: CredentialStore,
}

impl TokenManager {
    pub fn new(store: CredentialStore, proxy: Option<&str>) -> Result<Self, wreq::Error> {
        let mut builder = wreq::Client::builder().timeout(OAUTH_TIMEOUT);
        if let Some(proxy) = proxy {
            builder = builder.proxy(wreq::Proxy::all(proxy)?);
        }
        Ok(Self {
            client: builder.build()?,
            store,
        })
    }

    /// Refreshes the credential in place when it is within the expiry
    /// skew. Refresh failures are logged and the stale credential is kept;
    /// the upstream's 401 then surfaces to the caller.
    pub async fn ensure_valid(&self, creds: &mut Credentials) {
        if !creds.is_expired() {
            return;
        }
        debug!(email = %creds.email, "access token expired, refreshing");
        if let Err(err) = self.refresh(creds).await {
            warn!(email = %creds.email, error = %err, "token refresh failed, using stale token");
        }
    }

    /// Exchanges the refresh token for a new access token and persists the
    /// updated record.
    pub async fn refresh(&self, creds: &mut Credentials) -> Result<(), TokenError> {
        if creds.refresh_token.is_empty() {
            return Err(TokenError::MissingRefreshToken);
        }

        let form = serde_urlencoded::to_string([
            ("client_id", CLIENT_ID),
            ("client_secret", CLIENT_SECRET),
            ("grant_type", "refresh_token"),
            ("refresh_token", creds.refresh_token.as_str()),
        ])
        .expect("static form encodes");

        let resp = self
            .client
            .post(TOKEN_URL)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .header("User-Agent", DEFAULT_USER_AGENT)
            .body(form)
            .send()
            .await?;

        let status = resp.status();
        let body = resp.bytes().await?;
        if !status.is_success() {
            return Err(TokenError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let token: TokenResponse = serde_json::from_slice(&body)?;
        let now = OffsetDateTime::now_utc();
        creds.access_token = token.access_token;
        if let Some(refresh_token) = token.refresh_token
            && !refresh_token.is_empty()
        {
            creds.refresh_token = refresh_token;
        }
        creds.expires_in = token.expires_in;
        creds.timestamp = (now.unix_timestamp_nanos() / 1_000_000) as i64;
        creds.expired = (now + time::Duration::seconds(token.expires_in))
            .format(&Rfc3339)
            .unwrap_or_default();

        if let Err(err) = self.store.update(creds) {
            warn!(email = %creds.email, error = %err, "failed to persist refreshed credentials");
        }
        debug!(email = %creds.email, "token refreshed");
        Ok(())
    }
}
