use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::{Duration, OffsetDateTime};

/// Refresh ahead of the actual expiry so a token never goes stale
/// mid-request.
const REFRESH_SKEW: Duration = Duration::minutes(50);

/// One authenticated upstream account, as persisted in the credentials
/// directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    pub access_token: String,
    pub refresh_token: String,
    /// Token lifetime in seconds.
    #[serde(default)]
    pub expires_in: i64,
    /// Issuance time, milliseconds since the epoch.
    #[serde(default)]
    pub timestamp: i64,
    /// Absolute expiry, RFC 3339.
    #[serde(default)]
    pub expired: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub email: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub user_agent: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub base_url: String,
}

fn default_kind() -> String {
    "antigravity".to_string()
}

impl Credentials {
    /// Absolute expiry, from the `expired` stamp or, failing that, from
    /// `timestamp + expires_in`.
    pub fn token_expiry(&self) -> Option<OffsetDateTime> {
        if !self.expired.is_empty()
            && let Ok(parsed) = OffsetDateTime::parse(&self.expired, &Rfc3339)
        {
            return Some(parsed);
        }
        if self.expires_in > 0 && self.timestamp > 0 {
            let issued = OffsetDateTime::from_unix_timestamp_nanos(
                self.timestamp as i128 * 1_000_000,
            )
            .ok()?;
            return Some(issued + Duration::seconds(self.expires_in));
        }
        None
    }

    /// Whether the access token is expired or within the refresh skew of
    /// its expiry. Credentials without a parseable expiry count as
    /// expired.
    pub fn is_expired(&self) -> bool {
        match self.token_expiry() {
            Some(expiry) => OffsetDateTime::now_utc() + REFRESH_SKEW >= expiry,
            None => true,
        }
    }
}
