use std::sync::{Arc, Mutex};

use agwrap_auth::{AccountManager, ApiKey, Credentials, KeyStore};
use agwrap_common::Config;
use agwrap_executor::Executor;
use agwrap_models::registry::Registry;

use crate::ratelimit::RateLimiterMap;

/// Where request credentials come from.
pub enum CredentialSource {
    /// Round-robin over the accounts pool file.
    Pool(AccountManager),
    /// The single credential loaded from the store. Refreshes are written
    /// back here so the skew check stays accurate.
    Single(Mutex<Credentials>),
    /// Nothing configured; client endpoints answer 401.
    None,
}

/// Shared process state handed to every handler.
pub struct AppState {
    pub cfg: Config,
    pub registry: Arc<Registry>,
    pub executor: Executor,
    pub credentials: CredentialSource,
    pub key_store: Option<KeyStore>,
    pub limiters: RateLimiterMap,
}

impl AppState {
    pub fn has_credentials(&self) -> bool {
        !matches!(self.credentials, CredentialSource::None)
    }

    /// A deep copy of the credentials to use for one request. Pool mode
    /// advances the cursor exactly once.
    pub fn checkout_credentials(&self) -> Option<Credentials> {
        match &self.credentials {
            CredentialSource::Pool(pool) => Some(pool.next()),
            CredentialSource::Single(creds) => {
                Some(creds.lock().expect("credential lock").clone())
            }
            CredentialSource::None => None,
        }
    }

    /// Writes a possibly-refreshed credential back. Pool accounts are
    /// persisted by the token manager through the credential store, so
    /// only single mode keeps an in-memory copy to update.
    pub fn commit_credentials(&self, updated: Credentials) {
        if let CredentialSource::Single(creds) = &self.credentials {
            *creds.lock().expect("credential lock") = updated;
        }
    }

    /// Whether `key` is one of the statically configured API keys (these
    /// carry no per-key restrictions).
    pub fn is_static_key(&self, key: &str) -> bool {
        self.cfg.api_keys.iter().any(|k| k == key)
    }

    /// Key-store record for `key`, ignoring static keys.
    pub fn key_record(&self, key: &str) -> Option<ApiKey> {
        if self.is_static_key(key) {
            return None;
        }
        self.key_store.as_ref()?.get(key)
    }
}
