use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::credentials::Credentials;
use crate::fsutil::write_private;

#[derive(Debug, thiserror::Error)]
pub enum AccountsError {
    #[error("accounts file not found: {0}")]
    NotFound(PathBuf),
    #[error("read accounts file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse accounts file: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no accounts in {0}")]
    Empty(PathBuf),
}

/// One entry of the accounts pool file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub email: String,
    pub access_token: String,
    pub refresh_token: String,
    #[serde(default)]
    pub expires_in: i64,
    #[serde(default)]
    pub timestamp: i64,
    #[serde(default)]
    pub expired: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub project_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct AccountsFile {
    accounts: Vec<Account>,
    #[serde(default)]
    current_index: usize,
}

struct PoolState {
    accounts: Vec<Account>,
    current_index: usize,
}

/// Round-robin selector over the accounts pool. The accounts are an
/// immutable snapshot; the only shared mutable state is the cursor, which
/// advances exactly once per selection under the mutex. The cursor is
/// persisted best-effort after each advance.
pub struct AccountManager {
    path: PathBuf,
    state: Mutex<PoolState>,
}

impl AccountManager {
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, AccountsError> {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(AccountsError::NotFound(path));
            }
            Err(err) => return Err(err.into()),
        };
        let file: AccountsFile = serde_json::from_slice(&data)?;
        if file.accounts.is_empty() {
            return Err(AccountsError::Empty(path));
        }
        let current_index = if file.current_index < file.accounts.len() {
            file.current_index
        } else {
            0
        };
        info!(
            count = file.accounts.len(),
            current_index,
            path = %path.display(),
            "loaded account pool"
        );
        Ok(Self {
            path,
            state: Mutex::new(PoolState {
                accounts: file.accounts,
                current_index,
            }),
        })
    }

    /// Returns a copy of the current account's credentials and advances
    /// the cursor.
    pub fn next(&self) -> Credentials {
        let (account, index, total) = {
            let mut state = self.state.lock().expect("account pool lock");
            let index = state.current_index;
            let account = state.accounts[index].clone();
            state.current_index = (state.current_index + 1) % state.accounts.len();
            (account, index, state.accounts.len())
        };
        info!(email = %account.email, index, total, "using pool account");
        self.persist_index();
        to_credentials(account)
    }

    pub fn count(&self) -> usize {
        self.state.lock().expect("account pool lock").accounts.len()
    }

    /// Best-effort: the on-disk file keeps its account entries (which may
    /// have been rewritten by an external login), only `current_index`
    /// changes.
    fn persist_index(&self) {
        let current_index = self
            .state
            .lock()
            .expect("account pool lock")
            .current_index;
        let result = (|| -> Result<(), AccountsError> {
            let data = std::fs::read(&self.path)?;
            let mut file: AccountsFile = serde_json::from_slice(&data)?;
            file.current_index = current_index;
            let data = serde_json::to_vec_pretty(&file)?;
            write_private(&self.path, &data)?;
            Ok(())
        })();
        if let Err(err) = result {
            warn!(error = %err, path = %self.path.display(), "failed to persist pool cursor");
        }
    }
}

fn to_credentials(account: Account) -> Credentials {
    Credentials {
        kind: "antigravity".to_string(),
        access_token: account.access_token,
        refresh_token: account.refresh_token,
        expires_in: account.expires_in,
        timestamp: account.timestamp,
        expired: account.expired,
        email: account.email,
        project_id: account.project_id,
        user_agent: String::new(),
        base_url: String::new(),
    }
}

/// Loads the pool from `path` if the file exists, logging and returning
/// `None` on any load problem so the caller can fall back to
/// single-credential mode.
pub fn load_optional(path: &Path) -> Option<AccountManager> {
    match AccountManager::load(path) {
        Ok(manager) => Some(manager),
        Err(AccountsError::NotFound(path)) => {
            tracing::debug!(path = %path.display(), "no accounts pool file");
            None
        }
        Err(err) => {
            warn!(error = %err, "failed to load accounts pool");
            None
        }
    }
}
