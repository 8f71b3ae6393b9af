use std::path::{Path, PathBuf};

use crate::credentials::Credentials;
use crate::fsutil::write_private;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("credentials io: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse credentials: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("no credentials found in {0}")]
    NoCredentials(PathBuf),
}

/// Filesystem store for credential records, one JSON file per account.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    dir: PathBuf,
}

impl CredentialStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn ensure_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.dir)
    }

    /// Persists the record under its email-derived filename, mode 0600.
    pub fn save(&self, creds: &Credentials) -> Result<PathBuf, StoreError> {
        self.ensure_dir()?;
        let path = self.dir.join(filename_for(creds));
        let data = serde_json::to_vec_pretty(creds)?;
        write_private(&path, &data)?;
        Ok(path)
    }

    pub fn load(&self, filename: &str) -> Result<Credentials, StoreError> {
        let data = std::fs::read(self.dir.join(filename))?;
        Ok(serde_json::from_slice(&data)?)
    }

    /// Loads the first credential file in the directory, alphabetically.
    pub fn load_first(&self) -> Result<(Credentials, String), StoreError> {
        let files = self.list()?;
        let Some(first) = files.first() else {
            return Err(StoreError::NoCredentials(self.dir.clone()));
        };
        Ok((self.load(first)?, first.clone()))
    }

    /// Credential filenames in the store (`antigravity*.json`), sorted.
    pub fn list(&self) -> Result<Vec<String>, StoreError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let mut files: Vec<String> = entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_type().map(|t| t.is_file()).unwrap_or(false))
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| name.starts_with("antigravity") && name.ends_with(".json"))
            .collect();
        files.sort();
        Ok(files)
    }

    pub fn delete(&self, filename: &str) -> Result<(), StoreError> {
        std::fs::remove_file(self.dir.join(filename))?;
        Ok(())
    }

    /// Re-persists a record after a token refresh.
    pub fn update(&self, creds: &Credentials) -> Result<(), StoreError> {
        self.save(creds).map(|_| ())
    }
}

fn filename_for(creds: &Credentials) -> String {
    if creds.email.is_empty() {
        return "antigravity.json".to_string();
    }
    let sanitized = creds.email.replace(['@', '.'], "_");
    format!("antigravity-{sanitized}.json")
}
