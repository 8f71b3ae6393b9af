use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
}

/// Process configuration, merged from (lowest to highest precedence):
/// built-in defaults, the YAML config file, `AGWRAP_*` environment
/// variables.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub host: String,
    /// Statically configured API keys. These bypass key-store lookups and
    /// carry no per-key restrictions.
    pub api_keys: Vec<String>,
    /// Global requests-per-minute ceiling. Zero disables rate limiting.
    pub rate_limit: u32,
    /// Bearer secret guarding the `/admin` surface. Empty means the admin
    /// endpoints answer 503 until one is configured.
    pub master_secret: String,
    pub data_dir: String,
    /// Optional egress proxy for upstream traffic (http, https or socks5).
    pub proxy_url: String,
    pub credentials_dir: String,
    /// Emit reasoning text as plain `content` on the OpenAI surface for
    /// clients that cannot render `reasoning_content`.
    pub thinking_as_content: bool,
    pub log_level: String,
    pub debug: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "0.0.0.0".to_string(),
            api_keys: Vec::new(),
            rate_limit: 1000,
            master_secret: String::new(),
            data_dir: "data".to_string(),
            proxy_url: String::new(),
            credentials_dir: default_credentials_dir(),
            thinking_as_content: false,
            log_level: "info".to_string(),
            debug: false,
        }
    }
}

impl Config {
    /// Loads configuration from a YAML file and applies environment
    /// overrides. A missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let mut cfg = if path.is_empty() {
            Self::default()
        } else {
            match std::fs::read_to_string(path) {
                Ok(data) => serde_yaml::from_str(&data)?,
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                    tracing::debug!(path, "config file not found, using defaults");
                    Self::default()
                }
                Err(err) => return Err(err.into()),
            }
        };
        cfg.apply_env_overrides();
        Ok(cfg)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("AGWRAP_PORT")
            && let Ok(port) = v.parse()
        {
            self.port = port;
        }
        if let Ok(v) = std::env::var("AGWRAP_HOST") {
            self.host = v;
        }
        if let Ok(v) = std::env::var("AGWRAP_API_KEYS") {
            self.api_keys = v
                .split(',')
                .map(|key| key.trim().to_string())
                .filter(|key| !key.is_empty())
                .collect();
        }
        if let Ok(v) = std::env::var("AGWRAP_RATE_LIMIT")
            && let Ok(limit) = v.parse()
        {
            self.rate_limit = limit;
        }
        if let Ok(v) = std::env::var("AGWRAP_MASTER_SECRET") {
            self.master_secret = v;
        }
        if let Ok(v) = std::env::var("AGWRAP_DATA_DIR") {
            self.data_dir = v;
        }
        if let Ok(v) = std::env::var("AGWRAP_PROXY_URL") {
            self.proxy_url = v;
        }
        if let Ok(v) = std::env::var("AGWRAP_CREDENTIALS_DIR") {
            self.credentials_dir = v;
        }
        if let Ok(v) = std::env::var("AGWRAP_THINKING_AS_CONTENT") {
            self.thinking_as_content = v == "true" || v == "1";
        }
        if let Ok(v) = std::env::var("AGWRAP_LOG_LEVEL") {
            self.log_level = v;
        }
        if let Ok(v) = std::env::var("AGWRAP_DEBUG") {
            self.debug = v == "true" || v == "1";
        }
    }

    pub fn credentials_dir(&self) -> PathBuf {
        if self.credentials_dir.is_empty() {
            PathBuf::from(default_credentials_dir())
        } else {
            PathBuf::from(&self.credentials_dir)
        }
    }

    pub fn ensure_credentials_dir(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.credentials_dir())
    }

    pub fn ensure_data_dir(&self) -> std::io::Result<()> {
        if self.data_dir.is_empty() {
            return Ok(());
        }
        std::fs::create_dir_all(&self.data_dir)
    }

    pub fn proxy_url(&self) -> Option<&str> {
        let trimmed = self.proxy_url.trim();
        if trimmed.is_empty() { None } else { Some(trimmed) }
    }
}

/// Default accounts-pool file location: `.antigravity-wrapper/accounts.json`
/// in the working directory if present, else under the home directory.
pub fn default_accounts_path() -> PathBuf {
    let local = Path::new(".antigravity-wrapper").join("accounts.json");
    if local.exists() {
        return local;
    }
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home)
            .join(".antigravity-wrapper")
            .join("accounts.json"),
        None => local,
    }
}

fn default_credentials_dir() -> String {
    match std::env::var_os("HOME") {
        Some(home) => Path::new(&home)
            .join(".antigravity")
            .to_string_lossy()
            .into_owned(),
        None => ".antigravity".to_string(),
    }
}
