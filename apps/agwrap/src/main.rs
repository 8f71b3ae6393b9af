use std::net::SocketAddr;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use agwrap_auth::{CredentialStore, KeyStore, TokenManager, accounts};
use agwrap_common::{Config, config::default_accounts_path};
use agwrap_executor::Executor;
use agwrap_models::registry::Registry;
use agwrap_server::ratelimit::RateLimiterMap;
use agwrap_server::{AppState, CredentialSource, build_router};

mod cli;

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let mut cfg = Config::load(&args.config).context("load configuration")?;
    if let Some(host) = args.host {
        cfg.host = host;
    }
    if let Some(port) = args.port {
        cfg.port = port;
    }

    init_tracing(&cfg);

    cfg.ensure_credentials_dir()
        .context("create credentials directory")?;
    cfg.ensure_data_dir().context("create data directory")?;

    let key_store = if cfg.data_dir.is_empty() {
        None
    } else {
        Some(KeyStore::new(&cfg.data_dir).context("initialize key store")?)
    };

    let registry = Arc::new(Registry::with_defaults());
    let credential_store = CredentialStore::new(cfg.credentials_dir());
    let token_manager = Arc::new(
        TokenManager::new(credential_store.clone(), cfg.proxy_url())
            .context("build oauth client")?,
    );

    let credentials = match accounts::load_optional(&default_accounts_path()) {
        Some(pool) => {
            info!(accounts = pool.count(), "round-robin account pool enabled");
            CredentialSource::Pool(pool)
        }
        None => match credential_store.load_first() {
            Ok((creds, filename)) => {
                info!(filename = %filename, "loaded credentials");
                CredentialSource::Single(Mutex::new(creds))
            }
            Err(err) => {
                warn!(error = %err, "no credentials found, client endpoints will answer 401");
                CredentialSource::None
            }
        },
    };

    let executor = Executor::new(cfg.proxy_url(), token_manager, registry.clone())
        .context("build upstream client")?;

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let state = Arc::new(AppState {
        cfg,
        registry,
        executor,
        credentials,
        key_store,
        limiters: RateLimiterMap::new(),
    });

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    info!(addr = %addr, "listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("serve")?;
    Ok(())
}

fn init_tracing(cfg: &Config) {
    let level = if cfg.debug {
        "debug".to_string()
    } else {
        cfg.log_level.clone()
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
