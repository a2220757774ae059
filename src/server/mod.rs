use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use handlers::{
    cache_metrics_handler, health_check, list_models_handler, reload_model_handler,
    sql_generation_handler,
};

use dotenvy::dotenv;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tower_http::{
    catch_panic::CatchPanicLayer, limit::RequestBodyLimitLayer, timeout::TimeoutLayer,
};

use crate::compiler::QueryCache;
use crate::config::ServerConfig;
use crate::model::{load_model, Model, ModelError};
use crate::sql_generator::{load_dialect, DialectError, DialectPolicy};

pub mod handlers;
pub mod models;

/// A loaded model and the file it came from
#[derive(Debug, Clone)]
pub struct ModelEntry {
    pub model: Arc<Model>,
    pub path: Option<PathBuf>,
}

pub struct AppState {
    /// Models by name; compilations snapshot the `Arc` so reloads never
    /// affect queries already being compiled
    pub models: RwLock<HashMap<String, ModelEntry>>,
    pub cache: Arc<QueryCache>,
    pub default_dialect: DialectPolicy,
    pub config: ServerConfig,
}

#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Failed to load model {path}: {source}")]
    Model { path: String, source: ModelError },

    #[error("Model '{name}' is defined by both {first} and {second}")]
    DuplicateModel {
        name: String,
        first: String,
        second: String,
    },

    #[error(transparent)]
    Dialect(#[from] DialectError),

    #[error("Failed to bind HTTP listener to {address}: {source}")]
    Bind {
        address: String,
        source: std::io::Error,
    },

    #[error("HTTP server error: {0}")]
    Serve(std::io::Error),
}

impl AppState {
    pub fn new(config: ServerConfig, default_dialect: DialectPolicy) -> Self {
        AppState {
            models: RwLock::new(HashMap::new()),
            cache: Arc::new(QueryCache::new(config.compiler.cache_config())),
            default_dialect,
            config,
        }
    }

    /// Builds state from configuration, loading the dialect and every model file
    pub async fn from_config(config: ServerConfig) -> Result<Self, StartupError> {
        let dialect = load_dialect(&config.compiler.dialect)?;
        let paths = config.model_paths.clone();
        let state = AppState::new(config, dialect);

        for path in paths {
            let model = load_model(&path).map_err(|source| StartupError::Model {
                path: path.clone(),
                source,
            })?;
            let previous = state.register_model(model, Some(PathBuf::from(&path))).await;
            if let Some(previous) = previous {
                let name = previous.model.name.clone();
                return Err(StartupError::DuplicateModel {
                    name,
                    first: previous
                        .path
                        .map(|p| p.display().to_string())
                        .unwrap_or_default(),
                    second: path,
                });
            }
        }
        Ok(state)
    }

    /// Registers `model` under its own name, returning the entry it replaced
    pub async fn register_model(&self, model: Arc<Model>, path: Option<PathBuf>) -> Option<ModelEntry> {
        log::info!("Registering model '{}'", model.name);
        self.models
            .write()
            .await
            .insert(model.name.clone(), ModelEntry { model, path })
    }
}

pub fn build_router(state: Arc<AppState>) -> Router {
    let timeout = Duration::from_secs(state.config.request_timeout_secs);
    let body_limit = state.config.max_body_bytes;

    Router::new()
        .route("/health", get(health_check))
        .route("/models", get(list_models_handler))
        .route("/models/{name}/reload", post(reload_model_handler))
        .route("/query/sql", post(sql_generation_handler))
        .route("/cache/metrics", get(cache_metrics_handler))
        .layer(TimeoutLayer::new(timeout))
        .layer(RequestBodyLimitLayer::new(body_limit))
        .layer(CatchPanicLayer::new())
        .with_state(state)
}

pub async fn run() {
    dotenv().ok();

    // Load server configuration from environment variables
    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            log::error!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run_with_config(config).await {
        log::error!("{}", e);
        std::process::exit(1);
    }
}

pub async fn run_with_config(config: ServerConfig) -> Result<(), StartupError> {
    dotenv().ok();

    log::info!(
        "Server configuration: http={}:{}, dialect={}, models={:?}",
        config.http_host,
        config.http_port,
        config.compiler.dialect,
        config.model_paths
    );
    log::info!(
        "Initializing query cache: enabled={}, max_entries={}, max_size_mb={}",
        config.compiler.query_cache_enabled,
        config.compiler.query_cache_max_entries,
        config.compiler.query_cache_max_size_mb
    );

    let http_bind_address = format!("{}:{}", config.http_host, config.http_port);
    let daemon = config.daemon;
    let state = Arc::new(AppState::from_config(config).await?);
    let app = build_router(state);

    log::info!("Starting HTTP server on {}", http_bind_address);
    let http_listener = TcpListener::bind(&http_bind_address)
        .await
        .map_err(|source| StartupError::Bind {
            address: http_bind_address.clone(),
            source,
        })?;
    log::info!("Successfully bound HTTP listener to {}", http_bind_address);

    let http_server = axum::serve(http_listener, app);

    if daemon {
        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};

            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Failed to install SIGTERM handler: {}", e);
                    return http_server.await.map_err(StartupError::Serve);
                }
            };
            let mut sigint = match signal(SignalKind::interrupt()) {
                Ok(s) => s,
                Err(e) => {
                    log::error!("Failed to install SIGINT handler: {}", e);
                    return http_server.await.map_err(StartupError::Serve);
                }
            };

            tokio::select! {
                result = http_server => result.map_err(StartupError::Serve)?,
                _ = sigterm.recv() => log::info!("Received SIGTERM, shutting down..."),
                _ = sigint.recv() => log::info!("Received SIGINT, shutting down..."),
            }
        }
        #[cfg(windows)]
        {
            tokio::select! {
                result = http_server => result.map_err(StartupError::Serve)?,
                _ = tokio::signal::ctrl_c() => log::info!("Received shutdown signal, shutting down..."),
            }
        }
        Ok(())
    } else {
        http_server.await.map_err(StartupError::Serve)
    }
}
