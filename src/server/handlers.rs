use std::{sync::Arc, time::Instant};

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
};

use crate::{
    compiler::{CompileError, QueryCompiler},
    linq_parser::{self, ParseError},
    model::load_model,
    query_ast::QueryExpr,
    sql_generator::{DialectPolicy, BUILTIN_DIALECTS},
};

use super::{
    models::{
        ErrorDetails, ModelInfo, SqlGenerationError, SqlGenerationMetadata, SqlGenerationRequest,
        SqlGenerationResponse,
    },
    AppState,
};

type ApiError = (StatusCode, Json<SqlGenerationError>);

fn api_error(
    status: StatusCode,
    query: String,
    error: impl ToString,
    error_type: &str,
    details: Option<ErrorDetails>,
) -> ApiError {
    (
        status,
        Json(SqlGenerationError {
            query,
            error: error.to_string(),
            error_type: error_type.to_string(),
            error_details: details,
        }),
    )
}

pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "service": "queryforge",
        "status": "healthy",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

pub async fn list_models_handler(State(app_state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    let models = app_state.models.read().await;
    let mut infos: Vec<ModelInfo> = models
        .values()
        .map(|entry| ModelInfo {
            name: entry.model.name.clone(),
            entity_sets: entry.model.entity_sets().map(|(set, _)| set.to_string()).collect(),
            entity_type_count: entry.model.entity_types().count(),
            path: entry.path.as_ref().map(|p| p.display().to_string()),
        })
        .collect();
    infos.sort_by(|a, b| a.name.cmp(&b.name));

    Json(serde_json::json!({ "models": infos }))
}

/// Handler for POST /models/{name}/reload - re-read a model from disk
pub async fn reload_model_handler(
    State(app_state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> Result<Json<serde_json::Value>, (StatusCode, Json<serde_json::Value>)> {
    let path = {
        let models = app_state.models.read().await;
        match models.get(&name) {
            Some(entry) => entry.path.clone(),
            None => {
                return Err((
                    StatusCode::NOT_FOUND,
                    Json(serde_json::json!({ "error": format!("Model '{}' not found", name) })),
                ))
            }
        }
    };
    let Some(path) = path else {
        return Err((
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": format!("Model '{}' was registered in memory and has no file to reload", name)
            })),
        ));
    };

    let model = load_model(&path).map_err(|e| {
        log::error!("Failed to reload model '{}' from {}: {}", name, path.display(), e);
        (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
    })?;
    if model.name != name {
        return Err((
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(serde_json::json!({
                "error": format!("Model file now declares '{}' instead of '{}'", model.name, name)
            })),
        ));
    }

    app_state.register_model(model, Some(path)).await;
    let invalidated = app_state.cache.invalidate_model(&name);
    Ok(Json(serde_json::json!({
        "model": name,
        "status": "reloaded",
        "invalidated_entries": invalidated
    })))
}

pub async fn cache_metrics_handler(State(app_state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(app_state.cache.metrics())
}

/// Handler for POST /query/sql - compile a query to SQL without execution
pub async fn sql_generation_handler(
    State(app_state): State<Arc<AppState>>,
    Json(payload): Json<SqlGenerationRequest>,
) -> Result<Json<SqlGenerationResponse>, ApiError> {
    let start_time = Instant::now();
    let query_text = payload.query_text();

    let dialect = match payload.dialect.as_deref() {
        None => app_state.default_dialect.clone(),
        Some(name) => DialectPolicy::builtin(name).ok_or_else(|| {
            api_error(
                StatusCode::BAD_REQUEST,
                query_text.clone(),
                format!("Unsupported dialect: '{}'", name),
                "UnsupportedDialectError",
                Some(ErrorDetails::hint(format!(
                    "Supported dialects: {}",
                    BUILTIN_DIALECTS.join(", ")
                ))),
            )
        })?,
    };

    let model = {
        let models = app_state.models.read().await;
        let entry = match payload.model.as_deref() {
            Some(name) => models.get(name),
            None if models.len() == 1 => models.values().next(),
            None => None,
        };
        match entry {
            Some(entry) => entry.model.clone(),
            None => {
                let mut names: Vec<&str> = models.keys().map(String::as_str).collect();
                names.sort_unstable();
                let error = match payload.model.as_deref() {
                    Some(name) => format!("Model '{}' not found", name),
                    None => "Several models are loaded; name one with 'model'".to_string(),
                };
                return Err(api_error(
                    StatusCode::NOT_FOUND,
                    query_text,
                    error,
                    "ModelNotFound",
                    Some(ErrorDetails::hint(format!("Loaded models: {}", names.join(", ")))),
                ));
            }
        }
    };

    let query: QueryExpr = match (&payload.query, payload.ast) {
        (Some(_), Some(_)) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                query_text,
                "Provide either 'query' or 'ast', not both",
                "InvalidRequest",
                None,
            ))
        }
        (None, None) => {
            return Err(api_error(
                StatusCode::BAD_REQUEST,
                query_text,
                "Missing 'query' or 'ast'",
                "InvalidRequest",
                None,
            ))
        }
        (None, Some(ast)) => ast,
        (Some(text), None) => linq_parser::parse_query(text).map_err(|e| {
            log::debug!("Rejected query text: {}", e);
            let details = match &e {
                ParseError::Syntax { offset, .. } | ParseError::TrailingInput { offset, .. } => {
                    Some(ErrorDetails::at_offset(text, *offset))
                }
                _ => None,
            };
            api_error(StatusCode::BAD_REQUEST, query_text.clone(), e, "ParseError", details)
        })?,
    };

    let model_name = model.name.clone();
    let dialect_name = dialect.name.clone();
    let compiler = QueryCompiler::with_cache(model, dialect, app_state.cache.clone());
    // Compilation is CPU-bound and may wait on another request's compilation
    // of the same key, so it stays off the async workers
    let canonical = query.to_string();
    let outcome = tokio::task::spawn_blocking(move || compiler.compile_with_status(&query))
        .await
        .map_err(|e| {
            log::error!("Compilation task for '{}' failed: {}", query_text, e);
            api_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                query_text.clone(),
                format!("Compilation task failed: {}", e),
                "InternalError",
                None,
            )
        })?;
    let (compiled, cache_status) = outcome.map_err(|e| {
        log::warn!("Compilation failed for '{}': {}", query_text, e);
        let status = match &e {
            CompileError::Fingerprint(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        };
        api_error(status, query_text.clone(), &e, e.error_type(), None)
    })?;

    let compile_time_ms = start_time.elapsed().as_secs_f64() * 1000.0;
    log::info!(
        "Compiled query for model '{}' ({}) in {:.3}ms, cache {:?}",
        model_name,
        dialect_name,
        compile_time_ms,
        cache_status
    );

    let mut response = SqlGenerationResponse::new(
        canonical,
        model_name,
        dialect_name,
        &compiled,
        SqlGenerationMetadata {
            cache_status,
            compile_time_ms,
        },
    );
    if payload.include_shaper {
        response.shaper = Some(compiled.shaper.clone());
    }
    if payload.include_ir {
        response.ir = Some(compiled.select.clone());
    }
    Ok(Json(response))
}
