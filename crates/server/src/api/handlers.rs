//! HTTP request handlers and shared application state.

use crate::api::errors::ApiError;
use crate::api::models::*;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use hybriddb_core::{config, Engine};
use std::sync::Arc;
use std::time::Instant;

/// Shared application state passed to every handler via Axum's `State`
/// extractor.
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
    pub start_time: Instant,
}

fn validate_table_name(name: &str) -> Result<(), ApiError> {
    if name.is_empty() || name.len() > config::MAX_TABLE_NAME_LEN {
        return Err(ApiError::BadRequest(format!(
            "table name must be 1-{} characters",
            config::MAX_TABLE_NAME_LEN
        )));
    }
    if !name
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '-')
    {
        return Err(ApiError::BadRequest(
            "table name must contain only alphanumeric characters, '_', or '-'".into(),
        ));
    }
    Ok(())
}

fn validate_embedding(embedding: &[f32]) -> Result<(), ApiError> {
    if embedding.is_empty() {
        return Err(ApiError::BadRequest("embedding must not be empty".into()));
    }
    if embedding.len() > config::MAX_DIMENSION {
        return Err(ApiError::BadRequest(format!(
            "embedding exceeds maximum dimension of {}",
            config::MAX_DIMENSION
        )));
    }
    if embedding.iter().any(|v| v.is_nan() || v.is_infinite()) {
        return Err(ApiError::BadRequest(
            "embedding contains NaN or Inf".into(),
        ));
    }
    Ok(())
}

fn validate_top_k(k: usize) -> Result<(), ApiError> {
    if k == 0 || k > config::MAX_K {
        return Err(ApiError::BadRequest(format!(
            "topK must be 1-{}",
            config::MAX_K
        )));
    }
    Ok(())
}

/// `POST /insert` and `POST /update`.
///
/// The write is enqueued, not applied: 202 means "accepted", and visibility
/// follows the next pipeline batch (or an explicit `/flush`).
pub async fn upsert(
    State(state): State<AppState>,
    Json(req): Json<UpsertRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    validate_table_name(&req.table)?;
    validate_embedding(&req.embedding)?;
    if req.fields.len() > config::MAX_FIELDS_PER_RECORD {
        return Err(ApiError::BadRequest(format!(
            "record exceeds maximum of {} fields",
            config::MAX_FIELDS_PER_RECORD
        )));
    }
    if req.id.is_empty() {
        return Err(ApiError::BadRequest("id must not be empty".into()));
    }

    state
        .engine
        .upsert(req.table.clone(), req.id.clone(), req.fields, req.embedding)?;
    tracing::debug!(table = %req.table, id = %req.id, "upsert accepted");
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::ok())))
}

/// `POST /delete`. Deleting a missing record still succeeds.
pub async fn delete(
    State(state): State<AppState>,
    Json(req): Json<DeleteRequest>,
) -> Result<(StatusCode, Json<StatusResponse>), ApiError> {
    validate_table_name(&req.table)?;
    state.engine.delete(req.table.clone(), req.id.clone())?;
    tracing::debug!(table = %req.table, id = %req.id, "delete accepted");
    Ok((StatusCode::ACCEPTED, Json(StatusResponse::ok())))
}

/// `GET /queryField/:table?field=F&value=V`. Unknown table ⇒ `[]`.
pub async fn query_field(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Query(params): Query<FieldQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    validate_table_name(&table)?;
    Ok(Json(
        state.engine.query_field(&table, &params.field, &params.value),
    ))
}

/// `POST /queryEmbedding/:table`. Unknown table ⇒ `[]`.
pub async fn query_embedding(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(req): Json<EmbeddingQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    validate_table_name(&table)?;
    validate_embedding(&req.embedding)?;
    validate_top_k(req.top_k)?;
    let ids = state
        .engine
        .query_embedding(&table, &req.embedding, req.top_k)?;
    Ok(Json(ids))
}

/// `POST /queryHybrid/:table`. Unknown table or no field match ⇒ `[]`.
pub async fn query_hybrid(
    State(state): State<AppState>,
    Path(table): Path<String>,
    Json(req): Json<HybridQuery>,
) -> Result<Json<Vec<String>>, ApiError> {
    validate_table_name(&table)?;
    validate_embedding(&req.embedding)?;
    validate_top_k(req.top_k)?;
    let ids = state.engine.query_hybrid(
        &table,
        &req.field,
        &req.value,
        &req.embedding,
        req.top_k,
    )?;
    Ok(Json(ids))
}

/// `GET /record/:table/:id`.
pub async fn get_record(
    State(state): State<AppState>,
    Path((table, id)): Path<(String, String)>,
) -> Result<Json<RecordResponse>, ApiError> {
    validate_table_name(&table)?;
    let record = state
        .engine
        .get_record(&table, &id)
        .ok_or_else(|| ApiError::NotFound(format!("record '{id}' not found in '{table}'")))?;
    Ok(Json(RecordResponse {
        id,
        fields: record.fields,
        embedding: record.embedding,
        label: record.label,
    }))
}

/// `GET /tables`.
pub async fn list_tables(State(state): State<AppState>) -> Json<serde_json::Value> {
    let stats = state.engine.table_stats();
    Json(serde_json::json!({ "tables": stats }))
}

/// `POST /flush` — blocks until the write pipeline is drained and
/// snapshotted. The read-your-writes lever for clients that need it.
pub async fn flush(State(state): State<AppState>) -> Json<StatusResponse> {
    let engine = Arc::clone(&state.engine);
    // The wait parks a thread, so keep it off the async runtime
    let _ = tokio::task::spawn_blocking(move || engine.flush()).await;
    Json(StatusResponse::ok())
}

/// `GET /health`.
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let stats = state.engine.table_stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: state.start_time.elapsed().as_secs(),
        table_count: stats.len(),
        total_records: stats.iter().map(|s| s.records).sum(),
    })
}
