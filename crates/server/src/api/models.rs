//! Request and response data transfer objects for the REST API.
//!
//! All types derive `Serialize` and/or `Deserialize` for JSON marshalling
//! via Axum.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Request body for `POST /insert` and `POST /update`.
#[derive(Debug, Deserialize)]
pub struct UpsertRequest {
    pub table: String,
    pub id: String,
    #[serde(default)]
    pub fields: HashMap<String, String>,
    pub embedding: Vec<f32>,
}

/// Request body for `POST /delete`.
#[derive(Debug, Deserialize)]
pub struct DeleteRequest {
    pub table: String,
    pub id: String,
}

/// Query string for `GET /queryField/:table`.
#[derive(Debug, Deserialize)]
pub struct FieldQuery {
    pub field: String,
    pub value: String,
}

/// Request body for `POST /queryEmbedding/:table`.
#[derive(Debug, Deserialize)]
pub struct EmbeddingQuery {
    pub embedding: Vec<f32>,
    #[serde(rename = "topK", default = "default_top_k")]
    pub top_k: usize,
}

/// Request body for `POST /queryHybrid/:table`.
#[derive(Debug, Deserialize)]
pub struct HybridQuery {
    pub field: String,
    pub value: String,
    pub embedding: Vec<f32>,
    #[serde(rename = "topK", default = "default_top_k")]
    pub top_k: usize,
}

fn default_top_k() -> usize {
    3
}

/// Acknowledgement for accepted write requests.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
}

impl StatusResponse {
    pub fn ok() -> Self {
        Self { status: "ok" }
    }
}

/// A record as returned by `GET /record/:table/:id`.
#[derive(Debug, Serialize)]
pub struct RecordResponse {
    pub id: String,
    pub fields: HashMap<String, String>,
    pub embedding: Vec<f32>,
    pub label: u64,
}

/// Response body for `GET /health`.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub table_count: usize,
    pub total_records: usize,
}
