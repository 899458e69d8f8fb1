//! Global configuration constants for hybrid.db.
//!
//! All tuning parameters, input validation limits, and server defaults are
//! defined here. These are compile-time constants; runtime configuration is
//! handled via CLI arguments in the server's `main.rs`.

/// Default number of bidirectional links per HNSW node.
///
/// Higher values improve recall but increase memory and build time.
/// Typical range: 8–64.
pub const HNSW_DEFAULT_M: usize = 16;

/// Default ef parameter during HNSW index construction.
///
/// Controls the size of the dynamic candidate list during insertion.
pub const HNSW_DEFAULT_EF_CONSTRUCTION: usize = 200;

/// Default ef parameter during HNSW search.
///
/// Higher values improve recall at the cost of latency.
pub const HNSW_DEFAULT_EF_SEARCH: usize = 50;

/// Maximum number of layers in the HNSW graph.
pub const HNSW_DEFAULT_MAX_LAYERS: usize = 16;

/// Overfetch multiplier for hybrid queries.
///
/// The ANN index cannot filter by field, so a hybrid query retrieves
/// `HYBRID_OVERFETCH_FACTOR * k` candidates and intersects them with the
/// field-index match set afterwards. Raising this trades latency for recall
/// on selective filters.
pub const HYBRID_OVERFETCH_FACTOR: usize = 10;

/// Maximum number of write tasks queued before producers block.
pub const WRITE_QUEUE_CAPACITY: usize = 8_192;

/// Maximum tasks applied per worker batch before snapshotting.
pub const WRITE_BATCH_MAX: usize = 100;

/// Seconds the worker waits for new tasks before re-checking dirty tables.
pub const FLUSH_INTERVAL_SECS: u64 = 5;

/// Maximum allowed embedding dimension.
pub const MAX_DIMENSION: usize = 4096;

/// Maximum number of results (`topK`) per search request.
pub const MAX_K: usize = 10_000;

/// Maximum length of a table name in characters.
pub const MAX_TABLE_NAME_LEN: usize = 128;

/// Maximum number of fields per record.
pub const MAX_FIELDS_PER_RECORD: usize = 64;

/// Default HTTP bind address.
pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";

/// Default directory for table snapshots.
pub const DEFAULT_DATA_DIR: &str = "./data";

/// Per-request timeout in seconds.
pub const REQUEST_TIMEOUT_SECS: u64 = 30;

/// Maximum HTTP request body size in bytes (10 MB).
pub const MAX_REQUEST_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Maximum number of concurrent in-flight requests.
pub const MAX_CONCURRENT_REQUESTS: usize = 512;
