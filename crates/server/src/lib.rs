//! # hybriddb-server
//!
//! HTTP/JSON front end for the hybrid.db engine. The interesting work — dual
//! indexes, the write pipeline, snapshots — lives in `hybriddb-core`; this
//! crate only marshals requests, validates input at the boundary, and maps
//! engine errors to HTTP responses.

/// REST API: router, handlers, request/response models, and error mapping.
pub mod api;
