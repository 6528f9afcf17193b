//! Error types shared across the resolution engine.

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use std::path::PathBuf;
use thiserror::Error;

/// Failure of the document store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to access store document {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("store document {} is corrupt: {message}", .path.display())]
    Corrupt { path: PathBuf, message: String },

    #[error("failed to encode store document: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("index {index} is out of range for collection '{collection}' ({len} records)")]
    IndexOutOfRange {
        collection: String,
        index: usize,
        len: usize,
    },

    #[error("store worker is no longer running")]
    Closed,
}

/// Failure while rendering a response template.
#[derive(Debug, Error)]
#[error("template rendering failed: {0}")]
pub struct TemplateError(#[from] handlebars::RenderError);

/// Error body returned to callers: `{"error": {message, details, timestamp}}`.
pub fn error_body(message: &str, details: Option<Value>) -> Value {
    json!({
        "error": {
            "message": message,
            "details": details,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
        }
    })
}
