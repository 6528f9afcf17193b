//! Data model for mock definitions, request logs and inbound requests.
//!
//! Records are stored with camelCase keys so that the persisted document
//! stays readable by the admin tooling that edits it.

use crate::template::TemplateValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// A stored rule pairing a request predicate with a response template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MockDefinition {
    /// Unique identifier, assigned once at creation
    pub id: String,

    /// Path pattern; segments starting with `:` are positional parameters
    pub path: String,

    /// HTTP method, compared case-insensitively
    pub method: String,

    /// Required query parameters (exact values)
    #[serde(default)]
    pub query_params: BTreeMap<String, String>,

    /// Declarative header metadata (not matched)
    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Conditions that must all hold
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Response to synthesize
    pub response: ResponseTemplate,

    /// Inactive definitions are never matched
    #[serde(default = "default_true")]
    pub active: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

fn default_true() -> bool {
    true
}

/// Response template of a mock definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseTemplate {
    /// HTTP status code
    #[serde(default = "default_status")]
    pub status: u16,

    /// Body template
    #[serde(default)]
    pub body: TemplateValue,

    /// Header templates
    #[serde(default = "default_response_headers")]
    pub headers: BTreeMap<String, String>,

    /// Artificial delay in milliseconds
    #[serde(default)]
    pub latency: u64,
}

pub(crate) fn default_status() -> u16 {
    200
}

pub(crate) fn default_response_headers() -> BTreeMap<String, String> {
    BTreeMap::from([("Content-Type".to_string(), "application/json".to_string())])
}

impl Default for ResponseTemplate {
    fn default() -> Self {
        Self {
            status: default_status(),
            body: TemplateValue::default(),
            headers: default_response_headers(),
            latency: 0,
        }
    }
}

/// A predicate over one field of one request section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    /// Request section to inspect
    pub source: ConditionSource,

    /// Key within that section
    pub field: String,

    #[serde(default)]
    pub operator: ConditionOperator,

    /// Comparison operand (ignored by `exists`)
    #[serde(default)]
    pub value: Value,
}

/// Request section a condition reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionSource {
    Query,
    Headers,
    Body,
    Params,
    /// Any source this version does not know; its fields are always undefined
    #[serde(other)]
    Unknown,
}

impl ConditionSource {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "query" => Some(Self::Query),
            "headers" => Some(Self::Headers),
            "body" => Some(Self::Body),
            "params" => Some(Self::Params),
            _ => None,
        }
    }
}

/// Comparison applied by a condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ConditionOperator {
    #[default]
    Equals,
    NotEquals,
    Includes,
    Exists,
    /// Unrecognized operator; never matches
    #[serde(other)]
    Unknown,
}

impl ConditionOperator {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "equals" => Some(Self::Equals),
            "notEquals" => Some(Self::NotEquals),
            "includes" => Some(Self::Includes),
            "exists" => Some(Self::Exists),
            _ => None,
        }
    }
}

/// One entry of the append-only request log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub id: String,

    /// Definition that produced the response, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mock_id: Option<String>,

    pub method: String,
    pub path: String,
    pub status: u16,

    /// Observed wall-clock time in milliseconds
    pub latency: u64,

    pub timestamp: DateTime<Utc>,
    pub request: RequestSnapshot,
}

/// Request data captured in a log entry.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
}

/// An inbound request as delivered by the HTTP layer.
///
/// Header names are kept lowercase; `body` is `null` when the request had
/// none.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MockRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub query: BTreeMap<String, String>,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: Value,
    /// Route parameters supplied by the HTTP layer
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

impl MockRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            ..Self::default()
        }
    }

    /// Build a request from a method and a `path?query` string.
    pub fn from_uri(method: impl Into<String>, uri: &str) -> Self {
        let (path, query) = match uri.split_once('?') {
            Some((path, query)) => (path, query),
            None => (uri, ""),
        };
        let mut request = Self::new(method, path);
        request.query = parse_query_string(query);
        request
    }

    pub fn with_query(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.insert(name.into(), value.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.body = body;
        self
    }

    pub fn with_param(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(name.into(), value.into());
        self
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            headers: self.headers.clone(),
            query: self.query.clone(),
            body: self.body.clone(),
        }
    }
}

/// Parse a query string into key-value pairs.
pub fn parse_query_string(query: &str) -> BTreeMap<String, String> {
    let mut params = BTreeMap::new();

    for part in query.split('&') {
        if part.is_empty() {
            continue;
        }
        if let Some((key, value)) = part.split_once('=') {
            params.insert(urlencoding_decode(key), urlencoding_decode(value));
        } else {
            params.insert(urlencoding_decode(part), String::new());
        }
    }

    params
}

/// Percent-decoding with `+` as space; invalid escapes are kept verbatim.
fn urlencoding_decode(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                let hex = std::str::from_utf8(&bytes[i + 1..i + 3]).ok();
                match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                    Some(byte) => {
                        decoded.push(byte);
                        i += 3;
                    }
                    None => {
                        decoded.push(b'%');
                        i += 1;
                    }
                }
            }
            b'+' => {
                decoded.push(b' ');
                i += 1;
            }
            byte => {
                decoded.push(byte);
                i += 1;
            }
        }
    }

    String::from_utf8_lossy(&decoded).into_owned()
}
