//! Validation of mock definition payloads submitted by the admin surface.
//!
//! Payloads are JSON objects with camelCase keys. Unknown keys are ignored;
//! every rule violation is collected so the caller gets the complete list.

use crate::model::{
    default_response_headers, default_status, Condition, ConditionOperator, ConditionSource,
    MockDefinition, ResponseTemplate,
};
use crate::template::TemplateValue;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// HTTP methods a mock definition may declare.
pub const ALLOWED_METHODS: [&str; 7] = ["GET", "POST", "PUT", "DELETE", "PATCH", "HEAD", "OPTIONS"];

fn path_regex() -> &'static Regex {
    static PATH: OnceLock<Regex> = OnceLock::new();
    PATH.get_or_init(|| Regex::new(r"^/[a-zA-Z0-9\-_/:]+$").expect("valid path regex"))
}

/// One rule violation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

/// A rejected payload with field-level details.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{}", join_messages(.details))]
pub struct ValidationError {
    pub details: Vec<FieldError>,
}

fn join_messages(details: &[FieldError]) -> String {
    details
        .iter()
        .map(|d| d.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ValidationError {
    fn single(field: &str, message: impl Into<String>) -> Self {
        Self {
            details: vec![FieldError {
                field: field.to_string(),
                message: message.into(),
            }],
        }
    }
}

#[derive(Default)]
struct Errors(Vec<FieldError>);

impl Errors {
    fn push(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.0.push(FieldError {
            field: field.into(),
            message: message.into(),
        });
    }

    fn finish<T>(self, value: T) -> Result<T, ValidationError> {
        if self.0.is_empty() {
            Ok(value)
        } else {
            Err(ValidationError { details: self.0 })
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MockDraft {
    path: Option<String>,
    method: Option<String>,
    query_params: Option<BTreeMap<String, String>>,
    headers: Option<BTreeMap<String, String>>,
    response: Option<ResponseDraft>,
    active: Option<bool>,
    conditions: Option<Vec<ConditionDraft>>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponseDraft {
    status: Option<i64>,
    body: Option<Value>,
    headers: Option<BTreeMap<String, String>>,
    latency: Option<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct ConditionDraft {
    source: Option<String>,
    field: Option<String>,
    operator: Option<String>,
    value: Option<Value>,
}

fn parse_draft(payload: Value) -> Result<MockDraft, ValidationError> {
    if !payload.is_object() {
        return Err(ValidationError::single("payload", "payload must be an object"));
    }
    serde_json::from_value(payload).map_err(|e| ValidationError::single("payload", e.to_string()))
}

/// Validate a creation payload into a definition with the given identity.
pub fn validate_create(
    payload: Value,
    id: String,
    now: DateTime<Utc>,
) -> Result<MockDefinition, ValidationError> {
    let draft = parse_draft(payload)?;
    let mut errors = Errors::default();

    let path = match draft.path {
        Some(path) => check_path(&mut errors, path),
        None => {
            errors.push("path", "\"path\" is required");
            String::new()
        }
    };
    let method = match draft.method {
        Some(method) => check_method(&mut errors, &method),
        None => {
            errors.push("method", "\"method\" is required");
            String::new()
        }
    };
    let response = match draft.response {
        Some(response) => check_response(&mut errors, response),
        None => {
            errors.push("response", "\"response\" is required");
            ResponseTemplate::default()
        }
    };
    let conditions = check_conditions(&mut errors, draft.conditions.unwrap_or_default());

    errors.finish(MockDefinition {
        id,
        path,
        method,
        query_params: draft.query_params.unwrap_or_default(),
        headers: draft.headers.unwrap_or_default(),
        conditions,
        response,
        active: draft.active.unwrap_or(true),
        created_at: now,
        updated_at: now,
    })
}

/// A validated partial update.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MockPatch {
    pub path: Option<String>,
    pub method: Option<String>,
    pub query_params: Option<BTreeMap<String, String>>,
    pub headers: Option<BTreeMap<String, String>>,
    pub response: Option<ResponseTemplate>,
    pub active: Option<bool>,
    pub conditions: Option<Vec<Condition>>,
}

impl MockPatch {
    /// Overlay the patch onto `mock`; `id` and `createdAt` are kept.
    pub fn apply(self, mock: &mut MockDefinition, now: DateTime<Utc>) {
        if let Some(path) = self.path {
            mock.path = path;
        }
        if let Some(method) = self.method {
            mock.method = method;
        }
        if let Some(query_params) = self.query_params {
            mock.query_params = query_params;
        }
        if let Some(headers) = self.headers {
            mock.headers = headers;
        }
        if let Some(response) = self.response {
            mock.response = response;
        }
        if let Some(active) = self.active {
            mock.active = active;
        }
        if let Some(conditions) = self.conditions {
            mock.conditions = conditions;
        }
        mock.updated_at = now;
    }
}

/// Validate an update payload; at least one known field must be present.
pub fn validate_update(payload: Value) -> Result<MockPatch, ValidationError> {
    let draft = parse_draft(payload)?;
    let mut errors = Errors::default();

    let patch = MockPatch {
        path: draft.path.map(|p| check_path(&mut errors, p)),
        method: draft.method.map(|m| check_method(&mut errors, &m)),
        query_params: draft.query_params,
        headers: draft.headers,
        response: draft.response.map(|r| check_response(&mut errors, r)),
        active: draft.active,
        conditions: draft.conditions.map(|c| check_conditions(&mut errors, c)),
    };

    if patch == MockPatch::default() {
        errors.push("payload", "payload must contain at least one field");
    }
    errors.finish(patch)
}

fn check_path(errors: &mut Errors, path: String) -> String {
    if !path_regex().is_match(&path) {
        errors.push(
            "path",
            format!("\"path\" with value \"{path}\" fails to match the required pattern"),
        );
    }
    path
}

fn check_method(errors: &mut Errors, method: &str) -> String {
    let upper = method.to_ascii_uppercase();
    if !ALLOWED_METHODS.contains(&upper.as_str()) {
        errors.push(
            "method",
            format!("\"method\" must be one of [{}]", ALLOWED_METHODS.join(", ")),
        );
    }
    upper
}

fn check_response(errors: &mut Errors, draft: ResponseDraft) -> ResponseTemplate {
    let status = match draft.status {
        None => default_status(),
        Some(status) => match u16::try_from(status) {
            Ok(status) if (100..=599).contains(&status) => status,
            _ => {
                errors.push("response.status", "\"response.status\" must be between 100 and 599");
                default_status()
            }
        },
    };

    let latency = match draft.latency {
        None => 0,
        Some(latency) => u64::try_from(latency).unwrap_or_else(|_| {
            errors.push("response.latency", "\"response.latency\" must be greater than or equal to 0");
            0
        }),
    };

    let body = match draft.body {
        None => TemplateValue::default(),
        Some(body @ (Value::String(_) | Value::Array(_) | Value::Object(_))) => TemplateValue::from(body),
        Some(_) => {
            errors.push("response.body", "\"response.body\" must be a string, object or array");
            TemplateValue::default()
        }
    };

    ResponseTemplate {
        status,
        body,
        headers: draft.headers.unwrap_or_else(default_response_headers),
        latency,
    }
}

fn check_conditions(errors: &mut Errors, drafts: Vec<ConditionDraft>) -> Vec<Condition> {
    drafts
        .into_iter()
        .enumerate()
        .map(|(i, draft)| {
            let prefix = format!("conditions[{i}]");

            let source = match draft.source.as_deref().map(ConditionSource::parse) {
                Some(Some(source)) => source,
                Some(None) => {
                    errors.push(
                        format!("{prefix}.source"),
                        format!("\"{prefix}.source\" must be one of [query, headers, body, params]"),
                    );
                    ConditionSource::Unknown
                }
                None => {
                    errors.push(format!("{prefix}.source"), format!("\"{prefix}.source\" is required"));
                    ConditionSource::Unknown
                }
            };

            let field = draft.field.unwrap_or_default();
            if field.is_empty() {
                errors.push(format!("{prefix}.field"), format!("\"{prefix}.field\" is required"));
            }

            let operator = match draft.operator.as_deref() {
                None => ConditionOperator::Equals,
                Some(op) => ConditionOperator::parse(op).unwrap_or_else(|| {
                    errors.push(
                        format!("{prefix}.operator"),
                        format!("\"{prefix}.operator\" must be one of [equals, notEquals, includes, exists]"),
                    );
                    ConditionOperator::Unknown
                }),
            };

            if draft.value.is_none() && operator != ConditionOperator::Exists {
                errors.push(format!("{prefix}.value"), format!("\"{prefix}.value\" is required"));
            }

            Condition {
                source,
                field,
                operator,
                value: draft.value.unwrap_or(Value::Null),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create(payload: Value) -> Result<MockDefinition, ValidationError> {
        validate_create(payload, "mock-1".to_string(), Utc::now())
    }

    fn fields(err: &ValidationError) -> Vec<&str> {
        err.details.iter().map(|d| d.field.as_str()).collect()
    }

    #[test]
    fn test_minimal_payload_gets_defaults() {
        let mock = create(json!({
            "path": "/users/:id",
            "method": "get",
            "response": {},
            "id": "ignored",
            "extra": true
        }))
        .unwrap();

        assert_eq!(mock.id, "mock-1");
        assert_eq!(mock.method, "GET");
        assert!(mock.active);
        assert_eq!(mock.response.status, 200);
        assert_eq!(mock.response.body, TemplateValue::text(""));
        assert_eq!(
            mock.response.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );
        assert_eq!(mock.created_at, mock.updated_at);
    }

    #[test]
    fn test_all_violations_are_reported() {
        let err = create(json!({
            "path": "users with spaces",
            "method": "FETCH",
            "response": {"status": 700, "latency": -5, "body": 12},
            "conditions": [
                {"source": "cookies", "field": "", "operator": "regex", "value": "x"},
                {"source": "query", "field": "debug", "operator": "exists"},
                {"source": "body", "field": "msg"}
            ]
        }))
        .unwrap_err();

        assert_eq!(
            fields(&err),
            vec![
                "path",
                "method",
                "response.status",
                "response.latency",
                "response.body",
                "conditions[0].source",
                "conditions[0].field",
                "conditions[0].operator",
                "conditions[2].value",
            ]
        );
        assert!(err.to_string().contains("\"method\" must be one of"));
    }

    #[test]
    fn test_missing_required_fields() {
        let err = create(json!({})).unwrap_err();
        assert_eq!(fields(&err), vec!["path", "method", "response"]);

        let err = create(json!("not an object")).unwrap_err();
        assert_eq!(fields(&err), vec!["payload"]);

        let err = create(json!({"path": 5})).unwrap_err();
        assert_eq!(fields(&err), vec!["payload"]);
    }

    #[test]
    fn test_conditions_default_to_equals() {
        let mock = create(json!({
            "path": "/search",
            "method": "GET",
            "response": {"body": ["a", "b"]},
            "conditions": [{"source": "query", "field": "q", "value": "rust"}]
        }))
        .unwrap();

        assert_eq!(mock.conditions[0].operator, ConditionOperator::Equals);
        assert_eq!(mock.conditions[0].value, json!("rust"));
    }

    #[test]
    fn test_update_requires_a_field() {
        let err = validate_update(json!({"unknown": 1})).unwrap_err();
        assert_eq!(fields(&err), vec!["payload"]);
    }

    #[test]
    fn test_update_patch_applies() {
        let mut mock = create(json!({"path": "/a", "method": "GET", "response": {}})).unwrap();
        let created = mock.created_at;

        let patch = validate_update(json!({"active": false, "method": "post"})).unwrap();
        let later = created + chrono::Duration::seconds(5);
        patch.apply(&mut mock, later);

        assert!(!mock.active);
        assert_eq!(mock.method, "POST");
        assert_eq!(mock.path, "/a");
        assert_eq!(mock.id, "mock-1");
        assert_eq!(mock.created_at, created);
        assert_eq!(mock.updated_at, later);
    }

    #[test]
    fn test_update_validates_present_fields() {
        let err = validate_update(json!({"path": "no-slash"})).unwrap_err();
        assert_eq!(fields(&err), vec!["path"]);
    }
}
