//! Condition evaluation.
//!
//! A condition reads one field from one request section and compares it
//! with its operand. A field that is not present is undefined, which is
//! distinct from a present field holding `null` or an empty string.

use crate::model::{Condition, ConditionOperator, ConditionSource, MockRequest};
use serde_json::Value;
use std::collections::BTreeMap;

/// Read a field from the request section named by `source`.
///
/// `route_params` are the parameters bound by the candidate definition's
/// path and take precedence over params supplied with the request.
pub fn field_value(
    source: ConditionSource,
    field: &str,
    request: &MockRequest,
    route_params: &BTreeMap<String, String>,
) -> Option<Value> {
    match source {
        ConditionSource::Query => request.query.get(field).cloned().map(Value::String),
        ConditionSource::Headers => request.header(field).map(|v| Value::String(v.to_string())),
        ConditionSource::Body => request
            .body
            .as_object()
            .and_then(|body| body.get(field))
            .cloned(),
        ConditionSource::Params => route_params
            .get(field)
            .or_else(|| request.params.get(field))
            .cloned()
            .map(Value::String),
        ConditionSource::Unknown => None,
    }
}

impl Condition {
    /// Apply the operator to a field value (`None` = undefined).
    pub fn holds_for(&self, field: Option<&Value>) -> bool {
        match self.operator {
            ConditionOperator::Equals => field == Some(&self.value),
            ConditionOperator::NotEquals => field != Some(&self.value),
            ConditionOperator::Includes => field.is_some_and(|f| includes(f, &self.value)),
            ConditionOperator::Exists => field.is_some(),
            ConditionOperator::Unknown => false,
        }
    }

    /// Evaluate this condition against a request.
    pub fn evaluate(&self, request: &MockRequest, route_params: &BTreeMap<String, String>) -> bool {
        let value = field_value(self.source, &self.field, request, route_params);
        self.holds_for(value.as_ref())
    }
}

/// All conditions must hold; an empty list always matches.
pub fn all_hold(
    conditions: &[Condition],
    request: &MockRequest,
    route_params: &BTreeMap<String, String>,
) -> bool {
    conditions
        .iter()
        .all(|condition| condition.evaluate(request, route_params))
}

/// Substring test for strings, membership test for arrays.
fn includes(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::String(s) => match needle {
            Value::String(n) => s.contains(n.as_str()),
            Value::Number(n) => s.contains(&n.to_string()),
            Value::Bool(b) => s.contains(&b.to_string()),
            _ => false,
        },
        Value::Array(items) => items.contains(needle),
        _ => false,
    }
}
