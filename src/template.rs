//! Template engine for dynamic responses.
//!
//! Uses Handlebars for template rendering with request context. Response
//! templates are [`TemplateValue`] trees; only string leaves are rendered.

use crate::error::TemplateError;
use crate::model::MockRequest;
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use tracing::error;

/// A response template: a scalar, a sequence of templates, or a mapping of
/// templates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "Value", into = "Value")]
pub enum TemplateValue {
    Scalar(Scalar),
    Sequence(Vec<TemplateValue>),
    Mapping(BTreeMap<String, TemplateValue>),
}

/// Leaf of a template tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Scalar {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
}

impl TemplateValue {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Scalar(Scalar::String(value.into()))
    }

    /// Body used in place of a template that failed to render.
    pub fn render_failure() -> Self {
        Self::Mapping(BTreeMap::from([(
            "error".to_string(),
            Self::text("Template rendering failed"),
        )]))
    }
}

impl Default for TemplateValue {
    fn default() -> Self {
        Self::text("")
    }
}

impl From<Value> for TemplateValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Self::Scalar(Scalar::Null),
            Value::Bool(b) => Self::Scalar(Scalar::Bool(b)),
            Value::Number(n) => Self::Scalar(Scalar::Number(n)),
            Value::String(s) => Self::Scalar(Scalar::String(s)),
            Value::Array(items) => Self::Sequence(items.into_iter().map(Self::from).collect()),
            Value::Object(entries) => Self::Mapping(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Self::from(v)))
                    .collect(),
            ),
        }
    }
}

impl From<TemplateValue> for Value {
    fn from(value: TemplateValue) -> Self {
        match value {
            TemplateValue::Scalar(Scalar::Null) => Value::Null,
            TemplateValue::Scalar(Scalar::Bool(b)) => Value::Bool(b),
            TemplateValue::Scalar(Scalar::Number(n)) => Value::Number(n),
            TemplateValue::Scalar(Scalar::String(s)) => Value::String(s),
            TemplateValue::Sequence(items) => {
                Value::Array(items.into_iter().map(Value::from).collect())
            }
            TemplateValue::Mapping(entries) => Value::Object(
                entries
                    .into_iter()
                    .map(|(k, v)| (k, Value::from(v)))
                    .collect::<Map<_, _>>(),
            ),
        }
    }
}

/// Template engine for rendering dynamic responses.
pub struct TemplateEngine {
    handlebars: Handlebars<'static>,
}

/// Context for template rendering, exposed to templates as `request.*`.
#[derive(Debug, Clone, Serialize)]
pub struct TemplateContext {
    pub request: RequestView,
}

#[derive(Debug, Clone, Serialize)]
pub struct RequestView {
    pub path: String,
    pub method: String,
    pub query: BTreeMap<String, String>,
    pub body: Value,
    pub headers: BTreeMap<String, String>,
    /// Route parameters bound by the matched path, over those of the request
    pub params: BTreeMap<String, String>,
}

impl TemplateContext {
    pub fn new(request: &MockRequest, route_params: &BTreeMap<String, String>) -> Self {
        let mut params = request.params.clone();
        params.extend(route_params.iter().map(|(k, v)| (k.clone(), v.clone())));

        Self {
            request: RequestView {
                path: request.path.clone(),
                method: request.method.clone(),
                query: request.query.clone(),
                body: request.body.clone(),
                headers: request.headers.clone(),
                params,
            },
        }
    }
}

impl TemplateEngine {
    /// Create a new template engine.
    pub fn new() -> Self {
        let mut handlebars = Handlebars::new();

        // Generators are helpers so that every occurrence yields a fresh value
        handlebars.register_helper("uuid", Box::new(uuid_helper));
        handlebars.register_helper("faker.uuid", Box::new(uuid_helper));
        handlebars.register_helper("timestamp", Box::new(timestamp_helper));
        handlebars.register_helper("faker.timestamp", Box::new(timestamp_helper));
        handlebars.register_helper("now", Box::new(now_helper));
        handlebars.register_helper("toJson", Box::new(to_json_helper));
        handlebars.register_helper("random", Box::new(random_helper));
        handlebars.register_helper("default", Box::new(default_helper));
        handlebars.register_helper("upper", Box::new(upper_helper));
        handlebars.register_helper("lower", Box::new(lower_helper));

        // Don't escape HTML by default (we're not rendering HTML)
        handlebars.register_escape_fn(handlebars::no_escape);

        Self { handlebars }
    }

    /// Render a single template string.
    pub fn render_str(&self, template: &str, ctx: &TemplateContext) -> Result<String, TemplateError> {
        if !template.contains("{{") {
            return Ok(template.to_string());
        }
        Ok(self.handlebars.render_template(template, ctx)?)
    }

    /// Render every string leaf of a template tree.
    pub fn try_render(
        &self,
        template: &TemplateValue,
        ctx: &TemplateContext,
    ) -> Result<TemplateValue, TemplateError> {
        match template {
            TemplateValue::Scalar(Scalar::String(s)) => {
                Ok(TemplateValue::Scalar(Scalar::String(self.render_str(s, ctx)?)))
            }
            TemplateValue::Sequence(items) => items
                .iter()
                .map(|item| self.try_render(item, ctx))
                .collect::<Result<Vec<_>, _>>()
                .map(TemplateValue::Sequence),
            TemplateValue::Mapping(entries) => entries
                .iter()
                .map(|(k, v)| Ok((k.clone(), self.try_render(v, ctx)?)))
                .collect::<Result<BTreeMap<_, _>, TemplateError>>()
                .map(TemplateValue::Mapping),
            TemplateValue::Scalar(_) => Ok(template.clone()),
        }
    }

    /// Render a template tree, substituting the failure payload on error.
    pub fn render(&self, template: &TemplateValue, ctx: &TemplateContext) -> TemplateValue {
        match self.try_render(template, ctx) {
            Ok(rendered) => rendered,
            Err(e) => {
                error!(error = %e, path = %ctx.request.path, "Template rendering error");
                TemplateValue::render_failure()
            }
        }
    }

    /// Render header value templates.
    pub fn render_headers(
        &self,
        headers: &BTreeMap<String, String>,
        ctx: &TemplateContext,
    ) -> Result<BTreeMap<String, String>, TemplateError> {
        headers
            .iter()
            .map(|(name, value)| Ok((name.clone(), self.render_str(value, ctx)?)))
            .collect()
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

// Custom Handlebars helpers

fn uuid_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&uuid::Uuid::new_v4().to_string())?;
    Ok(())
}

fn timestamp_helper(
    _: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    out.write(&chrono::Utc::now().timestamp_millis().to_string())?;
    Ok(())
}

fn now_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use chrono::Utc;

    let format = h
        .param(0)
        .and_then(|v| v.value().as_str())
        .unwrap_or("%Y-%m-%dT%H:%M:%S%.3fZ");

    let now = Utc::now();
    out.write(&now.format(format).to_string())?;
    Ok(())
}

fn to_json_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    if let Some(param) = h.param(0) {
        out.write(&serde_json::to_string(param.value()).unwrap_or_default())?;
    }
    Ok(())
}

fn random_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    use rand::Rng;

    let a = h.param(0).and_then(|v| v.value().as_i64()).unwrap_or(0);
    let b = h.param(1).and_then(|v| v.value().as_i64()).unwrap_or(100);
    let (min, max) = if a <= b { (a, b) } else { (b, a) };

    let mut rng = rand::thread_rng();
    let value = rng.gen_range(min..=max);
    out.write(&value.to_string())?;
    Ok(())
}

fn default_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).map(|v| v.value());
    let default = h.param(1).and_then(|v| v.value().as_str()).unwrap_or("");

    match value {
        Some(Value::String(s)) if !s.is_empty() => out.write(s)?,
        Some(v) if !v.is_null() && !v.is_string() => out.write(&v.to_string())?,
        _ => out.write(default)?,
    }
    Ok(())
}

fn upper_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_uppercase())?;
    Ok(())
}

fn lower_helper(
    h: &handlebars::Helper,
    _: &Handlebars,
    _: &handlebars::Context,
    _: &mut handlebars::RenderContext,
    out: &mut dyn handlebars::Output,
) -> handlebars::HelperResult {
    let value = h.param(0).and_then(|v| v.value().as_str()).unwrap_or("");
    out.write(&value.to_lowercase())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn context(request: &MockRequest) -> TemplateContext {
        TemplateContext::new(request, &BTreeMap::new())
    }

    fn template(value: Value) -> TemplateValue {
        TemplateValue::from(value)
    }

    #[test]
    fn test_request_fields() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("POST", "/users")
            .with_query("page", "2")
            .with_header("User-Agent", "test-client")
            .with_body(json!({"name": "John"}));
        let ctx = context(&request);

        let result = engine
            .render_str(
                "{{request.method}} {{request.path}} page={{request.query.page}} \
                 ua={{request.headers.user-agent}} name={{request.body.name}}",
                &ctx,
            )
            .unwrap();

        assert_eq!(result, "POST /users page=2 ua=test-client name=John");
    }

    #[test]
    fn test_route_params_override_request_params() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/users/42").with_param("id", "stale");
        let params = BTreeMap::from([("id".to_string(), "42".to_string())]);
        let ctx = TemplateContext::new(&request, &params);

        let result = engine.render_str("User {{request.params.id}}", &ctx).unwrap();
        assert_eq!(result, "User 42");
    }

    #[test]
    fn test_echo_path_and_fresh_uuid_per_render() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/foo");
        let ctx = context(&request);
        let body = template(json!({"id": "{{uuid}}", "echoPath": "{{request.path}}"}));

        let first: Value = engine.render(&body, &ctx).into();
        let second: Value = engine.render(&body, &ctx).into();

        assert_eq!(first["echoPath"], "/foo");
        assert_eq!(second["echoPath"], "/foo");
        assert_eq!(first["id"].as_str().unwrap().len(), 36);
        assert_ne!(first["id"], second["id"]);
    }

    #[test]
    fn test_each_uuid_occurrence_is_independent() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/");
        let result = engine
            .render_str("{{uuid}} {{uuid}}", &context(&request))
            .unwrap();

        let (a, b) = result.split_once(' ').unwrap();
        assert_eq!(a.len(), 36);
        assert_ne!(a, b);
    }

    #[test]
    fn test_faker_namespace() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/");
        let ctx = context(&request);

        let id = engine.render_str("{{faker.uuid}}", &ctx).unwrap();
        assert!(uuid::Uuid::parse_str(&id).is_ok());

        let ts = engine.render_str("{{faker.timestamp}}", &ctx).unwrap();
        assert!(ts.parse::<i64>().unwrap() > 0);
    }

    #[test]
    fn test_to_json_helper() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("POST", "/").with_body(json!({"a": [1, 2]}));

        let result = engine
            .render_str("{{toJson request.body}}", &context(&request))
            .unwrap();
        assert_eq!(result, r#"{"a":[1,2]}"#);
    }

    #[test]
    fn test_default_helper() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/");

        let result = engine
            .render_str(
                "Value: {{default request.query.missing \"default_value\"}}",
                &context(&request),
            )
            .unwrap();

        assert_eq!(result, "Value: default_value");
    }

    #[test]
    fn test_upper_lower_helpers() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/").with_query("name", "John");

        let result = engine
            .render_str(
                "Upper: {{upper request.query.name}}, Lower: {{lower request.query.name}}",
                &context(&request),
            )
            .unwrap();

        assert_eq!(result, "Upper: JOHN, Lower: john");
    }

    #[test]
    fn test_random_helper_accepts_reversed_bounds() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/");

        let result = engine
            .render_str("{{random 10 5}}", &context(&request))
            .unwrap();
        let value: i64 = result.parse().unwrap();
        assert!((5..=10).contains(&value));
    }

    #[test]
    fn test_structure_is_preserved() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/items").with_query("q", "abc");
        let body = template(json!({
            "query": "{{request.query.q}}",
            "items": ["{{request.path}}", 1, true, null],
            "nested": {"static": "no template", "count": 3}
        }));

        let rendered: Value = engine.render(&body, &context(&request)).into();

        assert_eq!(
            rendered,
            json!({
                "query": "abc",
                "items": ["/items", 1, true, null],
                "nested": {"static": "no template", "count": 3}
            })
        );
    }

    #[test]
    fn test_malformed_template_yields_failure_payload() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/");
        let body = template(json!({"broken": "{{#if request.path}}never closed"}));

        assert!(engine.try_render(&body, &context(&request)).is_err());

        let rendered: Value = engine.render(&body, &context(&request)).into();
        assert_eq!(rendered, json!({"error": "Template rendering failed"}));
    }

    #[test]
    fn test_render_headers() {
        let engine = TemplateEngine::new();
        let request = MockRequest::new("GET", "/orders");
        let headers = BTreeMap::from([
            ("X-Path".to_string(), "{{request.path}}".to_string()),
            ("Content-Type".to_string(), "text/plain".to_string()),
        ]);

        let rendered = engine.render_headers(&headers, &context(&request)).unwrap();
        assert_eq!(rendered.get("X-Path").map(String::as_str), Some("/orders"));
        assert_eq!(rendered.get("Content-Type").map(String::as_str), Some("text/plain"));
    }

    #[test]
    fn test_template_value_serde_shape() {
        let value: TemplateValue = serde_json::from_value(json!(["a", {"b": 1}])).unwrap();
        assert_eq!(
            value,
            TemplateValue::Sequence(vec![
                TemplateValue::text("a"),
                TemplateValue::Mapping(BTreeMap::from([(
                    "b".to_string(),
                    TemplateValue::Scalar(Scalar::Number(1.into())),
                )])),
            ])
        );
        assert_eq!(serde_json::to_value(&value).unwrap(), json!(["a", {"b": 1}]));
    }
}
