//! Mock resolution pipeline.
//!
//! For each request: read the active definitions, match, inject latency,
//! render headers and body, and queue a request log entry without waiting
//! for it to be written.

use crate::config::GlobalSettings;
use crate::error::{error_body, StoreError};
use crate::matcher::Matcher;
use crate::model::{LogEntry, MockDefinition, MockRequest};
use crate::store::{DocumentStore, LOGS, MOCKS};
use crate::template::{TemplateContext, TemplateEngine};
use chrono::Utc;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A response ready to be written by the HTTP layer.
#[derive(Debug, Clone, PartialEq)]
pub struct MockResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Value,
}

impl MockResponse {
    /// Body bytes: strings are sent as-is, anything else as JSON.
    pub fn body_bytes(&self) -> Vec<u8> {
        match &self.body {
            Value::String(s) => s.as_bytes().to_vec(),
            other => other.to_string().into_bytes(),
        }
    }

    fn json(status: u16, body: Value) -> Self {
        Self {
            status,
            headers: BTreeMap::from([(
                "Content-Type".to_string(),
                "application/json".to_string(),
            )]),
            body,
        }
    }
}

/// Outcome of resolving one request.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolution {
    /// A definition matched and its response was rendered
    Mocked {
        mock_id: String,
        response: MockResponse,
    },
    /// No active definition matched
    NotFound,
    /// The store could not be read
    Failed,
}

impl Resolution {
    pub fn status(&self) -> u16 {
        match self {
            Resolution::Mocked { response, .. } => response.status,
            Resolution::NotFound => 404,
            Resolution::Failed => 500,
        }
    }

    pub fn mock_id(&self) -> Option<&str> {
        match self {
            Resolution::Mocked { mock_id, .. } => Some(mock_id.as_str()),
            _ => None,
        }
    }

    /// The response to send; error outcomes carry no internal detail.
    pub fn into_response(self) -> MockResponse {
        match self {
            Resolution::Mocked { response, .. } => response,
            Resolution::NotFound => MockResponse::json(404, json!({"error": "Mock not found"})),
            Resolution::Failed => {
                MockResponse::json(500, error_body("Internal server error", None))
            }
        }
    }
}

/// Resolves requests against the definitions in a document store.
pub struct MockResolver {
    store: Arc<dyn DocumentStore>,
    template_engine: TemplateEngine,
    settings: GlobalSettings,
    /// Total requests processed.
    requests_total: AtomicU64,
    /// Total requests matched to mocks.
    requests_matched: AtomicU64,
    /// Total requests unmatched.
    requests_unmatched: AtomicU64,
}

impl MockResolver {
    pub fn new(store: Arc<dyn DocumentStore>, settings: GlobalSettings) -> Self {
        Self {
            store,
            template_engine: TemplateEngine::new(),
            settings,
            requests_total: AtomicU64::new(0),
            requests_matched: AtomicU64::new(0),
            requests_unmatched: AtomicU64::new(0),
        }
    }

    pub fn store(&self) -> &Arc<dyn DocumentStore> {
        &self.store
    }

    /// Get total requests processed.
    pub fn total_requests(&self) -> u64 {
        self.requests_total.load(Ordering::Relaxed)
    }

    /// Get total requests matched.
    pub fn total_matched(&self) -> u64 {
        self.requests_matched.load(Ordering::Relaxed)
    }

    /// Get total requests unmatched.
    pub fn total_unmatched(&self) -> u64 {
        self.requests_unmatched.load(Ordering::Relaxed)
    }

    /// Active definitions in store order. Records that do not decode are
    /// skipped with a warning.
    pub async fn active_mocks(&self) -> Result<Vec<MockDefinition>, StoreError> {
        let records = self.store.list(MOCKS).await?;

        Ok(records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| {
                match serde_json::from_value::<MockDefinition>(record) {
                    Ok(mock) => Some(mock),
                    Err(e) => {
                        warn!(index, error = %e, "Skipping malformed mock definition");
                        None
                    }
                }
            })
            .filter(|mock| mock.active)
            .collect())
    }

    /// Resolve a request to a response.
    pub async fn resolve(&self, request: &MockRequest) -> Resolution {
        let started = Instant::now();
        self.requests_total.fetch_add(1, Ordering::Relaxed);

        let resolution = self.resolve_inner(request).await;
        self.record(request, &resolution, started);
        resolution
    }

    async fn resolve_inner(&self, request: &MockRequest) -> Resolution {
        let mocks = match self.active_mocks().await {
            Ok(mocks) => mocks,
            Err(e) => {
                error!(error = %e, method = %request.method, path = %request.path, "Mock execution error");
                return Resolution::Failed;
            }
        };

        let matcher = Matcher::new(&mocks);
        let Some(result) = matcher.find_match(&mocks, request) else {
            self.requests_unmatched.fetch_add(1, Ordering::Relaxed);
            if self.settings.log_unmatched {
                warn!(method = %request.method, path = %request.path, "No mock found");
            }
            return Resolution::NotFound;
        };

        self.requests_matched.fetch_add(1, Ordering::Relaxed);
        let mock = result.mock;
        if self.settings.log_matches {
            info!(
                mock_id = %mock.id,
                method = %request.method,
                path = %request.path,
                "Request matched mock"
            );
        }

        let response = &mock.response;
        if response.latency > 0 {
            debug!(mock_id = %mock.id, latency_ms = response.latency, "Applying latency");
            tokio::time::sleep(Duration::from_millis(response.latency)).await;
        }

        let ctx = TemplateContext::new(request, &result.params);

        let mut headers = self
            .template_engine
            .render_headers(&response.headers, &ctx)
            .unwrap_or_else(|e| {
                error!(mock_id = %mock.id, error = %e, "Header template rendering error");
                response.headers.clone()
            });
        if !headers.keys().any(|k| k.eq_ignore_ascii_case("content-type")) {
            headers.insert(
                "Content-Type".to_string(),
                self.settings.default_content_type.clone(),
            );
        }

        let body = self.template_engine.render(&response.body, &ctx);

        Resolution::Mocked {
            mock_id: mock.id.clone(),
            response: MockResponse {
                status: response.status,
                headers,
                body: body.into(),
            },
        }
    }

    /// Queue the request log entry for this resolution.
    fn record(&self, request: &MockRequest, resolution: &Resolution, started: Instant) {
        if matches!(resolution, Resolution::NotFound) && !self.settings.record_unmatched {
            return;
        }

        let entry = LogEntry {
            id: Uuid::new_v4().to_string(),
            mock_id: resolution.mock_id().map(str::to_string),
            method: request.method.clone(),
            path: request.path.clone(),
            status: resolution.status(),
            latency: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            timestamp: Utc::now(),
            request: request.snapshot(),
        };

        match serde_json::to_value(&entry) {
            Ok(record) => self.store.append_detached(LOGS, record),
            Err(e) => error!(error = %e, "Failed to log request"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::admin::MockAdmin;
    use crate::store::JsonStore;
    use async_trait::async_trait;
    use std::collections::HashSet;

    async fn setup(payloads: Vec<Value>) -> (Arc<MockResolver>, Vec<String>) {
        let store: Arc<dyn DocumentStore> = Arc::new(JsonStore::in_memory());
        let admin = MockAdmin::new(Arc::clone(&store));
        let mut ids = Vec::new();
        for payload in payloads {
            ids.push(admin.create(payload).await.unwrap().id);
        }
        let resolver = MockResolver::new(store, GlobalSettings::default());
        (Arc::new(resolver), ids)
    }

    async fn logs(resolver: &MockResolver) -> Vec<LogEntry> {
        resolver
            .store()
            .list(LOGS)
            .await
            .unwrap()
            .into_iter()
            .map(|record| serde_json::from_value(record).unwrap())
            .collect()
    }

    #[tokio::test]
    async fn test_resolves_rendered_response_and_logs() {
        let (resolver, ids) = setup(vec![json!({
            "path": "/users/:id",
            "method": "GET",
            "response": {
                "status": 200,
                "headers": {"X-User": "{{request.params.id}}"},
                "body": {"id": "{{request.params.id}}", "echoPath": "{{request.path}}"}
            }
        })])
        .await;

        let request = MockRequest::from_uri("GET", "/users/42?verbose=1").with_header("Accept", "*/*");
        let resolution = resolver.resolve(&request).await;

        assert_eq!(resolution.mock_id(), Some(ids[0].as_str()));
        let response = resolution.into_response();
        assert_eq!(response.status, 200);
        assert_eq!(response.body, json!({"id": "42", "echoPath": "/users/42"}));
        assert_eq!(response.headers.get("X-User").map(String::as_str), Some("42"));
        assert_eq!(
            response.headers.get("Content-Type").map(String::as_str),
            Some("application/json")
        );

        let entries = logs(&resolver).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mock_id.as_deref(), Some(ids[0].as_str()));
        assert_eq!(entries[0].status, 200);
        assert_eq!(entries[0].path, "/users/42");
        assert_eq!(entries[0].request.query.get("verbose").map(String::as_str), Some("1"));
        assert_eq!(entries[0].request.headers.get("accept").map(String::as_str), Some("*/*"));
        assert_eq!(resolver.total_matched(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_request_is_not_found_and_logged_without_mock_id() {
        let (resolver, _) = setup(vec![]).await;

        let resolution = resolver.resolve(&MockRequest::new("GET", "/nothing")).await;
        assert_eq!(resolution, Resolution::NotFound);

        let response = resolution.into_response();
        assert_eq!(response.status, 404);
        assert_eq!(response.body, json!({"error": "Mock not found"}));

        let entries = logs(&resolver).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].mock_id, None);
        assert_eq!(entries[0].status, 404);
        assert_eq!(resolver.total_unmatched(), 1);
    }

    #[tokio::test]
    async fn test_unmatched_requests_can_skip_the_log() {
        let store: Arc<dyn DocumentStore> = Arc::new(JsonStore::in_memory());
        let settings = GlobalSettings {
            record_unmatched: false,
            ..GlobalSettings::default()
        };
        let resolver = MockResolver::new(store, settings);

        resolver.resolve(&MockRequest::new("GET", "/nothing")).await;
        assert!(logs(&resolver).await.is_empty());
    }

    #[tokio::test]
    async fn test_inactive_and_malformed_definitions_are_invisible() {
        let store: Arc<dyn DocumentStore> = Arc::new(JsonStore::in_memory());
        store.append(MOCKS, json!({"id": "broken", "path": 7})).await.unwrap();
        store
            .append(
                MOCKS,
                json!({"id": "off", "path": "/ping", "method": "GET", "active": false,
                       "response": {"body": "off"}}),
            )
            .await
            .unwrap();
        store
            .append(
                MOCKS,
                json!({"id": "on", "path": "/ping", "method": "GET",
                       "response": {"body": "pong", "headers": {"Content-Type": "text/plain"}}}),
            )
            .await
            .unwrap();
        let resolver = MockResolver::new(store, GlobalSettings::default());

        let resolution = resolver.resolve(&MockRequest::new("GET", "/ping")).await;
        assert_eq!(resolution.mock_id(), Some("on"));
        let response = resolution.into_response();
        assert_eq!(response.body_bytes(), b"pong");
        assert_eq!(
            response.headers.get("Content-Type").map(String::as_str),
            Some("text/plain")
        );
    }

    #[tokio::test]
    async fn test_admin_edits_are_visible_immediately() {
        let (resolver, ids) = setup(vec![json!({
            "path": "/flag", "method": "GET", "response": {"body": {"on": true}}
        })])
        .await;
        let admin = MockAdmin::new(Arc::clone(resolver.store()));

        assert_eq!(resolver.resolve(&MockRequest::new("GET", "/flag")).await.status(), 200);

        admin.update(&ids[0], json!({"active": false})).await.unwrap();
        assert_eq!(resolver.resolve(&MockRequest::new("GET", "/flag")).await, Resolution::NotFound);
    }

    #[tokio::test]
    async fn test_template_failure_still_sends_response() {
        let (resolver, _) = setup(vec![json!({
            "path": "/broken",
            "method": "GET",
            "response": {
                "status": 202,
                "headers": {"X-Broken": "{{#each}}"},
                "body": {"value": "{{#if request.path}}unterminated"}
            }
        })])
        .await;

        let response = resolver
            .resolve(&MockRequest::new("GET", "/broken"))
            .await
            .into_response();

        assert_eq!(response.status, 202);
        assert_eq!(response.body, json!({"error": "Template rendering failed"}));
        assert_eq!(response.headers.get("X-Broken").map(String::as_str), Some("{{#each}}"));

        // Unrelated requests are unaffected
        assert_eq!(
            resolver.resolve(&MockRequest::new("GET", "/other")).await,
            Resolution::NotFound
        );
    }

    #[tokio::test]
    async fn test_latency_does_not_block_other_requests() {
        let (resolver, _) = setup(vec![
            json!({"path": "/slow", "method": "GET", "response": {"latency": 50, "body": "slow"}}),
            json!({"path": "/fast", "method": "GET", "response": {"body": "fast"}}),
        ])
        .await;

        let started = Instant::now();
        let slow_request = MockRequest::new("GET", "/slow");
        let fast_request = MockRequest::new("GET", "/fast");

        let (slow_done, fast_done) = tokio::join!(
            async {
                resolver.resolve(&slow_request).await;
                Instant::now()
            },
            async {
                resolver.resolve(&fast_request).await;
                Instant::now()
            }
        );

        assert!(fast_done < slow_done);
        assert!(slow_done.duration_since(started) >= Duration::from_millis(50));

        let slow_entry = logs(&resolver)
            .await
            .into_iter()
            .find(|entry| entry.path == "/slow")
            .unwrap();
        assert!(slow_entry.latency >= 50);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_resolutions_log_exactly_once_each() {
        const N: usize = 64;
        let (resolver, _) = setup(vec![json!({
            "path": "/items/:id",
            "method": "GET",
            "response": {"body": {"id": "{{uuid}}"}}
        })])
        .await;

        let mut tasks = tokio::task::JoinSet::new();
        for n in 0..N {
            let resolver = Arc::clone(&resolver);
            tasks.spawn(async move {
                resolver
                    .resolve(&MockRequest::new("GET", format!("/items/{n}")))
                    .await
            });
        }
        while let Some(result) = tasks.join_next().await {
            assert_eq!(result.unwrap().status(), 200);
        }

        let entries = logs(&resolver).await;
        assert_eq!(entries.len(), N);

        let ids: HashSet<_> = entries.iter().map(|e| e.id.clone()).collect();
        assert_eq!(ids.len(), N);
        let paths: HashSet<_> = entries.iter().map(|e| e.path.clone()).collect();
        assert_eq!(paths.len(), N);
        assert_eq!(resolver.total_requests(), N as u64);
    }

    /// Store whose every operation fails.
    struct UnavailableStore;

    #[async_trait]
    impl DocumentStore for UnavailableStore {
        async fn list(&self, _: &str) -> Result<Vec<Value>, StoreError> {
            Err(StoreError::Closed)
        }

        async fn append(&self, _: &str, _: Value) -> Result<(), StoreError> {
            Err(StoreError::Closed)
        }

        async fn replace_at(&self, _: &str, _: usize, _: Value) -> Result<(), StoreError> {
            Err(StoreError::Closed)
        }

        async fn delete_at(&self, _: &str, _: usize) -> Result<Value, StoreError> {
            Err(StoreError::Closed)
        }

        async fn edit(&self, _: &str, _: crate::store::Edit) -> Result<(), StoreError> {
            Err(StoreError::Closed)
        }

        fn append_detached(&self, _: &str, _: Value) {}
    }

    #[tokio::test]
    async fn test_store_failure_is_a_generic_server_error() {
        let resolver = MockResolver::new(Arc::new(UnavailableStore), GlobalSettings::default());

        let resolution = resolver.resolve(&MockRequest::new("GET", "/anything")).await;
        assert_eq!(resolution, Resolution::Failed);

        let response = resolution.into_response();
        assert_eq!(response.status, 500);
        assert_eq!(response.body["error"]["message"], "Internal server error");
        assert!(response.body["error"]["details"].is_null());
    }
}
