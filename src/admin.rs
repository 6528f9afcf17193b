//! Admin operations on mock definitions and request logs.
//!
//! Works directly against the same [`DocumentStore`] the resolver reads, so
//! changes are visible to the next resolved request.

use crate::error::{error_body, StoreError};
use crate::model::MockDefinition;
use crate::store::{DocumentStore, LOGS, MOCKS};
use crate::validation::{validate_create, validate_update, ValidationError};
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::oneshot;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Failure of an admin operation.
#[derive(Debug, Error)]
pub enum AdminError {
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),

    #[error("mock '{0}' not found")]
    NotFound(String),

    #[error("stored mock '{id}' is malformed: {source}")]
    MalformedRecord {
        id: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl AdminError {
    /// HTTP-equivalent status code.
    pub fn status(&self) -> u16 {
        match self {
            AdminError::Validation(_) => 400,
            AdminError::NotFound(_) => 404,
            AdminError::MalformedRecord { .. } | AdminError::Store(_) => 500,
        }
    }

    /// Error body for the caller; server errors carry no internal detail.
    pub fn body(&self) -> Value {
        match self {
            AdminError::Validation(e) => error_body(
                &e.to_string(),
                serde_json::to_value(&e.details).ok(),
            ),
            AdminError::NotFound(_) => error_body("Mock not found", None),
            AdminError::MalformedRecord { .. } | AdminError::Store(_) => {
                error_body("Internal server error", None)
            }
        }
    }
}

/// CRUD service for the `mocks` collection and read access to `logs`.
pub struct MockAdmin {
    store: Arc<dyn DocumentStore>,
}

impl MockAdmin {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Validate and store a new definition under a fresh id.
    pub async fn create(&self, payload: Value) -> Result<MockDefinition, AdminError> {
        let mock = validate_create(payload, Uuid::new_v4().to_string(), Utc::now())
            .inspect_err(|e| warn!(error = %e, "Validation error"))?;

        let record = serde_json::to_value(&mock).map_err(StoreError::from)?;
        self.store
            .append(MOCKS, record)
            .await
            .inspect_err(|e| error!(error = %e, "Failed to store mock"))?;

        info!(id = %mock.id, method = %mock.method, path = %mock.path, "Created mock");
        Ok(mock)
    }

    /// All stored mock records, as stored.
    pub async fn list(&self) -> Result<Vec<Value>, AdminError> {
        Ok(self.store.list(MOCKS).await?)
    }

    pub async fn get(&self, id: &str) -> Result<MockDefinition, AdminError> {
        let record = self
            .store
            .list(MOCKS)
            .await?
            .into_iter()
            .find(|record| has_id(record, id))
            .ok_or_else(|| AdminError::NotFound(id.to_string()))?;
        decode(id, record)
    }

    /// Merge a partial payload onto an existing definition.
    pub async fn update(&self, id: &str, payload: Value) -> Result<MockDefinition, AdminError> {
        let patch = validate_update(payload).inspect_err(|e| warn!(error = %e, "Validation error"))?;
        let now = Utc::now();
        let target = id.to_string();

        let mock = self
            .edit_mocks(move |records| {
                let slot = records
                    .iter_mut()
                    .find(|record| has_id(record, &target))
                    .ok_or_else(|| AdminError::NotFound(target.clone()))?;

                let mut mock = decode(&target, slot.clone())?;
                patch.apply(&mut mock, now);
                *slot = serde_json::to_value(&mock).map_err(StoreError::from)?;
                Ok(mock)
            })
            .await?;

        info!(id = %mock.id, method = %mock.method, path = %mock.path, "Updated mock");
        Ok(mock)
    }

    /// Remove a definition, returning the removed record.
    pub async fn delete(&self, id: &str) -> Result<Value, AdminError> {
        let target = id.to_string();
        let removed = self
            .edit_mocks(move |records| {
                let index = records
                    .iter()
                    .position(|record| has_id(record, &target))
                    .ok_or_else(|| AdminError::NotFound(target.clone()))?;
                Ok(records.remove(index))
            })
            .await?;

        let method = removed.get("method").and_then(serde_json::Value::as_str).unwrap_or_default();
        let path = removed.get("path").and_then(serde_json::Value::as_str).unwrap_or_default();
        info!(id, method, path, "Deleted mock");
        Ok(removed)
    }

    /// All request log records.
    pub async fn logs(&self) -> Result<Vec<Value>, AdminError> {
        Ok(self.store.list(LOGS).await?)
    }

    /// Run `op` against the `mocks` collection as a single store operation.
    /// The collection is persisted only when `op` succeeds.
    async fn edit_mocks<T, F>(&self, op: F) -> Result<T, AdminError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Vec<Value>) -> Result<T, AdminError> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        self.store
            .edit(
                MOCKS,
                Box::new(move |records: &mut Vec<Value>| {
                    let outcome = op(records);
                    let changed = outcome.is_ok();
                    let _ = tx.send(outcome);
                    changed
                }),
            )
            .await?;

        rx.await.map_err(|_| StoreError::Closed)?
    }
}

fn has_id(record: &Value, id: &str) -> bool {
    record.get("id").and_then(Value::as_str) == Some(id)
}

fn decode(id: &str, record: Value) -> Result<MockDefinition, AdminError> {
    serde_json::from_value(record).map_err(|source| AdminError::MalformedRecord {
        id: id.to_string(),
        source,
    })
}
