//! Persistent document store for mock definitions and request logs.
//!
//! The store is a single JSON document mapping collection names to arrays of
//! records. Every operation is sent through one FIFO queue drained by a
//! single worker task that owns the document, so operations apply one at a
//! time in submission order. A mutation is persisted (temp file, fsync,
//! rename) before it is acknowledged and before the in-memory document is
//! replaced.

use crate::error::StoreError;
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

/// Collection holding mock definitions.
pub const MOCKS: &str = "mocks";

/// Collection holding request log entries.
pub const LOGS: &str = "logs";

/// Lookup and change applied by the worker in one step, so no other
/// operation can run between them. Returns whether the collection changed;
/// an unchanged collection is not persisted.
pub type Edit = Box<dyn FnOnce(&mut Vec<Value>) -> bool + Send>;

/// Ordered collections of JSON records.
///
/// A collection that is missing or not an array is reinitialized to an
/// empty array on first access instead of raising an error.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// All records of a collection, in insertion order.
    async fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError>;

    /// Append a record; returns once it is persisted.
    async fn append(&self, collection: &str, record: Value) -> Result<(), StoreError>;

    /// Replace the record at `index`.
    async fn replace_at(&self, collection: &str, index: usize, record: Value)
        -> Result<(), StoreError>;

    /// Remove and return the record at `index`.
    async fn delete_at(&self, collection: &str, index: usize) -> Result<Value, StoreError>;

    /// Apply `edit` to a collection; returns once any change is persisted.
    async fn edit(&self, collection: &str, edit: Edit) -> Result<(), StoreError>;

    /// Queue an append without waiting for it. Failures are logged, never
    /// returned.
    fn append_detached(&self, collection: &str, record: Value);
}

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

enum Command {
    List {
        collection: String,
        reply: Reply<Vec<Value>>,
    },
    Append {
        collection: String,
        record: Value,
        reply: Option<Reply<()>>,
    },
    ReplaceAt {
        collection: String,
        index: usize,
        record: Value,
        reply: Reply<()>,
    },
    DeleteAt {
        collection: String,
        index: usize,
        reply: Reply<Value>,
    },
    Edit {
        collection: String,
        edit: Edit,
        reply: Reply<()>,
    },
}

/// JSON document store, file-backed or in memory.
///
/// Handles are cheap to clone; all clones share one worker.
#[derive(Clone)]
pub struct JsonStore {
    tx: mpsc::UnboundedSender<Command>,
}

impl JsonStore {
    /// Open (or create) the document at `path`.
    ///
    /// Must be called from within a Tokio runtime.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let mut document = load_document(&path).await?;

        if seed_collections(&mut document) {
            persist(&path, &document).await?;
            info!(path = %path.display(), "Initialized mock database");
        }

        debug!(path = %path.display(), "Store opened");
        Ok(Self::spawn(Worker {
            path: Some(path),
            document,
        }))
    }

    /// A store that never touches disk.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn in_memory() -> Self {
        let mut document = Map::new();
        seed_collections(&mut document);
        Self::spawn(Worker {
            path: None,
            document,
        })
    }

    fn spawn(worker: Worker) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker.run(rx));
        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(Reply<T>) -> Command) -> Result<T, StoreError> {
        let (reply, rx) = oneshot::channel();
        self.tx.send(build(reply)).map_err(|_| StoreError::Closed)?;
        rx.await.map_err(|_| StoreError::Closed)?
    }
}

#[async_trait]
impl DocumentStore for JsonStore {
    async fn list(&self, collection: &str) -> Result<Vec<Value>, StoreError> {
        self.request(|reply| Command::List {
            collection: collection.to_string(),
            reply,
        })
        .await
    }

    async fn append(&self, collection: &str, record: Value) -> Result<(), StoreError> {
        self.request(|reply| Command::Append {
            collection: collection.to_string(),
            record,
            reply: Some(reply),
        })
        .await
    }

    async fn replace_at(
        &self,
        collection: &str,
        index: usize,
        record: Value,
    ) -> Result<(), StoreError> {
        self.request(|reply| Command::ReplaceAt {
            collection: collection.to_string(),
            index,
            record,
            reply,
        })
        .await
    }

    async fn delete_at(&self, collection: &str, index: usize) -> Result<Value, StoreError> {
        self.request(|reply| Command::DeleteAt {
            collection: collection.to_string(),
            index,
            reply,
        })
        .await
    }

    async fn edit(&self, collection: &str, edit: Edit) -> Result<(), StoreError> {
        self.request(|reply| Command::Edit {
            collection: collection.to_string(),
            edit,
            reply,
        })
        .await
    }

    fn append_detached(&self, collection: &str, record: Value) {
        let command = Command::Append {
            collection: collection.to_string(),
            record,
            reply: None,
        };
        if self.tx.send(command).is_err() {
            error!(collection, "Store worker stopped, dropping record");
        }
    }
}

/// Owner of the document; the only code that reads or writes it.
struct Worker {
    path: Option<PathBuf>,
    document: Map<String, Value>,
}

impl Worker {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        while let Some(command) = rx.recv().await {
            self.handle(command).await;
        }
        debug!("Store worker stopped");
    }

    async fn handle(&mut self, command: Command) {
        match command {
            Command::List { collection, reply } => {
                let _ = reply.send(self.list(&collection).await);
            }
            Command::Append {
                collection,
                record,
                reply,
            } => {
                let result = self
                    .mutate(&collection, |records| {
                        records.push(record);
                        Ok(())
                    })
                    .await;
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(e) = result {
                            error!(collection = %collection, error = %e, "Failed to append record");
                        }
                    }
                }
            }
            Command::ReplaceAt {
                collection,
                index,
                record,
                reply,
            } => {
                let result = self
                    .mutate(&collection, |records| {
                        let len = records.len();
                        let slot = records.get_mut(index).ok_or_else(|| {
                            StoreError::IndexOutOfRange {
                                collection: collection.clone(),
                                index,
                                len,
                            }
                        })?;
                        *slot = record;
                        Ok(())
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::DeleteAt {
                collection,
                index,
                reply,
            } => {
                let result = self
                    .mutate(&collection, |records| {
                        if index < records.len() {
                            Ok(records.remove(index))
                        } else {
                            Err(StoreError::IndexOutOfRange {
                                collection: collection.clone(),
                                index,
                                len: records.len(),
                            })
                        }
                    })
                    .await;
                let _ = reply.send(result);
            }
            Command::Edit {
                collection,
                edit,
                reply,
            } => {
                let mut next = self.document.clone();
                let result = if edit(collection_mut(&mut next, &collection)) {
                    self.commit(next).await
                } else {
                    Ok(())
                };
                let _ = reply.send(result);
            }
        }
    }

    async fn list(&mut self, collection: &str) -> Result<Vec<Value>, StoreError> {
        if let Some(Value::Array(records)) = self.document.get(collection) {
            return Ok(records.clone());
        }
        // Persist the reinitialized collection
        self.mutate(collection, |records| Ok(records.clone())).await
    }

    /// Apply `op` to a copy of the document, persist the copy, then commit.
    async fn mutate<T>(
        &mut self,
        collection: &str,
        op: impl FnOnce(&mut Vec<Value>) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut next = self.document.clone();
        let result = op(collection_mut(&mut next, collection))?;
        self.commit(next).await?;
        Ok(result)
    }

    /// Persist `next`, then make it the current document.
    async fn commit(&mut self, next: Map<String, Value>) -> Result<(), StoreError> {
        if let Some(path) = &self.path {
            persist(path, &next).await?;
        }
        self.document = next;
        Ok(())
    }
}

/// The named collection as an array, reinitializing it when malformed.
fn collection_mut<'a>(document: &'a mut Map<String, Value>, name: &str) -> &'a mut Vec<Value> {
    let slot = document.entry(name.to_string()).or_insert(Value::Null);
    if !slot.is_array() {
        warn!(collection = name, "Collection missing or not a sequence, reinitializing");
        *slot = Value::Array(Vec::new());
    }
    let Value::Array(records) = slot else {
        unreachable!("collection was reinitialized to an array")
    };
    records
}

/// Ensure the `mocks` and `logs` collections exist. Returns whether the
/// document changed.
fn seed_collections(document: &mut Map<String, Value>) -> bool {
    let mut changed = false;
    for name in [MOCKS, LOGS] {
        if !document.contains_key(name) {
            document.insert(name.to_string(), Value::Array(Vec::new()));
            changed = true;
        }
    }
    changed
}

async fn load_document(path: &Path) -> Result<Map<String, Value>, StoreError> {
    let raw = match tokio::fs::read(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Map::new()),
        Err(source) => {
            return Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    if raw.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }

    match serde_json::from_slice::<Value>(&raw) {
        Ok(Value::Object(document)) => Ok(document),
        Ok(_) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            message: "top-level value is not an object".to_string(),
        }),
        Err(e) => Err(StoreError::Corrupt {
            path: path.to_path_buf(),
            message: e.to_string(),
        }),
    }
}

async fn persist(path: &Path, document: &Map<String, Value>) -> Result<(), StoreError> {
    let io_error = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(io_error)?;
    }

    let payload = serde_json::to_vec_pretty(document)?;
    let temp_path = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

    let written = async {
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&payload).await?;
        file.sync_all().await?;
        tokio::fs::rename(&temp_path, path).await
    }
    .await;

    if let Err(source) = written {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(io_error(source));
    }
    Ok(())
}
