//! # In-process document store
//!
//! Implements the `DocumentStore` port with the guarantees the managed store
//! gives: all-or-nothing commits, optimistic conflict detection, server-side
//! atomic increments and realtime listeners that see commits in order.
//!
//! Every document carries the revision of the commit that last wrote it.
//! Revisions are global and never reused, so a document that is deleted and
//! recreated still invalidates a version pinned before the delete.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use domains::ports::{
    CollectionPath, Direction, Document, DocumentPath, DocumentStore, Fields, Query, StoreError,
    Transaction,
};
use domains::subscription::Subscription;
use serde_json::Value;
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct StoredDocument {
    fields: Fields,
    revision: u64,
}

#[derive(Debug, Default)]
struct State {
    documents: BTreeMap<DocumentPath, StoredDocument>,
    revision: u64,
}

enum Listener {
    Query {
        query: Query,
        sender: mpsc::UnboundedSender<Vec<Document>>,
    },
    Document {
        path: DocumentPath,
        sender: mpsc::UnboundedSender<Option<Document>>,
    },
}

#[derive(Debug, Clone)]
enum Write {
    Set(DocumentPath, Fields),
    Update(DocumentPath, Fields),
    Increment(DocumentPath, String, i64),
    Delete(DocumentPath),
}

impl Write {
    fn path(&self) -> &DocumentPath {
        match self {
            Self::Set(path, _)
            | Self::Update(path, _)
            | Self::Increment(path, _, _)
            | Self::Delete(path) => path,
        }
    }

    /// Applies the write to the document's staged fields (`None` = absent).
    fn apply(&self, current: Option<Fields>) -> Result<Option<Fields>, StoreError> {
        match self {
            Self::Set(_, fields) => Ok(Some(fields.clone())),
            Self::Delete(_) => Ok(None),
            Self::Update(path, fields) => {
                let mut merged = current.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                merged.extend(fields.clone());
                Ok(Some(merged))
            }
            Self::Increment(path, field, delta) => {
                let mut fields = current.ok_or_else(|| StoreError::NotFound(path.to_string()))?;
                let invalid = |reason: &str| StoreError::InvalidField {
                    path: path.to_string(),
                    field: field.clone(),
                    reason: reason.to_owned(),
                };
                let base = match fields.get(field) {
                    None | Some(Value::Null) => 0,
                    Some(value) => value.as_i64().ok_or_else(|| invalid("not an integer"))?,
                };
                let next = base.checked_add(*delta).ok_or_else(|| invalid("increment overflow"))?;
                fields.insert(field.clone(), Value::from(next));
                Ok(Some(fields))
            }
        }
    }
}

/// Precondition recorded by a transactional read.
#[derive(Debug, Clone, Copy)]
enum ReadCheck {
    Revision(Option<u64>),
    Exists(bool),
}

struct Inner {
    state: RwLock<State>,
    listeners: DashMap<u64, Listener>,
    next_listener: AtomicU64,
}

impl Inner {
    /// Validates `reads`, then applies `writes` as one commit.
    async fn commit(
        &self,
        reads: &HashMap<DocumentPath, ReadCheck>,
        writes: &[Write],
    ) -> Result<u64, StoreError> {
        let mut state = self.state.write().await;

        for (path, check) in reads {
            let current = state.documents.get(path).map(|doc| doc.revision);
            let holds = match check {
                ReadCheck::Revision(revision) => current == *revision,
                ReadCheck::Exists(exists) => current.is_some() == *exists,
            };
            if !holds {
                debug!(%path, "transaction read invalidated by a concurrent commit");
                return Err(StoreError::Conflict(path.to_string()));
            }
        }

        let mut staged: BTreeMap<DocumentPath, Option<Fields>> = BTreeMap::new();
        for write in writes {
            let path = write.path();
            let current = match staged.get(path) {
                Some(fields) => fields.clone(),
                None => state.documents.get(path).map(|doc| doc.fields.clone()),
            };
            staged.insert(path.clone(), write.apply(current)?);
        }

        state.revision += 1;
        let revision = state.revision;
        for (path, fields) in &staged {
            match fields {
                Some(fields) => {
                    state.documents.insert(
                        path.clone(),
                        StoredDocument {
                            fields: fields.clone(),
                            revision,
                        },
                    );
                }
                None => {
                    state.documents.remove(path);
                }
            }
        }

        trace!(revision, documents = staged.len(), "commit applied");
        let changed: Vec<&DocumentPath> = staged.keys().collect();
        self.notify(&state, &changed);
        Ok(revision)
    }

    /// Pushes fresh snapshots to every listener affected by `changed`.
    /// Runs under the state lock so listeners observe commits in order.
    fn notify(&self, state: &State, changed: &[&DocumentPath]) {
        self.listeners.retain(|id, listener| {
            let delivered = match listener {
                Listener::Query { query, sender } => {
                    if !changed.iter().any(|path| path.collection() == &query.collection) {
                        return true;
                    }
                    sender.send(run_query(&state.documents, query)).is_ok()
                }
                Listener::Document { path, sender } => {
                    if !changed.contains(&&*path) {
                        return true;
                    }
                    sender.send(read_document(&state.documents, path)).is_ok()
                }
            };
            if !delivered {
                debug!(listener = id, "pruning listener whose subscriber went away");
            }
            delivered
        });
    }

    fn allocate_id(&self) -> u64 {
        self.next_listener.fetch_add(1, AtomicOrdering::Relaxed)
    }
}

/// Thread-safe, cloneable handle to an in-process document store.
#[derive(Clone)]
pub struct MemoryDocumentStore {
    inner: Arc<Inner>,
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                state: RwLock::new(State::default()),
                listeners: DashMap::new(),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Number of realtime listeners still attached.
    pub fn active_listeners(&self) -> usize {
        self.inner.listeners.len()
    }

    /// Revision of the latest commit (0 before the first write).
    pub async fn revision(&self) -> u64 {
        self.inner.state.read().await.revision
    }

    async fn write_one(&self, write: Write) -> Result<(), StoreError> {
        self.inner.commit(&HashMap::new(), &[write]).await.map(|_| ())
    }

    fn canceller(&self, id: u64) -> impl FnOnce() + Send + 'static {
        let inner = Arc::clone(&self.inner);
        move || {
            if inner.listeners.remove(&id).is_some() {
                debug!(listener = id, "listener cancelled");
            }
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        let state = self.inner.state.read().await;
        Ok(read_document(&state.documents, path))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError> {
        let state = self.inner.state.read().await;
        Ok(run_query(&state.documents, query))
    }

    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.write_one(Write::Set(path.clone(), fields)).await
    }

    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError> {
        self.write_one(Write::Update(path.clone(), fields)).await
    }

    async fn add(
        &self,
        collection: &CollectionPath,
        fields: Fields,
    ) -> Result<DocumentPath, StoreError> {
        let path = collection.doc(Uuid::new_v4().simple().to_string());
        let mut reads = HashMap::new();
        reads.insert(path.clone(), ReadCheck::Exists(false));
        self.inner
            .commit(&reads, &[Write::Set(path.clone(), fields)])
            .await
            .map_err(|err| match err {
                StoreError::Conflict(path) => StoreError::AlreadyExists(path),
                other => other,
            })?;
        Ok(path)
    }

    async fn increment(
        &self,
        path: &DocumentPath,
        field: &str,
        delta: i64,
    ) -> Result<(), StoreError> {
        self.write_one(Write::Increment(path.clone(), field.to_owned(), delta))
            .await
    }

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError> {
        Ok(Box::new(MemoryTransaction {
            inner: Arc::clone(&self.inner),
            reads: HashMap::new(),
            writes: Vec::new(),
            committed: false,
        }))
    }

    async fn subscribe_query(
        &self,
        query: Query,
    ) -> Result<Subscription<Vec<Document>>, StoreError> {
        // Holding the read lock orders the initial snapshot before any later commit.
        let state = self.inner.state.read().await;
        let id = self.inner.allocate_id();
        let (sender, subscription) = Subscription::channel(self.canceller(id));
        let _ = sender.send(run_query(&state.documents, &query));
        self.inner.listeners.insert(id, Listener::Query { query, sender });
        debug!(listener = id, "query listener attached");
        Ok(subscription)
    }

    async fn subscribe_document(
        &self,
        path: DocumentPath,
    ) -> Result<Subscription<Option<Document>>, StoreError> {
        let state = self.inner.state.read().await;
        let id = self.inner.allocate_id();
        let (sender, subscription) = Subscription::channel(self.canceller(id));
        let _ = sender.send(read_document(&state.documents, &path));
        self.inner.listeners.insert(id, Listener::Document { path, sender });
        debug!(listener = id, "document listener attached");
        Ok(subscription)
    }
}

/// Optimistic transaction over a [`MemoryDocumentStore`].
pub struct MemoryTransaction {
    inner: Arc<Inner>,
    reads: HashMap<DocumentPath, ReadCheck>,
    writes: Vec<Write>,
    committed: bool,
}

impl MemoryTransaction {
    async fn read(
        &mut self,
        path: &DocumentPath,
        pin_revision: bool,
    ) -> Result<Option<Document>, StoreError> {
        if !self.writes.is_empty() {
            return Err(StoreError::InvalidTransaction(
                "all reads must happen before the first write".into(),
            ));
        }
        let state = self.inner.state.read().await;
        let stored = state.documents.get(path);
        let check = if pin_revision {
            ReadCheck::Revision(stored.map(|doc| doc.revision))
        } else {
            ReadCheck::Exists(stored.is_some())
        };
        match self.reads.get(path) {
            Some(ReadCheck::Revision(_)) => {}
            _ => {
                self.reads.insert(path.clone(), check);
            }
        }
        Ok(read_document(&state.documents, path))
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn get(&mut self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.read(path, true).await
    }

    async fn peek(&mut self, path: &DocumentPath) -> Result<Option<Document>, StoreError> {
        self.read(path, false).await
    }

    fn set(&mut self, path: &DocumentPath, fields: Fields) {
        self.writes.push(Write::Set(path.clone(), fields));
    }

    fn update(&mut self, path: &DocumentPath, fields: Fields) {
        self.writes.push(Write::Update(path.clone(), fields));
    }

    fn increment(&mut self, path: &DocumentPath, field: &str, delta: i64) {
        self.writes
            .push(Write::Increment(path.clone(), field.to_owned(), delta));
    }

    fn delete(&mut self, path: &DocumentPath) {
        self.writes.push(Write::Delete(path.clone()));
    }

    async fn commit(&mut self) -> Result<(), StoreError> {
        if self.committed {
            return Err(StoreError::InvalidTransaction("already committed".into()));
        }
        self.committed = true;
        self.inner.commit(&self.reads, &self.writes).await.map(|_| ())
    }
}

fn read_document(
    documents: &BTreeMap<DocumentPath, StoredDocument>,
    path: &DocumentPath,
) -> Option<Document> {
    documents.get(path).map(|stored| Document {
        path: path.clone(),
        fields: stored.fields.clone(),
    })
}

fn run_query(documents: &BTreeMap<DocumentPath, StoredDocument>, query: &Query) -> Vec<Document> {
    // Paths order by collection first, so one collection is a contiguous range.
    let start = query.collection.doc(String::new());
    let mut results: Vec<Document> = documents
        .range(start..)
        .take_while(|(path, _)| path.collection() == &query.collection)
        .filter(|(_, stored)| query.matches(&stored.fields))
        .map(|(path, stored)| Document {
            path: path.clone(),
            fields: stored.fields.clone(),
        })
        .collect();

    if let Some(order) = &query.order_by {
        results.sort_by(|a, b| {
            let ordering = compare_values(a.fields.get(&order.field), b.fields.get(&order.field))
                .then_with(|| a.id().cmp(b.id()));
            match order.direction {
                Direction::Ascending => ordering,
                Direction::Descending => ordering.reverse(),
            }
        });
    }
    results
}

/// Total order over field values: missing < null < bool < number < string < other.
fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn rank(value: Option<&Value>) -> u8 {
        match value {
            None => 0,
            Some(Value::Null) => 1,
            Some(Value::Bool(_)) => 2,
            Some(Value::Number(_)) => 3,
            Some(Value::String(_)) => 4,
            Some(_) => 5,
        }
    }

    match (a, b) {
        (Some(Value::Bool(x)), Some(Value::Bool(y))) => x.cmp(y),
        (Some(Value::Number(x)), Some(Value::Number(y))) => match (x.as_i64(), y.as_i64()) {
            (Some(x), Some(y)) => x.cmp(&y),
            _ => x
                .as_f64()
                .partial_cmp(&y.as_f64())
                .unwrap_or(Ordering::Equal),
        },
        (Some(Value::String(x)), Some(Value::String(y))) => x.cmp(y),
        _ => rank(a).cmp(&rank(b)),
    }
}
