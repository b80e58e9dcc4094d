//! # Core Traits (Ports)
//!
//! Contracts for the three managed collaborators: the auth provider, the
//! document store and the blob store. Services receive them as
//! `Arc<dyn Port>` at construction; there are no global clients.

use std::fmt;

use async_trait::async_trait;
use bytes::Bytes;
use mime::Mime;
use serde_json::Value;
use thiserror::Error;

use crate::models::{Principal, UserId};
use crate::subscription::Subscription;

/// Field map of a stored document.
pub type Fields = serde_json::Map<String, Value>;

/// A collection, either top-level (`users`) or nested under a document
/// (`discussions/{id}/comments`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CollectionPath(String);

impl CollectionPath {
    pub fn root(name: &str) -> Self {
        Self(name.to_owned())
    }

    pub fn doc(&self, id: impl Into<String>) -> DocumentPath {
        DocumentPath {
            collection: self.clone(),
            id: id.into(),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CollectionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Address of a single document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentPath {
    collection: CollectionPath,
    id: String,
}

impl DocumentPath {
    pub fn collection(&self) -> &CollectionPath {
        &self.collection
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// A sub-collection nested under this document.
    pub fn child(&self, name: &str) -> CollectionPath {
        CollectionPath(format!("{}/{}/{}", self.collection, self.id, name))
    }
}

impl fmt::Display for DocumentPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.collection, self.id)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub path: DocumentPath,
    pub fields: Fields,
}

impl Document {
    pub fn id(&self) -> &str {
        self.path.id()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Ascending,
    Descending,
}

/// Equality filter on a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldFilter {
    pub field: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: String,
    pub direction: Direction,
}

/// A collection query: equality filters plus an optional single-field ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: CollectionPath,
    pub filters: Vec<FieldFilter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(collection: CollectionPath) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn where_eq(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.filters.push(FieldFilter {
            field: field.to_owned(),
            value: value.into(),
        });
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.to_owned(),
            direction,
        });
        self
    }

    pub fn matches(&self, fields: &Fields) -> bool {
        self.filters
            .iter()
            .all(|filter| fields.get(&filter.field) == Some(&filter.value))
    }
}

/// Errors raised by document and blob store adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("document not found: {0}")]
    NotFound(String),

    #[error("document already exists: {0}")]
    AlreadyExists(String),

    /// A document read inside a transaction changed before commit.
    #[error("transaction conflict on {0}")]
    Conflict(String),

    #[error("field '{field}' of {path} is invalid: {reason}")]
    InvalidField {
        path: String,
        field: String,
        reason: String,
    },

    /// Misuse of a transaction (read after write, double commit).
    #[error("invalid transaction: {0}")]
    InvalidTransaction(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Managed document database with optimistic transactions and realtime listeners.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    async fn query(&self, query: &Query) -> Result<Vec<Document>, StoreError>;

    /// Creates or overwrites the document.
    async fn set(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError>;

    /// Merges `fields` into an existing document; `NotFound` if absent.
    async fn update(&self, path: &DocumentPath, fields: Fields) -> Result<(), StoreError>;

    /// Inserts under a store-generated id.
    async fn add(&self, collection: &CollectionPath, fields: Fields)
        -> Result<DocumentPath, StoreError>;

    /// Server-side atomic add on an integer field; a missing field counts as zero.
    async fn increment(&self, path: &DocumentPath, field: &str, delta: i64)
        -> Result<(), StoreError>;

    async fn begin(&self) -> Result<Box<dyn Transaction>, StoreError>;

    /// Emits the current result set, then a fresh one after every commit that
    /// touches the queried collection.
    async fn subscribe_query(&self, query: Query)
        -> Result<Subscription<Vec<Document>>, StoreError>;

    async fn subscribe_document(&self, path: DocumentPath)
        -> Result<Subscription<Option<Document>>, StoreError>;
}

/// One optimistic read-modify-write unit.
///
/// Reads happen first, writes are buffered and applied all-or-nothing by
/// [`Transaction::commit`]. Commit fails with [`StoreError::Conflict`] when a
/// document read with [`Transaction::get`] changed in the meantime, or when a
/// document read with [`Transaction::peek`] appeared or disappeared.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait Transaction: Send {
    /// Reads and pins the document's version.
    async fn get(&mut self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    /// Reads and records only an existence precondition.
    async fn peek(&mut self, path: &DocumentPath) -> Result<Option<Document>, StoreError>;

    fn set(&mut self, path: &DocumentPath, fields: Fields);

    fn update(&mut self, path: &DocumentPath, fields: Fields);

    fn increment(&mut self, path: &DocumentPath, field: &str, delta: i64);

    fn delete(&mut self, path: &DocumentPath);

    async fn commit(&mut self) -> Result<(), StoreError>;
}

/// Errors raised by auth provider adapters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    #[error("invalid credential")]
    InvalidCredential,

    #[error("no account for {0}")]
    UserNotFound(String),

    #[error("{0}")]
    RateLimited(String),

    #[error("{0}")]
    WeakPassword(String),

    #[error("{0} is already registered")]
    EmailInUse(String),

    #[error("malformed email {0}")]
    InvalidEmail(String),

    #[error("auth provider unavailable: {0}")]
    Unavailable(String),
}

/// Identity and session contract of the managed auth provider.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self, email: &str, password: &str) -> Result<Principal, AuthError>;

    /// Creates the identity and signs it in.
    async fn sign_up(&self, email: &str, password: &str) -> Result<Principal, AuthError>;

    async fn set_display_name(&self, uid: &UserId, display_name: &str) -> Result<(), AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn send_password_reset(&self, email: &str) -> Result<(), AuthError>;

    async fn current_principal(&self) -> Option<Principal>;

    /// Emits the current principal, then every sign-in and sign-out.
    async fn subscribe_auth_state(&self) -> Subscription<Option<Principal>>;
}

/// Opaque handle returned by [`BlobStore::put`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobHandle(pub String);

/// Managed blob storage, used for avatar images.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait BlobStore: Send + Sync {
    async fn put(&self, path: &str, data: Bytes, content_type: &Mime)
        -> Result<BlobHandle, StoreError>;

    async fn download_url(&self, handle: &BlobHandle) -> Result<String, StoreError>;
}
