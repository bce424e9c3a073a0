//! The document store interface the engine consumes.
//!
//! Two independent instances back the engine: the passenger-side store
//! (ride requests) and the driver-side store (drivers and proposals). The
//! engine never assumes a transaction can span both;
//! [`DocumentStore::run_transaction`] is atomic within a single store only.
//!
//! Change feeds deliver at-least-once: a subscriber first receives every
//! currently-matching document as an `Added` event, then live changes, and
//! may see duplicates. Handlers must be idempotent.

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;

use dispatch_core::document::Fields;

/// A document snapshot: its id plus the loosely-typed field map.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub id: String,
    pub data: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, data: Fields) -> Self {
        Self {
            id: id.into(),
            data,
        }
    }
}

/// How a document entered, changed within, or left a subscription's result
/// set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One change feed event.
#[derive(Debug, Clone)]
pub struct DocumentChange {
    pub kind: ChangeKind,
    pub doc: Document,
}

/// Receiving half of a change feed.
pub type ChangeFeed = mpsc::UnboundedReceiver<DocumentChange>;

/// The filters the engine's queries and subscriptions need.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    All,
    FieldEq { field: String, value: Value },
    FieldIn { field: String, values: Vec<Value> },
}

impl Filter {
    pub fn all() -> Self {
        Self::All
    }

    pub fn field_eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::FieldEq {
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn field_in<I, V>(field: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::FieldIn {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn matches(&self, data: &Fields) -> bool {
        match self {
            Self::All => true,
            Self::FieldEq { field, value } => data.get(field) == Some(value),
            Self::FieldIn { field, values } => data
                .get(field)
                .map(|v| values.contains(v))
                .unwrap_or(false),
        }
    }
}

/// Store failure classes. Only [`StoreError::is_transient`] errors are worth
/// retrying; the rest are logical outcomes.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document {collection}/{id} not found")]
    NotFound { collection: String, id: String },
    #[error("transient store error: {0}")]
    Transient(String),
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("transaction aborted: {0}")]
    TransactionAborted(String),
    #[error("change feed closed")]
    Closed,
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::Unavailable(_))
    }

    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::TransactionAborted(reason.into())
    }
}

/// Read-check-write context inside [`DocumentStore::run_transaction`].
///
/// Reads observe a consistent snapshot; writes are buffered and applied
/// atomically when the closure returns `Ok`. Returning any error discards
/// every buffered write.
pub trait TransactionContext: Send {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;
    fn update(&mut self, collection: &str, id: &str, fields: Fields);
    /// Create a document under a caller-chosen id (ids are generated before
    /// the transaction, the way store client libraries hand them out).
    fn create(&mut self, collection: &str, id: &str, fields: Fields);
}

/// A transaction body. Must capture only owned data.
pub type TransactionFn =
    Box<dyn FnOnce(&mut dyn TransactionContext) -> Result<(), StoreError> + Send + 'static>;

/// One side's document store. Implementations adapt a concrete backend;
/// the engine is written purely against this trait.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Fetch a document snapshot. Missing documents are `Ok(None)`, not an
    /// error: the engine treats missing counterparts as recoverable.
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError>;

    /// Merge `fields` into an existing document. `null` values clear fields.
    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError>;

    /// Create a document with a store-generated id.
    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError>;

    /// All documents currently matching `filter`.
    async fn query(&self, collection: &str, filter: Filter) -> Result<Vec<Document>, StoreError>;

    /// Subscribe to `filter` on `collection`. The feed starts with the
    /// current result set as `Added` events and stays open for the life of
    /// the store.
    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<ChangeFeed, StoreError>;

    /// Run `tx` with snapshot-read + conditional-write atomicity across
    /// documents of this store. At most one concurrent transaction can
    /// succeed between two conflicting reads of the same document.
    async fn run_transaction(&self, tx: TransactionFn) -> Result<(), StoreError>;
}
