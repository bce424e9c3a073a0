//! In-memory [`DocumentStore`] used by the integration tests.
//!
//! Single-process, mutex-serialized, with Firestore-like feed semantics:
//! subscribers get the current result set as `Added` events, then one event
//! per write that touches their filter. Transactions hold the store lock for
//! their whole body, which gives the compare-and-swap guarantee the
//! reservation protocol relies on. A failure-injection knob makes the next N
//! plain writes return a transient error, for exercising the retry path.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use dispatch_core::document::Fields;

use crate::store::{
    ChangeFeed, ChangeKind, Document, DocumentChange, DocumentStore, Filter, StoreError,
    TransactionContext, TransactionFn,
};

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Fields>>,
    subscribers: Vec<Subscriber>,
    fail_next_writes: u32,
}

struct Subscriber {
    collection: String,
    filter: Filter,
    tx: mpsc::UnboundedSender<DocumentChange>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a document under a known id, notifying feeds. Test
    /// seeding helper; the trait's `create` generates ids.
    pub fn insert(&self, collection: &str, id: &str, fields: Fields) {
        let mut inner = self.lock();
        inner.write(collection, id, fields, true);
    }

    /// Make the next `n` `update`/`create` calls fail with a transient
    /// error. Transactions are unaffected.
    pub fn fail_next_writes(&self, n: u32) {
        self.lock().fail_next_writes = n;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        // A poisoned lock means a test already panicked; propagate the state.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Inner {
    fn document(&self, collection: &str, id: &str) -> Option<&Fields> {
        self.collections.get(collection).and_then(|docs| docs.get(id))
    }

    /// Apply a write and notify matching subscribers. `replace` swaps the
    /// whole document; otherwise `fields` are merged over the existing data.
    fn write(&mut self, collection: &str, id: &str, fields: Fields, replace: bool) {
        let docs = self.collections.entry(collection.to_string()).or_default();
        let old = docs.get(id).cloned();
        let new = match (&old, replace) {
            (Some(existing), false) => {
                let mut merged = existing.clone();
                for (key, value) in fields {
                    merged.insert(key, value);
                }
                merged
            }
            _ => fields,
        };
        docs.insert(id.to_string(), new.clone());
        self.notify(collection, id, old.as_ref(), &new);
    }

    fn notify(&mut self, collection: &str, id: &str, old: Option<&Fields>, new: &Fields) {
        self.subscribers.retain(|sub| {
            if sub.collection != collection {
                return !sub.tx.is_closed();
            }
            let was = old.map(|data| sub.filter.matches(data)).unwrap_or(false);
            let now = sub.filter.matches(new);
            let kind = match (was, now) {
                (false, true) => ChangeKind::Added,
                (true, true) => ChangeKind::Modified,
                (true, false) => ChangeKind::Removed,
                (false, false) => return !sub.tx.is_closed(),
            };
            sub.tx
                .send(DocumentChange {
                    kind,
                    doc: Document::new(id, new.clone()),
                })
                .is_ok()
        });
    }

    fn take_write_failure(&mut self) -> Option<StoreError> {
        if self.fail_next_writes > 0 {
            self.fail_next_writes -= 1;
            Some(StoreError::Transient("injected write failure".into()))
        } else {
            None
        }
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn get(&self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .document(collection, id)
            .map(|data| Document::new(id, data.clone())))
    }

    async fn update(&self, collection: &str, id: &str, fields: Fields) -> Result<(), StoreError> {
        let mut inner = self.lock();
        if let Some(err) = inner.take_write_failure() {
            return Err(err);
        }
        if inner.document(collection, id).is_none() {
            return Err(StoreError::NotFound {
                collection: collection.to_string(),
                id: id.to_string(),
            });
        }
        inner.write(collection, id, fields, false);
        Ok(())
    }

    async fn create(&self, collection: &str, fields: Fields) -> Result<String, StoreError> {
        let mut inner = self.lock();
        if let Some(err) = inner.take_write_failure() {
            return Err(err);
        }
        let id = Uuid::new_v4().to_string();
        inner.write(collection, &id, fields, true);
        Ok(id)
    }

    async fn query(&self, collection: &str, filter: Filter) -> Result<Vec<Document>, StoreError> {
        let inner = self.lock();
        Ok(inner
            .collections
            .get(collection)
            .map(|docs| {
                docs.iter()
                    .filter(|(_, data)| filter.matches(data))
                    .map(|(id, data)| Document::new(id.clone(), data.clone()))
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn subscribe(&self, collection: &str, filter: Filter) -> Result<ChangeFeed, StoreError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if let Some(docs) = inner.collections.get(collection) {
            for (id, data) in docs {
                if filter.matches(data) {
                    let _ = tx.send(DocumentChange {
                        kind: ChangeKind::Added,
                        doc: Document::new(id.clone(), data.clone()),
                    });
                }
            }
        }
        inner.subscribers.push(Subscriber {
            collection: collection.to_string(),
            filter,
            tx,
        });
        Ok(rx)
    }

    async fn run_transaction(&self, tx: TransactionFn) -> Result<(), StoreError> {
        let mut inner = self.lock();
        let writes = {
            let mut ctx = MemoryTransaction {
                inner: &*inner,
                writes: Vec::new(),
            };
            tx(&mut ctx)?;
            ctx.writes
        };
        for write in writes {
            inner.write(&write.collection, &write.id, write.fields, write.replace);
        }
        Ok(())
    }
}

struct BufferedWrite {
    collection: String,
    id: String,
    fields: Fields,
    replace: bool,
}

struct MemoryTransaction<'a> {
    inner: &'a Inner,
    writes: Vec<BufferedWrite>,
}

impl TransactionContext for MemoryTransaction<'_> {
    fn get(&mut self, collection: &str, id: &str) -> Result<Option<Document>, StoreError> {
        Ok(self
            .inner
            .document(collection, id)
            .map(|data| Document::new(id, data.clone())))
    }

    fn update(&mut self, collection: &str, id: &str, fields: Fields) {
        self.writes.push(BufferedWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            replace: false,
        });
    }

    fn create(&mut self, collection: &str, id: &str, fields: Fields) {
        self.writes.push(BufferedWrite {
            collection: collection.to_string(),
            id: id.to_string(),
            fields,
            replace: true,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};

    fn fields(value: Value) -> Fields {
        value.as_object().expect("object").clone()
    }

    #[tokio::test]
    async fn update_merges_and_null_clears() {
        let store = MemoryStore::new();
        store.insert("riders", "d1", fields(json!({ "status": "available", "name": "Kim" })));

        store
            .update("riders", "d1", fields(json!({ "status": "idle", "name": null })))
            .await
            .expect("update");

        let doc = store.get("riders", "d1").await.expect("get").expect("doc");
        assert_eq!(doc.data["status"], "idle");
        assert_eq!(doc.data["name"], Value::Null);
    }

    #[tokio::test]
    async fn update_missing_document_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update("riders", "ghost", Fields::new())
            .await
            .expect_err("missing");
        assert!(matches!(err, StoreError::NotFound { .. }));
    }

    #[tokio::test]
    async fn subscribe_replays_matching_then_streams() {
        let store = MemoryStore::new();
        store.insert("requests", "r1", fields(json!({ "status": "pending" })));
        store.insert("requests", "r2", fields(json!({ "status": "completed" })));

        let mut feed = store
            .subscribe("requests", Filter::field_eq("status", "pending"))
            .await
            .expect("subscribe");

        let first = feed.recv().await.expect("initial");
        assert_eq!(first.kind, ChangeKind::Added);
        assert_eq!(first.doc.id, "r1");

        // r2 becomes pending: enters the result set.
        store
            .update("requests", "r2", fields(json!({ "status": "pending" })))
            .await
            .expect("update");
        let added = feed.recv().await.expect("added");
        assert_eq!(added.kind, ChangeKind::Added);
        assert_eq!(added.doc.id, "r2");

        // r1 leaves the result set.
        store
            .update("requests", "r1", fields(json!({ "status": "proposed" })))
            .await
            .expect("update");
        let removed = feed.recv().await.expect("removed");
        assert_eq!(removed.kind, ChangeKind::Removed);
        assert_eq!(removed.doc.id, "r1");
    }

    #[tokio::test]
    async fn transaction_is_atomic_and_abortable() {
        let store = MemoryStore::new();
        store.insert("riders", "d1", fields(json!({ "status": "available" })));

        let outcome = store
            .run_transaction(Box::new(|ctx| {
                let doc = ctx.get("riders", "d1")?.ok_or_else(|| StoreError::aborted("gone"))?;
                if doc.data["status"] != "available" {
                    return Err(StoreError::aborted("not available"));
                }
                ctx.update("riders", "d1", fields(json!({ "status": "reserved_for_proposal" })));
                ctx.create("driver_proposals", "p1", fields(json!({ "status": "pending_acceptance" })));
                Ok(())
            }))
            .await;
        assert!(outcome.is_ok());
        let driver = store.get("riders", "d1").await.unwrap().unwrap();
        assert_eq!(driver.data["status"], "reserved_for_proposal");
        assert!(store.get("driver_proposals", "p1").await.unwrap().is_some());

        // Second attempt aborts and leaves no trace.
        let err = store
            .run_transaction(Box::new(|ctx| {
                let doc = ctx.get("riders", "d1")?.ok_or_else(|| StoreError::aborted("gone"))?;
                if doc.data["status"] != "available" {
                    return Err(StoreError::aborted("not available"));
                }
                ctx.create("driver_proposals", "p2", Fields::new());
                Ok(())
            }))
            .await
            .expect_err("abort");
        assert!(matches!(err, StoreError::TransactionAborted(_)));
        assert!(store.get("driver_proposals", "p2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_failures_hit_then_clear() {
        let store = MemoryStore::new();
        store.insert("riders", "d1", fields(json!({ "status": "available" })));
        store.fail_next_writes(2);

        for _ in 0..2 {
            let err = store
                .update("riders", "d1", fields(json!({ "status": "idle" })))
                .await
                .expect_err("injected");
            assert!(err.is_transient());
        }
        store
            .update("riders", "d1", fields(json!({ "status": "idle" })))
            .await
            .expect("third write succeeds");
    }
}
