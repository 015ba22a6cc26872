// src/store/mod.rs

mod memory;
mod mongo;

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use mongodb::bson::{self, doc, Document};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

pub use memory::MemoryStore;
pub use mongo::MongoStore;

pub const SERVICES: &str = "services";
pub const QUOTES: &str = "quotes";
pub const ORDERS: &str = "orders";
pub const ORDER_COMMUNICATIONS: &str = "order_communications";
pub const CHATS: &str = "chats";
pub const CHAT_MESSAGES: &str = "chat_messages";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Backend(String),

    #[error("document encoding error: {0}")]
    Encode(#[from] bson::ser::Error),

    #[error("document decoding error: {0}")]
    Decode(#[from] bson::de::Error),

    #[error("duplicate key in {collection}: {key}")]
    DuplicateKey { collection: String, key: String },
}

impl From<mongodb::error::Error> for StoreError {
    fn from(err: mongodb::error::Error) -> Self {
        StoreError::Backend(err.to_string())
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Schema-less persistence for every collection the marketplace owns.
///
/// Filters are documents of equality conditions. A dotted key such as
/// `participants.user` matches when any element reached through that path
/// equals the value, following MongoDB's query semantics. Single-document
/// writes are atomic; nothing spans documents except `next_sequence`.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()>;

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>>;

    async fn find(&self, collection: &str, filter: Document) -> StoreResult<Vec<Document>>;

    /// Replaces the first document matching `filter`. Returns false when
    /// nothing matched.
    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<bool>;

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64>;

    /// Atomically increments the named counter and returns the new value.
    /// The first call for a name returns 1.
    async fn next_sequence(&self, name: &str) -> StoreResult<u64>;
}

/// Typed view over one collection of a [`DocumentStore`].
pub struct Collection<T> {
    store: Arc<dyn DocumentStore>,
    name: &'static str,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for Collection<T> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            name: self.name,
            _marker: PhantomData,
        }
    }
}

impl<T> Collection<T>
where
    T: Serialize + DeserializeOwned,
{
    pub fn new(store: Arc<dyn DocumentStore>, name: &'static str) -> Self {
        Self {
            store,
            name,
            _marker: PhantomData,
        }
    }

    pub async fn insert(&self, value: &T) -> StoreResult<()> {
        let document = bson::to_document(value)?;
        self.store.insert(self.name, document).await
    }

    pub async fn find_by_id(&self, id: &str) -> StoreResult<Option<T>> {
        self.find_one(doc! { "_id": id }).await
    }

    pub async fn find_one(&self, filter: Document) -> StoreResult<Option<T>> {
        match self.store.find_one(self.name, filter).await? {
            Some(document) => Ok(Some(bson::from_document(document)?)),
            None => Ok(None),
        }
    }

    pub async fn find(&self, filter: Document) -> StoreResult<Vec<T>> {
        self.store
            .find(self.name, filter)
            .await?
            .into_iter()
            .map(|document| bson::from_document(document).map_err(StoreError::from))
            .collect()
    }

    /// Writes `value` over the stored document with the same `_id`.
    pub async fn replace(&self, id: &str, value: &T) -> StoreResult<bool> {
        self.replace_where(doc! { "_id": id }, value).await
    }

    /// Writes `value` over the first document still matching `filter`.
    /// Returns false when the stored document no longer matches.
    pub async fn replace_where(&self, filter: Document, value: &T) -> StoreResult<bool> {
        let document = bson::to_document(value)?;
        self.store.replace_one(self.name, filter, document).await
    }
}

/// Evaluates an equality filter against a document.
pub(crate) fn matches_filter(document: &Document, filter: &Document) -> bool {
    filter.iter().all(|(path, expected)| {
        let mut found = Vec::new();
        collect_from_document(document, path, &mut found);
        found.iter().any(|value| match value {
            bson::Bson::Array(items) => {
                items.iter().any(|item| item == expected) || *value == *expected
            }
            other => other == expected,
        })
    })
}

fn collect_from_document(document: &Document, path: &str, out: &mut Vec<bson::Bson>) {
    let (head, rest) = match path.split_once('.') {
        Some((head, rest)) => (head, Some(rest)),
        None => (path, None),
    };
    if let Some(child) = document.get(head) {
        match rest {
            Some(rest) => collect_path(child, rest, out),
            None => out.push(child.clone()),
        }
    }
}

fn collect_path(value: &bson::Bson, path: &str, out: &mut Vec<bson::Bson>) {
    match value {
        bson::Bson::Document(document) => collect_from_document(document, path, out),
        bson::Bson::Array(items) => {
            for item in items {
                collect_path(item, path, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dotted_paths_reach_into_arrays_of_documents() {
        let chat = doc! {
            "_id": "c1",
            "participants": [
                { "user": "alice", "role": "client" },
                { "user": "bob", "role": "admin" },
            ],
        };
        assert!(matches_filter(&chat, &doc! { "participants.user": "bob" }));
        assert!(!matches_filter(&chat, &doc! { "participants.user": "carol" }));
    }

    #[test]
    fn scalar_arrays_match_on_membership() {
        let document = doc! { "tags": ["a", "b"], "status": "pending" };
        assert!(matches_filter(&document, &doc! { "tags": "b", "status": "pending" }));
        assert!(!matches_filter(&document, &doc! { "tags": "b", "status": "accepted" }));
        assert!(matches_filter(&document, &doc! {}));
    }
}
