// src/store/mongo.rs

use async_trait::async_trait;
use futures_util::TryStreamExt;
use log::info;
use mongodb::{
    bson::{doc, Document},
    error::{ErrorKind, WriteFailure},
    options::{ClientOptions, IndexOptions, ReturnDocument},
    Client, Database, IndexModel,
};

use super::{
    DocumentStore, StoreError, StoreResult, CHATS, CHAT_MESSAGES, ORDERS, ORDER_COMMUNICATIONS,
    QUOTES, SERVICES,
};

const COUNTERS: &str = "counters";
const DUPLICATE_KEY_CODE: i32 = 11000;

pub struct MongoStore {
    db: Database,
}

impl MongoStore {
    pub async fn init(uri: &str, db_name: &str) -> StoreResult<Self> {
        let client_options = ClientOptions::parse(uri).await?;
        let client = Client::with_options(client_options)?;
        let db = client.database(db_name);
        info!("Connected to MongoDB database {}", db_name);
        Ok(MongoStore { db })
    }

    /// Creates the unique and lookup indexes the resource services query by.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        let unique = IndexOptions::builder().unique(true).build();
        let indexes: [(&str, Document, Option<IndexOptions>); 9] = [
            (ORDERS, doc! { "orderNumber": 1 }, Some(unique.clone())),
            (ORDERS, doc! { "client": 1 }, None),
            (QUOTES, doc! { "quoteNumber": 1 }, Some(unique)),
            (QUOTES, doc! { "client": 1 }, None),
            (QUOTES, doc! { "status": 1 }, None),
            (SERVICES, doc! { "category": 1 }, None),
            (CHATS, doc! { "participants.user": 1 }, None),
            (CHAT_MESSAGES, doc! { "chat": 1 }, None),
            (ORDER_COMMUNICATIONS, doc! { "order": 1 }, None),
        ];
        for (collection, keys, options) in indexes {
            let model = match options {
                Some(options) => IndexModel::builder().keys(keys).options(options).build(),
                None => IndexModel::builder().keys(keys).build(),
            };
            self.db
                .collection::<Document>(collection)
                .create_index(model)
                .await?;
        }
        info!("MongoDB indexes ensured");
        Ok(())
    }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    matches!(
        err.kind.as_ref(),
        ErrorKind::Write(WriteFailure::WriteError(e)) if e.code == DUPLICATE_KEY_CODE
    )
}

#[async_trait]
impl DocumentStore for MongoStore {
    async fn insert(&self, collection: &str, document: Document) -> StoreResult<()> {
        let key = document
            .get("_id")
            .map(|id| id.to_string())
            .unwrap_or_default();
        match self
            .db
            .collection::<Document>(collection)
            .insert_one(document)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if is_duplicate_key(&e) => Err(StoreError::DuplicateKey {
                collection: collection.to_string(),
                key,
            }),
            Err(e) => Err(e.into()),
        }
    }

    async fn find_one(&self, collection: &str, filter: Document) -> StoreResult<Option<Document>> {
        Ok(self
            .db
            .collection::<Document>(collection)
            .find_one(filter)
            .await?)
    }

    async fn find(&self, collection: &str, filter: Document) -> StoreResult<Vec<Document>> {
        let cursor = self
            .db
            .collection::<Document>(collection)
            .find(filter)
            .await?;
        Ok(cursor.try_collect().await?)
    }

    async fn replace_one(
        &self,
        collection: &str,
        filter: Document,
        replacement: Document,
    ) -> StoreResult<bool> {
        let result = self
            .db
            .collection::<Document>(collection)
            .replace_one(filter, replacement)
            .await?;
        Ok(result.matched_count > 0)
    }

    async fn count(&self, collection: &str, filter: Document) -> StoreResult<u64> {
        Ok(self
            .db
            .collection::<Document>(collection)
            .count_documents(filter)
            .await?)
    }

    async fn next_sequence(&self, name: &str) -> StoreResult<u64> {
        let counter = self
            .db
            .collection::<Document>(COUNTERS)
            .find_one_and_update(doc! { "_id": name }, doc! { "$inc": { "seq": 1_i64 } })
            .upsert(true)
            .return_document(ReturnDocument::After)
            .await?
            .ok_or_else(|| StoreError::Backend(format!("counter {} was not created", name)))?;
        let value = counter
            .get_i64("seq")
            .map_err(|e| StoreError::Backend(format!("counter {} is malformed: {}", name, e)))?;
        Ok(value as u64)
    }
}
