//! Remote collaborators: the authoritative document store and object storage.
//!
//! Both are consumed through traits so the repository and resolver can run against the HTTP
//! adapters in production and in-memory fakes in tests. Only the operations the repository
//! actually needs are modelled.

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub mod http;
#[cfg(test)]
pub mod memory;

pub use http::{HttpDocumentStore, HttpObjectStorage};

/// Top-level collection holding one document per story.
pub const STORIES_COLLECTION: &str = "stories";
/// Owner field on story documents.
pub const OWNER_FIELD: &str = "teacherId";
/// Ordering field on sub-collection documents.
pub const ORDER_FIELD: &str = "orderIndex";

#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("HTTP {status}: {message}")]
    Status { status: u16, message: String },

    #[error("malformed remote payload: {0}")]
    Malformed(String),
}

pub type RemoteResult<T> = Result<T, RemoteError>;

/// A document as returned by the store: its id plus a JSON object of fields.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    #[serde(default)]
    pub fields: Value,
}

impl Document {
    pub fn str_field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).and_then(Value::as_str)
    }

    pub fn order_index(&self) -> u64 {
        self.fields.get(ORDER_FIELD).and_then(Value::as_u64).unwrap_or(u64::MAX)
    }
}

/// Sub-collections nested under a story document.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubCollection {
    Dialogues,
    Questions,
}

impl SubCollection {
    pub const ALL: [SubCollection; 2] = [SubCollection::Dialogues, SubCollection::Questions];

    /// Collection path for this sub-collection of `story_id`.
    pub fn path(self, story_id: &str) -> String {
        let name = match self {
            SubCollection::Dialogues => "dialogues",
            SubCollection::Questions => "questions",
        };
        format!("{STORIES_COLLECTION}/{story_id}/{name}")
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Document>>;

    async fn set(&self, collection: &str, id: &str, fields: Value) -> RemoteResult<()>;

    /// Deleting an absent document succeeds.
    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()>;

    /// All documents whose `field` equals `value`.
    async fn query_eq(&self, collection: &str, field: &str, value: &str) -> RemoteResult<Vec<Document>>;

    /// All documents of a collection, ordered by `orderIndex`.
    async fn list(&self, collection: &str) -> RemoteResult<Vec<Document>>;

    /// Insert with a store-generated id, which is returned.
    async fn add(&self, collection: &str, fields: Value) -> RemoteResult<String>;
}

#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Upload bytes under `key`, returning the public URL.
    async fn upload(&self, bytes: &[u8], key: &str) -> RemoteResult<Url>;

    async fn download(&self, url: &Url) -> RemoteResult<Vec<u8>>;
}

/// Sort sub-collection documents by `orderIndex` (missing indices last, stable otherwise).
pub fn sort_by_order(docs: &mut [Document]) {
    docs.sort_by_key(Document::order_index);
}
