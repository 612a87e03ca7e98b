//! In-memory remote collaborators with call counters and failure switches, for tests.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use reqwest::Url;
use serde_json::Value;

use super::{sort_by_order, Document, DocumentStore, ObjectStorage, RemoteError, RemoteResult};

fn offline() -> RemoteError {
    RemoteError::Status { status: 503, message: "offline".into() }
}

#[derive(Default)]
pub struct MemoryDocumentStore {
    collections: Mutex<HashMap<String, BTreeMap<String, Value>>>,
    next_id: AtomicUsize,
    pub offline: AtomicBool,
    pub writes: AtomicUsize,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn insert(&self, collection: &str, id: &str, fields: Value) {
        let mut cols = self.collections.lock().unwrap();
        cols.entry(collection.to_string()).or_default().insert(id.to_string(), fields);
    }

    pub fn fields(&self, collection: &str, id: &str) -> Option<Value> {
        let cols = self.collections.lock().unwrap();
        cols.get(collection).and_then(|c| c.get(id)).cloned()
    }

    pub fn count(&self, collection: &str) -> usize {
        let cols = self.collections.lock().unwrap();
        cols.get(collection).map(|c| c.len()).unwrap_or(0)
    }

    fn guard(&self) -> RemoteResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            Err(offline())
        } else {
            Ok(())
        }
    }

    fn docs(&self, collection: &str) -> Vec<Document> {
        let cols = self.collections.lock().unwrap();
        cols.get(collection)
            .map(|c| c.iter().map(|(id, f)| Document { id: id.clone(), fields: f.clone() }).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Document>> {
        self.guard()?;
        Ok(self.fields(collection, id).map(|fields| Document { id: id.to_string(), fields }))
    }

    async fn set(&self, collection: &str, id: &str, fields: Value) -> RemoteResult<()> {
        self.guard()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.insert(collection, id, fields);
        Ok(())
    }

    async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
        self.guard()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let mut cols = self.collections.lock().unwrap();
        if let Some(c) = cols.get_mut(collection) {
            c.remove(id);
        }
        Ok(())
    }

    async fn query_eq(&self, collection: &str, field: &str, value: &str) -> RemoteResult<Vec<Document>> {
        self.guard()?;
        Ok(self
            .docs(collection)
            .into_iter()
            .filter(|d| d.str_field(field) == Some(value))
            .collect())
    }

    async fn list(&self, collection: &str) -> RemoteResult<Vec<Document>> {
        self.guard()?;
        let mut docs = self.docs(collection);
        sort_by_order(&mut docs);
        Ok(docs)
    }

    async fn add(&self, collection: &str, fields: Value) -> RemoteResult<String> {
        self.guard()?;
        self.writes.fetch_add(1, Ordering::SeqCst);
        let id = format!("doc-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.insert(collection, &id, fields);
        Ok(id)
    }
}

pub struct MemoryObjectStorage {
    base: Url,
    objects: Mutex<HashMap<String, Vec<u8>>>,
    pub offline: AtomicBool,
    pub downloads: AtomicUsize,
    pub uploads: AtomicUsize,
}

impl MemoryObjectStorage {
    pub fn new() -> Self {
        Self {
            base: Url::parse("https://bucket.test/").unwrap(),
            objects: Mutex::new(HashMap::new()),
            offline: AtomicBool::new(false),
            downloads: AtomicUsize::new(0),
            uploads: AtomicUsize::new(0),
        }
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Seed an object and return its URL.
    pub fn put(&self, key: &str, bytes: &[u8]) -> Url {
        let url = self.base.join(key).unwrap();
        self.objects.lock().unwrap().insert(url.to_string(), bytes.to_vec());
        url
    }

    pub fn download_count(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ObjectStorage for MemoryObjectStorage {
    async fn upload(&self, bytes: &[u8], key: &str) -> RemoteResult<Url> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(self.put(key, bytes))
    }

    async fn download(&self, url: &Url) -> RemoteResult<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.offline.load(Ordering::SeqCst) {
            return Err(offline());
        }
        self.objects
            .lock()
            .unwrap()
            .get(url.as_str())
            .cloned()
            .ok_or(RemoteError::Status { status: 404, message: "no such object".into() })
    }
}
