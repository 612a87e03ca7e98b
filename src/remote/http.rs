//! HTTP adapters for the remote collaborators.
//!
//! Document store REST shape (JSON bodies):
//!   GET    {base}/documents/{collection}/{id}            -> Document | 404
//!   PUT    {base}/documents/{collection}/{id}            <- fields
//!   DELETE {base}/documents/{collection}/{id}
//!   GET    {base}/documents/{collection}?field=&value=   -> [Document]
//!   GET    {base}/documents/{collection}                 -> [Document]
//!   POST   {base}/documents/{collection}                 <- fields -> { id }
//!
//! Object storage: PUT {base}/{key} with the raw bytes, GET on the returned URL.
//!
//! Calls are instrumented with collection/key and sizes, never payload contents or the API key.
//! Every request is bounded by the client timeout.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::{RequestBuilder, Response, StatusCode, Url};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, instrument, warn};

use super::{sort_by_order, DocumentStore, Document, ObjectStorage, RemoteError, RemoteResult};
use crate::config::RemoteConfig;
use crate::util::trunc_for_log;

const UA: &str = "story-vault/0.1";

fn build_client(timeout_secs: u64) -> RemoteResult<reqwest::Client> {
  Ok(reqwest::Client::builder()
    .timeout(Duration::from_secs(timeout_secs))
    .build()?)
}

fn parse_base(raw: &str) -> RemoteResult<Url> {
  let trimmed = raw.trim().trim_end_matches('/');
  Url::parse(&format!("{trimmed}/")).map_err(|e| RemoteError::Malformed(format!("base url '{raw}': {e}")))
}

/// Turn a non-2xx response into `RemoteError::Status`, keeping a short message.
async fn check(res: Response) -> RemoteResult<Response> {
  let status = res.status();
  if status.is_success() {
    return Ok(res);
  }
  let body = res.text().await.unwrap_or_default();
  let message = extract_error(&body).unwrap_or_else(|| trunc_for_log(&body, 200));
  Err(RemoteError::Status { status: status.as_u16(), message })
}

/// Try to pull a clean message out of `{"error": {"message": ..}}` or `{"error": ".."}`.
fn extract_error(body: &str) -> Option<String> {
  #[derive(Deserialize)]
  #[serde(untagged)]
  enum EBody { Nested { error: EObj }, Flat { error: String } }
  #[derive(Deserialize)]
  struct EObj { message: String }
  match serde_json::from_str::<EBody>(body).ok()? {
    EBody::Nested { error } => Some(error.message),
    EBody::Flat { error } => Some(error),
  }
}

#[derive(Clone)]
pub struct HttpDocumentStore {
  client: reqwest::Client,
  base_url: Url,
  api_key: Option<String>,
}

impl HttpDocumentStore {
  pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> RemoteResult<Self> {
    Ok(Self { client: build_client(timeout_secs)?, base_url: parse_base(base_url)?, api_key })
  }

  /// Construct from config if a document store URL is set; otherwise None.
  pub fn from_config(cfg: &RemoteConfig) -> RemoteResult<Option<Self>> {
    match cfg.document_store_url.as_deref() {
      Some(url) => Self::new(url, cfg.api_key.clone(), cfg.timeout_secs).map(Some),
      None => Ok(None),
    }
  }

  pub fn base_url(&self) -> &Url { &self.base_url }

  fn url(&self, collection: &str, id: Option<&str>) -> RemoteResult<Url> {
    let path = match id {
      Some(id) => format!("documents/{collection}/{id}"),
      None => format!("documents/{collection}"),
    };
    self.base_url.join(&path).map_err(|e| RemoteError::Malformed(e.to_string()))
  }

  fn authed(&self, req: RequestBuilder) -> RequestBuilder {
    let req = req.header(USER_AGENT, UA);
    match &self.api_key {
      Some(key) => req.header(AUTHORIZATION, format!("Bearer {key}")),
      None => req,
    }
  }
}

#[async_trait]
impl DocumentStore for HttpDocumentStore {
  #[instrument(level = "debug", target = "remote", skip(self))]
  async fn get(&self, collection: &str, id: &str) -> RemoteResult<Option<Document>> {
    let res = self.authed(self.client.get(self.url(collection, Some(id))?)).send().await?;
    if res.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    let doc: Document = check(res).await?.json().await?;
    Ok(Some(doc))
  }

  #[instrument(level = "debug", target = "remote", skip(self, fields))]
  async fn set(&self, collection: &str, id: &str, fields: Value) -> RemoteResult<()> {
    let req = self.client.put(self.url(collection, Some(id))?)
      .header(CONTENT_TYPE, "application/json")
      .json(&fields);
    check(self.authed(req).send().await?).await?;
    Ok(())
  }

  #[instrument(level = "debug", target = "remote", skip(self))]
  async fn delete(&self, collection: &str, id: &str) -> RemoteResult<()> {
    let res = self.authed(self.client.delete(self.url(collection, Some(id))?)).send().await?;
    if res.status() == StatusCode::NOT_FOUND {
      debug!(target: "remote", %collection, %id, "Delete of absent document");
      return Ok(());
    }
    check(res).await?;
    Ok(())
  }

  #[instrument(level = "debug", target = "remote", skip(self))]
  async fn query_eq(&self, collection: &str, field: &str, value: &str) -> RemoteResult<Vec<Document>> {
    let req = self.client.get(self.url(collection, None)?)
      .query(&[("field", field), ("value", value)]);
    let docs: Vec<Document> = check(self.authed(req).send().await?).await?.json().await?;
    debug!(target: "remote", %collection, count = docs.len(), "Query returned");
    Ok(docs)
  }

  #[instrument(level = "debug", target = "remote", skip(self))]
  async fn list(&self, collection: &str) -> RemoteResult<Vec<Document>> {
    let res = self.authed(self.client.get(self.url(collection, None)?)).send().await?;
    let mut docs: Vec<Document> = check(res).await?.json().await?;
    sort_by_order(&mut docs);
    Ok(docs)
  }

  #[instrument(level = "debug", target = "remote", skip(self, fields))]
  async fn add(&self, collection: &str, fields: Value) -> RemoteResult<String> {
    #[derive(Deserialize)]
    struct Added { id: String }
    let req = self.client.post(self.url(collection, None)?)
      .header(CONTENT_TYPE, "application/json")
      .json(&fields);
    let added: Added = check(self.authed(req).send().await?).await?.json().await?;
    Ok(added.id)
  }
}

#[derive(Clone)]
pub struct HttpObjectStorage {
  client: reqwest::Client,
  base_url: Url,
  api_key: Option<String>,
}

impl HttpObjectStorage {
  pub fn new(base_url: &str, api_key: Option<String>, timeout_secs: u64) -> RemoteResult<Self> {
    Ok(Self { client: build_client(timeout_secs)?, base_url: parse_base(base_url)?, api_key })
  }

  pub fn from_config(cfg: &RemoteConfig) -> RemoteResult<Option<Self>> {
    match cfg.object_storage_url.as_deref() {
      Some(url) => Self::new(url, cfg.api_key.clone(), cfg.timeout_secs).map(Some),
      None => Ok(None),
    }
  }

  pub fn base_url(&self) -> &Url { &self.base_url }
}

#[async_trait]
impl ObjectStorage for HttpObjectStorage {
  #[instrument(level = "info", target = "remote", skip(self, bytes), fields(bytes = bytes.len()))]
  async fn upload(&self, bytes: &[u8], key: &str) -> RemoteResult<Url> {
    #[derive(Deserialize)]
    struct Uploaded { url: String }

    let target = self.base_url.join(key.trim_start_matches('/'))
      .map_err(|e| RemoteError::Malformed(e.to_string()))?;
    let mut req = self.client.put(target.clone())
      .header(USER_AGENT, UA)
      .header(CONTENT_TYPE, "image/png")
      .body(bytes.to_vec());
    if let Some(k) = &self.api_key {
      req = req.header(AUTHORIZATION, format!("Bearer {k}"));
    }
    let res = check(req.send().await?).await?;

    // Stores that answer with `{"url": ..}` win; otherwise the object lives at the PUT target.
    let body = res.text().await.unwrap_or_default();
    match serde_json::from_str::<Uploaded>(&body) {
      Ok(u) => Url::parse(&u.url).map_err(|e| RemoteError::Malformed(format!("upload url: {e}"))),
      Err(_) => Ok(target),
    }
  }

  #[instrument(level = "info", target = "remote", skip(self), fields(url = %url))]
  async fn download(&self, url: &Url) -> RemoteResult<Vec<u8>> {
    let res = self.client.get(url.clone()).header(USER_AGENT, UA).send().await?;
    let bytes = check(res).await?.bytes().await?;
    if bytes.is_empty() {
      warn!(target: "remote", %url, "Downloaded empty object");
      return Err(RemoteError::Malformed("empty object".into()));
    }
    Ok(bytes.to_vec())
  }
}
