//! Library API client: typed reads and writes over the gateway.

use reqwest::Method;
use serde_json::{json, Value};
use tracing::debug;

use super::gateway::{ReadOptions, RequestGateway};
use super::keys::{BookQuery, CacheKey, Resource};
use crate::cache::CacheResult;
use crate::config::CacheTtls;
use crate::error::ApiError;
use crate::sync::MutationOp;

/// Library client with per-resource caching.
///
/// Every write invalidates through [`Resource::invalidations`], so live and
/// replayed writes share one coherence path.
#[derive(Clone)]
pub struct LibraryClient {
  gateway: RequestGateway,
  ttls: CacheTtls,
}

impl LibraryClient {
  pub fn new(gateway: RequestGateway, ttls: CacheTtls) -> Self {
    Self { gateway, ttls }
  }

  pub fn gateway(&self) -> &RequestGateway {
    &self.gateway
  }

  /// Read any cached resource.
  pub async fn read(&self, key: &CacheKey) -> Result<CacheResult<Value>, ApiError> {
    let options = ReadOptions::cached(key.key(), key.ttl(&self.ttls));
    self.gateway.get(&key.endpoint(), &options).await
  }

  pub async fn dashboard(&self) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Dashboard).await
  }

  pub async fn pipeline(&self) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Pipeline).await
  }

  pub async fn books(&self, query: &BookQuery) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Books(query.clone())).await
  }

  pub async fn book(&self, id: i64) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Book(id)).await
  }

  pub async fn paths(&self) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Paths).await
  }

  pub async fn path(&self, id: i64) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Path(id)).await
  }

  pub async fn stats(&self) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Stats).await
  }

  pub async fn settings(&self) -> Result<CacheResult<Value>, ApiError> {
    self.read(&CacheKey::Settings).await
  }

  /// Search Open Library. Never cached.
  pub async fn search_open_library(&self, query: &str) -> Result<Value, ApiError> {
    let encoded: String = url::form_urlencoded::byte_serialize(query.as_bytes()).collect();
    let endpoint = format!("/search/openlibrary?q={}&limit=10", encoded);
    self.uncached(&endpoint).await
  }

  pub async fn missing_covers(&self) -> Result<Value, ApiError> {
    self.uncached("/books/missing-covers").await
  }

  pub async fn cover_options(&self, book_id: i64) -> Result<Value, ApiError> {
    self
      .uncached(&format!("/books/{}/cover-options", book_id))
      .await
  }

  pub async fn create_book(&self, data: Value) -> Result<Value, ApiError> {
    self
      .write(Method::POST, "/books", Some(data), Resource::Book(None))
      .await
  }

  pub async fn update_book(&self, id: i64, updates: Value) -> Result<Value, ApiError> {
    self
      .write(
        Method::PATCH,
        &format!("/books/{}", id),
        Some(updates),
        Resource::Book(Some(id)),
      )
      .await
  }

  pub async fn delete_book(&self, id: i64) -> Result<Value, ApiError> {
    self
      .write(
        Method::DELETE,
        &format!("/books/{}", id),
        None,
        Resource::BookRemoved(id),
      )
      .await
  }

  pub async fn update_book_cover(&self, id: i64, cover_url: &str) -> Result<Value, ApiError> {
    self
      .write(
        Method::PATCH,
        &format!("/books/{}/cover", id),
        Some(json!({ "cover_url": cover_url })),
        Resource::Book(Some(id)),
      )
      .await
  }

  /// Ask the server to fill in metadata for every book.
  pub async fn enrich_books(&self) -> Result<Value, ApiError> {
    self
      .write(
        Method::POST,
        "/books/enrich-all",
        Some(json!({})),
        Resource::Book(None),
      )
      .await
  }

  pub async fn create_path(&self, data: Value) -> Result<Value, ApiError> {
    self
      .write(Method::POST, "/paths", Some(data), Resource::Path(None))
      .await
  }

  pub async fn update_path(&self, id: i64, updates: Value) -> Result<Value, ApiError> {
    self
      .write(
        Method::PATCH,
        &format!("/paths/{}", id),
        Some(updates),
        Resource::Path(Some(id)),
      )
      .await
  }

  pub async fn delete_path(&self, id: i64) -> Result<Value, ApiError> {
    self
      .write(
        Method::DELETE,
        &format!("/paths/{}", id),
        None,
        Resource::PathRemoved(id),
      )
      .await
  }

  pub async fn add_book_to_path(&self, path_id: i64, user_book_id: i64) -> Result<Value, ApiError> {
    self
      .write(
        Method::POST,
        &format!("/paths/{}/books", path_id),
        Some(json!({ "user_book_id": user_book_id })),
        Resource::Path(Some(path_id)),
      )
      .await
  }

  pub async fn remove_book_from_path(
    &self,
    path_id: i64,
    user_book_id: i64,
  ) -> Result<Value, ApiError> {
    self
      .write(
        Method::DELETE,
        &format!("/paths/{}/books/{}", path_id, user_book_id),
        None,
        Resource::Path(Some(path_id)),
      )
      .await
  }

  /// Set the reading order of a path; `books` is the server's ordering payload.
  pub async fn reorder_path_books(&self, path_id: i64, books: Value) -> Result<Value, ApiError> {
    self
      .write(
        Method::PATCH,
        &format!("/paths/{}/books/reorder", path_id),
        Some(json!({ "books": books })),
        Resource::Path(Some(path_id)),
      )
      .await
  }

  pub async fn update_settings(&self, data: Value) -> Result<Value, ApiError> {
    self
      .write(Method::PATCH, "/settings", Some(data), Resource::Settings)
      .await
  }

  /// End the session. The cache is dropped whatever the server says, so no
  /// data outlives the identity that fetched it.
  pub async fn logout(&self) -> Result<Value, ApiError> {
    let result = self.gateway.post("/auth/logout", json!({})).await;
    self.gateway.invalidate_all();
    self.gateway.status().set_authenticated(false);
    result
  }

  /// Perform a queued write.
  pub async fn execute(&self, op: &MutationOp) -> Result<Value, ApiError> {
    match op {
      MutationOp::BookCreate(data) => self.create_book(data.clone()).await,
      MutationOp::BookUpdate { id, updates } => self.update_book(*id, updates.clone()).await,
      MutationOp::BookDelete { id } => self.delete_book(*id).await,
      MutationOp::PathCreate(data) => self.create_path(data.clone()).await,
      MutationOp::PathUpdate { id, updates } => self.update_path(*id, updates.clone()).await,
      MutationOp::PathDelete { id } => self.delete_path(*id).await,
      MutationOp::PathAddBook {
        path_id,
        user_book_id,
      } => self.add_book_to_path(*path_id, *user_book_id).await,
      MutationOp::PathRemoveBook {
        path_id,
        user_book_id,
      } => self.remove_book_from_path(*path_id, *user_book_id).await,
    }
  }

  async fn uncached(&self, endpoint: &str) -> Result<Value, ApiError> {
    let result = self.gateway.get(endpoint, &ReadOptions::uncached()).await?;
    Ok(result.data)
  }

  /// Network write followed by invalidation of everything `touched` feeds.
  async fn write(
    &self,
    method: Method,
    endpoint: &str,
    body: Option<Value>,
    touched: Resource,
  ) -> Result<Value, ApiError> {
    let result = self.gateway.write(method, endpoint, body).await?;
    let invalidations = touched.invalidations();
    debug!(endpoint, count = invalidations.len(), "Invalidating after write");
    self.gateway.invalidate(&invalidations);
    Ok(result)
  }
}
