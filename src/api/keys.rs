//! Cache keys for every cached read and the rule table from a written
//! resource to the keys it makes stale.

use sha2::{Digest, Sha256};
use std::time::Duration;

use crate::config::CacheTtls;

/// Prefix shared by every book listing key.
pub const BOOKS_PREFIX: &str = "books:";
/// Prefix shared by every single-path key.
pub const PATH_PREFIX: &str = "path:";

/// Listing parameters for `GET /books`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookQuery {
  pub page: u32,
  pub per_page: u32,
  pub sort: String,
  pub order: String,
  pub status: Option<String>,
  pub search: Option<String>,
}

impl Default for BookQuery {
  fn default() -> Self {
    Self {
      page: 1,
      per_page: 50,
      sort: "date_added".to_string(),
      order: "desc".to_string(),
      status: None,
      search: None,
    }
  }
}

impl BookQuery {
  /// URL-encoded query string, parameters in a fixed order.
  pub fn query_string(&self) -> String {
    let mut serializer = url::form_urlencoded::Serializer::new(String::new());
    serializer
      .append_pair("page", &self.page.to_string())
      .append_pair("per_page", &self.per_page.to_string())
      .append_pair("sort", &self.sort)
      .append_pair("order", &self.order);
    if let Some(ref status) = self.status {
      serializer.append_pair("status", status);
    }
    if let Some(ref search) = self.search {
      serializer.append_pair("search", search);
    }
    serializer.finish()
  }
}

/// A cached read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheKey {
  Dashboard,
  Pipeline,
  Books(BookQuery),
  Book(i64),
  Paths,
  Path(i64),
  Stats,
  Settings,
}

impl CacheKey {
  /// Key under which the result is stored.
  pub fn key(&self) -> String {
    match self {
      CacheKey::Dashboard => "dashboard".to_string(),
      CacheKey::Pipeline => "pipeline".to_string(),
      CacheKey::Books(query) => {
        let digest = Sha256::digest(query.query_string().as_bytes());
        format!("{}{}", BOOKS_PREFIX, hex::encode(digest))
      }
      CacheKey::Book(id) => format!("book:{}", id),
      CacheKey::Paths => "paths".to_string(),
      CacheKey::Path(id) => format!("{}{}", PATH_PREFIX, id),
      CacheKey::Stats => "stats".to_string(),
      CacheKey::Settings => "settings".to_string(),
    }
  }

  pub fn endpoint(&self) -> String {
    match self {
      CacheKey::Dashboard => "/dashboard".to_string(),
      CacheKey::Pipeline => "/pipeline".to_string(),
      CacheKey::Books(query) => format!("/books?{}", query.query_string()),
      CacheKey::Book(id) => format!("/books/{}", id),
      CacheKey::Paths => "/paths".to_string(),
      CacheKey::Path(id) => format!("/paths/{}", id),
      CacheKey::Stats => "/stats".to_string(),
      CacheKey::Settings => "/settings".to_string(),
    }
  }

  pub fn ttl(&self, ttls: &CacheTtls) -> Duration {
    match self {
      CacheKey::Dashboard => ttls.dashboard,
      CacheKey::Pipeline => ttls.pipeline,
      CacheKey::Books(_) => ttls.books,
      CacheKey::Book(_) => ttls.book,
      CacheKey::Paths | CacheKey::Path(_) => ttls.paths,
      CacheKey::Stats => ttls.stats,
      CacheKey::Settings => ttls.settings,
    }
  }
}

/// One cache removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invalidation {
  Key(String),
  Prefix(String),
}

impl Invalidation {
  fn key(key: impl Into<String>) -> Self {
    Invalidation::Key(key.into())
  }

  fn prefix(prefix: impl Into<String>) -> Self {
    Invalidation::Prefix(prefix.into())
  }
}

/// A resource touched by a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
  /// A book was created or changed (`None` for bulk or new books)
  Book(Option<i64>),
  /// A book was deleted; it also leaves every path it belonged to
  BookRemoved(i64),
  /// A path or its membership changed (`None` for a new path)
  Path(Option<i64>),
  PathRemoved(i64),
  Settings,
}

impl Resource {
  /// Every cached key and prefix derived from this resource.
  pub fn invalidations(&self) -> Vec<Invalidation> {
    match *self {
      Resource::Book(id) => {
        let mut out = book_lists();
        if let Some(id) = id {
          out.push(Invalidation::key(CacheKey::Book(id).key()));
        }
        out
      }
      Resource::BookRemoved(id) => {
        let mut out = book_lists();
        out.push(Invalidation::key(CacheKey::Book(id).key()));
        out.push(Invalidation::key(CacheKey::Paths.key()));
        out.push(Invalidation::prefix(PATH_PREFIX));
        out
      }
      Resource::Path(id) => {
        let mut out = vec![Invalidation::key(CacheKey::Paths.key())];
        if let Some(id) = id {
          out.push(Invalidation::key(CacheKey::Path(id).key()));
        }
        out
      }
      Resource::PathRemoved(id) => vec![
        Invalidation::key(CacheKey::Paths.key()),
        Invalidation::key(CacheKey::Path(id).key()),
        Invalidation::key(CacheKey::Dashboard.key()),
      ],
      Resource::Settings => vec![
        Invalidation::key(CacheKey::Settings.key()),
        Invalidation::key(CacheKey::Dashboard.key()),
        Invalidation::key(CacheKey::Pipeline.key()),
      ],
    }
  }
}

/// Listings and aggregates that summarize the book collection.
fn book_lists() -> Vec<Invalidation> {
  vec![
    Invalidation::prefix(BOOKS_PREFIX),
    Invalidation::key(CacheKey::Dashboard.key()),
    Invalidation::key(CacheKey::Pipeline.key()),
    Invalidation::key(CacheKey::Stats.key()),
  ]
}
