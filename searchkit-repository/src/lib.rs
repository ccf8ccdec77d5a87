//! Typed repositories and bulk indexing over OpenSearch.
//!
//! This crate provides:
//! - A [`Repository`] bound to one index with typed CRUD, search and
//!   optimistic-concurrency updates
//! - [`BulkSession`]s that batch writes by count and size and report every
//!   item's outcome to its callback
//! - Lazy projection of search hits into typed values, for single pages
//!   ([`SearchPage`]) and server-side cursors ([`Scroll`])
//! - A pluggable [`Serializer`] and [`Extensible`] documents carrying
//!   untyped extension fields
//! - An in-process [`MemoryStore`] with engine-like semantics for tests
//! - A blocking flavor of the same API behind the `blocking` feature
//!
//! # Example
//!
//! ```rust,no_run
//! use searchkit_repository::{
//!     Document, OpenSearchConfig, OpenSearchStore, Query, RefreshPolicy, Repository,
//!     RepositoryConfig, SearchRequest,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct Article {
//!     title: String,
//!     views: u64,
//! }
//!
//! impl Document for Article {
//!     fn index_name() -> &'static str {
//!         "articles"
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let store = OpenSearchStore::new(OpenSearchConfig::new("http://localhost:9200"))?;
//!     let config = RepositoryConfig::new(Article::index_name()).with_refresh(RefreshPolicy::Manual);
//!     let articles: Repository<Article, _> = Repository::new(store, config)?;
//!
//!     articles
//!         .index("a-1", &Article { title: "Hello OpenSearch".into(), views: 0 }, false)
//!         .await?;
//!
//!     // Safe concurrent increment.
//!     articles.update_with("a-1", |mut a| { a.views += 1; a }).await?;
//!
//!     articles.refresh().await?;
//!     let page = articles
//!         .search(SearchRequest::new(Query::matches("title", "hello")))
//!         .await?;
//!     for hit in page {
//!         println!("{}: {:?}", hit.id(), hit.value);
//!     }
//!
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

mod bulk;
mod client;
mod config;
mod document;
mod error;
mod memory;
mod query;
mod repository;
mod retry;
mod search;
mod serializer;
mod store;

#[cfg(feature = "blocking")]
pub mod blocking;

pub use bulk::{BulkItemOutcome, BulkOperation, BulkReport, BulkSession};
pub use client::OpenSearchStore;
pub use config::{
    BulkConfig, DEFAULT_ENV_PREFIX, OpenSearchConfig, RefreshPolicy, RepositoryConfig, TlsConfig,
};
pub use document::{Document, Version, VersionedDocument, WriteAck, WriteResult};
pub use error::{RepositoryError, Result};
pub use memory::{MemoryStore, PRIMARY_TERM};
pub use query::{BoolQuery, Query, RangeQuery};
pub use repository::Repository;
pub use retry::{BackoffStrategy, RetryPolicy};
pub use search::{PageIter, Projection, Scroll, SearchPage, SearchRequest, SortOrder, SourceFilter};
pub use serializer::{Extensible, JsonSerializer, Serializer};
pub use store::{
    BulkAction, BulkActionKind, BulkItemError, BulkItemResponse, DeleteRequest, Hit, IndexRequest,
    SearchResponse, Store, StoredDocument, TotalRelation, WriteMode,
};

/// Prelude for common imports.
pub mod prelude {
    pub use crate::{
        BulkSession, Document, Extensible, MemoryStore, OpenSearchConfig, OpenSearchStore,
        Projection, Query, RefreshPolicy, Repository, RepositoryConfig, RepositoryError, Result,
        SearchRequest, SortOrder, Store, Version, VersionedDocument,
    };
}
