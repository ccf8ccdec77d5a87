//! Blocking flavor of the repository API.
//!
//! The types here wrap their async counterparts and drive them on a
//! current-thread Tokio runtime owned by the repository, so behavior is
//! identical in both flavors. They must not be used from inside an async
//! runtime: `block_on` panics there.
//!
//! Two things differ in shape: [`BulkSession`] sends its remaining
//! operations when dropped, and [`Scroll`] is an [`Iterator`].
//!
//! ```rust
//! use searchkit_repository::blocking::Repository;
//! use searchkit_repository::{MemoryStore, RefreshPolicy, RepositoryConfig, SearchRequest};
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Serialize, Deserialize)]
//! struct City {
//!     name: String,
//! }
//!
//! let config = RepositoryConfig::new("cities").with_refresh(RefreshPolicy::Manual);
//! let repo: Repository<City, _> = Repository::new(MemoryStore::new(), config).unwrap();
//!
//! {
//!     let mut bulk = repo.bulk();
//!     bulk.index("osl", &City { name: "Oslo".into() }).unwrap();
//!     bulk.index("ber", &City { name: "Berlin".into() }).unwrap();
//! } // flushed here
//!
//! repo.refresh().unwrap();
//! let names: Vec<String> = repo
//!     .scroll(SearchRequest::match_all().size(1))
//!     .unwrap()
//!     .filter_map(|item| item.ok()?.value)
//!     .map(|city| city.name)
//!     .collect();
//! assert_eq!(names.len(), 2);
//! ```

use crate::bulk::{self, BulkItemOutcome, BulkOperation, BulkReport};
use crate::config::RepositoryConfig;
use crate::document::{Version, VersionedDocument, WriteAck};
use crate::error::{RepositoryError, Result};
use crate::query::Query;
use crate::search::{self, Projection, SearchPage, SearchRequest};
use crate::serializer::{JsonSerializer, Serializer};
use crate::store::{Store, TotalRelation};
use searchkit_log::warn;
use serde::Serialize;
use std::sync::Arc;
use tokio::runtime::Runtime;

fn build_runtime() -> Result<Arc<Runtime>> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map(Arc::new)
        .map_err(|e| RepositoryError::Config(format!("failed to start runtime: {}", e)))
}

/// Blocking [`Repository`](crate::Repository).
pub struct Repository<T, S: Store, Z = JsonSerializer> {
    inner: crate::Repository<T, S, Z>,
    runtime: Arc<Runtime>,
}

impl<T, S> Repository<T, S, JsonSerializer>
where
    S: Store,
    JsonSerializer: Serializer<T>,
{
    /// Create a repository with the default JSON serializer.
    pub fn new(store: S, config: RepositoryConfig) -> Result<Self> {
        Self::from_async(crate::Repository::new(store, config)?)
    }
}

impl<T, S, Z> Repository<T, S, Z>
where
    S: Store,
    Z: Serializer<T>,
{
    /// Wrap an async repository.
    pub fn from_async(inner: crate::Repository<T, S, Z>) -> Result<Self> {
        Ok(Self {
            inner,
            runtime: build_runtime()?,
        })
    }

    /// The async repository this one drives.
    pub fn as_async(&self) -> &crate::Repository<T, S, Z> {
        &self.inner
    }

    /// Index this repository reads and writes.
    pub fn index_name(&self) -> &str {
        self.inner.index_name()
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        self.inner.store()
    }

    /// See [`Repository::get`](crate::Repository::get).
    pub fn get(&self, id: &str) -> Result<VersionedDocument<T>> {
        self.runtime.block_on(self.inner.get(id))
    }

    /// See [`Repository::find`](crate::Repository::find).
    pub fn find(&self, id: &str) -> Result<Option<VersionedDocument<T>>> {
        self.runtime.block_on(self.inner.find(id))
    }

    /// See [`Repository::exists`](crate::Repository::exists).
    pub fn exists(&self, id: &str) -> Result<bool> {
        self.runtime.block_on(self.inner.exists(id))
    }

    /// See [`Repository::index`](crate::Repository::index).
    pub fn index(&self, id: &str, value: &T, create: bool) -> Result<WriteAck> {
        self.runtime.block_on(self.inner.index(id, value, create))
    }

    /// See [`Repository::index_versioned`](crate::Repository::index_versioned).
    pub fn index_versioned(&self, id: &str, value: &T, version: Version) -> Result<WriteAck> {
        self.runtime
            .block_on(self.inner.index_versioned(id, value, version))
    }

    /// See [`Repository::update`](crate::Repository::update).
    pub fn update<F>(&self, id: &str, mutator: F, max_retries: u32) -> Result<VersionedDocument<T>>
    where
        F: FnMut(T) -> T,
    {
        self.runtime
            .block_on(self.inner.update(id, mutator, max_retries))
    }

    /// See [`Repository::update_with`](crate::Repository::update_with).
    pub fn update_with<F>(&self, id: &str, mutator: F) -> Result<VersionedDocument<T>>
    where
        F: FnMut(T) -> T,
    {
        self.runtime.block_on(self.inner.update_with(id, mutator))
    }

    /// See [`Repository::delete`](crate::Repository::delete).
    pub fn delete(&self, id: &str) -> Result<WriteAck> {
        self.runtime.block_on(self.inner.delete(id))
    }

    /// See [`Repository::delete_versioned`](crate::Repository::delete_versioned).
    pub fn delete_versioned(&self, id: &str, version: Version) -> Result<WriteAck> {
        self.runtime
            .block_on(self.inner.delete_versioned(id, version))
    }

    /// See [`Repository::search`](crate::Repository::search).
    pub fn search(&self, request: SearchRequest) -> Result<SearchPage<T, Z>> {
        self.runtime.block_on(self.inner.search(request))
    }

    /// See [`Repository::scroll`](crate::Repository::scroll).
    pub fn scroll(&self, request: SearchRequest) -> Result<Scroll<T, S, Z>> {
        let inner = self.runtime.block_on(self.inner.scroll(request))?;
        Ok(Scroll {
            inner,
            runtime: Arc::clone(&self.runtime),
            done: false,
        })
    }

    /// See [`Repository::count`](crate::Repository::count).
    pub fn count(&self, query: impl Into<Query>) -> Result<u64> {
        self.runtime.block_on(self.inner.count(query))
    }

    /// See [`Repository::refresh`](crate::Repository::refresh).
    pub fn refresh(&self) -> Result<()> {
        self.runtime.block_on(self.inner.refresh())
    }

    /// Open a bulk session. Queued operations are sent at the latest when
    /// the session is dropped.
    pub fn bulk(&self) -> BulkSession<T, S, Z> {
        BulkSession {
            inner: self.inner.bulk(),
            runtime: Arc::clone(&self.runtime),
        }
    }

    /// Run `f` with a bulk session flushed when `f` returns, on success
    /// and on error. An error from `f` wins over an error from the flush.
    pub fn with_bulk<R, F>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut BulkSession<T, S, Z>) -> Result<R>,
    {
        let mut session = self.bulk();
        let outcome = f(&mut session);
        let flushed = session.runtime.block_on(session.inner.finish());

        match (outcome, flushed) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(e)) => Err(e),
            (Err(e), flushed) => {
                if let Err(flush_err) = flushed {
                    warn!(
                        "Final bulk flush on {} failed after an earlier error: {}",
                        self.index_name(),
                        flush_err
                    );
                }
                Err(e)
            }
        }
    }
}

impl<T, S: Store, Z> Clone for Repository<T, S, Z> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            runtime: Arc::clone(&self.runtime),
        }
    }
}

impl<T, S: Store + std::fmt::Debug, Z> std::fmt::Debug for Repository<T, S, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("blocking::Repository")
            .field(&self.inner)
            .finish()
    }
}

/// Blocking [`BulkSession`](crate::BulkSession). Flushes on drop.
pub struct BulkSession<T, S: Store, Z = JsonSerializer> {
    inner: bulk::BulkSession<T, S, Z>,
    runtime: Arc<Runtime>,
}

impl<T, S: Store, Z: Serializer<T>> BulkSession<T, S, Z> {
    /// Queue an operation.
    pub fn queue(&mut self, operation: BulkOperation<T>) -> Result<()> {
        self.runtime.block_on(self.inner.queue(operation))
    }

    /// Queue an operation with a callback for its outcome.
    pub fn queue_with<F>(&mut self, operation: BulkOperation<T>, callback: F) -> Result<()>
    where
        F: FnOnce(&BulkItemOutcome) + Send + 'static,
    {
        self.runtime
            .block_on(self.inner.queue_with(operation, callback))
    }

    /// Queue an index operation.
    pub fn index(&mut self, id: impl Into<String>, doc: &T) -> Result<()> {
        self.runtime.block_on(self.inner.index(id, doc))
    }

    /// Queue a create operation.
    pub fn create(&mut self, id: impl Into<String>, doc: &T) -> Result<()> {
        self.runtime.block_on(self.inner.create(id, doc))
    }

    /// Queue a partial update.
    pub fn update(&mut self, id: impl Into<String>, patch: &impl Serialize) -> Result<()> {
        self.runtime.block_on(self.inner.update(id, patch))
    }

    /// Queue a delete.
    pub fn delete(&mut self, id: impl Into<String>) -> Result<()> {
        self.runtime.block_on(self.inner.delete(id))
    }

    /// Send every queued operation now.
    pub fn flush(&mut self) -> Result<BulkReport> {
        self.runtime.block_on(self.inner.flush())
    }

    /// Flush and return the cumulative report.
    pub fn close(mut self) -> Result<BulkReport> {
        self.runtime.block_on(self.inner.finish())
    }

    /// Number of queued operations.
    pub fn pending(&self) -> usize {
        self.inner.pending()
    }

    /// Cumulative report of every flush so far.
    pub fn report(&self) -> &BulkReport {
        self.inner.report()
    }
}

impl<T, S: Store, Z> Drop for BulkSession<T, S, Z> {
    fn drop(&mut self) {
        if self.inner.pending() == 0 {
            return;
        }
        if let Err(e) = self.runtime.block_on(self.inner.flush()) {
            warn!(
                target: "searchkit::bulk",
                "Flush on drop of bulk session for {} failed: {}",
                self.inner.index_name(),
                e
            );
        }
    }
}

impl<T, S: Store, Z> std::fmt::Debug for BulkSession<T, S, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("blocking::BulkSession")
            .field(&self.inner)
            .finish()
    }
}

/// Blocking [`Scroll`](crate::Scroll), iterated as
/// `Result<Projection<T>>`. Iteration stops after the first error.
pub struct Scroll<T, S: Store, Z = JsonSerializer> {
    inner: search::Scroll<T, S, Z>,
    runtime: Arc<Runtime>,
    done: bool,
}

impl<T, S: Store, Z: Serializer<T>> Scroll<T, S, Z> {
    /// Remaining hits of the current page, or the next page.
    pub fn next_page(&mut self) -> Result<Option<Vec<Projection<T>>>> {
        self.runtime.block_on(self.inner.next_page())
    }

    /// Stop early and release the cursor.
    pub fn close(mut self) -> Result<()> {
        self.done = true;
        self.runtime.block_on(self.inner.close())
    }

    /// Total matching documents reported by the first page.
    pub fn total(&self) -> u64 {
        self.inner.total()
    }

    /// Whether [`total`](Scroll::total) is exact.
    pub fn total_relation(&self) -> TotalRelation {
        self.inner.total_relation()
    }

    /// Number of non-empty pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.inner.pages_fetched()
    }

    /// Whether the cursor is still held on the server.
    pub fn is_open(&self) -> bool {
        self.inner.is_open()
    }
}

impl<T, S: Store, Z: Serializer<T>> Iterator for Scroll<T, S, Z> {
    type Item = Result<Projection<T>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.runtime.block_on(self.inner.next()) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

impl<T, S: Store, Z> Drop for Scroll<T, S, Z> {
    fn drop(&mut self) {
        if !self.inner.is_open() {
            return;
        }
        if let Err(e) = self.runtime.block_on(self.inner.close()) {
            warn!(target: "searchkit::scroll", "Failed to release scroll: {}", e);
        }
    }
}

impl<T, S: Store, Z> std::fmt::Debug for Scroll<T, S, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("blocking::Scroll").field(&self.inner).finish()
    }
}
