//! Typed document repository.

use crate::bulk::BulkSession;
use crate::config::RepositoryConfig;
use crate::document::{Document, Version, VersionedDocument, WriteAck};
use crate::error::{RepositoryError, Result};
use crate::query::Query;
use crate::search::{Scroll, SearchPage, SearchRequest};
use crate::serializer::{JsonSerializer, Serializer};
use crate::store::{DeleteRequest, IndexRequest, Store, StoredDocument, WriteMode};
use futures::future::BoxFuture;
use searchkit_log::{debug, warn};
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed access to the documents of one index.
///
/// A repository is a thin, cloneable handle: it holds the store, the
/// serializer and immutable configuration, and caches nothing. Every
/// operation is one or more store calls.
///
/// # Example
///
/// ```rust
/// use searchkit_repository::{MemoryStore, RefreshPolicy, Repository, RepositoryConfig};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Counter {
///     hits: u64,
/// }
///
/// # let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
/// # rt.block_on(async {
/// let config = RepositoryConfig::new("counters").with_refresh(RefreshPolicy::Manual);
/// let repo: Repository<Counter, _> = Repository::new(MemoryStore::new(), config).unwrap();
///
/// repo.index("home", &Counter { hits: 0 }, true).await.unwrap();
/// let updated = repo
///     .update("home", |mut c| { c.hits += 1; c }, 3)
///     .await
///     .unwrap();
/// assert_eq!(updated.doc.hits, 1);
///
/// repo.refresh().await.unwrap();
/// assert_eq!(repo.count(searchkit_repository::Query::MatchAll).await.unwrap(), 1);
/// # });
/// ```
pub struct Repository<T, S, Z = JsonSerializer> {
    store: Arc<S>,
    serializer: Arc<Z>,
    config: Arc<RepositoryConfig>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S> Repository<T, S, JsonSerializer>
where
    S: Store,
    JsonSerializer: Serializer<T>,
{
    /// Create a repository with the default JSON serializer.
    ///
    /// Fails with [`RepositoryError::Config`] when `config` does not pass
    /// [`RepositoryConfig::validate`].
    pub fn new(store: S, config: RepositoryConfig) -> Result<Self> {
        Self::from_arc(Arc::new(store), config)
    }

    /// Create a repository over a shared store.
    pub fn from_arc(store: Arc<S>, config: RepositoryConfig) -> Result<Self> {
        Self::from_parts(store, Arc::new(JsonSerializer), config)
    }
}

impl<T, S> Repository<T, S, JsonSerializer>
where
    T: Document,
    S: Store,
    JsonSerializer: Serializer<T>,
{
    /// Create a repository for the document type's own index, with
    /// default configuration.
    pub fn for_document(store: S) -> Result<Self> {
        Self::new(store, RepositoryConfig::new(T::index_name()))
    }
}

impl<T, S, Z> Repository<T, S, Z>
where
    S: Store,
    Z: Serializer<T>,
{
    /// Create a repository with a custom serializer.
    pub fn with_serializer(store: S, serializer: Z, config: RepositoryConfig) -> Result<Self> {
        Self::from_parts(Arc::new(store), Arc::new(serializer), config)
    }

    fn from_parts(store: Arc<S>, serializer: Arc<Z>, config: RepositoryConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            store,
            serializer,
            config: Arc::new(config),
            _marker: PhantomData,
        })
    }

    /// Index this repository reads and writes.
    pub fn index_name(&self) -> &str {
        &self.config.index
    }

    /// Repository configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Document serializer.
    pub fn serializer(&self) -> &Z {
        &self.serializer
    }

    /// Fetch a document by ID. Reads are real-time and do not depend on
    /// refresh.
    pub async fn get(&self, id: &str) -> Result<VersionedDocument<T>> {
        self.find(id)
            .await?
            .ok_or_else(|| RepositoryError::not_found(self.index_name(), id))
    }

    /// Fetch a document by ID, `None` when it does not exist.
    pub async fn find(&self, id: &str) -> Result<Option<VersionedDocument<T>>> {
        debug!("GET {}/{}", self.index_name(), id);
        match self.store.get(self.index_name(), id).await? {
            Some(stored) => self.decode(stored).map(Some),
            None => Ok(None),
        }
    }

    /// Whether a document with this ID exists.
    pub async fn exists(&self, id: &str) -> Result<bool> {
        debug!("EXISTS {}/{}", self.index_name(), id);
        Ok(self.store.get(self.index_name(), id).await?.is_some())
    }

    /// Store a document under `id`.
    ///
    /// With `create` set the write fails with
    /// [`RepositoryError::VersionConflict`] when the ID already exists;
    /// otherwise an existing document is replaced.
    pub async fn index(&self, id: &str, value: &T, create: bool) -> Result<WriteAck> {
        let mode = if create {
            WriteMode::Create
        } else {
            WriteMode::Index
        };
        self.write(id, value, mode, None).await
    }

    /// Replace a document only if it is still at `version`.
    pub async fn index_versioned(&self, id: &str, value: &T, version: Version) -> Result<WriteAck> {
        self.write(id, value, WriteMode::Index, Some(version)).await
    }

    /// Read-modify-write with optimistic concurrency.
    ///
    /// Fetches the document, applies `mutator` and writes the result back
    /// conditioned on the fetched version. On a version conflict the whole
    /// cycle is repeated, up to `max_retries` more times, waiting between
    /// attempts as the repository's backoff strategy says. When every
    /// attempt conflicts the error is
    /// [`RepositoryError::UpdateConflictExhausted`].
    ///
    /// `mutator` runs once per attempt and must not have side effects that
    /// cannot be repeated.
    pub async fn update<F>(&self, id: &str, mut mutator: F, max_retries: u32) -> Result<VersionedDocument<T>>
    where
        F: FnMut(T) -> T,
    {
        let attempts = max_retries.saturating_add(1);

        for attempt in 0..attempts {
            if attempt > 0 {
                let delay = self.config.retry.delay_for_retry(attempt - 1);
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
            }

            let current = self.get(id).await?;
            let version = current.version;
            let updated = mutator(current.doc);
            let source = self.serializer.to_source(&updated)?;

            debug!(
                "UPDATE {}/{} at seq_no {} (attempt {}/{})",
                self.index_name(),
                id,
                version.seq_no,
                attempt + 1,
                attempts
            );
            let request = IndexRequest {
                id: id.to_string(),
                source,
                mode: WriteMode::Index,
                if_version: Some(version),
                refresh: self.config.refresh.refresh_on_write(),
            };

            match self.store.index(self.index_name(), request).await {
                Ok(ack) => {
                    return Ok(VersionedDocument {
                        id: ack.id,
                        index: ack.index,
                        version: ack.version,
                        doc_version: ack.doc_version,
                        doc: updated,
                    });
                }
                Err(e) if e.is_conflict() => {
                    debug!(
                        "Version conflict updating {}/{}, attempt {} of {}",
                        self.index_name(),
                        id,
                        attempt + 1,
                        attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }

        warn!(
            "Giving up update of {}/{} after {} conflicting attempts",
            self.index_name(),
            id,
            attempts
        );
        Err(RepositoryError::UpdateConflictExhausted {
            index: self.index_name().to_string(),
            id: id.to_string(),
            attempts,
        })
    }

    /// [`update`](Repository::update) with the configured retry count.
    pub async fn update_with<F>(&self, id: &str, mutator: F) -> Result<VersionedDocument<T>>
    where
        F: FnMut(T) -> T,
    {
        self.update(id, mutator, self.config.retry.max_retries).await
    }

    /// Delete a document.
    pub async fn delete(&self, id: &str) -> Result<WriteAck> {
        self.remove(id, None).await
    }

    /// Delete a document only if it is still at `version`.
    pub async fn delete_versioned(&self, id: &str, version: Version) -> Result<WriteAck> {
        self.remove(id, Some(version)).await
    }

    /// Run a bounded search.
    ///
    /// Only documents made visible by a refresh are found.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchPage<T, Z>> {
        debug!("SEARCH {}", self.index_name());
        let response = self
            .store
            .search(self.index_name(), request.build_body(), None)
            .await?;
        Ok(SearchPage::new(response, Arc::clone(&self.serializer)))
    }

    /// Open a scroll over every hit of a search.
    ///
    /// The request's size is the page size; when unset, the configured
    /// scroll page size is used. A size of zero is rejected with
    /// [`RepositoryError::Validation`]. Any `from` offset is dropped, since
    /// a scroll always starts at the first hit.
    pub async fn scroll(&self, request: SearchRequest) -> Result<Scroll<T, S, Z>> {
        let request = match request.requested_size() {
            Some(0) => {
                return Err(RepositoryError::validation(format!(
                    "scroll page size on {} must be positive",
                    self.index_name()
                )));
            }
            Some(_) => request,
            None => request.size(self.config.scroll_page_size),
        };
        let request = request.without_offset();
        Scroll::open(
            Arc::clone(&self.store),
            Arc::clone(&self.serializer),
            self.index_name(),
            request.build_body(),
            self.config.scroll_keep_alive,
        )
        .await
    }

    /// Count documents matching a query.
    pub async fn count(&self, query: impl Into<Query>) -> Result<u64> {
        let query: Query = query.into();
        debug!("COUNT {}", self.index_name());
        self.store.count(self.index_name(), query.to_json()).await
    }

    /// Make recent writes visible to search.
    ///
    /// Fails with [`RepositoryError::RefreshNotAllowed`], without touching
    /// the store, when the refresh policy is
    /// [`Disabled`](crate::RefreshPolicy::Disabled).
    pub async fn refresh(&self) -> Result<()> {
        if !self.config.refresh.allows_refresh() {
            return Err(RepositoryError::RefreshNotAllowed {
                index: self.index_name().to_string(),
            });
        }
        debug!("REFRESH {}", self.index_name());
        self.store.refresh(self.index_name()).await
    }

    /// Open a bulk session using the configured thresholds.
    pub fn bulk(&self) -> BulkSession<T, S, Z> {
        BulkSession::new(
            Arc::clone(&self.store),
            Arc::clone(&self.serializer),
            self.index_name(),
            self.config.bulk.clone(),
            self.config.refresh.refresh_on_write(),
        )
    }

    /// Run `f` with a bulk session that is flushed when `f` finishes,
    /// whether it succeeded or not.
    ///
    /// An error from `f` wins over an error from the final flush.
    ///
    /// ```rust,no_run
    /// # use searchkit_repository::{MemoryStore, Repository};
    /// # #[derive(serde::Serialize, serde::Deserialize)] struct Tag { name: String }
    /// # async fn run(repo: Repository<Tag, MemoryStore>, tags: Vec<Tag>) -> searchkit_repository::Result<()> {
    /// let written = repo
    ///     .with_bulk(|bulk| {
    ///         Box::pin(async move {
    ///             for tag in &tags {
    ///                 bulk.index(tag.name.clone(), tag).await?;
    ///             }
    ///             Ok::<_, searchkit_repository::RepositoryError>(tags.len())
    ///         })
    ///     })
    ///     .await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn with_bulk<R, F>(&self, f: F) -> Result<R>
    where
        F: for<'a> FnOnce(&'a mut BulkSession<T, S, Z>) -> BoxFuture<'a, Result<R>>,
    {
        let mut session = self.bulk();
        let outcome = f(&mut session).await;
        let flushed = session.finish().await;

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

    async fn write(
        &self,
        id: &str,
        value: &T,
        mode: WriteMode,
        if_version: Option<Version>,
    ) -> Result<WriteAck> {
        debug!("INDEX {}/{} ({:?})", self.index_name(), id, mode);
        let request = IndexRequest {
            id: id.to_string(),
            source: self.serializer.to_source(value)?,
            mode,
            if_version,
            refresh: self.config.refresh.refresh_on_write(),
        };
        self.store.index(self.index_name(), request).await
    }

    async fn remove(&self, id: &str, if_version: Option<Version>) -> Result<WriteAck> {
        debug!("DELETE {}/{}", self.index_name(), id);
        let request = DeleteRequest {
            id: id.to_string(),
            if_version,
            refresh: self.config.refresh.refresh_on_write(),
        };
        self.store.delete(self.index_name(), request).await
    }

    fn decode(&self, stored: StoredDocument) -> Result<VersionedDocument<T>> {
        let source = stored.source.ok_or_else(|| {
            RepositoryError::Serialization(format!(
                "{}/{} has no stored source",
                stored.index, stored.id
            ))
        })?;

        Ok(VersionedDocument {
            doc: self.serializer.from_source(source)?,
            id: stored.id,
            index: stored.index,
            version: stored.version,
            doc_version: stored.doc_version,
        })
    }
}

impl<T, S, Z> Clone for Repository<T, S, Z> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            serializer: Arc::clone(&self.serializer),
            config: Arc::clone(&self.config),
            _marker: PhantomData,
        }
    }
}

impl<T, S: std::fmt::Debug, Z> std::fmt::Debug for Repository<T, S, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("index", &self.config.index)
            .field("refresh", &self.config.refresh)
            .field("store", &self.store)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RefreshPolicy;
    use crate::memory::MemoryStore;
    use crate::retry::RetryPolicy;
    use serde::{Deserialize, Serialize};

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        owner: String,
        balance: i64,
    }

    impl Document for Account {
        fn index_name() -> &'static str {
            "accounts"
        }
    }

    fn account(balance: i64) -> Account {
        Account {
            owner: "ada".to_string(),
            balance,
        }
    }

    #[tokio::test]
    async fn test_for_document_uses_type_index() {
        let repo: Repository<Account, MemoryStore> = Repository::for_document(MemoryStore::new()).unwrap();
        assert_eq!(repo.index_name(), "accounts");
    }

    #[tokio::test]
    async fn test_get_missing_is_not_found() {
        let repo: Repository<Account, _> =
            Repository::new(MemoryStore::new(), RepositoryConfig::new("accounts")).unwrap();

        assert!(repo.get("nope").await.unwrap_err().is_not_found());
        assert!(repo.find("nope").await.unwrap().is_none());
        assert!(!repo.exists("nope").await.unwrap());
    }

    #[tokio::test]
    async fn test_create_twice_conflicts() {
        let repo: Repository<Account, _> =
            Repository::new(MemoryStore::new(), RepositoryConfig::new("accounts")).unwrap();

        repo.index("a", &account(1), true).await.unwrap();
        let err = repo.index("a", &account(2), true).await.unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(repo.get("a").await.unwrap().doc.balance, 1);
    }

    #[tokio::test]
    async fn test_versioned_write_and_delete() {
        let repo: Repository<Account, _> =
            Repository::new(MemoryStore::new(), RepositoryConfig::new("accounts")).unwrap();

        let first = repo.index("a", &account(1), false).await.unwrap();
        let second = repo
            .index_versioned("a", &account(2), first.version)
            .await
            .unwrap();
        assert!(
            repo.index_versioned("a", &account(3), first.version)
                .await
                .unwrap_err()
                .is_conflict()
        );
        assert!(
            repo.delete_versioned("a", first.version)
                .await
                .unwrap_err()
                .is_conflict()
        );
        repo.delete_versioned("a", second.version).await.unwrap();
        assert!(repo.delete("a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_update_returns_new_version() {
        let repo: Repository<Account, _> = Repository::new(
            MemoryStore::new(),
            RepositoryConfig::new("accounts").with_retry(RetryPolicy::immediate(2)),
        )
        .unwrap();

        let ack = repo.index("a", &account(10), false).await.unwrap();
        let updated = repo
            .update_with("a", |mut a| {
                a.balance += 5;
                a
            })
            .await
            .unwrap();

        assert_eq!(updated.doc.balance, 15);
        assert!(updated.version.seq_no > ack.version.seq_no);
        assert_eq!(repo.get("a").await.unwrap().version, updated.version);
    }

    #[tokio::test]
    async fn test_refresh_disallowed_makes_no_call() {
        let repo: Repository<Account, _> =
            Repository::new(MemoryStore::new(), RepositoryConfig::new("accounts")).unwrap();

        let err = repo.refresh().await.unwrap_err();
        assert!(matches!(err, RepositoryError::RefreshNotAllowed { .. }));
        assert!(repo.store().calls().is_empty());
    }

    #[tokio::test]
    async fn test_wait_for_policy_makes_writes_searchable() {
        let repo: Repository<Account, _> = Repository::new(
            MemoryStore::new(),
            RepositoryConfig::new("accounts").with_refresh(RefreshPolicy::WaitFor),
        )
        .unwrap();

        repo.index("a", &account(1), false).await.unwrap();
        assert_eq!(repo.count(Query::MatchAll).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_source_disabled_get_fails_to_decode() {
        let store = MemoryStore::new().with_source_disabled("accounts");
        let repo: Repository<Account, _> = Repository::new(store, RepositoryConfig::new("accounts")).unwrap();

        repo.index("a", &account(1), false).await.unwrap();
        assert!(repo.exists("a").await.unwrap());
        assert!(matches!(
            repo.get("a").await.unwrap_err(),
            RepositoryError::Serialization(_)
        ));
    }
}
