//! Search requests and typed result projection.
//!
//! A bounded search returns a [`SearchPage`]; an unbounded one returns a
//! [`Scroll`] that walks a server-side cursor page by page. Both hand out
//! [`Projection`]s: the raw hit paired with the deserialized document, or
//! `None` when the hit's source could not be turned into `T`.

use crate::error::Result;
use crate::query::Query;
use crate::serializer::{JsonSerializer, Serializer};
use crate::store::{Hit, SearchResponse, Store, TotalRelation};
use futures::Stream;
use searchkit_log::{debug, warn};
use serde_json::{Map, Value, json};
use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::Duration;

/// Sort order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending.
    Asc,
    /// Descending.
    Desc,
}

impl SortOrder {
    fn as_str(&self) -> &'static str {
        match self {
            SortOrder::Asc => "asc",
            SortOrder::Desc => "desc",
        }
    }
}

/// Which parts of `_source` hits should carry.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum SourceFilter {
    /// The whole source.
    #[default]
    All,
    /// No source at all.
    Disabled,
    /// A subset of top-level fields.
    Fields {
        /// Fields to keep. Empty keeps everything not excluded.
        includes: Vec<String>,
        /// Fields to drop.
        excludes: Vec<String>,
    },
}

/// Search request builder.
///
/// ```rust
/// use searchkit_repository::{Query, SearchRequest, SortOrder};
///
/// let request = SearchRequest::new(Query::term("status", "published"))
///     .size(20)
///     .sort_by("published_at", SortOrder::Desc)
///     .source_includes(["title", "published_at"]);
///
/// let body = request.build_body();
/// assert_eq!(body["size"], 20);
/// assert_eq!(body["_source"]["includes"][0], "title");
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SearchRequest {
    query: Query,
    from: Option<usize>,
    size: Option<usize>,
    sort: Vec<(String, SortOrder)>,
    source: SourceFilter,
    highlight: Vec<String>,
    aggregations: Map<String, Value>,
    track_total_hits: Option<bool>,
}

impl SearchRequest {
    /// Create a request for a query.
    pub fn new(query: impl Into<Query>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    /// Create a request matching every document.
    pub fn match_all() -> Self {
        Self::default()
    }

    /// Replace the query.
    pub fn query(mut self, query: impl Into<Query>) -> Self {
        self.query = query.into();
        self
    }

    /// Set pagination offset. Scroll searches drop it and start at the
    /// first hit.
    pub fn from(mut self, from: usize) -> Self {
        self.from = Some(from);
        self
    }

    /// Set result size limit. For scroll searches this is the page size.
    pub fn size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Add a sort field.
    pub fn sort_by(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    /// Sort by relevance.
    pub fn sort_by_score(self, order: SortOrder) -> Self {
        self.sort_by("_score", order)
    }

    /// Only return these source fields.
    pub fn source_includes<I: Into<String>>(mut self, fields: impl IntoIterator<Item = I>) -> Self {
        let includes = fields.into_iter().map(Into::into).collect();
        self.source = match self.source {
            SourceFilter::Fields { excludes, .. } => SourceFilter::Fields { includes, excludes },
            _ => SourceFilter::Fields {
                includes,
                excludes: Vec::new(),
            },
        };
        self
    }

    /// Drop these source fields.
    pub fn source_excludes<I: Into<String>>(mut self, fields: impl IntoIterator<Item = I>) -> Self {
        let excludes = fields.into_iter().map(Into::into).collect();
        self.source = match self.source {
            SourceFilter::Fields { includes, .. } => SourceFilter::Fields { includes, excludes },
            _ => SourceFilter::Fields {
                includes: Vec::new(),
                excludes,
            },
        };
        self
    }

    /// Return hits without source. Projected values will be `None`.
    pub fn without_source(mut self) -> Self {
        self.source = SourceFilter::Disabled;
        self
    }

    /// Highlight matches in these fields.
    pub fn highlight<I: Into<String>>(mut self, fields: impl IntoIterator<Item = I>) -> Self {
        self.highlight = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Add a named aggregation, given as engine JSON.
    pub fn aggregation(mut self, name: impl Into<String>, body: Value) -> Self {
        self.aggregations.insert(name.into(), body);
        self
    }

    /// Track total hits exactly, even past the engine's default cap.
    pub fn track_total_hits(mut self, track: bool) -> Self {
        self.track_total_hits = Some(track);
        self
    }

    /// Requested size, if any.
    pub fn requested_size(&self) -> Option<usize> {
        self.size
    }

    pub(crate) fn without_offset(mut self) -> Self {
        self.from = None;
        self
    }

    /// The query of this request.
    pub fn query_ref(&self) -> &Query {
        &self.query
    }

    /// Render the search body.
    pub fn build_body(&self) -> Value {
        let mut body = Map::new();
        body.insert("query".to_string(), self.query.to_json());

        if let Some(from) = self.from {
            body.insert("from".to_string(), json!(from));
        }
        if let Some(size) = self.size {
            body.insert("size".to_string(), json!(size));
        }
        if !self.sort.is_empty() {
            let sort = self
                .sort
                .iter()
                .map(|(field, order)| json!({ field: { "order": order.as_str() } }))
                .collect();
            body.insert("sort".to_string(), Value::Array(sort));
        }

        match &self.source {
            SourceFilter::All => {}
            SourceFilter::Disabled => {
                body.insert("_source".to_string(), json!(false));
            }
            SourceFilter::Fields { includes, excludes } => {
                let mut source = Map::new();
                if !includes.is_empty() {
                    source.insert("includes".to_string(), json!(includes));
                }
                if !excludes.is_empty() {
                    source.insert("excludes".to_string(), json!(excludes));
                }
                body.insert("_source".to_string(), Value::Object(source));
            }
        }

        if !self.highlight.is_empty() {
            let fields: Map<String, Value> = self
                .highlight
                .iter()
                .map(|f| (f.clone(), json!({})))
                .collect();
            body.insert("highlight".to_string(), json!({ "fields": fields }));
        }
        if !self.aggregations.is_empty() {
            body.insert(
                "aggs".to_string(),
                Value::Object(self.aggregations.clone()),
            );
        }
        if let Some(track) = self.track_total_hits {
            body.insert("track_total_hits".to_string(), json!(track));
        }

        Value::Object(body)
    }
}

/// A search hit paired with its typed value.
#[derive(Debug, Clone, PartialEq)]
pub struct Projection<T> {
    /// The raw hit, including metadata and source.
    pub hit: Hit,
    /// The deserialized document, `None` when the source was missing or
    /// did not fit `T`.
    pub value: Option<T>,
}

impl<T> Projection<T> {
    /// Document ID of the hit.
    pub fn id(&self) -> &str {
        &self.hit.id
    }

    /// Whether the hit carried a usable value.
    pub fn is_projected(&self) -> bool {
        self.value.is_some()
    }

    /// Consume and return the value.
    pub fn into_value(self) -> Option<T> {
        self.value
    }
}

fn project<T, Z: Serializer<T>>(hit: Hit, serializer: &Z) -> Projection<T> {
    let value = match hit.source.clone() {
        Some(source) => match serializer.from_source(source) {
            Ok(value) => Some(value),
            Err(e) => {
                debug!("Could not project hit {}/{}: {}", hit.index, hit.id, e);
                None
            }
        },
        None => None,
    };
    Projection { hit, value }
}

/// One page of search results.
///
/// Hits are deserialized lazily while iterating.
pub struct SearchPage<T, Z = JsonSerializer> {
    /// Time taken in milliseconds.
    pub took_ms: u64,
    /// Total matching documents.
    pub total: u64,
    /// Whether `total` is exact.
    pub total_relation: TotalRelation,
    /// Maximum score.
    pub max_score: Option<f64>,
    /// Aggregation results.
    pub aggregations: Option<Value>,
    hits: Vec<Hit>,
    serializer: Arc<Z>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, Z: Serializer<T>> SearchPage<T, Z> {
    pub(crate) fn new(response: SearchResponse, serializer: Arc<Z>) -> Self {
        Self {
            took_ms: response.took_ms,
            total: response.total,
            total_relation: response.total_relation,
            max_score: response.max_score,
            aggregations: response.aggregations,
            hits: response.hits,
            serializer,
            _marker: PhantomData,
        }
    }

    /// Raw hits of this page.
    pub fn hits(&self) -> &[Hit] {
        &self.hits
    }

    /// Number of hits on this page.
    pub fn len(&self) -> usize {
        self.hits.len()
    }

    /// Whether this page has no hits.
    pub fn is_empty(&self) -> bool {
        self.hits.is_empty()
    }

    /// Iterate over projections without consuming the page.
    pub fn iter(&self) -> impl Iterator<Item = Projection<T>> + '_ {
        self.hits
            .iter()
            .map(|hit| project(hit.clone(), self.serializer.as_ref()))
    }

    /// Successfully projected values, skipping hits that failed.
    pub fn values(self) -> Vec<T> {
        self.into_iter().filter_map(Projection::into_value).collect()
    }
}

impl<T, Z: Serializer<T>> IntoIterator for SearchPage<T, Z> {
    type Item = Projection<T>;
    type IntoIter = PageIter<T, Z>;

    fn into_iter(self) -> Self::IntoIter {
        PageIter {
            hits: self.hits.into_iter(),
            serializer: self.serializer,
            _marker: PhantomData,
        }
    }
}

impl<T, Z> std::fmt::Debug for SearchPage<T, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SearchPage")
            .field("total", &self.total)
            .field("total_relation", &self.total_relation)
            .field("hits", &self.hits.len())
            .finish()
    }
}

/// Consuming iterator over a [`SearchPage`].
pub struct PageIter<T, Z> {
    hits: std::vec::IntoIter<Hit>,
    serializer: Arc<Z>,
    _marker: PhantomData<fn() -> T>,
}

impl<T, Z: Serializer<T>> Iterator for PageIter<T, Z> {
    type Item = Projection<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.hits
            .next()
            .map(|hit| project(hit, self.serializer.as_ref()))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.hits.size_hint()
    }
}

/// Cursor over every hit of a search, fetched page by page.
///
/// The cursor is released right after the last page is fetched, on
/// [`close`](Scroll::close), or, if neither happened, in the background
/// when the `Scroll` is dropped inside a Tokio runtime.
///
/// ```rust,no_run
/// use searchkit_repository::{OpenSearchStore, Repository, SearchRequest};
/// # #[derive(serde::Serialize, serde::Deserialize)] struct Article { title: String }
///
/// # async fn run(repo: Repository<Article, OpenSearchStore>) -> searchkit_repository::Result<()> {
/// let mut scroll = repo.scroll(SearchRequest::match_all().size(500)).await?;
/// while let Some(item) = scroll.next().await? {
///     if let Some(article) = item.value {
///         println!("{}", article.title);
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub struct Scroll<T, S: Store, Z = JsonSerializer> {
    store: Arc<S>,
    serializer: Arc<Z>,
    index: String,
    keep_alive: Duration,
    scroll_id: Option<String>,
    buffer: VecDeque<Hit>,
    total: u64,
    total_relation: TotalRelation,
    fetched: u64,
    pages: usize,
    exhausted: bool,
    _marker: PhantomData<fn() -> T>,
}

impl<T, S: Store, Z: Serializer<T>> Scroll<T, S, Z> {
    /// Run the search and buffer its first page.
    pub(crate) async fn open(
        store: Arc<S>,
        serializer: Arc<Z>,
        index: &str,
        body: Value,
        keep_alive: Duration,
    ) -> Result<Self> {
        debug!(target: "searchkit::scroll", "Opening scroll on {}", index);
        let response = store.search(index, body, Some(keep_alive)).await?;

        let mut scroll = Self {
            store,
            serializer,
            index: index.to_string(),
            keep_alive,
            scroll_id: response.scroll_id,
            buffer: VecDeque::new(),
            total: response.total,
            total_relation: response.total_relation,
            fetched: 0,
            pages: 0,
            exhausted: false,
            _marker: PhantomData,
        };
        scroll.absorb(response.hits).await?;
        Ok(scroll)
    }

    /// Next hit, fetching a new page when the buffered one is used up.
    pub async fn next(&mut self) -> Result<Option<Projection<T>>> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fetch().await?;
        }
        Ok(self
            .buffer
            .pop_front()
            .map(|hit| project(hit, self.serializer.as_ref())))
    }

    /// Remaining hits of the current page, or the next page.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Projection<T>>>> {
        while self.buffer.is_empty() && !self.exhausted {
            self.fetch().await?;
        }
        if self.buffer.is_empty() {
            return Ok(None);
        }
        Ok(Some(
            self.buffer
                .drain(..)
                .map(|hit| project(hit, self.serializer.as_ref()))
                .collect(),
        ))
    }

    /// Drain the whole cursor into a vector.
    pub async fn collect_all(mut self) -> Result<Vec<Projection<T>>> {
        let mut all = Vec::new();
        while let Some(page) = self.next_page().await? {
            all.extend(page);
        }
        Ok(all)
    }

    /// Turn the scroll into a stream of projections. The stream ends after
    /// the first error.
    pub fn into_stream(self) -> impl Stream<Item = Result<Projection<T>>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut scroll = state?;
            match scroll.next().await {
                Ok(Some(item)) => Some((Ok(item), Some(scroll))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }

    async fn fetch(&mut self) -> Result<()> {
        let Some(id) = self.scroll_id.clone() else {
            self.exhausted = true;
            return Ok(());
        };

        let response = self.store.scroll(&id, self.keep_alive).await?;
        if let Some(next_id) = response.scroll_id {
            self.scroll_id = Some(next_id);
        }
        self.absorb(response.hits).await
    }

    async fn absorb(&mut self, hits: Vec<Hit>) -> Result<()> {
        if hits.is_empty() {
            self.exhausted = true;
        } else {
            self.fetched += hits.len() as u64;
            self.pages += 1;
            self.buffer.extend(hits);
            debug!(
                target: "searchkit::scroll",
                "Fetched page {} of {} ({}/{} hits)",
                self.pages,
                self.index,
                self.fetched,
                self.total
            );
            if self.total_relation == TotalRelation::Eq && self.fetched >= self.total {
                self.exhausted = true;
            }
        }

        if self.exhausted {
            self.release().await?;
        }
        Ok(())
    }
}

impl<T, S: Store, Z> Scroll<T, S, Z> {
    /// Stop early and release the cursor.
    pub async fn close(&mut self) -> Result<()> {
        self.exhausted = true;
        self.buffer.clear();
        self.release().await
    }

    /// Total matching documents reported by the first page.
    pub fn total(&self) -> u64 {
        self.total
    }

    /// Whether [`total`](Scroll::total) is exact.
    pub fn total_relation(&self) -> TotalRelation {
        self.total_relation
    }

    /// Number of non-empty pages fetched so far.
    pub fn pages_fetched(&self) -> usize {
        self.pages
    }

    /// Whether the cursor is still held on the server.
    pub fn is_open(&self) -> bool {
        self.scroll_id.is_some()
    }

    async fn release(&mut self) -> Result<()> {
        if let Some(id) = self.scroll_id.take() {
            debug!(target: "searchkit::scroll", "Releasing scroll on {}", self.index);
            self.store.clear_scroll(&id).await?;
        }
        Ok(())
    }
}

impl<T, S: Store, Z> Drop for Scroll<T, S, Z> {
    fn drop(&mut self) {
        let Some(id) = self.scroll_id.take() else {
            return;
        };

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let store = Arc::clone(&self.store);
                let index = std::mem::take(&mut self.index);
                handle.spawn(async move {
                    if let Err(e) = store.clear_scroll(&id).await {
                        warn!(
                            target: "searchkit::scroll",
                            "Failed to release scroll on {}: {}", index, e
                        );
                    }
                });
            }
            Err(_) => {
                warn!(
                    target: "searchkit::scroll",
                    "Scroll on {} dropped outside a runtime; cursor expires after its keep-alive",
                    self.index
                );
            }
        }
    }
}

impl<T, S: Store, Z> std::fmt::Debug for Scroll<T, S, Z> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scroll")
            .field("index", &self.index)
            .field("total", &self.total)
            .field("fetched", &self.fetched)
            .field("pages", &self.pages)
            .field("open", &self.scroll_id.is_some())
            .finish()
    }
}
