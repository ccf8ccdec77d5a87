//! In-process [`Store`] with engine-like semantics.
//!
//! `MemoryStore` keeps per-index sequence numbers, real-time gets, a
//! refresh boundary for search visibility, and scroll cursors, so that
//! repository code behaves the same against it as against a cluster. It
//! also records every call it receives, which tests use to assert on
//! store traffic.

use crate::document::{Version, WriteAck, WriteResult};
use crate::error::{RepositoryError, Result};
use crate::store::{
    BulkAction, BulkItemError, BulkItemResponse, DeleteRequest, Hit, IndexRequest,
    SearchResponse, Store, StoredDocument, TotalRelation, WriteMode,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use searchkit_log::{debug, trace};
use serde_json::{Map, Value};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

/// Primary term of every document. The memory store never fails over.
pub const PRIMARY_TERM: i64 = 1;

const DEFAULT_SEARCH_SIZE: usize = 10;

type MappingCheck = Arc<dyn Fn(&Value) -> std::result::Result<(), String> + Send + Sync>;

/// In-memory document store.
///
/// # Example
///
/// ```rust
/// use searchkit_repository::{MemoryStore, Repository, RepositoryConfig};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Clone, Serialize, Deserialize)]
/// struct Note {
///     text: String,
/// }
///
/// # let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
/// # rt.block_on(async {
/// let repo: Repository<Note, MemoryStore> =
///     Repository::new(MemoryStore::new(), RepositoryConfig::new("notes")).unwrap();
///
/// repo.index("n1", &Note { text: "hello".into() }, false).await.unwrap();
/// let stored = repo.get("n1").await.unwrap();
/// assert_eq!(stored.doc.text, "hello");
/// assert_eq!(repo.store().call_count("index"), 1);
/// # });
/// ```
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

#[derive(Default)]
struct State {
    indices: HashMap<String, IndexState>,
    scrolls: HashMap<String, ScrollContext>,
    next_scroll: u64,
    calls: Vec<String>,
    offline: bool,
}

struct IndexState {
    docs: BTreeMap<String, Entry>,
    visible: BTreeMap<String, Entry>,
    next_seq_no: i64,
    source_enabled: bool,
    mapping: Option<MappingCheck>,
}

impl Default for IndexState {
    fn default() -> Self {
        Self {
            docs: BTreeMap::new(),
            visible: BTreeMap::new(),
            next_seq_no: 0,
            source_enabled: true,
            mapping: None,
        }
    }
}

#[derive(Debug, Clone)]
struct Entry {
    source: Value,
    seq_no: i64,
    doc_version: i64,
}

struct ScrollContext {
    remaining: VecDeque<Hit>,
    page_size: usize,
    total: u64,
}

struct Applied {
    result: WriteResult,
    seq_no: i64,
    doc_version: i64,
}

/// Why the store refused a write.
struct Rejection {
    status: u16,
    error_type: &'static str,
    reason: String,
}

impl Rejection {
    fn conflict(reason: String) -> Self {
        Self {
            status: 409,
            error_type: "version_conflict_engine_exception",
            reason,
        }
    }

    fn missing(id: &str) -> Self {
        Self {
            status: 404,
            error_type: "document_missing_exception",
            reason: format!("[{}]: document missing", id),
        }
    }

    fn invalid(reason: String) -> Self {
        Self {
            status: 400,
            error_type: "mapper_parsing_exception",
            reason,
        }
    }

    fn into_error(self, index: &str, id: &str) -> RepositoryError {
        RepositoryError::from_status(
            self.status,
            format!("{}: {}", self.error_type, self.reason),
            index,
            id,
        )
    }
}

impl IndexState {
    fn apply(&mut self, action: &BulkAction) -> std::result::Result<Applied, Rejection> {
        let id = action.id();
        let current = self.docs.get(id).cloned();

        if let Some(expected) = action.if_version() {
            let matches = current.as_ref().is_some_and(|entry| {
                entry.seq_no == expected.seq_no && expected.primary_term == PRIMARY_TERM
            });
            if !matches {
                return Err(Rejection::conflict(format!(
                    "[{}]: version conflict, required seqNo [{}], primary term [{}], current document has seqNo [{}]",
                    id,
                    expected.seq_no,
                    expected.primary_term,
                    current.as_ref().map_or(-1, |e| e.seq_no)
                )));
            }
        }

        match action {
            BulkAction::Index { source, .. } => self.write(id, source.clone(), current),
            BulkAction::Create { source, .. } => {
                if current.is_some() {
                    return Err(Rejection::conflict(format!(
                        "[{}]: version conflict, document already exists",
                        id
                    )));
                }
                self.write(id, source.clone(), None)
            }
            BulkAction::Update { doc, .. } => {
                let entry = current.ok_or_else(|| Rejection::missing(id))?;
                let mut merged = entry.source.clone();
                merge(&mut merged, doc);
                if merged == entry.source {
                    return Ok(Applied {
                        result: WriteResult::Noop,
                        seq_no: entry.seq_no,
                        doc_version: entry.doc_version,
                    });
                }
                self.write(id, merged, Some(entry))
            }
            BulkAction::Delete { .. } => {
                let entry = current.ok_or_else(|| Rejection::missing(id))?;
                self.docs.remove(id);
                Ok(Applied {
                    result: WriteResult::Deleted,
                    seq_no: self.bump(),
                    doc_version: entry.doc_version + 1,
                })
            }
        }
    }

    fn write(
        &mut self,
        id: &str,
        source: Value,
        current: Option<Entry>,
    ) -> std::result::Result<Applied, Rejection> {
        if !source.is_object() {
            return Err(Rejection::invalid(
                "document source must be an object".to_string(),
            ));
        }
        if let Some(check) = &self.mapping {
            check(&source).map_err(Rejection::invalid)?;
        }

        let seq_no = self.bump();
        let (result, doc_version) = match current {
            Some(entry) => (WriteResult::Updated, entry.doc_version + 1),
            None => (WriteResult::Created, 1),
        };
        self.docs.insert(
            id.to_string(),
            Entry {
                source,
                seq_no,
                doc_version,
            },
        );

        Ok(Applied {
            result,
            seq_no,
            doc_version,
        })
    }

    fn bump(&mut self) -> i64 {
        let seq_no = self.next_seq_no;
        self.next_seq_no += 1;
        seq_no
    }

    fn refresh(&mut self) {
        self.visible = self.docs.clone();
    }
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reject writes to `index` whose source fails `check`, the way a
    /// strict mapping rejects malformed documents.
    pub fn with_mapping<F>(self, index: &str, check: F) -> Self
    where
        F: Fn(&Value) -> std::result::Result<(), String> + Send + Sync + 'static,
    {
        self.state
            .lock()
            .indices
            .entry(index.to_string())
            .or_default()
            .mapping = Some(Arc::new(check));
        self
    }

    /// Stop storing `_source` for `index`: gets and hits come back
    /// without a source.
    pub fn with_source_disabled(self, index: &str) -> Self {
        self.state
            .lock()
            .indices
            .entry(index.to_string())
            .or_default()
            .source_enabled = false;
        self
    }

    /// Simulate an unreachable store. Every call fails with
    /// [`RepositoryError::Transport`] while offline.
    pub fn set_offline(&self, offline: bool) {
        self.state.lock().offline = offline;
    }

    /// Names of all calls received so far, in order.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().calls.clone()
    }

    /// Number of calls received for one operation name.
    pub fn call_count(&self, operation: &str) -> usize {
        self.state
            .lock()
            .calls
            .iter()
            .filter(|c| c.as_str() == operation)
            .count()
    }

    /// Forget recorded calls.
    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    /// Number of documents currently stored in `index`, refreshed or not.
    pub fn document_count(&self, index: &str) -> usize {
        self.state
            .lock()
            .indices
            .get(index)
            .map_or(0, |state| state.docs.len())
    }

    /// Number of scroll cursors not yet released.
    pub fn open_scrolls(&self) -> usize {
        self.state.lock().scrolls.len()
    }

    /// Record the call and fail when offline.
    fn enter(state: &mut State, operation: &str) -> Result<()> {
        trace!("memory store: {}", operation);
        state.calls.push(operation.to_string());
        if state.offline {
            return Err(RepositoryError::Transport(format!(
                "memory store is offline ({})",
                operation
            )));
        }
        Ok(())
    }

    fn open_scroll(state: &mut State, context: ScrollContext) -> String {
        state.next_scroll += 1;
        let id = format!("scroll-{}", state.next_scroll);
        state.scrolls.insert(id.clone(), context);
        id
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "get")?;

        let Some(index_state) = state.indices.get(index) else {
            return Ok(None);
        };

        Ok(index_state.docs.get(id).map(|entry| StoredDocument {
            index: index.to_string(),
            id: id.to_string(),
            version: Version::new(entry.seq_no, PRIMARY_TERM),
            doc_version: entry.doc_version,
            source: index_state.source_enabled.then(|| entry.source.clone()),
        }))
    }

    async fn index(&self, index: &str, request: IndexRequest) -> Result<WriteAck> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "index")?;

        let action = match request.mode {
            WriteMode::Index => BulkAction::Index {
                id: request.id.clone(),
                source: request.source,
                if_version: request.if_version,
            },
            WriteMode::Create => BulkAction::Create {
                id: request.id.clone(),
                source: request.source,
            },
        };

        let index_state = state.indices.entry(index.to_string()).or_default();
        let applied = index_state
            .apply(&action)
            .map_err(|r| r.into_error(index, &request.id))?;
        if request.refresh {
            index_state.refresh();
        }

        Ok(ack(index, &request.id, applied))
    }

    async fn delete(&self, index: &str, request: DeleteRequest) -> Result<WriteAck> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "delete")?;

        let action = BulkAction::Delete {
            id: request.id.clone(),
            if_version: request.if_version,
        };

        let index_state = state.indices.entry(index.to_string()).or_default();
        let applied = index_state
            .apply(&action)
            .map_err(|r| r.into_error(index, &request.id))?;
        if request.refresh {
            index_state.refresh();
        }

        Ok(ack(index, &request.id, applied))
    }

    async fn bulk(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: bool,
    ) -> Result<Vec<BulkItemResponse>> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "bulk")?;
        debug!("memory store: bulk of {} actions on {}", actions.len(), index);

        let index_state = state.indices.entry(index.to_string()).or_default();
        let items = actions
            .iter()
            .map(|action| match index_state.apply(action) {
                Ok(applied) => BulkItemResponse {
                    kind: action.kind(),
                    id: action.id().to_string(),
                    status: if applied.result == WriteResult::Created {
                        201
                    } else {
                        200
                    },
                    result: Some(applied.result),
                    version: Some(Version::new(applied.seq_no, PRIMARY_TERM)),
                    doc_version: Some(applied.doc_version),
                    error: None,
                },
                Err(rejection) => BulkItemResponse {
                    kind: action.kind(),
                    id: action.id().to_string(),
                    status: rejection.status,
                    result: None,
                    version: None,
                    doc_version: None,
                    error: Some(BulkItemError {
                        error_type: rejection.error_type.to_string(),
                        reason: rejection.reason,
                    }),
                },
            })
            .collect();

        if refresh {
            index_state.refresh();
        }

        Ok(items)
    }

    async fn search(
        &self,
        index: &str,
        body: Value,
        scroll: Option<Duration>,
    ) -> Result<SearchResponse> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "search")?;

        let query = body.get("query").cloned().unwrap_or(Value::Null);
        let size = body["size"].as_u64().map_or(DEFAULT_SEARCH_SIZE, |s| s as usize);
        let from = body["from"].as_u64().unwrap_or(0) as usize;
        if scroll.is_some() {
            // Same rejections as the engine, reported as a 400.
            if body.get("from").is_some() {
                return Err(RepositoryError::validation(
                    "using [from] is not allowed in a scroll context",
                ));
            }
            if size == 0 {
                return Err(RepositoryError::validation(
                    "[size] cannot be [0] in a scroll context",
                ));
            }
        }

        let mut hits = match state.indices.get(index) {
            Some(index_state) => {
                let mut matched = Vec::new();
                for (id, entry) in &index_state.visible {
                    if query.is_null() || matches(&query, id, &entry.source)? {
                        matched.push((id, entry));
                    }
                }
                sort_entries(&mut matched, body.get("sort"));
                matched
                    .into_iter()
                    .map(|(id, entry)| to_hit(index, id, entry, index_state.source_enabled, &body))
                    .collect::<Vec<_>>()
            }
            None => Vec::new(),
        };
        let total = hits.len() as u64;

        let response = if scroll.is_some() {
            let page_size = size;
            let rest: VecDeque<Hit> = hits.split_off(page_size.min(hits.len())).into();
            let scroll_id = Self::open_scroll(
                &mut state,
                ScrollContext {
                    remaining: rest,
                    page_size,
                    total,
                },
            );
            SearchResponse {
                total,
                hits,
                scroll_id: Some(scroll_id),
                max_score: Some(1.0),
                ..SearchResponse::default()
            }
        } else {
            SearchResponse {
                total,
                hits: hits.into_iter().skip(from).take(size).collect(),
                max_score: Some(1.0),
                ..SearchResponse::default()
            }
        };

        Ok(SearchResponse {
            total_relation: TotalRelation::Eq,
            ..response
        })
    }

    async fn scroll(&self, scroll_id: &str, _keep_alive: Duration) -> Result<SearchResponse> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "scroll")?;

        let context = state.scrolls.get_mut(scroll_id).ok_or_else(|| {
            RepositoryError::from_status(
                404,
                "search_context_missing_exception: No search context found",
                "_scroll",
                scroll_id,
            )
        })?;

        let take = context.page_size.min(context.remaining.len());
        let hits: Vec<Hit> = context.remaining.drain(..take).collect();

        Ok(SearchResponse {
            total: context.total,
            hits,
            scroll_id: Some(scroll_id.to_string()),
            max_score: Some(1.0),
            ..SearchResponse::default()
        })
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "clear_scroll")?;
        state.scrolls.remove(scroll_id);
        Ok(())
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "refresh")?;
        state.indices.entry(index.to_string()).or_default().refresh();
        Ok(())
    }

    async fn count(&self, index: &str, query: Value) -> Result<u64> {
        let mut state = self.state.lock();
        Self::enter(&mut state, "count")?;

        let Some(index_state) = state.indices.get(index) else {
            return Ok(0);
        };

        let mut count = 0;
        for (id, entry) in &index_state.visible {
            if query.is_null() || matches(&query, id, &entry.source)? {
                count += 1;
            }
        }
        Ok(count)
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MemoryStore")
            .field("indices", &state.indices.keys().collect::<Vec<_>>())
            .field("open_scrolls", &state.scrolls.len())
            .field("offline", &state.offline)
            .finish()
    }
}

fn ack(index: &str, id: &str, applied: Applied) -> WriteAck {
    WriteAck {
        index: index.to_string(),
        id: id.to_string(),
        result: applied.result,
        version: Version::new(applied.seq_no, PRIMARY_TERM),
        doc_version: applied.doc_version,
    }
}

/// Recursive object merge used by partial updates.
fn merge(target: &mut Value, patch: &Value) {
    match (target, patch) {
        (Value::Object(target), Value::Object(patch)) => {
            for (key, value) in patch {
                match target.get_mut(key) {
                    Some(existing) if existing.is_object() && value.is_object() => {
                        merge(existing, value)
                    }
                    _ => {
                        target.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (target, patch) => *target = patch.clone(),
    }
}

fn to_hit(index: &str, id: &str, entry: &Entry, source_enabled: bool, body: &Value) -> Hit {
    let source = if source_enabled {
        filter_source(&entry.source, body.get("_source"))
    } else {
        None
    };

    Hit {
        index: index.to_string(),
        id: id.to_string(),
        score: Some(1.0),
        version: Some(Version::new(entry.seq_no, PRIMARY_TERM)),
        doc_version: Some(entry.doc_version),
        source,
        highlight: None,
        sort: None,
    }
}

fn filter_source(source: &Value, filter: Option<&Value>) -> Option<Value> {
    let names = |v: &Value| -> Vec<String> {
        match v {
            Value::String(s) => vec![s.clone()],
            Value::Array(items) => items
                .iter()
                .filter_map(|i| i.as_str().map(String::from))
                .collect(),
            _ => Vec::new(),
        }
    };

    let (includes, excludes) = match filter {
        None | Some(Value::Bool(true)) => return Some(source.clone()),
        Some(Value::Bool(false)) => return None,
        Some(Value::Object(paths)) => (
            paths.get("includes").map(names).unwrap_or_default(),
            paths.get("excludes").map(names).unwrap_or_default(),
        ),
        Some(other) => (names(other), Vec::new()),
    };

    let Value::Object(fields) = source else {
        return Some(source.clone());
    };

    let filtered: Map<String, Value> = fields
        .iter()
        .filter(|(k, _)| includes.is_empty() || includes.contains(k))
        .filter(|(k, _)| !excludes.contains(k))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    Some(Value::Object(filtered))
}

fn sort_entries(matched: &mut [(&String, &Entry)], sort: Option<&Value>) {
    let mut keys: Vec<(String, bool)> = Vec::new();
    let clauses = match sort {
        Some(Value::Array(clauses)) => clauses.clone(),
        Some(clause) => vec![clause.clone()],
        None => Vec::new(),
    };

    for clause in clauses {
        match clause {
            Value::String(field) => keys.push((field, false)),
            Value::Object(map) => {
                for (field, order) in map {
                    let order = order
                        .get("order")
                        .and_then(Value::as_str)
                        .or_else(|| order.as_str())
                        .unwrap_or("asc");
                    keys.push((field, order.eq_ignore_ascii_case("desc")));
                }
            }
            _ => {}
        }
    }

    matched.sort_by(|(a_id, a), (b_id, b)| {
        for (field, descending) in &keys {
            let ordering = match field.as_str() {
                "_id" => a_id.cmp(b_id),
                "_score" | "_doc" => Ordering::Equal,
                _ => compare(lookup(&a.source, field), lookup(&b.source, field)),
            };
            let ordering = if *descending {
                ordering.reverse()
            } else {
                ordering
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        a_id.cmp(b_id)
    });
}

/// Missing values sort last.
fn compare(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(a), Some(b)) => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn lookup<'a>(source: &'a Value, path: &str) -> Option<&'a Value> {
    path.split('.')
        .try_fold(source, |value, part| value.get(part))
        .filter(|v| !v.is_null())
}

/// Field value equals `expected`, or contains it when the field is an array.
fn field_equals(source: &Value, field: &str, expected: &Value) -> bool {
    match lookup(source, field) {
        Some(Value::Array(items)) => items.iter().any(|item| loose_eq(item, expected)),
        Some(value) => loose_eq(value, expected),
        None => false,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn tokens(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// Unwrap `{ field: value }` or `{ field: { key: value } }`.
fn single_field<'a>(clause: &'a Value, inner_key: &str) -> Result<(&'a str, &'a Value)> {
    let map = clause
        .as_object()
        .filter(|m| m.len() == 1)
        .ok_or_else(|| RepositoryError::validation(format!("malformed query clause: {}", clause)))?;
    let (field, value) = map.iter().next().ok_or_else(|| {
        RepositoryError::validation(format!("malformed query clause: {}", clause))
    })?;
    let value = match value {
        Value::Object(inner) => inner.get(inner_key).unwrap_or(value),
        _ => value,
    };
    Ok((field.as_str(), value))
}

fn clauses(value: Option<&Value>) -> Vec<&Value> {
    match value {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(value) => vec![value],
        None => Vec::new(),
    }
}

/// Evaluate the supported subset of the query DSL against one document.
fn matches(query: &Value, id: &str, source: &Value) -> Result<bool> {
    let map = query
        .as_object()
        .filter(|m| m.len() == 1)
        .ok_or_else(|| RepositoryError::validation(format!("malformed query: {}", query)))?;
    let Some((kind, clause)) = map.iter().next() else {
        return Err(RepositoryError::validation("empty query"));
    };

    match kind.as_str() {
        "match_all" => Ok(true),
        "match_none" => Ok(false),
        "ids" => Ok(clause["values"]
            .as_array()
            .is_some_and(|ids| ids.iter().any(|v| v.as_str() == Some(id)))),
        "term" => {
            let (field, value) = single_field(clause, "value")?;
            Ok(if field == "_id" {
                value.as_str() == Some(id)
            } else {
                field_equals(source, field, value)
            })
        }
        "terms" => {
            let (field, values) = single_field(clause, "")?;
            let values = values.as_array().ok_or_else(|| {
                RepositoryError::validation(format!("terms query needs an array: {}", clause))
            })?;
            Ok(values.iter().any(|v| field_equals(source, field, v)))
        }
        "match" => {
            let (field, value) = single_field(clause, "query")?;
            let wanted = match value {
                Value::String(s) => tokens(s),
                other => return Ok(field_equals(source, field, other)),
            };
            let have = match lookup(source, field) {
                Some(Value::String(s)) => tokens(s),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter_map(Value::as_str)
                    .flat_map(tokens)
                    .collect(),
                _ => Vec::new(),
            };
            Ok(wanted.iter().any(|t| have.contains(t)))
        }
        "exists" => {
            let field = clause["field"].as_str().ok_or_else(|| {
                RepositoryError::validation(format!("exists query needs a field: {}", clause))
            })?;
            Ok(lookup(source, field).is_some())
        }
        "range" => {
            let (field, bounds) = single_field(clause, "")?;
            let Some(value) = lookup(source, field) else {
                return Ok(false);
            };
            let check = |op: &str, accept: fn(Ordering) -> bool| {
                bounds
                    .get(op)
                    .map_or(true, |bound| compare_values(value, bound).is_some_and(accept))
            };
            Ok(check("gt", |o| o == Ordering::Greater)
                && check("gte", |o| o != Ordering::Less)
                && check("lt", |o| o == Ordering::Less)
                && check("lte", |o| o != Ordering::Greater))
        }
        "bool" => {
            let must = clauses(clause.get("must"))
                .into_iter()
                .chain(clauses(clause.get("filter")))
                .collect::<Vec<_>>();
            let should = clauses(clause.get("should"));
            let must_not = clauses(clause.get("must_not"));

            for q in &must {
                if !matches(q, id, source)? {
                    return Ok(false);
                }
            }
            for q in &must_not {
                if matches(q, id, source)? {
                    return Ok(false);
                }
            }
            if !should.is_empty() {
                let required = clause["minimum_should_match"]
                    .as_u64()
                    .unwrap_or(if must.is_empty() { 1 } else { 0 });
                let mut hits = 0;
                for q in &should {
                    if matches(q, id, source)? {
                        hits += 1;
                    }
                }
                return Ok(hits >= required);
            }
            Ok(true)
        }
        other => Err(RepositoryError::validation(format!(
            "query type [{}] is not supported by the memory store",
            other
        ))),
    }
}
