//! The store seam: the handful of primitives repositories are built on.
//!
//! [`Store`] is implemented by [`OpenSearchStore`](crate::OpenSearchStore)
//! for a real cluster and by [`MemoryStore`](crate::MemoryStore) for tests
//! and embedded use. Request and response types here mirror the engine's
//! wire format closely enough that both implementations share the JSON
//! parsing helpers.

use crate::document::{Version, WriteAck, WriteResult};
use crate::error::{RepositoryError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// Raw document as returned by a get.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Index name.
    pub index: String,
    /// Document ID.
    pub id: String,
    /// Concurrency token.
    pub version: Version,
    /// Engine document counter.
    pub doc_version: i64,
    /// `_source`, absent when source storage is disabled.
    pub source: Option<Value>,
}

/// Whether an index request may overwrite an existing document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or replace.
    Index,
    /// Create only; fails with a conflict when the ID exists.
    Create,
}

/// Single-document index request.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexRequest {
    /// Document ID.
    pub id: String,
    /// Document source.
    pub source: Value,
    /// Index or create.
    pub mode: WriteMode,
    /// Only write if the stored document still has this version.
    pub if_version: Option<Version>,
    /// Wait for the write to become searchable.
    pub refresh: bool,
}

/// Single-document delete request.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteRequest {
    /// Document ID.
    pub id: String,
    /// Only delete if the stored document still has this version.
    pub if_version: Option<Version>,
    /// Wait for the delete to become visible to search.
    pub refresh: bool,
}

/// Kind of a bulk action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BulkActionKind {
    /// Create or replace.
    Index,
    /// Create only.
    Create,
    /// Partial update.
    Update,
    /// Delete.
    Delete,
}

impl BulkActionKind {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }

    const ALL: [BulkActionKind; 4] = [Self::Index, Self::Create, Self::Update, Self::Delete];
}

/// One serialized bulk action.
#[derive(Debug, Clone, PartialEq)]
pub enum BulkAction {
    /// Create or replace a document.
    Index {
        /// Document ID.
        id: String,
        /// Document source.
        source: Value,
        /// Expected version.
        if_version: Option<Version>,
    },
    /// Create a document (fail if exists).
    Create {
        /// Document ID.
        id: String,
        /// Document source.
        source: Value,
    },
    /// Merge fields into an existing document.
    Update {
        /// Document ID.
        id: String,
        /// Partial document.
        doc: Value,
        /// Expected version.
        if_version: Option<Version>,
    },
    /// Delete a document.
    Delete {
        /// Document ID.
        id: String,
        /// Expected version.
        if_version: Option<Version>,
    },
}

impl BulkAction {
    /// Kind of this action.
    pub fn kind(&self) -> BulkActionKind {
        match self {
            Self::Index { .. } => BulkActionKind::Index,
            Self::Create { .. } => BulkActionKind::Create,
            Self::Update { .. } => BulkActionKind::Update,
            Self::Delete { .. } => BulkActionKind::Delete,
        }
    }

    /// Target document ID.
    pub fn id(&self) -> &str {
        match self {
            Self::Index { id, .. }
            | Self::Create { id, .. }
            | Self::Update { id, .. }
            | Self::Delete { id, .. } => id,
        }
    }

    /// Expected version, if any.
    pub fn if_version(&self) -> Option<Version> {
        match self {
            Self::Index { if_version, .. }
            | Self::Update { if_version, .. }
            | Self::Delete { if_version, .. } => *if_version,
            Self::Create { .. } => None,
        }
    }

    /// NDJSON lines for this action: the metadata line and, except for
    /// deletes, the payload line.
    pub fn to_lines(&self, index: &str) -> Vec<Value> {
        let header = self.header(index);
        match self {
            Self::Index { source, .. } | Self::Create { source, .. } => {
                vec![header, source.clone()]
            }
            Self::Update { doc, .. } => vec![header, json!({ "doc": doc })],
            Self::Delete { .. } => vec![header],
        }
    }

    /// Size in bytes this action adds to a bulk body.
    ///
    /// The payload is measured in place, without copying or buffering it.
    pub fn estimated_size(&self, index: &str) -> usize {
        let header = encoded_len(&self.header(index)) + 1;
        match self {
            Self::Index { source, .. } | Self::Create { source, .. } => {
                header + encoded_len(source) + 1
            }
            // `{"doc":` plus the closing brace
            Self::Update { doc, .. } => header + encoded_len(doc) + 9,
            Self::Delete { .. } => header,
        }
    }

    fn header(&self, index: &str) -> Value {
        let mut meta = json!({ "_index": index, "_id": self.id() });
        if let Some(version) = self.if_version() {
            meta["if_seq_no"] = json!(version.seq_no);
            meta["if_primary_term"] = json!(version.primary_term);
        }
        json!({ self.kind().as_str(): meta })
    }
}

/// Length of the compact JSON encoding of `value`.
fn encoded_len(value: &Value) -> usize {
    struct Counter(usize);

    impl std::io::Write for Counter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0 += buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    let mut counter = Counter(0);
    // Serializing a `Value` into a writer that never fails cannot fail.
    let _ = serde_json::to_writer(&mut counter, value);
    counter.0
}

/// Error reported for one bulk item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkItemError {
    /// Error type, such as `version_conflict_engine_exception`.
    #[serde(rename = "type")]
    pub error_type: String,
    /// Error reason.
    pub reason: String,
}

/// Per-item result of a bulk request.
#[derive(Debug, Clone, PartialEq)]
pub struct BulkItemResponse {
    /// Kind of the action this answers.
    pub kind: BulkActionKind,
    /// Document ID.
    pub id: String,
    /// HTTP status of the item.
    pub status: u16,
    /// Write result on success.
    pub result: Option<WriteResult>,
    /// Version after the write.
    pub version: Option<Version>,
    /// Engine document counter after the write.
    pub doc_version: Option<i64>,
    /// Error details on failure.
    pub error: Option<BulkItemError>,
}

impl BulkItemResponse {
    /// Check if the operation was successful.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status) && self.error.is_none()
    }

    /// Classify this item into an acknowledgement or an error.
    pub fn into_result(self, index: &str) -> Result<WriteAck> {
        if self.is_success() {
            return Ok(WriteAck {
                index: index.to_string(),
                id: self.id,
                result: self.result.unwrap_or(WriteResult::Noop),
                version: self.version.unwrap_or(Version::new(-1, 0)),
                doc_version: self.doc_version.unwrap_or(0),
            });
        }

        let reason = self
            .error
            .map(|e| format!("{}: {}", e.error_type, e.reason))
            .unwrap_or_else(|| format!("status {}", self.status));
        Err(RepositoryError::from_status(self.status, reason, index, &self.id))
    }

    /// Parse one entry of the `items` array of a bulk response.
    pub fn from_json(item: &Value) -> Result<Self> {
        let (kind, body) = BulkActionKind::ALL
            .iter()
            .find_map(|kind| item.get(kind.as_str()).map(|body| (*kind, body)))
            .ok_or_else(|| {
                RepositoryError::Server {
                    status: 500,
                    reason: format!("unrecognised bulk item: {}", item),
                }
            })?;

        let error = match body.get("error") {
            Some(Value::Object(_)) => Some(serde_json::from_value(body["error"].clone())?),
            Some(Value::String(reason)) => Some(BulkItemError {
                error_type: "error".to_string(),
                reason: reason.clone(),
            }),
            _ => None,
        };

        Ok(Self {
            kind,
            id: body["_id"].as_str().unwrap_or_default().to_string(),
            status: body["status"].as_u64().unwrap_or(500) as u16,
            result: body["result"].as_str().and_then(WriteResult::parse),
            version: version_of(body),
            doc_version: body["_version"].as_i64(),
            error,
        })
    }
}

/// Whether a total hit count is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TotalRelation {
    /// Exact.
    #[default]
    Eq,
    /// Lower bound.
    Gte,
}

/// Raw search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Hit {
    /// Index name.
    pub index: String,
    /// Document ID.
    pub id: String,
    /// Relevance score.
    pub score: Option<f64>,
    /// Concurrency token, when requested.
    pub version: Option<Version>,
    /// Engine document counter, when requested.
    pub doc_version: Option<i64>,
    /// `_source`, absent when disabled or filtered out.
    pub source: Option<Value>,
    /// Highlighted fragments per field.
    pub highlight: Option<HashMap<String, Vec<String>>>,
    /// Sort values.
    pub sort: Option<Vec<Value>>,
}

impl Hit {
    /// Parse one entry of `hits.hits`.
    pub fn from_json(hit: &Value) -> Self {
        let highlight = hit["highlight"].as_object().map(|h| {
            h.iter()
                .map(|(field, fragments)| {
                    let fragments = fragments
                        .as_array()
                        .map(|a| {
                            a.iter()
                                .filter_map(|s| s.as_str().map(String::from))
                                .collect()
                        })
                        .unwrap_or_default();
                    (field.clone(), fragments)
                })
                .collect()
        });

        Self {
            index: hit["_index"].as_str().unwrap_or_default().to_string(),
            id: hit["_id"].as_str().unwrap_or_default().to_string(),
            score: hit["_score"].as_f64(),
            version: version_of(hit),
            doc_version: hit["_version"].as_i64(),
            source: hit.get("_source").filter(|s| !s.is_null()).cloned(),
            highlight,
            sort: hit["sort"].as_array().cloned(),
        }
    }
}

/// Raw search or scroll response.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SearchResponse {
    /// Time taken in milliseconds.
    pub took_ms: u64,
    /// Total matching documents.
    pub total: u64,
    /// Whether `total` is exact.
    pub total_relation: TotalRelation,
    /// Maximum score.
    pub max_score: Option<f64>,
    /// Hits of this page.
    pub hits: Vec<Hit>,
    /// Cursor for the next page, for scroll requests.
    pub scroll_id: Option<String>,
    /// Aggregation results.
    pub aggregations: Option<Value>,
}

impl SearchResponse {
    /// Parse a search response body.
    pub fn from_json(body: &Value) -> Self {
        let total = &body["hits"]["total"];
        // Older engines report the total as a bare number.
        let (total, total_relation) = match total.as_u64() {
            Some(n) => (n, TotalRelation::Eq),
            None => (
                total["value"].as_u64().unwrap_or(0),
                match total["relation"].as_str() {
                    Some("gte") => TotalRelation::Gte,
                    _ => TotalRelation::Eq,
                },
            ),
        };

        Self {
            took_ms: body["took"].as_u64().unwrap_or(0),
            total,
            total_relation,
            max_score: body["hits"]["max_score"].as_f64(),
            hits: body["hits"]["hits"]
                .as_array()
                .map(|hits| hits.iter().map(Hit::from_json).collect())
                .unwrap_or_default(),
            scroll_id: body["_scroll_id"].as_str().map(String::from),
            aggregations: body.get("aggregations").cloned(),
        }
    }
}

pub(crate) fn version_of(body: &Value) -> Option<Version> {
    match (body["_seq_no"].as_i64(), body["_primary_term"].as_i64()) {
        (Some(seq_no), Some(primary_term)) => Some(Version::new(seq_no, primary_term)),
        _ => None,
    }
}

/// Render a keep-alive duration in the engine's time unit syntax.
pub(crate) fn keep_alive_param(keep_alive: Duration) -> String {
    format!("{}ms", keep_alive.as_millis().max(1))
}

/// Primitive operations of a document store.
///
/// Implementations must map failures onto [`RepositoryError`]: a missing
/// document is `NotFound`, a failed compare-and-write is `VersionConflict`,
/// a rejected request is `Validation`, an unreachable store is
/// `Transport`. Per-item bulk failures are reported in the returned items,
/// not as an `Err`.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    /// Real-time get by ID.
    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>>;

    /// Index or create a document.
    async fn index(&self, index: &str, request: IndexRequest) -> Result<WriteAck>;

    /// Delete a document.
    async fn delete(&self, index: &str, request: DeleteRequest) -> Result<WriteAck>;

    /// Execute actions as one bulk request. Returns one item per action,
    /// in order.
    async fn bulk(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: bool,
    ) -> Result<Vec<BulkItemResponse>>;

    /// Run a search. With `scroll` set, also opens a cursor.
    async fn search(
        &self,
        index: &str,
        body: Value,
        scroll: Option<Duration>,
    ) -> Result<SearchResponse>;

    /// Fetch the next page of a cursor.
    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse>;

    /// Release a cursor.
    async fn clear_scroll(&self, scroll_id: &str) -> Result<()>;

    /// Make recent writes searchable.
    async fn refresh(&self, index: &str) -> Result<()>;

    /// Count documents matching a query.
    async fn count(&self, index: &str, query: Value) -> Result<u64>;
}

#[async_trait]
impl<S: Store + ?Sized> Store for Arc<S> {
    async fn get(&self, index: &str, id: &str) -> Result<Option<StoredDocument>> {
        (**self).get(index, id).await
    }

    async fn index(&self, index: &str, request: IndexRequest) -> Result<WriteAck> {
        (**self).index(index, request).await
    }

    async fn delete(&self, index: &str, request: DeleteRequest) -> Result<WriteAck> {
        (**self).delete(index, request).await
    }

    async fn bulk(
        &self,
        index: &str,
        actions: &[BulkAction],
        refresh: bool,
    ) -> Result<Vec<BulkItemResponse>> {
        (**self).bulk(index, actions, refresh).await
    }

    async fn search(
        &self,
        index: &str,
        body: Value,
        scroll: Option<Duration>,
    ) -> Result<SearchResponse> {
        (**self).search(index, body, scroll).await
    }

    async fn scroll(&self, scroll_id: &str, keep_alive: Duration) -> Result<SearchResponse> {
        (**self).scroll(scroll_id, keep_alive).await
    }

    async fn clear_scroll(&self, scroll_id: &str) -> Result<()> {
        (**self).clear_scroll(scroll_id).await
    }

    async fn refresh(&self, index: &str) -> Result<()> {
        (**self).refresh(index).await
    }

    async fn count(&self, index: &str, query: Value) -> Result<u64> {
        (**self).count(index, query).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bulk_lines_carry_version() {
        let action = BulkAction::Update {
            id: "7".to_string(),
            doc: json!({ "views": 3 }),
            if_version: Some(Version::new(12, 2)),
        };

        let lines = action.to_lines("articles");
        assert_eq!(
            lines[0],
            json!({ "update": { "_index": "articles", "_id": "7", "if_seq_no": 12, "if_primary_term": 2 } })
        );
        assert_eq!(lines[1], json!({ "doc": { "views": 3 } }));

        let delete = BulkAction::Delete {
            id: "7".to_string(),
            if_version: None,
        };
        assert_eq!(delete.to_lines("articles").len(), 1);
        assert!(delete.estimated_size("articles") > 0);
    }

    #[test]
    fn test_estimated_size_matches_ndjson_body() {
        let actions = [
            BulkAction::Index {
                id: "1".to_string(),
                source: json!({ "title": "caf\u{e9} \"quoted\"", "tags": ["a", "b"] }),
                if_version: Some(Version::new(4, 1)),
            },
            BulkAction::Create {
                id: "2".to_string(),
                source: json!({ "n": 1 }),
            },
            BulkAction::Update {
                id: "3".to_string(),
                doc: json!({ "views": 3 }),
                if_version: None,
            },
            BulkAction::Delete {
                id: "4".to_string(),
                if_version: None,
            },
        ];

        for action in &actions {
            let body: usize = action
                .to_lines("articles")
                .iter()
                .map(|line| line.to_string().len() + 1)
                .sum();
            assert_eq!(action.estimated_size("articles"), body, "{:?}", action.kind());
        }
    }

    #[test]
    fn test_bulk_item_parse_and_classify() {
        let ok = BulkItemResponse::from_json(&json!({
            "index": { "_index": "a", "_id": "1", "_version": 2, "result": "updated",
                       "_seq_no": 5, "_primary_term": 1, "status": 200 }
        }))
        .unwrap();
        assert!(ok.is_success());
        let ack = ok.into_result("a").unwrap();
        assert_eq!(ack.result, WriteResult::Updated);
        assert_eq!(ack.version, Version::new(5, 1));

        let conflict = BulkItemResponse::from_json(&json!({
            "update": { "_index": "a", "_id": "2", "status": 409,
                        "error": { "type": "version_conflict_engine_exception", "reason": "stale" } }
        }))
        .unwrap();
        assert_eq!(conflict.kind, BulkActionKind::Update);
        assert!(conflict.into_result("a").unwrap_err().is_conflict());

        let invalid = BulkItemResponse::from_json(&json!({
            "create": { "_index": "a", "_id": "3", "status": 400,
                        "error": { "type": "mapper_parsing_exception", "reason": "bad field" } }
        }))
        .unwrap();
        assert!(matches!(
            invalid.into_result("a"),
            Err(RepositoryError::Validation(reason)) if reason.contains("mapper_parsing_exception")
        ));

        assert!(BulkItemResponse::from_json(&json!({ "upsert": {} })).is_err());
    }

    #[test]
    fn test_search_response_parse() {
        let response = SearchResponse::from_json(&json!({
            "took": 4,
            "_scroll_id": "c1",
            "hits": {
                "total": { "value": 12, "relation": "gte" },
                "max_score": 1.5,
                "hits": [
                    { "_index": "a", "_id": "1", "_score": 1.5, "_seq_no": 3, "_primary_term": 1,
                      "_source": { "title": "x" }, "highlight": { "title": ["<em>x</em>"] } },
                    { "_index": "a", "_id": "2", "_score": 0.5 }
                ]
            }
        }));

        assert_eq!(response.total, 12);
        assert_eq!(response.total_relation, TotalRelation::Gte);
        assert_eq!(response.scroll_id.as_deref(), Some("c1"));
        assert_eq!(response.hits.len(), 2);
        assert_eq!(response.hits[0].version, Some(Version::new(3, 1)));
        assert_eq!(response.hits[0].highlight.as_ref().unwrap()["title"], vec!["<em>x</em>"]);
        assert!(response.hits[1].source.is_none());

        let legacy = SearchResponse::from_json(&json!({ "hits": { "total": 3, "hits": [] } }));
        assert_eq!(legacy.total, 3);
        assert_eq!(legacy.total_relation, TotalRelation::Eq);
    }

    #[test]
    fn test_keep_alive_param() {
        assert_eq!(keep_alive_param(Duration::from_secs(60)), "60000ms");
        assert_eq!(keep_alive_param(Duration::ZERO), "1ms");
    }
}
