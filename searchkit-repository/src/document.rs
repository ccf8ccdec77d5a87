//! Document trait, version metadata and write acknowledgements.

use serde::{Deserialize, Serialize};

/// Trait for types stored in a known index.
///
/// Implementing it lets a repository be created without spelling the
/// index name at every call site.
///
/// # Example
///
/// ```rust
/// use searchkit_repository::Document;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Product {
///     name: String,
///     price: f64,
/// }
///
/// impl Document for Product {
///     fn index_name() -> &'static str {
///         "products"
///     }
/// }
/// ```
pub trait Document: Send + Sync {
    /// Returns the default index name for this document type.
    fn index_name() -> &'static str;
}

/// Optimistic concurrency token: the sequence number and primary term a
/// document had when it was read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Version {
    /// Sequence number (`_seq_no`).
    pub seq_no: i64,
    /// Primary term (`_primary_term`).
    pub primary_term: i64,
}

impl Version {
    /// Create a version token.
    pub fn new(seq_no: i64, primary_term: i64) -> Self {
        Self {
            seq_no,
            primary_term,
        }
    }
}

/// A typed document together with the version it was read at.
#[derive(Debug, Clone, PartialEq)]
pub struct VersionedDocument<T> {
    /// Document ID.
    pub id: String,
    /// Index name.
    pub index: String,
    /// Concurrency token to pass back on write.
    pub version: Version,
    /// Engine document counter (`_version`).
    pub doc_version: i64,
    /// The document data.
    pub doc: T,
}

impl<T> VersionedDocument<T> {
    /// Consume and return the payload.
    pub fn into_inner(self) -> T {
        self.doc
    }

    /// Map the payload, keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> VersionedDocument<U> {
        VersionedDocument {
            id: self.id,
            index: self.index,
            version: self.version,
            doc_version: self.doc_version,
            doc: f(self.doc),
        }
    }
}

/// Outcome reported by the store for a successful write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteResult {
    /// A new document was created.
    Created,
    /// An existing document was replaced or merged.
    Updated,
    /// The document was deleted.
    Deleted,
    /// The write did not change anything.
    Noop,
    /// The target document did not exist.
    NotFound,
}

impl WriteResult {
    /// Parse the `result` field of a write response.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "created" => Some(Self::Created),
            "updated" => Some(Self::Updated),
            "deleted" => Some(Self::Deleted),
            "noop" => Some(Self::Noop),
            "not_found" => Some(Self::NotFound),
            _ => None,
        }
    }
}

/// Acknowledgement of a single-document write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteAck {
    /// Index name.
    pub index: String,
    /// Document ID.
    pub id: String,
    /// What the write did.
    pub result: WriteResult,
    /// Version the document has after the write.
    pub version: Version,
    /// Engine document counter (`_version`).
    pub doc_version: i64,
}
