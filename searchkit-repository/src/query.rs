//! Minimal query DSL.
//!
//! Covers the clauses repositories need to drive search and that
//! [`MemoryStore`](crate::MemoryStore) can evaluate. Anything else can be
//! passed through [`Query::Raw`].

use serde_json::{Map, Value, json};

/// A query clause.
///
/// ```rust
/// use searchkit_repository::Query;
/// use serde_json::json;
///
/// let query = Query::bool()
///     .must(Query::matches("title", "rust"))
///     .filter(Query::range("views").gte(100))
///     .must_not(Query::term("status", "draft"))
///     .build();
///
/// assert_eq!(query.to_json()["bool"]["filter"][0], json!({ "range": { "views": { "gte": 100 } } }));
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Query {
    /// Match all documents.
    #[default]
    MatchAll,
    /// Full-text match.
    Match {
        /// Field to search.
        field: String,
        /// Text to look for.
        text: String,
    },
    /// Exact value.
    Term {
        /// Field name.
        field: String,
        /// Value to match.
        value: Value,
    },
    /// Any of several exact values.
    Terms {
        /// Field name.
        field: String,
        /// Accepted values.
        values: Vec<Value>,
    },
    /// Documents with one of the given IDs.
    Ids(Vec<String>),
    /// Range bounds on a field.
    Range(RangeQuery),
    /// Field has a value.
    Exists(String),
    /// Boolean combination.
    Bool(BoolQuery),
    /// Pre-rendered JSON clause.
    Raw(Value),
}

impl Query {
    /// Full-text match on a field.
    pub fn matches(field: impl Into<String>, text: impl Into<String>) -> Self {
        Self::Match {
            field: field.into(),
            text: text.into(),
        }
    }

    /// Exact match on a field.
    pub fn term(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Term {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Match any of the given values.
    pub fn terms<V: Into<Value>>(
        field: impl Into<String>,
        values: impl IntoIterator<Item = V>,
    ) -> Self {
        Self::Terms {
            field: field.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Match documents by ID.
    pub fn ids<I: Into<String>>(ids: impl IntoIterator<Item = I>) -> Self {
        Self::Ids(ids.into_iter().map(Into::into).collect())
    }

    /// Start a range query.
    pub fn range(field: impl Into<String>) -> RangeQuery {
        RangeQuery::new(field)
    }

    /// Field has a value.
    pub fn exists(field: impl Into<String>) -> Self {
        Self::Exists(field.into())
    }

    /// Start a bool query.
    pub fn bool() -> BoolQuery {
        BoolQuery::default()
    }

    /// Render as engine JSON.
    pub fn to_json(&self) -> Value {
        match self {
            Query::MatchAll => json!({ "match_all": {} }),
            Query::Match { field, text } => json!({ "match": { field: { "query": text } } }),
            Query::Term { field, value } => json!({ "term": { field: { "value": value } } }),
            Query::Terms { field, values } => json!({ "terms": { field: values } }),
            Query::Ids(ids) => json!({ "ids": { "values": ids } }),
            Query::Range(r) => r.to_json(),
            Query::Exists(field) => json!({ "exists": { "field": field } }),
            Query::Bool(b) => b.to_json(),
            Query::Raw(v) => v.clone(),
        }
    }
}

impl From<Query> for Value {
    fn from(query: Query) -> Self {
        query.to_json()
    }
}

impl From<RangeQuery> for Query {
    fn from(range: RangeQuery) -> Self {
        Query::Range(range)
    }
}

impl From<BoolQuery> for Query {
    fn from(bool_query: BoolQuery) -> Self {
        Query::Bool(bool_query)
    }
}

/// Range query for numeric, string or date bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct RangeQuery {
    /// Field name.
    pub field: String,
    /// Greater than.
    pub gt: Option<Value>,
    /// Greater than or equal.
    pub gte: Option<Value>,
    /// Less than.
    pub lt: Option<Value>,
    /// Less than or equal.
    pub lte: Option<Value>,
}

impl RangeQuery {
    /// Create an unbounded range on a field.
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            gt: None,
            gte: None,
            lt: None,
            lte: None,
        }
    }

    /// Set greater than.
    pub fn gt(mut self, value: impl Into<Value>) -> Self {
        self.gt = Some(value.into());
        self
    }

    /// Set greater than or equal.
    pub fn gte(mut self, value: impl Into<Value>) -> Self {
        self.gte = Some(value.into());
        self
    }

    /// Set less than.
    pub fn lt(mut self, value: impl Into<Value>) -> Self {
        self.lt = Some(value.into());
        self
    }

    /// Set less than or equal.
    pub fn lte(mut self, value: impl Into<Value>) -> Self {
        self.lte = Some(value.into());
        self
    }

    fn to_json(&self) -> Value {
        let bounds: Map<String, Value> = [
            ("gt", &self.gt),
            ("gte", &self.gte),
            ("lt", &self.lt),
            ("lte", &self.lte),
        ]
        .into_iter()
        .filter_map(|(op, v)| v.as_ref().map(|v| (op.to_string(), v.clone())))
        .collect();

        json!({ "range": { &self.field: bounds } })
    }
}

/// Boolean combination of clauses.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BoolQuery {
    /// Must match (AND).
    pub must: Vec<Query>,
    /// Must match, without scoring.
    pub filter: Vec<Query>,
    /// Should match (OR).
    pub should: Vec<Query>,
    /// Must not match (NOT).
    pub must_not: Vec<Query>,
    /// Minimum number of `should` clauses that have to match.
    pub minimum_should_match: Option<u32>,
}

impl BoolQuery {
    /// Add a must clause.
    pub fn must(mut self, query: impl Into<Query>) -> Self {
        self.must.push(query.into());
        self
    }

    /// Add a filter clause.
    pub fn filter(mut self, query: impl Into<Query>) -> Self {
        self.filter.push(query.into());
        self
    }

    /// Add a should clause.
    pub fn should(mut self, query: impl Into<Query>) -> Self {
        self.should.push(query.into());
        self
    }

    /// Add a must_not clause.
    pub fn must_not(mut self, query: impl Into<Query>) -> Self {
        self.must_not.push(query.into());
        self
    }

    /// Set minimum should match.
    pub fn minimum_should_match(mut self, min: u32) -> Self {
        self.minimum_should_match = Some(min);
        self
    }

    /// Finish the bool query.
    pub fn build(self) -> Query {
        Query::Bool(self)
    }

    fn to_json(&self) -> Value {
        let mut clauses = Map::new();

        for (name, queries) in [
            ("must", &self.must),
            ("filter", &self.filter),
            ("should", &self.should),
            ("must_not", &self.must_not),
        ] {
            if !queries.is_empty() {
                clauses.insert(
                    name.to_string(),
                    Value::Array(queries.iter().map(Query::to_json).collect()),
                );
            }
        }
        if let Some(min) = self.minimum_should_match {
            clauses.insert("minimum_should_match".to_string(), json!(min));
        }

        json!({ "bool": clauses })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_queries() {
        assert_eq!(Query::MatchAll.to_json(), json!({ "match_all": {} }));
        assert_eq!(
            Query::matches("title", "rust").to_json(),
            json!({ "match": { "title": { "query": "rust" } } })
        );
        assert_eq!(
            Query::term("status", "published").to_json(),
            json!({ "term": { "status": { "value": "published" } } })
        );
        assert_eq!(
            Query::terms("tag", ["a", "b"]).to_json(),
            json!({ "terms": { "tag": ["a", "b"] } })
        );
        assert_eq!(
            Query::ids(["1", "2"]).to_json(),
            json!({ "ids": { "values": ["1", "2"] } })
        );
        assert_eq!(
            Query::exists("author").to_json(),
            json!({ "exists": { "field": "author" } })
        );
    }

    #[test]
    fn test_range_only_renders_set_bounds() {
        let query: Query = Query::range("price").gte(10).lt(20).into();
        assert_eq!(
            query.to_json(),
            json!({ "range": { "price": { "gte": 10, "lt": 20 } } })
        );
    }

    #[test]
    fn test_bool_query() {
        let query = Query::bool()
            .must(Query::matches("title", "search"))
            .should(Query::term("tag", "rust"))
            .minimum_should_match(1)
            .build();

        let json = query.to_json();
        assert_eq!(json["bool"]["must"].as_array().unwrap().len(), 1);
        assert_eq!(json["bool"]["minimum_should_match"], 1);
        assert!(json["bool"].get("must_not").is_none());
    }

    #[test]
    fn test_raw_passthrough() {
        let raw = json!({ "fuzzy": { "title": "rsut" } });
        assert_eq!(Query::Raw(raw.clone()).to_json(), raw);
    }
}
