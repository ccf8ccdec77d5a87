//! Conversion between typed documents and their JSON source.

use crate::error::{RepositoryError, Result};
use serde::de::{self, DeserializeOwned, Deserializer};
use serde::ser::{self, Serializer as SerdeSerializer};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Bidirectional mapping between `T` and the `_source` JSON of a document.
///
/// Repositories take the serializer as a type parameter, so a custom one
/// can add field renames, encryption, or schema migrations without touching
/// the document type.
pub trait Serializer<T>: Send + Sync + 'static {
    /// Convert a document into its JSON source.
    fn to_source(&self, value: &T) -> Result<Value>;

    /// Build a document from its JSON source.
    fn from_source(&self, source: Value) -> Result<T>;
}

/// Default serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl<T> Serializer<T> for JsonSerializer
where
    T: Serialize + DeserializeOwned,
{
    fn to_source(&self, value: &T) -> Result<Value> {
        let source = serde_json::to_value(value)?;
        if !source.is_object() {
            return Err(RepositoryError::Serialization(format!(
                "document source must be a JSON object, got {}",
                kind(&source)
            )));
        }
        Ok(source)
    }

    fn from_source(&self, source: Value) -> Result<T> {
        Ok(serde_json::from_value(source)?)
    }
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// A typed document plus free-form extension fields.
///
/// The typed part is serialized as usual and the extension map is merged
/// into the same JSON object. On the way back, every key the typed part
/// does not emit lands in `extensions`. An extension key that collides
/// with a typed field is a serialization error.
///
/// ```rust
/// use searchkit_repository::Extensible;
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Debug, Serialize, Deserialize)]
/// struct Article {
///     title: String,
/// }
///
/// let mut doc = Extensible::new(Article { title: "Hi".into() });
/// doc.extensions.insert("legacy_rank".into(), 3.into());
///
/// let json = serde_json::to_value(&doc).unwrap();
/// assert_eq!(json["title"], "Hi");
/// assert_eq!(json["legacy_rank"], 3);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Extensible<T> {
    /// The typed part of the document.
    pub core: T,
    /// Fields the typed part does not know about.
    pub extensions: Map<String, Value>,
}

impl<T> Extensible<T> {
    /// Wrap a typed value with no extensions.
    pub fn new(core: T) -> Self {
        Self {
            core,
            extensions: Map::new(),
        }
    }

    /// Add an extension field.
    pub fn with_extension(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extensions.insert(key.into(), value.into());
        self
    }

    /// Look up an extension field.
    pub fn extension(&self, key: &str) -> Option<&Value> {
        self.extensions.get(key)
    }
}

impl<T: Serialize> Serialize for Extensible<T> {
    fn serialize<S: SerdeSerializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut merged = match serde_json::to_value(&self.core).map_err(ser::Error::custom)? {
            Value::Object(map) => map,
            other => {
                return Err(ser::Error::custom(format!(
                    "extensible core must serialize to an object, got {}",
                    kind(&other)
                )));
            }
        };

        for (key, value) in &self.extensions {
            if merged.contains_key(key) {
                return Err(ser::Error::custom(format!(
                    "extension field `{}` shadows a typed field",
                    key
                )));
            }
            merged.insert(key.clone(), value.clone());
        }

        merged.serialize(serializer)
    }
}

impl<'de, T> Deserialize<'de> for Extensible<T>
where
    T: Serialize + DeserializeOwned,
{
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut source = Map::<String, Value>::deserialize(deserializer)?;
        let core: T =
            serde_json::from_value(Value::Object(source.clone())).map_err(de::Error::custom)?;

        // Drop every key the typed part accounts for; the rest are extensions.
        if let Value::Object(known) = serde_json::to_value(&core).map_err(de::Error::custom)? {
            for key in known.keys() {
                source.remove(key);
            }
        }

        Ok(Self {
            core,
            extensions: source,
        })
    }
}
