//! Work-item documents and the frames that carry them through a processor.
//!
//! A [`Document`] is an ordered JSON object. Attributes are addressed with
//! dotted key paths (`source.path`, `analysis.labels`), creating intermediate
//! objects on write.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Arbitrary nested metadata attached to one work item.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Document(Map<String, Value>);

impl Document {
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// The `id` attribute, if it is a string.
    pub fn id(&self) -> Option<&str> {
        self.0.get("id").and_then(Value::as_str)
    }

    /// Source location of the item: top-level `uri`, else `source.path`.
    pub fn uri(&self) -> Option<&str> {
        self.0
            .get("uri")
            .and_then(Value::as_str)
            .or_else(|| self.get_attr("source.path").and_then(Value::as_str))
    }

    /// Look up a dotted key path.
    pub fn get_attr(&self, path: &str) -> Option<&Value> {
        let mut parts = path.split('.');
        let first = parts.next()?;
        let mut current = self.0.get(first)?;
        for part in parts {
            current = current.as_object()?.get(part)?;
        }
        Some(current)
    }

    /// Look up a dotted key path and deserialize it into `T`.
    ///
    /// Returns `None` if the path is absent or the value has the wrong shape.
    pub fn get_attr_as<T: DeserializeOwned>(&self, path: &str) -> Option<T> {
        self.get_attr(path)
            .and_then(|value| serde_json::from_value(value.clone()).ok())
    }

    pub fn attr_exists(&self, path: &str) -> bool {
        self.get_attr(path).is_some()
    }

    /// Set a dotted key path, replacing any non-object value found on the way.
    pub fn set_attr(&mut self, path: &str, value: impl Into<Value>) {
        if let Some((parent, last)) = self.parent_mut(path) {
            parent.insert(last.to_string(), value.into());
        }
    }

    /// Remove a dotted key path, returning the removed value.
    pub fn del_attr(&mut self, path: &str) -> Option<Value> {
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop()?;
        let mut current = &mut self.0;
        for part in parts {
            current = current.get_mut(part)?.as_object_mut()?;
        }
        current.remove(last)
    }

    /// Append `values` to the list at a dotted key path and return its new
    /// length.
    ///
    /// An absent path becomes a new list. A scalar or object already stored
    /// there becomes the first element of the list.
    pub fn extend_attr<I>(&mut self, path: &str, values: I) -> usize
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        let Some((parent, last)) = self.parent_mut(path) else {
            return 0;
        };
        let slot = parent.entry(last.to_string()).or_insert(Value::Null);
        if !slot.is_array() {
            *slot = match slot.take() {
                Value::Null => Value::Array(Vec::new()),
                other => Value::Array(vec![other]),
            };
        }
        let Value::Array(list) = slot else {
            return 0;
        };
        list.extend(values.into_iter().map(Into::into));
        list.len()
    }

    /// The object holding the last segment of `path`, created on the way.
    fn parent_mut<'p>(&mut self, path: &'p str) -> Option<(&mut Map<String, Value>, &'p str)> {
        let mut parts: Vec<&str> = path.split('.').collect();
        let last = parts.pop()?;
        let mut current = &mut self.0;
        for part in parts {
            let slot = current
                .entry(part.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if !slot.is_object() {
                *slot = Value::Object(Map::new());
            }
            let Value::Object(map) = slot else {
                return None;
            };
            current = map;
        }
        Some((current, last))
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn into_map(self) -> Map<String, Value> {
        self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<Map<String, Value>> for Document {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl From<Document> for Value {
    fn from(document: Document) -> Self {
        Value::Object(document.0)
    }
}

/// One unit of work: a mutable document plus the transient skip flag.
///
/// `skip` is set only after an unrecoverable processor failure and tells the
/// host to leave the document out of downstream aggregation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub document: Document,
    pub skip: bool,
}

impl Frame {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            skip: false,
        }
    }

    pub fn into_document(self) -> Document {
        self.document
    }
}
