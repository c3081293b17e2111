use serde::Deserialize;

use crate::{Error, Result};

/// Raw document exchanged with a [`CounterStore`].
///
/// Stores are schemaless, so what comes back from a lookup is not guaranteed
/// to have the counter shape. [`Counter::from_document`] is the single place
/// where a raw document is validated.
///
/// [`CounterStore`]: crate::CounterStore
pub type Document = serde_json::Value;

/// Persisted high-water mark for one named identifier sequence.
///
/// Stored as `{"name": <string>, "value": <i64>}`; see [`Counter::to_document`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct Counter {
    /// Key distinguishing this counter within its collection.
    pub name: String,
    /// Highest identifier already handed out.
    pub value: i64,
}

impl Counter {
    pub const NAME_FIELD: &'static str = "name";
    pub const VALUE_FIELD: &'static str = "value";

    pub fn new(name: impl Into<String>, value: i64) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn to_document(&self) -> Document {
        let mut fields = serde_json::Map::with_capacity(2);
        fields.insert(Self::NAME_FIELD.to_owned(), Document::from(self.name.as_str()));
        fields.insert(Self::VALUE_FIELD.to_owned(), Document::from(self.value));
        Document::Object(fields)
    }

    /// Validates a raw document found under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CorruptState`] if the document is not an object, its
    /// `name` does not match, or its `value` is missing or not a 64-bit
    /// integer.
    pub fn from_document(name: &str, doc: &Document) -> Result<Self> {
        let fields = doc
            .as_object()
            .ok_or_else(|| Error::corrupt(name, "document is not an object"))?;

        match fields.get(Self::NAME_FIELD).and_then(Document::as_str) {
            Some(stored) if stored == name => {}
            Some(stored) => {
                return Err(Error::corrupt(
                    name,
                    format!("document belongs to counter `{stored}`"),
                ));
            }
            None => return Err(Error::corrupt(name, "missing or non-string `name` field")),
        }

        let value = fields
            .get(Self::VALUE_FIELD)
            .ok_or_else(|| Error::corrupt(name, "missing `value` field"))?;
        let value = value.as_i64().ok_or_else(|| {
            Error::corrupt(name, format!("`value` is not a 64-bit integer: {value}"))
        })?;

        Ok(Self::new(name, value))
    }
}

impl From<&Counter> for Document {
    fn from(counter: &Counter) -> Self {
        counter.to_document()
    }
}
