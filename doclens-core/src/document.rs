//! Records and the converters that map them to and from wire documents.
//!
//! A [`Record`] is a domain entity with exactly one primary key. A [`Converter`] is the
//! bidirectional mapping between a record type and its [`bson::Document`] form. Converters
//! can be derived from a type's serde shape with [`SerdeConverter`], or written by hand with
//! the [`encode`] and [`decode`] helpers; both report decode failures through
//! [`DocumentStoreError::Decode`] naming the offending field.
//!
//! # Example
//!
//! ```ignore
//! use doclens::{document::Record, id::Id};
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
//! pub struct Person {
//!     #[serde(rename = "_id")]
//!     pub id: Id<Person>,
//!     pub name: String,
//!     pub age: i32,
//! }
//!
//! impl Record for Person {
//!     fn id(&self) -> &Id<Self> {
//!         &self.id
//!     }
//!
//!     fn collection_name() -> &'static str {
//!         "people"
//!     }
//! }
//! ```

use bson::{Bson, Document};
use serde::{Serialize, de::DeserializeOwned};
use std::{fmt, marker::PhantomData};

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    id::Id,
};

/// The key under which every record stores its primary key.
pub const ID_FIELD: &str = "_id";

/// Core trait that all records stored in a collection must implement.
///
/// While `Record` cannot be derived, the field accessors for a record can be generated with
/// `#[derive(Fields)]`, and its converter derived from `Serialize`/`Deserialize`.
pub trait Record: Send + Sync + Clone + 'static {
    /// Returns a reference to this record's primary key.
    fn id(&self) -> &Id<Self>;

    /// Returns the name of the collection this record belongs to.
    fn collection_name() -> &'static str;
}

/// Bidirectional mapping between a value and its wire document.
///
/// Implementations must satisfy the round-trip law:
/// `from_document(to_document(x)?)? == x` for every valid `x`.
pub trait Converter<T>: Send + Sync {
    /// Encodes a value into a document.
    ///
    /// # Errors
    ///
    /// Returns an error if a field cannot be encoded.
    fn to_document(&self, value: &T) -> DocumentStoreResult<Document>;

    /// Decodes a value from a document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::Decode`] if a required field is missing or has the
    /// wrong type.
    fn from_document(&self, document: Document) -> DocumentStoreResult<T>;
}

impl<T, C: Converter<T> + ?Sized> Converter<T> for &C {
    fn to_document(&self, value: &T) -> DocumentStoreResult<Document> {
        (**self).to_document(value)
    }

    fn from_document(&self, document: Document) -> DocumentStoreResult<T> {
        (**self).from_document(document)
    }
}

/// Converter derived from a type's serde implementation.
///
/// Field names map one to one onto document keys, honouring `#[serde(rename)]`.
pub struct SerdeConverter<T> {
    _marker: PhantomData<fn() -> T>,
}

impl<T> SerdeConverter<T> {
    pub fn new() -> Self {
        Self { _marker: PhantomData }
    }
}

impl<T> Default for SerdeConverter<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for SerdeConverter<T> {
    fn clone(&self) -> Self {
        Self::new()
    }
}

impl<T> Copy for SerdeConverter<T> {}

impl<T> fmt::Debug for SerdeConverter<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SerdeConverter<{}>", std::any::type_name::<T>())
    }
}

impl<T> Converter<T> for SerdeConverter<T>
where
    T: Serialize + DeserializeOwned,
{
    fn to_document(&self, value: &T) -> DocumentStoreResult<Document> {
        match encode::value(value)? {
            Bson::Document(document) => Ok(document),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "expected a document, encoded a {:?}",
                other.element_type()
            ))),
        }
    }

    fn from_document(&self, document: Document) -> DocumentStoreResult<T> {
        let deserializer = bson::Deserializer::new(Bson::Document(document));

        serde_path_to_error::deserialize(deserializer).map_err(|err| {
            let path = decode::dotted_path(err.path());
            decode::error_at(&path, err.into_inner().to_string())
        })
    }
}

/// Helpers for encoding values with the record encoder.
pub mod encode {
    use bson::Bson;
    use serde::Serialize;

    use crate::error::DocumentStoreResult;

    /// Encodes any serializable value the same way record fields are encoded.
    pub fn value<T: Serialize + ?Sized>(value: &T) -> DocumentStoreResult<Bson> {
        Ok(bson::serialize_to_bson(value)?)
    }
}

/// Per-field decoding helpers for hand-written converters.
pub mod decode {
    use bson::{Bson, Document};
    use serde::de::DeserializeOwned;
    use serde_path_to_error::{Path, Segment};

    use crate::error::{DocumentStoreError, DocumentStoreResult};

    /// Decodes a required field.
    ///
    /// # Errors
    ///
    /// Fails with a decode error naming `field` if it is missing, null, or of the wrong type.
    pub fn required<V: DeserializeOwned>(document: &Document, field: &str) -> DocumentStoreResult<V> {
        match document.get(field) {
            None | Some(Bson::Null) => Err(DocumentStoreError::decode(field, "missing field")),
            Some(value) => bson::deserialize_from_bson(value.clone())
                .map_err(|err| DocumentStoreError::decode(field, err.to_string())),
        }
    }

    /// Decodes an optional field; a missing or null value decodes to `None`.
    ///
    /// # Errors
    ///
    /// Fails with a decode error naming `field` if it is present with the wrong type.
    pub fn optional<V: DeserializeOwned>(
        document: &Document,
        field: &str,
    ) -> DocumentStoreResult<Option<V>> {
        match document.get(field) {
            None | Some(Bson::Null) => Ok(None),
            Some(value) => bson::deserialize_from_bson(value.clone())
                .map(Some)
                .map_err(|err| DocumentStoreError::decode(field, err.to_string())),
        }
    }

    /// Renders a deserialization path in dot notation, e.g. `address.lines.0`.
    pub fn dotted_path(path: &Path) -> String {
        path.iter()
            .map(|segment| match segment {
                Segment::Seq { index } => index.to_string(),
                Segment::Map { key } => key.clone(),
                Segment::Enum { variant } => variant.clone(),
                Segment::Unknown => "?".to_string(),
            })
            .collect::<Vec<_>>()
            .join(".")
    }

    /// Builds a decode error for a failure at `path`.
    ///
    /// A missing field is reported by serde on the enclosing document, so the name in the
    /// message (e.g. "missing field `name`") is appended to `path`.
    pub fn error_at(path: &str, message: String) -> DocumentStoreError {
        let missing = message
            .split_once("missing field `")
            .and_then(|(_, rest)| rest.split_once('`'))
            .map(|(name, _)| name);

        let field = match (path, missing) {
            ("", None) => None,
            ("", Some(name)) => Some(name.to_string()),
            (path, None) => Some(path.to_string()),
            (path, Some(name)) => Some(format!("{path}.{name}")),
        };

        DocumentStoreError::Decode { field, message }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Person {
        #[serde(rename = "_id")]
        id: Id<Person>,
        name: String,
        age: i32,
        tags: Vec<String>,
    }

    struct PersonConverter;

    impl Converter<Person> for PersonConverter {
        fn to_document(&self, value: &Person) -> DocumentStoreResult<Document> {
            Ok(doc! {
                "_id": &value.id,
                "name": value.name.clone(),
                "age": value.age,
                "tags": encode::value(&value.tags)?,
            })
        }

        fn from_document(&self, document: Document) -> DocumentStoreResult<Person> {
            Ok(Person {
                id: decode::required(&document, "_id")?,
                name: decode::required(&document, "name")?,
                age: decode::required(&document, "age")?,
                tags: decode::optional(&document, "tags")?.unwrap_or_default(),
            })
        }
    }

    fn person() -> Person {
        Person {
            id: Id::parse("p-1").unwrap(),
            name: "Person A".to_string(),
            age: 30,
            tags: vec!["a".to_string(), "b".to_string()],
        }
    }

    #[test]
    fn derived_and_hand_written_converters_agree() {
        let derived = SerdeConverter::<Person>::new().to_document(&person()).unwrap();
        let manual = PersonConverter.to_document(&person()).unwrap();

        assert_eq!(derived, manual);
        assert_eq!(
            derived,
            doc! { "_id": "p-1", "name": "Person A", "age": 30, "tags": ["a", "b"] }
        );
    }

    #[test]
    fn round_trips_through_both_converters() {
        let derived = SerdeConverter::<Person>::new();
        assert_eq!(derived.from_document(derived.to_document(&person()).unwrap()).unwrap(), person());
        assert_eq!(
            PersonConverter.from_document(PersonConverter.to_document(&person()).unwrap()).unwrap(),
            person()
        );
    }

    #[test]
    fn missing_fields_are_named() {
        let document = doc! { "_id": "p-1", "age": 30, "tags": [] };

        let err = SerdeConverter::<Person>::new().from_document(document.clone()).unwrap_err();
        assert_eq!(err.decode_field(), Some("name"));

        let err = PersonConverter.from_document(document).unwrap_err();
        assert_eq!(err.decode_field(), Some("name"));
    }

    #[test]
    fn wrong_types_are_decode_errors() {
        let document = doc! { "_id": "p-1", "name": "Person A", "age": "thirty", "tags": [] };

        let err = PersonConverter.from_document(document.clone()).unwrap_err();
        assert_eq!(err.decode_field(), Some("age"));

        let err = SerdeConverter::<Person>::new().from_document(document).unwrap_err();
        assert_eq!(err.decode_field(), Some("age"));
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Contact {
        name: String,
        address: Address,
    }

    #[derive(Debug, Serialize, Deserialize)]
    struct Address {
        zip: String,
        lines: Vec<String>,
    }

    #[test]
    fn nested_failures_are_named_in_dot_notation() {
        let converter = SerdeConverter::<Contact>::new();

        let err = converter
            .from_document(doc! { "name": "A", "address": { "zip": "1000", "lines": ["x", 5] } })
            .unwrap_err();
        assert_eq!(err.decode_field(), Some("address.lines.1"));

        let err = converter
            .from_document(doc! { "name": "A", "address": { "lines": [] } })
            .unwrap_err();
        assert_eq!(err.decode_field(), Some("address.zip"));
    }

    #[test]
    fn non_document_values_are_rejected() {
        let err = SerdeConverter::<i32>::new().to_document(&5).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidDocument(_)));
    }
}
