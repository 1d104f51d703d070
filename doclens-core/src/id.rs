//! Typed record identifiers.
//!
//! An [`Id<T>`] is an opaque, non-empty string tagged with the record type that owns it,
//! so an `Id<User>` can never be passed where an `Id<Order>` is expected. On the wire it is
//! a bare string stored under `_id`.

use bson::Bson;
use serde::{Deserialize, Deserializer, Serialize, Serializer, de::Error as _};
use std::{
    cmp::Ordering,
    fmt,
    hash::{Hash, Hasher},
    marker::PhantomData,
    str::FromStr,
};
use uuid::Uuid;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// A string identifier owned by records of type `T`.
pub struct Id<T> {
    value: String,
    _owner: PhantomData<fn() -> T>,
}

impl<T> Id<T> {
    /// Generates a fresh, globally unique identifier.
    pub fn new() -> Self {
        Self {
            value: Uuid::new_v4().simple().to_string(),
            _owner: PhantomData,
        }
    }

    /// Wraps an existing identifier string.
    ///
    /// Uniqueness is not checked; the only requirement is that the string is non-empty.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidArgument`] if `raw` is empty.
    pub fn parse(raw: impl Into<String>) -> DocumentStoreResult<Self> {
        let value = raw.into();

        if value.is_empty() {
            return Err(DocumentStoreError::InvalidArgument(
                "identifier must not be empty".to_string(),
            ));
        }

        Ok(Self { value, _owner: PhantomData })
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.value
    }

    /// Consumes the identifier, returning the underlying string.
    pub fn into_inner(self) -> String {
        self.value
    }

    /// Re-tags this identifier with another owner type.
    pub fn cast<U>(self) -> Id<U> {
        Id { value: self.value, _owner: PhantomData }
    }
}

impl<T> Default for Id<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for Id<T> {
    fn clone(&self) -> Self {
        Self { value: self.value.clone(), _owner: PhantomData }
    }
}

impl<T> PartialEq for Id<T> {
    fn eq(&self, other: &Self) -> bool {
        self.value == other.value
    }
}

impl<T> Eq for Id<T> {}

impl<T> PartialOrd for Id<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for Id<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.value.cmp(&other.value)
    }
}

impl<T> Hash for Id<T> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.value.hash(state);
    }
}

impl<T> fmt::Debug for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Id").field(&self.value).finish()
    }
}

impl<T> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.value)
    }
}

impl<T> FromStr for Id<T> {
    type Err = DocumentStoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl<T> TryFrom<String> for Id<T> {
    type Error = DocumentStoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl<T> AsRef<str> for Id<T> {
    fn as_ref(&self) -> &str {
        &self.value
    }
}

impl<T> From<Id<T>> for Bson {
    fn from(id: Id<T>) -> Self {
        Bson::String(id.value)
    }
}

impl<T> Serialize for Id<T> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.value)
    }
}

impl<'de, T> Deserialize<'de> for Id<T> {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;

        Self::parse(value).map_err(D::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;
    use serde::{Deserialize, Serialize};

    struct Owner;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(rename = "_id")]
        id: Id<Owner>,
    }

    #[test]
    fn generated_ids_are_distinct_and_non_empty() {
        let a = Id::<Owner>::new();
        let b = Id::<Owner>::new();

        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
    }

    #[test]
    fn parse_rejects_empty_strings() {
        assert!(matches!(
            Id::<Owner>::parse(""),
            Err(DocumentStoreError::InvalidArgument(_))
        ));
        assert_eq!(Id::<Owner>::parse("abc").unwrap().as_str(), "abc");
    }

    #[test]
    fn serializes_as_a_bare_string() {
        let holder = Holder { id: Id::parse("p-1").unwrap() };
        let document = bson::serialize_to_document(&holder).unwrap();

        assert_eq!(document, doc! { "_id": "p-1" });
        assert_eq!(bson::deserialize_from_document::<Holder>(document).unwrap(), holder);
    }

    #[test]
    fn ids_convert_to_bson_strings() {
        let id = Id::<Owner>::parse("p-1").unwrap();

        assert_eq!(Bson::from(&id), Bson::String("p-1".to_string()));
        assert_eq!(doc! { "_id": &id }, doc! { "_id": "p-1" });
        assert_eq!(Bson::from(id), Bson::String("p-1".to_string()));
    }

    #[test]
    fn deserializing_an_empty_id_fails() {
        let result = bson::deserialize_from_document::<Holder>(doc! { "_id": "" });
        assert!(result.is_err());
    }
}
