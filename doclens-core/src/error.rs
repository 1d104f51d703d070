//! Error types and result types for document store operations.
//!
//! Operations that can only fail unexpectedly (reads, rendering, decoding) return
//! [`DocumentStoreResult<T>`]. Write operations classify their failures into a
//! [`Failure`](crate::failure::Failure) instead, see the [`failure`](crate::failure) module.

use bson::error::Error as BsonError;
use serde_json::Error as SerdeJsonError;
use thiserror::Error;

/// Represents all possible errors that can occur when interacting with a document store.
///
/// This enum covers serialization errors, document lifecycle issues, collection management,
/// builder misuse and errors reported by the underlying driver.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentStoreError {
    /// Serialization error when converting between document formats (BSON, JSON).
    #[error("Serialization error: {0}")]
    Serialization(String),
    /// Error during store initialization or connection setup.
    #[error("Initialization error: {0}")]
    Initialization(String),
    /// A document with the given ID already exists in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document {0} already exists in collection {1}")]
    DocumentAlreadyExists(String, String),
    /// The requested document was not found in the collection.
    /// The first argument is the document ID, the second is the collection name.
    #[error("Document not found {0} in collection {1}")]
    DocumentNotFound(String, String),
    /// The requested collection does not exist in the store.
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),
    /// The document has an invalid structure.
    #[error("Invalid document: {0}")]
    InvalidDocument(String),
    /// A builder or accessor was called with an argument outside its domain,
    /// e.g. a negative `skip`.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    /// An expression operand could not be encoded or does not fit its operator.
    #[error("Invalid operand: {0}")]
    InvalidOperand(String),
    /// A document could not be decoded into its record type.
    #[error("{}", decode_message(.field, .message))]
    Decode {
        /// The offending field, when it could be determined.
        field: Option<String>,
        /// The decoder's description of the problem.
        message: String,
    },
    /// An error reported by the database driver, with its discriminating code when known.
    #[error("Native error{}: {message}", .code.map(|c| format!(" ({c})")).unwrap_or_default())]
    Native {
        /// The server or driver error code.
        code: Option<i32>,
        /// The native error message.
        message: String,
    },
    /// An error occurred in the underlying storage backend.
    #[error("Backend error: {0}")]
    Backend(String),
    /// An unknown error occurred.
    #[error("Unknown error: {0}")]
    Unknown(String),
}

fn decode_message(field: &Option<String>, message: &str) -> String {
    match field {
        Some(field) => format!("Decode error at field `{field}`: {message}"),
        None => format!("Decode error: {message}"),
    }
}

impl DocumentStoreError {
    /// Creates a decode error for a known field.
    pub fn decode(field: impl Into<String>, message: impl Into<String>) -> Self {
        DocumentStoreError::Decode {
            field: Some(field.into()),
            message: message.into(),
        }
    }

    /// Creates a native error carrying a driver or server code.
    pub fn native(code: Option<i32>, message: impl Into<String>) -> Self {
        DocumentStoreError::Native {
            code,
            message: message.into(),
        }
    }

    /// Returns the native error code, if this is a native error that carries one.
    pub fn native_code(&self) -> Option<i32> {
        match self {
            DocumentStoreError::Native { code, .. } => *code,
            _ => None,
        }
    }

    /// Returns the offending field of a decode error.
    pub fn decode_field(&self) -> Option<&str> {
        match self {
            DocumentStoreError::Decode { field, .. } => field.as_deref(),
            _ => None,
        }
    }
}

/// A specialized `Result` type for document store operations.
///
/// This type alias is used throughout the crate to indicate operations that may fail
/// with a [`DocumentStoreError`].
pub type DocumentStoreResult<T> = Result<T, DocumentStoreError>;

impl From<BsonError> for DocumentStoreError {
    fn from(err: BsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

impl From<SerdeJsonError> for DocumentStoreError {
    fn from(err: SerdeJsonError) -> Self {
        DocumentStoreError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_error_names_the_field() {
        let err = DocumentStoreError::decode("age", "expected an integer");
        assert_eq!(err.decode_field(), Some("age"));
        assert_eq!(err.to_string(), "Decode error at field `age`: expected an integer");
    }

    #[test]
    fn native_error_display_includes_code() {
        let err = DocumentStoreError::native(Some(11000), "E11000 duplicate key error");
        assert_eq!(err.native_code(), Some(11000));
        assert_eq!(err.to_string(), "Native error (11000): E11000 duplicate key error");

        let err = DocumentStoreError::native(None, "connection reset");
        assert_eq!(err.native_code(), None);
        assert_eq!(err.to_string(), "Native error: connection reset");
    }
}
