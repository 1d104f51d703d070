//! Mapping of driver errors onto [`DocumentStoreError`].
//!
//! Server-reported failures keep their numeric code so the typed layer can classify them;
//! everything else becomes a code-less native error.

use mongodb::error::{Error as MongoError, ErrorKind, WriteFailure};

use doclens_core::error::DocumentStoreError;

/// Extracts the server error code carried by a driver error, if any.
pub fn server_code(error: &MongoError) -> Option<i32> {
    match error.kind.as_ref() {
        ErrorKind::Write(WriteFailure::WriteError(e)) => Some(e.code),
        ErrorKind::Write(WriteFailure::WriteConcernError(e)) => Some(e.code),
        ErrorKind::Command(e) => Some(e.code),
        ErrorKind::InsertMany(e) => e
            .write_errors
            .as_ref()
            .and_then(|errors| errors.first())
            .map(|e| e.code),
        _ => None,
    }
}

/// Converts a driver error into a [`DocumentStoreError::Native`].
pub fn native(error: MongoError) -> DocumentStoreError {
    DocumentStoreError::Native {
        code: server_code(&error),
        message: error.to_string(),
    }
}

/// Converts a driver error raised while connecting into a
/// [`DocumentStoreError::Initialization`].
pub fn initialization(error: MongoError) -> DocumentStoreError {
    DocumentStoreError::Initialization(error.to_string())
}
