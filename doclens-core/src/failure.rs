//! Classified write failures.
//!
//! Write operations on a [`TypedCollection`](crate::collection::TypedCollection) never fail
//! with a bare [`DocumentStoreError`]. They return an [`Outcome`], whose error side is a
//! [`Failure`] the caller is expected to branch on:
//!
//! ```ignore
//! match people.insert(person).await {
//!     Ok(_) => {}
//!     Err(Failure::DuplicateKey(_)) => { /* already there */ }
//!     Err(other) => return Err(other.into_cause()),
//! }
//! ```

use thiserror::Error;

use crate::error::{DocumentStoreError, DocumentStoreResult};

/// Server codes reported for unique index violations.
pub const DUPLICATE_KEY_CODES: [i32; 3] = [11000, 11001, 12582];

/// Server code reported when `$sample` cannot find enough distinct documents.
pub const SAMPLE_NO_NON_DUPLICATE_CODE: i32 = 28799;

/// The closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    DuplicateKey,
    SampleNoNonDuplicate,
    NoMatchingDocument,
    Unknown,
}

/// A classified write failure. Every variant keeps the error it was classified from.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Failure {
    /// A unique index, including the primary key, was violated.
    #[error("duplicate key: {0}")]
    DuplicateKey(DocumentStoreError),
    /// A random sample could not find enough distinct documents.
    #[error("sample found no non-duplicate document: {0}")]
    SampleNoNonDuplicate(DocumentStoreError),
    /// An update addressed a document that does not exist.
    #[error("no matching document: {0}")]
    NoMatchingDocument(DocumentStoreError),
    /// Anything else.
    #[error(transparent)]
    Unknown(DocumentStoreError),
}

impl Failure {
    /// Classifies an error by its variant and, for native errors, by its server code.
    pub fn classify(cause: DocumentStoreError) -> Self {
        match &cause {
            DocumentStoreError::DocumentAlreadyExists(..) => Failure::DuplicateKey(cause),
            DocumentStoreError::DocumentNotFound(..) => Failure::NoMatchingDocument(cause),
            DocumentStoreError::Native { code: Some(code), .. } if DUPLICATE_KEY_CODES.contains(code) => {
                Failure::DuplicateKey(cause)
            }
            DocumentStoreError::Native { code: Some(SAMPLE_NO_NON_DUPLICATE_CODE), .. } => {
                Failure::SampleNoNonDuplicate(cause)
            }
            // Some driver paths report the violation without a code.
            DocumentStoreError::Native { code: None, message } if message.contains("duplicate key") => {
                Failure::DuplicateKey(cause)
            }
            _ => Failure::Unknown(cause),
        }
    }

    pub fn kind(&self) -> FailureKind {
        match self {
            Failure::DuplicateKey(_) => FailureKind::DuplicateKey,
            Failure::SampleNoNonDuplicate(_) => FailureKind::SampleNoNonDuplicate,
            Failure::NoMatchingDocument(_) => FailureKind::NoMatchingDocument,
            Failure::Unknown(_) => FailureKind::Unknown,
        }
    }

    /// The error this failure was classified from.
    pub fn cause(&self) -> &DocumentStoreError {
        match self {
            Failure::DuplicateKey(cause)
            | Failure::SampleNoNonDuplicate(cause)
            | Failure::NoMatchingDocument(cause)
            | Failure::Unknown(cause) => cause,
        }
    }

    pub fn into_cause(self) -> DocumentStoreError {
        match self {
            Failure::DuplicateKey(cause)
            | Failure::SampleNoNonDuplicate(cause)
            | Failure::NoMatchingDocument(cause)
            | Failure::Unknown(cause) => cause,
        }
    }
}

impl From<DocumentStoreError> for Failure {
    fn from(cause: DocumentStoreError) -> Self {
        Failure::classify(cause)
    }
}

impl From<Failure> for DocumentStoreError {
    fn from(failure: Failure) -> Self {
        failure.into_cause()
    }
}

/// The result of a write operation.
pub type Outcome<T> = Result<T, Failure>;

/// Classifies the error side of a result.
pub trait OutcomeExt<T> {
    fn classified(self) -> Outcome<T>;
}

impl<T> OutcomeExt<T> for DocumentStoreResult<T> {
    fn classified(self) -> Outcome<T> {
        self.map_err(Failure::classify)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_keys_are_recognised_by_variant_and_code() {
        for code in DUPLICATE_KEY_CODES {
            let failure = Failure::classify(DocumentStoreError::native(Some(code), "E11000"));
            assert_eq!(failure.kind(), FailureKind::DuplicateKey);
        }

        let failure = Failure::classify(DocumentStoreError::DocumentAlreadyExists(
            "p-1".into(),
            "people".into(),
        ));
        assert_eq!(failure.kind(), FailureKind::DuplicateKey);
    }

    #[test]
    fn sample_and_missing_documents_are_classified() {
        let failure = Failure::classify(DocumentStoreError::native(Some(28799), "$sample"));
        assert_eq!(failure.kind(), FailureKind::SampleNoNonDuplicate);

        let failure = Failure::classify(DocumentStoreError::DocumentNotFound(
            "p-1".into(),
            "people".into(),
        ));
        assert_eq!(failure.kind(), FailureKind::NoMatchingDocument);
    }

    #[test]
    fn unknown_failures_keep_their_cause() {
        let cause = DocumentStoreError::native(Some(13), "unauthorized");
        let failure: Outcome<()> = Err(cause.clone()).classified();

        let failure = failure.unwrap_err();
        assert_eq!(failure.kind(), FailureKind::Unknown);
        assert_eq!(failure.cause(), &cause);
        assert_eq!(DocumentStoreError::from(failure), cause);
    }
}
