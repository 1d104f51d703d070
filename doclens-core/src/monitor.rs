//! Change monitoring contract.
//!
//! A [`CollectionMonitor`] watches one collection and passes every change to the attached
//! handlers while it is started. How changes are observed (an oplog tail, a change stream,
//! the backend's own writes) is up to the implementation.

use async_trait::async_trait;
use bson::Document;
use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::{
    document::{Converter, ID_FIELD},
    error::DocumentStoreResult,
};

/// The kind of change observed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeOperation {
    Insert,
    Replace,
    Delete,
    /// The whole collection was dropped.
    Drop,
}

/// One observed change.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeEvent {
    pub collection: String,
    pub operation: ChangeOperation,
    /// `_id` of the changed document; `None` for [`ChangeOperation::Drop`].
    pub document_id: Option<String>,
    /// The document after the change, for inserts and replacements.
    pub document: Option<Document>,
    pub at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Creates an event for a change to one document, timestamped now.
    pub fn new(collection: impl Into<String>, operation: ChangeOperation, document: Option<Document>) -> Self {
        let document_id = document
            .as_ref()
            .and_then(|d| d.get_str(ID_FIELD).ok())
            .map(str::to_string);

        Self {
            collection: collection.into(),
            operation,
            document_id,
            document,
            at: Utc::now(),
        }
    }

    /// Sets the `_id` of the changed document.
    pub fn with_document_id(mut self, id: impl Into<String>) -> Self {
        self.document_id = Some(id.into());
        self
    }

    /// Decodes the changed document, if the event carries one.
    pub fn decode<R>(&self, converter: &impl Converter<R>) -> Option<DocumentStoreResult<R>> {
        self.document
            .clone()
            .map(|document| converter.from_document(document))
    }
}

/// A change handler. Errors are reported by the monitor and do not stop delivery to other
/// handlers.
pub type ChangeHandler = Arc<dyn Fn(&ChangeEvent) -> DocumentStoreResult<()> + Send + Sync>;

/// Subscription to the changes of one collection.
#[async_trait]
pub trait CollectionMonitor: Send + Sync {
    /// The monitored collection.
    fn collection(&self) -> &str;

    /// Adds a handler. Handlers attached while the monitor runs receive subsequent changes.
    async fn attach(&self, handler: ChangeHandler);

    /// Starts delivering changes.
    async fn start(&self) -> DocumentStoreResult<()>;

    /// Stops delivering changes. Changes made while stopped are not replayed.
    async fn stop(&self) -> DocumentStoreResult<()>;

    fn is_running(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::SerdeConverter;
    use bson::doc;

    #[test]
    fn events_pick_up_the_document_id() {
        let event = ChangeEvent::new(
            "people",
            ChangeOperation::Insert,
            Some(doc! { "_id": "p-1", "name": "A" }),
        );

        assert_eq!(event.document_id.as_deref(), Some("p-1"));

        let delete = ChangeEvent::new("people", ChangeOperation::Delete, None).with_document_id("p-2");
        assert_eq!(delete.document_id.as_deref(), Some("p-2"));
        assert!(delete.decode(&SerdeConverter::<Document>::new()).is_none());
    }
}
