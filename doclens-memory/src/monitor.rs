//! Change monitoring for the in-memory backend.
//!
//! The store publishes a [`ChangeEvent`] for every applied write. A monitor obtained from
//! [`InMemoryStore::monitor`](crate::InMemoryStore::monitor) receives the events of its
//! collection while started.

use async_trait::async_trait;
use mea::rwlock::RwLock;
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use tracing::warn;

use doclens_core::{
    error::DocumentStoreResult,
    monitor::{ChangeEvent, ChangeHandler, CollectionMonitor},
};

/// Handlers and run state shared between the store and the monitors of one collection.
#[derive(Default)]
pub(crate) struct Subscribers {
    running: AtomicBool,
    handlers: RwLock<Vec<ChangeHandler>>,
}

impl Subscribers {
    /// Delivers events to every handler when running. Handler errors are logged.
    pub(crate) async fn publish(&self, events: &[ChangeEvent]) {
        if !self.running.load(Ordering::Acquire) {
            return;
        }

        let handlers = self.handlers.read().await;
        for event in events {
            for handler in handlers.iter() {
                if let Err(error) = handler(event) {
                    warn!(
                        collection = %event.collection,
                        operation = ?event.operation,
                        %error,
                        "change handler failed"
                    );
                }
            }
        }
    }
}

/// Monitor over one collection of an [`InMemoryStore`](crate::InMemoryStore).
#[derive(Clone)]
pub struct InMemoryMonitor {
    collection: String,
    subscribers: Arc<Subscribers>,
}

impl std::fmt::Debug for InMemoryMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryMonitor")
            .field("collection", &self.collection)
            .field("running", &self.is_running())
            .finish()
    }
}

impl InMemoryMonitor {
    pub(crate) fn new(collection: String, subscribers: Arc<Subscribers>) -> Self {
        Self { collection, subscribers }
    }
}

#[async_trait]
impl CollectionMonitor for InMemoryMonitor {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn attach(&self, handler: ChangeHandler) {
        self.subscribers.handlers.write().await.push(handler);
    }

    async fn start(&self) -> DocumentStoreResult<()> {
        self.subscribers.running.store(true, Ordering::Release);
        Ok(())
    }

    async fn stop(&self) -> DocumentStoreResult<()> {
        self.subscribers.running.store(false, Ordering::Release);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.subscribers.running.load(Ordering::Acquire)
    }
}
