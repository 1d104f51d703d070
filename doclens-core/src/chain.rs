//! Persistent append-only lists shared by the immutable builders.

use std::sync::Arc;

struct Link<T> {
    item: T,
    previous: Option<Arc<Link<T>>>,
    len: usize,
}

/// A singly linked list whose appends return a new list sharing every earlier link.
pub(crate) struct Chain<T> {
    head: Option<Arc<Link<T>>>,
}

impl<T> Chain<T> {
    pub(crate) fn new() -> Self {
        Self { head: None }
    }

    pub(crate) fn push(&self, item: T) -> Self {
        Self {
            head: Some(Arc::new(Link {
                item,
                previous: self.head.clone(),
                len: self.len() + 1,
            })),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.head.as_ref().map_or(0, |link| link.len)
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// The items in insertion order.
    pub(crate) fn items(&self) -> Vec<&T> {
        let mut items = Vec::with_capacity(self.len());
        let mut cursor = self.head.as_deref();

        while let Some(link) = cursor {
            items.push(&link.item);
            cursor = link.previous.as_deref();
        }

        items.reverse();
        items
    }
}

impl<T> Clone for Chain<T> {
    fn clone(&self) -> Self {
        Self { head: self.head.clone() }
    }
}

impl<T> Default for Chain<T> {
    fn default() -> Self {
        Self::new()
    }
}
