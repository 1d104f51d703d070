//! Batched writes.
//!
//! A [`Batch`] accumulates insert, update, upsert and delete operations without touching the
//! database. Like pipelines, batches are immutable: each call returns a new batch sharing the
//! operations recorded so far. The batch is executed as a single bulk write with
//! [`TypedCollection::execute`](crate::collection::TypedCollection::execute).
//!
//! ```ignore
//! let batch = Batch::new()
//!     .insert(alice)
//!     .upsert(bob)
//!     .delete(carol_id);
//!
//! let summary = people.execute(&batch).await?;
//! assert_eq!(summary.inserted, 1);
//! ```

use std::fmt;

use crate::{chain::Chain, document::Record, id::Id};

/// One recorded batch operation.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOp<R: Record> {
    Insert(R),
    Update(R),
    Upsert(R),
    Delete(Id<R>),
}

/// An immutable sequence of write operations on records of type `R`.
pub struct Batch<R: Record> {
    ops: Chain<BatchOp<R>>,
}

impl<R: Record> Batch<R> {
    pub fn new() -> Self {
        Self { ops: Chain::new() }
    }

    fn then(&self, op: BatchOp<R>) -> Self {
        Self { ops: self.ops.push(op) }
    }

    /// Records an insert; executing it fails on a duplicate key.
    pub fn insert(&self, record: R) -> Self {
        self.then(BatchOp::Insert(record))
    }

    /// Records a replacement of an existing record; absent records are skipped.
    pub fn update(&self, record: R) -> Self {
        self.then(BatchOp::Update(record))
    }

    /// Records a replacement that inserts the record when it is absent.
    pub fn upsert(&self, record: R) -> Self {
        self.then(BatchOp::Upsert(record))
    }

    /// Records a deletion by id.
    pub fn delete(&self, id: Id<R>) -> Self {
        self.then(BatchOp::Delete(id))
    }

    /// Records an insert for every record.
    pub fn insert_all(&self, records: impl IntoIterator<Item = R>) -> Self {
        records
            .into_iter()
            .fold(self.clone(), |batch, record| batch.insert(record))
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// The recorded operations in order.
    pub fn ops(&self) -> Vec<&BatchOp<R>> {
        self.ops.items()
    }
}

impl<R: Record> Default for Batch<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> Clone for Batch<R> {
    fn clone(&self) -> Self {
        Self { ops: self.ops.clone() }
    }
}

impl<R: Record + fmt::Debug> fmt::Debug for Batch<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.ops()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, PartialEq)]
    struct Note {
        id: Id<Note>,
    }

    impl Record for Note {
        fn id(&self) -> &Id<Self> {
            &self.id
        }

        fn collection_name() -> &'static str {
            "notes"
        }
    }

    fn note(id: &str) -> Note {
        Note { id: Id::parse(id).unwrap() }
    }

    #[test]
    fn batches_are_immutable() {
        let empty = Batch::new();
        let one = empty.insert(note("a"));
        let two = one.upsert(note("b"));

        assert!(empty.is_empty());
        assert_eq!(one.len(), 1);
        assert_eq!(
            two.ops(),
            vec![&BatchOp::Insert(note("a")), &BatchOp::Upsert(note("b"))]
        );
    }

    #[test]
    fn insert_all_keeps_order() {
        let batch = Batch::new().insert_all(vec![note("a"), note("b")]).delete(Id::parse("c").unwrap());

        assert_eq!(
            batch.ops(),
            vec![
                &BatchOp::Insert(note("a")),
                &BatchOp::Insert(note("b")),
                &BatchOp::Delete(Id::parse("c").unwrap()),
            ]
        );
    }
}
