//! Aggregation pipelines.
//!
//! A [`Pipeline`] is an immutable, append-only list of [`Stage`]s. Every stage-adding call
//! returns a new pipeline that shares the previous stages with the receiver, so pipelines
//! can be branched and handed across tasks freely:
//!
//! ```ignore
//! let base = Pipeline::new().match_expr(person::age().gte(18));
//! let youngest = base.sort([person::age().ascending()]).limit(1)?;
//! let names = base.project([person::name().include()]);
//! ```

use bson::Document;
use std::fmt;

use crate::{
    chain::Chain,
    error::{DocumentStoreError, DocumentStoreResult},
    expression::{AggExpr, Fragment, merge_fragments},
    query::Expr,
    render,
};

/// A sort key; renders as `1` for ascending and `-1` for descending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Ascending(String),
    Descending(String),
}

impl SortKey {
    /// The field this key sorts on.
    pub fn field(&self) -> &str {
        match self {
            SortKey::Ascending(field) | SortKey::Descending(field) => field,
        }
    }

    /// The wire direction, `1` or `-1`.
    pub fn direction(&self) -> i32 {
        match self {
            SortKey::Ascending(_) => 1,
            SortKey::Descending(_) => -1,
        }
    }
}

/// One pipeline operator.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    /// `{ "$match": <expr> }`
    Match(Expr),
    /// `{ "$project": { ... } }`
    Project(Vec<Fragment>),
    /// `{ "$group": { "_id": <id>, <accumulators>... } }`
    Group {
        id: AggExpr,
        accumulators: Vec<Fragment>,
    },
    /// `{ "$sort": { <field>: 1 | -1, ... } }`
    Sort(Vec<SortKey>),
    /// `{ "$skip": n }`
    Skip(u64),
    /// `{ "$limit": n }`
    Limit(u64),
    /// `{ "$addFields": { ... } }`
    AddFields(Vec<Fragment>),
    /// `{ "$sample": { "size": n } }`
    Sample(u64),
    /// `{ "$unwind": "$<field>" }`
    Unwind(String),
    /// `{ "$count": "<field>" }`
    Count(String),
}

impl Stage {
    /// The wire operator name of this stage.
    pub fn operator(&self) -> &'static str {
        match self {
            Stage::Match(_) => "$match",
            Stage::Project(_) => "$project",
            Stage::Group { .. } => "$group",
            Stage::Sort(_) => "$sort",
            Stage::Skip(_) => "$skip",
            Stage::Limit(_) => "$limit",
            Stage::AddFields(_) => "$addFields",
            Stage::Sample(_) => "$sample",
            Stage::Unwind(_) => "$unwind",
            Stage::Count(_) => "$count",
        }
    }
}

/// An immutable sequence of stages in execution order.
#[derive(Clone, Default)]
pub struct Pipeline {
    stages: Chain<Stage>,
}

impl Pipeline {
    /// Creates an empty pipeline.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a new pipeline with `stage` appended.
    pub fn then(&self, stage: Stage) -> Self {
        Self { stages: self.stages.push(stage) }
    }

    /// Filters documents with a match expression.
    pub fn match_expr(&self, expr: Expr) -> Self {
        self.then(Stage::Match(expr))
    }

    /// Reshapes documents. Fragments naming the same field are merged, the last one wins.
    pub fn project(&self, fragments: impl IntoIterator<Item = Fragment>) -> Self {
        self.then(Stage::Project(merge_fragments(fragments)))
    }

    /// Groups documents by `id` and computes the named accumulators for each group.
    pub fn group(
        &self,
        id: impl Into<AggExpr>,
        accumulators: impl IntoIterator<Item = Fragment>,
    ) -> Self {
        self.then(Stage::Group {
            id: id.into(),
            accumulators: merge_fragments(accumulators),
        })
    }

    /// Sorts documents; earlier keys take precedence.
    pub fn sort(&self, keys: impl IntoIterator<Item = SortKey>) -> Self {
        self.then(Stage::Sort(keys.into_iter().collect()))
    }

    /// Skips the first `n` documents.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidArgument`] if `n` is negative.
    pub fn skip(&self, n: i64) -> DocumentStoreResult<Self> {
        Ok(self.then(Stage::Skip(non_negative("skip", n)?)))
    }

    /// Keeps at most `n` documents.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidArgument`] if `n` is negative.
    pub fn limit(&self, n: i64) -> DocumentStoreResult<Self> {
        Ok(self.then(Stage::Limit(non_negative("limit", n)?)))
    }

    /// Adds computed fields. Fragments naming the same field are merged, the last one wins.
    pub fn add_fields(&self, fragments: impl IntoIterator<Item = Fragment>) -> Self {
        self.then(Stage::AddFields(merge_fragments(fragments)))
    }

    /// Picks `size` documents at random.
    pub fn sample(&self, size: u64) -> Self {
        self.then(Stage::Sample(size))
    }

    /// Emits one document per element of the array at `field`.
    pub fn unwind(&self, field: impl Into<String>) -> Self {
        self.then(Stage::Unwind(field.into()))
    }

    /// Replaces the documents with a single `{ <field>: <count> }` document.
    pub fn count(&self, field: impl Into<String>) -> Self {
        self.then(Stage::Count(field.into()))
    }

    /// Number of stages.
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The stages in execution order.
    pub fn stages(&self) -> Vec<&Stage> {
        self.stages.items()
    }

    /// Renders every stage to its wire document.
    ///
    /// # Errors
    ///
    /// Returns [`DocumentStoreError::InvalidOperand`] if an operand failed to encode or does
    /// not fit its operator.
    pub fn to_documents(&self) -> DocumentStoreResult<Vec<Document>> {
        self.stages().into_iter().map(render::stage).collect()
    }

    /// Renders the pipeline as `db.<collection>.aggregate([...])`.
    ///
    /// # Errors
    ///
    /// See [`Pipeline::to_documents`].
    pub fn to_query(&self, collection: &str, spaced: bool) -> DocumentStoreResult<String> {
        render::query_text(collection, &self.to_documents()?, spaced)
    }
}

impl PartialEq for Pipeline {
    fn eq(&self, other: &Self) -> bool {
        self.stages() == other.stages()
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.stages()).finish()
    }
}

impl FromIterator<Stage> for Pipeline {
    fn from_iter<I: IntoIterator<Item = Stage>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Pipeline::new(), |pipeline, stage| pipeline.then(stage))
    }
}

fn non_negative(stage: &str, n: i64) -> DocumentStoreResult<u64> {
    u64::try_from(n).map_err(|_| {
        DocumentStoreError::InvalidArgument(format!("{stage} must not be negative, got {n}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::FieldOp;
    use bson::Bson;

    fn name_is(value: &str) -> Expr {
        Expr::field("name", FieldOp::Eq, Bson::String(value.to_string()))
    }

    #[test]
    fn stage_calls_do_not_touch_the_receiver() {
        let base = Pipeline::new().match_expr(name_is("A"));
        let sorted = base.sort([SortKey::Ascending("name".into())]);
        let limited = base.limit(1).unwrap();

        assert_eq!(base.len(), 1);
        assert_eq!(
            sorted.stages(),
            vec![&Stage::Match(name_is("A")), &Stage::Sort(vec![SortKey::Ascending("name".into())])]
        );
        assert_eq!(limited.stages(), vec![&Stage::Match(name_is("A")), &Stage::Limit(1)]);
    }

    #[test]
    fn negative_skip_and_limit_are_rejected() {
        assert!(matches!(
            Pipeline::new().skip(-1),
            Err(DocumentStoreError::InvalidArgument(_))
        ));
        assert!(matches!(
            Pipeline::new().limit(-5),
            Err(DocumentStoreError::InvalidArgument(_))
        ));
        assert_eq!(Pipeline::new().skip(0).unwrap().stages(), vec![&Stage::Skip(0)]);
    }

    #[test]
    fn collected_stages_keep_their_order() {
        let pipeline: Pipeline = vec![Stage::Skip(1), Stage::Limit(2)].into_iter().collect();

        assert_eq!(pipeline, Pipeline::new().skip(1).unwrap().limit(2).unwrap());
        assert!(Pipeline::new().is_empty());
    }
}
