//! Aggregation expressions and the fragments that stages are built from.
//!
//! A [`Fragment`] is one `"<name>": <value>` entry of a `$project`, `$group` or `$addFields`
//! stage. Its value is an inclusion flag or a computed [`AggExpr`], such as
//! `{ "$addToSet": "$name" }` or `{ "$arrayElemAt": ["$tags", 0] }`.

use bson::Bson;
use serde::Serialize;

use crate::document::encode;

/// An aggregation expression.
#[derive(Debug, Clone, PartialEq)]
pub enum AggExpr {
    /// A constant value.
    Literal(Bson),
    /// A reference to a document field; renders as `"$<name>"`.
    Path(String),
    /// An operator application, `{ "<name>": <argument> }`. Operators taking several
    /// arguments receive an [`AggExpr::Array`].
    Operator(String, Box<AggExpr>),
    /// An object whose values are expressions, in insertion order.
    Object(Vec<(String, AggExpr)>),
    /// An array of expressions.
    Array(Vec<AggExpr>),
    /// An operand that could not be encoded.
    Invalid(String),
}

impl AggExpr {
    /// Encodes a constant with the record encoder.
    pub fn literal<T: Serialize + ?Sized>(value: &T) -> Self {
        match encode::value(value) {
            Ok(bson) => AggExpr::Literal(bson),
            Err(err) => AggExpr::Invalid(err.to_string()),
        }
    }

    /// The null literal, typically used as a `$group` key to aggregate everything.
    pub fn null() -> Self {
        AggExpr::Literal(Bson::Null)
    }

    /// A field reference.
    pub fn path(name: impl Into<String>) -> Self {
        AggExpr::Path(name.into())
    }

    /// An operator application. `name` is given with its leading `$`.
    pub fn op(name: impl Into<String>, argument: impl Into<AggExpr>) -> Self {
        AggExpr::Operator(name.into(), Box::new(argument.into()))
    }

    /// An object expression, e.g. a compound `$group` key.
    pub fn object<K, E>(entries: impl IntoIterator<Item = (K, E)>) -> Self
    where
        K: Into<String>,
        E: Into<AggExpr>,
    {
        AggExpr::Object(
            entries
                .into_iter()
                .map(|(k, e)| (k.into(), e.into()))
                .collect(),
        )
    }

    /// An array expression.
    pub fn array<E: Into<AggExpr>>(items: impl IntoIterator<Item = E>) -> Self {
        AggExpr::Array(items.into_iter().map(Into::into).collect())
    }

    /// Returns the first encoding failure in this expression, if any.
    pub fn invalid_reason(&self) -> Option<&str> {
        match self {
            AggExpr::Invalid(reason) => Some(reason),
            AggExpr::Operator(_, arg) => arg.invalid_reason(),
            AggExpr::Object(entries) => entries.iter().find_map(|(_, e)| e.invalid_reason()),
            AggExpr::Array(items) => items.iter().find_map(AggExpr::invalid_reason),
            AggExpr::Literal(_) | AggExpr::Path(_) => None,
        }
    }
}

impl From<Bson> for AggExpr {
    fn from(value: Bson) -> Self {
        AggExpr::Literal(value)
    }
}

macro_rules! literal_from {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for AggExpr {
                fn from(value: $ty) -> Self {
                    AggExpr::Literal(Bson::from(value))
                }
            }
        )*
    };
}

literal_from!(bool, i32, i64, f64, String, &str);

/// The value side of a stage fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum FragmentValue {
    /// Keep the field (`1`), only meaningful in `$project`.
    Include,
    /// Drop the field (`0`), only meaningful in `$project`.
    Exclude,
    /// Compute the field from an expression.
    Computed(AggExpr),
}

/// A named entry of a `$project`, `$group` or `$addFields` stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub name: String,
    pub value: FragmentValue,
}

impl Fragment {
    pub fn new(name: impl Into<String>, value: FragmentValue) -> Self {
        Self { name: name.into(), value }
    }

    /// A computed fragment, `{ "<name>": <expr> }`.
    pub fn computed(name: impl Into<String>, expr: impl Into<AggExpr>) -> Self {
        Self::new(name, FragmentValue::Computed(expr.into()))
    }

    /// A `$group` accumulator counting the documents of each group.
    pub fn count(name: impl Into<String>) -> Self {
        Self::computed(name, AggExpr::op("$sum", 1))
    }

    /// Returns the encoding failure carried by this fragment, if any.
    pub fn invalid_reason(&self) -> Option<&str> {
        match &self.value {
            FragmentValue::Computed(expr) => expr.invalid_reason(),
            FragmentValue::Include | FragmentValue::Exclude => None,
        }
    }
}

/// Merges fragments by name: a later fragment replaces the value of an earlier one with the
/// same name while keeping the earlier one's position.
pub fn merge_fragments(fragments: impl IntoIterator<Item = Fragment>) -> Vec<Fragment> {
    let mut merged: Vec<Fragment> = Vec::new();

    for fragment in fragments {
        match merged.iter_mut().find(|f| f.name == fragment.name) {
            Some(existing) => existing.value = fragment.value,
            None => merged.push(fragment),
        }
    }

    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn later_fragments_replace_earlier_ones_in_place() {
        let merged = merge_fragments(vec![
            Fragment::new("name", FragmentValue::Include),
            Fragment::new("age", FragmentValue::Include),
            Fragment::new("name", FragmentValue::Exclude),
        ]);

        assert_eq!(
            merged,
            vec![
                Fragment::new("name", FragmentValue::Exclude),
                Fragment::new("age", FragmentValue::Include),
            ]
        );
    }

    #[test]
    fn invalid_operands_are_found_in_nested_expressions() {
        let expr = AggExpr::op(
            "$arrayElemAt",
            AggExpr::array(vec![AggExpr::path("tags"), AggExpr::Invalid("bad".into())]),
        );

        assert_eq!(expr.invalid_reason(), Some("bad"));
        assert_eq!(AggExpr::path("tags").invalid_reason(), None);
    }

    #[test]
    fn literals_use_the_record_encoder() {
        assert_eq!(AggExpr::literal(&vec![1, 2]), AggExpr::Literal(bson::bson!([1, 2])));
        assert_eq!(AggExpr::from(3), AggExpr::Literal(Bson::Int32(3)));
    }
}
