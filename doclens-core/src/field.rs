//! Typed field references.
//!
//! A [`Field<V>`] names a location in a document (dot paths are allowed) and carries the
//! type `V` of the value stored there. Every builder on it is a pure function of the field
//! name and its operand, and the value type constrains which operands are accepted:
//!
//! ```ignore
//! let name: Field<String> = Field::new("name");
//! let tags: Field<Vec<String>> = Field::new("tags");
//!
//! name.eq("Person A");                 // { "name": "Person A" }
//! name.is_in(["A", "B"]);              // { "name": { "$in": ["A", "B"] } }
//! tags.size(2);                        // { "tags": { "$size": 2 } }
//! name.add_to_set("names");            // { "names": { "$addToSet": "$name" } }
//! name.array_elem_at(&tags, 0);        // { "name": { "$arrayElemAt": ["$tags", 0] } }
//! ```
//!
//! Operands are encoded with the same serde encoder used for records.

use bson::Bson;
use serde::Serialize;
use std::{borrow::Cow, fmt, marker::PhantomData};

use crate::{
    document::encode,
    expression::{AggExpr, Fragment, FragmentValue},
    pipeline::SortKey,
    query::{Expr, FieldOp},
};

/// A named, typed reference into the document space.
pub struct Field<V> {
    name: Cow<'static, str>,
    _value: PhantomData<fn() -> V>,
}

impl<V> Field<V> {
    /// Creates a field reference from a static name.
    pub const fn new(name: &'static str) -> Self {
        Self { name: Cow::Borrowed(name), _value: PhantomData }
    }

    /// Creates a field reference from a computed name.
    pub fn named(name: impl Into<String>) -> Self {
        Self { name: Cow::Owned(name.into()), _value: PhantomData }
    }

    /// Returns the field's wire name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// A reference to a field nested inside this one, e.g. `address.city`.
    pub fn nested<U>(&self, child: &str) -> Field<U> {
        Field::named(format!("{}.{}", self.name, child))
    }

    /// The same location viewed with another value type, e.g. after a projection
    /// reshaped the document.
    pub fn retype<U>(&self) -> Field<U> {
        Field { name: self.name.clone(), _value: PhantomData }
    }

    /// A field path expression, `"$<name>"`.
    pub fn path(&self) -> AggExpr {
        AggExpr::path(self.name.clone())
    }

    /// Existence check, `{ "<name>": { "$exists": <bool> } }`.
    pub fn exists(&self, should_exist: bool) -> Expr {
        Expr::Exists(self.name.to_string(), should_exist)
    }

    /// Keeps this field in a `$project` stage.
    pub fn include(&self) -> Fragment {
        Fragment::new(self.name.clone(), FragmentValue::Include)
    }

    /// Drops this field in a `$project` stage.
    pub fn exclude(&self) -> Fragment {
        Fragment::new(self.name.clone(), FragmentValue::Exclude)
    }

    /// Sets this field from a literal or an expression.
    pub fn set(&self, value: impl Into<AggExpr>) -> Fragment {
        Fragment::computed(self.name.clone(), value)
    }

    /// Ascending sort key.
    pub fn ascending(&self) -> SortKey {
        SortKey::Ascending(self.name.to_string())
    }

    /// Descending sort key.
    pub fn descending(&self) -> SortKey {
        SortKey::Descending(self.name.to_string())
    }

    fn accumulate(&self, operator: &str, target: impl Into<String>) -> Fragment {
        Fragment::computed(target, AggExpr::op(operator, self.path()))
    }

    /// `$group` accumulator collecting the distinct values of this field into `target`.
    pub fn add_to_set(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$addToSet", target)
    }

    /// `$group` accumulator collecting all values of this field into `target`.
    pub fn push_into(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$push", target)
    }

    /// `$group` accumulator summing this field into `target`.
    pub fn sum_into(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$sum", target)
    }

    /// `$group` accumulator averaging this field into `target`.
    pub fn avg_into(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$avg", target)
    }

    /// `$group` accumulator keeping the smallest value of this field in `target`.
    pub fn min_into(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$min", target)
    }

    /// `$group` accumulator keeping the largest value of this field in `target`.
    pub fn max_into(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$max", target)
    }

    /// `$group` accumulator keeping the first value of this field in `target`.
    pub fn first_into(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$first", target)
    }

    /// `$group` accumulator keeping the last value of this field in `target`.
    pub fn last_into(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$last", target)
    }

    /// Converts this (object) field into an array of `{k, v}` pairs stored in `target`.
    pub fn object_to_array(&self, target: impl Into<String>) -> Fragment {
        self.accumulate("$objectToArray", target)
    }

    /// Sets this field to the element of `source` at `index`; negative indexes count from
    /// the end.
    pub fn array_elem_at(&self, source: &Field<Vec<V>>, index: i64) -> Fragment {
        Fragment::computed(
            self.name.clone(),
            AggExpr::op(
                "$arrayElemAt",
                AggExpr::Array(vec![source.path(), AggExpr::Literal(Bson::Int64(index))]),
            ),
        )
    }
}

impl<V: Serialize> Field<V> {
    fn compare<T: Serialize + ?Sized>(&self, op: FieldOp, value: &T) -> Expr {
        match encode::value(value) {
            Ok(bson) => Expr::field(self.name.to_string(), op, bson),
            Err(err) => Expr::Invalid(format!("{}: {err}", self.name)),
        }
    }

    fn compare_many<T, I>(&self, op: FieldOp, values: I) -> Expr
    where
        T: Into<V>,
        I: IntoIterator<Item = T>,
    {
        let values = values.into_iter().map(Into::into).collect::<Vec<V>>();

        self.compare(op, &values)
    }

    /// Equality, rendered as `{ "<name>": <value> }`.
    pub fn eq(&self, value: impl Into<V>) -> Expr {
        self.compare(FieldOp::Eq, &value.into())
    }

    /// Inequality.
    pub fn ne(&self, value: impl Into<V>) -> Expr {
        self.compare(FieldOp::Ne, &value.into())
    }

    /// Strictly greater than.
    pub fn gt(&self, value: impl Into<V>) -> Expr {
        self.compare(FieldOp::Gt, &value.into())
    }

    /// Greater than or equal.
    pub fn gte(&self, value: impl Into<V>) -> Expr {
        self.compare(FieldOp::Gte, &value.into())
    }

    /// Strictly less than.
    pub fn lt(&self, value: impl Into<V>) -> Expr {
        self.compare(FieldOp::Lt, &value.into())
    }

    /// Less than or equal.
    pub fn lte(&self, value: impl Into<V>) -> Expr {
        self.compare(FieldOp::Lte, &value.into())
    }

    /// Set membership.
    pub fn is_in<T: Into<V>>(&self, values: impl IntoIterator<Item = T>) -> Expr {
        self.compare_many(FieldOp::In, values)
    }

    /// Negated set membership.
    pub fn not_in<T: Into<V>>(&self, values: impl IntoIterator<Item = T>) -> Expr {
        self.compare_many(FieldOp::Nin, values)
    }
}

impl<E: Serialize> Field<Vec<E>> {
    /// Matches arrays with exactly `n` elements.
    pub fn size(&self, n: u32) -> Expr {
        Expr::field(self.name.to_string(), FieldOp::Size, Bson::Int64(i64::from(n)))
    }

    /// Matches arrays containing `element`.
    pub fn contains(&self, element: impl Into<E>) -> Expr {
        match encode::value(&element.into()) {
            Ok(bson) => Expr::field(self.name.to_string(), FieldOp::Eq, bson),
            Err(err) => Expr::Invalid(format!("{}: {err}", self.name)),
        }
    }

    /// Stores the length of this array in `target`.
    pub fn size_into(&self, target: impl Into<String>) -> Fragment {
        Fragment::computed(target, AggExpr::op("$size", self.path()))
    }
}

impl<V> Clone for Field<V> {
    fn clone(&self) -> Self {
        Self { name: self.name.clone(), _value: PhantomData }
    }
}

impl<V> PartialEq for Field<V> {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl<V> Eq for Field<V> {}

impl<V> fmt::Debug for Field<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Field").field(&self.name).finish()
    }
}

impl<V> From<&Field<V>> for AggExpr {
    fn from(field: &Field<V>) -> Self {
        field.path()
    }
}

impl<V> From<Field<V>> for AggExpr {
    fn from(field: Field<V>) -> Self {
        field.path()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::id::Id;
    use bson::bson;
    use serde::Serializer;

    const NAME: Field<String> = Field::new("name");
    const TAGS: Field<Vec<String>> = Field::new("tags");

    #[test]
    fn comparisons_bind_the_field_name() {
        assert_eq!(NAME.eq("A"), Expr::field("name", FieldOp::Eq, bson!("A")));
        assert_eq!(
            NAME.is_in(["A", "B"]),
            Expr::field("name", FieldOp::In, bson!(["A", "B"]))
        );
        assert_eq!(TAGS.size(2), Expr::field("tags", FieldOp::Size, Bson::Int64(2)));
        assert_eq!(TAGS.contains("x"), Expr::field("tags", FieldOp::Eq, bson!("x")));
    }

    #[test]
    fn typed_ids_encode_as_strings() {
        struct Owner;
        let owner: Field<Id<Owner>> = Field::new("_id");
        let id = Id::<Owner>::parse("o-1").unwrap();

        assert_eq!(owner.eq(id), Expr::field("_id", FieldOp::Eq, bson!("o-1")));
    }

    #[test]
    fn transforms_produce_named_fragments() {
        assert_eq!(
            NAME.add_to_set("names"),
            Fragment::computed("names", AggExpr::op("$addToSet", AggExpr::path("name")))
        );
        assert_eq!(
            NAME.array_elem_at(&TAGS, 0),
            Fragment::computed(
                "name",
                AggExpr::op(
                    "$arrayElemAt",
                    AggExpr::Array(vec![AggExpr::path("tags"), AggExpr::Literal(Bson::Int64(0))])
                )
            )
        );
        assert_eq!(NAME.include(), Fragment::new("name", FragmentValue::Include));
    }

    #[test]
    fn unencodable_operands_become_invalid_expressions() {
        struct Broken;

        impl Serialize for Broken {
            fn serialize<S: Serializer>(&self, _serializer: S) -> Result<S::Ok, S::Error> {
                Err(serde::ser::Error::custom("cannot encode"))
            }
        }

        let field: Field<Broken> = Field::new("broken");
        assert!(matches!(field.eq(Broken), Expr::Invalid(_)));
    }

    #[test]
    fn nested_fields_use_dot_paths() {
        let address: Field<()> = Field::new("address");
        assert_eq!(address.nested::<String>("city").name(), "address.city");
    }
}
