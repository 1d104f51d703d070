//! Canonical rendering of expressions and stages into wire documents and query text.
//!
//! The rendered form is what the MongoDB backend sends to the server and what
//! [`Pipeline::to_query`](crate::pipeline::Pipeline::to_query) prints. Key order always
//! follows construction order, so rendering the same pipeline twice yields identical text.

use bson::{Bson, Document, doc};
use serde::Serialize;
use serde_json::ser::{CompactFormatter, Formatter, Serializer};
use std::io;

use crate::{
    error::{DocumentStoreError, DocumentStoreResult},
    expression::{AggExpr, Fragment, FragmentValue},
    pipeline::Stage,
    query::{Expr, FieldOp, QueryVisitor},
};

/// Translates match expressions into query documents.
pub struct Renderer;

impl QueryVisitor for Renderer {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        require_operands("$and", exprs)?;

        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        require_operands("$or", exprs)?;

        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        match (op, value) {
            (FieldOp::In | FieldOp::Nin, Bson::Array(_)) => {}
            (FieldOp::In | FieldOp::Nin, other) => {
                return Err(DocumentStoreError::InvalidOperand(format!(
                    "{} on `{field}` requires an array, got {:?}",
                    op.operator(),
                    other.element_type()
                )));
            }
            (FieldOp::Size, Bson::Int32(n)) if *n >= 0 => {}
            (FieldOp::Size, Bson::Int64(n)) if *n >= 0 => {}
            (FieldOp::Size, other) => {
                return Err(DocumentStoreError::InvalidOperand(format!(
                    "$size on `{field}` requires a non-negative integer, got {other}"
                )));
            }
            _ => {}
        }

        let operator = op.operator();

        Ok(match op {
            FieldOp::Eq => doc! { field: value.clone() },
            _ => doc! { field: { operator: value.clone() } },
        })
    }

    fn visit_invalid(&mut self, reason: &str) -> Result<Self::Output, Self::Error> {
        Err(DocumentStoreError::InvalidOperand(reason.to_string()))
    }
}

/// Checks that `$and` or `$or` has at least one operand.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidOperand`] for an empty operand list.
pub fn require_operands(operator: &str, exprs: &[Expr]) -> DocumentStoreResult<()> {
    if exprs.is_empty() {
        return Err(DocumentStoreError::InvalidOperand(format!(
            "{operator} needs at least one expression"
        )));
    }
    Ok(())
}

/// Rejects a `$group` accumulator that would overwrite the group key.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidOperand`] if an accumulator is named `_id`.
pub fn require_group_names(accumulators: &[Fragment]) -> DocumentStoreResult<()> {
    match accumulators.iter().find(|fragment| fragment.name == "_id") {
        Some(_) => Err(DocumentStoreError::InvalidOperand(
            "a $group accumulator cannot be named `_id`".to_string(),
        )),
        None => Ok(()),
    }
}

/// Renders a match expression.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidOperand`] for operands that failed to encode or do
/// not fit their operator.
pub fn expr(expr: &Expr) -> DocumentStoreResult<Document> {
    Renderer.visit_expr(expr)
}

/// Renders an aggregation expression.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidOperand`] if the expression carries an operand that
/// failed to encode.
pub fn agg_expr(expr: &AggExpr) -> DocumentStoreResult<Bson> {
    Ok(match expr {
        // A string starting with `$` would otherwise be read back as a field path.
        AggExpr::Literal(Bson::String(s)) if s.starts_with('$') => {
            Bson::Document(doc! { "$literal": s.as_str() })
        }
        AggExpr::Literal(value) => value.clone(),
        AggExpr::Path(name) => Bson::String(format!("${name}")),
        AggExpr::Operator(name, argument) => Bson::Document(doc! { name: agg_expr(argument)? }),
        AggExpr::Object(entries) => {
            let mut document = Document::new();
            for (key, value) in entries {
                document.insert(key.as_str(), agg_expr(value)?);
            }
            Bson::Document(document)
        }
        AggExpr::Array(items) => Bson::Array(items.iter().map(agg_expr).collect::<Result<_, _>>()?),
        AggExpr::Invalid(reason) => return Err(DocumentStoreError::InvalidOperand(reason.clone())),
    })
}

fn projection(fragments: &[Fragment]) -> DocumentStoreResult<Document> {
    let mut document = Document::new();

    for fragment in fragments {
        let value = match &fragment.value {
            FragmentValue::Include => Bson::Int32(1),
            FragmentValue::Exclude => Bson::Int32(0),
            // Bare numbers and booleans mean include/exclude inside `$project`.
            FragmentValue::Computed(AggExpr::Literal(
                value @ (Bson::Boolean(_) | Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_)),
            )) => Bson::Document(doc! { "$literal": value.clone() }),
            FragmentValue::Computed(expr) => agg_expr(expr)?,
        };
        document.insert(fragment.name.as_str(), value);
    }

    Ok(document)
}

fn computed(stage: &str, fragments: &[Fragment], into: &mut Document) -> DocumentStoreResult<()> {
    for fragment in fragments {
        match &fragment.value {
            FragmentValue::Computed(expr) => {
                into.insert(fragment.name.as_str(), agg_expr(expr)?);
            }
            FragmentValue::Include | FragmentValue::Exclude => {
                return Err(DocumentStoreError::InvalidOperand(format!(
                    "`{}` can only be included or excluded in $project, not in {stage}",
                    fragment.name
                )));
            }
        }
    }

    Ok(())
}

/// Renders one stage as a single-key document, `{ "$<stage>": <fragment> }`.
///
/// # Errors
///
/// Returns [`DocumentStoreError::InvalidOperand`] if an operand failed to encode or does not
/// fit its operator.
pub fn stage(stage: &Stage) -> DocumentStoreResult<Document> {
    let body: Bson = match stage {
        Stage::Match(e) => expr(e)?.into(),
        Stage::Project(fragments) => projection(fragments)?.into(),
        Stage::Group { id, accumulators } => {
            require_group_names(accumulators)?;
            let mut group = doc! { "_id": agg_expr(id)? };
            computed("$group", accumulators, &mut group)?;
            group.into()
        }
        Stage::Sort(keys) => {
            let mut sort = Document::new();
            for key in keys {
                sort.insert(key.field(), key.direction());
            }
            sort.into()
        }
        Stage::Skip(n) | Stage::Limit(n) => count_value(*n)?,
        Stage::AddFields(fragments) => {
            let mut fields = Document::new();
            computed("$addFields", fragments, &mut fields)?;
            fields.into()
        }
        Stage::Sample(size) => doc! { "size": count_value(*size)? }.into(),
        Stage::Unwind(field) => Bson::String(format!("${field}")),
        Stage::Count(field) => Bson::String(field.clone()),
    };

    let operator = stage.operator();

    Ok(doc! { operator: body })
}

fn count_value(n: u64) -> DocumentStoreResult<Bson> {
    i64::try_from(n)
        .map(Bson::Int64)
        .map_err(|_| DocumentStoreError::InvalidArgument(format!("{n} is out of range")))
}

/// Formats JSON with a single space after `:` and `,`.
struct SpacedFormatter;

impl Formatter for SpacedFormatter {
    fn begin_array_value<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_key<W: ?Sized + io::Write>(&mut self, writer: &mut W, first: bool) -> io::Result<()> {
        if first { Ok(()) } else { writer.write_all(b", ") }
    }

    fn begin_object_value<W: ?Sized + io::Write>(&mut self, writer: &mut W) -> io::Result<()> {
        writer.write_all(b": ")
    }
}

/// Renders a wire document as JSON text, compact or spaced.
///
/// # Errors
///
/// Returns [`DocumentStoreError::Serialization`] if the document cannot be written as JSON.
pub fn json(document: &Document, spaced: bool) -> DocumentStoreResult<String> {
    let mut buffer = Vec::new();

    if spaced {
        document.serialize(&mut Serializer::with_formatter(&mut buffer, SpacedFormatter))?;
    } else {
        document.serialize(&mut Serializer::with_formatter(&mut buffer, CompactFormatter))?;
    }

    String::from_utf8(buffer).map_err(|err| DocumentStoreError::Serialization(err.to_string()))
}

/// Renders rendered stages as `db.<collection>.aggregate([...])`.
///
/// # Errors
///
/// See [`json`].
pub fn query_text(collection: &str, stages: &[Document], spaced: bool) -> DocumentStoreResult<String> {
    let separator = if spaced { ", " } else { "," };
    let stages = stages
        .iter()
        .map(|stage| json(stage, spaced))
        .collect::<DocumentStoreResult<Vec<_>>>()?;

    Ok(format!("db.{collection}.aggregate([{}])", stages.join(separator)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        expression::Fragment,
        field::Field,
        pipeline::{Pipeline, SortKey},
    };
    use pretty_assertions::assert_eq;

    const NAME: Field<String> = Field::new("name");
    const AGE: Field<i32> = Field::new("age");
    const TAGS: Field<Vec<String>> = Field::new("tags");

    #[test]
    fn equality_renders_as_a_plain_pair() {
        let query = Pipeline::new().match_expr(NAME.eq("Person A")).to_query("people", false).unwrap();

        assert_eq!(query, r#"db.people.aggregate([{"$match":{"name":"Person A"}}])"#);
    }

    #[test]
    fn or_keeps_operands_in_order() {
        let query = Pipeline::new()
            .match_expr(NAME.eq("A") | NAME.eq("B"))
            .to_query("people", false)
            .unwrap();

        assert_eq!(
            query,
            r#"db.people.aggregate([{"$match":{"$or":[{"name":"A"},{"name":"B"}]}}])"#
        );
    }

    #[test]
    fn spaced_rendering_separates_tokens() {
        let query = Pipeline::new()
            .match_expr(AGE.gte(18) & !NAME.is_in(["A"]))
            .sort([AGE.descending(), NAME.ascending()])
            .skip(1)
            .unwrap()
            .to_query("people", true)
            .unwrap();

        assert_eq!(
            query,
            r#"db.people.aggregate([{"$match": {"$and": [{"age": {"$gte": 18}}, {"$nor": [{"name": {"$in": ["A"]}}]}]}}, {"$sort": {"age": -1, "name": 1}}, {"$skip": 1}])"#
        );
    }

    #[test]
    fn stage_keys_follow_construction_order() {
        let pipeline = Pipeline::new()
            .project([NAME.include(), AGE.exclude(), Fragment::computed("zero", 0)])
            .group(NAME.path(), [AGE.sum_into("total"), TAGS.size_into("tagCount")])
            .add_fields([Fragment::computed("kind", "$person")]);

        assert_eq!(
            pipeline.to_documents().unwrap(),
            vec![
                doc! { "$project": { "name": 1, "age": 0, "zero": { "$literal": 0 } } },
                doc! { "$group": {
                    "_id": "$name",
                    "total": { "$sum": "$age" },
                    "tagCount": { "$size": "$tags" },
                } },
                doc! { "$addFields": { "kind": { "$literal": "$person" } } },
            ]
        );
    }

    #[test]
    fn rendering_is_deterministic() {
        let build = || {
            Pipeline::new()
                .match_expr(NAME.eq("A") & TAGS.size(2))
                .add_fields([NAME.array_elem_at(&TAGS, -1)])
                .sort([SortKey::Ascending("name".into())])
                .limit(10)
                .unwrap()
        };

        assert_eq!(
            build().to_query("people", false).unwrap(),
            build().to_query("people", false).unwrap()
        );
    }

    #[test]
    fn invalid_operands_fail_rendering() {
        let err = Pipeline::new()
            .match_expr(Expr::Invalid("unsupported value".into()))
            .to_documents()
            .unwrap_err();
        assert_eq!(err, DocumentStoreError::InvalidOperand("unsupported value".into()));

        let err = expr(&Expr::field("name", FieldOp::In, Bson::String("A".into()))).unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidOperand(_)));

        let err = Pipeline::new().add_fields([NAME.include()]).to_documents().unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidOperand(_)));
    }

    #[test]
    fn empty_logical_operators_are_rejected() {
        assert!(matches!(expr(&Expr::any([])), Err(DocumentStoreError::InvalidOperand(_))));
        assert!(matches!(expr(&Expr::all([])), Err(DocumentStoreError::InvalidOperand(_))));
        assert!(matches!(
            expr(&Expr::field("name", FieldOp::Eq, "A".into()).and(Expr::any([]))),
            Err(DocumentStoreError::InvalidOperand(_))
        ));
    }

    #[test]
    fn group_accumulators_cannot_replace_the_key() {
        let err = Pipeline::new()
            .group(NAME.path(), [Fragment::count("_id")])
            .to_documents()
            .unwrap_err();
        assert!(matches!(err, DocumentStoreError::InvalidOperand(_)));
    }
}
