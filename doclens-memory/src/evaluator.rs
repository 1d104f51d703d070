//! Query expression evaluation for in-memory document filtering.
//!
//! This module provides the evaluation engine for match expressions, following the
//! server's matching rules: an equality on an array field also matches arrays containing
//! the value, a missing field equals `null`, and range operators only compare values of the
//! same type bracket.

use bson::{Bson, Document};
use std::cmp::Ordering;

use doclens_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    query::{Expr, FieldOp, QueryVisitor},
    render,
};

/// Resolves a dot path inside a document. Numeric segments index into arrays.
pub(crate) fn lookup<'d>(document: &'d Document, path: &str) -> Option<&'d Bson> {
    let mut segments = path.split('.');
    let mut current = document.get(segments.next()?)?;

    for segment in segments {
        current = match current {
            Bson::Document(inner) => inner.get(segment)?,
            Bson::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Sets a value at a dot path, creating intermediate documents as needed.
pub(crate) fn set_path(document: &mut Document, path: &str, value: Bson) {
    match path.split_once('.') {
        None => {
            document.insert(path, value);
        }
        Some((head, rest)) => {
            if !matches!(document.get(head), Some(Bson::Document(_))) {
                document.insert(head, Document::new());
            }
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                set_path(inner, rest, value);
            }
        }
    }
}

/// Total ordering over BSON values, comparing across types by type bracket.
///
/// Numbers of different widths compare by value; documents compare key by key in order.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Comparable<'a>(pub &'a Bson);

impl Comparable<'_> {
    fn bracket(&self) -> u8 {
        match self.0 {
            Bson::MinKey => 0,
            Bson::Null | Bson::Undefined => 1,
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_) | Bson::Decimal128(_) => 2,
            Bson::String(_) | Bson::Symbol(_) => 3,
            Bson::Document(_) => 4,
            Bson::Array(_) => 5,
            Bson::Binary(_) => 6,
            Bson::ObjectId(_) => 7,
            Bson::Boolean(_) => 8,
            Bson::DateTime(_) => 9,
            Bson::Timestamp(_) => 10,
            Bson::RegularExpression(_) => 11,
            Bson::MaxKey => 255,
            _ => 12,
        }
    }

    fn number(&self) -> Option<f64> {
        match self.0 {
            Bson::Int32(value) => Some(f64::from(*value)),
            Bson::Int64(value) => Some(*value as f64),
            Bson::Double(value) => Some(*value),
            _ => None,
        }
    }

    /// Whether both values belong to the same type bracket.
    pub(crate) fn same_bracket(&self, other: &Self) -> bool {
        self.bracket() == other.bracket()
    }
}

impl Ord for Comparable<'_> {
    fn cmp(&self, other: &Self) -> Ordering {
        let by_bracket = self.bracket().cmp(&other.bracket());
        if by_bracket != Ordering::Equal {
            return by_bracket;
        }

        match (self.0, other.0) {
            (Bson::String(a), Bson::String(b)) => a.cmp(b),
            (Bson::Symbol(a), Bson::Symbol(b)) => a.cmp(b),
            (Bson::Boolean(a), Bson::Boolean(b)) => a.cmp(b),
            (Bson::DateTime(a), Bson::DateTime(b)) => a.timestamp_millis().cmp(&b.timestamp_millis()),
            (Bson::ObjectId(a), Bson::ObjectId(b)) => a.bytes().cmp(&b.bytes()),
            (Bson::Timestamp(a), Bson::Timestamp(b)) => (a.time, a.increment).cmp(&(b.time, b.increment)),
            (Bson::Binary(a), Bson::Binary(b)) => a.bytes.cmp(&b.bytes),
            (Bson::Array(a), Bson::Array(b)) => a
                .iter()
                .map(Comparable)
                .cmp(b.iter().map(Comparable)),
            (Bson::Document(a), Bson::Document(b)) => a
                .iter()
                .map(|(k, v)| (k.as_str(), Comparable(v)))
                .cmp(b.iter().map(|(k, v)| (k.as_str(), Comparable(v)))),
            _ => match (self.number(), other.number()) {
                (Some(a), Some(b)) => a.total_cmp(&b),
                _ => Ordering::Equal,
            },
        }
    }
}

impl PartialOrd for Comparable<'_> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Comparable<'_> {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Comparable<'_> {}

/// Value equality with numeric normalisation.
pub(crate) fn values_equal(a: &Bson, b: &Bson) -> bool {
    Comparable(a) == Comparable(b)
}

/// Evaluates match expressions against one document.
pub(crate) struct DocumentEvaluator<'a> {
    document: &'a Document,
}

impl<'a> DocumentEvaluator<'a> {
    pub fn new(document: &'a Document) -> Self {
        Self { document }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> DocumentStoreResult<bool> {
        self.visit_expr(expr)
    }

    /// Keeps the documents matching `expr`.
    ///
    /// # Errors
    ///
    /// Fails with [`DocumentStoreError::InvalidOperand`] if the expression carries an
    /// operand that cannot be evaluated.
    pub fn filter_documents(
        documents: impl IntoIterator<Item = Document>,
        expr: &Expr,
    ) -> DocumentStoreResult<Vec<Document>> {
        let mut matched = Vec::new();

        for document in documents {
            if DocumentEvaluator::new(&document).evaluate(expr)? {
                matched.push(document);
            }
        }

        Ok(matched)
    }

    fn equals(field_value: Option<&Bson>, value: &Bson) -> bool {
        match field_value {
            None => matches!(value, Bson::Null),
            Some(Bson::Array(items)) if !matches!(value, Bson::Array(_)) => {
                items.iter().any(|item| values_equal(item, value))
            }
            Some(Bson::Array(items)) => {
                values_equal(&Bson::Array(items.clone()), value)
                    || items.iter().any(|item| values_equal(item, value))
            }
            Some(field_value) => values_equal(field_value, value),
        }
    }

    fn ordered(field_value: &Bson, value: &Bson, accept: fn(Ordering) -> bool) -> bool {
        let (left, right) = (Comparable(field_value), Comparable(value));

        left.same_bracket(&right) && accept(left.cmp(&right))
    }

    fn in_values<'v>(field: &str, op: &FieldOp, value: &'v Bson) -> DocumentStoreResult<&'v [Bson]> {
        match value {
            Bson::Array(values) => Ok(values),
            other => Err(DocumentStoreError::InvalidOperand(format!(
                "{} on `{field}` requires an array, got {other}",
                op.operator()
            ))),
        }
    }
}

impl<'a> QueryVisitor for DocumentEvaluator<'a> {
    type Output = bool;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        render::require_operands("$and", exprs)?;
        for expr in exprs {
            if !self.visit_expr(expr)? {
                return Ok(false);
            }
        }

        Ok(true)
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        render::require_operands("$or", exprs)?;
        for expr in exprs {
            if self.visit_expr(expr)? {
                return Ok(true);
            }
        }

        Ok(false)
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(!self.visit_expr(expr)?)
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        Ok(lookup(self.document, field).is_some() == should_exist)
    }

    fn visit_field(&mut self, field: &str, op: &FieldOp, value: &Bson) -> Result<Self::Output, Self::Error> {
        let field_value = lookup(self.document, field);

        Ok(match op {
            FieldOp::Eq => Self::equals(field_value, value),
            FieldOp::Ne => !Self::equals(field_value, value),
            FieldOp::Gt | FieldOp::Gte | FieldOp::Lt | FieldOp::Lte => {
                let accept: fn(Ordering) -> bool = match op {
                    FieldOp::Gt => Ordering::is_gt,
                    FieldOp::Gte => Ordering::is_ge,
                    FieldOp::Lt => Ordering::is_lt,
                    _ => Ordering::is_le,
                };

                match field_value {
                    None => false,
                    Some(Bson::Array(items)) => items.iter().any(|item| Self::ordered(item, value, accept)),
                    Some(field_value) => Self::ordered(field_value, value, accept),
                }
            }
            FieldOp::In => Self::in_values(field, op, value)?
                .iter()
                .any(|candidate| Self::equals(field_value, candidate)),
            FieldOp::Nin => !Self::in_values(field, op, value)?
                .iter()
                .any(|candidate| Self::equals(field_value, candidate)),
            FieldOp::Size => {
                let expected = match value {
                    Bson::Int32(n) if *n >= 0 => *n as usize,
                    Bson::Int64(n) if *n >= 0 => *n as usize,
                    other => {
                        return Err(DocumentStoreError::InvalidOperand(format!(
                            "$size on `{field}` requires a non-negative integer, got {other}"
                        )));
                    }
                };

                matches!(field_value, Some(Bson::Array(items)) if items.len() == expected)
            }
        })
    }

    fn visit_invalid(&mut self, reason: &str) -> Result<Self::Output, Self::Error> {
        Err(DocumentStoreError::InvalidOperand(reason.to_string()))
    }
}
