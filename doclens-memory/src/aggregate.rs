//! Aggregation pipeline execution over in-memory documents.
//!
//! Stages run one after another over the whole working set, each producing the input of the
//! next. Expression evaluation covers the operators the field algebra emits plus a handful of
//! common arithmetic and string operators.

use bson::{Bson, Document};
use rand::seq::SliceRandom;
use std::cmp::Ordering;

use doclens_core::{
    error::{DocumentStoreError, DocumentStoreResult},
    expression::{AggExpr, Fragment, FragmentValue},
    pipeline::{Pipeline, SortKey, Stage},
    render,
};

use crate::evaluator::{Comparable, DocumentEvaluator, lookup, set_path, values_equal};

const ID_FIELD: &str = "_id";

/// Runs every stage of `pipeline` over `documents`.
pub(crate) fn execute(pipeline: &Pipeline, documents: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
    pipeline
        .stages()
        .into_iter()
        .try_fold(documents, |documents, stage| execute_stage(stage, documents))
}

fn execute_stage(stage: &Stage, mut documents: Vec<Document>) -> DocumentStoreResult<Vec<Document>> {
    match stage {
        Stage::Match(expr) => DocumentEvaluator::filter_documents(documents, expr),
        Stage::Project(fragments) => documents
            .iter()
            .map(|document| execute_project(fragments, document))
            .collect(),
        Stage::Group { id, accumulators } => execute_group(id, accumulators, &documents),
        Stage::Sort(keys) => {
            execute_sort(keys, &mut documents);
            Ok(documents)
        }
        Stage::Skip(n) => Ok(documents.into_iter().skip(clamp(*n)).collect()),
        Stage::Limit(n) => {
            documents.truncate(clamp(*n));
            Ok(documents)
        }
        Stage::AddFields(fragments) => documents
            .into_iter()
            .map(|document| execute_add_fields(fragments, document))
            .collect(),
        Stage::Sample(size) => {
            documents.shuffle(&mut rand::thread_rng());
            documents.truncate(clamp(*size));
            Ok(documents)
        }
        Stage::Unwind(path) => Ok(execute_unwind(path, documents)),
        Stage::Count(field) => Ok(if documents.is_empty() {
            Vec::new()
        } else {
            let mut count = Document::new();
            count.insert(field.as_str(), count_bson(documents.len()));
            vec![count]
        }),
    }
}

fn clamp(n: u64) -> usize {
    usize::try_from(n).unwrap_or(usize::MAX)
}

fn count_bson(n: usize) -> Bson {
    i32::try_from(n).map_or(Bson::Int64(n as i64), Bson::Int32)
}

fn execute_project(fragments: &[Fragment], document: &Document) -> DocumentStoreResult<Document> {
    let excludes_id = fragments
        .iter()
        .any(|f| f.name == ID_FIELD && f.value == FragmentValue::Exclude);
    let inclusion = fragments.iter().any(|f| f.value != FragmentValue::Exclude);

    if !inclusion {
        let mut projected = document.clone();
        for fragment in fragments {
            remove_path(&mut projected, &fragment.name);
        }
        return Ok(projected);
    }

    if let Some(excluded) = fragments
        .iter()
        .find(|f| f.name != ID_FIELD && f.value == FragmentValue::Exclude)
    {
        return Err(DocumentStoreError::Native {
            code: Some(31254),
            message: format!(
                "Invalid $project :: caused by :: Cannot do exclusion on field {} in inclusion projection",
                excluded.name
            ),
        });
    }

    let mut projected = Document::new();
    if !excludes_id {
        if let Some(id) = document.get(ID_FIELD) {
            projected.insert(ID_FIELD, id.clone());
        }
    }

    for fragment in fragments {
        match &fragment.value {
            FragmentValue::Include => {
                if let Some(value) = lookup(document, &fragment.name) {
                    set_path(&mut projected, &fragment.name, value.clone());
                }
            }
            FragmentValue::Computed(expr) => {
                if let Some(value) = evaluate(expr, document)? {
                    set_path(&mut projected, &fragment.name, value);
                }
            }
            FragmentValue::Exclude => {}
        }
    }

    Ok(projected)
}

fn remove_path(document: &mut Document, path: &str) {
    match path.split_once('.') {
        None => {
            document.remove(path);
        }
        Some((head, rest)) => {
            if let Some(Bson::Document(inner)) = document.get_mut(head) {
                remove_path(inner, rest);
            }
        }
    }
}

fn execute_add_fields(fragments: &[Fragment], mut document: Document) -> DocumentStoreResult<Document> {
    for fragment in fragments {
        let FragmentValue::Computed(expr) = &fragment.value else {
            return Err(not_computed("$addFields", fragment));
        };

        if let Some(value) = evaluate(expr, &document)? {
            set_path(&mut document, &fragment.name, value);
        }
    }

    Ok(document)
}

fn not_computed(stage: &str, fragment: &Fragment) -> DocumentStoreError {
    DocumentStoreError::InvalidOperand(format!(
        "`{}` can only be included or excluded in $project, not in {stage}",
        fragment.name
    ))
}

fn execute_sort(keys: &[SortKey], documents: &mut [Document]) {
    documents.sort_by(|a, b| {
        for key in keys {
            let left = lookup(a, key.field()).unwrap_or(&Bson::Null);
            let right = lookup(b, key.field()).unwrap_or(&Bson::Null);

            let ordering = match key {
                SortKey::Ascending(_) => Comparable(left).cmp(&Comparable(right)),
                SortKey::Descending(_) => Comparable(right).cmp(&Comparable(left)),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }

        Ordering::Equal
    });
}

fn execute_unwind(path: &str, documents: Vec<Document>) -> Vec<Document> {
    let mut unwound = Vec::with_capacity(documents.len());

    for document in documents {
        match lookup(&document, path) {
            None | Some(Bson::Null) => {}
            Some(Bson::Array(items)) => {
                for item in items.clone() {
                    let mut copy = document.clone();
                    set_path(&mut copy, path, item);
                    unwound.push(copy);
                }
            }
            Some(_) => unwound.push(document),
        }
    }

    unwound
}

/// Running state of one `$group` accumulator.
#[derive(Debug)]
enum Accumulator {
    Sum(Bson),
    Avg { total: f64, count: u64 },
    Min(Option<Bson>),
    Max(Option<Bson>),
    First(Option<Bson>),
    Last(Bson),
    Push(Vec<Bson>),
    AddToSet(Vec<Bson>),
}

impl Accumulator {
    fn for_operator(operator: &str) -> DocumentStoreResult<Self> {
        Ok(match operator {
            "$sum" => Accumulator::Sum(Bson::Int32(0)),
            "$avg" => Accumulator::Avg { total: 0.0, count: 0 },
            "$min" => Accumulator::Min(None),
            "$max" => Accumulator::Max(None),
            "$first" => Accumulator::First(None),
            "$last" => Accumulator::Last(Bson::Null),
            "$push" => Accumulator::Push(Vec::new()),
            "$addToSet" => Accumulator::AddToSet(Vec::new()),
            other => {
                return Err(DocumentStoreError::Native {
                    code: Some(15952),
                    message: format!("unknown group operator '{other}'"),
                });
            }
        })
    }

    fn accumulate(&mut self, value: Option<Bson>) {
        match self {
            Accumulator::Sum(total) => {
                if let Some(value) = value.filter(is_number) {
                    *total = add_numbers(total, &value);
                }
            }
            Accumulator::Avg { total, count } => {
                if let Some(value) = value.as_ref().and_then(as_f64) {
                    *total += value;
                    *count += 1;
                }
            }
            Accumulator::Min(current) => keep_extreme(current, value, Ordering::Less),
            Accumulator::Max(current) => keep_extreme(current, value, Ordering::Greater),
            Accumulator::First(current) => {
                if current.is_none() {
                    *current = Some(value.unwrap_or(Bson::Null));
                }
            }
            Accumulator::Last(current) => *current = value.unwrap_or(Bson::Null),
            Accumulator::Push(items) => items.extend(value),
            Accumulator::AddToSet(items) => {
                if let Some(value) = value {
                    if !items.iter().any(|item| values_equal(item, &value)) {
                        items.push(value);
                    }
                }
            }
        }
    }

    fn finish(self) -> Bson {
        match self {
            Accumulator::Sum(total) => total,
            Accumulator::Avg { count: 0, .. } => Bson::Null,
            Accumulator::Avg { total, count } => Bson::Double(total / count as f64),
            Accumulator::Min(value) | Accumulator::Max(value) | Accumulator::First(value) => {
                value.unwrap_or(Bson::Null)
            }
            Accumulator::Last(value) => value,
            Accumulator::Push(items) | Accumulator::AddToSet(items) => Bson::Array(items),
        }
    }
}

/// Replaces `current` with `value` when it orders `wanted` relative to it. Nulls never count.
fn keep_extreme(current: &mut Option<Bson>, value: Option<Bson>, wanted: Ordering) {
    let Some(value) = value.filter(|v| !matches!(v, Bson::Null | Bson::Undefined)) else {
        return;
    };

    match current {
        Some(existing) if Comparable(&value).cmp(&Comparable(existing)) != wanted => {}
        _ => *current = Some(value),
    }
}

fn execute_group(id: &AggExpr, accumulators: &[Fragment], documents: &[Document]) -> DocumentStoreResult<Vec<Document>> {
    render::require_group_names(accumulators)?;

    let mut specs = Vec::with_capacity(accumulators.len());
    for fragment in accumulators {
        match &fragment.value {
            FragmentValue::Computed(AggExpr::Operator(operator, argument)) => {
                specs.push((fragment.name.as_str(), operator.as_str(), argument.as_ref()));
            }
            FragmentValue::Computed(_) => {
                return Err(DocumentStoreError::Native {
                    code: Some(40234),
                    message: format!("The field '{}' must be an accumulator object", fragment.name),
                });
            }
            FragmentValue::Include | FragmentValue::Exclude => {
                return Err(not_computed("$group", fragment));
            }
        }
    }

    // Groups keep the order in which their key was first seen.
    let mut groups: Vec<(Bson, Vec<Accumulator>)> = Vec::new();

    for document in documents {
        let key = evaluate(id, document)?.unwrap_or(Bson::Null);
        let index = match groups.iter().position(|(existing, _)| values_equal(existing, &key)) {
            Some(index) => index,
            None => {
                let states = specs
                    .iter()
                    .map(|(_, operator, _)| Accumulator::for_operator(operator))
                    .collect::<DocumentStoreResult<Vec<_>>>()?;
                groups.push((key, states));
                groups.len() - 1
            }
        };

        for (state, (_, _, argument)) in groups[index].1.iter_mut().zip(&specs) {
            state.accumulate(evaluate(argument, document)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, states)| {
            let mut output = Document::new();
            output.insert(ID_FIELD, key);
            for (state, (name, _, _)) in states.into_iter().zip(&specs) {
                output.insert(*name, state.finish());
            }
            output
        })
        .collect())
}

fn is_number(value: &Bson) -> bool {
    matches!(value, Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_))
}

fn as_f64(value: &Bson) -> Option<f64> {
    match value {
        Bson::Int32(n) => Some(f64::from(*n)),
        Bson::Int64(n) => Some(*n as f64),
        Bson::Double(n) => Some(*n),
        _ => None,
    }
}

fn as_i64(value: &Bson) -> Option<i64> {
    match value {
        Bson::Int32(n) => Some(i64::from(*n)),
        Bson::Int64(n) => Some(*n),
        Bson::Double(n) if n.fract() == 0.0 => Some(*n as i64),
        _ => None,
    }
}

/// Adds two numbers, widening the result only as far as needed.
fn add_numbers(a: &Bson, b: &Bson) -> Bson {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x
            .checked_add(*y)
            .map_or(Bson::Int64(i64::from(*x) + i64::from(*y)), Bson::Int32),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            match (as_i64(a), as_i64(b)) {
                (Some(x), Some(y)) => x
                    .checked_add(y)
                    .map_or(Bson::Double(x as f64 + y as f64), Bson::Int64),
                _ => Bson::Null,
            }
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Bson::Double(x + y),
            _ => Bson::Null,
        },
    }
}

fn multiply_numbers(a: &Bson, b: &Bson) -> Bson {
    match (a, b) {
        (Bson::Int32(x), Bson::Int32(y)) => x
            .checked_mul(*y)
            .map_or(Bson::Int64(i64::from(*x) * i64::from(*y)), Bson::Int32),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => {
            match (as_i64(a), as_i64(b)) {
                (Some(x), Some(y)) => x
                    .checked_mul(y)
                    .map_or(Bson::Double(x as f64 * y as f64), Bson::Int64),
                _ => Bson::Null,
            }
        }
        _ => match (as_f64(a), as_f64(b)) {
            (Some(x), Some(y)) => Bson::Double(x * y),
            _ => Bson::Null,
        },
    }
}

/// Evaluates an expression against a document. `None` means the value is missing, as for a
/// path that does not resolve.
pub(crate) fn evaluate(expr: &AggExpr, document: &Document) -> DocumentStoreResult<Option<Bson>> {
    Ok(match expr {
        AggExpr::Literal(value) => Some(value.clone()),
        AggExpr::Path(path) => lookup(document, path).cloned(),
        AggExpr::Object(entries) => {
            let mut object = Document::new();
            for (key, value) in entries {
                if let Some(value) = evaluate(value, document)? {
                    object.insert(key.as_str(), value);
                }
            }
            Some(Bson::Document(object))
        }
        AggExpr::Array(items) => Some(Bson::Array(
            items
                .iter()
                .map(|item| Ok(evaluate(item, document)?.unwrap_or(Bson::Null)))
                .collect::<DocumentStoreResult<_>>()?,
        )),
        AggExpr::Operator(operator, argument) => evaluate_operator(operator, argument, document)?,
        AggExpr::Invalid(reason) => return Err(DocumentStoreError::InvalidOperand(reason.clone())),
    })
}

fn arguments(argument: &AggExpr, document: &Document) -> DocumentStoreResult<Vec<Bson>> {
    match argument {
        AggExpr::Array(items) => items
            .iter()
            .map(|item| Ok(evaluate(item, document)?.unwrap_or(Bson::Null)))
            .collect(),
        single => Ok(vec![evaluate(single, document)?.unwrap_or(Bson::Null)]),
    }
}

fn arity(operator: &str, args: &[Bson], expected: usize) -> DocumentStoreResult<()> {
    if args.len() == expected {
        return Ok(());
    }

    Err(DocumentStoreError::Native {
        code: Some(16020),
        message: format!(
            "Expression {operator} takes exactly {expected} arguments. {} were passed in.",
            args.len()
        ),
    })
}

fn evaluate_operator(operator: &str, argument: &AggExpr, document: &Document) -> DocumentStoreResult<Option<Bson>> {
    if operator == "$literal" {
        return Ok(Some(match argument {
            AggExpr::Literal(value) => value.clone(),
            other => evaluate(other, document)?.unwrap_or(Bson::Null),
        }));
    }

    let args = arguments(argument, document)?;

    Ok(match operator {
        "$size" => {
            arity(operator, &args, 1)?;
            match &args[0] {
                Bson::Array(items) => Some(count_bson(items.len())),
                other => {
                    return Err(DocumentStoreError::Native {
                        code: Some(17124),
                        message: format!(
                            "The argument to $size must be an array. Type of argument: {:?}",
                            other.element_type()
                        ),
                    });
                }
            }
        }
        "$arrayElemAt" => {
            arity(operator, &args, 2)?;
            match (&args[0], as_i64(&args[1])) {
                (Bson::Null, _) => Some(Bson::Null),
                (Bson::Array(items), Some(index)) => {
                    let len = items.len() as i64;
                    let position = if index < 0 { len + index } else { index };
                    usize::try_from(position).ok().and_then(|p| items.get(p)).cloned()
                }
                _ => {
                    return Err(DocumentStoreError::Native {
                        code: Some(28689),
                        message: "$arrayElemAt's first argument must be an array and its second an integer"
                            .to_string(),
                    });
                }
            }
        }
        "$objectToArray" => {
            arity(operator, &args, 1)?;
            match &args[0] {
                Bson::Null => Some(Bson::Null),
                Bson::Document(object) => Some(Bson::Array(
                    object
                        .iter()
                        .map(|(k, v)| {
                            let mut pair = Document::new();
                            pair.insert("k", k.as_str());
                            pair.insert("v", v.clone());
                            Bson::Document(pair)
                        })
                        .collect(),
                )),
                _ => {
                    return Err(DocumentStoreError::Native {
                        code: Some(40390),
                        message: "$objectToArray requires a document input".to_string(),
                    });
                }
            }
        }
        "$add" | "$multiply" => {
            if args.iter().any(|a| matches!(a, Bson::Null)) {
                return Ok(Some(Bson::Null));
            }
            if let Some(bad) = args.iter().find(|a| !is_number(a)) {
                return Err(DocumentStoreError::InvalidOperand(format!(
                    "{operator} only supports numeric types, got {bad}"
                )));
            }

            let (identity, fold): (Bson, fn(&Bson, &Bson) -> Bson) = if operator == "$add" {
                (Bson::Int32(0), add_numbers)
            } else {
                (Bson::Int32(1), multiply_numbers)
            };
            Some(args.iter().fold(identity, |acc, value| fold(&acc, value)))
        }
        "$concat" => {
            let mut joined = String::new();
            for arg in &args {
                match arg {
                    Bson::Null => return Ok(Some(Bson::Null)),
                    Bson::String(s) => joined.push_str(s),
                    other => {
                        return Err(DocumentStoreError::InvalidOperand(format!(
                            "$concat only supports strings, got {other}"
                        )));
                    }
                }
            }
            Some(Bson::String(joined))
        }
        "$toUpper" | "$toLower" => {
            arity(operator, &args, 1)?;
            let text = match &args[0] {
                Bson::Null => String::new(),
                Bson::String(s) => s.clone(),
                other => other.to_string(),
            };
            Some(Bson::String(if operator == "$toUpper" {
                text.to_uppercase()
            } else {
                text.to_lowercase()
            }))
        }
        "$ifNull" => args
            .iter()
            .find(|a| !matches!(a, Bson::Null | Bson::Undefined))
            .or(args.last())
            .cloned(),
        "$eq" => {
            arity(operator, &args, 2)?;
            Some(Bson::Boolean(values_equal(&args[0], &args[1])))
        }
        other => {
            return Err(DocumentStoreError::InvalidOperand(format!(
                "unsupported expression operator {other}"
            )));
        }
    })
}
