//! Compiled-operation evaluation.
//!
//! The evaluator executes [`Op`] trees against an [`InMemoryStore`]. It
//! is the crate's reference backend: small, sequential and permissive in
//! exactly the documented places. Type misuse degrades to null or to an
//! empty result; the only hard failures are embedded `fail` ops,
//! validator misses and malformed mutation inputs.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde_json::{Map, Value};

use crate::codegen::{Op, SortKey};
use crate::ir::{BinaryOperator, UnaryOperator, ValueKind};
use crate::schema::{RelationSide, ID_FIELD};

use super::errors::{EvalError, EvalResult};
use super::store::InMemoryStore;

/// Slot values visible to an evaluation.
///
/// Slots are compile-allocated and never reused for different bindings,
/// so assignments are plain inserts with no scoping bookkeeping.
#[derive(Debug, Clone, Default)]
pub struct Env {
    slots: BTreeMap<String, Value>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, slot: &str, value: Value) {
        self.slots.insert(slot.to_string(), value);
    }

    pub fn get(&self, slot: &str) -> Option<&Value> {
        self.slots.get(slot)
    }
}

/// Evaluates one compiled expression.
pub fn evaluate(op: &Op, env: &mut Env, store: &mut InMemoryStore) -> EvalResult<Value> {
    Evaluator { store }.eval(op, env)
}

/// Truthiness of a value.
///
/// Null and false are falsy, numbers are falsy at zero, strings when
/// empty. Lists and objects are always truthy, including empty ones;
/// emptiness is a size question, not a truth question.
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// The canonical text form of a value.
pub fn to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(_) | Value::Object(_) => serde_json::to_string(value).unwrap_or_default(),
    }
}

/// Total order over values: null, then booleans, then numbers, then
/// strings, then lists, then objects. Within a type, numbers compare
/// numerically, lists lexicographically by element and objects by sorted
/// key-value pairs. Every value pair is comparable, so mixed-type lists
/// sort deterministically.
pub fn compare_values(a: &Value, b: &Value) -> Ordering {
    let rank_a = type_rank(a);
    let rank_b = type_rank(b);
    if rank_a != rank_b {
        return rank_a.cmp(&rank_b);
    }
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Number(x), Value::Number(y)) => {
            let x = x.as_f64().unwrap_or(0.0);
            let y = y.as_f64().unwrap_or(0.0);
            x.partial_cmp(&y).unwrap_or(Ordering::Equal)
        }
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Array(x), Value::Array(y)) => {
            for (ex, ey) in x.iter().zip(y.iter()) {
                let ord = compare_values(ex, ey);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        (Value::Object(x), Value::Object(y)) => {
            for ((kx, vx), (ky, vy)) in x.iter().zip(y.iter()) {
                let ord = kx.cmp(ky);
                if ord != Ordering::Equal {
                    return ord;
                }
                let ord = compare_values(vx, vy);
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            x.len().cmp(&y.len())
        }
        _ => Ordering::Equal,
    }
}

fn type_rank(value: &Value) -> u8 {
    match value {
        Value::Null => 0,
        Value::Bool(_) => 1,
        Value::Number(_) => 2,
        Value::String(_) => 3,
        Value::Array(_) => 4,
        Value::Object(_) => 5,
    }
}

/// The value class a value falls into. Classes are mutually exclusive.
pub fn classify(value: &Value) -> ValueKind {
    match value {
        Value::Null => ValueKind::Null,
        Value::Bool(_) | Value::Number(_) | Value::String(_) => ValueKind::Scalar,
        Value::Array(_) => ValueKind::List,
        Value::Object(_) => ValueKind::Object,
    }
}

/// The id a value refers to: either a bare id string or a stored entity
/// carrying one.
pub fn record_id(value: &Value) -> Option<&str> {
    match value {
        Value::String(id) => Some(id),
        Value::Object(fields) => fields.get(ID_FIELD).and_then(Value::as_str),
        _ => None,
    }
}

struct Evaluator<'a> {
    store: &'a mut InMemoryStore,
}

impl Evaluator<'_> {
    fn eval(&mut self, op: &Op, env: &mut Env) -> EvalResult<Value> {
        Ok(match op {
            Op::Const(value) => value.clone(),
            Op::Load(slot) => env
                .get(slot)
                .cloned()
                .ok_or_else(|| EvalError::UnknownSlot(slot.clone()))?,
            Op::Bind { slot, value, body } => {
                let bound = self.eval(value, env)?;
                env.set(slot, bound);
                self.eval(body, env)?
            }

            Op::MakeObject(pairs) => {
                let mut fields = Map::new();
                for (name, value_op) in pairs {
                    let value = self.eval(value_op, env)?;
                    fields.insert(name.clone(), value);
                }
                Value::Object(fields)
            }
            Op::MakeList(items) => {
                let mut values = Vec::with_capacity(items.len());
                for item in items {
                    values.push(self.eval(item, env)?);
                }
                Value::Array(values)
            }
            Op::Concat(lists) => {
                let mut values = Vec::new();
                for list in lists {
                    // Non-list operands contribute nothing.
                    if let Value::Array(items) = self.eval(list, env)? {
                        values.extend(items);
                    }
                }
                Value::Array(values)
            }
            Op::GetField { object, name } => {
                let object = self.eval(object, env)?;
                match object {
                    Value::Object(mut fields) => fields.remove(name).unwrap_or(Value::Null),
                    _ => Value::Null,
                }
            }

            Op::Scan { collection } => Value::Array(self.store.records(collection)),
            Op::Transform {
                source,
                slot,
                filter,
                ordering,
                cap,
                map,
            } => {
                let items = match self.eval(source, env)? {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                let mut kept = Vec::with_capacity(items.len());
                for item in items {
                    env.set(slot, item.clone());
                    if is_truthy(&self.eval(filter, env)?) {
                        kept.push(item);
                    }
                }
                if !ordering.is_empty() {
                    kept = self.sort_items(kept, slot, ordering, env)?;
                }
                if let Some(cap) = cap {
                    kept.truncate(*cap as usize);
                }
                let mut mapped = Vec::with_capacity(kept.len());
                for item in kept {
                    env.set(slot, item);
                    mapped.push(self.eval(map, env)?);
                }
                Value::Array(mapped)
            }
            Op::Count(list) => match self.eval(list, env)? {
                Value::Array(items) => Value::from(items.len() as u64),
                _ => Value::from(0u64),
            },
            Op::First(list) => match self.eval(list, env)? {
                Value::Array(items) => items.into_iter().next().unwrap_or(Value::Null),
                _ => Value::Null,
            },
            Op::Merge(objects) => {
                let mut fields = Map::new();
                for object in objects {
                    // Right-biased shallow merge; non-objects are skipped.
                    if let Value::Object(overlay) = self.eval(object, env)? {
                        for (name, value) in overlay {
                            fields.insert(name, value);
                        }
                    }
                }
                Value::Object(fields)
            }

            Op::Neighbors {
                source,
                relation,
                side,
                target,
            } => {
                let source_value = self.eval(source, env)?;
                let Some(source_id) = record_id(&source_value).map(str::to_string) else {
                    return Ok(Value::Array(Vec::new()));
                };
                let neighbor_ids: Vec<String> = self
                    .store
                    .edges(relation)
                    .iter()
                    .filter_map(|edge| match side {
                        RelationSide::From if edge.from_id == source_id => {
                            Some(edge.to_id.clone())
                        }
                        RelationSide::To if edge.to_id == source_id => Some(edge.from_id.clone()),
                        _ => None,
                    })
                    .collect();
                let mut neighbors = Vec::with_capacity(neighbor_ids.len());
                for id in neighbor_ids {
                    // Dangling edges are silently skipped.
                    if let Some(record) = self.store.get(target, &id) {
                        neighbors.push(record.clone());
                    }
                }
                Value::Array(neighbors)
            }

            Op::Insert { collection, object } => {
                let Value::Object(mut fields) = self.eval(object, env)? else {
                    return Err(EvalError::QueryFailed(
                        "create payload must be an object".to_string(),
                    ));
                };
                let id = self.store.allocate_id();
                fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                self.store.put(collection, &id, Value::Object(fields));
                Value::String(id)
            }
            Op::Update {
                collection,
                slot,
                filter,
                patch,
                cap,
            } => {
                let mut matched = self.matching_records(collection, slot, filter, env)?;
                if let Some(cap) = cap {
                    matched.truncate(*cap as usize);
                }
                let mut updated = Vec::with_capacity(matched.len());
                for (id, original) in matched {
                    // Patch values see the pre-update record.
                    env.set(slot, original.clone());
                    let mut fields = match original {
                        Value::Object(fields) => fields,
                        _ => Map::new(),
                    };
                    for (name, value_op) in patch {
                        let value = self.eval(value_op, env)?;
                        fields.insert(name.clone(), value);
                    }
                    // The id field is not patchable.
                    fields.insert(ID_FIELD.to_string(), Value::String(id.clone()));
                    let record = Value::Object(fields);
                    self.store.put(collection, &id, record.clone());
                    updated.push(record);
                }
                Value::Array(updated)
            }
            Op::Delete {
                collection,
                slot,
                filter,
                cap,
            } => {
                let mut matched = self.matching_records(collection, slot, filter, env)?;
                if let Some(cap) = cap {
                    matched.truncate(*cap as usize);
                }
                let mut removed = Vec::with_capacity(matched.len());
                for (id, snapshot) in matched {
                    self.store.remove(collection, &id);
                    removed.push(snapshot);
                }
                Value::Array(removed)
            }
            Op::LinkEdges { relation, edges } => {
                let mut resolved = Vec::with_capacity(edges.len());
                for (from_op, to_op) in edges {
                    let from = self.endpoint_id(from_op, env)?;
                    let to = self.endpoint_id(to_op, env)?;
                    resolved.push((from, to));
                }
                for (from, to) in resolved {
                    self.store.add_edge(relation, &from, &to);
                }
                Value::Null
            }
            Op::UnlinkEdges { relation, from, to } => {
                let from_ids = self.endpoint_filter(from.as_deref(), env)?;
                let to_ids = self.endpoint_filter(to.as_deref(), env)?;
                self.store.remove_edges(relation, |edge| {
                    endpoint_matches(&from_ids, &edge.from_id)
                        && endpoint_matches(&to_ids, &edge.to_id)
                });
                Value::Null
            }
            Op::ReplaceEdge {
                relation,
                existing_from,
                existing_to,
                new_from,
                new_to,
            } => {
                let from_ids = self.endpoint_filter(existing_from.as_deref(), env)?;
                let to_ids = self.endpoint_filter(existing_to.as_deref(), env)?;
                let new_from = self.endpoint_id(new_from, env)?;
                let new_to = self.endpoint_id(new_to, env)?;
                self.store.remove_first_edge(relation, |edge| {
                    endpoint_matches(&from_ids, &edge.from_id)
                        && endpoint_matches(&to_ids, &edge.to_id)
                });
                self.store.add_edge(relation, &new_from, &new_to);
                Value::Null
            }

            Op::Branch {
                condition,
                then_op,
                else_op,
            } => {
                if is_truthy(&self.eval(condition, env)?) {
                    self.eval(then_op, env)?
                } else {
                    self.eval(else_op, env)?
                }
            }
            Op::KindOf { value, kind } => {
                let value = self.eval(value, env)?;
                Value::Bool(classify(&value) == *kind)
            }
            Op::Unary { operator, operand } => {
                let operand = self.eval(operand, env)?;
                match operator {
                    UnaryOperator::Not => Value::Bool(!is_truthy(&operand)),
                    UnaryOperator::ToText => Value::String(to_text(&operand)),
                }
            }
            Op::Binary { operator, lhs, rhs } => match operator {
                // And and Or short-circuit; everything else is strict.
                BinaryOperator::And => {
                    if !is_truthy(&self.eval(lhs, env)?) {
                        Value::Bool(false)
                    } else {
                        Value::Bool(is_truthy(&self.eval(rhs, env)?))
                    }
                }
                BinaryOperator::Or => {
                    if is_truthy(&self.eval(lhs, env)?) {
                        Value::Bool(true)
                    } else {
                        Value::Bool(is_truthy(&self.eval(rhs, env)?))
                    }
                }
                _ => {
                    let lhs = self.eval(lhs, env)?;
                    let rhs = self.eval(rhs, env)?;
                    binary_value(*operator, &lhs, &rhs)
                }
            },

            Op::Fail { message } => return Err(EvalError::QueryFailed(message.clone())),
        })
    }

    /// Sorts items by their precomputed key rows. The sort is stable, so
    /// full ties keep source order.
    fn sort_items(
        &mut self,
        items: Vec<Value>,
        slot: &str,
        ordering: &[SortKey],
        env: &mut Env,
    ) -> EvalResult<Vec<Value>> {
        let mut keyed = Vec::with_capacity(items.len());
        for item in items {
            env.set(slot, item.clone());
            let mut keys = Vec::with_capacity(ordering.len());
            for sort_key in ordering {
                keys.push(self.eval(&sort_key.key, env)?);
            }
            keyed.push((keys, item));
        }
        keyed.sort_by(|(a, _), (b, _)| {
            for (index, sort_key) in ordering.iter().enumerate() {
                let mut ord = compare_values(&a[index], &b[index]);
                if sort_key.descending {
                    ord = ord.reverse();
                }
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
        Ok(keyed.into_iter().map(|(_, item)| item).collect())
    }

    /// Records of a collection matching a filter, as (id, snapshot)
    /// pairs in id order. Snapshots are taken before any mutation.
    fn matching_records(
        &mut self,
        collection: &str,
        slot: &str,
        filter: &Op,
        env: &mut Env,
    ) -> EvalResult<Vec<(String, Value)>> {
        let ids = self.store.ids(collection);
        let mut matched = Vec::new();
        for id in ids {
            let Some(record) = self.store.get(collection, &id).cloned() else {
                continue;
            };
            env.set(slot, record.clone());
            if is_truthy(&self.eval(filter, env)?) {
                matched.push((id, record));
            }
        }
        Ok(matched)
    }

    /// Resolves one edge endpoint to an id.
    fn endpoint_id(&mut self, op: &Op, env: &mut Env) -> EvalResult<String> {
        let value = self.eval(op, env)?;
        record_id(&value)
            .map(str::to_string)
            .ok_or_else(|| {
                EvalError::QueryFailed("edge endpoint must be an id or a stored entity".to_string())
            })
    }

    /// Resolves an optional endpoint filter to a set of ids. A missing
    /// filter matches any endpoint; a list value matches any of its ids.
    fn endpoint_filter(
        &mut self,
        op: Option<&Op>,
        env: &mut Env,
    ) -> EvalResult<Option<Vec<String>>> {
        let Some(op) = op else { return Ok(None) };
        let value = self.eval(op, env)?;
        let ids = match value {
            Value::Array(items) => {
                let mut ids = Vec::with_capacity(items.len());
                for item in items {
                    ids.push(record_id(&item).map(str::to_string).ok_or_else(|| {
                        EvalError::QueryFailed(
                            "edge endpoint must be an id or a stored entity".to_string(),
                        )
                    })?);
                }
                ids
            }
            other => vec![record_id(&other).map(str::to_string).ok_or_else(|| {
                EvalError::QueryFailed(
                    "edge endpoint must be an id or a stored entity".to_string(),
                )
            })?],
        };
        Ok(Some(ids))
    }
}

fn endpoint_matches(filter: &Option<Vec<String>>, id: &str) -> bool {
    filter.as_ref().map_or(true, |ids| ids.iter().any(|x| x == id))
}

/// Applies a binary operator to already-evaluated operands.
///
/// And and Or are eager here; short-circuiting lives in the evaluator
/// and only decides whether the right side runs, never the result.
/// Arithmetic stays in integers while both operands are integers and the
/// result fits; otherwise it goes through floats. Division and modulo by
/// zero yield null, as does any operand mix an operator has no meaning
/// for.
fn binary_value(operator: BinaryOperator, lhs: &Value, rhs: &Value) -> Value {
    match operator {
        BinaryOperator::And => Value::Bool(is_truthy(lhs) && is_truthy(rhs)),
        BinaryOperator::Or => Value::Bool(is_truthy(lhs) || is_truthy(rhs)),
        BinaryOperator::Equal => Value::Bool(compare_values(lhs, rhs) == Ordering::Equal),
        BinaryOperator::Unequal => Value::Bool(compare_values(lhs, rhs) != Ordering::Equal),
        BinaryOperator::LessThan => Value::Bool(compare_values(lhs, rhs) == Ordering::Less),
        BinaryOperator::LessThanOrEqual => {
            Value::Bool(compare_values(lhs, rhs) != Ordering::Greater)
        }
        BinaryOperator::GreaterThan => Value::Bool(compare_values(lhs, rhs) == Ordering::Greater),
        BinaryOperator::GreaterThanOrEqual => {
            Value::Bool(compare_values(lhs, rhs) != Ordering::Less)
        }

        BinaryOperator::Add => {
            if let (Value::String(a), Value::String(b)) = (lhs, rhs) {
                return Value::String(format!("{a}{b}"));
            }
            arithmetic(lhs, rhs, i64::checked_add, |a, b| a + b)
        }
        BinaryOperator::Subtract => arithmetic(lhs, rhs, i64::checked_sub, |a, b| a - b),
        BinaryOperator::Multiply => arithmetic(lhs, rhs, i64::checked_mul, |a, b| a * b),
        BinaryOperator::Divide => match float_pair(lhs, rhs) {
            Some((_, b)) if b == 0.0 => Value::Null,
            Some((a, b)) => Value::from(a / b),
            None => Value::Null,
        },
        BinaryOperator::Modulo => match float_pair(lhs, rhs) {
            Some((_, b)) if b == 0.0 => Value::Null,
            Some((a, b)) => Value::from(a % b),
            None => Value::Null,
        },

        BinaryOperator::Contains => match lhs {
            Value::Array(items) => Value::Bool(
                items
                    .iter()
                    .any(|item| compare_values(item, rhs) == Ordering::Equal),
            ),
            _ => Value::Bool(to_text(lhs).contains(&to_text(rhs))),
        },
        BinaryOperator::In => match rhs {
            Value::Array(items) => Value::Bool(
                items
                    .iter()
                    .any(|item| compare_values(item, lhs) == Ordering::Equal),
            ),
            _ => Value::Bool(to_text(rhs).contains(&to_text(lhs))),
        },
        BinaryOperator::StartsWith => Value::Bool(to_text(lhs).starts_with(&to_text(rhs))),
        BinaryOperator::EndsWith => Value::Bool(to_text(lhs).ends_with(&to_text(rhs))),
    }
}

fn arithmetic(
    lhs: &Value,
    rhs: &Value,
    int_op: fn(i64, i64) -> Option<i64>,
    float_op: fn(f64, f64) -> f64,
) -> Value {
    if let (Some(a), Some(b)) = (lhs.as_i64(), rhs.as_i64()) {
        if let Some(result) = int_op(a, b) {
            return Value::from(result);
        }
    }
    match float_pair(lhs, rhs) {
        Some((a, b)) => Value::from(float_op(a, b)),
        None => Value::Null,
    }
}

fn float_pair(lhs: &Value, rhs: &Value) -> Option<(f64, f64)> {
    Some((lhs.as_f64()?, rhs.as_f64()?))
}
