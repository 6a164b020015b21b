//! Compiled operation form.
//!
//! The compiler lowers IR trees into [`Op`] values, a first-order target
//! with every variable reference resolved to a named slot and every
//! pre-execution step flattened out of the expression. Two structurally
//! equal IR trees lower to equal [`CompiledOperation`]s, which is what
//! makes compilation testably deterministic.

use serde_json::Value;

use crate::ir::{BinaryOperator, ResultValidator, UnaryOperator, ValueKind};
use crate::schema::RelationSide;

/// One ordering key of a compiled list transform.
#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub key: Op,
    pub descending: bool,
}

/// A compiled expression.
///
/// Slots are plain strings: `v1`, `v2` for lexical bindings in traversal
/// order and `p1`, `p2` for pre-execution step results. The enum carries
/// no schema references; by this point names have been validated and
/// authorization applied.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    /// An embedded constant.
    Const(Value),
    /// Reads a slot.
    Load(String),
    /// Evaluates `value`, binds it to `slot`, evaluates `body`.
    Bind {
        slot: String,
        value: Box<Op>,
        body: Box<Op>,
    },

    MakeObject(Vec<(String, Op)>),
    MakeList(Vec<Op>),
    Concat(Vec<Op>),
    GetField {
        object: Box<Op>,
        name: String,
    },

    /// All records of a collection, in id order.
    Scan {
        collection: String,
    },
    /// Filter, order, cap and map over a list, in that fixed order.
    Transform {
        source: Box<Op>,
        slot: String,
        filter: Box<Op>,
        ordering: Vec<SortKey>,
        cap: Option<u64>,
        map: Box<Op>,
    },
    Count(Box<Op>),
    First(Box<Op>),
    Merge(Vec<Op>),

    /// Records related to `source` over a relation, in edge insertion
    /// order.
    Neighbors {
        source: Box<Op>,
        relation: String,
        side: RelationSide,
        target: String,
    },

    Insert {
        collection: String,
        object: Box<Op>,
    },
    Update {
        collection: String,
        slot: String,
        filter: Box<Op>,
        patch: Vec<(String, Op)>,
        cap: Option<u64>,
    },
    Delete {
        collection: String,
        slot: String,
        filter: Box<Op>,
        cap: Option<u64>,
    },
    LinkEdges {
        relation: String,
        edges: Vec<(Op, Op)>,
    },
    UnlinkEdges {
        relation: String,
        from: Option<Box<Op>>,
        to: Option<Box<Op>>,
    },
    ReplaceEdge {
        relation: String,
        existing_from: Option<Box<Op>>,
        existing_to: Option<Box<Op>>,
        new_from: Box<Op>,
        new_to: Box<Op>,
    },

    Branch {
        condition: Box<Op>,
        then_op: Box<Op>,
        else_op: Box<Op>,
    },
    KindOf {
        value: Box<Op>,
        kind: ValueKind,
    },
    Unary {
        operator: UnaryOperator,
        operand: Box<Op>,
    },
    Binary {
        operator: BinaryOperator,
        lhs: Box<Op>,
        rhs: Box<Op>,
    },

    /// Aborts the operation with a fixed message.
    Fail {
        message: String,
    },
}

/// One flattened pre-execution step.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledStep {
    /// The step's result slot, `p1`, `p2` and so on.
    pub name: String,
    pub op: Op,
    pub validator: Option<ResultValidator>,
}

/// A fully compiled operation: pre-execution steps in execution order,
/// then the main expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledOperation {
    pub pre_exec: Vec<CompiledStep>,
    pub main: Op,
}
