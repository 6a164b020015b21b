//! Query intermediate representation.
//!
//! Operations against the data model are expressed as immutable trees of
//! [`QueryNode`] values. Builders produce trees, rewrite passes transform
//! them, and backends consume them; the IR itself depends on nothing but
//! the schema metadata it references.
//!
//! # Design Principles
//! - **Closed vocabulary**: one tagged enum, exhaustively matched by every
//!   pass, so a new node kind cannot be half-supported.
//! - **Immutable sharing**: nodes are held through [`Node`] handles and
//!   rewrites reuse untouched subtrees.
//! - **Deterministic rendering**: [`QueryNode::describe`] derives purely
//!   from node fields.
//! - **Declared slot roles**: each child position is statically an output
//!   or a control slot, which drives error propagation.

mod describe;
mod node;
mod slots;

pub use node::{
    BinaryOperator, EdgeRef, EdgeSpec, Node, OrderClause, OrderDirection, PreExecStep,
    PropertySpec, QueryNode, ResultValidator, TransformListBuilder, UnaryOperator, ValueKind,
    VarBinding,
};
pub use slots::{map_children, try_map_children, ChildSlot};
