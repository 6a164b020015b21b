//! Error propagation.
//!
//! Authorization and validation leave [`QueryNode::RuntimeError`] nodes
//! embedded at the spot that caused them, which may be deep inside a
//! result that a backend would otherwise evaluate eagerly. This pass
//! hoists every error that is observable in the final result to the
//! outermost observable position, so an operation that can only fail
//! fails before any work is attempted.
//!
//! Observability follows the IR's slot table: an error is observable when
//! every hop from the root down to it is an output slot. Errors reachable
//! only through control slots, a filter predicate say, stay where they
//! are and keep their runtime meaning.
//!
//! # Design Principles
//! - **Pure and total**: no schema, no context, no failure mode; any tree
//!   in, an equivalent tree out.
//! - **First-encountered order**: merged messages keep the left-to-right
//!   order of the original tree, deduplicated.
//! - **No re-wrapping**: hoisting a single error reuses the original
//!   node handle, so repeated passes are fixpoints.

use std::sync::Arc;

use crate::ir::{map_children, Node, QueryNode};

/// Hoists observable runtime errors to the outermost output position.
pub struct ErrorPropagation;

impl ErrorPropagation {
    /// Rewrites the tree; trees without observable errors come back as
    /// the same handle.
    pub fn run(root: &Node) -> Node {
        let mut observable = Vec::new();
        hoist(root, &mut observable)
    }
}

/// Walks output slots, replacing any node whose output children surface
/// errors. Replacements are pushed onto `observable` so enclosing frames
/// collapse onto them in turn.
fn hoist(node: &Node, observable: &mut Vec<Node>) -> Node {
    if node.is_runtime_error() {
        observable.push(node.clone());
        return node.clone();
    }

    let mut surfaced = Vec::new();
    let walked = map_children(node, &mut |slot, child| {
        if slot.output {
            hoist(child, &mut surfaced)
        } else {
            child.clone()
        }
    });

    if surfaced.is_empty() {
        return walked;
    }

    let replacement = if surfaced.len() == 1 {
        surfaced.remove(0)
    } else {
        merge_errors(&surfaced)
    };
    observable.push(replacement.clone());
    replacement
}

/// Builds one error carrying the distinct messages in first-encountered
/// order.
fn merge_errors(errors: &[Node]) -> Node {
    let mut messages: Vec<&str> = Vec::with_capacity(errors.len());
    for error in errors {
        if let QueryNode::RuntimeError { message } = error.as_ref() {
            if !messages.contains(&message.as_str()) {
                messages.push(message);
            }
        }
    }
    if messages.len() == 1 {
        // Every branch failed the same way; keep the original node.
        return errors[0].clone();
    }
    QueryNode::runtime_error(messages.join(", "))
}
