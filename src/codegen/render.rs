//! Deterministic textual rendering of compiled operations.
//!
//! The rendering separates structure from data: the text contains only
//! fixed syntax, slot names and vetted identifiers, while every constant
//! and every name that is not a safe bare identifier travels in the
//! bindings map under `@b1`-style placeholders. Untrusted strings can
//! therefore never change the shape of the rendered operation.
//!
//! Field names are always bound, safe or not; a field read renders as
//! `get(expr, @bN)` so the same shape covers every name.

use std::collections::BTreeMap;

use serde_json::Value;

use super::op::{CompiledOperation, CompiledStep, Op};

/// A rendered operation: placeholder-bearing text plus the values bound
/// to each placeholder.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub text: String,
    pub bindings: BTreeMap<String, Value>,
}

/// Whether a name may appear in rendered text as a bare identifier.
///
/// ASCII letters, digits and underscores only, not starting with a digit.
/// Anything else is bound instead of interpolated.
pub fn is_safe_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl CompiledOperation {
    /// Renders the operation. Rendering is deterministic: equal
    /// operations produce equal text and equal bindings.
    pub fn render(&self) -> Rendered {
        let mut renderer = Renderer::new();
        let mut text = String::new();
        for step in &self.pre_exec {
            renderer.write_step(step, &mut text);
            text.push('\n');
        }
        text.push_str("return ");
        renderer.write(&self.main, &mut text);
        Rendered {
            text,
            bindings: renderer.bindings,
        }
    }
}

struct Renderer {
    bindings: BTreeMap<String, Value>,
    next: usize,
}

impl Renderer {
    fn new() -> Self {
        Self {
            bindings: BTreeMap::new(),
            next: 1,
        }
    }

    /// Allocates the next placeholder for a value.
    fn bind(&mut self, value: Value) -> String {
        let key = format!("b{}", self.next);
        self.next += 1;
        let placeholder = format!("@{key}");
        self.bindings.insert(key, value);
        placeholder
    }

    /// Writes a name either bare or as a placeholder.
    fn write_name(&mut self, name: &str, out: &mut String) {
        if is_safe_identifier(name) {
            out.push_str(name);
        } else {
            let placeholder = self.bind(Value::String(name.to_string()));
            out.push_str(&placeholder);
        }
    }

    fn write_step(&mut self, step: &CompiledStep, out: &mut String) {
        out.push_str(&step.name);
        out.push_str(" := ");
        self.write(&step.op, out);
        if let Some(validator) = &step.validator {
            out.push_str(" expect ");
            out.push_str(validator.as_str());
            out.push('(');
            let placeholder = self.bind(Value::String(validator.message().to_string()));
            out.push_str(&placeholder);
            out.push(')');
        }
    }

    fn write(&mut self, op: &Op, out: &mut String) {
        match op {
            Op::Const(value) => {
                let placeholder = self.bind(value.clone());
                out.push_str(&placeholder);
            }
            Op::Load(slot) => out.push_str(slot),
            Op::Bind { slot, value, body } => {
                out.push_str("let ");
                out.push_str(slot);
                out.push_str(" = ");
                self.write(value, out);
                out.push_str(" in ");
                self.write(body, out);
            }

            Op::MakeObject(pairs) => {
                out.push('{');
                for (index, (name, value)) in pairs.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    self.write_name(name, out);
                    out.push_str(": ");
                    self.write(value, out);
                }
                out.push('}');
            }
            Op::MakeList(items) => {
                out.push('[');
                self.write_all(items, out);
                out.push(']');
            }
            Op::Concat(lists) => {
                out.push_str("concat(");
                self.write_all(lists, out);
                out.push(')');
            }
            Op::GetField { object, name } => {
                out.push_str("get(");
                self.write(object, out);
                out.push_str(", ");
                let placeholder = self.bind(Value::String(name.clone()));
                out.push_str(&placeholder);
                out.push(')');
            }

            Op::Scan { collection } => {
                out.push_str("scan(");
                self.write_name(collection, out);
                out.push(')');
            }
            Op::Transform {
                source,
                slot,
                filter,
                ordering,
                cap,
                map,
            } => {
                out.push_str("transform(");
                self.write(source, out);
                out.push_str(", ");
                out.push_str(slot);
                out.push_str(", filter: ");
                self.write(filter, out);
                if !ordering.is_empty() {
                    out.push_str(", order: [");
                    for (index, key) in ordering.iter().enumerate() {
                        if index > 0 {
                            out.push_str(", ");
                        }
                        out.push_str(if key.descending { "desc(" } else { "asc(" });
                        self.write(&key.key, out);
                        out.push(')');
                    }
                    out.push(']');
                }
                if let Some(cap) = cap {
                    out.push_str(&format!(", cap: {cap}"));
                }
                out.push_str(", map: ");
                self.write(map, out);
                out.push(')');
            }
            Op::Count(list) => {
                out.push_str("count(");
                self.write(list, out);
                out.push(')');
            }
            Op::First(list) => {
                out.push_str("first(");
                self.write(list, out);
                out.push(')');
            }
            Op::Merge(objects) => {
                out.push_str("merge(");
                self.write_all(objects, out);
                out.push(')');
            }

            Op::Neighbors {
                source,
                relation,
                side,
                target,
            } => {
                out.push_str("neighbors(");
                self.write(source, out);
                out.push_str(", ");
                self.write_name(relation, out);
                out.push_str(", ");
                out.push_str(side.as_str());
                out.push_str(", ");
                self.write_name(target, out);
                out.push(')');
            }

            Op::Insert { collection, object } => {
                out.push_str("insert(");
                self.write_name(collection, out);
                out.push_str(", ");
                self.write(object, out);
                out.push(')');
            }
            Op::Update {
                collection,
                slot,
                filter,
                patch,
                cap,
            } => {
                out.push_str("update(");
                self.write_name(collection, out);
                out.push_str(", ");
                out.push_str(slot);
                out.push_str(", filter: ");
                self.write(filter, out);
                out.push_str(", set: {");
                for (index, (name, value)) in patch.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    self.write_name(name, out);
                    out.push_str(": ");
                    self.write(value, out);
                }
                out.push('}');
                if let Some(cap) = cap {
                    out.push_str(&format!(", cap: {cap}"));
                }
                out.push(')');
            }
            Op::Delete {
                collection,
                slot,
                filter,
                cap,
            } => {
                out.push_str("delete(");
                self.write_name(collection, out);
                out.push_str(", ");
                out.push_str(slot);
                out.push_str(", filter: ");
                self.write(filter, out);
                if let Some(cap) = cap {
                    out.push_str(&format!(", cap: {cap}"));
                }
                out.push(')');
            }
            Op::LinkEdges { relation, edges } => {
                out.push_str("link(");
                self.write_name(relation, out);
                out.push_str(", [");
                for (index, (from, to)) in edges.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    out.push('(');
                    self.write(from, out);
                    out.push_str(", ");
                    self.write(to, out);
                    out.push(')');
                }
                out.push_str("])");
            }
            Op::UnlinkEdges { relation, from, to } => {
                out.push_str("unlink(");
                self.write_name(relation, out);
                if let Some(from) = from {
                    out.push_str(", from: ");
                    self.write(from, out);
                }
                if let Some(to) = to {
                    out.push_str(", to: ");
                    self.write(to, out);
                }
                out.push(')');
            }
            Op::ReplaceEdge {
                relation,
                existing_from,
                existing_to,
                new_from,
                new_to,
            } => {
                out.push_str("relink(");
                self.write_name(relation, out);
                if let Some(existing_from) = existing_from {
                    out.push_str(", existing_from: ");
                    self.write(existing_from, out);
                }
                if let Some(existing_to) = existing_to {
                    out.push_str(", existing_to: ");
                    self.write(existing_to, out);
                }
                out.push_str(", new_from: ");
                self.write(new_from, out);
                out.push_str(", new_to: ");
                self.write(new_to, out);
                out.push(')');
            }

            Op::Branch {
                condition,
                then_op,
                else_op,
            } => {
                out.push_str("if(");
                self.write(condition, out);
                out.push_str(", ");
                self.write(then_op, out);
                out.push_str(", ");
                self.write(else_op, out);
                out.push(')');
            }
            Op::KindOf { value, kind } => {
                out.push_str("is_");
                out.push_str(kind.as_str());
                out.push('(');
                self.write(value, out);
                out.push(')');
            }
            Op::Unary { operator, operand } => {
                out.push_str(operator.as_str());
                out.push('(');
                self.write(operand, out);
                out.push(')');
            }
            Op::Binary { operator, lhs, rhs } => {
                out.push_str(operator.as_str());
                out.push('(');
                self.write(lhs, out);
                out.push_str(", ");
                self.write(rhs, out);
                out.push(')');
            }

            Op::Fail { message } => {
                out.push_str("fail(");
                let placeholder = self.bind(Value::String(message.clone()));
                out.push_str(&placeholder);
                out.push(')');
            }
        }
    }

    fn write_all(&mut self, ops: &[Op], out: &mut String) {
        for (index, op) in ops.iter().enumerate() {
            if index > 0 {
                out.push_str(", ");
            }
            self.write(op, out);
        }
    }
}
