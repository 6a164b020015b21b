//! Deterministic textual rendering of IR trees.
//!
//! The rendering is a pure function of node fields, so two structurally
//! equal trees always describe identically. It exists for diagnostics and
//! test assertions, not for the backends; compiled output comes from the
//! code generator.

use std::fmt;

use super::node::{OrderDirection, QueryNode};

impl QueryNode {
    /// Renders the tree as a single deterministic line.
    pub fn describe(&self) -> String {
        let mut out = String::new();
        write_node(self, &mut out);
        out
    }
}

impl fmt::Display for QueryNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

fn write_node(node: &QueryNode, out: &mut String) {
    match node {
        QueryNode::Literal(value) => {
            out.push_str(&serde_json::to_string(value).unwrap_or_default());
        }
        QueryNode::Null => out.push_str("null"),
        QueryNode::ConstBool(value) => out.push_str(if *value { "true" } else { "false" }),
        QueryNode::ConstInt(value) => out.push_str(&value.to_string()),

        QueryNode::Context => out.push_str("ctx"),
        QueryNode::ContextAssignment { value, body } => {
            out.push_str("let ctx = ");
            write_node(value, out);
            out.push_str(" in ");
            write_node(body, out);
        }
        QueryNode::Variable(binding) => out.push_str(&binding.to_string()),
        QueryNode::VariableAssignment {
            binding,
            value,
            body,
        } => {
            out.push_str("let ");
            out.push_str(&binding.to_string());
            out.push_str(" = ");
            write_node(value, out);
            out.push_str(" in ");
            write_node(body, out);
        }

        QueryNode::Object(properties) => {
            out.push('{');
            for (index, property) in properties.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(&property.name);
                out.push_str(": ");
                write_node(&property.value, out);
            }
            out.push('}');
        }
        QueryNode::List(items) => {
            out.push('[');
            write_list(items.iter().map(|n| n.as_ref()), out);
            out.push(']');
        }
        QueryNode::ConcatLists(lists) => {
            out.push_str("concat(");
            write_list(lists.iter().map(|n| n.as_ref()), out);
            out.push(')');
        }

        QueryNode::Field { object, name, .. } => {
            out.push_str("field(");
            write_node(object, out);
            out.push_str(", ");
            out.push_str(name);
            out.push(')');
        }
        QueryNode::Entities { type_name } => {
            out.push_str("entities(");
            out.push_str(type_name);
            out.push(')');
        }
        QueryNode::EntityFromId { type_name, id } => {
            out.push_str("entity(");
            out.push_str(type_name);
            out.push_str(", ");
            write_node(id, out);
            out.push(')');
        }

        QueryNode::TransformList {
            source,
            binding,
            filter,
            ordering,
            cap,
            map,
        } => {
            out.push_str("transform(");
            write_node(source, out);
            out.push_str(", ");
            out.push_str(&binding.to_string());
            if filter.as_ref() != &QueryNode::ConstBool(true) {
                out.push_str(", filter: ");
                write_node(filter, out);
            }
            if !ordering.is_empty() {
                out.push_str(", order: [");
                for (index, clause) in ordering.iter().enumerate() {
                    if index > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(match clause.direction {
                        OrderDirection::Asc => "asc(",
                        OrderDirection::Desc => "desc(",
                    });
                    write_node(&clause.key, out);
                    out.push(')');
                }
                out.push(']');
            }
            if let Some(cap) = cap {
                out.push_str(&format!(", cap: {cap}"));
            }
            if map.as_ref() != &QueryNode::Variable(binding.clone()) {
                out.push_str(", map: ");
                write_node(map, out);
            }
            out.push(')');
        }
        QueryNode::Count { list } => {
            out.push_str("count(");
            write_node(list, out);
            out.push(')');
        }
        QueryNode::FirstOfList { list } => {
            out.push_str("first(");
            write_node(list, out);
            out.push(')');
        }
        QueryNode::MergeObjects(objects) => {
            out.push_str("merge(");
            write_list(objects.iter().map(|n| n.as_ref()), out);
            out.push(')');
        }

        QueryNode::FollowEdge { source, edge, side } => {
            out.push_str("follow(");
            write_node(source, out);
            out.push_str(", ");
            out.push_str(&edge.relation);
            out.push_str(", ");
            out.push_str(side.as_str());
            out.push(')');
        }

        QueryNode::CreateEntity { type_name, object } => {
            out.push_str("create(");
            out.push_str(type_name);
            out.push_str(", ");
            write_node(object, out);
            out.push(')');
        }
        QueryNode::UpdateEntities {
            type_name,
            binding,
            filter,
            updates,
            cap,
        } => {
            out.push_str("update(");
            out.push_str(type_name);
            out.push_str(", ");
            out.push_str(&binding.to_string());
            out.push_str(", filter: ");
            write_node(filter, out);
            out.push_str(", set: {");
            for (index, update) in updates.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push_str(&update.name);
                out.push_str(": ");
                write_node(&update.value, out);
            }
            out.push('}');
            if let Some(cap) = cap {
                out.push_str(&format!(", cap: {cap}"));
            }
            out.push(')');
        }
        QueryNode::DeleteEntities {
            type_name,
            binding,
            filter,
            cap,
        } => {
            out.push_str("delete(");
            out.push_str(type_name);
            out.push_str(", ");
            out.push_str(&binding.to_string());
            out.push_str(", filter: ");
            write_node(filter, out);
            if let Some(cap) = cap {
                out.push_str(&format!(", cap: {cap}"));
            }
            out.push(')');
        }
        QueryNode::AddEdges { relation, edges } => {
            out.push_str("add_edges(");
            out.push_str(relation);
            out.push_str(", [");
            for (index, edge) in edges.iter().enumerate() {
                if index > 0 {
                    out.push_str(", ");
                }
                out.push('(');
                write_node(&edge.from, out);
                out.push_str(", ");
                write_node(&edge.to, out);
                out.push(')');
            }
            out.push_str("])");
        }
        QueryNode::RemoveEdges { relation, from, to } => {
            out.push_str("remove_edges(");
            out.push_str(relation);
            if let Some(from) = from {
                out.push_str(", from: ");
                write_node(from, out);
            }
            if let Some(to) = to {
                out.push_str(", to: ");
                write_node(to, out);
            }
            out.push(')');
        }
        QueryNode::SetEdge {
            relation,
            existing_from,
            existing_to,
            new_from,
            new_to,
        } => {
            out.push_str("set_edge(");
            out.push_str(relation);
            if let Some(existing_from) = existing_from {
                out.push_str(", existing_from: ");
                write_node(existing_from, out);
            }
            if let Some(existing_to) = existing_to {
                out.push_str(", existing_to: ");
                write_node(existing_to, out);
            }
            out.push_str(", new_from: ");
            write_node(new_from, out);
            out.push_str(", new_to: ");
            write_node(new_to, out);
            out.push(')');
        }

        QueryNode::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            out.push_str("if(");
            write_node(condition, out);
            out.push_str(", ");
            write_node(then_branch, out);
            out.push_str(", ");
            write_node(else_branch, out);
            out.push(')');
        }
        QueryNode::TypeCheck { value, kind } => {
            out.push_str("is_");
            out.push_str(kind.as_str());
            out.push('(');
            write_node(value, out);
            out.push(')');
        }
        QueryNode::UnaryOperation { operator, operand } => {
            out.push_str(operator.as_str());
            out.push('(');
            write_node(operand, out);
            out.push(')');
        }
        QueryNode::BinaryOperation { operator, lhs, rhs } => {
            out.push_str(operator.as_str());
            out.push('(');
            write_node(lhs, out);
            out.push_str(", ");
            write_node(rhs, out);
            out.push(')');
        }

        QueryNode::RuntimeError { message } => {
            out.push_str("error(");
            out.push_str(&format!("{message:?}"));
            out.push(')');
        }

        QueryNode::WithPreExecution { steps, result } => {
            out.push_str("pre_exec(");
            for (index, step) in steps.iter().enumerate() {
                if index > 0 {
                    out.push_str("; ");
                }
                out.push_str(&step.binding.to_string());
                out.push_str(" = ");
                write_node(&step.query, out);
                if let Some(validator) = &step.validator {
                    out.push_str(" expect ");
                    out.push_str(validator.as_str());
                    out.push('(');
                    out.push_str(&format!("{:?}", validator.message()));
                    out.push(')');
                }
            }
            out.push_str(") in ");
            write_node(result, out);
        }
    }
}

fn write_list<'a>(nodes: impl Iterator<Item = &'a QueryNode>, out: &mut String) {
    for (index, node) in nodes.enumerate() {
        if index > 0 {
            out.push_str(", ");
        }
        write_node(node, out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::node::{
        BinaryOperator, OrderClause, PropertySpec, QueryNode, TransformListBuilder, VarBinding,
    };
    use serde_json::json;

    #[test]
    fn test_atoms_render_their_value() {
        assert_eq!(QueryNode::null().describe(), "null");
        assert_eq!(QueryNode::boolean(false).describe(), "false");
        assert_eq!(QueryNode::integer(42).describe(), "42");
        assert_eq!(QueryNode::context().describe(), "ctx");
        assert_eq!(
            QueryNode::literal(json!({"a": [1, 2]})).describe(),
            "{\"a\":[1,2]}"
        );
    }

    #[test]
    fn test_transform_omits_identity_stages() {
        let binding = VarBinding::new("item");
        let minimal =
            TransformListBuilder::new(QueryNode::entities("User"), binding.clone()).build();
        assert_eq!(
            minimal.describe(),
            format!("transform(entities(User), {binding})")
        );

        let full = TransformListBuilder::new(QueryNode::entities("User"), binding.clone())
            .with_filter(QueryNode::binary(
                QueryNode::field(QueryNode::variable(&binding), "age"),
                BinaryOperator::GreaterThan,
                QueryNode::integer(3),
            ))
            .with_ordering(vec![OrderClause::desc(QueryNode::field(
                QueryNode::variable(&binding),
                "name",
            ))])
            .with_cap(5)
            .build();
        assert_eq!(
            full.describe(),
            format!(
                "transform(entities(User), {binding}, filter: gt(field({binding}, age), 3), \
                 order: [desc(field({binding}, name))], cap: 5)"
            )
        );
    }

    #[test]
    fn test_describe_is_a_pure_function_of_fields() {
        let binding = VarBinding::new("x");
        let build = |binding: &VarBinding| {
            QueryNode::assign_variable(
                binding,
                QueryNode::object(vec![PropertySpec::new("n", QueryNode::integer(1))]),
                QueryNode::field(QueryNode::variable(binding), "n"),
            )
        };
        assert_eq!(build(&binding).describe(), build(&binding).describe());
    }

    #[test]
    fn test_shared_subtrees_describe_like_repeated_subtrees() {
        let shared = QueryNode::entities("User");
        let dag = QueryNode::concat_lists(vec![shared.clone(), shared]);
        let tree =
            QueryNode::concat_lists(vec![QueryNode::entities("User"), QueryNode::entities("User")]);
        assert_eq!(dag.describe(), tree.describe());
    }

    #[test]
    fn test_error_messages_are_quoted() {
        assert_eq!(
            QueryNode::runtime_error("denied \"here\"").describe(),
            "error(\"denied \\\"here\\\"\")"
        );
    }
}
