//! Child-slot metadata and structural traversal.
//!
//! Every variant declares its direct children here, each tagged with its
//! slot role. A slot is an output slot when the child is evaluated
//! unconditionally and its value flows into the node's result by identity
//! or projection. Filters, ordering keys, conditional branches, operator
//! operands, mutation inputs and pre-execution step queries are control
//! slots: their values steer evaluation but are not the result.
//!
//! The error-propagation pass walks exactly the output slots, so this
//! table is the single place that decides which failures are observable
//! in a query's result.

use std::convert::Infallible;
use std::sync::Arc;

use super::node::{EdgeSpec, Node, OrderClause, PreExecStep, PropertySpec, QueryNode};

/// Role and name of one child position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChildSlot {
    pub name: &'static str,
    /// Whether the child's value reaches the node's result unconditionally.
    pub output: bool,
}

impl ChildSlot {
    pub const fn output(name: &'static str) -> Self {
        Self { name, output: true }
    }

    pub const fn control(name: &'static str) -> Self {
        Self {
            name,
            output: false,
        }
    }
}

/// Rebuilds `node` by mapping `f` over its direct children.
///
/// Children returned pointer-equal leave the node untouched and the
/// original handle is returned, so untouched subtrees stay shared across
/// a whole rewrite pass.
pub fn map_children(node: &Node, f: &mut dyn FnMut(ChildSlot, &Node) -> Node) -> Node {
    match try_map_children::<Infallible>(node, &mut |slot, child| Ok(f(slot, child))) {
        Ok(mapped) => mapped,
        Err(never) => match never {},
    }
}

/// Fallible form of [`map_children`]. The first error aborts the walk.
pub fn try_map_children<E>(
    node: &Node,
    f: &mut dyn FnMut(ChildSlot, &Node) -> Result<Node, E>,
) -> Result<Node, E> {
    let mut changed = false;
    let mut visit = |f: &mut dyn FnMut(ChildSlot, &Node) -> Result<Node, E>,
                     slot: ChildSlot,
                     child: &Node,
                     changed: &mut bool|
     -> Result<Node, E> {
        let next = f(slot, child)?;
        if !Arc::ptr_eq(&next, child) {
            *changed = true;
        }
        Ok(next)
    };

    let rebuilt = match node.as_ref() {
        QueryNode::Literal(_)
        | QueryNode::Null
        | QueryNode::ConstBool(_)
        | QueryNode::ConstInt(_)
        | QueryNode::Context
        | QueryNode::Variable(_)
        | QueryNode::Entities { .. }
        | QueryNode::RuntimeError { .. } => None,

        QueryNode::ContextAssignment { value, body } => {
            let value = visit(f, ChildSlot::control("value"), value, &mut changed)?;
            let body = visit(f, ChildSlot::output("body"), body, &mut changed)?;
            changed.then(|| QueryNode::ContextAssignment { value, body })
        }
        QueryNode::VariableAssignment {
            binding,
            value,
            body,
        } => {
            let value = visit(f, ChildSlot::control("value"), value, &mut changed)?;
            let body = visit(f, ChildSlot::output("body"), body, &mut changed)?;
            changed.then(|| QueryNode::VariableAssignment {
                binding: binding.clone(),
                value,
                body,
            })
        }

        QueryNode::Object(properties) => {
            let mut mapped = Vec::with_capacity(properties.len());
            for property in properties {
                let value = visit(f, ChildSlot::output("property"), &property.value, &mut changed)?;
                mapped.push(PropertySpec {
                    name: property.name.clone(),
                    value,
                });
            }
            changed.then(|| QueryNode::Object(mapped))
        }
        QueryNode::List(items) => {
            let mut mapped = Vec::with_capacity(items.len());
            for item in items {
                mapped.push(visit(f, ChildSlot::output("item"), item, &mut changed)?);
            }
            changed.then(|| QueryNode::List(mapped))
        }
        QueryNode::ConcatLists(lists) => {
            let mut mapped = Vec::with_capacity(lists.len());
            for list in lists {
                mapped.push(visit(f, ChildSlot::output("list"), list, &mut changed)?);
            }
            changed.then(|| QueryNode::ConcatLists(mapped))
        }

        QueryNode::Field {
            object,
            name,
            entity_type,
        } => {
            let object = visit(f, ChildSlot::output("object"), object, &mut changed)?;
            changed.then(|| QueryNode::Field {
                object,
                name: name.clone(),
                entity_type: entity_type.clone(),
            })
        }
        QueryNode::EntityFromId { type_name, id } => {
            let id = visit(f, ChildSlot::control("id"), id, &mut changed)?;
            changed.then(|| QueryNode::EntityFromId {
                type_name: type_name.clone(),
                id,
            })
        }

        QueryNode::TransformList {
            source,
            binding,
            filter,
            ordering,
            cap,
            map,
        } => {
            let source = visit(f, ChildSlot::output("source"), source, &mut changed)?;
            let filter = visit(f, ChildSlot::control("filter"), filter, &mut changed)?;
            let mut mapped_ordering = Vec::with_capacity(ordering.len());
            for clause in ordering {
                let key = visit(f, ChildSlot::control("order_key"), &clause.key, &mut changed)?;
                mapped_ordering.push(OrderClause {
                    key,
                    direction: clause.direction,
                });
            }
            let map = visit(f, ChildSlot::control("map"), map, &mut changed)?;
            changed.then(|| QueryNode::TransformList {
                source,
                binding: binding.clone(),
                filter,
                ordering: mapped_ordering,
                cap: *cap,
                map,
            })
        }
        QueryNode::Count { list } => {
            let list = visit(f, ChildSlot::control("list"), list, &mut changed)?;
            changed.then(|| QueryNode::Count { list })
        }
        QueryNode::FirstOfList { list } => {
            let list = visit(f, ChildSlot::output("list"), list, &mut changed)?;
            changed.then(|| QueryNode::FirstOfList { list })
        }
        QueryNode::MergeObjects(objects) => {
            let mut mapped = Vec::with_capacity(objects.len());
            for object in objects {
                mapped.push(visit(f, ChildSlot::output("object"), object, &mut changed)?);
            }
            changed.then(|| QueryNode::MergeObjects(mapped))
        }

        QueryNode::FollowEdge { source, edge, side } => {
            let source = visit(f, ChildSlot::control("source"), source, &mut changed)?;
            changed.then(|| QueryNode::FollowEdge {
                source,
                edge: edge.clone(),
                side: *side,
            })
        }

        QueryNode::CreateEntity { type_name, object } => {
            let object = visit(f, ChildSlot::control("object"), object, &mut changed)?;
            changed.then(|| QueryNode::CreateEntity {
                type_name: type_name.clone(),
                object,
            })
        }
        QueryNode::UpdateEntities {
            type_name,
            binding,
            filter,
            updates,
            cap,
        } => {
            let filter = visit(f, ChildSlot::control("filter"), filter, &mut changed)?;
            let mut mapped = Vec::with_capacity(updates.len());
            for update in updates {
                let value = visit(f, ChildSlot::control("update"), &update.value, &mut changed)?;
                mapped.push(PropertySpec {
                    name: update.name.clone(),
                    value,
                });
            }
            changed.then(|| QueryNode::UpdateEntities {
                type_name: type_name.clone(),
                binding: binding.clone(),
                filter,
                updates: mapped,
                cap: *cap,
            })
        }
        QueryNode::DeleteEntities {
            type_name,
            binding,
            filter,
            cap,
        } => {
            let filter = visit(f, ChildSlot::control("filter"), filter, &mut changed)?;
            changed.then(|| QueryNode::DeleteEntities {
                type_name: type_name.clone(),
                binding: binding.clone(),
                filter,
                cap: *cap,
            })
        }
        QueryNode::AddEdges { relation, edges } => {
            let mut mapped = Vec::with_capacity(edges.len());
            for edge in edges {
                let from = visit(f, ChildSlot::control("from"), &edge.from, &mut changed)?;
                let to = visit(f, ChildSlot::control("to"), &edge.to, &mut changed)?;
                mapped.push(EdgeSpec { from, to });
            }
            changed.then(|| QueryNode::AddEdges {
                relation: relation.clone(),
                edges: mapped,
            })
        }
        QueryNode::RemoveEdges { relation, from, to } => {
            let from = from
                .as_ref()
                .map(|n| visit(f, ChildSlot::control("from"), n, &mut changed))
                .transpose()?;
            let to = to
                .as_ref()
                .map(|n| visit(f, ChildSlot::control("to"), n, &mut changed))
                .transpose()?;
            changed.then(|| QueryNode::RemoveEdges {
                relation: relation.clone(),
                from,
                to,
            })
        }
        QueryNode::SetEdge {
            relation,
            existing_from,
            existing_to,
            new_from,
            new_to,
        } => {
            let existing_from = existing_from
                .as_ref()
                .map(|n| visit(f, ChildSlot::control("existing_from"), n, &mut changed))
                .transpose()?;
            let existing_to = existing_to
                .as_ref()
                .map(|n| visit(f, ChildSlot::control("existing_to"), n, &mut changed))
                .transpose()?;
            let new_from = visit(f, ChildSlot::control("new_from"), new_from, &mut changed)?;
            let new_to = visit(f, ChildSlot::control("new_to"), new_to, &mut changed)?;
            changed.then(|| QueryNode::SetEdge {
                relation: relation.clone(),
                existing_from,
                existing_to,
                new_from,
                new_to,
            })
        }

        QueryNode::Conditional {
            condition,
            then_branch,
            else_branch,
        } => {
            let condition = visit(f, ChildSlot::control("condition"), condition, &mut changed)?;
            let then_branch = visit(f, ChildSlot::control("then"), then_branch, &mut changed)?;
            let else_branch = visit(f, ChildSlot::control("else"), else_branch, &mut changed)?;
            changed.then(|| QueryNode::Conditional {
                condition,
                then_branch,
                else_branch,
            })
        }
        QueryNode::TypeCheck { value, kind } => {
            let value = visit(f, ChildSlot::control("value"), value, &mut changed)?;
            changed.then(|| QueryNode::TypeCheck { value, kind: *kind })
        }
        QueryNode::UnaryOperation { operator, operand } => {
            let operand = visit(f, ChildSlot::control("operand"), operand, &mut changed)?;
            changed.then(|| QueryNode::UnaryOperation {
                operator: *operator,
                operand,
            })
        }
        QueryNode::BinaryOperation { operator, lhs, rhs } => {
            let lhs = visit(f, ChildSlot::control("lhs"), lhs, &mut changed)?;
            let rhs = visit(f, ChildSlot::control("rhs"), rhs, &mut changed)?;
            changed.then(|| QueryNode::BinaryOperation {
                operator: *operator,
                lhs,
                rhs,
            })
        }

        QueryNode::WithPreExecution { steps, result } => {
            let mut mapped = Vec::with_capacity(steps.len());
            for step in steps {
                let query = visit(f, ChildSlot::control("step_query"), &step.query, &mut changed)?;
                mapped.push(PreExecStep {
                    binding: step.binding.clone(),
                    query,
                    validator: step.validator.clone(),
                });
            }
            let result = visit(f, ChildSlot::output("result"), result, &mut changed)?;
            changed.then(|| QueryNode::WithPreExecution {
                steps: mapped,
                result,
            })
        }
    };

    Ok(match rebuilt {
        Some(rebuilt) => Arc::new(rebuilt),
        None => node.clone(),
    })
}
