//! Lowering from IR trees to compiled operations.
//!
//! Lowering is a scoped walk: binding nodes allocate slots in traversal
//! order, variable reads resolve through the current [`Scope`] and
//! pre-execution wrappers flatten into one step list in encounter order.
//! The walk is total over well-scoped trees; every failure mode is a
//! scoping defect reported as a [`CompileError`].

use serde_json::Value;

use crate::ir::{Node, QueryNode};
use crate::schema::ID_FIELD;

use super::errors::{CompileError, CompileResult};
use super::op::{CompiledOperation, CompiledStep, Op, SortKey};
use super::scope::Scope;

/// Compiles IR trees into [`CompiledOperation`]s.
///
/// Compilation is deterministic: structurally equal trees produce equal
/// operations, including slot names.
pub struct QueryCompiler;

impl QueryCompiler {
    pub fn compile(root: &Node) -> CompileResult<CompiledOperation> {
        let mut lowering = Lowering::new();
        let main = lowering.lower(root, &Scope::root())?;
        Ok(CompiledOperation {
            pre_exec: lowering.steps,
            main,
        })
    }
}

struct Lowering {
    next_var: usize,
    next_step: usize,
    steps: Vec<CompiledStep>,
}

impl Lowering {
    fn new() -> Self {
        Self {
            next_var: 1,
            next_step: 1,
            steps: Vec::new(),
        }
    }

    fn fresh_var(&mut self) -> String {
        let slot = format!("v{}", self.next_var);
        self.next_var += 1;
        slot
    }

    fn fresh_step(&mut self) -> String {
        let slot = format!("p{}", self.next_step);
        self.next_step += 1;
        slot
    }

    fn lower(&mut self, node: &Node, scope: &Scope) -> CompileResult<Op> {
        Ok(match node.as_ref() {
            QueryNode::Literal(value) => Op::Const(value.clone()),
            QueryNode::Null => Op::Const(Value::Null),
            QueryNode::ConstBool(value) => Op::Const(Value::Bool(*value)),
            QueryNode::ConstInt(value) => Op::Const(Value::from(*value)),

            QueryNode::Context => {
                let slot = scope.context_slot().ok_or(CompileError::ContextUnavailable)?;
                Op::Load(slot.to_string())
            }
            QueryNode::ContextAssignment { value, body } => {
                let value = self.lower(value, scope)?;
                let slot = self.fresh_var();
                let body = self.lower(body, &scope.with_context(slot.clone()))?;
                Op::Bind {
                    slot,
                    value: Box::new(value),
                    body: Box::new(body),
                }
            }
            QueryNode::Variable(binding) => Op::Load(scope.lookup(binding)?.to_string()),
            QueryNode::VariableAssignment {
                binding,
                value,
                body,
            } => {
                scope.ensure_free(binding)?;
                // The binding is not visible in its own value.
                let value = self.lower(value, scope)?;
                let slot = self.fresh_var();
                let body = self.lower(body, &scope.with_var(binding.id(), slot.clone()))?;
                Op::Bind {
                    slot,
                    value: Box::new(value),
                    body: Box::new(body),
                }
            }

            QueryNode::Object(properties) => {
                let mut pairs = Vec::with_capacity(properties.len());
                for property in properties {
                    pairs.push((property.name.clone(), self.lower(&property.value, scope)?));
                }
                Op::MakeObject(pairs)
            }
            QueryNode::List(items) => Op::MakeList(self.lower_all(items, scope)?),
            QueryNode::ConcatLists(lists) => Op::Concat(self.lower_all(lists, scope)?),

            QueryNode::Field { object, name, .. } => Op::GetField {
                object: Box::new(self.lower(object, scope)?),
                name: name.clone(),
            },
            QueryNode::Entities { type_name } => Op::Scan {
                collection: type_name.clone(),
            },
            QueryNode::EntityFromId { type_name, id } => {
                // Point reads lower to a capped scan so the target needs
                // no dedicated lookup form.
                let id = self.lower(id, scope)?;
                let slot = self.fresh_var();
                Op::First(Box::new(Op::Transform {
                    source: Box::new(Op::Scan {
                        collection: type_name.clone(),
                    }),
                    slot: slot.clone(),
                    filter: Box::new(Op::Binary {
                        operator: crate::ir::BinaryOperator::Equal,
                        lhs: Box::new(Op::GetField {
                            object: Box::new(Op::Load(slot.clone())),
                            name: ID_FIELD.to_string(),
                        }),
                        rhs: Box::new(id),
                    }),
                    ordering: Vec::new(),
                    cap: Some(1),
                    map: Box::new(Op::Load(slot)),
                }))
            }

            QueryNode::TransformList {
                source,
                binding,
                filter,
                ordering,
                cap,
                map,
            } => {
                scope.ensure_free(binding)?;
                let source = self.lower(source, scope)?;
                let slot = self.fresh_var();
                let inner = scope.with_var(binding.id(), slot.clone());
                let filter = self.lower(filter, &inner)?;
                let mut keys = Vec::with_capacity(ordering.len());
                for clause in ordering {
                    keys.push(SortKey {
                        key: self.lower(&clause.key, &inner)?,
                        descending: clause.direction.is_descending(),
                    });
                }
                let map = self.lower(map, &inner)?;
                Op::Transform {
                    source: Box::new(source),
                    slot,
                    filter: Box::new(filter),
                    ordering: keys,
                    cap: *cap,
                    map: Box::new(map),
                }
            }
            QueryNode::Count { list } => Op::Count(Box::new(self.lower(list, scope)?)),
            QueryNode::FirstOfList { list } => Op::First(Box::new(self.lower(list, scope)?)),
            QueryNode::MergeObjects(objects) => Op::Merge(self.lower_all(objects, scope)?),

            QueryNode::FollowEdge { source, edge, side } => Op::Neighbors {
                source: Box::new(self.lower(source, scope)?),
                relation: edge.relation.clone(),
                side: *side,
                target: edge.target_type(*side).to_string(),
            },

            QueryNode::CreateEntity { type_name, object } => Op::Insert {
                collection: type_name.clone(),
                object: Box::new(self.lower(object, scope)?),
            },
            QueryNode::UpdateEntities {
                type_name,
                binding,
                filter,
                updates,
                cap,
            } => {
                scope.ensure_free(binding)?;
                let slot = self.fresh_var();
                let inner = scope.with_var(binding.id(), slot.clone());
                let filter = self.lower(filter, &inner)?;
                let mut patch = Vec::with_capacity(updates.len());
                for update in updates {
                    patch.push((update.name.clone(), self.lower(&update.value, &inner)?));
                }
                Op::Update {
                    collection: type_name.clone(),
                    slot,
                    filter: Box::new(filter),
                    patch,
                    cap: *cap,
                }
            }
            QueryNode::DeleteEntities {
                type_name,
                binding,
                filter,
                cap,
            } => {
                scope.ensure_free(binding)?;
                let slot = self.fresh_var();
                let inner = scope.with_var(binding.id(), slot.clone());
                let filter = self.lower(filter, &inner)?;
                Op::Delete {
                    collection: type_name.clone(),
                    slot,
                    filter: Box::new(filter),
                    cap: *cap,
                }
            }
            QueryNode::AddEdges { relation, edges } => {
                let mut pairs = Vec::with_capacity(edges.len());
                for edge in edges {
                    pairs.push((self.lower(&edge.from, scope)?, self.lower(&edge.to, scope)?));
                }
                Op::LinkEdges {
                    relation: relation.clone(),
                    edges: pairs,
                }
            }
            QueryNode::RemoveEdges { relation, from, to } => Op::UnlinkEdges {
                relation: relation.clone(),
                from: self.lower_opt(from, scope)?,
                to: self.lower_opt(to, scope)?,
            },
            QueryNode::SetEdge {
                relation,
                existing_from,
                existing_to,
                new_from,
                new_to,
            } => Op::ReplaceEdge {
                relation: relation.clone(),
                existing_from: self.lower_opt(existing_from, scope)?,
                existing_to: self.lower_opt(existing_to, scope)?,
                new_from: Box::new(self.lower(new_from, scope)?),
                new_to: Box::new(self.lower(new_to, scope)?),
            },

            QueryNode::Conditional {
                condition,
                then_branch,
                else_branch,
            } => Op::Branch {
                condition: Box::new(self.lower(condition, scope)?),
                then_op: Box::new(self.lower(then_branch, scope)?),
                else_op: Box::new(self.lower(else_branch, scope)?),
            },
            QueryNode::TypeCheck { value, kind } => Op::KindOf {
                value: Box::new(self.lower(value, scope)?),
                kind: *kind,
            },
            QueryNode::UnaryOperation { operator, operand } => Op::Unary {
                operator: *operator,
                operand: Box::new(self.lower(operand, scope)?),
            },
            QueryNode::BinaryOperation { operator, lhs, rhs } => Op::Binary {
                operator: *operator,
                lhs: Box::new(self.lower(lhs, scope)?),
                rhs: Box::new(self.lower(rhs, scope)?),
            },

            QueryNode::RuntimeError { message } => Op::Fail {
                message: message.clone(),
            },

            QueryNode::WithPreExecution { steps, result } => {
                let mut augmented = scope.clone();
                for step in steps {
                    augmented.ensure_free(&step.binding)?;
                    // Lower the query before allocating the step slot so
                    // nested steps flatten ahead of the step that needs
                    // them and numbering follows list order.
                    let op = self.lower(&step.query, &augmented.step_scope())?;
                    let slot = self.fresh_step();
                    self.steps.push(CompiledStep {
                        name: slot.clone(),
                        op,
                        validator: step.validator.clone(),
                    });
                    augmented = augmented.with_pre_exec(step.binding.id(), slot);
                }
                self.lower(result, &augmented)?
            }
        })
    }

    fn lower_all(&mut self, nodes: &[Node], scope: &Scope) -> CompileResult<Vec<Op>> {
        nodes.iter().map(|node| self.lower(node, scope)).collect()
    }

    fn lower_opt(&mut self, node: &Option<Node>, scope: &Scope) -> CompileResult<Option<Box<Op>>> {
        node.as_ref()
            .map(|node| self.lower(node, scope).map(Box::new))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::errors::CompileError;
    use crate::ir::{
        PreExecStep, PropertySpec, QueryNode, ResultValidator, TransformListBuilder, VarBinding,
    };
    use serde_json::json;

    #[test]
    fn test_slots_are_numbered_in_traversal_order() {
        let a = VarBinding::new("a");
        let b = VarBinding::new("b");
        let tree = QueryNode::assign_variable(
            &a,
            QueryNode::integer(1),
            QueryNode::assign_variable(
                &b,
                QueryNode::integer(2),
                QueryNode::list(vec![QueryNode::variable(&a), QueryNode::variable(&b)]),
            ),
        );
        let compiled = QueryCompiler::compile(&tree).unwrap();
        assert_eq!(
            compiled.main,
            Op::Bind {
                slot: "v1".into(),
                value: Box::new(Op::Const(json!(1))),
                body: Box::new(Op::Bind {
                    slot: "v2".into(),
                    value: Box::new(Op::Const(json!(2))),
                    body: Box::new(Op::MakeList(vec![
                        Op::Load("v1".into()),
                        Op::Load("v2".into()),
                    ])),
                }),
            }
        );
    }

    #[test]
    fn test_equal_trees_compile_to_equal_operations() {
        let build = || {
            let item = VarBinding::new("item");
            TransformListBuilder::new(QueryNode::entities("User"), item.clone())
                .with_filter(QueryNode::field(QueryNode::variable(&item), "active"))
                .with_cap(10)
                .build()
        };
        let first = QueryCompiler::compile(&build()).unwrap();
        let second = QueryCompiler::compile(&build()).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_unbound_variable_reads_fail() {
        let ghost = VarBinding::new("ghost");
        let tree = QueryNode::variable(&ghost);
        assert_eq!(
            QueryCompiler::compile(&tree),
            Err(CompileError::UnboundVariable {
                label: "ghost".into(),
                id: ghost.id(),
            })
        );
    }

    #[test]
    fn test_reusing_one_binding_in_nested_assignments_fails() {
        let x = VarBinding::new("x");
        let tree = QueryNode::assign_variable(
            &x,
            QueryNode::integer(1),
            QueryNode::assign_variable(&x, QueryNode::integer(2), QueryNode::variable(&x)),
        );
        assert_eq!(
            QueryCompiler::compile(&tree),
            Err(CompileError::DuplicateBinding {
                label: "x".into(),
                id: x.id(),
            })
        );
    }

    #[test]
    fn test_bare_context_reads_fail() {
        let tree = QueryNode::count(QueryNode::context());
        assert_eq!(
            QueryCompiler::compile(&tree),
            Err(CompileError::ContextUnavailable)
        );
    }

    #[test]
    fn test_context_resolves_to_the_innermost_assignment() {
        let tree = QueryNode::assign_context(
            QueryNode::integer(1),
            QueryNode::assign_context(QueryNode::integer(2), QueryNode::context()),
        );
        let compiled = QueryCompiler::compile(&tree).unwrap();
        assert_eq!(
            compiled.main,
            Op::Bind {
                slot: "v1".into(),
                value: Box::new(Op::Const(json!(1))),
                body: Box::new(Op::Bind {
                    slot: "v2".into(),
                    value: Box::new(Op::Const(json!(2))),
                    body: Box::new(Op::Load("v2".into())),
                }),
            }
        );
    }

    #[test]
    fn test_point_reads_lower_to_capped_scans() {
        let tree = QueryNode::entity_from_id("User", QueryNode::literal(json!("id-7")));
        let compiled = QueryCompiler::compile(&tree).unwrap();
        match compiled.main {
            Op::First(inner) => match *inner {
                Op::Transform {
                    source, cap, filter, ..
                } => {
                    assert_eq!(
                        *source,
                        Op::Scan {
                            collection: "User".into()
                        }
                    );
                    assert_eq!(cap, Some(1));
                    assert!(matches!(*filter, Op::Binary { .. }));
                }
                other => panic!("expected Transform, got {other:?}"),
            },
            other => panic!("expected First, got {other:?}"),
        }
    }

    #[test]
    fn test_pre_execution_steps_flatten_in_execution_order() {
        let check = VarBinding::new("check");
        let inner_check = VarBinding::new("inner");
        let nested = QueryNode::with_pre_execution(
            vec![PreExecStep::new(inner_check.clone(), QueryNode::boolean(true))],
            QueryNode::variable(&inner_check),
        );
        let tree = QueryNode::with_pre_execution(
            vec![PreExecStep::new(check.clone(), nested)
                .with_validator(ResultValidator::truthy("check failed"))],
            QueryNode::variable(&check),
        );
        let compiled = QueryCompiler::compile(&tree).unwrap();

        assert_eq!(compiled.pre_exec.len(), 2);
        assert_eq!(compiled.pre_exec[0].name, "p1");
        assert_eq!(compiled.pre_exec[0].op, Op::Const(json!(true)));
        assert_eq!(compiled.pre_exec[0].validator, None);
        assert_eq!(compiled.pre_exec[1].name, "p2");
        assert_eq!(compiled.pre_exec[1].op, Op::Load("p1".into()));
        assert_eq!(
            compiled.pre_exec[1].validator,
            Some(ResultValidator::truthy("check failed"))
        );
        assert_eq!(compiled.main, Op::Load("p2".into()));
    }

    #[test]
    fn test_later_steps_see_earlier_step_results() {
        let first = VarBinding::new("first");
        let second = VarBinding::new("second");
        let tree = QueryNode::with_pre_execution(
            vec![
                PreExecStep::new(first.clone(), QueryNode::integer(1)),
                PreExecStep::new(second.clone(), QueryNode::variable(&first)),
            ],
            QueryNode::variable(&second),
        );
        let compiled = QueryCompiler::compile(&tree).unwrap();
        assert_eq!(compiled.pre_exec[1].op, Op::Load("p1".into()));
    }

    #[test]
    fn test_steps_cannot_read_enclosing_lexical_bindings() {
        let outer = VarBinding::new("outer");
        let check = VarBinding::new("check");
        let tree = QueryNode::assign_variable(
            &outer,
            QueryNode::integer(1),
            QueryNode::with_pre_execution(
                vec![PreExecStep::new(check.clone(), QueryNode::variable(&outer))],
                QueryNode::variable(&check),
            ),
        );
        assert_eq!(
            QueryCompiler::compile(&tree),
            Err(CompileError::CrossesPreExecutionBoundary {
                label: "outer".into(),
                id: outer.id(),
            })
        );
    }

    #[test]
    fn test_the_result_sees_both_lexical_and_step_bindings() {
        let outer = VarBinding::new("outer");
        let check = VarBinding::new("check");
        let tree = QueryNode::assign_variable(
            &outer,
            QueryNode::integer(1),
            QueryNode::with_pre_execution(
                vec![PreExecStep::new(check.clone(), QueryNode::boolean(true))],
                QueryNode::list(vec![
                    QueryNode::variable(&outer),
                    QueryNode::variable(&check),
                ]),
            ),
        );
        let compiled = QueryCompiler::compile(&tree).unwrap();
        assert_eq!(
            compiled.main,
            Op::Bind {
                slot: "v1".into(),
                value: Box::new(Op::Const(json!(1))),
                body: Box::new(Op::MakeList(vec![
                    Op::Load("v1".into()),
                    Op::Load("p1".into()),
                ])),
            }
        );
    }

    #[test]
    fn test_update_inputs_compile_in_the_record_scope() {
        let record = VarBinding::new("record");
        let tree = QueryNode::update_entities(
            "User",
            &record,
            QueryNode::field(QueryNode::variable(&record), "active"),
            vec![PropertySpec::new(
                "visits",
                QueryNode::binary(
                    QueryNode::field(QueryNode::variable(&record), "visits"),
                    crate::ir::BinaryOperator::Add,
                    QueryNode::integer(1),
                ),
            )],
            Some(5),
        );
        let compiled = QueryCompiler::compile(&tree).unwrap();
        match compiled.main {
            Op::Update {
                collection,
                slot,
                filter,
                patch,
                cap,
            } => {
                assert_eq!(collection, "User");
                assert_eq!(slot, "v1");
                assert_eq!(
                    *filter,
                    Op::GetField {
                        object: Box::new(Op::Load("v1".into())),
                        name: "active".into()
                    }
                );
                assert_eq!(patch.len(), 1);
                assert_eq!(cap, Some(5));
            }
            other => panic!("expected Update, got {other:?}"),
        }
    }
}
