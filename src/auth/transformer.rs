//! Authorization rewriting.
//!
//! The transformer walks a query tree bottom-up and splices the caller's
//! permissions into it. Granted access leaves nodes untouched, denied
//! access replaces them with embedded runtime errors, and conditional
//! access narrows them with per-record access-group conditions. The
//! output is an ordinary query tree; downstream passes need no knowledge
//! of authorization.

use std::sync::Arc;

use crate::ir::{
    try_map_children, Node, PreExecStep, QueryNode, ResultValidator, TransformListBuilder,
    VarBinding,
};
use crate::schema::SchemaInfo;

use super::context::{AccessContext, OperationKind};
use super::errors::{AuthError, AuthResult};
use super::evaluator::{denial_message, AccessVerdict, PermissionEvaluator};
use super::profile::ProfileRegistry;

/// One authorization decision that changed the query.
///
/// Granted access is not recorded; the interesting outcomes are the ones
/// that altered the tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AccessDecision {
    /// The scope was replaced by an embedded runtime error.
    Denied {
        scope: String,
        operation: OperationKind,
    },
    /// The scope was narrowed by an access-group filter.
    Filtered {
        scope: String,
        operation: OperationKind,
    },
    /// A pre-execution access check was inserted for the scope.
    CheckInserted {
        scope: String,
        operation: OperationKind,
    },
}

impl AccessDecision {
    pub fn kind(&self) -> &'static str {
        match self {
            AccessDecision::Denied { .. } => "denied",
            AccessDecision::Filtered { .. } => "filtered",
            AccessDecision::CheckInserted { .. } => "check_inserted",
        }
    }

    pub fn scope(&self) -> &str {
        match self {
            AccessDecision::Denied { scope, .. }
            | AccessDecision::Filtered { scope, .. }
            | AccessDecision::CheckInserted { scope, .. } => scope,
        }
    }

    pub fn operation(&self) -> OperationKind {
        match self {
            AccessDecision::Denied { operation, .. }
            | AccessDecision::Filtered { operation, .. }
            | AccessDecision::CheckInserted { operation, .. } => *operation,
        }
    }
}

/// Outcome of guarding a filtered mutation.
enum Guard {
    Pass,
    Replace(Node),
    Narrow(Node),
}

/// Rewrites query trees for one access context.
pub struct AuthorizationTransformer<'a> {
    schema: &'a SchemaInfo,
    evaluator: PermissionEvaluator<'a>,
    ctx: &'a AccessContext,
    decisions: Vec<AccessDecision>,
}

impl<'a> AuthorizationTransformer<'a> {
    pub fn new(
        schema: &'a SchemaInfo,
        registry: &'a ProfileRegistry,
        ctx: &'a AccessContext,
    ) -> Self {
        Self {
            schema,
            evaluator: PermissionEvaluator::new(registry),
            ctx,
            decisions: Vec::new(),
        }
    }

    /// Rewrites the tree for this transformer's context.
    ///
    /// Subtrees with no permission-relevant nodes come back as the same
    /// handles, so a fully granted query is returned unchanged.
    pub fn transform(&mut self, root: &Node) -> AuthResult<Node> {
        self.decisions.clear();
        self.rewrite(root)
    }

    /// The decisions recorded by the last [`transform`](Self::transform).
    pub fn decisions(&self) -> &[AccessDecision] {
        &self.decisions
    }

    fn rewrite(&mut self, node: &Node) -> AuthResult<Node> {
        let walked = try_map_children(node, &mut |_, child| self.rewrite(child))?;

        match walked.as_ref() {
            QueryNode::Field {
                name,
                entity_type: Some(entity_type),
                ..
            } => {
                let entity = self.entity(entity_type)?;
                let field = entity.field(name).ok_or_else(|| AuthError::UnknownField {
                    type_name: entity_type.clone(),
                    field: name.clone(),
                })?;
                let Some(profile) = field.permission_profile.as_deref() else {
                    return Ok(walked.clone());
                };
                let scope = format!("{entity_type}.{name}");
                match self.evaluator.can_access(profile, self.ctx, OperationKind::Read)? {
                    AccessVerdict::Granted => Ok(walked.clone()),
                    AccessVerdict::Denied => Ok(self.deny(scope, OperationKind::Read)),
                    // A field read yields one value; there is no record
                    // stream to narrow, so restricted field grants cannot
                    // be honored and the schema is rejected outright.
                    AccessVerdict::Conditional => {
                        Err(AuthError::ConditionalNotExpressible { scope })
                    }
                }
            }

            QueryNode::Entities { type_name } => {
                self.guard_collection_read(&walked, type_name)
            }

            QueryNode::EntityFromId { type_name, .. } => {
                self.guard_point_read(&walked, type_name)
            }

            QueryNode::FollowEdge { edge, side, .. } => {
                if self.schema.relation(&edge.relation).is_none() {
                    return Err(AuthError::UnknownRelation(edge.relation.clone()));
                }
                let target = edge.target_type(*side).to_string();
                self.guard_collection_read(&walked, &target)
            }

            QueryNode::CreateEntity { type_name, object } => {
                let entity = self.entity(type_name)?;
                let Some(profile) = entity.permission_profile.as_deref() else {
                    return Ok(walked.clone());
                };
                match self
                    .evaluator
                    .can_access(profile, self.ctx, OperationKind::Create)?
                {
                    AccessVerdict::Granted => Ok(walked.clone()),
                    AccessVerdict::Denied => {
                        Ok(self.deny(type_name.clone(), OperationKind::Create))
                    }
                    AccessVerdict::Conditional => {
                        let group_field = self.access_group_field(type_name)?;
                        let condition = self.evaluator.access_condition(
                            profile,
                            self.ctx,
                            OperationKind::Create,
                            &group_field,
                            object.clone(),
                        )?;
                        let step = PreExecStep::new(VarBinding::new("access_check"), condition)
                            .with_validator(ResultValidator::truthy(denial_message(
                                type_name,
                                OperationKind::Create,
                            )));
                        self.decisions.push(AccessDecision::CheckInserted {
                            scope: type_name.clone(),
                            operation: OperationKind::Create,
                        });
                        Ok(QueryNode::with_pre_execution(vec![step], walked.clone()))
                    }
                }
            }

            QueryNode::UpdateEntities {
                type_name,
                binding,
                filter,
                updates,
                cap,
            } => match self.guard_filtered_mutation(type_name, OperationKind::Update, binding)? {
                Guard::Pass => Ok(walked.clone()),
                Guard::Replace(replacement) => Ok(replacement),
                Guard::Narrow(condition) => Ok(Arc::new(QueryNode::UpdateEntities {
                    type_name: type_name.clone(),
                    binding: binding.clone(),
                    filter: QueryNode::and(filter.clone(), condition),
                    updates: updates.clone(),
                    cap: *cap,
                })),
            },

            QueryNode::DeleteEntities {
                type_name,
                binding,
                filter,
                cap,
            } => match self.guard_filtered_mutation(type_name, OperationKind::Delete, binding)? {
                Guard::Pass => Ok(walked.clone()),
                Guard::Replace(replacement) => Ok(replacement),
                Guard::Narrow(condition) => Ok(Arc::new(QueryNode::DeleteEntities {
                    type_name: type_name.clone(),
                    binding: binding.clone(),
                    filter: QueryNode::and(filter.clone(), condition),
                    cap: *cap,
                })),
            },

            // Edge mutations carry no check of their own; their endpoint
            // subtrees are reads and were already guarded above.
            QueryNode::AddEdges { relation, .. }
            | QueryNode::RemoveEdges { relation, .. }
            | QueryNode::SetEdge { relation, .. } => {
                if self.schema.relation(relation).is_none() {
                    return Err(AuthError::UnknownRelation(relation.clone()));
                }
                Ok(walked.clone())
            }

            _ => Ok(walked.clone()),
        }
    }

    fn entity(&self, type_name: &str) -> AuthResult<&'a crate::schema::EntityType> {
        self.schema
            .entity_type(type_name)
            .ok_or_else(|| AuthError::UnknownEntityType(type_name.to_string()))
    }

    fn access_group_field(&self, type_name: &str) -> AuthResult<String> {
        self.entity(type_name)?
            .access_group_field
            .clone()
            .ok_or_else(|| AuthError::MissingAccessGroupField(type_name.to_string()))
    }

    fn deny(&mut self, scope: String, operation: OperationKind) -> Node {
        let node = QueryNode::runtime_error(denial_message(&scope, operation));
        self.decisions
            .push(AccessDecision::Denied { scope, operation });
        node
    }

    /// Guards a list-valued read of a collection.
    fn guard_collection_read(&mut self, walked: &Node, type_name: &str) -> AuthResult<Node> {
        let entity = self.entity(type_name)?;
        let Some(profile) = entity.permission_profile.as_deref() else {
            return Ok(walked.clone());
        };
        match self
            .evaluator
            .can_access(profile, self.ctx, OperationKind::Read)?
        {
            AccessVerdict::Granted => Ok(walked.clone()),
            AccessVerdict::Denied => Ok(self.deny(type_name.to_string(), OperationKind::Read)),
            AccessVerdict::Conditional => {
                let group_field = self.access_group_field(type_name)?;
                let binding = VarBinding::new("item");
                let condition = self.evaluator.access_condition(
                    profile,
                    self.ctx,
                    OperationKind::Read,
                    &group_field,
                    QueryNode::variable(&binding),
                )?;
                self.decisions.push(AccessDecision::Filtered {
                    scope: type_name.to_string(),
                    operation: OperationKind::Read,
                });
                Ok(TransformListBuilder::new(walked.clone(), binding)
                    .with_filter(condition)
                    .build())
            }
        }
    }

    /// Guards a single-entity read. Conditional access turns the entity
    /// into null when its access group is not permitted, which is
    /// indistinguishable from the entity being absent.
    fn guard_point_read(&mut self, walked: &Node, type_name: &str) -> AuthResult<Node> {
        let entity = self.entity(type_name)?;
        let Some(profile) = entity.permission_profile.as_deref() else {
            return Ok(walked.clone());
        };
        match self
            .evaluator
            .can_access(profile, self.ctx, OperationKind::Read)?
        {
            AccessVerdict::Granted => Ok(walked.clone()),
            AccessVerdict::Denied => Ok(self.deny(type_name.to_string(), OperationKind::Read)),
            AccessVerdict::Conditional => {
                let group_field = self.access_group_field(type_name)?;
                let binding = VarBinding::new("entity");
                let condition = self.evaluator.access_condition(
                    profile,
                    self.ctx,
                    OperationKind::Read,
                    &group_field,
                    QueryNode::variable(&binding),
                )?;
                self.decisions.push(AccessDecision::Filtered {
                    scope: type_name.to_string(),
                    operation: OperationKind::Read,
                });
                Ok(QueryNode::assign_variable(
                    &binding,
                    walked.clone(),
                    QueryNode::conditional(
                        condition,
                        QueryNode::variable(&binding),
                        QueryNode::null(),
                    ),
                ))
            }
        }
    }

    fn guard_filtered_mutation(
        &mut self,
        type_name: &str,
        operation: OperationKind,
        binding: &VarBinding,
    ) -> AuthResult<Guard> {
        let entity = self.entity(type_name)?;
        let Some(profile) = entity.permission_profile.as_deref() else {
            return Ok(Guard::Pass);
        };
        match self.evaluator.can_access(profile, self.ctx, operation)? {
            AccessVerdict::Granted => Ok(Guard::Pass),
            AccessVerdict::Denied => Ok(Guard::Replace(
                self.deny(type_name.to_string(), operation),
            )),
            AccessVerdict::Conditional => {
                let group_field = self.access_group_field(type_name)?;
                let condition = self.evaluator.access_condition(
                    profile,
                    self.ctx,
                    operation,
                    &group_field,
                    QueryNode::variable(binding),
                )?;
                self.decisions.push(AccessDecision::Filtered {
                    scope: type_name.to_string(),
                    operation,
                });
                Ok(Guard::Narrow(condition))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::profile::{AccessKind, Permission, PermissionProfile};
    use crate::ir::{BinaryOperator, EdgeRef, PropertySpec};
    use crate::schema::{EntityType, FieldInfo, Relation};
    use serde_json::json;
    use std::sync::Arc;

    fn schema() -> SchemaInfo {
        SchemaInfo::new()
            .with_entity_type(
                EntityType::new("User")
                    .with_field(FieldInfo::unrestricted("name"))
                    .with_field(FieldInfo::restricted("salary", "payroll"))
                    .with_profile("user_profile")
                    .with_access_group_field("region"),
            )
            .with_entity_type(
                EntityType::new("Order")
                    .with_field(FieldInfo::unrestricted("total"))
                    .with_profile("order_profile"),
            )
            .with_entity_type(EntityType::new("Note").with_field(FieldInfo::unrestricted("text")))
            .with_relation(Relation::new("user_orders", "User", "Order"))
    }

    fn registry() -> ProfileRegistry {
        ProfileRegistry::new()
            .with_profile(
                "user_profile",
                PermissionProfile::new(vec![
                    Permission::new(["admin"], AccessKind::ReadWrite),
                    Permission::restricted(["clerk"], AccessKind::ReadWrite, ["east"]),
                ]),
            )
            .with_profile(
                "order_profile",
                PermissionProfile::new(vec![Permission::new(["admin"], AccessKind::ReadWrite)]),
            )
            .with_profile(
                "payroll",
                PermissionProfile::new(vec![Permission::new(["payroll_admin"], AccessKind::Read)]),
            )
    }

    fn transform(node: &Node, roles: &[&str]) -> AuthResult<(Node, Vec<AccessDecision>)> {
        let schema = schema();
        let registry = registry();
        let ctx = AccessContext::with_roles(roles.iter().copied());
        let mut transformer = AuthorizationTransformer::new(&schema, &registry, &ctx);
        let out = transformer.transform(node)?;
        Ok((out, transformer.decisions().to_vec()))
    }

    #[test]
    fn test_granted_query_returns_the_same_handle() {
        let query = QueryNode::count(QueryNode::entities("User"));
        let (out, decisions) = transform(&query, &["admin"]).unwrap();
        assert!(Arc::ptr_eq(&query, &out));
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_denied_collection_read_becomes_an_error_node() {
        let query = QueryNode::entities("Order");
        let (out, decisions) = transform(&query, &["clerk"]).unwrap();
        assert_eq!(
            out.as_ref(),
            &QueryNode::RuntimeError {
                message: "Not authorized to read Order".into()
            }
        );
        assert_eq!(decisions.len(), 1);
        assert_eq!(decisions[0].kind(), "denied");
        assert_eq!(decisions[0].scope(), "Order");
    }

    #[test]
    fn test_conditional_collection_read_is_wrapped_in_a_filter() {
        let query = QueryNode::entities("User");
        let (out, decisions) = transform(&query, &["clerk"]).unwrap();
        match out.as_ref() {
            QueryNode::TransformList { source, filter, .. } => {
                assert!(Arc::ptr_eq(source, &query));
                assert!(filter
                    .describe()
                    .contains("in(field($item_"));
                assert!(filter.describe().contains("[\"east\"]"));
            }
            other => panic!("expected filter wrap, got {other:?}"),
        }
        assert_eq!(decisions[0].kind(), "filtered");
    }

    #[test]
    fn test_denied_field_read_keeps_the_rest_of_the_object() {
        let binding = VarBinding::new("u");
        let query = QueryNode::object(vec![
            PropertySpec::new(
                "name",
                QueryNode::entity_field(QueryNode::variable(&binding), "User", "name"),
            ),
            PropertySpec::new(
                "salary",
                QueryNode::entity_field(QueryNode::variable(&binding), "User", "salary"),
            ),
        ]);
        let (out, _) = transform(&query, &["admin"]).unwrap();
        match out.as_ref() {
            QueryNode::Object(properties) => {
                assert!(matches!(
                    properties[0].value.as_ref(),
                    QueryNode::Field { .. }
                ));
                assert_eq!(
                    properties[1].value.as_ref(),
                    &QueryNode::RuntimeError {
                        message: "Not authorized to read User.salary".into()
                    }
                );
            }
            other => panic!("expected Object, got {other:?}"),
        }
    }

    #[test]
    fn test_conditional_field_access_is_a_configuration_error() {
        let schema = SchemaInfo::new().with_entity_type(
            EntityType::new("User").with_field(FieldInfo::restricted("salary", "user_profile")),
        );
        let registry = registry();
        let ctx = AccessContext::with_roles(["clerk"]);
        let mut transformer = AuthorizationTransformer::new(&schema, &registry, &ctx);
        let query = QueryNode::entity_field(QueryNode::context(), "User", "salary");
        assert_eq!(
            transformer.transform(&query),
            Err(AuthError::ConditionalNotExpressible {
                scope: "User.salary".into()
            })
        );
    }

    #[test]
    fn test_conditional_create_gains_a_pre_execution_check() {
        let query = QueryNode::create_entity(
            "User",
            QueryNode::literal(json!({"name": "ada", "region": "east"})),
        );
        let (out, decisions) = transform(&query, &["clerk"]).unwrap();
        match out.as_ref() {
            QueryNode::WithPreExecution { steps, result } => {
                assert!(Arc::ptr_eq(result, &query));
                assert_eq!(steps.len(), 1);
                assert_eq!(
                    steps[0].validator,
                    Some(ResultValidator::truthy("Not authorized to create User"))
                );
                assert!(steps[0].query.describe().contains("[\"east\"]"));
            }
            other => panic!("expected pre-execution wrap, got {other:?}"),
        }
        assert_eq!(decisions[0].kind(), "check_inserted");
    }

    #[test]
    fn test_conditional_update_narrows_the_filter() {
        let binding = VarBinding::new("u");
        let user_filter = QueryNode::binary(
            QueryNode::field(QueryNode::variable(&binding), "name"),
            BinaryOperator::Equal,
            QueryNode::literal(json!("ada")),
        );
        let query = QueryNode::update_entities(
            "User",
            &binding,
            user_filter.clone(),
            vec![PropertySpec::new("name", QueryNode::literal(json!("eda")))],
            None,
        );
        let (out, _) = transform(&query, &["clerk"]).unwrap();
        match out.as_ref() {
            QueryNode::UpdateEntities { filter, .. } => match filter.as_ref() {
                QueryNode::BinaryOperation {
                    operator: BinaryOperator::And,
                    lhs,
                    rhs,
                } => {
                    assert!(Arc::ptr_eq(lhs, &user_filter));
                    assert!(rhs.describe().contains("region"));
                }
                other => panic!("expected narrowed filter, got {other:?}"),
            },
            other => panic!("expected UpdateEntities, got {other:?}"),
        }
    }

    #[test]
    fn test_denied_delete_is_replaced_wholesale() {
        let binding = VarBinding::new("o");
        let query =
            QueryNode::delete_entities("Order", &binding, QueryNode::boolean(true), None);
        let (out, _) = transform(&query, &["clerk"]).unwrap();
        assert_eq!(
            out.as_ref(),
            &QueryNode::RuntimeError {
                message: "Not authorized to delete Order".into()
            }
        );
    }

    #[test]
    fn test_edge_traversal_guards_the_target_collection() {
        let query = QueryNode::follow_edge(
            QueryNode::context(),
            EdgeRef::new("user_orders", "User", "Order"),
            crate::schema::RelationSide::From,
        );
        let (out, _) = transform(&query, &["clerk"]).unwrap();
        assert!(out.is_runtime_error());
    }

    #[test]
    fn test_unprofiled_types_pass_untouched() {
        let query = QueryNode::entities("Note");
        let (out, decisions) = transform(&query, &[]).unwrap();
        assert!(Arc::ptr_eq(&query, &out));
        assert!(decisions.is_empty());
    }

    #[test]
    fn test_unknown_entity_type_fails_fast() {
        let query = QueryNode::entities("Ghost");
        assert_eq!(
            transform(&query, &["admin"]).unwrap_err(),
            AuthError::UnknownEntityType("Ghost".into())
        );
    }

    #[test]
    fn test_conditional_point_read_nulls_out_foreign_records() {
        let query = QueryNode::entity_from_id("User", QueryNode::literal(json!("id-1")));
        let (out, _) = transform(&query, &["clerk"]).unwrap();
        match out.as_ref() {
            QueryNode::VariableAssignment { value, body, .. } => {
                assert!(Arc::ptr_eq(value, &query));
                assert!(matches!(body.as_ref(), QueryNode::Conditional { .. }));
            }
            other => panic!("expected guarded point read, got {other:?}"),
        }
    }
}
