//! Permission evaluation.
//!
//! Maps a (profile, context, operation) triple onto a three-valued verdict
//! and, for conditional verdicts, builds the per-record access condition
//! that the transformer splices into the query.

use serde_json::json;

use crate::ir::{BinaryOperator, Node, QueryNode};

use super::context::{AccessContext, OperationKind};
use super::errors::{AuthError, AuthResult};
use super::profile::ProfileRegistry;

/// Outcome of evaluating a profile for one operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessVerdict {
    /// At least one applicable grant is unrestricted.
    Granted,
    /// No grant applies.
    Denied,
    /// Applicable grants exist but all are access-group restricted, so
    /// access depends on each record's access-group value.
    Conditional,
}

impl AccessVerdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessVerdict::Granted => "granted",
            AccessVerdict::Denied => "denied",
            AccessVerdict::Conditional => "conditional",
        }
    }
}

/// Evaluates named profiles against a registry.
#[derive(Debug, Clone, Copy)]
pub struct PermissionEvaluator<'a> {
    registry: &'a ProfileRegistry,
}

impl<'a> PermissionEvaluator<'a> {
    pub fn new(registry: &'a ProfileRegistry) -> Self {
        Self { registry }
    }

    /// The verdict for one profile, context and operation.
    ///
    /// An unrestricted applicable grant wins outright; restriction only
    /// matters when every applicable grant carries one.
    pub fn can_access(
        &self,
        profile_name: &str,
        ctx: &AccessContext,
        operation: OperationKind,
    ) -> AuthResult<AccessVerdict> {
        let profile = self
            .registry
            .get(profile_name)
            .ok_or_else(|| AuthError::UnknownProfile(profile_name.to_string()))?;

        let mut saw_applicable = false;
        for permission in profile.applicable(ctx, operation) {
            if !permission.is_restricted() {
                return Ok(AccessVerdict::Granted);
            }
            saw_applicable = true;
        }
        Ok(if saw_applicable {
            AccessVerdict::Conditional
        } else {
            AccessVerdict::Denied
        })
    }

    /// The sorted union of access groups the context may reach.
    pub fn permitted_groups(
        &self,
        profile_name: &str,
        ctx: &AccessContext,
        operation: OperationKind,
    ) -> AuthResult<Vec<String>> {
        let profile = self
            .registry
            .get(profile_name)
            .ok_or_else(|| AuthError::UnknownProfile(profile_name.to_string()))?;
        Ok(profile.permitted_groups(ctx, operation))
    }

    /// Builds the per-record access condition for a conditional verdict.
    ///
    /// The condition tests whether the subject's access-group field value
    /// is one of the permitted groups. Callers supply the subject node,
    /// typically a variable bound to the record under test.
    pub fn access_condition(
        &self,
        profile_name: &str,
        ctx: &AccessContext,
        operation: OperationKind,
        access_group_field: &str,
        subject: Node,
    ) -> AuthResult<Node> {
        match self.can_access(profile_name, ctx, operation)? {
            AccessVerdict::Conditional => {}
            _ => return Err(AuthError::VerdictNotConditional(profile_name.to_string())),
        }
        let groups = self.permitted_groups(profile_name, ctx, operation)?;
        Ok(QueryNode::binary(
            QueryNode::field(subject, access_group_field),
            BinaryOperator::In,
            QueryNode::literal(json!(groups)),
        ))
    }
}

/// The fixed message embedded for a denied scope.
///
/// Deliberately reveals only the scope name and the operation class, never
/// why access was denied or what the data holds.
pub fn denial_message(scope: &str, operation: OperationKind) -> String {
    format!("Not authorized to {} {}", operation.as_str(), scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::profile::{AccessKind, Permission, PermissionProfile};

    fn registry() -> ProfileRegistry {
        ProfileRegistry::new()
            .with_profile(
                "staff",
                PermissionProfile::new(vec![
                    Permission::new(["admin"], AccessKind::ReadWrite),
                    Permission::restricted(["clerk"], AccessKind::Read, ["east", "west"]),
                ]),
            )
            .with_profile("nobody", PermissionProfile::new(vec![]))
    }

    #[test]
    fn test_unrestricted_grant_wins_over_restricted() {
        let registry = registry();
        let evaluator = PermissionEvaluator::new(&registry);
        let ctx = AccessContext::with_roles(["admin", "clerk"]);
        assert_eq!(
            evaluator.can_access("staff", &ctx, OperationKind::Read),
            Ok(AccessVerdict::Granted)
        );
    }

    #[test]
    fn test_only_restricted_grants_yield_conditional() {
        let registry = registry();
        let evaluator = PermissionEvaluator::new(&registry);
        let ctx = AccessContext::with_roles(["clerk"]);
        assert_eq!(
            evaluator.can_access("staff", &ctx, OperationKind::Read),
            Ok(AccessVerdict::Conditional)
        );
        assert_eq!(
            evaluator.can_access("staff", &ctx, OperationKind::Delete),
            Ok(AccessVerdict::Denied)
        );
    }

    #[test]
    fn test_missing_profile_is_a_configuration_error() {
        let registry = registry();
        let evaluator = PermissionEvaluator::new(&registry);
        assert_eq!(
            evaluator.can_access("ghost", &AccessContext::anonymous(), OperationKind::Read),
            Err(AuthError::UnknownProfile("ghost".into()))
        );
    }

    #[test]
    fn test_access_condition_tests_group_membership() {
        let registry = registry();
        let evaluator = PermissionEvaluator::new(&registry);
        let ctx = AccessContext::with_roles(["clerk"]);
        let condition = evaluator
            .access_condition("staff", &ctx, OperationKind::Read, "region", QueryNode::context())
            .unwrap();
        assert_eq!(
            condition.describe(),
            "in(field(ctx, region), [\"east\",\"west\"])"
        );
    }

    #[test]
    fn test_access_condition_rejects_non_conditional_verdicts() {
        let registry = registry();
        let evaluator = PermissionEvaluator::new(&registry);
        let admin = AccessContext::with_roles(["admin"]);
        assert_eq!(
            evaluator.access_condition(
                "staff",
                &admin,
                OperationKind::Read,
                "region",
                QueryNode::context()
            ),
            Err(AuthError::VerdictNotConditional("staff".into()))
        );
    }

    #[test]
    fn test_denial_messages_are_fixed_and_scope_only() {
        assert_eq!(
            denial_message("User.salary", OperationKind::Read),
            "Not authorized to read User.salary"
        );
        assert_eq!(
            denial_message("Order", OperationKind::Delete),
            "Not authorized to delete Order"
        );
    }
}
