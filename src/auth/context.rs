//! Request access context.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The identity a query is authorized against.
///
/// Authorization only ever consults the role set; the context carries no
/// credentials. Roles are kept sorted so derived artifacts, such as
/// access-group filters, are deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessContext {
    roles: BTreeSet<String>,
}

impl AccessContext {
    /// A context with no roles. Matches only profiles that grant to no one.
    pub fn anonymous() -> Self {
        Self::default()
    }

    pub fn with_roles<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.iter().map(String::as_str)
    }

    pub fn is_anonymous(&self) -> bool {
        self.roles.is_empty()
    }
}

/// The class of data access being authorized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Read,
    Create,
    Update,
    Delete,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Read => "read",
            OperationKind::Create => "create",
            OperationKind::Update => "update",
            OperationKind::Delete => "delete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anonymous_context_has_no_roles() {
        let ctx = AccessContext::anonymous();
        assert!(ctx.is_anonymous());
        assert!(!ctx.has_role("admin"));
    }

    #[test]
    fn test_roles_deduplicate_and_sort() {
        let ctx = AccessContext::with_roles(["editor", "admin", "editor"]);
        assert_eq!(ctx.roles().collect::<Vec<_>>(), vec!["admin", "editor"]);
    }
}
