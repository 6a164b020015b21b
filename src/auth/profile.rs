//! Permission profiles.
//!
//! A profile is an ordered list of grants. Each grant names the roles it
//! applies to, the access class it allows and optionally the access groups
//! it is restricted to. Profiles are data; schema authors attach them to
//! entity types and fields by name through a [`ProfileRegistry`].

use std::collections::BTreeMap;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::context::{AccessContext, OperationKind};

/// The access class a permission grants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessKind {
    Read,
    ReadWrite,
    Create,
    Update,
    Delete,
}

impl AccessKind {
    /// Whether this grant covers the given operation.
    pub fn covers(&self, operation: OperationKind) -> bool {
        match self {
            AccessKind::Read => matches!(operation, OperationKind::Read),
            AccessKind::ReadWrite => true,
            AccessKind::Create => matches!(operation, OperationKind::Create),
            AccessKind::Update => matches!(operation, OperationKind::Update),
            AccessKind::Delete => matches!(operation, OperationKind::Delete),
        }
    }
}

/// One grant inside a profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    pub roles: Vec<String>,
    pub access: AccessKind,
    /// When present, the grant only covers records whose access-group
    /// field holds one of these values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restrict_to_access_groups: Option<Vec<String>>,
}

impl Permission {
    pub fn new<I, S>(roles: I, access: AccessKind) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
            access,
            restrict_to_access_groups: None,
        }
    }

    pub fn restricted<I, S, G, T>(roles: I, access: AccessKind, groups: G) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        G: IntoIterator<Item = T>,
        T: Into<String>,
    {
        Self {
            restrict_to_access_groups: Some(groups.into_iter().map(Into::into).collect()),
            ..Self::new(roles, access)
        }
    }

    /// Whether any of the context's roles is named by this grant.
    pub fn applies_to(&self, ctx: &AccessContext) -> bool {
        self.roles.iter().any(|role| ctx.has_role(role))
    }

    pub fn is_restricted(&self) -> bool {
        self.restrict_to_access_groups.is_some()
    }
}

/// A named, ordered set of grants.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PermissionProfile {
    pub permissions: Vec<Permission>,
}

impl PermissionProfile {
    pub fn new(permissions: Vec<Permission>) -> Self {
        Self { permissions }
    }

    /// Grants that apply to the context and cover the operation.
    pub fn applicable<'a>(
        &'a self,
        ctx: &'a AccessContext,
        operation: OperationKind,
    ) -> impl Iterator<Item = &'a Permission> {
        self.permissions
            .iter()
            .filter(move |p| p.applies_to(ctx) && p.access.covers(operation))
    }

    /// Sorted union of the access groups of all applicable restricted
    /// grants.
    pub fn permitted_groups(&self, ctx: &AccessContext, operation: OperationKind) -> Vec<String> {
        let groups: BTreeSet<String> = self
            .applicable(ctx, operation)
            .filter_map(|p| p.restrict_to_access_groups.as_ref())
            .flatten()
            .cloned()
            .collect();
        groups.into_iter().collect()
    }
}

/// Name-keyed profile lookup shared by a whole schema.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProfileRegistry {
    profiles: BTreeMap<String, PermissionProfile>,
}

impl ProfileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_profile(mut self, name: impl Into<String>, profile: PermissionProfile) -> Self {
        self.profiles.insert(name.into(), profile);
        self
    }

    pub fn get(&self, name: &str) -> Option<&PermissionProfile> {
        self.profiles.get(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_write_covers_every_operation() {
        for op in [
            OperationKind::Read,
            OperationKind::Create,
            OperationKind::Update,
            OperationKind::Delete,
        ] {
            assert!(AccessKind::ReadWrite.covers(op));
        }
        assert!(!AccessKind::Read.covers(OperationKind::Delete));
        assert!(!AccessKind::Delete.covers(OperationKind::Read));
    }

    #[test]
    fn test_applicable_needs_both_role_and_coverage() {
        let profile = PermissionProfile::new(vec![
            Permission::new(["admin"], AccessKind::ReadWrite),
            Permission::new(["viewer"], AccessKind::Read),
        ]);
        let viewer = AccessContext::with_roles(["viewer"]);
        assert_eq!(profile.applicable(&viewer, OperationKind::Read).count(), 1);
        assert_eq!(
            profile.applicable(&viewer, OperationKind::Update).count(),
            0
        );
    }

    #[test]
    fn test_permitted_groups_union_is_sorted_and_deduplicated() {
        let profile = PermissionProfile::new(vec![
            Permission::restricted(["clerk"], AccessKind::Read, ["west", "east"]),
            Permission::restricted(["clerk"], AccessKind::Read, ["east", "north"]),
        ]);
        let ctx = AccessContext::with_roles(["clerk"]);
        assert_eq!(
            profile.permitted_groups(&ctx, OperationKind::Read),
            vec!["east", "north", "west"]
        );
    }

    #[test]
    fn test_profiles_round_trip_through_serde() {
        let profile = PermissionProfile::new(vec![Permission::restricted(
            ["ops"],
            AccessKind::ReadWrite,
            ["alpha"],
        )]);
        let json = serde_json::to_string(&profile).unwrap();
        let back: PermissionProfile = serde_json::from_str(&json).unwrap();
        assert_eq!(back, profile);
        assert!(json.contains("read_write"));
    }
}
