//! Prepared-schema metadata consumed by the compiler.
//!
//! The schema-preparation pipeline validates and enriches model definitions
//! elsewhere; this module only defines the read-only shape the compiler
//! receives: entity types, their declared fields, relations between them,
//! and the permission-profile names attached to each.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// The reserved field every stored entity carries its id under.
pub const ID_FIELD: &str = "_id";

/// Which side of a relation an entity occupies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationSide {
    /// The entity is the origin of the edge.
    From,
    /// The entity is the target of the edge.
    To,
}

impl RelationSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> RelationSide {
        match self {
            RelationSide::From => RelationSide::To,
            RelationSide::To => RelationSide::From,
        }
    }

    /// Returns the side name for rendering and messages.
    pub fn as_str(&self) -> &'static str {
        match self {
            RelationSide::From => "from",
            RelationSide::To => "to",
        }
    }
}

/// A declared relation, stored as an edge collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Relation {
    /// Relation name, doubling as the edge-collection name.
    pub name: String,
    /// Entity type on the from side.
    pub from_type: String,
    /// Entity type on the to side.
    pub to_type: String,
}

impl Relation {
    /// Creates a relation declaration.
    pub fn new(
        name: impl Into<String>,
        from_type: impl Into<String>,
        to_type: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            from_type: from_type.into(),
            to_type: to_type.into(),
        }
    }

    /// Returns the entity type reached when traversing from `side`.
    pub fn target_type(&self, side: RelationSide) -> &str {
        match side {
            RelationSide::From => &self.to_type,
            RelationSide::To => &self.from_type,
        }
    }
}

/// A declared field of an entity type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldInfo {
    /// Field name.
    pub name: String,
    /// Permission profile guarding reads of this field, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_profile: Option<String>,
}

impl FieldInfo {
    /// Creates a field without a field-level profile.
    pub fn unrestricted(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permission_profile: None,
        }
    }

    /// Creates a field guarded by the named profile.
    pub fn restricted(name: impl Into<String>, profile: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            permission_profile: Some(profile.into()),
        }
    }
}

/// A declared entity type (one stored collection).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityType {
    /// Type name, doubling as the collection name.
    pub name: String,
    /// Declared fields keyed by name.
    #[serde(default)]
    pub fields: BTreeMap<String, FieldInfo>,
    /// Permission profile guarding entity-level operations, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_profile: Option<String>,
    /// Field holding the per-record access-group classification, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_group_field: Option<String>,
}

impl EntityType {
    /// Creates an entity type with no fields and no profile.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            permission_profile: None,
            access_group_field: None,
        }
    }

    /// Adds a declared field.
    pub fn with_field(mut self, field: FieldInfo) -> Self {
        self.fields.insert(field.name.clone(), field);
        self
    }

    /// Sets the entity-level permission profile.
    pub fn with_profile(mut self, profile: impl Into<String>) -> Self {
        self.permission_profile = Some(profile.into());
        self
    }

    /// Declares the access-group field.
    pub fn with_access_group_field(mut self, field: impl Into<String>) -> Self {
        self.access_group_field = Some(field.into());
        self
    }

    /// Looks up a declared field.
    pub fn field(&self, name: &str) -> Option<&FieldInfo> {
        self.fields.get(name)
    }
}

/// The complete prepared schema handed to the compiler.
///
/// Treated as immutable for the lifetime of a compile call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaInfo {
    /// Entity types keyed by name.
    #[serde(default)]
    pub entity_types: BTreeMap<String, EntityType>,
    /// Relations keyed by name.
    #[serde(default)]
    pub relations: BTreeMap<String, Relation>,
}

impl SchemaInfo {
    /// Creates an empty schema.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity type.
    pub fn with_entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_types.insert(entity_type.name.clone(), entity_type);
        self
    }

    /// Adds a relation.
    pub fn with_relation(mut self, relation: Relation) -> Self {
        self.relations.insert(relation.name.clone(), relation);
        self
    }

    /// Looks up an entity type by name.
    pub fn entity_type(&self, name: &str) -> Option<&EntityType> {
        self.entity_types.get(name)
    }

    /// Looks up a relation by name.
    pub fn relation(&self, name: &str) -> Option<&Relation> {
        self.relations.get(name)
    }
}
