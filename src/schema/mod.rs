//! Prepared-schema metadata.
//!
//! The compiler never parses or validates model definitions; it consumes
//! the already-prepared output of the schema pipeline as read-only
//! metadata.
//!
//! # Design Principles
//! - **Read-only**: metadata is immutable for the lifetime of a compile
//!   call.
//! - **Self-contained**: plain data, deserializable, no behavior beyond
//!   lookup.
//! - **Explicit**: profile attachments are named, never inferred.

mod types;

pub use types::{EntityType, FieldInfo, Relation, RelationSide, SchemaInfo, ID_FIELD};
