//! arbordb - A schema-driven query compiler with a reference engine
//!
//! Queries are immutable trees of [`ir::QueryNode`]. The [`pipeline`]
//! rewrites them for access control, hoists runtime errors, and lowers
//! them to flat [`codegen::Op`] programs that the [`engine`] can run.

pub mod auth;
pub mod codegen;
pub mod engine;
pub mod ir;
pub mod observability;
pub mod pipeline;
pub mod propagation;
pub mod schema;
