//! Code generation.
//!
//! Turns authorized, error-propagated IR trees into executable
//! [`CompiledOperation`]s and renders them as placeholder-bearing text.
//!
//! # Design Principles
//! - **First-order target**: compiled operations are plain data with
//!   structural equality, so determinism is a testable property.
//! - **Traversal-order naming**: lexical slots are `v1`, `v2`..., step
//!   slots `p1`, `p2`..., assigned as lowering encounters them.
//! - **Flat transactions**: nested pre-execution wrappers compile into
//!   one ordered step list per operation.
//! - **Data never shapes text**: rendering binds constants and unsafe
//!   names; the text is fixed syntax and vetted identifiers only.

mod compiler;
mod errors;
mod op;
mod render;
mod scope;

pub use compiler::QueryCompiler;
pub use errors::{CompileError, CompileResult};
pub use op::{CompiledOperation, CompiledStep, Op, SortKey};
pub use render::{is_safe_identifier, Rendered};
