//! Code generation error types.
//!
//! Every variant is a structural defect of the input tree. Well-formed
//! trees, whatever data they run against, always compile.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompileError {
    #[error("variable '${label}_{id}' is read outside the scope of its binding")]
    UnboundVariable { label: String, id: u64 },

    #[error("binding '${label}_{id}' is introduced twice in one scope chain")]
    DuplicateBinding { label: String, id: u64 },

    #[error("the query reads the ambient context but no context assignment encloses it")]
    ContextUnavailable,

    #[error(
        "variable '${label}_{id}' is bound outside the pre-execution step that reads it; \
         steps may only see earlier step results"
    )]
    CrossesPreExecutionBoundary { label: String, id: u64 },
}

pub type CompileResult<T> = Result<T, CompileError>;
