//! Engine error types.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    /// The operation failed with a message carried by the compiled form:
    /// an embedded failure, a validator miss or malformed mutation input.
    #[error("{0}")]
    QueryFailed(String),

    /// A slot was read that no step or binding produced. Compiled
    /// operations never contain these; seeing one means the operation
    /// was assembled by hand.
    #[error("unknown binding slot '{0}'")]
    UnknownSlot(String),
}

pub type EvalResult<T> = Result<T, EvalError>;
