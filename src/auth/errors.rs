//! Authorization error types.
//!
//! These are configuration failures raised while rewriting a query, not
//! access denials. A denial is a successful rewrite whose output carries
//! an embedded runtime error; the variants here mean the schema, profile
//! registry and query disagree with each other and the request cannot be
//! compiled at all.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("unknown permission profile '{0}'")]
    UnknownProfile(String),

    #[error("unknown entity type '{0}'")]
    UnknownEntityType(String),

    #[error("unknown relation '{0}'")]
    UnknownRelation(String),

    #[error("field '{field}' is not declared on entity type '{type_name}'")]
    UnknownField { type_name: String, field: String },

    #[error(
        "entity type '{0}' grants conditional access but declares no access-group field"
    )]
    MissingAccessGroupField(String),

    #[error("conditional access on '{scope}' cannot be expressed as a per-record filter")]
    ConditionalNotExpressible { scope: String },

    #[error("permission profile '{0}' did not yield a conditional verdict")]
    VerdictNotConditional(String),
}

pub type AuthResult<T> = Result<T, AuthError>;
