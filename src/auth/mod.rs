//! Authorization for query compilation.
//!
//! Access rules are declared as permission profiles and enforced by
//! rewriting the query tree before code generation. The runtime never
//! re-checks permissions; whatever the transformer left in the tree is
//! what executes.
//!
//! # Design Principles
//! - **Rewrite, don't gate**: denials and restrictions become ordinary
//!   IR nodes, so every backend enforces them for free.
//! - **Three-valued verdicts**: granted, denied or conditional; the
//!   conditional case compiles to per-record access-group filters.
//! - **Fail fast on misconfiguration**: unknown profiles, types, fields
//!   and inexpressible restrictions abort compilation with [`AuthError`].
//! - **Fixed denial text**: embedded messages name only the scope and
//!   operation, never the reason.

mod context;
mod errors;
mod evaluator;
mod profile;
mod transformer;

pub use context::{AccessContext, OperationKind};
pub use errors::{AuthError, AuthResult};
pub use evaluator::{denial_message, AccessVerdict, PermissionEvaluator};
pub use profile::{AccessKind, Permission, PermissionProfile, ProfileRegistry};
pub use transformer::{AccessDecision, AuthorizationTransformer};
