//! Reference execution engine.
//!
//! An in-memory backend that runs compiled operations directly. It exists
//! to pin down operational semantics and to make end-to-end tests cheap;
//! nothing in the compiler depends on it.
//!
//! # Design Principles
//! - **Deterministic iteration**: collections scan in id order, edges in
//!   insertion order, sorts are stable.
//! - **Permissive reads, strict mutations**: type misuse on the read path
//!   degrades to null or empty; malformed mutation inputs abort.
//! - **Snapshot results**: deletes return pre-deletion state, updates
//!   return post-update state, patches read pre-update state.
//! - **No rollback**: a failing step aborts what has not run yet.

mod errors;
mod eval;
mod executor;
mod store;

pub use errors::{EvalError, EvalResult};
pub use eval::{classify, compare_values, evaluate, is_truthy, record_id, to_text, Env};
pub use executor::OperationExecutor;
pub use store::{EdgeRecord, InMemoryStore};
