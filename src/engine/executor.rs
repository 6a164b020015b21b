//! Operation execution.
//!
//! Runs a compiled operation as one transaction against a store:
//! pre-execution steps strictly in order, each validated before the next
//! starts, then the main expression. A failing step or validator aborts
//! the run before later steps execute; steps already run are not rolled
//! back, matching the contract that validators come before the work they
//! guard.

use serde_json::Value;

use crate::codegen::CompiledOperation;
use crate::ir::ResultValidator;

use super::errors::{EvalError, EvalResult};
use super::eval::{evaluate, is_truthy, Env};
use super::store::InMemoryStore;

/// Executes compiled operations against one store.
pub struct OperationExecutor<'a> {
    store: &'a mut InMemoryStore,
}

impl<'a> OperationExecutor<'a> {
    pub fn new(store: &'a mut InMemoryStore) -> Self {
        Self { store }
    }

    /// Runs the operation and returns the main expression's value.
    pub fn run(&mut self, operation: &CompiledOperation) -> EvalResult<Value> {
        let mut env = Env::new();
        for step in &operation.pre_exec {
            let value = evaluate(&step.op, &mut env, self.store)?;
            if let Some(validator) = &step.validator {
                check_validator(validator, &value)?;
            }
            env.set(&step.name, value);
        }
        evaluate(&operation.main, &mut env, self.store)
    }
}

/// Applies a step validator to a step result.
fn check_validator(validator: &ResultValidator, value: &Value) -> EvalResult<()> {
    let holds = match validator {
        ResultValidator::Truthy { .. } => is_truthy(value),
        ResultValidator::NonEmpty { .. } => {
            matches!(value, Value::Array(items) if !items.is_empty())
        }
    };
    if holds {
        Ok(())
    } else {
        Err(EvalError::QueryFailed(validator.message().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codegen::{CompiledStep, Op};
    use serde_json::json;

    #[test]
    fn test_steps_run_in_order_and_feed_the_main_expression() {
        let operation = CompiledOperation {
            pre_exec: vec![
                CompiledStep {
                    name: "p1".into(),
                    op: Op::Const(json!(2)),
                    validator: None,
                },
                CompiledStep {
                    name: "p2".into(),
                    op: Op::Binary {
                        operator: crate::ir::BinaryOperator::Multiply,
                        lhs: Box::new(Op::Load("p1".into())),
                        rhs: Box::new(Op::Const(json!(21))),
                    },
                    validator: None,
                },
            ],
            main: Op::Load("p2".into()),
        };
        let mut store = InMemoryStore::new();
        let result = OperationExecutor::new(&mut store).run(&operation).unwrap();
        assert_eq!(result, json!(42));
    }

    #[test]
    fn test_failing_validators_abort_before_later_steps() {
        let operation = CompiledOperation {
            pre_exec: vec![
                CompiledStep {
                    name: "p1".into(),
                    op: Op::Const(json!(false)),
                    validator: Some(ResultValidator::truthy("Not authorized to create User")),
                },
                CompiledStep {
                    name: "p2".into(),
                    op: Op::Insert {
                        collection: "User".into(),
                        object: Box::new(Op::Const(json!({"name": "ada"}))),
                    },
                    validator: None,
                },
            ],
            main: Op::Const(json!(null)),
        };
        let mut store = InMemoryStore::new();
        let result = OperationExecutor::new(&mut store).run(&operation);
        assert_eq!(
            result,
            Err(EvalError::QueryFailed("Not authorized to create User".into()))
        );
        // The guarded insert never ran.
        assert_eq!(store.record_count("User"), 0);
    }

    #[test]
    fn test_non_empty_validators_accept_only_non_empty_lists() {
        let run_with = |value: Value| {
            let operation = CompiledOperation {
                pre_exec: vec![CompiledStep {
                    name: "p1".into(),
                    op: Op::Const(value),
                    validator: Some(ResultValidator::non_empty("nothing matched")),
                }],
                main: Op::Const(json!(true)),
            };
            let mut store = InMemoryStore::new();
            OperationExecutor::new(&mut store).run(&operation)
        };
        assert!(run_with(json!([1])).is_ok());
        assert_eq!(
            run_with(json!([])),
            Err(EvalError::QueryFailed("nothing matched".into()))
        );
        assert_eq!(
            run_with(json!(true)),
            Err(EvalError::QueryFailed("nothing matched".into()))
        );
    }

    #[test]
    fn test_completed_steps_are_not_rolled_back() {
        let operation = CompiledOperation {
            pre_exec: vec![
                CompiledStep {
                    name: "p1".into(),
                    op: Op::Insert {
                        collection: "Log".into(),
                        object: Box::new(Op::Const(json!({"event": "attempt"}))),
                    },
                    validator: None,
                },
                CompiledStep {
                    name: "p2".into(),
                    op: Op::Const(json!(false)),
                    validator: Some(ResultValidator::truthy("rejected")),
                },
            ],
            main: Op::Const(json!(null)),
        };
        let mut store = InMemoryStore::new();
        let result = OperationExecutor::new(&mut store).run(&operation);
        assert!(result.is_err());
        assert_eq!(store.record_count("Log"), 1);
    }
}
