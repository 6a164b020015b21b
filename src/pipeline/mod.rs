//! The compilation pipeline.
//!
//! Fixed pass order: authorization rewriting, then error propagation,
//! then code generation. Each pass consumes and produces plain IR or
//! compiled data, so the pipeline is just sequencing plus observability.

use thiserror::Error;

use crate::auth::{AccessContext, AuthError, AuthorizationTransformer, ProfileRegistry};
use crate::codegen::{CompileError, CompiledOperation, QueryCompiler};
use crate::ir::Node;
use crate::observability::Logger;
use crate::propagation::ErrorPropagation;
use crate::schema::SchemaInfo;

/// A failure in any pipeline stage.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Compile(#[from] CompileError),
}

/// Compiles query trees for one schema and profile registry.
pub struct CompilePipeline<'a> {
    schema: &'a SchemaInfo,
    registry: &'a ProfileRegistry,
}

impl<'a> CompilePipeline<'a> {
    pub fn new(schema: &'a SchemaInfo, registry: &'a ProfileRegistry) -> Self {
        Self { schema, registry }
    }

    /// Runs all passes over `root` for the given access context.
    pub fn compile(
        &self,
        root: &Node,
        ctx: &AccessContext,
    ) -> Result<CompiledOperation, PipelineError> {
        let mut transformer = AuthorizationTransformer::new(self.schema, self.registry, ctx);
        let authorized = match transformer.transform(root) {
            Ok(authorized) => authorized,
            Err(error) => {
                Logger::error(
                    "COMPILE_REJECTED",
                    &[("stage", "auth"), ("error", &error.to_string())],
                );
                return Err(error.into());
            }
        };
        for decision in transformer.decisions() {
            Logger::trace(
                "ACCESS_DECISION",
                &[
                    ("kind", decision.kind()),
                    ("operation", decision.operation().as_str()),
                    ("scope", decision.scope()),
                ],
            );
        }

        let propagated = ErrorPropagation::run(&authorized);

        let compiled = match QueryCompiler::compile(&propagated) {
            Ok(compiled) => compiled,
            Err(error) => {
                Logger::error(
                    "COMPILE_REJECTED",
                    &[("stage", "codegen"), ("error", &error.to_string())],
                );
                return Err(error.into());
            }
        };
        Logger::trace(
            "OPERATION_COMPILED",
            &[("pre_exec_steps", &compiled.pre_exec.len().to_string())],
        );
        Ok(compiled)
    }
}
