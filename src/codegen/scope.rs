//! Compilation scopes.
//!
//! A scope resolves variable reads during lowering. It keeps three
//! separate namespaces: lexical bindings, the ambient context slot and
//! pre-execution step results. Step results deliberately live apart from
//! lexical bindings because they cross the pre-execution boundary while
//! lexical bindings must not.

use std::collections::{HashMap, HashSet};

use crate::ir::VarBinding;

use super::errors::{CompileError, CompileResult};

#[derive(Debug, Clone, Default)]
pub(crate) struct Scope {
    /// Lexical bindings visible here, by binding id.
    vars: HashMap<u64, String>,
    /// Lexical bindings that exist outside the enclosing pre-execution
    /// step and are therefore unreadable from it.
    barred: HashSet<u64>,
    /// The innermost context assignment's slot, if any.
    context: Option<String>,
    /// Pre-execution step results, by binding id.
    pre_exec: HashMap<u64, String>,
}

impl Scope {
    pub(crate) fn root() -> Self {
        Self::default()
    }

    pub(crate) fn with_var(&self, id: u64, slot: String) -> Self {
        let mut next = self.clone();
        next.vars.insert(id, slot);
        next
    }

    pub(crate) fn with_context(&self, slot: String) -> Self {
        let mut next = self.clone();
        next.context = Some(slot);
        next
    }

    pub(crate) fn with_pre_exec(&self, id: u64, slot: String) -> Self {
        let mut next = self.clone();
        next.pre_exec.insert(id, slot);
        next
    }

    /// The scope a pre-execution step query compiles in: no lexical
    /// bindings, no context, only step results carried over. The outer
    /// lexical bindings are remembered as barred so reads of them fail
    /// with the boundary error rather than as plainly unbound.
    pub(crate) fn step_scope(&self) -> Self {
        let mut barred = self.barred.clone();
        barred.extend(self.vars.keys().copied());
        Self {
            vars: HashMap::new(),
            barred,
            context: None,
            pre_exec: self.pre_exec.clone(),
        }
    }

    pub(crate) fn context_slot(&self) -> Option<&str> {
        self.context.as_deref()
    }

    /// Resolves a variable read to its slot.
    pub(crate) fn lookup(&self, binding: &VarBinding) -> CompileResult<&str> {
        if let Some(slot) = self.vars.get(&binding.id()) {
            return Ok(slot);
        }
        if let Some(slot) = self.pre_exec.get(&binding.id()) {
            return Ok(slot);
        }
        if self.barred.contains(&binding.id()) {
            return Err(CompileError::CrossesPreExecutionBoundary {
                label: binding.label().to_string(),
                id: binding.id(),
            });
        }
        Err(CompileError::UnboundVariable {
            label: binding.label().to_string(),
            id: binding.id(),
        })
    }

    /// Rejects introducing a binding that already exists anywhere in this
    /// scope chain, including bindings barred by the step boundary.
    pub(crate) fn ensure_free(&self, binding: &VarBinding) -> CompileResult<()> {
        let id = binding.id();
        if self.vars.contains_key(&id)
            || self.pre_exec.contains_key(&id)
            || self.barred.contains(&id)
        {
            return Err(CompileError::DuplicateBinding {
                label: binding.label().to_string(),
                id,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_prefers_lexical_bindings() {
        let binding = VarBinding::new("x");
        let scope = Scope::root().with_var(binding.id(), "v1".into());
        assert_eq!(scope.lookup(&binding), Ok("v1"));
    }

    #[test]
    fn test_step_scope_bars_outer_lexical_bindings() {
        let outer = VarBinding::new("outer");
        let step_result = VarBinding::new("check");
        let scope = Scope::root()
            .with_var(outer.id(), "v1".into())
            .with_context("v2".into())
            .with_pre_exec(step_result.id(), "p1".into());
        let step = scope.step_scope();

        assert_eq!(step.lookup(&step_result), Ok("p1"));
        assert_eq!(step.context_slot(), None);
        assert_eq!(
            step.lookup(&outer),
            Err(CompileError::CrossesPreExecutionBoundary {
                label: "outer".into(),
                id: outer.id(),
            })
        );
    }

    #[test]
    fn test_unknown_bindings_are_plainly_unbound() {
        let ghost = VarBinding::new("ghost");
        assert_eq!(
            Scope::root().lookup(&ghost),
            Err(CompileError::UnboundVariable {
                label: "ghost".into(),
                id: ghost.id(),
            })
        );
    }

    #[test]
    fn test_reintroduction_is_rejected_even_across_the_boundary() {
        let binding = VarBinding::new("x");
        let scope = Scope::root().with_var(binding.id(), "v1".into());
        assert!(scope.ensure_free(&binding).is_err());
        assert!(scope.step_scope().ensure_free(&binding).is_err());
        assert!(scope.ensure_free(&VarBinding::new("x")).is_ok());
    }
}
