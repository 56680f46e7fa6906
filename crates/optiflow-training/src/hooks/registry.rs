//! Hook registry for managing and executing hooks.

use crate::collab::RunnerState;
use crate::error::TrainingResult;
use crate::hooks::priority::HookPriority;
use crate::hooks::{Hook, Stage};

/// A hook together with the priority it was registered at.
#[derive(Debug)]
pub struct RegisteredHook {
    pub priority: HookPriority,
    pub hook: Box<dyn Hook>,
}

/// Priority-ordered hooks of one runner.
#[derive(Debug, Default)]
pub struct HookRegistry {
    hooks: Vec<RegisteredHook>,
}

impl HookRegistry {
    /// Create a new hook registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook.
    ///
    /// The hook is placed after every hook with the same or a higher priority,
    /// so equal priorities keep registration order.
    pub fn register(&mut self, hook: Box<dyn Hook>, priority: HookPriority) {
        let index = self
            .hooks
            .iter()
            .position(|h| h.priority > priority)
            .unwrap_or(self.hooks.len());
        tracing::debug!(hook_name = %hook.name(), %priority, index, "Registered hook");
        self.hooks.insert(index, RegisteredHook { priority, hook });
    }

    /// Run every hook for `stage`, in order. The first error stops the pass.
    pub fn call(&mut self, stage: Stage, runner: &mut dyn RunnerState) -> TrainingResult<()> {
        for entry in &mut self.hooks {
            entry.hook.call(stage, runner).map_err(|e| {
                tracing::warn!(
                    hook_name = %entry.hook.name(),
                    stage = stage.as_str(),
                    error = %e,
                    "Hook execution failed"
                );
                e
            })?;
        }
        Ok(())
    }

    /// Hook names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.hooks.iter().map(|h| h.hook.name()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RegisteredHook> {
        self.hooks.iter()
    }

    /// Get the number of registered hooks.
    pub fn len(&self) -> usize {
        self.hooks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hooks.is_empty()
    }
}
