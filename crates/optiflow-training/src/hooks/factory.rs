//! Named hook constructors.

use crate::error::{TrainingError, TrainingResult};
use crate::hooks::optimizer::{Fp16OptimizerHook, OptimizerHook};
use crate::hooks::Hook;
use crate::spec::{ComponentSpec, TYPE_KEY};
use std::collections::HashMap;

/// Hook factory function type.
///
/// Factories receive the spec options with the `type` entry removed.
pub type HookFactory = fn(&ComponentSpec) -> TrainingResult<Box<dyn Hook>>;

/// Maps hook type names to their constructors.
#[derive(Clone, Default)]
pub struct HookFactoryRegistry {
    factories: HashMap<String, HookFactory>,
}

impl std::fmt::Debug for HookFactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.factories.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("HookFactoryRegistry").field("factories", &names).finish()
    }
}

impl HookFactoryRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the optimizer hooks this crate provides.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register_factory(OptimizerHook::TYPE_NAME, build_optimizer_hook);
        registry.register_factory(Fp16OptimizerHook::TYPE_NAME, build_fp16_optimizer_hook);
        registry
    }

    /// Register a factory under `name`, replacing any previous one.
    pub fn register_factory(&mut self, name: impl Into<String>, factory: HookFactory) {
        let name = name.into();
        if self.factories.insert(name.clone(), factory).is_some() {
            tracing::debug!(hook_type = %name, "Replaced hook factory");
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    /// Build a hook from a spec whose `type` names a registered factory.
    pub fn build(&self, spec: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
        let type_name = spec.type_name().ok_or_else(|| {
            TrainingError::InvalidConfig(format!("hook spec has no string `type`: {spec:?}"))
        })?;
        let factory = self
            .factories
            .get(type_name)
            .ok_or_else(|| TrainingError::UnknownHook(type_name.to_string()))?;

        let mut options = spec.clone();
        options.remove(TYPE_KEY);
        let hook = factory(&options)?;
        tracing::debug!(hook_type = %type_name, hook_name = %hook.name(), "Built hook");
        Ok(hook)
    }
}

fn build_optimizer_hook(spec: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
    Ok(Box::new(OptimizerHook::from_spec(spec)?))
}

fn build_fp16_optimizer_hook(spec: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
    Ok(Box::new(Fp16OptimizerHook::from_spec(spec)?))
}
