//! The standard set of training hooks and their default priorities.

use crate::config::LogConfig;
use crate::error::{TrainingError, TrainingResult};
use crate::hooks::factory::HookFactoryRegistry;
use crate::hooks::optimizer::{OptimizerHook, OptimizerHookChoice};
use crate::hooks::priority::HookPriority;
use crate::hooks::Hook;
use crate::spec::{ComponentSpec, TYPE_KEY};
use serde_json::Value;

/// Core hooks registered for every run.
#[derive(Debug, Clone)]
pub struct TrainingHooks {
    pub lr_config: Option<ComponentSpec>,
    pub optimizer: OptimizerHookChoice,
    pub checkpoint_config: Option<ComponentSpec>,
    pub log_config: Option<LogConfig>,
    pub momentum_config: Option<ComponentSpec>,
}

impl TrainingHooks {
    /// Build every configured hook, paired with its priority, in registration
    /// order: learning rate, optimizer, checkpoint, loggers, momentum.
    pub fn build(self, factories: &HookFactoryRegistry) -> TrainingResult<Vec<(Box<dyn Hook>, HookPriority)>> {
        let mut hooks: Vec<(Box<dyn Hook>, HookPriority)> = Vec::new();

        if let Some(lr_config) = self.lr_config {
            let spec = resolve_policy(lr_config, "LrUpdaterHook")?;
            hooks.push((factories.build(&spec)?, HookPriority::VERY_HIGH));
        }

        let optimizer: Box<dyn Hook> = match self.optimizer {
            OptimizerHookChoice::Fp16(hook) => Box::new(hook),
            OptimizerHookChoice::Plain(hook) => Box::new(hook),
            OptimizerHookChoice::Spec(mut spec) => {
                spec.set_default(TYPE_KEY, Value::String(OptimizerHook::TYPE_NAME.to_string()));
                factories.build(&spec)?
            }
        };
        hooks.push((optimizer, HookPriority::ABOVE_NORMAL));

        if let Some(mut checkpoint_config) = self.checkpoint_config {
            checkpoint_config.set_default(TYPE_KEY, Value::String("CheckpointHook".to_string()));
            hooks.push((factories.build(&checkpoint_config)?, HookPriority::NORMAL));
        }

        if let Some(log_config) = self.log_config {
            for mut info in log_config.hooks {
                info.set_default("interval", Value::from(log_config.interval));
                hooks.push((factories.build(&info)?, HookPriority::VERY_LOW));
            }
        }

        if let Some(momentum_config) = self.momentum_config {
            let spec = resolve_policy(momentum_config, "MomentumUpdaterHook")?;
            hooks.push((factories.build(&spec)?, HookPriority::HIGH));
        }

        Ok(hooks)
    }
}

/// Turn `{policy: "step", ...}` into `{type: "StepLrUpdaterHook", ...}`.
///
/// Specs that already name a `type` are left alone.
fn resolve_policy(mut spec: ComponentSpec, suffix: &str) -> TrainingResult<ComponentSpec> {
    if spec.has_type() {
        return Ok(spec);
    }
    let policy = match spec.remove("policy") {
        Some(Value::String(policy)) => policy,
        Some(other) => {
            return Err(TrainingError::InvalidConfig(format!("`policy` must be a string, got {other}")));
        }
        None => {
            return Err(TrainingError::InvalidConfig(format!(
                "{suffix} config needs either `type` or `policy`"
            )));
        }
    };
    let policy = if policy == policy.to_lowercase() { title_case(&policy) } else { policy };
    spec.insert(TYPE_KEY, Value::String(format!("{policy}{suffix}")));
    Ok(spec)
}

/// Upper-case every letter that follows a non-letter, lower-case the rest.
fn title_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut prev_is_alpha = false;
    for c in s.chars() {
        if c.is_alphabetic() {
            if prev_is_alpha {
                out.extend(c.to_lowercase());
            } else {
                out.extend(c.to_uppercase());
            }
            prev_is_alpha = true;
        } else {
            out.push(c);
            prev_is_alpha = false;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Stub(&'static str);

    impl Hook for Stub {
        fn name(&self) -> &str {
            self.0
        }
    }

    fn spec(value: Value) -> ComponentSpec {
        ComponentSpec::try_from(value).unwrap()
    }

    fn step_lr(_: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
        Ok(Box::new(Stub("StepLrUpdaterHook")))
    }

    fn cyclic_momentum(_: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
        Ok(Box::new(Stub("CyclicMomentumUpdaterHook")))
    }

    fn checkpoint(_: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
        Ok(Box::new(Stub("CheckpointHook")))
    }

    fn text_logger(spec: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
        assert_eq!(spec.get("interval"), Some(&json!(50)));
        Ok(Box::new(Stub("TextLoggerHook")))
    }

    fn factories() -> HookFactoryRegistry {
        let mut registry = HookFactoryRegistry::with_builtins();
        registry.register_factory("StepLrUpdaterHook", step_lr);
        registry.register_factory("CyclicMomentumUpdaterHook", cyclic_momentum);
        registry.register_factory("CheckpointHook", checkpoint);
        registry.register_factory("TextLoggerHook", text_logger);
        registry
    }

    #[test]
    fn test_policy_resolution() {
        let resolved = resolve_policy(spec(json!({"policy": "step", "step": [10]})), "LrUpdaterHook").unwrap();
        assert_eq!(resolved.type_name(), Some("StepLrUpdaterHook"));
        assert!(!resolved.contains_key("policy"));

        let resolved = resolve_policy(spec(json!({"policy": "OneCycle"})), "LrUpdaterHook").unwrap();
        assert_eq!(resolved.type_name(), Some("OneCycleLrUpdaterHook"));

        assert_eq!(title_case("cosine_annealing"), "Cosine_Annealing");
        assert!(resolve_policy(spec(json!({"step": [10]})), "LrUpdaterHook").is_err());
    }

    #[test]
    fn test_build_standard_hooks_with_priorities() {
        let hooks = TrainingHooks {
            lr_config: Some(spec(json!({"policy": "step", "step": [100]}))),
            optimizer: OptimizerHookChoice::Spec(spec(json!({"grad_clip": null}))),
            checkpoint_config: Some(spec(json!({"interval": 1000}))),
            log_config: Some(LogConfig {
                interval: 50,
                hooks: vec![ComponentSpec::with_type("TextLoggerHook")],
            }),
            momentum_config: Some(spec(json!({"policy": "cyclic"}))),
        };

        let built = hooks.build(&factories()).unwrap();
        let summary: Vec<(&str, HookPriority)> = built.iter().map(|(h, p)| (h.name(), *p)).collect();
        assert_eq!(
            summary,
            vec![
                ("StepLrUpdaterHook", HookPriority::VERY_HIGH),
                ("OptimizerHook", HookPriority::ABOVE_NORMAL),
                ("CheckpointHook", HookPriority::NORMAL),
                ("TextLoggerHook", HookPriority::VERY_LOW),
                ("CyclicMomentumUpdaterHook", HookPriority::HIGH),
            ]
        );
    }

    #[test]
    fn test_missing_factory_fails() {
        let hooks = TrainingHooks {
            lr_config: Some(spec(json!({"policy": "poly"}))),
            optimizer: OptimizerHookChoice::Spec(ComponentSpec::new()),
            checkpoint_config: None,
            log_config: None,
            momentum_config: None,
        };
        assert!(matches!(hooks.build(&factories()), Err(TrainingError::UnknownHook(_))));
    }
}
