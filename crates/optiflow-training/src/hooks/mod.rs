//! Lifecycle hooks attached to a runner.
//!
//! A hook is a named callback that the runner invokes at fixed points of its
//! loop. Hooks are kept in a [`HookRegistry`] ordered by [`HookPriority`], and
//! hooks named in configuration are built through a [`HookFactoryRegistry`].

pub mod eval;
pub mod factory;
pub mod optimizer;
pub mod priority;
pub mod registry;
pub mod training;

pub use eval::{DatasetNames, EvalHook, EvalOptions};
pub use factory::{HookFactory, HookFactoryRegistry};
pub use optimizer::{
    Fp16OptimizerHook, GradClip, LossScaleConfig, LossScaler, OptimizerHook, OptimizerHookChoice,
    ScaleMode,
};
pub use priority::HookPriority;
pub use registry::{HookRegistry, RegisteredHook};
pub use training::TrainingHooks;

use crate::collab::RunnerState;
use crate::error::TrainingResult;

/// Points in the runner loop where hooks are called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    BeforeRun,
    BeforeTrainEpoch,
    BeforeTrainIter,
    AfterTrainIter,
    AfterTrainEpoch,
    BeforeValEpoch,
    AfterValEpoch,
    AfterRun,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeRun => "before_run",
            Self::BeforeTrainEpoch => "before_train_epoch",
            Self::BeforeTrainIter => "before_train_iter",
            Self::AfterTrainIter => "after_train_iter",
            Self::AfterTrainEpoch => "after_train_epoch",
            Self::BeforeValEpoch => "before_val_epoch",
            Self::AfterValEpoch => "after_val_epoch",
            Self::AfterRun => "after_run",
        }
    }
}

/// Trait for hook implementations.
///
/// Every callback defaults to doing nothing.
pub trait Hook: Send {
    /// Name used in logs and diagnostics.
    fn name(&self) -> &str;

    fn before_run(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    fn before_train_epoch(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    fn before_train_iter(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    fn after_train_iter(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    fn after_train_epoch(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    fn before_val_epoch(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    fn after_val_epoch(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    fn after_run(&mut self, _runner: &mut dyn RunnerState) -> TrainingResult<()> {
        Ok(())
    }

    /// Dispatch to the callback for `stage`.
    fn call(&mut self, stage: Stage, runner: &mut dyn RunnerState) -> TrainingResult<()> {
        match stage {
            Stage::BeforeRun => self.before_run(runner),
            Stage::BeforeTrainEpoch => self.before_train_epoch(runner),
            Stage::BeforeTrainIter => self.before_train_iter(runner),
            Stage::AfterTrainIter => self.after_train_iter(runner),
            Stage::AfterTrainEpoch => self.after_train_epoch(runner),
            Stage::BeforeValEpoch => self.before_val_epoch(runner),
            Stage::AfterValEpoch => self.after_val_epoch(runner),
            Stage::AfterRun => self.after_run(runner),
        }
    }
}

impl std::fmt::Debug for dyn Hook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Hook").field("name", &self.name()).finish_non_exhaustive()
    }
}
