//! Collaborator contracts.
//!
//! The launcher never computes gradients, moves tensors or talks to other
//! processes itself. Those jobs belong to the training framework behind these
//! traits: a [`Backend`] builds datasets, loaders, optimizers and runners, and a
//! [`Runner`] drives the loop and calls hooks with a [`RunnerState`] view of
//! itself.

use crate::config::{LoaderSettings, RunnerSpec, WorkflowStage};
use crate::error::TrainingResult;
use crate::hooks::{HookFactoryRegistry, HookPriority, Hook, TrainingHooks};
use crate::layout::WorkDirLayout;
use crate::logging::RootLogger;
use crate::parallel::{ExecutionMode, Parallelism};
use crate::spec::ComponentSpec;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// Evaluation results keyed by metric name.
pub type Metrics = BTreeMap<String, f64>;

pub trait Dataset: Send {
    /// Name reported next to evaluation metrics.
    fn dataset_name(&self) -> &str;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub trait DataLoader: Send {
    fn dataset_name(&self) -> &str;

    /// Number of batches per epoch.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Options passed when building a dataset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatasetOptions {
    pub test_mode: bool,
}

/// Options passed when building a data loader.
#[derive(Debug, Clone, PartialEq)]
pub struct LoaderOptions {
    /// Number of local GPUs; ignored when `dist` is set.
    pub num_gpus: usize,
    pub dist: bool,
    pub seed: Option<u64>,
    pub settings: LoaderSettings,
}

/// Parameter update side of training.
pub trait Optimizer: Send {
    fn zero_grad(&mut self);

    /// Whether every accumulated gradient is finite.
    fn grads_are_finite(&self) -> bool;

    /// Multiply every gradient by `factor`.
    fn scale_grads(&mut self, factor: f64);

    /// Clip the total gradient norm to `max_norm`; returns the norm before clipping.
    fn clip_grad_norm(&mut self, max_norm: f64, norm_type: f64) -> TrainingResult<f64>;

    fn step(&mut self) -> TrainingResult<()>;

    /// Average gradients across processes.
    fn all_reduce_grads(&mut self, _coalesce: bool, _bucket_size_mb: i64) -> TrainingResult<()> {
        Ok(())
    }
}

/// What hooks can see and do while the runner is looping.
pub trait RunnerState {
    fn epoch(&self) -> u64;

    /// Global iteration counter.
    fn iter(&self) -> u64;

    fn rank(&self) -> usize {
        0
    }

    fn optimizer(&mut self) -> &mut dyn Optimizer;

    /// Back-propagate the loss of the last training step multiplied by `scale`.
    fn backward(&mut self, scale: f64) -> TrainingResult<()>;

    /// Run the model over `loader` in test mode and evaluate the results.
    fn evaluate(&mut self, loader: &mut dyn DataLoader, mode: ExecutionMode) -> TrainingResult<Metrics>;

    /// Push a scalar into the runner's log buffer.
    fn record(&mut self, key: &str, value: f64);
}

/// Everything a runner is constructed with.
#[derive(Debug)]
pub struct RunnerArgs<M> {
    pub model: M,
    pub optimizer: Box<dyn Optimizer>,
    pub work_dir: WorkDirLayout,
    pub logger: RootLogger,
    pub meta: Option<Map<String, Value>>,
}

impl std::fmt::Debug for dyn Optimizer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Optimizer").finish_non_exhaustive()
    }
}

/// Loop driver owning model, optimizer and hooks.
pub trait Runner {
    /// Stamp shared by the text log and the JSON log of this run.
    fn set_timestamp(&mut self, timestamp: Option<String>);

    fn register_hook(&mut self, hook: Box<dyn Hook>, priority: HookPriority) -> TrainingResult<()>;

    /// Register the standard training hooks at their default priorities.
    fn register_training_hooks(
        &mut self,
        hooks: TrainingHooks,
        factories: &HookFactoryRegistry,
    ) -> TrainingResult<()> {
        for (hook, priority) in hooks.build(factories)? {
            self.register_hook(hook, priority)?;
        }
        Ok(())
    }

    /// Restore model, optimizer, counters and hook state.
    fn resume(&mut self, checkpoint: &Path) -> TrainingResult<()>;

    /// Restore model weights only.
    fn load_checkpoint(&mut self, checkpoint: &Path) -> TrainingResult<()>;

    /// Run the workflow to completion.
    fn run(&mut self, loaders: Vec<Box<dyn DataLoader>>, workflow: &[WorkflowStage]) -> TrainingResult<()>;
}

/// Factory side of the training framework.
pub trait Backend {
    type Model;
    /// Model after device-parallel wrapping.
    type Wrapped;
    type Runner: Runner;

    /// Device bound to this process.
    fn current_device(&self) -> usize;

    fn wrap_model(&self, model: Self::Model, parallelism: &Parallelism) -> TrainingResult<Self::Wrapped>;

    fn build_dataset(&self, spec: &ComponentSpec, options: DatasetOptions) -> TrainingResult<Box<dyn Dataset>>;

    fn build_dataloader(
        &self,
        dataset: Box<dyn Dataset>,
        options: &LoaderOptions,
    ) -> TrainingResult<Box<dyn DataLoader>>;

    fn build_optimizer(&self, model: &Self::Wrapped, spec: &ComponentSpec) -> TrainingResult<Box<dyn Optimizer>>;

    fn build_runner(&self, spec: &RunnerSpec, args: RunnerArgs<Self::Wrapped>) -> TrainingResult<Self::Runner>;
}
