//! Periodic evaluation during training.

use crate::collab::{DataLoader, RunnerState};
use crate::error::{TrainingError, TrainingResult};
use crate::hooks::Hook;
use crate::parallel::ExecutionMode;
use crate::spec::ComponentSpec;
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::PathBuf;

/// Names of the evaluated datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatasetNames {
    /// One dataset evaluated as a whole.
    Single(String),
    /// Datasets evaluated separately, in loader order.
    Multiple(Vec<String>),
}

impl DatasetNames {
    pub fn as_slice(&self) -> &[String] {
        match self {
            Self::Single(name) => std::slice::from_ref(name),
            Self::Multiple(names) => names,
        }
    }
}

/// Evaluation options from the `evaluation` config section.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct EvalOptions {
    #[serde(default = "default_interval")]
    pub interval: u64,
    #[serde(default)]
    pub start: Option<u64>,
    #[serde(default)]
    pub by_epoch: bool,
    /// Directory for collecting results across processes.
    #[serde(default)]
    pub tmpdir: Option<PathBuf>,
    /// Collect results through device memory instead of `tmpdir`.
    #[serde(default)]
    pub gpu_collect: Option<bool>,
    /// Forwarded to dataset evaluation.
    #[serde(flatten)]
    pub eval_kwargs: Map<String, Value>,
}

fn default_interval() -> u64 {
    1
}

impl EvalOptions {
    pub fn from_spec(spec: &ComponentSpec) -> TrainingResult<Self> {
        let options: Self = spec.parse()?;
        if options.interval == 0 {
            return Err(TrainingError::InvalidConfig(
                "evaluation.interval must be greater than 0".to_string(),
            ));
        }
        Ok(options)
    }
}

/// Evaluation hook, local or distributed.
pub struct EvalHook {
    mode: ExecutionMode,
    loaders: Vec<Box<dyn DataLoader>>,
    dataset_names: DatasetNames,
    options: EvalOptions,
}

impl std::fmt::Debug for EvalHook {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EvalHook")
            .field("mode", &self.mode)
            .field("loaders", &self.loaders.len())
            .field("dataset_names", &self.dataset_names)
            .field("options", &self.options)
            .finish()
    }
}

impl EvalHook {
    pub fn new(
        mode: ExecutionMode,
        loaders: Vec<Box<dyn DataLoader>>,
        dataset_names: DatasetNames,
        options: EvalOptions,
    ) -> TrainingResult<Self> {
        if loaders.len() != dataset_names.as_slice().len() {
            return Err(TrainingError::InvalidConfig(format!(
                "{} validation loaders but {} dataset names",
                loaders.len(),
                dataset_names.as_slice().len()
            )));
        }
        if mode == ExecutionMode::Local && (options.tmpdir.is_some() || options.gpu_collect.is_some()) {
            tracing::warn!("`tmpdir` and `gpu_collect` only apply to distributed evaluation, ignoring");
        }
        Ok(Self { mode, loaders, dataset_names, options })
    }

    pub fn mode(&self) -> ExecutionMode {
        self.mode
    }

    pub fn dataset_names(&self) -> &DatasetNames {
        &self.dataset_names
    }

    pub fn options(&self) -> &EvalOptions {
        &self.options
    }

    /// Whether the counter value `current` (0-based) is an evaluation point.
    fn should_evaluate(&self, current: u64) -> bool {
        let done = current + 1;
        match self.options.start {
            None => done % self.options.interval == 0,
            Some(start) if done < start => false,
            Some(start) => (done - start) % self.options.interval == 0,
        }
    }

    fn evaluate(&mut self, runner: &mut dyn RunnerState) -> TrainingResult<()> {
        let names = self.dataset_names.as_slice();
        for (loader, name) in self.loaders.iter_mut().zip(names) {
            let metrics = runner.evaluate(loader.as_mut(), self.mode)?;
            if self.mode.is_distributed() && runner.rank() != 0 {
                continue;
            }
            tracing::info!(dataset = %name, epoch = runner.epoch(), iter = runner.iter(), ?metrics, "Evaluation");
            for (metric, value) in metrics {
                runner.record(&format!("{name}.{metric}"), value);
            }
        }
        Ok(())
    }
}

impl Hook for EvalHook {
    fn name(&self) -> &str {
        match self.mode {
            ExecutionMode::Local => "EvalHook",
            ExecutionMode::Distributed => "DistEvalHook",
        }
    }

    fn after_train_iter(&mut self, runner: &mut dyn RunnerState) -> TrainingResult<()> {
        if self.options.by_epoch || !self.should_evaluate(runner.iter()) {
            return Ok(());
        }
        self.evaluate(runner)
    }

    fn after_train_epoch(&mut self, runner: &mut dyn RunnerState) -> TrainingResult<()> {
        if !self.options.by_epoch || !self.should_evaluate(runner.epoch()) {
            return Ok(());
        }
        self.evaluate(runner)
    }
}
