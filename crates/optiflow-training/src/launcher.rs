//! Training launcher.
//!
//! [`TrainingLauncher::launch`] wires a training run together and drives the
//! runner through it once: loaders are built, the model is wrapped for its
//! devices, the runner is constructed with its optimizer, hooks are registered,
//! prior state is restored and the workflow runs. Any error aborts the launch
//! and is returned unchanged.

use crate::collab::{Backend, DataLoader, Dataset, DatasetOptions, LoaderOptions, Runner, RunnerArgs};
use crate::config::{Config, RunnerSpec};
use crate::error::{TrainingError, TrainingResult};
use crate::hooks::{
    DatasetNames, EvalHook, EvalOptions, HookFactoryRegistry, HookPriority, OptimizerHookChoice,
    TrainingHooks,
};
use crate::layout::WorkDirLayout;
use crate::logging;
use crate::parallel::{ExecutionMode, Parallelism};
use crate::spec::{json_kind, ComponentSpec};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Training datasets: a single one or an ordered list.
pub enum Datasets {
    Single(Box<dyn Dataset>),
    Many(Vec<Box<dyn Dataset>>),
}

impl Datasets {
    pub fn into_vec(self) -> Vec<Box<dyn Dataset>> {
        match self {
            Self::Single(dataset) => vec![dataset],
            Self::Many(datasets) => datasets,
        }
    }
}

impl From<Box<dyn Dataset>> for Datasets {
    fn from(dataset: Box<dyn Dataset>) -> Self {
        Self::Single(dataset)
    }
}

impl From<Vec<Box<dyn Dataset>>> for Datasets {
    fn from(datasets: Vec<Box<dyn Dataset>>) -> Self {
        Self::Many(datasets)
    }
}

/// Per-launch switches.
#[derive(Debug, Clone, Default)]
pub struct LaunchOptions {
    pub distributed: bool,
    /// Register evaluation hooks on the validation data.
    pub validate: bool,
    /// Stamp shared by the run's log artifacts.
    pub timestamp: Option<String>,
    /// Arbitrary run metadata handed to the runner (environment, seed, ...).
    pub meta: Option<Map<String, Value>>,
}

impl LaunchOptions {
    /// Options stamped with the current local time, so the runner's text and
    /// JSON logs share one name.
    #[must_use]
    pub fn timestamped() -> Self {
        Self { timestamp: Some(logging::timestamp()), ..Self::default() }
    }
}

pub struct TrainingLauncher<B: Backend> {
    backend: B,
    factories: HookFactoryRegistry,
}

impl<B: Backend> TrainingLauncher<B> {
    #[must_use]
    pub fn new(backend: B, factories: HookFactoryRegistry) -> Self {
        Self { backend, factories }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn factories(&self) -> &HookFactoryRegistry {
        &self.factories
    }

    /// Train `model` on `datasets` as described by `config`.
    ///
    /// Blocks until the runner finishes the workflow. `config.runner` is
    /// filled in when missing.
    pub fn launch(
        &self,
        model: B::Model,
        datasets: impl Into<Datasets>,
        config: &mut Config,
        options: LaunchOptions,
    ) -> TrainingResult<()> {
        let work_dir = WorkDirLayout::new(&config.work_dir);
        let logger = match &options.timestamp {
            Some(stamp) => {
                logging::init_root_logger(&config.log_level, Some(work_dir.log_file(stamp).as_path()))?
            }
            None => logging::root_logger(&config.log_level)?,
        };
        let mode = ExecutionMode::from_flag(options.distributed);

        let train_loaders = self.build_train_loaders(datasets.into(), config, mode)?;

        let parallelism = Parallelism::select(mode, config, self.backend.current_device())?;
        debug!(?parallelism, "Wrapping model");
        let model = self.backend.wrap_model(model, &parallelism)?;

        let optimizer = self.backend.build_optimizer(&model, &config.optimizer)?;

        if config.ensure_runner()? {
            warn!("config is now expected to have a `runner` section, please set `runner` in your config.");
        }
        let runner_spec = config
            .runner
            .clone()
            .ok_or_else(|| TrainingError::InvalidConfig("runner spec is missing".to_string()))?;

        let mut runner = self.backend.build_runner(
            &runner_spec,
            RunnerArgs {
                model,
                optimizer,
                work_dir: work_dir.clone(),
                logger,
                meta: options.meta,
            },
        )?;
        if let Some(stamp) = &options.timestamp {
            info!(
                log = %work_dir.log_file(stamp).display(),
                log_json = %work_dir.log_json_file(stamp).display(),
                "Run logs"
            );
        }
        runner.set_timestamp(options.timestamp);
        debug!(runner = %runner_spec.runner_type, "Runner constructed");

        let optimizer_hook =
            OptimizerHookChoice::select(&config.optimizer_config, config.fp16.as_ref(), options.distributed)?;
        debug!(optimizer_hook = optimizer_hook.variant(), "Selected optimizer hook");
        runner.register_training_hooks(
            TrainingHooks {
                lr_config: config.lr_config.clone(),
                optimizer: optimizer_hook,
                checkpoint_config: config.checkpoint_config.clone(),
                log_config: config.log_config.clone(),
                momentum_config: config.momentum_config.clone(),
            },
            &self.factories,
        )?;

        if options.validate {
            let eval_hook = self.build_eval_hook(config, &runner_spec, mode)?;
            runner.register_hook(Box::new(eval_hook), HookPriority::LOW)?;
        }

        register_custom_hooks(&mut runner, config.custom_hooks.as_ref(), &self.factories)?;
        debug!("Hooks registered");

        if let Some(path) = &config.resume_from {
            info!(checkpoint = %path.display(), "Resuming training state");
            runner.resume(path)?;
        } else if let Some(path) = &config.load_from {
            info!(checkpoint = %path.display(), "Loading model weights");
            runner.load_checkpoint(path)?;
        }

        debug!(workflow = ?config.workflow, "Starting runner");
        runner.run(train_loaders, &config.workflow)
    }

    fn build_train_loaders(
        &self,
        datasets: Datasets,
        config: &Config,
        mode: ExecutionMode,
    ) -> TrainingResult<Vec<Box<dyn DataLoader>>> {
        let options = LoaderOptions {
            num_gpus: config.gpu_ids.len(),
            dist: mode.is_distributed(),
            seed: config.seed,
            settings: config.data.train_dataloader.clone(),
        };
        datasets
            .into_vec()
            .into_iter()
            .map(|dataset| self.backend.build_dataloader(dataset, &options))
            .collect()
    }

    fn build_eval_hook(
        &self,
        config: &Config,
        runner_spec: &RunnerSpec,
        mode: ExecutionMode,
    ) -> TrainingResult<EvalHook> {
        let val = config.data.val.as_ref().ok_or_else(|| {
            TrainingError::InvalidConfig("validation requested but `data.val` is missing".to_string())
        })?;
        let loader_options = LoaderOptions {
            num_gpus: 1,
            dist: mode.is_distributed(),
            seed: None,
            settings: config.data.val_dataloader.clone(),
        };

        let (loaders, names) = if val.separate_eval {
            let mut loaders = Vec::with_capacity(val.datasets.len());
            let mut names = Vec::with_capacity(val.datasets.len());
            for spec in &val.datasets {
                let dataset = self.backend.build_dataset(spec, DatasetOptions::default())?;
                names.push(dataset.dataset_name().to_string());
                loaders.push(self.backend.build_dataloader(dataset, &loader_options)?);
            }
            (loaders, DatasetNames::Multiple(names))
        } else {
            let dataset = self.backend.build_dataset(&val.spec, DatasetOptions { test_mode: true })?;
            let name = dataset.dataset_name().to_string();
            let loader = self.backend.build_dataloader(dataset, &loader_options)?;
            (vec![loader], DatasetNames::Single(name))
        };

        let mut eval_cfg = config.evaluation.clone().unwrap_or_default();
        eval_cfg.insert("by_epoch", Value::Bool(!runner_spec.is_iter_based()));
        let eval_options = EvalOptions::from_spec(&eval_cfg)?;

        EvalHook::new(mode, loaders, names, eval_options)
    }
}

/// Build and register user-declared hooks.
///
/// `custom_hooks` must be a list of mappings; each mapping may carry a
/// `priority` (default `NORMAL`) and names its hook with `type`. Empty values
/// register nothing. Returns the number of hooks registered.
pub fn register_custom_hooks<R: Runner + ?Sized>(
    runner: &mut R,
    custom_hooks: Option<&Value>,
    factories: &HookFactoryRegistry,
) -> TrainingResult<usize> {
    let Some(custom_hooks) = custom_hooks.filter(|v| is_truthy(v)) else {
        return Ok(0);
    };
    let Value::Array(items) = custom_hooks else {
        return Err(TrainingError::InvalidCustomHooks(format!(
            "custom_hooks expect list type, but got {}",
            json_kind(custom_hooks)
        )));
    };

    for (index, item) in items.iter().enumerate() {
        let Value::Object(map) = item else {
            return Err(TrainingError::InvalidCustomHooks(format!(
                "each item in custom_hooks expects mapping type, but item {index} is {}",
                json_kind(item)
            )));
        };
        let mut spec = ComponentSpec::from_map(map.clone());
        let priority = match spec.remove("priority") {
            Some(value) => HookPriority::try_from(value)?,
            None => HookPriority::NORMAL,
        };
        let hook = factories.build(&spec)?;
        debug!(hook_name = %hook.name(), %priority, "Registering custom hook");
        runner.register_hook(hook, priority)?;
    }
    Ok(items.len())
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}
