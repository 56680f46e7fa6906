//! In-memory backend and runner shared by the launcher integration tests.

#![allow(dead_code)]

use optiflow_training::collab::{
    Backend, DataLoader, Dataset, DatasetOptions, LoaderOptions, Optimizer, Runner, RunnerArgs,
};
use optiflow_training::config::{Config, RunnerSpec, WorkflowStage};
use optiflow_training::hooks::{Hook, HookFactoryRegistry, HookPriority, HookRegistry};
use optiflow_training::launcher::{Datasets, TrainingLauncher};
use optiflow_training::parallel::Parallelism;
use optiflow_training::spec::ComponentSpec;
use optiflow_training::{TrainingError, TrainingResult};
use serde_json::{json, Value};
use std::cell::RefCell;
use std::io;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::{Arc, Mutex};

#[derive(Debug, Default)]
pub struct Recorded {
    pub events: Vec<String>,
    pub parallelism: Option<Parallelism>,
    pub datasets: Vec<(String, DatasetOptions)>,
    pub loaders: Vec<(String, LoaderOptions)>,
    pub runner_spec: Option<RunnerSpec>,
    pub wrapped_model: Option<String>,
    pub timestamp: Option<String>,
    pub hooks: Vec<(String, HookPriority)>,
    pub run_loaders: Vec<String>,
    /// Hook names in execution order when `run` was called.
    pub execution_order: Vec<String>,
    pub workflow: Vec<WorkflowStage>,
    pub dataset_specs: Vec<ComponentSpec>,
    pub log_file: Option<PathBuf>,
}

pub type Log = Rc<RefCell<Recorded>>;

pub struct MockDataset(pub String);

impl Dataset for MockDataset {
    fn dataset_name(&self) -> &str {
        &self.0
    }

    fn len(&self) -> usize {
        16
    }
}

pub struct MockLoader(String);

impl DataLoader for MockLoader {
    fn dataset_name(&self) -> &str {
        &self.0
    }

    fn len(&self) -> usize {
        8
    }
}

pub struct NoopOptimizer;

impl Optimizer for NoopOptimizer {
    fn zero_grad(&mut self) {}

    fn grads_are_finite(&self) -> bool {
        true
    }

    fn scale_grads(&mut self, _factor: f64) {}

    fn clip_grad_norm(&mut self, _max_norm: f64, _norm_type: f64) -> TrainingResult<f64> {
        Ok(0.0)
    }

    fn step(&mut self) -> TrainingResult<()> {
        Ok(())
    }
}

pub struct MockRunner {
    log: Log,
    hooks: HookRegistry,
}

impl Runner for MockRunner {
    fn set_timestamp(&mut self, timestamp: Option<String>) {
        self.log.borrow_mut().timestamp = timestamp;
    }

    fn register_hook(&mut self, hook: Box<dyn Hook>, priority: HookPriority) -> TrainingResult<()> {
        self.log.borrow_mut().hooks.push((hook.name().to_string(), priority));
        self.hooks.register(hook, priority);
        Ok(())
    }

    fn resume(&mut self, checkpoint: &Path) -> TrainingResult<()> {
        self.log.borrow_mut().events.push(format!("resume:{}", checkpoint.display()));
        Ok(())
    }

    fn load_checkpoint(&mut self, checkpoint: &Path) -> TrainingResult<()> {
        self.log.borrow_mut().events.push(format!("load:{}", checkpoint.display()));
        Ok(())
    }

    fn run(&mut self, loaders: Vec<Box<dyn DataLoader>>, workflow: &[WorkflowStage]) -> TrainingResult<()> {
        let mut log = self.log.borrow_mut();
        log.run_loaders = loaders.iter().map(|l| l.dataset_name().to_string()).collect();
        log.workflow = workflow.to_vec();
        log.execution_order = self.hooks.names().into_iter().map(String::from).collect();
        log.events.push("run".to_string());
        Ok(())
    }
}

pub struct MockBackend {
    log: Log,
}

impl Backend for MockBackend {
    type Model = String;
    type Wrapped = String;
    type Runner = MockRunner;

    fn current_device(&self) -> usize {
        3
    }

    fn wrap_model(&self, model: String, parallelism: &Parallelism) -> TrainingResult<String> {
        self.log.borrow_mut().parallelism = Some(parallelism.clone());
        Ok(format!("wrapped({model})"))
    }

    fn build_dataset(&self, spec: &ComponentSpec, options: DatasetOptions) -> TrainingResult<Box<dyn Dataset>> {
        let name = spec.type_name().unwrap_or("unnamed").to_string();
        let mut log = self.log.borrow_mut();
        log.datasets.push((name.clone(), options));
        log.dataset_specs.push(spec.clone());
        Ok(Box::new(MockDataset(name)))
    }

    fn build_dataloader(
        &self,
        dataset: Box<dyn Dataset>,
        options: &LoaderOptions,
    ) -> TrainingResult<Box<dyn DataLoader>> {
        let name = dataset.dataset_name().to_string();
        self.log.borrow_mut().loaders.push((name.clone(), options.clone()));
        Ok(Box::new(MockLoader(name)))
    }

    fn build_optimizer(&self, model: &String, spec: &ComponentSpec) -> TrainingResult<Box<dyn Optimizer>> {
        if spec.type_name() != Some("Adam") {
            return Err(TrainingError::Backend(format!("unsupported optimizer for {model}")));
        }
        Ok(Box::new(NoopOptimizer))
    }

    fn build_runner(&self, spec: &RunnerSpec, args: RunnerArgs<String>) -> TrainingResult<MockRunner> {
        let mut log = self.log.borrow_mut();
        log.runner_spec = Some(spec.clone());
        log.wrapped_model = Some(args.model);
        log.log_file = args.logger.log_file;
        log.events.push(format!("runner:{}", args.work_dir.root().display()));
        Ok(MockRunner { log: self.log.clone(), hooks: HookRegistry::new() })
    }
}

pub struct Named(pub &'static str);

impl Hook for Named {
    fn name(&self) -> &str {
        self.0
    }
}

pub fn step_lr(_: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
    Ok(Box::new(Named("StepLrUpdaterHook")))
}

pub fn checkpoint(_: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
    Ok(Box::new(Named("CheckpointHook")))
}

pub fn text_logger(_: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
    Ok(Box::new(Named("TextLoggerHook")))
}

pub fn ema(_: &ComponentSpec) -> TrainingResult<Box<dyn Hook>> {
    Ok(Box::new(Named("EMAHook")))
}

pub fn new_launcher() -> (TrainingLauncher<MockBackend>, Log) {
    let log = Log::default();
    let mut factories = HookFactoryRegistry::with_builtins();
    factories.register_factory("StepLrUpdaterHook", step_lr);
    factories.register_factory("CheckpointHook", checkpoint);
    factories.register_factory("TextLoggerHook", text_logger);
    factories.register_factory("EMAHook", ema);
    (TrainingLauncher::new(MockBackend { log: log.clone() }, factories), log)
}

pub fn config(overrides: Value) -> Config {
    let mut base = json!({
        "gpu_ids": [0, 1],
        "seed": 7,
        "total_iters": 100,
        "data": {
            "train_dataloader": {"samples_per_gpu": 2, "workers_per_gpu": 2},
            "val_dataloader": {"samples_per_gpu": 1}
        },
        "optimizer": {"type": "Adam", "lr": 0.0001},
        "work_dir": "work_dirs/pwcnet"
    });
    if let (Value::Object(base), Value::Object(overrides)) = (&mut base, overrides) {
        base.extend(overrides);
    }
    Config::from_json_str(&base.to_string()).unwrap()
}

pub fn train_sets(names: &[&str]) -> Datasets {
    let datasets: Vec<Box<dyn Dataset>> = names
        .iter()
        .map(|n| Box::new(MockDataset((*n).to_string())) as Box<dyn Dataset>)
        .collect();
    Datasets::from(datasets)
}

pub fn hook_names(log: &Log) -> Vec<(String, HookPriority)> {
    log.borrow().hooks.clone()
}


/// Shared buffer receiving formatted `tracing` output.
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock().unwrap()).into_owned()
    }

    pub fn count(&self, needle: &str) -> usize {
        self.contents().matches(needle).count()
    }
}

/// Run `f` with a thread-local subscriber that records warnings and errors.
pub fn with_captured_warnings<T>(f: impl FnOnce() -> T) -> (T, CapturedLogs) {
    let logs = CapturedLogs::default();
    let writer = logs.clone();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_max_level(tracing::Level::WARN)
        .with_writer(move || writer.clone())
        .finish();
    let out = tracing::subscriber::with_default(subscriber, f);
    (out, logs)
}
