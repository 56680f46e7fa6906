use crate::error::{TrainingError, TrainingResult};
use crate::spec::{json_kind, ComponentSpec};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};

/// Runner type that counts iterations instead of epochs.
pub const ITER_BASED_RUNNER: &str = "IterBasedRunner";

/// Free-form data loader options (batch size, workers, shuffling, ...).
pub type LoaderSettings = Map<String, Value>;

/// Top-level training configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub gpu_ids: Vec<usize>,
    #[serde(default)]
    pub seed: Option<u64>,
    pub data: DataConfig,
    pub optimizer: ComponentSpec,
    #[serde(default)]
    pub optimizer_config: ComponentSpec,
    /// Absent in older configs; see [`Config::ensure_runner`].
    #[serde(default)]
    pub runner: Option<RunnerSpec>,
    #[serde(default)]
    pub total_iters: Option<u64>,
    #[serde(default)]
    pub lr_config: Option<ComponentSpec>,
    #[serde(default)]
    pub checkpoint_config: Option<ComponentSpec>,
    #[serde(default)]
    pub log_config: Option<LogConfig>,
    #[serde(default)]
    pub momentum_config: Option<ComponentSpec>,
    #[serde(default)]
    pub fp16: Option<ComponentSpec>,
    #[serde(default)]
    pub find_unused_parameters: bool,
    #[serde(default)]
    pub evaluation: Option<ComponentSpec>,
    /// Kept untyped so that malformed entries are reported by the launcher.
    #[serde(default)]
    pub custom_hooks: Option<Value>,
    #[serde(default)]
    pub resume_from: Option<PathBuf>,
    #[serde(default)]
    pub load_from: Option<PathBuf>,
    #[serde(default = "default_workflow")]
    pub workflow: Vec<WorkflowStage>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DataConfig {
    #[serde(default)]
    pub train_dataloader: LoaderSettings,
    #[serde(default)]
    pub val: Option<ValDataConfig>,
    #[serde(default)]
    pub val_dataloader: LoaderSettings,
}

/// Validation data section.
///
/// With `separate_eval` each entry of `datasets` is built and evaluated on its
/// own; otherwise the whole section, `datasets` included, describes a single
/// dataset.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ComponentSpec", into = "ComponentSpec")]
pub struct ValDataConfig {
    pub separate_eval: bool,
    pub datasets: Vec<ComponentSpec>,
    /// The section as written.
    pub spec: ComponentSpec,
}

impl TryFrom<ComponentSpec> for ValDataConfig {
    type Error = TrainingError;

    fn try_from(spec: ComponentSpec) -> TrainingResult<Self> {
        let separate_eval = match spec.get("separate_eval") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(flag)) => *flag,
            Some(other) => {
                return Err(TrainingError::InvalidConfig(format!(
                    "data.val.separate_eval must be a bool, got {}",
                    json_kind(other)
                )));
            }
        };
        let datasets = match spec.get("datasets") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .cloned()
                .map(ComponentSpec::try_from)
                .collect::<TrainingResult<_>>()?,
            Some(other) => {
                return Err(TrainingError::InvalidConfig(format!(
                    "data.val.datasets must be a list, got {}",
                    json_kind(other)
                )));
            }
        };
        Ok(Self { separate_eval, datasets, spec })
    }
}

impl From<ValDataConfig> for ComponentSpec {
    fn from(val: ValDataConfig) -> Self {
        val.spec
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerSpec {
    #[serde(rename = "type")]
    pub runner_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_iters: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_epochs: Option<u64>,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

impl RunnerSpec {
    #[must_use]
    pub fn iter_based(max_iters: u64) -> Self {
        Self {
            runner_type: ITER_BASED_RUNNER.to_string(),
            max_iters: Some(max_iters),
            max_epochs: None,
            options: Map::new(),
        }
    }

    pub fn is_iter_based(&self) -> bool {
        self.runner_type == ITER_BASED_RUNNER
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_log_interval")]
    pub interval: u64,
    #[serde(default)]
    pub hooks: Vec<ComponentSpec>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    Train,
    Val,
}

/// One `(phase, count)` step of the workflow, written as `["train", 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(Phase, u64)", into = "(Phase, u64)")]
pub struct WorkflowStage {
    pub phase: Phase,
    pub count: u64,
}

impl From<(Phase, u64)> for WorkflowStage {
    fn from((phase, count): (Phase, u64)) -> Self {
        Self { phase, count }
    }
}

impl From<WorkflowStage> for (Phase, u64) {
    fn from(stage: WorkflowStage) -> Self {
        (stage.phase, stage.count)
    }
}

fn default_workflow() -> Vec<WorkflowStage> {
    vec![WorkflowStage { phase: Phase::Train, count: 1 }]
}

fn default_log_level() -> String {
    "INFO".to_string()
}

fn default_log_interval() -> u64 {
    50
}

impl Config {
    /// Load a configuration file; `.json` is parsed as JSON, `.toml` or no
    /// extension as TOML.
    pub fn from_file(path: impl AsRef<Path>) -> TrainingResult<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::from_json_str(&contents)?,
            Some("toml") | None => Self::from_toml_str(&contents)?,
            Some(other) => {
                return Err(TrainingError::InvalidConfig(format!(
                    "unsupported configuration extension '{other}'"
                )));
            }
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> TrainingResult<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn from_json_str(contents: &str) -> TrainingResult<Self> {
        Ok(serde_json::from_str(contents)?)
    }

    /// Fill in an iteration-based runner when the config has none.
    ///
    /// Returns `true` when the runner was synthesized from `total_iters`.
    pub fn ensure_runner(&mut self) -> TrainingResult<bool> {
        if self.runner.is_some() {
            return Ok(false);
        }
        let max_iters = self.total_iters.ok_or_else(|| {
            TrainingError::InvalidConfig(
                "config has neither `runner` nor `total_iters`".to_string(),
            )
        })?;
        self.runner = Some(RunnerSpec::iter_based(max_iters));
        Ok(true)
    }

    pub fn validate(&self) -> TrainingResult<()> {
        let mut errors = Vec::new();

        if self.workflow.is_empty() {
            errors.push("workflow must not be empty".to_string());
        }
        if self.workflow.iter().any(|stage| stage.count == 0) {
            errors.push("workflow counts must be greater than 0".to_string());
        }
        if let Some(runner) = &self.runner {
            if runner.runner_type.trim().is_empty() {
                errors.push("runner.type must not be empty".to_string());
            }
        } else if self.total_iters.is_none() {
            errors.push("either `runner` or `total_iters` is required".to_string());
        }
        if let Some(log_config) = &self.log_config {
            if log_config.interval == 0 {
                errors.push("log_config.interval must be greater than 0".to_string());
            }
        }
        if self.optimizer.type_name().is_none() {
            errors.push("optimizer.type is required".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(TrainingError::InvalidConfig(errors.join("; ")))
        }
    }
}
