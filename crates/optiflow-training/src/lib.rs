//! Optiflow Training
//!
//! Launch primitives for optical-flow model training:
//! - Seeding every random source of a process (`RandomContext`)
//! - Loading training configuration (`Config`)
//! - Wiring loaders, model wrapping, optimizer, runner and hooks (`TrainingLauncher`)
//! - Built-in optimizer-step and evaluation hooks
//!
//! Gradient math, datasets, checkpoints and inter-process communication belong
//! to the training framework behind the traits in [`collab`].

pub mod collab;
pub mod config;
pub mod error;
pub mod hooks;
pub mod launcher;
pub mod layout;
pub mod logging;
pub mod parallel;
pub mod random;
pub mod spec;

pub use collab::{
    Backend, DataLoader, Dataset, DatasetOptions, LoaderOptions, Metrics, Optimizer, Runner, RunnerArgs,
    RunnerState,
};
pub use config::{Config, DataConfig, LogConfig, Phase, RunnerSpec, ValDataConfig, WorkflowStage};
pub use error::{TrainingError, TrainingResult};
pub use hooks::{Hook, HookFactory, HookFactoryRegistry, HookPriority, HookRegistry, Stage, TrainingHooks};
pub use launcher::{register_custom_hooks, Datasets, LaunchOptions, TrainingLauncher};
pub use layout::WorkDirLayout;
pub use logging::{init_root_logger, root_logger, RootLogger};
pub use parallel::{ExecutionMode, Parallelism};
pub use random::{BackendFlags, RandomContext, TensorRng};
pub use spec::ComponentSpec;
