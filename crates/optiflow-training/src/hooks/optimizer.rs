//! Optimizer-step hooks.
//!
//! Exactly one optimizer-step hook is active per run. [`OptimizerHookChoice`]
//! records which one was selected: the mixed-precision hook, the plain hook, or
//! an untouched spec that is built by name when training hooks are registered.

use crate::collab::RunnerState;
use crate::error::{TrainingError, TrainingResult};
use crate::hooks::Hook;
use crate::spec::ComponentSpec;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Gradient clipping settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GradClip {
    pub max_norm: f64,
    #[serde(default = "default_norm_type")]
    pub norm_type: f64,
}

fn default_norm_type() -> f64 {
    2.0
}

fn clip_and_record(clip: Option<&GradClip>, runner: &mut dyn RunnerState) -> TrainingResult<()> {
    if let Some(clip) = clip {
        let norm = runner.optimizer().clip_grad_norm(clip.max_norm, clip.norm_type)?;
        runner.record("grad_norm", norm);
    }
    Ok(())
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct OptimizerHookOptions {
    #[serde(default)]
    grad_clip: Option<GradClip>,
}

/// Zero grads, back-propagate, optionally clip, step.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptimizerHook {
    pub grad_clip: Option<GradClip>,
}

impl OptimizerHook {
    pub const TYPE_NAME: &'static str = "OptimizerHook";

    pub fn from_spec(spec: &ComponentSpec) -> TrainingResult<Self> {
        let options: OptimizerHookOptions = spec.parse()?;
        Ok(Self { grad_clip: options.grad_clip })
    }
}

impl Hook for OptimizerHook {
    fn name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn after_train_iter(&mut self, runner: &mut dyn RunnerState) -> TrainingResult<()> {
        runner.optimizer().zero_grad();
        runner.backward(1.0)?;
        clip_and_record(self.grad_clip.as_ref(), runner)?;
        runner.optimizer().step()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleMode {
    Static,
    Dynamic,
}

/// Loss scale for mixed-precision training.
///
/// In dynamic mode the scale is divided by `scale_factor` on every overflow
/// (never below 1) and multiplied by it after `scale_window` iterations
/// without one.
#[derive(Debug, Clone, PartialEq)]
pub struct LossScaler {
    scale: f64,
    mode: ScaleMode,
    scale_factor: f64,
    scale_window: u64,
    cur_iter: u64,
    last_overflow_iter: Option<u64>,
}

impl LossScaler {
    pub const DEFAULT_STATIC_SCALE: f64 = 512.0;
    pub const DEFAULT_INIT_SCALE: f64 = 4_294_967_296.0;
    pub const DEFAULT_SCALE_FACTOR: f64 = 2.0;
    pub const DEFAULT_SCALE_WINDOW: u64 = 1000;

    /// Static scaler that never changes `scale`.
    pub fn fixed(scale: f64) -> TrainingResult<Self> {
        check_positive("loss_scale", scale)?;
        Ok(Self {
            scale,
            mode: ScaleMode::Static,
            scale_factor: Self::DEFAULT_SCALE_FACTOR,
            scale_window: Self::DEFAULT_SCALE_WINDOW,
            cur_iter: 0,
            last_overflow_iter: None,
        })
    }

    /// Dynamic scaler starting at `init_scale`.
    ///
    /// `scale_factor` must be greater than 1 and `scale_window` at least 1.
    pub fn dynamic(init_scale: f64, scale_factor: f64, scale_window: u64) -> TrainingResult<Self> {
        check_positive("loss_scale.init_scale", init_scale)?;
        if !(scale_factor.is_finite() && scale_factor > 1.0) {
            return Err(TrainingError::InvalidConfig(format!(
                "loss_scale.scale_factor must be greater than 1, got {scale_factor}"
            )));
        }
        if scale_window == 0 {
            return Err(TrainingError::InvalidConfig(
                "loss_scale.scale_window must be greater than 0".to_string(),
            ));
        }
        Ok(Self {
            scale: init_scale,
            mode: ScaleMode::Dynamic,
            scale_factor,
            scale_window,
            cur_iter: 0,
            last_overflow_iter: None,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn mode(&self) -> ScaleMode {
        self.mode
    }

    /// Advance one iteration, adjusting the scale in dynamic mode.
    pub fn update_scale(&mut self, overflow: bool) {
        if self.mode == ScaleMode::Static {
            return;
        }
        if overflow {
            self.scale = (self.scale / self.scale_factor).max(1.0);
            self.last_overflow_iter = Some(self.cur_iter);
        } else {
            let clean_iters = match self.last_overflow_iter {
                Some(last) => self.cur_iter - last,
                None => self.cur_iter + 1,
            };
            if clean_iters % self.scale_window == 0 {
                self.scale *= self.scale_factor;
            }
        }
        self.cur_iter += 1;
    }
}

fn check_positive(name: &str, value: f64) -> TrainingResult<()> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(TrainingError::InvalidConfig(format!("{name} must be positive, got {value}")))
    }
}

/// `loss_scale` option: `"dynamic"`, a fixed number, or detailed settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LossScaleConfig {
    Fixed(f64),
    Named(String),
    Detailed(LossScalerSettings),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LossScalerSettings {
    #[serde(default = "default_init_scale")]
    pub init_scale: f64,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default = "default_scale_factor")]
    pub scale_factor: f64,
    #[serde(default = "default_scale_window")]
    pub scale_window: u64,
}

fn default_init_scale() -> f64 {
    LossScaler::DEFAULT_INIT_SCALE
}

fn default_mode() -> String {
    "dynamic".to_string()
}

fn default_scale_factor() -> f64 {
    LossScaler::DEFAULT_SCALE_FACTOR
}

fn default_scale_window() -> u64 {
    LossScaler::DEFAULT_SCALE_WINDOW
}

impl Default for LossScaleConfig {
    fn default() -> Self {
        Self::Fixed(LossScaler::DEFAULT_STATIC_SCALE)
    }
}

impl LossScaleConfig {
    pub fn to_scaler(&self) -> TrainingResult<LossScaler> {
        match self {
            Self::Fixed(scale) => LossScaler::fixed(*scale),
            Self::Named(name) if name == "dynamic" => LossScaler::dynamic(
                LossScaler::DEFAULT_INIT_SCALE,
                LossScaler::DEFAULT_SCALE_FACTOR,
                LossScaler::DEFAULT_SCALE_WINDOW,
            ),
            Self::Named(name) => Err(TrainingError::InvalidConfig(format!(
                "loss_scale must be \"dynamic\", a number or a mapping, got \"{name}\""
            ))),
            Self::Detailed(settings) => match settings.mode.as_str() {
                "dynamic" => LossScaler::dynamic(settings.init_scale, settings.scale_factor, settings.scale_window),
                "static" => LossScaler::fixed(settings.init_scale),
                other => Err(TrainingError::InvalidConfig(format!(
                    "loss_scale.mode must be \"static\" or \"dynamic\", got \"{other}\""
                ))),
            },
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct Fp16OptimizerHookOptions {
    #[serde(default)]
    grad_clip: Option<GradClip>,
    #[serde(default = "default_coalesce")]
    coalesce: bool,
    #[serde(default = "default_bucket_size_mb")]
    bucket_size_mb: i64,
    #[serde(default)]
    loss_scale: LossScaleConfig,
    #[serde(default = "default_distributed")]
    distributed: bool,
}

fn default_coalesce() -> bool {
    true
}

fn default_bucket_size_mb() -> i64 {
    -1
}

fn default_distributed() -> bool {
    true
}

/// Optimizer hook for mixed-precision training.
#[derive(Debug, Clone, PartialEq)]
pub struct Fp16OptimizerHook {
    pub grad_clip: Option<GradClip>,
    pub coalesce: bool,
    pub bucket_size_mb: i64,
    pub distributed: bool,
    pub loss_scaler: LossScaler,
}

impl Fp16OptimizerHook {
    pub const TYPE_NAME: &'static str = "Fp16OptimizerHook";

    pub fn from_spec(spec: &ComponentSpec) -> TrainingResult<Self> {
        let options: Fp16OptimizerHookOptions = spec.parse()?;
        Ok(Self {
            grad_clip: options.grad_clip,
            coalesce: options.coalesce,
            bucket_size_mb: options.bucket_size_mb,
            distributed: options.distributed,
            loss_scaler: options.loss_scale.to_scaler()?,
        })
    }
}

impl Hook for Fp16OptimizerHook {
    fn name(&self) -> &str {
        Self::TYPE_NAME
    }

    fn after_train_iter(&mut self, runner: &mut dyn RunnerState) -> TrainingResult<()> {
        let scale = self.loss_scaler.scale();
        runner.optimizer().zero_grad();
        runner.backward(scale)?;
        if self.distributed {
            runner.optimizer().all_reduce_grads(self.coalesce, self.bucket_size_mb)?;
        }

        let overflow = !runner.optimizer().grads_are_finite();
        if overflow {
            tracing::warn!(iter = runner.iter(), scale, "Gradient overflow, skipping optimizer step");
        } else {
            runner.optimizer().scale_grads(1.0 / scale);
            clip_and_record(self.grad_clip.as_ref(), runner)?;
            runner.optimizer().step()?;
        }

        self.loss_scaler.update_scale(overflow);
        if overflow {
            tracing::warn!(scale = self.loss_scaler.scale(), "Downscaled loss scale");
        }
        runner.record("loss_scale", self.loss_scaler.scale());
        Ok(())
    }
}

/// The single optimizer-step hook of a run.
#[derive(Debug, Clone, PartialEq)]
pub enum OptimizerHookChoice {
    Fp16(Fp16OptimizerHook),
    Plain(OptimizerHook),
    /// Built by name at registration time; `type` defaults to `OptimizerHook`.
    Spec(ComponentSpec),
}

impl OptimizerHookChoice {
    /// Pick the optimizer hook for a run.
    ///
    /// Mixed precision wins when `fp16` is configured; distributed runs without
    /// an explicit hook type get the plain hook; anything else is passed on
    /// as-is.
    pub fn select(
        optimizer_config: &ComponentSpec,
        fp16: Option<&ComponentSpec>,
        distributed: bool,
    ) -> TrainingResult<Self> {
        if let Some(fp16) = fp16 {
            let mut merged = optimizer_config.merge_disjoint(fp16)?;
            if merged.insert("distributed", Value::Bool(distributed)).is_some() {
                return Err(TrainingError::InvalidConfig(
                    "option `distributed` is set by the launcher".to_string(),
                ));
            }
            return Ok(Self::Fp16(Fp16OptimizerHook::from_spec(&merged)?));
        }
        if distributed && !optimizer_config.has_type() {
            return Ok(Self::Plain(OptimizerHook::from_spec(optimizer_config)?));
        }
        Ok(Self::Spec(optimizer_config.clone()))
    }

    /// Name of the selected variant.
    pub fn variant(&self) -> &'static str {
        match self {
            Self::Fp16(_) => Fp16OptimizerHook::TYPE_NAME,
            Self::Plain(_) => OptimizerHook::TYPE_NAME,
            Self::Spec(_) => "spec",
        }
    }
}
