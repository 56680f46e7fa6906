use crate::config::Config;
use crate::error::{TrainingError, TrainingResult};

/// Whether a run spans several processes or a single one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Local,
    Distributed,
}

impl ExecutionMode {
    #[must_use]
    pub fn from_flag(distributed: bool) -> Self {
        if distributed {
            Self::Distributed
        } else {
            Self::Local
        }
    }

    pub fn is_distributed(self) -> bool {
        self == Self::Distributed
    }
}

/// How the model is wrapped for multi-device execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Parallelism {
    /// Single process, data parallel across `device_ids`; the model lives on
    /// the first id.
    Local { device_ids: Vec<usize> },
    /// One process per device, bound to the current device.
    Distributed {
        device_ids: Vec<usize>,
        broadcast_buffers: bool,
        find_unused_parameters: bool,
    },
}

impl Parallelism {
    /// Pick the wrapper for this launch.
    pub fn select(mode: ExecutionMode, config: &Config, current_device: usize) -> TrainingResult<Self> {
        match mode {
            ExecutionMode::Distributed => Ok(Self::Distributed {
                device_ids: vec![current_device],
                broadcast_buffers: false,
                find_unused_parameters: config.find_unused_parameters,
            }),
            ExecutionMode::Local => {
                if config.gpu_ids.is_empty() {
                    return Err(TrainingError::InvalidConfig(
                        "gpu_ids must not be empty for non-distributed training".to_string(),
                    ));
                }
                Ok(Self::Local { device_ids: config.gpu_ids.clone() })
            }
        }
    }

    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Local { .. } => ExecutionMode::Local,
            Self::Distributed { .. } => ExecutionMode::Distributed,
        }
    }

    pub fn device_ids(&self) -> &[usize] {
        match self {
            Self::Local { device_ids } | Self::Distributed { device_ids, .. } => device_ids,
        }
    }

    /// Device that holds the model parameters.
    pub fn primary_device(&self) -> Option<usize> {
        self.device_ids().first().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(gpu_ids: Vec<usize>, find_unused: bool) -> Config {
        let mut cfg = Config::from_json_str(
            &serde_json::json!({
                "data": {},
                "optimizer": {"type": "Adam"},
                "total_iters": 10,
                "work_dir": "w"
            })
            .to_string(),
        )
        .unwrap();
        cfg.gpu_ids = gpu_ids;
        cfg.find_unused_parameters = find_unused;
        cfg
    }

    #[test]
    fn test_distributed_binds_current_device() {
        let cfg = config(vec![0, 1, 2, 3], true);
        let p = Parallelism::select(ExecutionMode::Distributed, &cfg, 2).unwrap();
        assert_eq!(
            p,
            Parallelism::Distributed {
                device_ids: vec![2],
                broadcast_buffers: false,
                find_unused_parameters: true,
            }
        );
        assert!(p.mode().is_distributed());
    }

    #[test]
    fn test_local_uses_gpu_ids() {
        let cfg = config(vec![1, 3], false);
        let p = Parallelism::select(ExecutionMode::Local, &cfg, 0).unwrap();
        assert_eq!(p.device_ids(), &[1, 3]);
        assert_eq!(p.primary_device(), Some(1));
        assert_eq!(p.mode(), ExecutionMode::Local);
    }

    #[test]
    fn test_local_without_gpus_fails() {
        let cfg = config(vec![], false);
        assert!(Parallelism::select(ExecutionMode::Local, &cfg, 0).is_err());
    }
}
