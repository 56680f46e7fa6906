//! Explicit random state for reproducible runs.
//!
//! A [`RandomContext`] owns every generator a training process draws from: the
//! general-purpose generator, the numeric-array generator, and the tensor
//! generators (one for the CPU, one per GPU device). Seed it once at process
//! start, before any data loader workers are spawned, and pass it to whatever
//! needs reproducible draws.

use rand::rngs::StdRng;
use rand::SeedableRng;

/// Kernel selection flags for the numeric backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackendFlags {
    /// Only use deterministic kernels.
    pub deterministic: bool,
    /// Let the backend benchmark and pick the fastest kernels.
    pub benchmark: bool,
}

impl Default for BackendFlags {
    fn default() -> Self {
        Self { deterministic: false, benchmark: true }
    }
}

/// Generators used for tensor computation.
#[derive(Debug, Clone)]
pub struct TensorRng {
    pub cpu: StdRng,
    pub devices: Vec<StdRng>,
}

#[derive(Debug, Clone)]
pub struct RandomContext {
    seed: u64,
    general: StdRng,
    numeric: StdRng,
    tensor: TensorRng,
    backend: BackendFlags,
}

impl RandomContext {
    /// Create a context for `device_count` GPUs, seeded with `seed`.
    #[must_use]
    pub fn seeded(seed: u64, deterministic: bool, device_count: usize) -> Self {
        let mut ctx = Self {
            seed,
            general: StdRng::seed_from_u64(seed),
            numeric: StdRng::seed_from_u64(seed),
            tensor: TensorRng {
                cpu: StdRng::seed_from_u64(seed),
                devices: vec![StdRng::seed_from_u64(seed); device_count],
            },
            backend: BackendFlags::default(),
        };
        ctx.seed(seed, deterministic);
        ctx
    }

    /// Reset every generator to `seed`.
    ///
    /// With `deterministic` the backend is switched to deterministic,
    /// non-benchmarking kernel selection. The flags are never switched back.
    pub fn seed(&mut self, seed: u64, deterministic: bool) {
        self.seed = seed;
        self.general = StdRng::seed_from_u64(seed);
        self.numeric = StdRng::seed_from_u64(seed);
        self.tensor.cpu = StdRng::seed_from_u64(seed);
        for device in &mut self.tensor.devices {
            *device = StdRng::seed_from_u64(seed);
        }
        if deterministic {
            self.backend = BackendFlags { deterministic: true, benchmark: false };
        }
        tracing::info!(seed, deterministic, devices = self.tensor.devices.len(), "Set random seed");
    }

    pub fn current_seed(&self) -> u64 {
        self.seed
    }

    pub fn general(&mut self) -> &mut StdRng {
        &mut self.general
    }

    pub fn numeric(&mut self) -> &mut StdRng {
        &mut self.numeric
    }

    pub fn tensor(&mut self) -> &mut TensorRng {
        &mut self.tensor
    }

    /// Generator for GPU `index`, if such a device was configured.
    pub fn device(&mut self, index: usize) -> Option<&mut StdRng> {
        self.tensor.devices.get_mut(index)
    }

    pub fn backend_flags(&self) -> BackendFlags {
        self.backend
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    #[test]
    fn test_same_seed_same_draws() {
        let mut a = RandomContext::seeded(1234, false, 2);
        let mut b = RandomContext::seeded(1234, false, 2);

        let xs: Vec<u64> = (0..8).map(|_| a.general().r#gen()).collect();
        let ys: Vec<u64> = (0..8).map(|_| b.general().r#gen()).collect();
        assert_eq!(xs, ys);

        let x: f64 = a.device(1).unwrap().r#gen();
        let y: f64 = b.device(1).unwrap().r#gen();
        assert_eq!(x, y);
    }

    #[test]
    fn test_reseed_restores_stream() {
        let mut ctx = RandomContext::seeded(7, false, 0);
        let first: u32 = ctx.numeric().r#gen();
        let _: u32 = ctx.numeric().r#gen();

        ctx.seed(7, false);
        let again: u32 = ctx.numeric().r#gen();
        assert_eq!(first, again);
        assert!(ctx.device(0).is_none());
    }

    #[test]
    fn test_deterministic_flags() {
        let mut ctx = RandomContext::seeded(0, false, 1);
        assert_eq!(ctx.backend_flags(), BackendFlags::default());

        ctx.seed(0, true);
        assert_eq!(ctx.backend_flags(), BackendFlags { deterministic: true, benchmark: false });

        // a later non-deterministic seed does not undo the flags
        ctx.seed(1, false);
        assert!(ctx.backend_flags().deterministic);
        assert_eq!(ctx.current_seed(), 1);
    }
}
