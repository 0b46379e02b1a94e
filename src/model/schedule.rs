//! Learning rate schedulers

use crate::config::TrainingParams;
use crate::error::{Error, Result};

/// Learning rate scheduler stepped once per epoch
pub trait LRScheduler: Send {
    /// Current learning rate
    fn get_lr(&self) -> f32;

    /// Advance one epoch
    fn step(&mut self);
}

/// Keeps the initial rate for `niter` epochs, then decays linearly to zero
/// over `niter_decay` epochs.
///
/// The multiplier after `t` steps is
/// `1 - max(0, t + epoch_count - niter) / (niter_decay + 1)`, so a run that
/// resumes at `epoch_count` picks up where the schedule left off.
#[derive(Debug, Clone)]
pub struct LinearDecayLR {
    base_lr: f32,
    epoch_count: usize,
    niter: usize,
    niter_decay: usize,
    steps: usize,
}

impl LinearDecayLR {
    pub fn new(base_lr: f32, epoch_count: usize, niter: usize, niter_decay: usize) -> Self {
        Self {
            base_lr,
            epoch_count,
            niter,
            niter_decay,
            steps: 0,
        }
    }

    fn factor(&self) -> f32 {
        let past = (self.steps + self.epoch_count).saturating_sub(self.niter);
        (1.0 - past as f32 / (self.niter_decay + 1) as f32).max(0.0)
    }
}

impl LRScheduler for LinearDecayLR {
    fn get_lr(&self) -> f32 {
        self.base_lr * self.factor()
    }

    fn step(&mut self) {
        self.steps += 1;
    }
}

/// Multiplies the rate by `gamma` every `step_size` epochs
#[derive(Debug, Clone)]
pub struct StepLR {
    base_lr: f32,
    step_size: usize,
    gamma: f32,
    steps: usize,
}

impl StepLR {
    pub fn new(base_lr: f32, step_size: usize, gamma: f32) -> Self {
        Self {
            base_lr,
            step_size: step_size.max(1),
            gamma,
            steps: 0,
        }
    }
}

impl LRScheduler for StepLR {
    fn get_lr(&self) -> f32 {
        let decays = (self.steps / self.step_size) as i32;
        self.base_lr * self.gamma.powi(decays)
    }

    fn step(&mut self) {
        self.steps += 1;
    }
}

#[derive(Debug, Clone)]
pub struct ConstantLR {
    lr: f32,
}

impl ConstantLR {
    pub fn new(lr: f32) -> Self {
        Self { lr }
    }
}

impl LRScheduler for ConstantLR {
    fn get_lr(&self) -> f32 {
        self.lr
    }

    fn step(&mut self) {}
}

/// Scheduler named by `training.lr_policy`
pub fn build_scheduler(params: &TrainingParams) -> Result<Box<dyn LRScheduler>> {
    match params.lr_policy.as_str() {
        "linear" => Ok(Box::new(LinearDecayLR::new(
            params.lr,
            params.epoch_count,
            params.niter,
            params.niter_decay,
        ))),
        "step" => Ok(Box::new(StepLR::new(params.lr, params.lr_decay_iters, 0.1))),
        "constant" => Ok(Box::new(ConstantLR::new(params.lr))),
        other => Err(Error::UnknownComponent {
            kind: "learning rate policy",
            name: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_linear_holds_then_decays() {
        let mut scheduler = LinearDecayLR::new(1.0, 1, 2, 3);
        let mut rates = vec![scheduler.get_lr()];
        for _ in 0..5 {
            scheduler.step();
            rates.push(scheduler.get_lr());
        }
        let expected = [1.0, 1.0, 0.75, 0.5, 0.25, 0.0];
        for (rate, want) in rates.iter().zip(expected) {
            assert_abs_diff_eq!(*rate, want, epsilon = 1e-6);
        }
    }

    #[test]
    fn test_linear_resume_offsets_schedule() {
        let resumed = LinearDecayLR::new(1.0, 4, 2, 3);
        assert_abs_diff_eq!(resumed.get_lr(), 0.5, epsilon = 1e-6);
    }

    #[test]
    fn test_linear_never_negative() {
        let mut scheduler = LinearDecayLR::new(0.1, 1, 1, 0);
        for _ in 0..10 {
            scheduler.step();
        }
        assert_eq!(scheduler.get_lr(), 0.0);
    }

    #[test]
    fn test_step_decay() {
        let mut scheduler = StepLR::new(1.0, 2, 0.1);
        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 1.0, epsilon = 1e-6);
        scheduler.step();
        assert_abs_diff_eq!(scheduler.get_lr(), 0.1, epsilon = 1e-6);
    }

    #[test]
    fn test_build_unknown_policy() {
        let params = TrainingParams {
            lr_policy: "plateau".to_string(),
            ..TrainingParams::default()
        };
        assert!(build_scheduler(&params).is_err());
    }

    #[test]
    fn test_build_constant() {
        let params = TrainingParams {
            lr_policy: "constant".to_string(),
            lr: 0.5,
            ..TrainingParams::default()
        };
        let mut scheduler = build_scheduler(&params).unwrap();
        scheduler.step();
        assert_eq!(scheduler.get_lr(), 0.5);
    }
}
