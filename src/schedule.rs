use std::f64::consts::PI;

use crate::error::{OrchestraErr, Result};

/// Learning-rate schedule over a precomputed step budget: a linear warmup followed by a
/// cosine decay to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TrainingSchedule {
    total_steps: usize,
    warmup_steps: usize,
}

impl TrainingSchedule {
    /// Creates a new `TrainingSchedule` warming up over `round(total_steps × warmup_fraction)`
    /// steps.
    ///
    /// # Errors
    /// Returns `OrchestraErr::Schedule` if `total_steps` is zero or `warmup_fraction` lies
    /// outside `[0, 1]`.
    pub fn new(total_steps: usize, warmup_fraction: f64) -> Result<Self> {
        if !(0.0..=1.0).contains(&warmup_fraction) {
            return Err(OrchestraErr::Schedule(format!(
                "warmup fraction must lie in [0, 1], got {warmup_fraction}"
            )));
        }

        let warmup_steps = (total_steps as f64 * warmup_fraction).round() as usize;
        Self::with_warmup_steps(total_steps, warmup_steps)
    }

    /// Creates a new `TrainingSchedule` with an explicit warmup length.
    ///
    /// # Errors
    /// Returns `OrchestraErr::Schedule` if `total_steps` is zero or `warmup_steps` exceeds it.
    pub fn with_warmup_steps(total_steps: usize, warmup_steps: usize) -> Result<Self> {
        if total_steps == 0 {
            return Err(OrchestraErr::Schedule(
                "total steps must be greater than 0".into(),
            ));
        }

        if warmup_steps > total_steps {
            return Err(OrchestraErr::Schedule(format!(
                "{warmup_steps} warmup steps exceed the {total_steps} total steps"
            )));
        }

        Ok(Self {
            total_steps,
            warmup_steps,
        })
    }

    pub fn total_steps(&self) -> usize {
        self.total_steps
    }

    pub fn warmup_steps(&self) -> usize {
        self.warmup_steps
    }

    /// Returns the learning-rate multiplier for `step`.
    ///
    /// Ramps linearly from 0 to 1 over the warmup, then follows a half cosine down to 0 at
    /// `total_steps`. Steps past the budget stay at the floor. A schedule that is all warmup
    /// holds 1 once the warmup ends.
    pub fn multiplier(&self, step: usize) -> f64 {
        if step < self.warmup_steps {
            return step as f64 / self.warmup_steps as f64;
        }

        let decay_steps = self.total_steps - self.warmup_steps;
        if decay_steps == 0 {
            return 1.0;
        }

        let progress = ((step - self.warmup_steps) as f64 / decay_steps as f64).min(1.0);
        (0.5 * (1.0 + (PI * progress).cos())).max(0.0)
    }
}
