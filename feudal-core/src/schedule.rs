//! Schedules of exploration parameters.
use serde::{Deserialize, Serialize};

/// Linearly interpolates from `initial` to `last` over `n_steps` steps.
///
/// The FeUdal manager uses it for the probability of replacing a goal with
/// a random one.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct LinearSchedule {
    /// Value at step 0.
    pub initial: f64,

    /// Value from step `n_steps` on.
    pub last: f64,

    /// Number of steps of the decay.
    pub n_steps: usize,
}

impl LinearSchedule {
    /// Constructs a schedule.
    pub fn new(initial: f64, last: f64, n_steps: usize) -> Self {
        Self {
            initial,
            last,
            n_steps,
        }
    }

    /// Value at the given step.
    pub fn value(&self, step: usize) -> f64 {
        if self.n_steps == 0 || step >= self.n_steps {
            return self.last;
        }
        let r = step as f64 / self.n_steps as f64;
        self.initial + (self.last - self.initial) * r
    }

    /// The amount subtracted per step.
    pub fn decrement(&self) -> f64 {
        match self.n_steps {
            0 => self.initial - self.last,
            n => (self.initial - self.last) / n as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_linear_schedule() {
        let s = LinearSchedule::new(1.0, 0.2, 4);
        assert_eq!(s.value(0), 1.0);
        assert!((s.value(2) - 0.6).abs() < 1e-12);
        assert_eq!(s.value(4), 0.2);
        assert_eq!(s.value(100), 0.2);
        assert!((s.decrement() - 0.2).abs() < 1e-12);
        assert_eq!(LinearSchedule::new(1.0, 0.5, 0).value(0), 0.5);
    }
}
