//! Learning Rate Scheduler Module
//!
//! The schedule is stepped once at the start of every epoch, so the rate
//! used for 0-based epoch `e` is evaluated at step `e + 1`.

use serde::{Deserialize, Serialize};

/// Learning rate scheduler that adjusts the learning rate during training
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LrScheduler {
    /// Constant learning rate (no scheduling)
    Constant { lr: f64 },

    /// Multiply by `gamma` once for every milestone reached
    MultiStep {
        initial_lr: f64,
        gamma: f64,
        /// Milestones in (possibly fractional) epochs
        milestones: Vec<f64>,
    },
}

impl LrScheduler {
    /// Create a constant learning rate scheduler
    pub fn constant(lr: f64) -> Self {
        Self::Constant { lr }
    }

    /// Create a multi-step decay scheduler
    pub fn multi_step(initial_lr: f64, gamma: f64, milestones: Vec<f64>) -> Self {
        Self::MultiStep {
            initial_lr,
            gamma,
            milestones,
        }
    }

    /// Get the learning rate for a given 0-based epoch
    pub fn get_lr(&self, epoch: usize) -> f64 {
        match self {
            Self::Constant { lr } => *lr,
            Self::MultiStep {
                initial_lr,
                gamma,
                milestones,
            } => {
                let step = (epoch + 1) as f64;
                let reached = milestones.iter().filter(|&&m| m <= step).count();
                initial_lr * gamma.powi(reached as i32)
            }
        }
    }

    /// Human-readable description
    pub fn description(&self) -> String {
        match self {
            Self::Constant { lr } => format!("Constant (lr={lr})"),
            Self::MultiStep {
                initial_lr,
                gamma,
                milestones,
            } => format!(
                "MultiStep (lr={initial_lr}, gamma={gamma}, milestones={:?})",
                milestones
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_scheduler() {
        let scheduler = LrScheduler::constant(0.001);
        assert_eq!(scheduler.get_lr(0), 0.001);
        assert_eq!(scheduler.get_lr(100), 0.001);
    }

    #[test]
    fn test_multi_step_boundaries() {
        // 50 epochs: milestones at 25 and 37.5
        let scheduler = LrScheduler::multi_step(0.1, 0.1, vec![25.0, 37.5]);

        assert_eq!(scheduler.get_lr(0), 0.1);
        assert_eq!(scheduler.get_lr(23), 0.1);
        // Step 25 reaches the first milestone
        assert!((scheduler.get_lr(24) - 0.01).abs() < 1e-12);
        assert!((scheduler.get_lr(36) - 0.01).abs() < 1e-12);
        // Step 38 passes 37.5
        assert!((scheduler.get_lr(37) - 0.001).abs() < 1e-12);
        assert!((scheduler.get_lr(49) - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_description() {
        let scheduler = LrScheduler::multi_step(0.1, 0.1, vec![1.0]);
        assert!(scheduler.description().starts_with("MultiStep"));
    }
}
