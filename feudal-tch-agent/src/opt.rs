//! Optimizers.
use crate::util::{clip_average_norm, clip_global_norm};
use anyhow::Result;
use serde::{Deserialize, Serialize};
use tch::{
    nn::{
        Adam, AdamW, Optimizer as Optimizer_, OptimizerConfig as OptimizerConfig_, RmsProp,
        VarStore,
    },
    Tensor,
};

/// Configures an optimizer for training neural networks in an RL agent.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub enum OptimizerConfig {
    /// Adam optimizer.
    Adam {
        /// Learning rate.
        lr: f64,
    },

    /// AdamW optimizer.
    AdamW {
        lr: f64,
        beta1: f64,
        beta2: f64,
        wd: f64,
        eps: f64,
        amsgrad: bool,
    },

    /// RMSProp optimizer.
    RmsProp {
        lr: f64,
        /// Decay of the moving average of squared gradients.
        alpha: f64,
        eps: f64,
        momentum: f64,
        centered: bool,
    },
}

impl OptimizerConfig {
    /// Constructs an optimizer.
    pub fn build(&self, vs: &VarStore) -> Result<Optimizer> {
        let opt = match &self {
            OptimizerConfig::Adam { lr } => Adam::default().build(vs, *lr)?,
            OptimizerConfig::AdamW {
                lr,
                beta1,
                beta2,
                wd,
                eps,
                amsgrad,
            } => AdamW {
                beta1: *beta1,
                beta2: *beta2,
                wd: *wd,
                eps: *eps,
                amsgrad: *amsgrad,
            }
            .build(vs, *lr)?,
            OptimizerConfig::RmsProp {
                lr,
                alpha,
                eps,
                momentum,
                centered,
            } => RmsProp {
                alpha: *alpha,
                eps: *eps,
                wd: 0.0,
                momentum: *momentum,
                centered: *centered,
            }
            .build(vs, *lr)?,
        };
        Ok(Optimizer { opt })
    }

    /// Learning rate.
    pub fn lr(&self) -> f64 {
        match self {
            Self::Adam { lr } => *lr,
            Self::AdamW { lr, .. } => *lr,
            Self::RmsProp { lr, .. } => *lr,
        }
    }

    /// Override learning rate.
    pub fn learning_rate(self, lr: f64) -> Self {
        match self {
            Self::Adam { .. } => Self::Adam { lr },
            Self::AdamW {
                beta1,
                beta2,
                wd,
                eps,
                amsgrad,
                ..
            } => Self::AdamW {
                lr,
                beta1,
                beta2,
                wd,
                eps,
                amsgrad,
            },
            Self::RmsProp {
                alpha,
                eps,
                momentum,
                centered,
                ..
            } => Self::RmsProp {
                lr,
                alpha,
                eps,
                momentum,
                centered,
            },
        }
    }
}

/// Optimizers.
///
/// This is a thin wrapper of [tch::nn::Optimizer] adding gradient clipping
/// schemes that need the variables of the network.
///
/// [tch::nn::Optimizer]: https://docs.rs/tch/0.16.0/tch/nn/struct.Optimizer.html
pub struct Optimizer {
    opt: Optimizer_,
}

impl Optimizer {
    /// Applies a backward step pass.
    pub fn backward_step(&mut self, loss: &Tensor) {
        self.opt.backward_step(loss);
    }

    /// Applies a backward step with gradients rescaled so that their global norm
    /// does not exceed `max_norm`.
    ///
    /// Returns the global norm of the gradients before clipping.
    pub fn backward_step_clip_global_norm(
        &mut self,
        vs: &VarStore,
        loss: &Tensor,
        max_norm: f64,
    ) -> f64 {
        self.opt.zero_grad();
        loss.backward();
        let norm = clip_global_norm(&vs.trainable_variables(), max_norm);
        self.opt.step();
        norm
    }

    /// Applies a backward step with each gradient clipped by its average norm.
    pub fn backward_step_clip_average_norm(&mut self, vs: &VarStore, loss: &Tensor, clip: f64) {
        self.opt.zero_grad();
        loss.backward();
        for var in vs.trainable_variables() {
            clip_average_norm(&var, clip);
        }
        self.opt.step();
    }

    /// Sets the learning rate.
    pub fn set_lr(&mut self, lr: f64) {
        self.opt.set_lr(lr);
    }
}
