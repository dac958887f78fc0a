//! Configuration of the FeUdal network.
use crate::{
    cnn::{Activation, ConvEncoderConfig, ConvLayerConfig, Padding},
    opt::OptimizerConfig,
    Device,
};
use anyhow::Result;
use feudal_core::{FeudalError, LinearSchedule};
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::Path,
};

/// Hyper-parameters of [`Fun`](super::Fun).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct FunConfig {
    /// Height and width of the observed image.
    pub game_size: i64,

    /// Channels of the observed image.
    pub game_channels: i64,

    pub nb_actions: i64,

    /// Dimension of the perception encoding.
    pub percept_dim: i64,

    /// Dimension of the manager's state space and of its goals.
    pub manager_state_dim: i64,

    /// Horizon `c` of the manager, also the dilation of its LSTM.
    pub manager_horizon: i64,

    /// Dimension `k` of the goal embedding of the worker.
    pub goal_embedding_size: i64,

    pub initial_random_goal_prob: f64,
    pub final_random_goal_prob: f64,

    /// Number of decay steps from the initial to the final random goal probability.
    pub explore_steps: usize,

    /// Coefficient of the manager's value loss.
    pub m_beta_v: f64,

    /// Coefficient of the worker's value loss.
    pub w_beta_v: f64,

    /// Discount factor of intrinsic rewards.
    pub w_gamma: f64,

    /// Weight of the intrinsic return in the worker's return.
    pub alpha: f64,

    /// Coefficient of the entropy bonus.
    pub beta_e: f64,

    /// Maximum global norm of the gradients.
    pub gradient_clip_value: f64,

    pub opt_config: OptimizerConfig,

    #[serde(default)]
    pub device: Option<Device>,
}

impl Default for FunConfig {
    fn default() -> Self {
        Self {
            game_size: 13,
            game_channels: 3,
            nb_actions: 4,
            percept_dim: 48,
            manager_state_dim: 48,
            manager_horizon: 8,
            goal_embedding_size: 16,
            initial_random_goal_prob: 0.5,
            final_random_goal_prob: 0.01,
            explore_steps: 100_000,
            m_beta_v: 0.5,
            w_beta_v: 0.5,
            w_gamma: 0.95,
            alpha: 0.5,
            beta_e: 0.01,
            gradient_clip_value: 40.0,
            opt_config: OptimizerConfig::Adam { lr: 1e-4 },
            device: None,
        }
    }
}

impl FunConfig {
    /// Sets the size and channels of the observed image.
    pub fn game(mut self, size: i64, channels: i64) -> Self {
        self.game_size = size;
        self.game_channels = channels;
        self
    }

    /// Sets the number of actions.
    pub fn nb_actions(mut self, v: i64) -> Self {
        self.nb_actions = v;
        self
    }

    /// Sets the manager's state dimension and horizon.
    pub fn manager(mut self, state_dim: i64, horizon: i64) -> Self {
        self.manager_state_dim = state_dim;
        self.manager_horizon = horizon;
        self
    }

    /// Sets the dimension of the goal embedding.
    pub fn goal_embedding_size(mut self, v: i64) -> Self {
        self.goal_embedding_size = v;
        self
    }

    /// Sets the schedule of the random goal probability.
    pub fn random_goal_prob(mut self, initial: f64, last: f64, explore_steps: usize) -> Self {
        self.initial_random_goal_prob = initial;
        self.final_random_goal_prob = last;
        self.explore_steps = explore_steps;
        self
    }

    /// Sets the intrinsic reward weight and discount factor.
    pub fn intrinsic(mut self, alpha: f64, w_gamma: f64) -> Self {
        self.alpha = alpha;
        self.w_gamma = w_gamma;
        self
    }

    /// Sets the coefficient of the entropy bonus.
    pub fn beta_e(mut self, v: f64) -> Self {
        self.beta_e = v;
        self
    }

    /// Sets the maximum global norm of the gradients.
    pub fn gradient_clip_value(mut self, v: f64) -> Self {
        self.gradient_clip_value = v;
        self
    }

    /// Sets the optimizer.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, device: tch::Device) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Number of units of the worker's LSTM.
    pub fn worker_units(&self) -> i64 {
        self.goal_embedding_size * self.nb_actions
    }

    /// Schedule of the probability of replacing a goal with a random one.
    pub fn random_goal_schedule(&self) -> LinearSchedule {
        LinearSchedule::new(
            self.initial_random_goal_prob,
            self.final_random_goal_prob,
            self.explore_steps,
        )
    }

    /// Configuration of the perception encoder.
    pub fn perception_config(&self) -> ConvEncoderConfig {
        ConvEncoderConfig::new(
            self.game_channels,
            self.game_size,
            self.game_size,
            self.percept_dim,
        )
        .layer(ConvLayerConfig::new(32, 5, 2, Padding::Same))
        .activation(Activation::Elu)
        .out_activation(Activation::Elu)
    }

    /// Checks the shape contracts between the hyper-parameters.
    pub fn validate(&self) -> Result<(), FeudalError> {
        let positive = [
            ("game_size", self.game_size),
            ("game_channels", self.game_channels),
            ("nb_actions", self.nb_actions),
            ("percept_dim", self.percept_dim),
            ("manager_state_dim", self.manager_state_dim),
            ("manager_horizon", self.manager_horizon),
            ("goal_embedding_size", self.goal_embedding_size),
        ];
        if let Some((name, v)) = positive.iter().find(|(_, v)| *v <= 0) {
            return Err(FeudalError::InvalidConfig(format!(
                "{} must be positive, got {}",
                name, v
            )));
        }
        if self.manager_state_dim % self.manager_horizon != 0 {
            return Err(FeudalError::InvalidConfig(format!(
                "manager_state_dim ({}) must be a multiple of manager_horizon ({})",
                self.manager_state_dim, self.manager_horizon
            )));
        }
        let (p0, p1) = (self.initial_random_goal_prob, self.final_random_goal_prob);
        if !(0.0 <= p1 && p1 <= p0 && p0 <= 1.0) {
            return Err(FeudalError::InvalidConfig(format!(
                "random goal probabilities must satisfy 0 <= final ({}) <= initial ({}) <= 1",
                p1, p0
            )));
        }
        Ok(())
    }

    /// Constructs [`FunConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of FUN agent from {:?}", path_);
        Ok(b)
    }

    /// Saves [`FunConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of FUN agent into {:?}", path_);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_fun_config() -> Result<()> {
        let config = FunConfig::default()
            .game(9, 1)
            .nb_actions(5)
            .opt_config(OptimizerConfig::RmsProp {
                lr: 7e-4,
                alpha: 0.99,
                eps: 0.1,
                momentum: 0.0,
                centered: false,
            });

        let dir = TempDir::new("fun_config")?;
        let path = dir.path().join("fun_config.yaml");
        config.save(&path)?;
        let config_ = FunConfig::load(&path)?;
        assert_eq!(config, config_);
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(FunConfig::default().validate().is_ok());
        assert_eq!(FunConfig::default().worker_units(), 64);
        assert!(FunConfig::default().manager(48, 10).validate().is_err());
        assert!(FunConfig::default().nb_actions(0).validate().is_err());
        assert!(FunConfig::default()
            .random_goal_prob(0.1, 0.5, 10)
            .validate()
            .is_err());
    }
}
