//! Configuration of the GA3C actor-critic network.
use crate::{
    cnn::{Activation, ConvEncoderConfig, ConvLayerConfig, Padding},
    opt::OptimizerConfig,
    Device,
};
use anyhow::Result;
use feudal_core::FeudalError;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::File,
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

/// Hyper-parameters of [`Gac`](super::Gac).
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct GacConfig {
    pub resized_height: i64,
    pub resized_width: i64,

    /// Number of stacked frames, the channels of the input.
    pub agent_history_length: i64,

    pub nb_actions: i64,

    /// Coefficient of the value loss.
    pub beta_v: f64,

    /// Coefficient of the entropy bonus.
    pub beta_e: f64,

    /// Bound of the average norm of each gradient.
    pub gradient_clip_value: f64,

    pub opt_config: OptimizerConfig,

    /// Directory of checkpoints.
    pub checkpoint_dir: Option<PathBuf>,

    /// Restores the latest checkpoint in `checkpoint_dir` on construction.
    pub resume: bool,

    /// Number of checkpoints kept in `checkpoint_dir`.
    pub max_to_keep: usize,

    #[serde(default)]
    pub device: Option<Device>,
}

impl Default for GacConfig {
    fn default() -> Self {
        Self {
            resized_height: 84,
            resized_width: 84,
            agent_history_length: 4,
            nb_actions: 4,
            beta_v: 0.5,
            beta_e: 0.01,
            gradient_clip_value: 40.0,
            opt_config: OptimizerConfig::RmsProp {
                lr: 7e-4,
                alpha: 0.99,
                eps: 0.1,
                momentum: 0.0,
                centered: false,
            },
            checkpoint_dir: None,
            resume: false,
            max_to_keep: 5,
            device: None,
        }
    }
}

impl GacConfig {
    /// Sets the shape `[channels, height, width]` of the input.
    pub fn input(mut self, channels: i64, height: i64, width: i64) -> Self {
        self.agent_history_length = channels;
        self.resized_height = height;
        self.resized_width = width;
        self
    }

    /// Sets the number of actions.
    pub fn nb_actions(mut self, v: i64) -> Self {
        self.nb_actions = v;
        self
    }

    /// Sets the coefficients of the value loss and the entropy bonus.
    pub fn loss_coefs(mut self, beta_v: f64, beta_e: f64) -> Self {
        self.beta_v = beta_v;
        self.beta_e = beta_e;
        self
    }

    /// Sets the bound of the average norm of gradients.
    pub fn gradient_clip_value(mut self, v: f64) -> Self {
        self.gradient_clip_value = v;
        self
    }

    /// Sets the learning rate.
    pub fn lr(mut self, lr: f64) -> Self {
        self.opt_config = self.opt_config.learning_rate(lr);
        self
    }

    /// Sets the optimizer.
    pub fn opt_config(mut self, v: OptimizerConfig) -> Self {
        self.opt_config = v;
        self
    }

    /// Sets the directory of checkpoints.
    pub fn checkpoint_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.checkpoint_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Restores the latest checkpoint on construction.
    pub fn resume(mut self, v: bool) -> Self {
        self.resume = v;
        self
    }

    /// Sets the device.
    pub fn device(mut self, device: tch::Device) -> Self {
        self.device = Some(device.into());
        self
    }

    /// Configuration of the convolutional trunk.
    pub fn encoder_config(&self) -> ConvEncoderConfig {
        ConvEncoderConfig::new(
            self.agent_history_length,
            self.resized_height,
            self.resized_width,
            32,
        )
        .layer(ConvLayerConfig::new(16, 5, 2, Padding::Same))
        .layer(ConvLayerConfig::new(32, 5, 2, Padding::Valid))
        .activation(Activation::Relu)
        .out_activation(Activation::Relu)
    }

    /// Checks that the input is large enough for the convolutions.
    pub fn validate(&self) -> Result<(), FeudalError> {
        if self.nb_actions <= 0 || self.agent_history_length <= 0 {
            return Err(FeudalError::InvalidConfig(
                "nb_actions and agent_history_length must be positive".to_string(),
            ));
        }
        let [_, h, w] = self.encoder_config().conv_out_shape();
        if h <= 0 || w <= 0 {
            return Err(FeudalError::InvalidConfig(format!(
                "input {}x{} is too small for the convolutions",
                self.resized_height, self.resized_width
            )));
        }
        if self.resume && self.checkpoint_dir.is_none() {
            return Err(FeudalError::InvalidConfig(
                "resume requires checkpoint_dir".to_string(),
            ));
        }
        Ok(())
    }

    /// Constructs [`GacConfig`] from YAML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path_ = path.as_ref().to_owned();
        let file = File::open(path)?;
        let rdr = BufReader::new(file);
        let b = serde_yaml::from_reader(rdr)?;
        info!("Load config of GAC agent from {:?}", path_);
        Ok(b)
    }

    /// Saves [`GacConfig`].
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path_ = path.as_ref().to_owned();
        let mut file = File::create(path)?;
        file.write_all(serde_yaml::to_string(&self)?.as_bytes())?;
        info!("Save config of GAC agent into {:?}", path_);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_serde_gac_config() -> Result<()> {
        let config = GacConfig::default().nb_actions(6).lr(1e-3).checkpoint_dir("ckpt");

        let dir = TempDir::new("gac_config")?;
        let path = dir.path().join("gac_config.yaml");
        config.save(&path)?;
        let config_ = GacConfig::load(&path)?;
        assert_eq!(config, config_);
        assert_eq!(config_.opt_config.lr(), 1e-3);
        Ok(())
    }

    #[test]
    fn test_validate() {
        assert!(GacConfig::default().validate().is_ok());
        assert_eq!(GacConfig::default().encoder_config().flat_dim(), 32 * 19 * 19);
        assert!(GacConfig::default().input(4, 8, 8).validate().is_err());
        assert!(GacConfig::default().resume(true).validate().is_err());
    }
}
