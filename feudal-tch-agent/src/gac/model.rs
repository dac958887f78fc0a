use super::{GacBatch, GacConfig};
use crate::{
    cnn::ConvEncoder,
    model::{ModelBase, SubModel},
    opt::Optimizer,
};
use anyhow::Result;
use log::{info, trace};
use std::path::Path;
use tch::{nn, nn::Module, Device, Kind, Tensor};

const EPS_POLICY: f64 = 1e-8;

/// Activations of the actor-critic network.
pub struct GacOutput {
    /// Activations of the convolution layers.
    pub feature_maps: Vec<Tensor>,

    /// Hidden layer `[batch, 32]`.
    pub hidden: Tensor,

    /// State values `[batch]`.
    pub value: Tensor,

    /// Action probabilities `[batch, A]`, shifted by `1e-8`.
    pub policy: Tensor,
}

/// Loss terms of the actor-critic network.
pub struct GacLosses {
    pub loss: Tensor,
    pub value_loss: Tensor,
    pub policy_loss: Tensor,
    pub entropy: Tensor,
}

/// Parameters of the actor-critic network and their optimizer.
pub struct GacModel {
    device: Device,
    var_store: nn::VarStore,
    config: GacConfig,
    trunk: ConvEncoder,
    value: nn::Linear,
    policy: nn::Linear,
    global_step: Tensor,
    opt: Optimizer,
}

impl GacModel {
    /// Builds the network with freshly initialized parameters.
    pub fn build(config: GacConfig, device: Device) -> Result<Self> {
        config.validate()?;
        let var_store = nn::VarStore::new(device);
        let root = var_store.root();

        let trunk = ConvEncoder::build(&(&root / "trunk"), config.encoder_config());
        let value = nn::linear(&root / "value", 32, 1, Default::default());
        let policy = nn::linear(&root / "policy", 32, config.nb_actions, Default::default());
        let global_step = root.zeros_no_train("global_step", &[]);
        let opt = config.opt_config.build(&var_store)?;
        info!(
            "Build GAC model with {} variables on {:?}",
            var_store.variables().len(),
            device
        );

        Ok(Self {
            device,
            var_store,
            config,
            trunk,
            value,
            policy,
            global_step,
            opt,
        })
    }

    pub fn config(&self) -> &GacConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Runs the network over observations `[batch, C, H, W]`.
    pub fn forward(&self, obs: &Tensor) -> GacOutput {
        let feature_maps = self.trunk.feature_maps(&obs.to(self.device));
        let hidden = match feature_maps.last() {
            Some(features) => self.trunk.head(features),
            None => self.trunk.head(&obs.to(self.device)),
        };
        let value = self.value.forward(&hidden).squeeze_dim(1);
        let policy = self.policy.forward(&hidden).softmax(1, Kind::Float) + EPS_POLICY;

        GacOutput {
            feature_maps,
            hidden,
            value,
            policy,
        }
    }

    /// Computes the loss terms on a batch.
    pub fn losses(&self, batch: &GacBatch) -> (GacOutput, GacLosses) {
        let out = self.forward(&batch.obs);
        let returns = batch.returns.to(self.device);
        let actions = batch.actions.to(self.device).unsqueeze(1);

        let value_loss = (&returns - &out.value).square().sum(Kind::Float);
        let entropy = -(&out.policy * out.policy.log()).sum(Kind::Float);
        let responsible = out.policy.gather(1, &actions, false).squeeze_dim(1);
        let advantages = &returns - out.value.detach();
        let policy_loss = -(responsible.log() * advantages).sum(Kind::Float);
        let loss =
            &value_loss * self.config.beta_v + &policy_loss - &entropy * self.config.beta_e;

        let losses = GacLosses {
            loss,
            value_loss,
            policy_loss,
            entropy,
        };
        (out, losses)
    }

    /// Applies a backward step with each gradient clipped by its average norm.
    pub fn backward_step_clipped(&mut self, loss: &Tensor) {
        let clip = self.config.gradient_clip_value;
        self.opt
            .backward_step_clip_average_norm(&self.var_store, loss, clip);
    }

    /// Number of episodes counted by [`increment_global_step`](Self::increment_global_step).
    pub fn global_step(&self) -> i64 {
        self.global_step.double_value(&[]) as i64
    }

    pub fn increment_global_step(&mut self) {
        tch::no_grad(|| {
            let _ = self.global_step.g_add_scalar_(1);
        });
    }
}

impl ModelBase for GacModel {
    fn backward_step(&mut self, loss: &Tensor) {
        self.opt.backward_step(loss);
    }

    fn get_var_store_mut(&mut self) -> &mut nn::VarStore {
        &mut self.var_store
    }

    fn get_var_store(&self) -> &nn::VarStore {
        &self.var_store
    }

    fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        self.var_store.save(&path)?;
        info!("Save GAC model to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load GAC model from {:?}", path.as_ref());
        Ok(())
    }
}
