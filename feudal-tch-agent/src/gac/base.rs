//! GA3C agent implemented with tch-rs.
use super::{GacBatch, GacConfig, GacModel};
use crate::{
    model::ModelBase,
    util::{activation_summary, param_stats, NamedTensors},
};
use anyhow::Result;
use feudal_core::{
    record::{Record, RecordValue, Recorder},
    CheckpointManager, FeudalError, Rollout, SyncModel,
};
use log::{debug, info};
use std::path::PathBuf;
use tch::{no_grad, Tensor};

const MODEL_FILE: &str = "gac.pt";

/// Actor-critic agent of GA3C.
///
/// Trainers feed rollouts to one shared network; the network counts episodes
/// in a global step saved with its parameters.
pub struct Gac {
    model: GacModel,
    checkpoints: Option<CheckpointManager>,
    n_opts: usize,
}

impl Gac {
    /// Constructs the agent.
    ///
    /// If `resume` is set, the parameters are restored from the latest
    /// checkpoint in `checkpoint_dir`.
    pub fn build(config: GacConfig) -> Result<Self> {
        let device = config.device.unwrap_or_default().into();
        let checkpoints = config
            .checkpoint_dir
            .as_ref()
            .map(|dir| CheckpointManager::new(dir, config.max_to_keep));
        let resume = config.resume;
        let model = GacModel::build(config, device)?;

        let mut gac = Self {
            model,
            checkpoints,
            n_opts: 0,
        };

        if resume {
            let path = gac.checkpoint_manager()?.latest()?;
            info!("Loading model from {:?}", path);
            gac.model.load(path.join(MODEL_FILE))?;
        }

        Ok(gac)
    }

    fn checkpoint_manager(&self) -> Result<&CheckpointManager> {
        self.checkpoints.as_ref().ok_or_else(|| {
            FeudalError::InvalidConfig("checkpoint_dir is not set".to_string()).into()
        })
    }

    /// The network.
    pub fn model(&self) -> &GacModel {
        &self.model
    }

    /// Action probabilities `[batch, A]` and state values `[batch]` of observations
    /// `[batch, C, H, W]`.
    pub fn predict(&self, obs: &Tensor) -> (Tensor, Tensor) {
        no_grad(|| {
            let out = self.model.forward(obs);
            (out.policy, out.value)
        })
    }

    /// Performs an optimisation step on a rollout sent by a trainer.
    pub fn train(&mut self, rollout: &Rollout<Tensor>, trainer_id: usize) -> Result<Record> {
        let batch = GacBatch::from_rollout(rollout, self.model.config().nb_actions)?;
        let (_, losses) = self.model.losses(&batch);
        self.model.backward_step_clipped(&losses.loss);
        self.n_opts += 1;

        let loss = losses.loss.double_value(&[]) as f32;
        debug!("trainer {}: loss {}", trainer_id, loss);
        Ok(Record::from_slice(&[
            ("loss", RecordValue::Scalar(loss)),
            (
                "value_loss",
                RecordValue::Scalar(losses.value_loss.double_value(&[]) as f32),
            ),
            (
                "policy_loss",
                RecordValue::Scalar(losses.policy_loss.double_value(&[]) as f32),
            ),
            (
                "entropy",
                RecordValue::Scalar(losses.entropy.double_value(&[]) as f32),
            ),
            ("trainer_id", RecordValue::Scalar(trainer_id as f32)),
        ]))
    }

    /// Summaries of a rollout: histograms of the activations and the loss terms.
    pub fn summaries(&self, rollout: &Rollout<Tensor>) -> Result<Record> {
        let batch = GacBatch::from_rollout(rollout, self.model.config().nb_actions)?;
        let (out, losses) = no_grad(|| self.model.losses(&batch));

        let mut record = Record::empty();
        for (i, t) in out.feature_maps.iter().enumerate() {
            record.merge_inplace(activation_summary(&format!("conv{}", i + 1), t)?);
        }
        record.merge_inplace(activation_summary("hidden", &out.hidden)?);
        record.merge_inplace(activation_summary("value_function", &out.value)?);
        record.merge_inplace(activation_summary("policy", &out.policy)?);
        for (k, t) in [
            ("Losses/Value Loss", &losses.value_loss),
            ("Losses/Entropy", &losses.entropy),
            ("Losses/Policy Loss", &losses.policy_loss),
            ("Losses/Total Loss", &losses.loss),
        ] {
            record.insert(k, RecordValue::Scalar(t.double_value(&[]) as f32));
        }
        record.merge_inplace(param_stats(self.model.get_var_store()).with_prefix("Params"));
        Ok(record)
    }

    /// Writes the summaries of a rollout at the current global step.
    pub fn log<R: Recorder>(&self, rollout: &Rollout<Tensor>, recorder: &mut R) -> Result<()> {
        let mut record = self.summaries(rollout)?;
        record.insert("opt_steps", RecordValue::Scalar(self.global_step() as f32));
        recorder.write(record);
        Ok(())
    }

    pub fn increment_global_step(&mut self) {
        self.model.increment_global_step();
    }

    pub fn global_step(&self) -> i64 {
        self.model.global_step()
    }

    /// Saves the parameters into a checkpoint named by the global step.
    ///
    /// Returns the directory of the checkpoint.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        let step = self.global_step().max(0) as usize;
        let model = &self.model;
        self.checkpoint_manager()?
            .save(step, |dir| model.save(dir.join(MODEL_FILE)))
    }
}

impl SyncModel for Gac {
    type ModelInfo = NamedTensors;

    fn model_info(&self) -> (usize, Self::ModelInfo) {
        (
            self.n_opts,
            NamedTensors::copy_from(self.model.get_var_store()),
        )
    }

    fn sync_model(&mut self, model_info: &Self::ModelInfo) {
        let vs = self.model.get_var_store_mut();
        model_info.copy_to(vs);
    }
}
