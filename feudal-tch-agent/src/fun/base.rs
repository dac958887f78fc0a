//! FeUdal agent implemented with tch-rs.
use super::{FunBatch, FunConfig, FunModel, FunOutput, FunState};
use crate::{
    model::ModelBase,
    util::{
        activation_summary, global_norm, kernels_on_grid, sample_categorical, tensor_to_vec,
        NamedTensors,
    },
};
use anyhow::Result;
use feudal_core::{
    record::{Record, RecordValue},
    LinearSchedule, SyncModel,
};
use log::debug;
use std::{fs, path::Path};
use tch::{no_grad, Device, Kind, Tensor};

/// FeUdal agent.
pub struct Fun {
    model: FunModel,
    schedule: LinearSchedule,
    train: bool,
    n_opts: usize,
}

impl Fun {
    /// Constructs the agent.
    pub fn build(config: FunConfig) -> Result<Self> {
        let device = config.device.unwrap_or_default().into();
        let schedule = config.random_goal_schedule();
        let model = FunModel::build(config, device)?;

        Ok(Self {
            model,
            schedule,
            train: true,
            n_opts: 0,
        })
    }

    /// The network.
    pub fn model(&self) -> &FunModel {
        &self.model
    }

    /// Number of optimisation steps done so far.
    pub fn n_opts(&self) -> usize {
        self.n_opts
    }

    /// Recurrent state at the beginning of an episode.
    pub fn initial_state(&self) -> FunState {
        self.model.initial_state()
    }

    /// Samples an action for the last of the observations `[T, C, H, W]`.
    ///
    /// In training mode, the action is drawn from the policy and goals may be
    /// replaced with random ones. In evaluation mode, the most probable action
    /// is taken.
    pub fn sample(&mut self, obs: &Tensor, state: &FunState) -> Result<(i64, FunOutput)> {
        let out = no_grad(|| self.model.forward(obs, state, self.train));
        let n_steps = out.policy.size()[0];
        let probs = tensor_to_vec(&out.policy.narrow(0, n_steps - 1, 1))?;

        let act = if self.train {
            sample_categorical(&probs, fastrand::f32())
        } else {
            argmax(&probs)
        };
        Ok((act, out))
    }

    /// Performs an optimisation step on a batch.
    pub fn opt(&mut self, batch: &FunBatch) -> Result<Record> {
        let losses = self.model.losses(batch)?;
        let grad_norm = self.model.backward_step_clipped(&losses.loss);
        let var_norm = global_norm(&self.model.get_var_store().trainable_variables());
        self.n_opts += 1;

        let scalar = |t: &Tensor| RecordValue::Scalar(t.double_value(&[]) as f32);
        let record = Record::from_slice(&[
            ("loss", scalar(&losses.loss)),
            ("w_value_loss", scalar(&losses.w_value_loss)),
            ("w_policy_loss", scalar(&losses.w_policy_loss)),
            ("entropy", scalar(&losses.entropy)),
            ("m_value_loss", scalar(&losses.m_value_loss)),
            ("goals_loss", scalar(&losses.goals_loss)),
            ("intrinsic_reward", scalar(&losses.intrinsic_reward)),
            ("grad_norm", RecordValue::Scalar(grad_norm as f32)),
            ("var_norm", RecordValue::Scalar(var_norm as f32)),
            (
                "prob_of_random_goal",
                RecordValue::Scalar(self.model.prob_of_random_goal() as f32),
            ),
        ]);
        debug!(
            "opt {}: loss {:?}, grad_norm {}",
            self.n_opts,
            record.get_scalar("loss").ok(),
            grad_norm
        );
        Ok(record)
    }

    /// Histograms of activations, weights and gradients, the kernels of the
    /// first convolution and the first observation of the batch.
    ///
    /// Gradients are computed from the loss of the batch without updating the
    /// parameters.
    pub fn summaries(&mut self, batch: &FunBatch) -> Result<Record> {
        let mut record = Record::empty();

        let out = no_grad(|| self.model.forward(&batch.obs, &batch.state, false));
        for (name, t) in [
            ("percept", &out.percept),
            ("m_space", &out.m_space),
            ("manager/rnn", &out.m_rnn),
            ("manager/value", &out.m_value),
            ("worker/rnn", &out.w_rnn),
            ("worker/policy", &out.policy),
            ("worker/value", &out.w_value),
        ] {
            record.merge_inplace(activation_summary(name, t)?);
        }

        let losses = self.model.losses(batch)?;
        let vars = self.model.get_var_store().variables();
        for (_, v) in vars.iter() {
            let mut v = v.shallow_clone();
            v.zero_grad();
        }
        losses.loss.backward();
        for (name, v) in vars.iter().filter(|(_, v)| v.requires_grad()) {
            record.insert(
                format!("weights/{}", name),
                RecordValue::Array1(tensor_to_vec(v)?),
            );
            let g = v.grad();
            if g.defined() {
                record.insert(format!("grads/{}", name), RecordValue::Array1(tensor_to_vec(&g)?));
            }
        }
        for (_, v) in vars.iter() {
            let mut v = v.shallow_clone();
            v.zero_grad();
        }

        if let Some(kernels) = self.model.perception_kernels() {
            let (data, shape) = kernels_on_grid(kernels)?;
            record.insert("images/kernels", RecordValue::Array3(data, shape));
        }

        let input = batch.obs.narrow(0, 0, 1).squeeze_dim(0).to(Device::Cpu);
        let (c, h, w) = input.size3()?;
        let input = input.to_kind(Kind::Float).clamp(0.0, 1.0);
        record.insert(
            "images/input",
            RecordValue::Array3(tensor_to_vec(&input)?, [c as usize, h as usize, w as usize]),
        );

        Ok(record)
    }

    /// Lowers the probability of random goals by one step of the schedule.
    ///
    /// Returns the new probability.
    pub fn decay_random_goal_prob(&mut self) -> f64 {
        let p = self.model.prob_of_random_goal() - self.schedule.decrement();
        let p = p.max(self.schedule.last);
        self.model.set_prob_of_random_goal(p);
        p
    }

    /// Probability of replacing a goal with a random one.
    pub fn prob_of_random_goal(&self) -> f64 {
        self.model.prob_of_random_goal()
    }

    pub fn train(&mut self) {
        self.train = true;
    }

    pub fn eval(&mut self) {
        self.train = false;
    }

    pub fn is_train(&self) -> bool {
        self.train
    }

    /// Saves the parameters into `fun.pt` in the directory.
    pub fn save<T: AsRef<Path>>(&self, path: T) -> Result<()> {
        fs::create_dir_all(&path)?;
        self.model.save(path.as_ref().join("fun.pt").as_path())?;
        Ok(())
    }

    /// Loads the parameters from `fun.pt` in the directory.
    pub fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.model.load(path.as_ref().join("fun.pt").as_path())?;
        Ok(())
    }
}

impl SyncModel for Fun {
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

fn argmax(probs: &[f32]) -> i64 {
    probs
        .iter()
        .enumerate()
        .fold((0, f32::MIN), |(ix, max), (i, &p)| {
            if p > max {
                (i, p)
            } else {
                (ix, max)
            }
        })
        .0 as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.2, 0.5, 0.3]), 1);
        assert_eq!(argmax(&[0.4, 0.2, 0.4]), 0);
    }
}
