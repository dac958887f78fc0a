use super::{FunBatch, FunConfig, FunOutput, FunState};
use crate::{
    cnn::ConvEncoder,
    lstm::{DilatedLstm, LayerNormLstm},
    model::{ModelBase, SubModel},
    opt::{Optimizer, OptimizerConfig},
    util::{l2_normalize, normalized_columns},
};
use anyhow::Result;
use feudal_core::discount;
use log::{info, trace};
use std::path::Path;
use tch::{nn, nn::Module, Device, Kind, Tensor};

const EPS_LOG: f64 = 1e-7;
const EPS_COS: f64 = 1e-8;

/// Loss terms of one optimisation step.
pub struct FunLosses {
    pub loss: Tensor,
    pub w_value_loss: Tensor,
    pub w_policy_loss: Tensor,
    pub entropy: Tensor,
    pub m_value_loss: Tensor,
    pub goals_loss: Tensor,
    pub intrinsic_reward: Tensor,
}

/// Parameters of the FeUdal network and their optimizer.
pub struct FunModel {
    device: Device,
    var_store: nn::VarStore,
    config: FunConfig,

    perception: ConvEncoder,
    m_space: nn::Linear,
    manager: DilatedLstm,
    m_value_w: Tensor,
    worker: LayerNormLstm,
    goal_emb: nn::Linear,
    w_value_w: Tensor,
    prob_of_random_goal: Tensor,

    opt: Optimizer,
}

impl FunModel {
    /// Builds the network with freshly initialized parameters.
    pub fn build(config: FunConfig, device: Device) -> Result<Self> {
        config.validate()?;
        let var_store = nn::VarStore::new(device);
        let root = var_store.root();
        let d = config.manager_state_dim;
        let k = config.goal_embedding_size;

        let perception = ConvEncoder::build(&(&root / "perception"), config.perception_config());
        let m_space = nn::linear(
            &root / "manager" / "space",
            config.percept_dim,
            d,
            Default::default(),
        );
        let manager = DilatedLstm::new(&(&root / "manager" / "lstm"), d, d, config.manager_horizon);
        let m_value_w = normalized_columns(&(&root / "manager"), "value", d, 1, 1.0);
        let worker = LayerNormLstm::new(
            &(&root / "worker" / "lstm"),
            config.percept_dim,
            config.worker_units(),
        );
        let goal_emb = nn::linear(&root / "worker" / "goal_emb", d, k, Default::default());
        let w_value_w =
            normalized_columns(&(&root / "worker"), "value", config.worker_units(), 1, 1.0);
        let mut prob_of_random_goal = root.zeros_no_train("prob_of_random_goal", &[]);
        tch::no_grad(|| {
            let _ = prob_of_random_goal.fill_(config.initial_random_goal_prob);
        });

        let opt = config.opt_config.build(&var_store)?;
        info!(
            "Build FUN model with {} variables on {:?}",
            var_store.variables().len(),
            device
        );

        Ok(Self {
            device,
            var_store,
            config,
            perception,
            m_space,
            manager,
            m_value_w,
            worker,
            goal_emb,
            w_value_w,
            prob_of_random_goal,
            opt,
        })
    }

    /// Hyper-parameters of the network.
    pub fn config(&self) -> &FunConfig {
        &self.config
    }

    pub fn device(&self) -> Device {
        self.device
    }

    /// Zero recurrent state with an empty goal history.
    pub fn initial_state(&self) -> FunState {
        FunState::zeros(
            self.config.manager_state_dim,
            self.config.worker_units(),
            self.device,
        )
    }

    /// Probability of replacing a goal with a random one.
    pub fn prob_of_random_goal(&self) -> f64 {
        self.prob_of_random_goal.double_value(&[])
    }

    /// Overwrites the probability of replacing a goal with a random one.
    pub fn set_prob_of_random_goal(&mut self, p: f64) {
        tch::no_grad(|| {
            let _ = self.prob_of_random_goal.fill_(p);
        });
    }

    /// Weights `[out, in, kh, kw]` of the first convolution of the perception.
    pub fn perception_kernels(&self) -> Option<&Tensor> {
        self.perception.first_kernels()
    }

    pub fn optimizer_config(&self) -> &OptimizerConfig {
        &self.config.opt_config
    }

    /// Runs the network over observations `[T, C, H, W]` starting at `state`.
    ///
    /// With `random_goals`, each goal is replaced with a standard normal vector
    /// with probability [`prob_of_random_goal`](Self::prob_of_random_goal).
    /// The worker is conditioned on the replaced goals while intrinsic rewards
    /// and the carried history keep the manager's own goals. Without
    /// `random_goals`, goal sums are computed from the manager's own goals,
    /// including those of the history.
    pub fn forward(&self, obs: &Tensor, state: &FunState, random_goals: bool) -> FunOutput {
        let c = self.config.manager_horizon;
        let n_actions = self.config.nb_actions;
        let k = self.config.goal_embedding_size;

        let percept = self.perception.forward(&obs.to(self.device));
        let m_space = self.m_space.forward(&percept).elu();
        let n_steps = m_space.size()[0];

        // Manager
        let (m_rnn, m_state) = self.manager.unroll(&m_space, &state.manager);
        let goals = l2_normalize(&m_rnn, 1);
        let m_value = m_rnn.matmul(&self.m_value_w).squeeze_dim(1);
        let acted = if random_goals {
            self.randomize_goals(&goals)
        } else {
            goals.shallow_clone()
        };

        // Goals and manager-space states preceded by the carried history
        let (states_all, goals_all, acted_all, n_hist) = match state.history.stacked() {
            Some((s, g, a)) => {
                let h = s.size()[0];
                (
                    Tensor::cat(&[s, m_space.detach()], 0),
                    Tensor::cat(&[g, goals.detach()], 0),
                    Tensor::cat(&[a, acted.detach()], 0),
                    h,
                )
            }
            None => (m_space.detach(), goals.detach(), acted.detach(), 0),
        };

        // Randomised goals steer acting only, rewards follow the manager's goals
        let sum_prev_goals = if random_goals {
            windowed_sum(&acted_all, n_hist, c)
        } else {
            windowed_sum(&goals_all, n_hist, c)
        };
        let intrinsic_rewards = intrinsic_rewards(&states_all, &goals_all, n_hist, c);

        // Worker
        let (w_rnn, w_state) = self.worker.unroll(&percept, &state.worker);
        let u = w_rnn.view([n_steps, n_actions, k]);
        let w = self.goal_emb.forward(&sum_prev_goals).relu();
        let logits = u.matmul(&w.unsqueeze(2)).squeeze_dim(2);
        let policy = logits.softmax(1, Kind::Float);
        let w_value = w_rnn.matmul(&self.w_value_w).squeeze_dim(1);

        let history = state
            .history
            .extend(&m_space, &goals, &acted, self.config.manager_horizon as usize);

        FunOutput {
            percept,
            m_space,
            m_rnn,
            goals: acted,
            m_value,
            sum_prev_goals,
            w_rnn,
            policy,
            w_value,
            intrinsic_rewards,
            state: FunState {
                manager: m_state,
                worker: w_state,
                history,
            },
        }
    }

    fn randomize_goals(&self, goals: &Tensor) -> Tensor {
        let p = self.prob_of_random_goal();
        if p <= 0.0 {
            return goals.shallow_clone();
        }
        let size = goals.size();
        let mask = Tensor::rand(&[size[0], 1], (Kind::Float, self.device)).lt(p);
        let random = Tensor::randn(&size, (Kind::Float, self.device));
        random.where_self(&mask, goals)
    }

    /// Computes the loss terms on a batch.
    pub fn losses(&self, batch: &FunBatch) -> Result<FunLosses> {
        let cfg = &self.config;
        let out = self.forward(&batch.obs, &batch.state, false);
        let n_steps = batch.len();

        // Manager: cosine between the goal and the state change over the horizon
        let ix = (0..n_steps)
            .map(|t| (t + cfg.manager_horizon).min(n_steps - 1))
            .collect::<Vec<_>>();
        let ix = Tensor::from_slice(&ix).to(self.device);
        let s_c = out.m_space.index_select(0, &ix);
        let s_diff = (s_c - &out.m_space).detach();
        let cos = Tensor::cosine_similarity(&s_diff, &out.goals, 1, EPS_COS);

        let m_returns = batch.m_returns.to(self.device);
        let m_advantages = &m_returns - out.m_value.detach();
        let goals_loss = (&m_advantages * (1.0f64 - cos)).sum(Kind::Float);
        let m_value_loss =
            (&m_returns - &out.m_value).square().sum(Kind::Float) * cfg.m_beta_v;

        // Worker: extrinsic return with discounted intrinsic return
        let intrinsic = Vec::<f32>::try_from(&out.intrinsic_rewards.to(Device::Cpu))?;
        let intrinsic_returns = discount(&intrinsic, cfg.w_gamma as f32, 0.0);
        let intrinsic_returns = Tensor::from_slice(&intrinsic_returns).to(self.device);
        let w_returns = batch.w_returns.to(self.device) + intrinsic_returns * cfg.alpha;
        let w_advantages = &w_returns - out.w_value.detach();
        let w_value_loss = (&w_returns - &out.w_value).square().sum(Kind::Float) * cfg.w_beta_v;

        let log_policy = (&out.policy + EPS_LOG).log();
        let entropy = -(&out.policy * &log_policy).sum(Kind::Float);
        let actions = batch.actions.to(self.device).unsqueeze(1);
        let log_pi_a = log_policy.gather(1, &actions, false).squeeze_dim(1);
        let w_policy_loss =
            -(log_pi_a * w_advantages).sum(Kind::Float) - &entropy * cfg.beta_e;

        let loss = &w_value_loss + &w_policy_loss + &m_value_loss + &goals_loss;

        Ok(FunLosses {
            loss,
            w_value_loss,
            w_policy_loss,
            entropy,
            m_value_loss,
            goals_loss,
            intrinsic_reward: out.intrinsic_rewards.mean(Kind::Float),
        })
    }

    /// Applies a backward step with gradients clipped by their global norm.
    ///
    /// Returns the global norm before clipping.
    pub fn backward_step_clipped(&mut self, loss: &Tensor) -> f64 {
        let max_norm = self.config.gradient_clip_value;
        self.opt
            .backward_step_clip_global_norm(&self.var_store, loss, max_norm)
    }
}

/// Sums of `goals[u]` for `u` in `max(t - c, 0)..=t`, for each of the rows after
/// the first `n_hist` ones.
pub(crate) fn windowed_sum(goals: &Tensor, n_hist: i64, c: i64) -> Tensor {
    let n = goals.size()[0];
    let zeros = goals.zeros_like().narrow(0, 0, 1);
    let cumsum = Tensor::cat(&[zeros, goals.cumsum(0, Kind::Float)], 0);
    let hi = (n_hist..n).map(|j| j + 1).collect::<Vec<_>>();
    let lo = (n_hist..n).map(|j| (j - c).max(0)).collect::<Vec<_>>();
    let hi = Tensor::from_slice(&hi).to(goals.device());
    let lo = Tensor::from_slice(&lo).to(goals.device());
    cumsum.index_select(0, &hi) - cumsum.index_select(0, &lo)
}

/// Intrinsic rewards `(1/c) sum_{i=1}^{c} cos(s_t - s_{t-i}, g_{t-i})` of the rows
/// after the first `n_hist` ones. Terms reaching before the first row are skipped.
pub(crate) fn intrinsic_rewards(states: &Tensor, goals: &Tensor, n_hist: i64, c: i64) -> Tensor {
    tch::no_grad(|| {
        let n = states.size()[0];
        let n_steps = n - n_hist;
        let mut rewards = Tensor::zeros(&[n_steps], (Kind::Float, states.device()));
        for i in 1..=c {
            let t0 = (i - n_hist).max(0);
            if t0 >= n_steps {
                break;
            }
            let len = n_steps - t0;
            let s = states.narrow(0, n_hist + t0, len);
            let s_prev = states.narrow(0, n_hist + t0 - i, len);
            let g_prev = goals.narrow(0, n_hist + t0 - i, len);
            let cos = Tensor::cosine_similarity(&(s - s_prev), &g_prev, 1, EPS_COS);
            let cos = if t0 > 0 {
                let pad = Tensor::zeros(&[t0], (Kind::Float, states.device()));
                Tensor::cat(&[pad, cos], 0)
            } else {
                cos
            };
            rewards += cos;
        }
        rewards / c as f64
    })
}

impl ModelBase for FunModel {
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
        info!("Save FUN model to {:?}", path.as_ref());
        let vs = self.var_store.variables();
        for (name, _) in vs.iter() {
            trace!("Save variable {}", name);
        }
        Ok(())
    }

    fn load<T: AsRef<Path>>(&mut self, path: T) -> Result<()> {
        self.var_store.load(&path)?;
        info!("Load FUN model from {:?}", path.as_ref());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn to_vec(t: &Tensor) -> Vec<f32> {
        Vec::<f32>::try_from(&t.flatten(0, -1)).unwrap()
    }

    #[test]
    fn test_windowed_sum() {
        let goals = Tensor::arange_start(1, 7, (Kind::Float, Device::Cpu)).view([6, 1]);

        // Two rows of history, window of c + 1 = 3 goals
        let sums = windowed_sum(&goals, 2, 2);
        assert_eq!(to_vec(&sums), vec![1. + 2. + 3., 2. + 3. + 4., 3. + 4. + 5., 4. + 5. + 6.]);

        let sums = windowed_sum(&goals, 0, 2);
        assert_eq!(to_vec(&sums)[..3], [1., 3., 6.]);
    }

    #[test]
    fn test_intrinsic_rewards_of_aligned_goals() {
        // States move along the first axis, goals point along it
        let states = Tensor::from_slice(&[0f32, 0., 1., 0., 2., 0., 3., 0.]).view([4, 2]);
        let goals = Tensor::from_slice(&[1f32, 0.]).view([1, 2]).repeat([4, 1]);
        let rewards = to_vec(&intrinsic_rewards(&states, &goals, 0, 2));
        assert_eq!(rewards.len(), 4);
        assert_eq!(rewards[0], 0.0);
        assert!((rewards[1] - 0.5).abs() < 1e-6);
        assert!((rewards[2] - 1.0).abs() < 1e-6);
        assert!((rewards[3] - 1.0).abs() < 1e-6);

        // Opposite goals give negative rewards
        let rewards = to_vec(&intrinsic_rewards(&states, &(-goals), 1, 2));
        assert!(rewards.iter().all(|&r| r < 0.0 && r >= -1.0 - 1e-6));
    }
}
