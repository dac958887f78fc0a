use crate::lstm::{DilatedLstmState, LstmState};
use anyhow::Result;
use feudal_core::{FeudalError, Rollout};
use tch::{Device, Kind, Tensor};

/// Manager-space states and goals of the last steps, oldest first.
///
/// Goal sums and intrinsic rewards look back over the manager's horizon, so
/// the history is carried between consecutive calls of the network.
pub struct GoalHistory {
    /// Manager-space states `[1, d]`.
    pub states: Vec<Tensor>,

    /// Goals `[1, d]` emitted by the manager at the same steps as `states`.
    pub goals: Vec<Tensor>,

    /// Goals `[1, d]` the worker was conditioned on, randomised or not.
    pub acted: Vec<Tensor>,
}

impl GoalHistory {
    /// Empty history.
    pub fn new() -> Self {
        Self {
            states: vec![],
            goals: vec![],
            acted: vec![],
        }
    }

    /// Number of steps in the history.
    pub fn len(&self) -> usize {
        self.goals.len()
    }

    /// Returns `true` if the history has no steps.
    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    /// Appends rows of `states`, `goals` and `acted` (`[T, d]`) and keeps the
    /// last `horizon` steps.
    pub fn extend(&self, states: &Tensor, goals: &Tensor, acted: &Tensor, horizon: usize) -> Self {
        let n = states.size()[0];
        let mut states_ = self.states.clone_shallow();
        let mut goals_ = self.goals.clone_shallow();
        let mut acted_ = self.acted.clone_shallow();
        for t in 0..n {
            states_.push(states.narrow(0, t, 1).detach());
            goals_.push(goals.narrow(0, t, 1).detach());
            acted_.push(acted.narrow(0, t, 1).detach());
        }
        let skip = states_.len().saturating_sub(horizon);
        Self {
            states: states_.split_off(skip),
            goals: goals_.split_off(skip),
            acted: acted_.split_off(skip),
        }
    }

    /// History as `[h, d]` tensors of states, goals and acted goals, `None` if empty.
    pub(crate) fn stacked(&self) -> Option<(Tensor, Tensor, Tensor)> {
        if self.is_empty() {
            None
        } else {
            Some((
                Tensor::cat(&self.states, 0),
                Tensor::cat(&self.goals, 0),
                Tensor::cat(&self.acted, 0),
            ))
        }
    }
}

impl Default for GoalHistory {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for GoalHistory {
    fn clone(&self) -> Self {
        Self {
            states: self.states.clone_shallow(),
            goals: self.goals.clone_shallow(),
            acted: self.acted.clone_shallow(),
        }
    }
}

trait CloneShallow {
    fn clone_shallow(&self) -> Self;
}

impl CloneShallow for Vec<Tensor> {
    fn clone_shallow(&self) -> Self {
        self.iter().map(|t| t.shallow_clone()).collect()
    }
}

/// Recurrent state of the FeUdal network.
#[derive(Clone)]
pub struct FunState {
    pub manager: DilatedLstmState,
    pub worker: LstmState,
    pub history: GoalHistory,
}

impl FunState {
    /// Zero state with an empty history.
    pub fn zeros(manager_units: i64, worker_units: i64, device: Device) -> Self {
        Self {
            manager: DilatedLstmState::zeros(manager_units, device),
            worker: LstmState::zeros(worker_units, device),
            history: GoalHistory::new(),
        }
    }

    /// Cuts the state from the computation graph.
    pub fn detach(&self) -> Self {
        Self {
            manager: self.manager.detach(),
            worker: self.worker.detach(),
            history: self.history.clone(),
        }
    }
}

/// Outputs of the FeUdal network for `T` consecutive observations.
pub struct FunOutput {
    /// Perception encodings `[T, percept_dim]`.
    pub percept: Tensor,

    /// States in the manager's latent space `[T, d]`.
    pub m_space: Tensor,

    /// Outputs of the manager's dilated LSTM `[T, d]`.
    pub m_rnn: Tensor,

    /// Goals `[T, d]` the worker is conditioned on.
    pub goals: Tensor,

    /// Value estimates of the manager `[T]`.
    pub m_value: Tensor,

    /// Windowed sums of goals `[T, d]`, without gradient.
    pub sum_prev_goals: Tensor,

    /// Outputs of the worker's LSTM `[T, k * A]`.
    pub w_rnn: Tensor,

    /// Action probabilities `[T, A]`.
    pub policy: Tensor,

    /// Value estimates of the worker `[T]`.
    pub w_value: Tensor,

    /// Intrinsic rewards `[T]`, without gradient.
    pub intrinsic_rewards: Tensor,

    /// State after the last observation.
    pub state: FunState,
}

/// Training data of a FeUdal agent.
pub struct FunBatch {
    /// Observations `[T, C, H, W]`.
    pub obs: Tensor,

    /// Actions `[T]` of kind `Int64`.
    pub actions: Tensor,

    /// Extrinsic returns of the worker `[T]`.
    pub w_returns: Tensor,

    /// Returns of the manager `[T]`.
    pub m_returns: Tensor,

    /// State before the first observation.
    pub state: FunState,
}

impl FunBatch {
    /// Constructs a batch, checking that all columns have the length of `obs`.
    pub fn new(
        obs: Tensor,
        actions: &[i64],
        w_returns: &[f32],
        m_returns: &[f32],
        state: FunState,
    ) -> Result<Self> {
        let n = obs.size().first().copied().unwrap_or(0) as usize;
        if n == 0 {
            return Err(FeudalError::InvalidRollout("empty batch".to_string()).into());
        }
        if actions.len() != n || w_returns.len() != n || m_returns.len() != n {
            return Err(FeudalError::InvalidRollout(format!(
                "{} observations but {} actions, {} worker returns and {} manager returns",
                n,
                actions.len(),
                w_returns.len(),
                m_returns.len()
            ))
            .into());
        }
        let device = obs.device();
        Ok(Self {
            obs,
            actions: Tensor::from_slice(actions).to(device),
            w_returns: Tensor::from_slice(w_returns).to(device),
            m_returns: Tensor::from_slice(m_returns).to(device),
            state,
        })
    }

    /// Constructs a batch from a rollout of `[1, C, H, W]` observations.
    ///
    /// The discounted returns of the rollout are used for both the worker and the manager.
    pub fn from_rollout(rollout: &Rollout<Tensor>, n_actions: i64, state: FunState) -> Result<Self> {
        rollout.validate(n_actions)?;
        let obs = Tensor::cat(&rollout.observations(), 0).to_kind(Kind::Float);
        let returns = rollout.discounted_returns();
        Self::new(obs, &rollout.actions(), &returns, &returns, state)
    }

    /// Number of steps.
    pub fn len(&self) -> i64 {
        self.obs.size()[0]
    }

    /// Always `false`, empty batches are rejected on construction.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
