//! Transitions collected by a worker between two optimization steps.
use crate::error::FeudalError;

/// One interaction step of a worker with its environment.
///
/// `O` is the observation type, e.g. `tch::Tensor` of shape `[C, H, W]`.
#[derive(Debug, Clone)]
pub struct Transition<O> {
    /// Observation before the action.
    pub obs: O,

    /// Index of the discrete action taken.
    pub act: i64,

    /// Action probabilities of the policy at `obs`.
    pub pi: Vec<f32>,

    /// Extrinsic reward.
    pub reward: f32,

    /// Observation after the action.
    pub next_obs: O,

    /// Value estimate at `obs`.
    pub value: f32,

    /// Discounted return from `obs`, filled by [`Rollout::compute_returns`].
    pub discounted_return: f32,
}

/// A sequence of transitions of a single worker.
#[derive(Debug, Clone)]
pub struct Rollout<O> {
    transitions: Vec<Transition<O>>,
}

impl<O> Default for Rollout<O> {
    fn default() -> Self {
        Self {
            transitions: Vec::new(),
        }
    }
}

impl<O> Rollout<O> {
    /// Creates an empty rollout.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a transition.
    pub fn push(&mut self, transition: Transition<O>) {
        self.transitions.push(transition);
    }

    /// Number of transitions.
    pub fn len(&self) -> usize {
        self.transitions.len()
    }

    /// Returns `true` if the rollout has no transitions.
    pub fn is_empty(&self) -> bool {
        self.transitions.is_empty()
    }

    /// Returns the transitions.
    pub fn transitions(&self) -> &[Transition<O>] {
        &self.transitions
    }

    /// Clears the rollout, keeping its allocation.
    pub fn clear(&mut self) {
        self.transitions.clear();
    }

    /// Column of observations.
    pub fn observations(&self) -> Vec<&O> {
        self.transitions.iter().map(|t| &t.obs).collect()
    }

    /// Column of actions.
    pub fn actions(&self) -> Vec<i64> {
        self.transitions.iter().map(|t| t.act).collect()
    }

    /// Column of rewards.
    pub fn rewards(&self) -> Vec<f32> {
        self.transitions.iter().map(|t| t.reward).collect()
    }

    /// Column of value estimates.
    pub fn values(&self) -> Vec<f32> {
        self.transitions.iter().map(|t| t.value).collect()
    }

    /// Column of discounted returns.
    pub fn discounted_returns(&self) -> Vec<f32> {
        self.transitions.iter().map(|t| t.discounted_return).collect()
    }

    /// Fills `discounted_return` of every transition.
    ///
    /// `bootstrap` is the value estimate of the state following the last
    /// transition, `0` if the episode terminated.
    pub fn compute_returns(&mut self, gamma: f32, bootstrap: f32) {
        let returns = discount(&self.rewards(), gamma, bootstrap);
        for (t, r) in self.transitions.iter_mut().zip(returns) {
            t.discounted_return = r;
        }
    }

    /// Checks that the rollout can be fed to a network with `n_actions` actions.
    pub fn validate(&self, n_actions: i64) -> Result<(), FeudalError> {
        if self.is_empty() {
            return Err(FeudalError::InvalidRollout("empty rollout".to_string()));
        }
        if let Some(t) = self
            .transitions
            .iter()
            .find(|t| t.act < 0 || t.act >= n_actions)
        {
            return Err(FeudalError::InvalidRollout(format!(
                "action {} out of range 0..{}",
                t.act, n_actions
            )));
        }
        Ok(())
    }
}

/// Discounted cumulative sums of rewards.
///
/// `out[t] = r[t] + gamma * out[t + 1]` with `out[T] = bootstrap`.
pub fn discount(rewards: &[f32], gamma: f32, bootstrap: f32) -> Vec<f32> {
    let mut out = vec![0f32; rewards.len()];
    let mut acc = bootstrap;
    for (ix, r) in rewards.iter().enumerate().rev() {
        acc = r + gamma * acc;
        out[ix] = acc;
    }
    out
}
