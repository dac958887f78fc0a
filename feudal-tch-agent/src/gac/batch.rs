use anyhow::Result;
use feudal_core::Rollout;
use tch::{Kind, Tensor};

/// Training data of the actor-critic network.
pub struct GacBatch {
    /// Observations `[T, C, H, W]`.
    pub obs: Tensor,

    /// Actions `[T]` of kind `Int64`.
    pub actions: Tensor,

    /// Discounted returns `[T]`.
    pub returns: Tensor,
}

impl GacBatch {
    /// Stacks the observations, actions and discounted returns of a rollout.
    ///
    /// Observations are either `[C, H, W]` or `[1, C, H, W]`.
    pub fn from_rollout(rollout: &Rollout<Tensor>, n_actions: i64) -> Result<Self> {
        rollout.validate(n_actions)?;
        let obs = rollout
            .observations()
            .iter()
            .map(|o| match o.dim() {
                3 => o.unsqueeze(0),
                _ => o.shallow_clone(),
            })
            .collect::<Vec<_>>();
        let obs = Tensor::cat(&obs, 0).to_kind(Kind::Float);

        Ok(Self {
            obs,
            actions: Tensor::from_slice(&rollout.actions()),
            returns: Tensor::from_slice(&rollout.discounted_returns()),
        })
    }

    /// Number of transitions.
    pub fn len(&self) -> i64 {
        self.obs.size()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
