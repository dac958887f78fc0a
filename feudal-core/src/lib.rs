#![warn(missing_docs)]
//! Backend-independent building blocks of the feudal agents.
//!
//! * [`record`] - key-value records and recorders used for logging training metrics.
//! * [`rollout`] - transitions collected by workers and the discounting helpers.
//! * [`schedule`] - schedules of exploration parameters.
//! * [`checkpoint`] - rotation of model checkpoints in a directory.
pub mod checkpoint;
pub mod error;
pub mod record;
pub mod rollout;
pub mod schedule;

pub use checkpoint::CheckpointManager;
pub use error::FeudalError;
pub use rollout::{discount, Rollout, Transition};
pub use schedule::LinearSchedule;

/// Parameter synchronization between a learner network and its local copies.
///
/// Workers act with local copies of a shared network. After the learner
/// performs optimization steps, workers pull the latest parameters.
pub trait SyncModel {
    /// Information of the model used for synchronization.
    type ModelInfo: Clone;

    /// Returns the number of optimization steps and a snapshot of the parameters.
    fn model_info(&self) -> (usize, Self::ModelInfo);

    /// Overwrites the parameters with the given snapshot.
    fn sync_model(&mut self, model_info: &Self::ModelInfo);
}
