//! FeUdal network.
//!
//! A perception encoder feeds two recurrent policies. The manager runs a
//! dilated LSTM in a latent state space and emits unit-norm goals. The worker
//! runs a layer-normalized LSTM producing one embedding per action, and its
//! policy scores these embeddings against a projection of the goals emitted
//! over the manager's horizon. Besides the extrinsic return, the worker is
//! trained on an intrinsic reward measuring how well the latent state moved
//! in the direction of past goals.
mod base;
mod batch;
mod config;
mod model;
pub use base::Fun;
pub use batch::{FunBatch, FunOutput, FunState, GoalHistory};
pub use config::FunConfig;
pub use model::{FunLosses, FunModel};
