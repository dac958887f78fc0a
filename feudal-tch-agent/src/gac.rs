//! Convolutional actor-critic network of GA3C.
mod base;
mod batch;
mod config;
mod model;
pub use base::Gac;
pub use batch::GacBatch;
pub use config::GacConfig;
pub use model::{GacLosses, GacModel, GacOutput};
