//! Convolutional encoders of image observations.
//!
//! Observations are `[batch, channels, height, width]` tensors of `f32`.
mod base;
mod config;
pub use base::ConvEncoder;
pub use config::{Activation, ConvEncoderConfig, ConvLayerConfig, Padding};
