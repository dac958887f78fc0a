//! Feudal and actor-critic networks implemented with [tch](https://crates.io/crates/tch).
//!
//! * [`fun`] - FeUdal network: a manager emitting goals with a dilated LSTM and
//!   a worker acting on the sum of recent goals.
//! * [`gac`] - convolutional actor-critic network of GA3C.
pub mod cnn;
pub mod fun;
pub mod gac;
pub mod lstm;
pub mod model;
pub mod opt;
pub mod util;
use serde::{Deserialize, Serialize};

/// Device for using tch-rs.
///
/// This enum is added because [`tch::Device`] does not support serialization.
#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq)]
pub enum Device {
    /// The main CPU device.
    Cpu,

    /// The main GPU device.
    Cuda(usize),

    /// The first GPU if available, CPU otherwise.
    CudaIfAvailable,
}

impl Default for Device {
    fn default() -> Self {
        Self::CudaIfAvailable
    }
}

impl From<tch::Device> for Device {
    fn from(device: tch::Device) -> Self {
        match device {
            tch::Device::Cuda(n) => Self::Cuda(n),
            _ => Self::Cpu,
        }
    }
}

impl From<Device> for tch::Device {
    fn from(device: Device) -> Self {
        match device {
            Device::Cpu => tch::Device::Cpu,
            Device::Cuda(n) => tch::Device::Cuda(n),
            Device::CudaIfAvailable => tch::Device::cuda_if_available(),
        }
    }
}
