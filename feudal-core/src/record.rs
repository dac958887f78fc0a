//! Records of training metrics and the recorders consuming them.
//!
//! A [`Record`] is a bag of named values produced by an optimization step or
//! a summary pass of a network. Recorders decide where the values go:
//!
//! * [`NullRecorder`] discards everything,
//! * [`BufferedRecorder`] keeps records in memory,
//! * `TensorboardRecorder` in `feudal-tensorboard` writes event files.
//!
//! ```rust
//! use feudal_core::record::{Record, RecordValue};
//!
//! let mut record = Record::from_scalar("loss", 0.5);
//! record.insert("goals", RecordValue::Array1(vec![0.1, 0.2]));
//! assert_eq!(record.get_scalar("loss").unwrap(), 0.5);
//! ```
mod base;
mod buffered_recorder;
mod null_recorder;
mod recorder;
mod storage;

pub use base::{Record, RecordValue};
pub use buffered_recorder::BufferedRecorder;
pub use null_recorder::NullRecorder;
pub use recorder::{AggregateRecorder, Recorder};
pub use storage::RecordStorage;
