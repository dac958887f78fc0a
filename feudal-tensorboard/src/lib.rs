//! Writes records of the feudal agents into tensorboard event files.
use feudal_core::record::{AggregateRecorder, Record, RecordStorage, RecordValue, Recorder};
use log::warn;
use std::path::Path;
use tensorboard_rs::summary_writer::SummaryWriter;

const N_BUCKETS: usize = 30;

/// Write records to TFRecord.
///
/// The step of a written record is taken from the scalar with key `step_key`
/// (`opt_steps` by default).
pub struct TensorboardRecorder {
    writer: SummaryWriter,
    step_key: String,
    ignore_unsupported_value: bool,
    storage: RecordStorage,
}

impl TensorboardRecorder {
    /// Construct a [`TensorboardRecorder`].
    ///
    /// TFRecord will be stored in `logdir`.
    pub fn new<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            writer: SummaryWriter::new(logdir),
            step_key: "opt_steps".to_string(),
            ignore_unsupported_value: true,
            storage: RecordStorage::new(),
        }
    }

    /// Construct a [`TensorboardRecorder`] panicking on unsupported record values.
    pub fn new_with_check_unsupported_value<P: AsRef<Path>>(logdir: P) -> Self {
        Self {
            ignore_unsupported_value: false,
            ..Self::new(logdir)
        }
    }

    /// Sets the key of the step.
    pub fn step_key(mut self, key: impl Into<String>) -> Self {
        self.step_key = key.into();
        self
    }

    fn add_histogram(&mut self, tag: &str, data: &[f32], step: usize) {
        if data.is_empty() {
            return;
        }
        let (limits, counts) = histogram(data, N_BUCKETS);
        let min = data.iter().fold(f32::MAX, |m, v| v.min(m)) as f64;
        let max = data.iter().fold(f32::MIN, |m, v| v.max(m)) as f64;
        let sum = data.iter().map(|&v| v as f64).sum::<f64>();
        let sum_squares = data.iter().map(|&v| (v as f64) * (v as f64)).sum::<f64>();
        self.writer.add_histogram_raw(
            tag,
            min,
            max,
            data.len() as f64,
            sum,
            sum_squares,
            &limits,
            &counts,
            step,
        );
    }

    // Images are written as 8-bit RGB, gray scale images are replicated to 3 channels.
    fn add_image(&mut self, tag: &str, data: &[f32], shape: [usize; 3], step: usize) {
        let [c, h, w] = shape;
        let min = data.iter().fold(f32::MAX, |m, v| v.min(m));
        let scale = (data.iter().fold(f32::MIN, |m, v| v.max(m)) - min).max(f32::EPSILON);
        let pixels = data
            .iter()
            .map(|&e| ((e - min) / scale * 255f32) as u8)
            .collect::<Vec<_>>();
        let pixels = match c {
            3 => pixels,
            1 => pixels.repeat(3),
            _ => pixels[..h * w].repeat(3),
        };
        self.writer.add_image(tag, pixels.as_slice(), &[3, h, w], step);
    }
}

/// Bucket limits (upper edges) and counts of `data`.
fn histogram(data: &[f32], n_buckets: usize) -> (Vec<f64>, Vec<f64>) {
    let min = data.iter().fold(f32::MAX, |m, v| v.min(m)) as f64;
    let max = data.iter().fold(f32::MIN, |m, v| v.max(m)) as f64;
    let width = ((max - min) / n_buckets as f64).max(1e-12);
    let limits = (1..=n_buckets)
        .map(|i| min + width * i as f64)
        .collect::<Vec<_>>();
    let mut counts = vec![0f64; n_buckets];
    for &v in data {
        let ix = (((v as f64) - min) / width) as usize;
        counts[ix.min(n_buckets - 1)] += 1.0;
    }
    (limits, counts)
}

impl Recorder for TensorboardRecorder {
    /// Write a given [`Record`] into a TFRecord.
    ///
    /// Scalars are written as scalars, [`RecordValue::Array1`] as histograms and
    /// [`RecordValue::Array2`]/[`RecordValue::Array3`] as images.
    /// Records without the step key are dropped with a warning.
    fn write(&mut self, record: Record) {
        let step = match record.get(&self.step_key) {
            Some(RecordValue::Scalar(v)) => *v as usize,
            _ => {
                warn!("Record without scalar {} is dropped", self.step_key);
                return;
            }
        };

        for (k, v) in record.iter() {
            if *k == self.step_key {
                continue;
            }
            match v {
                RecordValue::Scalar(v) => self.writer.add_scalar(k, *v, step),
                RecordValue::DateTime(_) => {} // discard value
                RecordValue::Array1(data) => self.add_histogram(k, data, step),
                RecordValue::Array2(data, shape) => {
                    self.add_image(k, data, [1, shape[0], shape[1]], step)
                }
                RecordValue::Array3(data, shape) => self.add_image(k, data, *shape, step),
                RecordValue::String(_) => {
                    if !self.ignore_unsupported_value {
                        panic!("Unsupported value: {:?}", (k, v));
                    }
                }
            };
        }
        self.writer.flush();
    }
}

impl AggregateRecorder for TensorboardRecorder {
    fn store(&mut self, record: Record) {
        self.storage.store(record);
    }

    fn flush(&mut self, step: i64) {
        let mut record = self.storage.aggregate();
        record.insert(self.step_key.clone(), RecordValue::Scalar(step as _));
        self.write(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_histogram_buckets() {
        let (limits, counts) = histogram(&[0.0, 0.5, 1.0, 1.0], 2);
        assert_eq!(limits, vec![0.5, 1.0]);
        assert_eq!(counts, vec![1.0, 3.0]);
    }

    #[test]
    fn test_write_creates_event_file() {
        let tmp = TempDir::new("tensorboard").unwrap();
        let mut recorder = TensorboardRecorder::new(tmp.path());
        let mut record = Record::from_scalar("opt_steps", 3.0);
        record.insert("loss", RecordValue::Scalar(0.25));
        record.insert("goals", RecordValue::Array1(vec![0.1, -0.2, 0.3]));
        record.insert("kernels", RecordValue::Array3(vec![0.5; 12], [1, 3, 4]));
        recorder.write(record);

        let n_files = std::fs::read_dir(tmp.path()).unwrap().count();
        assert!(n_files > 0);
    }

    fn logdir_size(dir: &Path) -> u64 {
        std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().metadata().unwrap().len())
            .sum()
    }

    #[test]
    fn test_store_and_flush() {
        let tmp = TempDir::new("tensorboard").unwrap();
        let mut recorder = TensorboardRecorder::new(tmp.path());
        for v in [1.0f32, 4.0, 2.0] {
            let mut record = Record::from_scalar("loss", v);
            record.insert("goals", RecordValue::Array1(vec![v, -v]));
            recorder.store(record);
        }
        let before = logdir_size(tmp.path());

        // Stored records carry no step, the flush adds it
        recorder.flush(5);
        assert!(std::fs::read_dir(tmp.path()).unwrap().count() > 0);
        assert!(logdir_size(tmp.path()) > before);
    }
}
