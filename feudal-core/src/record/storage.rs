//! Aggregation of stored records.
use super::{Record, RecordValue};
use std::collections::HashSet;
use xxhash_rust::xxh3::Xxh3Builder;

/// Stores records and aggregates them on demand.
///
/// Scalars observed more than once are summarized by their min, max, mean and
/// median. For the other value types the most recent value is kept.
#[derive(Default)]
pub struct RecordStorage {
    data: Vec<Record>,
}

fn min(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().copied().fold(f32::INFINITY, f32::min))
}

fn max(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().copied().fold(f32::NEG_INFINITY, f32::max))
}

fn mean(vs: &[f32]) -> RecordValue {
    RecordValue::Scalar(vs.iter().sum::<f32>() / vs.len() as f32)
}

fn median(mut vs: Vec<f32>) -> RecordValue {
    vs.sort_by(|x, y| x.total_cmp(y));
    RecordValue::Scalar(vs[vs.len() / 2])
}

impl RecordStorage {
    /// Creates an empty storage.
    pub fn new() -> Self {
        Self { data: vec![] }
    }

    /// Stores a record.
    pub fn store(&mut self, record: Record) {
        self.data.push(record);
    }

    fn get_keys(&self) -> HashSet<String, Xxh3Builder> {
        let mut keys = HashSet::<String, Xxh3Builder>::default();
        for record in self.data.iter() {
            for k in record.keys() {
                keys.insert(k.clone());
            }
        }
        keys
    }

    // The most recent non-scalar value of the key.
    fn latest(&self, key: &str) -> Option<Record> {
        self.data
            .iter()
            .rev()
            .find_map(|record| record.get(key))
            .map(|value| Record::from_slice(&[(key, value.clone())]))
    }

    fn scalar(&self, key: &str) -> Record {
        let vs: Vec<f32> = self
            .data
            .iter()
            .filter_map(|record| match record.get(key) {
                Some(RecordValue::Scalar(v)) => Some(*v),
                _ => None,
            })
            .collect();

        match vs.len() {
            0 => Record::empty(),
            1 => Record::from_scalar(key, vs[0]),
            _ => Record::from_slice(&[
                (format!("{}_min", key), min(&vs)),
                (format!("{}_max", key), max(&vs)),
                (format!("{}_mean", key), mean(&vs)),
                (format!("{}_median", key), median(vs)),
            ]),
        }
    }

    /// Aggregates all stored records and clears the storage.
    pub fn aggregate(&mut self) -> Record {
        let mut record = Record::empty();

        for key in self.get_keys().iter() {
            let is_scalar = self
                .data
                .iter()
                .find_map(|r| r.get(key))
                .map_or(false, |v| matches!(v, RecordValue::Scalar(_)));
            let r = if is_scalar {
                self.scalar(key)
            } else {
                self.latest(key).unwrap_or_default()
            };
            record.merge_inplace(r);
        }

        self.data.clear();

        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_scalars() {
        let mut storage = RecordStorage::new();
        for v in [1.0f32, 4.0, 2.0] {
            storage.store(Record::from_scalar("loss", v));
        }
        storage.store(Record::from_scalar("grad_norm", 0.5));

        let record = storage.aggregate();
        assert_eq!(record.get_scalar("loss_min").unwrap(), 1.0);
        assert_eq!(record.get_scalar("loss_max").unwrap(), 4.0);
        assert!((record.get_scalar("loss_mean").unwrap() - 7.0 / 3.0).abs() < 1e-6);
        assert_eq!(record.get_scalar("loss_median").unwrap(), 2.0);
        assert_eq!(record.get_scalar("grad_norm").unwrap(), 0.5);

        // Storage is cleared
        assert!(storage.aggregate().is_empty());
    }

    #[test]
    fn test_aggregate_keeps_latest_array() {
        let mut storage = RecordStorage::new();
        storage.store(Record::from_slice(&[("goal", RecordValue::Array1(vec![1.0]))]));
        storage.store(Record::from_slice(&[("goal", RecordValue::Array1(vec![2.0]))]));

        let record = storage.aggregate();
        assert_eq!(record.get_array1("goal").unwrap(), vec![2.0]);
    }
}
