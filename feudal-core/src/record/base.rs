//! Base implementation of records for logging.
use crate::error::FeudalError;
use chrono::prelude::{DateTime, Local};
use std::collections::{
    hash_map::{IntoIter, Iter, Keys},
    HashMap,
};

/// Represents possible types of values that can be stored in a [`Record`].
#[derive(Debug, Clone)]
pub enum RecordValue {
    /// A single floating-point value, typically a loss or a norm.
    Scalar(f32),

    /// A timestamp with local timezone.
    DateTime(DateTime<Local>),

    /// A 1-dimensional array, written as a histogram by tensorboard recorders.
    Array1(Vec<f32>),

    /// A 2-dimensional array with its shape `[height, width]`.
    Array2(Vec<f32>, [usize; 2]),

    /// A 3-dimensional array with its shape `[channels, height, width]`.
    Array3(Vec<f32>, [usize; 3]),

    /// A text value.
    String(String),
}

/// A container of key-value pairs of various data types.
#[derive(Debug, Default)]
pub struct Record(HashMap<String, RecordValue>);

impl Record {
    /// Creates an empty record.
    pub fn empty() -> Self {
        Self(HashMap::new())
    }

    /// Creates a record containing a single scalar value.
    pub fn from_scalar(name: impl Into<String>, value: f32) -> Self {
        Self(HashMap::from([(name.into(), RecordValue::Scalar(value))]))
    }

    /// Creates a record from a slice of key-value pairs.
    pub fn from_slice<K: Into<String> + Clone>(s: &[(K, RecordValue)]) -> Self {
        Self(
            s.iter()
                .map(|(k, v)| (k.clone().into(), v.clone()))
                .collect(),
        )
    }

    /// Returns an iterator over the keys in the record.
    pub fn keys(&self) -> Keys<String, RecordValue> {
        self.0.keys()
    }

    /// Inserts a key-value pair into the record.
    pub fn insert(&mut self, k: impl Into<String>, v: RecordValue) {
        self.0.insert(k.into(), v);
    }

    /// Returns an iterator over the key-value pairs in the record.
    pub fn iter(&self) -> Iter<'_, String, RecordValue> {
        self.0.iter()
    }

    /// Returns an iterator that consumes the record.
    pub fn into_iter_in_record(self) -> IntoIter<String, RecordValue> {
        self.0.into_iter()
    }

    /// Gets a reference to the value associated with the given key.
    pub fn get(&self, k: &str) -> Option<&RecordValue> {
        self.0.get(k)
    }

    /// Returns the number of entries.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Checks if the record is empty.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Merges two records, consuming both.
    ///
    /// Values of `record` overwrite values of `self` with the same key.
    pub fn merge(self, record: Record) -> Self {
        Record(self.0.into_iter().chain(record.0).collect())
    }

    /// Merges another record into this one in place.
    pub fn merge_inplace(&mut self, record: Record) {
        self.0.extend(record.0);
    }

    /// Gets a scalar value from the record.
    pub fn get_scalar(&self, k: &str) -> Result<f32, FeudalError> {
        match self.0.get(k) {
            Some(RecordValue::Scalar(v)) => Ok(*v),
            Some(_) => Err(FeudalError::RecordValueTypeError("Scalar".to_string())),
            None => Err(FeudalError::RecordKeyError(k.to_string())),
        }
    }

    /// Gets a 1-dimensional array from the record.
    pub fn get_array1(&self, k: &str) -> Result<Vec<f32>, FeudalError> {
        match self.0.get(k) {
            Some(RecordValue::Array1(v)) => Ok(v.clone()),
            Some(_) => Err(FeudalError::RecordValueTypeError("Array1".to_string())),
            None => Err(FeudalError::RecordKeyError(k.to_string())),
        }
    }

    /// Gets a 2-dimensional array and its shape from the record.
    pub fn get_array2(&self, k: &str) -> Result<(Vec<f32>, [usize; 2]), FeudalError> {
        match self.0.get(k) {
            Some(RecordValue::Array2(v, s)) => Ok((v.clone(), *s)),
            Some(_) => Err(FeudalError::RecordValueTypeError("Array2".to_string())),
            None => Err(FeudalError::RecordKeyError(k.to_string())),
        }
    }

    /// Gets a 3-dimensional array and its shape from the record.
    pub fn get_array3(&self, k: &str) -> Result<(Vec<f32>, [usize; 3]), FeudalError> {
        match self.0.get(k) {
            Some(RecordValue::Array3(v, s)) => Ok((v.clone(), *s)),
            Some(_) => Err(FeudalError::RecordValueTypeError("Array3".to_string())),
            None => Err(FeudalError::RecordKeyError(k.to_string())),
        }
    }

    /// Gets a string value from the record.
    pub fn get_string(&self, k: &str) -> Result<String, FeudalError> {
        match self.0.get(k) {
            Some(RecordValue::String(s)) => Ok(s.clone()),
            Some(_) => Err(FeudalError::RecordValueTypeError("String".to_string())),
            None => Err(FeudalError::RecordKeyError(k.to_string())),
        }
    }

    /// Prefixes every key with `prefix/`.
    ///
    /// Used to group summaries of the manager and the worker in tensorboard.
    pub fn with_prefix(self, prefix: &str) -> Self {
        Record(
            self.0
                .into_iter()
                .map(|(k, v)| (format!("{}/{}", prefix, k), v))
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get_typed_values() {
        let mut record = Record::from_scalar("loss", 1.5);
        record.insert("name", RecordValue::String("fun".into()));

        assert_eq!(record.get_scalar("loss").unwrap(), 1.5);
        assert_eq!(record.get_string("name").unwrap(), "fun");
        assert!(matches!(
            record.get_scalar("name"),
            Err(FeudalError::RecordValueTypeError(_))
        ));
        assert!(matches!(
            record.get_array1("missing"),
            Err(FeudalError::RecordKeyError(_))
        ));
    }

    #[test]
    fn test_merge_and_prefix() {
        let r1 = Record::from_scalar("a", 1.0);
        let r2 = Record::from_slice(&[("a", RecordValue::Scalar(2.0)), ("b", RecordValue::Scalar(3.0))]);
        let merged = r1.merge(r2).with_prefix("worker");

        assert_eq!(merged.len(), 2);
        assert_eq!(merged.get_scalar("worker/a").unwrap(), 2.0);
        assert_eq!(merged.get_scalar("worker/b").unwrap(), 3.0);
    }
}
