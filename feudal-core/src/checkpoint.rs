//! Rotation of model checkpoints.
use crate::error::FeudalError;
use anyhow::Result;
use log::info;
use serde::{Deserialize, Serialize};
use std::{
    fs::{self, File},
    io::{BufReader, Write},
    path::{Path, PathBuf},
};

const INDEX_FILE: &str = "checkpoint.yaml";

/// Index of the checkpoints in a directory, stored as `checkpoint.yaml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq)]
pub struct CheckpointIndex {
    /// Directory of the most recent checkpoint.
    pub model_checkpoint_path: Option<PathBuf>,

    /// All checkpoints kept, oldest first.
    pub all_model_checkpoint_paths: Vec<PathBuf>,
}

/// Saves checkpoints into step-numbered subdirectories and keeps the most recent ones.
pub struct CheckpointManager {
    dir: PathBuf,
    max_to_keep: usize,
}

impl CheckpointManager {
    /// Constructs a manager of checkpoints in `dir`.
    ///
    /// `max_to_keep = 0` keeps every checkpoint.
    pub fn new(dir: impl AsRef<Path>, max_to_keep: usize) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            max_to_keep,
        }
    }

    /// The directory of the checkpoints.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Reads the index, empty if it does not exist yet.
    pub fn index(&self) -> Result<CheckpointIndex> {
        let path = self.dir.join(INDEX_FILE);
        if !path.exists() {
            return Ok(CheckpointIndex::default());
        }
        let rdr = BufReader::new(File::open(path)?);
        Ok(serde_yaml::from_reader(rdr)?)
    }

    fn write_index(&self, index: &CheckpointIndex) -> Result<()> {
        let mut file = File::create(self.dir.join(INDEX_FILE))?;
        file.write_all(serde_yaml::to_string(index)?.as_bytes())?;
        Ok(())
    }

    /// Creates the directory of the checkpoint at `step`, fills it with `save`
    /// and removes checkpoints exceeding `max_to_keep`.
    pub fn save<F>(&self, step: usize, save: F) -> Result<PathBuf>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let path = self.dir.join(format!("{}", step));
        fs::create_dir_all(&path)?;
        save(&path)?;

        let mut index = self.index()?;
        index.all_model_checkpoint_paths.retain(|p| p != &path);
        index.all_model_checkpoint_paths.push(path.clone());
        index.model_checkpoint_path = Some(path.clone());

        if self.max_to_keep > 0 {
            while index.all_model_checkpoint_paths.len() > self.max_to_keep {
                let old = index.all_model_checkpoint_paths.remove(0);
                if old.exists() {
                    fs::remove_dir_all(&old)?;
                }
                info!("Remove old checkpoint {:?}", old);
            }
        }

        self.write_index(&index)?;
        info!("Save checkpoint to {:?}", path);
        Ok(path)
    }

    /// The directory of the most recent checkpoint.
    pub fn latest(&self) -> Result<PathBuf> {
        self.index()?
            .model_checkpoint_path
            .ok_or_else(|| FeudalError::CheckpointNotFound(format!("{:?}", self.dir)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempdir::TempDir;

    #[test]
    fn test_rotation() -> Result<()> {
        let tmp = TempDir::new("checkpoint")?;
        let manager = CheckpointManager::new(tmp.path(), 2);
        assert!(manager.latest().is_err());

        for step in [10, 20, 30] {
            manager.save(step, |p| {
                fs::write(p.join("model.pt"), b"params")?;
                Ok(())
            })?;
        }

        let index = manager.index()?;
        assert_eq!(manager.latest()?, tmp.path().join("30"));
        assert_eq!(
            index.all_model_checkpoint_paths,
            vec![tmp.path().join("20"), tmp.path().join("30")]
        );
        assert!(!tmp.path().join("10").exists());
        assert!(tmp.path().join("20").join("model.pt").exists());
        Ok(())
    }
}
