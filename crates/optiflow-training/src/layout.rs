use crate::error::TrainingResult;
use std::path::{Path, PathBuf};

/// Filesystem layout of a training work directory.
///
/// Text logs and JSON log metadata of one run are named after the same run
/// timestamp: `<work_dir>/<timestamp>.log` and `<work_dir>/<timestamp>.log.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkDirLayout {
    root: PathBuf,
}

impl WorkDirLayout {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    #[must_use]
    pub fn log_file(&self, timestamp: &str) -> PathBuf {
        self.root.join(format!("{timestamp}.log"))
    }

    #[must_use]
    pub fn log_json_file(&self, timestamp: &str) -> PathBuf {
        self.root.join(format!("{timestamp}.log.json"))
    }

    pub fn ensure(&self) -> TrainingResult<()> {
        std::fs::create_dir_all(&self.root)?;
        Ok(())
    }
}
