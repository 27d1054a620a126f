//! On-disk layout of one run's working directory

use crate::TimeStep;
use std::path::{Path, PathBuf};

/// Deterministic, time-indexed artifact paths under a run directory
///
/// ```text
/// <root>/delay/<t>.npy      adjacency matrix for step t
/// <root>/position/<t>.txt   satellite positions for step t
/// <root>/mid_files/         intermediate files (requests, batches)
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn delay_dir(&self) -> PathBuf {
        self.root.join("delay")
    }

    pub fn position_dir(&self) -> PathBuf {
        self.root.join("position")
    }

    pub fn mid_files_dir(&self) -> PathBuf {
        self.root.join("mid_files")
    }

    pub fn delay_path(&self, t: TimeStep) -> PathBuf {
        self.delay_dir().join(format!("{}.npy", t))
    }

    pub fn position_path(&self, t: TimeStep) -> PathBuf {
        self.position_dir().join(format!("{}.txt", t))
    }

    /// Artifacts expected for `[0, duration)` that do not exist yet
    pub fn missing_artifacts(&self, duration: TimeStep) -> Vec<PathBuf> {
        (0..duration)
            .flat_map(|t| [self.delay_path(t), self.position_path(t)])
            .filter(|p| !p.is_file())
            .collect()
    }
}
