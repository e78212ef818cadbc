//! Checkpoint discovery for restartable jobs.
//!
//! Long-running jobs periodically write restart artifacts named by iteration
//! index (e.g. `state.ckpt-12`). The [`CheckpointLocator`] seam turns the
//! directory-scan convention into one explicit, testable rule: among files
//! whose stem matches, pick the highest numeric suffix.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

/// A restart artifact found in a working directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub path: PathBuf,
    pub index: u32,
}

/// Locates the most recent checkpoint artifact in a working directory.
pub trait CheckpointLocator: Send + Sync {
    /// Returns the highest-index checkpoint, or `None` when the directory
    /// holds no matching artifact. Callers decide whether `None` is fatal.
    fn latest(&self, dir: &Path) -> Result<Option<Checkpoint>>;
}

/// Default locator: matches files named `<stem>-<index>` (an extension after
/// the index is allowed), selecting the maximum index.
///
/// `state.ckpt-5` beats `state.ckpt-2`; `state.ckpt-5.meta` counts as index 5
/// as well.
#[derive(Debug, Clone)]
pub struct IndexedFileLocator {
    pub stem: String,
}

impl IndexedFileLocator {
    pub fn new(stem: impl Into<String>) -> Self {
        Self { stem: stem.into() }
    }
}

impl CheckpointLocator for IndexedFileLocator {
    fn latest(&self, dir: &Path) -> Result<Option<Checkpoint>> {
        let prefix = format!("{}-", self.stem);
        let mut best: Option<Checkpoint> = None;

        let entries = std::fs::read_dir(dir)
            .with_context(|| format!("failed to scan {}", dir.display()))?;
        for entry in entries {
            let entry = entry?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            let Some(suffix) = name.strip_prefix(&prefix) else {
                continue;
            };
            // The index runs up to the first dot, so trailing extensions
            // (`state.ckpt-5.meta`) do not hide it.
            let index_part = suffix.split('.').next().unwrap_or(suffix);
            let Ok(index) = index_part.parse::<u32>() else {
                continue;
            };
            if best.as_ref().is_none_or(|b| index > b.index) {
                best = Some(Checkpoint { path, index });
            }
        }

        Ok(best)
    }
}
