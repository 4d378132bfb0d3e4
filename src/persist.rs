//! Permanent storage for finished clips.
//!
//! A finalized clip lives in the working output directory until it is copied
//! into the archive. The working file is removed only after the copy
//! succeeds; a failed copy leaves it in place and is not retried.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RecordError;

/// Archive directory clips are moved into after finalization.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClipArchive {
    dir: PathBuf,
}

impl ClipArchive {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Copy `clip` into the archive and remove the working file.
    ///
    /// Returns the archived path. A clip already inside the archive is left
    /// where it is.
    pub fn persist(&self, clip: &Path) -> Result<PathBuf, RecordError> {
        let failed = |reason: String| RecordError::PersistenceFailed {
            path: clip.to_path_buf(),
            reason,
        };

        let file_name = clip
            .file_name()
            .ok_or_else(|| failed("clip path has no file name".to_string()))?;
        fs::create_dir_all(&self.dir)
            .map_err(|err| failed(format!("create {}: {}", self.dir.display(), err)))?;

        let target = self.dir.join(file_name);
        if same_file(clip, &target) {
            return Ok(target);
        }
        if target.exists() {
            return Err(failed(format!("{} already exists", target.display())));
        }

        fs::copy(clip, &target)
            .map_err(|err| failed(format!("copy to {}: {}", target.display(), err)))?;
        if let Err(err) = fs::remove_file(clip) {
            // The archived copy is good; a stale working file is only clutter.
            log::warn!(
                "ClipArchive: archived {} but could not remove working file: {}",
                target.display(),
                err
            );
        }
        log::info!("ClipArchive: saved {}", target.display());
        Ok(target)
    }
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (fs::canonicalize(a), fs::canonicalize(b)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}
