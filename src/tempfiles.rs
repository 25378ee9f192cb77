//! # Temp-File Manager
//!
//! Every scratch file and directory a conversion creates goes through this type,
//! so one `cleanup` call can remove all of them when the run ends, whatever the outcome.
//!
//! Paths are removed newest first, which empties a scratch directory before the
//! directory itself is removed. A path that cannot be removed is logged and skipped.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use log::{debug, error, info};
use uuid::Uuid;
use crate::invariant_ppt::assert_invariant;

/// Prefix of per-run scratch directories.
pub const SCRATCH_PREFIX: &str = "bat2exe-";

/// Outcome of a cleanup pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<PathBuf>,
    pub failed: Vec<PathBuf>,
    /// Paths left on disk because the caller asked to keep them.
    pub kept: Vec<PathBuf>,
}

#[derive(Debug)]
pub struct TempFileManager {
    tracked: Vec<PathBuf>,
    keep: bool,
    cleaned: bool,
}

impl TempFileManager {
    pub fn new(keep: bool) -> Self {
        Self { tracked: Vec::new(), keep, cleaned: false }
    }

    /// Registers a path for removal at cleanup time.
    pub fn track(&mut self, path: impl Into<PathBuf>) {
        let path = path.into();
        if !self.tracked.contains(&path) {
            debug!("Tracking temp path {:?}", path);
            self.tracked.push(path);
        }
        self.cleaned = false;
    }

    /// Creates a uniquely named directory under `base` and tracks it.
    pub fn create_scratch_dir(&mut self, base: &Path) -> io::Result<PathBuf> {
        let dir = base.join(format!("{}{}", SCRATCH_PREFIX, Uuid::new_v4().simple()));
        fs::create_dir_all(&dir)?;
        self.track(&dir);
        Ok(dir)
    }

    /// Writes `contents` to `path` and tracks the file.
    ///
    /// The path is tracked before writing so a half-written file is still cleaned up.
    pub fn write_file(&mut self, path: &Path, contents: impl AsRef<[u8]>) -> io::Result<()> {
        self.track(path);
        fs::write(path, contents)
    }

    #[cfg(test)]
    pub fn tracked(&self) -> &[PathBuf] {
        &self.tracked
    }

    /// Removes every tracked path, newest first, unless retention was requested.
    ///
    /// Calling it again only retries what is still tracked.
    pub fn cleanup(&mut self) -> CleanupReport {
        let mut report = CleanupReport::default();
        self.cleaned = true;

        if self.keep {
            if !self.tracked.is_empty() {
                info!("Keeping {} temporary path(s):", self.tracked.len());
                for path in &self.tracked {
                    info!("  {}", path.display());
                }
            }
            report.kept = self.tracked.clone();
            return report;
        }

        let mut still_present = Vec::new();
        for path in self.tracked.drain(..).rev() {
            match remove_path(&path) {
                Ok(true) => {
                    debug!("Removed {:?}", path);
                    report.removed.push(path);
                }
                Ok(false) => {}
                Err(e) => {
                    error!("Failed to remove temporary path {:?}: {}", path, e);
                    report.failed.push(path.clone());
                    still_present.push(path);
                }
            }
        }
        still_present.reverse();
        self.tracked = still_present;

        assert_invariant(
            report.removed.iter().all(|p| !p.exists()),
            "Removed temp paths no longer exist",
            Some("TempFiles"),
        );

        report
    }
}

impl Drop for TempFileManager {
    fn drop(&mut self) {
        if !self.cleaned {
            let _ = self.cleanup();
        }
    }
}

/// Removes a file or directory tree. `Ok(false)` means it was already gone.
fn remove_path(path: &Path) -> io::Result<bool> {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
        Err(e) => return Err(e),
    };

    if meta.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(true)
}
