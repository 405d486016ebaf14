//! Writing rendered files into the config root.
//!
//! Each file is written to a temp file in its destination directory and
//! renamed over the target, so a reader never sees a half-written file.
//! A set of files is not swapped atomically: if one file fails, the files
//! already swapped are restored from their in-memory backups (or removed
//! if they did not exist before).

use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use tempfile::{NamedTempFile, TempDir};
use tracing::{debug, warn};

use baragon_core::ConfigFile;

use crate::error::{WriteError, WriteResult};

/// Owns the files under one config root.
#[derive(Debug, Clone)]
pub struct ConfigWriter {
    root: PathBuf,
    staging_base: Option<PathBuf>,
}

impl ConfigWriter {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            staging_base: None,
        }
    }

    /// Create staging directories under `base` instead of the system
    /// temp dir. `base` must not be inside the config root.
    pub fn with_staging_base(mut self, base: &Path) -> Self {
        self.staging_base = Some(base.to_path_buf());
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write `files` into a fresh directory laid out like the config
    /// root. The directory is removed when the returned handle drops.
    pub fn stage(&self, files: &[ConfigFile]) -> WriteResult<TempDir> {
        let mut builder = tempfile::Builder::new();
        builder.prefix("baragon-staging-");
        let dir = match &self.staging_base {
            Some(base) => {
                std::fs::create_dir_all(base).map_err(io_err(base))?;
                builder.tempdir_in(base)
            }
            None => builder.tempdir(),
        }
        .map_err(io_err(&self.root))?;

        for file in files {
            let target = dir.path().join(self.relative(&file.path)?);
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent).map_err(io_err(parent))?;
            }
            std::fs::write(&target, &file.content).map_err(io_err(&target))?;
        }
        debug!(dir = %dir.path().display(), files = files.len(), "config staged");
        Ok(dir)
    }

    /// Swap `files` into place. On error every file already swapped is
    /// restored before returning.
    pub fn swap(&self, files: &[ConfigFile]) -> WriteResult<()> {
        let mut backups: Vec<(PathBuf, Option<Vec<u8>>)> = Vec::new();

        for file in files {
            let result = self.backup(&file.path, &mut backups).and_then(|()| {
                write_replace(&file.path, file.content.as_bytes())
            });
            if let Err(e) = result {
                warn!(path = %file.path.display(), error = %e, "write failed, restoring");
                restore(&backups);
                return Err(e);
            }
            debug!(path = %file.path.display(), "config written");
        }
        Ok(())
    }

    /// Remove files under the root. Missing files are skipped. Returns
    /// how many were removed.
    pub fn remove(&self, paths: &BTreeSet<PathBuf>) -> WriteResult<usize> {
        let mut removed = 0;
        for path in paths {
            self.relative(path)?;
            match std::fs::remove_file(path) {
                Ok(()) => {
                    debug!(path = %path.display(), "config removed");
                    removed += 1;
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(io_err(path)(e)),
            }
        }
        Ok(removed)
    }

    fn backup(&self, path: &Path, backups: &mut Vec<(PathBuf, Option<Vec<u8>>)>) -> WriteResult<()> {
        self.relative(path)?;
        if backups.iter().any(|(p, _)| p == path) {
            return Ok(());
        }
        let previous = match std::fs::read(path) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(io_err(path)(e)),
        };
        backups.push((path.to_path_buf(), previous));
        Ok(())
    }

    /// `path` relative to the root; rejects anything that escapes it.
    fn relative(&self, path: &Path) -> WriteResult<PathBuf> {
        let outside = || WriteError::OutsideRoot {
            path: path.to_path_buf(),
        };
        let rel = path.strip_prefix(&self.root).map_err(|_| outside())?;
        if rel.as_os_str().is_empty() || !rel.components().all(|c| matches!(c, Component::Normal(_))) {
            return Err(outside());
        }
        Ok(rel.to_path_buf())
    }
}

fn write_replace(path: &Path, content: &[u8]) -> WriteResult<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(io_err(parent))?;
    let mut tmp = NamedTempFile::new_in(parent).map_err(io_err(parent))?;
    tmp.write_all(content).map_err(io_err(path))?;
    tmp.persist(path).map_err(|e| io_err(path)(e.error))?;
    Ok(())
}

fn restore(backups: &[(PathBuf, Option<Vec<u8>>)]) {
    for (path, previous) in backups.iter().rev() {
        let result = match previous {
            Some(bytes) => write_replace(path, bytes),
            None => match std::fs::remove_file(path) {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(io_err(path)(e)),
            },
        };
        if let Err(e) = result {
            warn!(path = %path.display(), error = %e, "restore failed");
        }
    }
}

fn io_err(path: &Path) -> impl Fn(std::io::Error) -> WriteError + '_ {
    move |source| WriteError::Io {
        path: path.to_path_buf(),
        source,
    }
}
