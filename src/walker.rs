//! Directory walking for sync.
//!
//! Recursively enumerates regular files under a root and pairs each one with
//! its object key: the path relative to the root, joined with `/` on every
//! platform.

use std::io;
use std::path::{Path, PathBuf};
use tracing::warn;
use walkdir::WalkDir;

use crate::error::SyncError;

/// A regular file found under the sync root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFile {
    pub absolute_path: PathBuf,
    pub relative_key: String,
}

impl LocalFile {
    /// Build the entry for `path`, which must live under `root`
    pub fn new(root: &Path, path: &Path) -> Result<Self, SyncError> {
        let relative = path.strip_prefix(root).map_err(|e| {
            SyncError::io(path, io::Error::new(io::ErrorKind::InvalidInput, e))
        })?;

        Ok(Self {
            absolute_path: path.to_path_buf(),
            relative_key: object_key(relative),
        })
    }
}

/// Join the components of a relative path with `/`
pub fn object_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walker over one sync root
///
/// The root is canonicalized once. Every call to [`walk`](Self::walk) starts
/// a fresh, lazy, depth-first traversal from disk. Symlinks are followed;
/// a link back to one of its own ancestors is reported as an error for that
/// entry instead of being descended into, so each file is yielded once.
#[derive(Debug, Clone)]
pub struct DirectoryWalker {
    root: PathBuf,
}

impl DirectoryWalker {
    pub fn new<P: AsRef<Path>>(root: P) -> Result<Self, SyncError> {
        let root = root.as_ref();
        let resolved = root.canonicalize().map_err(|e| {
            SyncError::Configuration(format!("sync root {:?} cannot be resolved: {}", root, e))
        })?;

        if !resolved.is_dir() {
            return Err(SyncError::Configuration(format!(
                "sync root {:?} is not a directory",
                resolved
            )));
        }

        Ok(Self { root: resolved })
    }

    /// Canonical root all keys are relative to
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn walk(&self) -> impl Iterator<Item = Result<LocalFile, SyncError>> + '_ {
        WalkDir::new(&self.root)
            .follow_links(true)
            .into_iter()
            .filter_map(move |entry| match entry {
                Ok(entry) if entry.file_type().is_file() => {
                    Some(LocalFile::new(&self.root, entry.path()))
                }
                Ok(_) => None,
                Err(err) => {
                    let path = err
                        .path()
                        .map(Path::to_path_buf)
                        .unwrap_or_else(|| self.root.clone());
                    if err.loop_ancestor().is_some() {
                        warn!("Skipping symlink loop at {:?}", path);
                    }
                    let message = err.to_string();
                    let source = err
                        .into_io_error()
                        .unwrap_or_else(|| io::Error::new(io::ErrorKind::Other, message));
                    Some(Err(SyncError::io(path, source)))
                }
            })
    }
}
