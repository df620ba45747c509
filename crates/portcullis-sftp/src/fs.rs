//! Root-jailed local filesystem for session channels.

use std::path::{Component, Path, PathBuf};

use tracing::warn;

use crate::{Error, Result};

/// Local filesystem confined beneath one root directory.
///
/// Every client-supplied path is resolved relative to the root; anything
/// that would step outside it is refused before touching the disk.
#[derive(Debug, Clone)]
pub struct LocalFs {
    root: PathBuf,
}

impl LocalFs {
    /// Creates a filesystem rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The configured root directory.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Maps a client path to a path under the root.
    ///
    /// Leading slashes are interpreted relative to the root. `.` components
    /// are dropped; `..` and any other non-normal component are refused, as
    /// are empty paths and paths containing NUL bytes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] for paths that fail validation.
    pub fn resolve(&self, path: &str) -> Result<PathBuf> {
        if path.is_empty() {
            return Err(Error::InvalidPath("empty path".to_string()));
        }

        if path.contains('\0') {
            warn!(path, "path contains NUL bytes");
            return Err(Error::InvalidPath("path contains invalid characters".to_string()));
        }

        let relative = path.trim_start_matches('/');
        let mut resolved = self.root.clone();
        for component in Path::new(relative).components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                _ => {
                    warn!(path, "path escapes the root directory");
                    return Err(Error::InvalidPath("invalid path".to_string()));
                }
            }
        }

        Ok(resolved)
    }
}
