//! Multi-document writes
//!
//! A [`Transaction`] collects the new body of every document an operation
//! touches. `commit` stages all of them next to their targets before renaming
//! any into place, so a failure while staging leaves every document as it was.

use std::path::PathBuf;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::error::{Error, Result};
use crate::fsutil;

#[derive(Debug, Default)]
pub struct Transaction {
    writes: Vec<(PathBuf, Vec<u8>)>,
}

impl Transaction {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `contents` for `path`, replacing anything queued for it before
    pub fn write(&mut self, path: impl Into<PathBuf>, contents: impl Into<Vec<u8>>) {
        let path = path.into();
        let contents = contents.into();
        match self.writes.iter_mut().find(|(p, _)| *p == path) {
            Some((_, queued)) => *queued = contents,
            None => self.writes.push((path, contents)),
        }
    }

    /// Stage every queued document, then move them all into place
    ///
    /// Returns the number of documents written.
    pub fn commit(self) -> Result<usize> {
        let mut staged: Vec<(PathBuf, NamedTempFile)> = Vec::with_capacity(self.writes.len());
        for (path, contents) in self.writes {
            let file = fsutil::stage(&path, &contents).map_err(|e| Error::ManifestWriteFailed {
                path: path.clone(),
                source: e,
            })?;
            staged.push((path, file));
        }

        let count = staged.len();
        for (path, file) in staged {
            file.persist(&path).map_err(|e| Error::ManifestWriteFailed {
                path: path.clone(),
                source: e.error,
            })?;
            debug!("Wrote {}", path.display());
        }
        Ok(count)
    }
}
