//! Manifest sink writing a single JSON document.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tempfile::NamedTempFile;
use tracing::debug;

use crate::backend_traits::{Manifest, ManifestSink, SinkResult};
use crate::error::SinkError;

/// Manifest sink writing one pretty-printed JSON document.
///
/// The document is written to a temp file in the destination directory,
/// fsynced, then renamed over the destination, so readers never observe a
/// partially written manifest.
#[derive(Debug, Clone)]
pub struct JsonManifestSink {
    path: PathBuf,
    #[cfg(test)]
    fail_before_persist: bool,
}

impl JsonManifestSink {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            #[cfg(test)]
            fail_before_persist: false,
        }
    }

    /// Fail every commit after the temp file is written, before the rename.
    #[cfg(test)]
    fn failing_before_persist(mut self) -> Self {
        self.fail_before_persist = true;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn parent_dir(&self) -> PathBuf {
        match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }
}

#[async_trait]
impl ManifestSink for JsonManifestSink {
    async fn commit(&self, manifest: &Manifest) -> SinkResult<()> {
        let mut body = serde_json::to_vec_pretty(manifest)?;
        body.push(b'\n');

        let dir = self.parent_dir();
        fs::create_dir_all(&dir)?;

        let mut tmp = NamedTempFile::new_in(&dir)?;
        tmp.write_all(&body)?;
        tmp.as_file().sync_all()?;
        #[cfg(test)]
        if self.fail_before_persist {
            return Err(SinkError::Write("injected failure before rename".to_string()));
        }
        tmp.persist(&self.path).map_err(|e| {
            SinkError::Write(format!("rename into {}: {}", self.path.display(), e.error))
        })?;

        debug!(path = %self.path.display(), bytes = body.len(), "manifest persisted");
        Ok(())
    }

    async fn read(&self) -> SinkResult<Option<Manifest>> {
        match fs::read(&self.path) {
            Ok(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SinkError::Io(e)),
        }
    }
}
