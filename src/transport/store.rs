//! Radio filesystem paths and the host-side file store
//!
//! On the device these files live on the radio module's flash. The host
//! binary maps the same relative paths under a directory on disk.

use super::TransportError;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

/// Well-known files on the radio filesystem
pub mod paths {
    /// Persisted device configuration document
    pub const CONFIG_FILE: &str = "user/devconf";
    /// Primary root CA
    pub const ROOT_CA: &str = "user/rootca1";
    /// Root CA used once when the primary is rejected
    pub const FALLBACK_ROOT_CA: &str = "user/rootca";
    /// Device client certificate
    pub const DEVICE_CERT: &str = "user/devcert";
    /// Device private key
    pub const DEVICE_KEY: &str = "user/devkey";
    /// Resolved cloud endpoint (IoT hub, broker or AWS endpoint)
    pub const ENDPOINT: &str = "user/endPointAddr";
    /// Host-generated device identifier
    pub const UDID: &str = "user/udid";
}

/// Directory-backed file store used by the host radio
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Map a radio path onto the store directory, rejecting escapes
    fn resolve(&self, path: &str) -> Result<PathBuf, TransportError> {
        let relative = Path::new(path);
        let escapes = relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_)));
        if path.is_empty() || escapes {
            return Err(TransportError::Io(format!("invalid radio path: {path}")));
        }
        Ok(self.root.join(relative))
    }

    pub async fn exists(&self, path: &str) -> bool {
        match self.resolve(path) {
            Ok(full) => tokio::fs::metadata(full).await.is_ok(),
            Err(_) => false,
        }
    }

    pub async fn read(&self, path: &str) -> Result<String, TransportError> {
        let full = self.resolve(path)?;
        match tokio::fs::read_to_string(&full).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransportError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }

    pub async fn read_bytes(&self, path: &str) -> Result<Vec<u8>, TransportError> {
        let full = self.resolve(path)?;
        match tokio::fs::read(&full).await {
            Ok(contents) => Ok(contents),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransportError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }

    pub async fn write(&self, path: &str, contents: &str) -> Result<(), TransportError> {
        let full = self.resolve(path)?;
        if let Some(parent) = full.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| TransportError::Io(e.to_string()))?;
        }
        tokio::fs::write(&full, contents)
            .await
            .map_err(|e| TransportError::Io(e.to_string()))?;
        debug!(path = %path, bytes = contents.len(), "Wrote radio file");
        Ok(())
    }

    pub async fn delete(&self, path: &str) -> Result<(), TransportError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(TransportError::FileNotFound(path.to_string()))
            }
            Err(e) => Err(TransportError::Io(e.to_string())),
        }
    }
}
