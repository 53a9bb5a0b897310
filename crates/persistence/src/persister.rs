//! On-disk caching of session configurations.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use autotx_core::{Error, Result};

use crate::session::SessionConfiguration;

/// Stores and reloads session configurations.
pub trait ConfigurationPersister: Send + Sync {
    /// Load the configuration at `path`; `None` when there is none.
    fn read_configuration(&self, path: &Path) -> Result<Option<SessionConfiguration>>;

    /// Store `configuration` at `path`.
    fn write_configuration(&self, path: &Path, configuration: &SessionConfiguration) -> Result<()>;

    /// Whether the stored configuration is missing or older than any of
    /// `dependencies`.
    fn is_new_configuration_required(&self, path: &Path, dependencies: &[PathBuf]) -> bool;
}

/// JSON files on the local file system.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileConfigurationPersister;

impl FileConfigurationPersister {
    /// New persister.
    pub fn new() -> Self {
        Self
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

impl ConfigurationPersister for FileConfigurationPersister {
    fn read_configuration(&self, path: &Path) -> Result<Option<SessionConfiguration>> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Configuration(format!(
                    "cannot read configuration {}: {}",
                    path.display(),
                    e
                )))
            }
        };
        serde_json::from_slice(&bytes).map(Some).map_err(|e| {
            Error::Configuration(format!("cannot parse configuration {}: {}", path.display(), e))
        })
    }

    fn write_configuration(&self, path: &Path, configuration: &SessionConfiguration) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(configuration)
            .map_err(|e| Error::Internal(format!("cannot serialize configuration: {}", e)))?;
        fs::write(path, bytes).map_err(|e| {
            Error::Configuration(format!("cannot write configuration {}: {}", path.display(), e))
        })?;
        tracing::debug!(path = %path.display(), "configuration written");
        Ok(())
    }

    fn is_new_configuration_required(&self, path: &Path, dependencies: &[PathBuf]) -> bool {
        let written = match modified(path) {
            Some(written) => written,
            None => return true,
        };
        dependencies
            .iter()
            .filter_map(|dependency| modified(dependency))
            .any(|changed| changed > written)
    }
}
