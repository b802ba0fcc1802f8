//! Startup backend selection.
//!
//! Some host platforms have no writable local storage. Rather than branching
//! on the platform throughout the engine, the capability is detected once and
//! the matching backend is handed out as `Arc<dyn PersistentStore>`.

use crate::backend::PersistentStore;
use crate::error::StorageResult;
use crate::file::{FileStore, FileStoreOptions};
use crate::memory::MemoryStore;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

const PROBE_FILE: &str = ".probe";

/// Configuration for opening the persistent store.
#[derive(Debug, Clone, Default)]
pub struct StorageConfig {
    /// Directory for durable data. `None` selects the in-memory store.
    pub data_dir: Option<PathBuf>,
    /// Options for the durable store.
    pub file: FileStoreOptions,
}

impl StorageConfig {
    /// Configuration for a durable store rooted at `dir`.
    pub fn durable(dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: Some(dir.into()),
            file: FileStoreOptions::default(),
        }
    }

    /// Configuration for an in-memory store.
    pub fn ephemeral() -> Self {
        Self::default()
    }

    /// Sets the durable store options.
    #[must_use]
    pub fn with_file_options(mut self, options: FileStoreOptions) -> Self {
        self.file = options;
        self
    }
}

/// What kind of storage the host platform offers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageCapability {
    /// A writable directory is available.
    Durable(PathBuf),
    /// No writable storage; data lives only as long as the process.
    Ephemeral,
}

/// Probes whether the configured data directory is writable.
pub fn detect_capability(config: &StorageConfig) -> StorageCapability {
    let Some(dir) = &config.data_dir else {
        return StorageCapability::Ephemeral;
    };
    match probe(dir) {
        Ok(()) => StorageCapability::Durable(dir.clone()),
        Err(e) => {
            warn!(dir = %dir.display(), error = %e, "data directory is not writable");
            StorageCapability::Ephemeral
        }
    }
}

fn probe(dir: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(PROBE_FILE);
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&path)?;
    file.write_all(b"ok")?;
    drop(file);
    std::fs::remove_file(path)
}

/// Opens the store matching the detected capability.
///
/// # Errors
///
/// Returns an error if a durable store was selected but could not be opened
/// (for example because another process holds it). Falling back to memory in
/// that case would silently lose the queued actions on disk.
pub fn open_store(config: &StorageConfig) -> StorageResult<Arc<dyn PersistentStore>> {
    match detect_capability(config) {
        StorageCapability::Durable(dir) => {
            let store = FileStore::open_with_options(&dir, config.file.clone())?;
            info!(dir = %dir.display(), "using durable file store");
            Ok(Arc::new(store))
        }
        StorageCapability::Ephemeral => {
            warn!("using in-memory store; offline data will not survive restart");
            Ok(Arc::new(MemoryStore::new()))
        }
    }
}
