use std::collections::BTreeMap;
use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::sync::Arc;

use crate::platform::{Platform, BINARY_NAME};

pub struct BinaryLocator {
    platform: Arc<dyn Platform>,
    storage_dir: PathBuf,
    search_path: Option<OsString>,
}

impl BinaryLocator {
    pub fn new(
        platform: Arc<dyn Platform>,
        storage_dir: PathBuf,
        env: &BTreeMap<String, String>,
    ) -> BinaryLocator {
        BinaryLocator {
            platform,
            storage_dir,
            search_path: env.get("PATH").map(OsString::from),
        }
    }

    pub fn storage_dir(&self) -> &PathBuf {
        &self.storage_dir
    }

    pub fn storage_binary_path(&self) -> PathBuf {
        self.storage_dir.join(self.platform.binary_file_name())
    }

    pub fn system_binary_path(&self) -> Option<PathBuf> {
        self.platform
            .system_install_dir()
            .map(|dir| dir.join(self.platform.binary_file_name()))
    }

    /// PATH first, then the extension-private copy. Absence is `None`, never an error.
    pub fn locate(&self) -> Option<PathBuf> {
        if let Some(path) = self.lookup_in_path() {
            log::debug!("found {BINARY_NAME} on PATH at {}", path.display());
            return Some(path);
        }
        let candidate = self.storage_binary_path();
        if candidate.is_file() {
            log::debug!("found {BINARY_NAME} in storage at {}", candidate.display());
            return Some(candidate);
        }
        log::debug!("{BINARY_NAME} not found on PATH or in {}", self.storage_dir.display());
        None
    }

    fn lookup_in_path(&self) -> Option<PathBuf> {
        let search_path = self.search_path.as_ref()?;
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        which::which_in(BINARY_NAME, Some(search_path), cwd).ok()
    }
}
