use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;

use crate::error::MinikubeError;
use crate::installer::Installer;
use crate::locator::BinaryLocator;
use crate::minikube::{versions_match, MinikubeCli};
use crate::release::{ReleaseMetadata, ReleaseSource};

const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallationSource {
    Extension,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedBinary {
    pub path: PathBuf,
    pub version: String,
    pub source: InstallationSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CliState {
    Uninstalled,
    Installed,
    UpdateAvailable { latest: String },
    Installing,
    Updating,
    Uninstalling,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CliToolEvent {
    pub state: CliState,
    pub binary: Option<ManagedBinary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CliToolRegistration {
    pub name: &'static str,
    pub display_name: &'static str,
    pub description: &'static str,
    pub version: Option<String>,
    pub path: Option<PathBuf>,
    pub installation_source: Option<InstallationSource>,
    pub state: CliState,
}

#[derive(Debug, Clone)]
struct Snapshot {
    state: CliState,
    binary: Option<ManagedBinary>,
}

pub struct CliToolController {
    locator: Arc<BinaryLocator>,
    releases: Arc<ReleaseSource>,
    installer: Installer,
    cli: Arc<MinikubeCli>,
    current: Mutex<Snapshot>,
    op_lock: tokio::sync::Mutex<()>,
    events: broadcast::Sender<CliToolEvent>,
}

impl CliToolController {
    pub fn new(
        locator: Arc<BinaryLocator>,
        releases: Arc<ReleaseSource>,
        installer: Installer,
        cli: Arc<MinikubeCli>,
    ) -> CliToolController {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        CliToolController {
            locator,
            releases,
            installer,
            cli,
            current: Mutex::new(Snapshot {
                state: CliState::Uninstalled,
                binary: None,
            }),
            op_lock: tokio::sync::Mutex::new(()),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CliToolEvent> {
        self.events.subscribe()
    }

    pub fn state(&self) -> CliState {
        self.snapshot().state
    }

    pub fn current(&self) -> Option<ManagedBinary> {
        self.snapshot().binary
    }

    pub fn registration(&self) -> CliToolRegistration {
        let snapshot = self.snapshot();
        CliToolRegistration {
            name: "minikube",
            display_name: "Minikube",
            description: "Run local Kubernetes clusters with minikube",
            version: snapshot.binary.as_ref().map(|binary| binary.version.clone()),
            path: snapshot.binary.as_ref().map(|binary| binary.path.clone()),
            installation_source: snapshot.binary.as_ref().map(|binary| binary.source),
            state: snapshot.state,
        }
    }

    pub async fn recent_releases(&self) -> Result<Vec<ReleaseMetadata>, MinikubeError> {
        self.releases.list_recent_releases().await
    }

    pub async fn latest_release(&self) -> Result<ReleaseMetadata, MinikubeError> {
        self.releases.latest().await
    }

    pub async fn detect(&self) -> Option<ManagedBinary> {
        let _guard = self.op_lock.lock().await;
        let binary = self.discover().await;
        let previous = self.snapshot().state;
        let state = match (&binary, previous) {
            (None, _) => CliState::Uninstalled,
            (Some(found), CliState::UpdateAvailable { latest })
                if !versions_match(&found.version, &latest) =>
            {
                CliState::UpdateAvailable { latest }
            }
            (Some(_), _) => CliState::Installed,
        };
        self.commit(state, binary.clone());
        binary
    }

    pub async fn check_for_update(&self) -> Result<Option<ReleaseMetadata>, MinikubeError> {
        let _guard = self.op_lock.lock().await;
        let Some(binary) = self.current() else {
            return Ok(None);
        };
        let latest = self.releases.latest().await?;
        if versions_match(&binary.version, &latest.tag) {
            self.commit(CliState::Installed, Some(binary));
            Ok(None)
        } else {
            log::info!(
                "minikube {} is available (installed {})",
                latest.version(),
                binary.version
            );
            self.commit(
                CliState::UpdateAvailable {
                    latest: latest.tag.clone(),
                },
                Some(binary),
            );
            Ok(Some(latest))
        }
    }

    pub async fn install(&self, release: &ReleaseMetadata) -> Result<ManagedBinary, MinikubeError> {
        let _guard = self.op_lock.lock().await;
        self.install_locked(release, CliState::Installing).await
    }

    pub async fn update(&self, release: &ReleaseMetadata) -> Result<ManagedBinary, MinikubeError> {
        let _guard = self.op_lock.lock().await;
        if self.current().is_none() {
            return Err(MinikubeError::InvalidArgument(
                "minikube is not installed, nothing to update".to_string(),
            ));
        }
        self.install_locked(release, CliState::Updating).await
    }

    pub async fn uninstall(&self) -> Result<(), MinikubeError> {
        let _guard = self.op_lock.lock().await;
        let previous = self.snapshot();
        let Some(binary) = previous.binary.clone() else {
            return Err(MinikubeError::InvalidArgument(
                "minikube is not installed".to_string(),
            ));
        };
        self.commit(CliState::Uninstalling, previous.binary.clone());
        if let Err(err) = self.installer.uninstall(&binary).await {
            self.commit(previous.state, previous.binary);
            return Err(err);
        }
        // Another copy may still be reachable, e.g. a storage fallback.
        let remaining = self.discover().await;
        let state = if remaining.is_some() {
            CliState::Installed
        } else {
            CliState::Uninstalled
        };
        self.commit(state, remaining);
        Ok(())
    }

    async fn install_locked(
        &self,
        release: &ReleaseMetadata,
        transient: CliState,
    ) -> Result<ManagedBinary, MinikubeError> {
        let previous = self.snapshot();
        self.commit(transient, previous.binary.clone());
        match self.download_and_verify(release).await {
            Ok(binary) => {
                self.commit(CliState::Installed, Some(binary.clone()));
                Ok(binary)
            }
            Err(err) => {
                self.commit(previous.state, previous.binary);
                Err(err)
            }
        }
    }

    async fn download_and_verify(
        &self,
        release: &ReleaseMetadata,
    ) -> Result<ManagedBinary, MinikubeError> {
        let staged = self.installer.download(release).await?;
        let version = self.cli.version_of(staged.path()).await?;
        let outcome = self.installer.place(staged).await?;
        Ok(ManagedBinary {
            path: outcome.path,
            version,
            source: InstallationSource::Extension,
        })
    }

    async fn discover(&self) -> Option<ManagedBinary> {
        let path = self.locator.locate()?;
        match self.cli.version_of(&path).await {
            Ok(version) => Some(ManagedBinary {
                source: self.source_of(&path),
                path,
                version,
            }),
            Err(err) => {
                log::warn!("ignoring {}: {err}", path.display());
                None
            }
        }
    }

    fn source_of(&self, path: &Path) -> InstallationSource {
        let ours = self.installer.placed_path().as_deref() == Some(path);
        if ours || path == self.locator.storage_binary_path() {
            InstallationSource::Extension
        } else {
            InstallationSource::External
        }
    }

    fn snapshot(&self) -> Snapshot {
        lock(&self.current).clone()
    }

    fn commit(&self, state: CliState, binary: Option<ManagedBinary>) {
        {
            let mut current = lock(&self.current);
            current.state = state.clone();
            current.binary = binary.clone();
        }
        self.cli.set_path(binary.as_ref().map(|binary| binary.path.clone()));
        log::debug!("minikube state is now {state:?}");
        // No receivers is fine.
        let _ = self.events.send(CliToolEvent { state, binary });
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
