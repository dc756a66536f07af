use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempPath;

use crate::cli_tool::ManagedBinary;
use crate::error::MinikubeError;
use crate::locator::BinaryLocator;
use crate::platform::Platform;
use crate::process::{exec, ExecOptions, ProcessRunner};
use crate::release::{ReleaseMetadata, ReleaseSource};

const PLACEMENT_RECORD: &str = ".installed-path";

/// The binary is usable at `path` even when the system-wide promotion failed;
/// that failure is kept in `promotion_error`.
#[derive(Debug)]
pub struct InstallOutcome {
    pub path: PathBuf,
    pub promotion_error: Option<MinikubeError>,
}

/// A downloaded binary that has not replaced anything yet. Dropping it removes the file.
#[derive(Debug)]
pub struct StagedDownload {
    path: TempPath,
}

impl StagedDownload {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

pub struct Installer {
    platform: Arc<dyn Platform>,
    locator: Arc<BinaryLocator>,
    releases: Arc<ReleaseSource>,
    runner: Arc<dyn ProcessRunner>,
}

impl Installer {
    pub fn new(
        platform: Arc<dyn Platform>,
        locator: Arc<BinaryLocator>,
        releases: Arc<ReleaseSource>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Installer {
        Installer {
            platform,
            locator,
            releases,
            runner,
        }
    }

    pub async fn download(&self, release: &ReleaseMetadata) -> Result<StagedDownload, MinikubeError> {
        let storage_dir = self.locator.storage_dir();
        tokio::fs::create_dir_all(storage_dir).await?;
        let asset_id = self
            .releases
            .resolve_asset_id(release.id, self.platform.os().as_str(), self.platform.arch())
            .await?;
        let staged = tempfile::Builder::new()
            .prefix("minikube-download-")
            .suffix(self.platform.binary_extension())
            .tempfile_in(storage_dir)?
            .into_temp_path();
        log::info!("downloading minikube {} to {}", release.tag, staged.display());
        self.releases.fetch_asset(asset_id, &staged).await?;
        make_executable(&staged).await?;
        Ok(StagedDownload { path: staged })
    }

    /// Moves a verified download over the storage copy, then promotes it system-wide.
    pub async fn place(&self, staged: StagedDownload) -> Result<InstallOutcome, MinikubeError> {
        let stored = self.locator.storage_binary_path();
        staged
            .path
            .persist(&stored)
            .map_err(|err| MinikubeError::Io(err.error))?;

        let outcome = match self.promote(&stored).await {
            Ok(Some(path)) => InstallOutcome {
                path,
                promotion_error: None,
            },
            Ok(None) => InstallOutcome {
                path: stored,
                promotion_error: None,
            },
            Err(err) => {
                log::warn!("system-wide install failed, keeping {}: {err}", stored.display());
                InstallOutcome {
                    path: stored,
                    promotion_error: Some(err),
                }
            }
        };
        if let Err(err) = self.record_placement(&outcome.path) {
            log::warn!("failed to record install location: {err}");
        }
        log::info!("installed minikube at {}", outcome.path.display());
        Ok(outcome)
    }

    async fn promote(&self, source: &Path) -> Result<Option<PathBuf>, MinikubeError> {
        let Some(destination) = self.locator.system_binary_path() else {
            log::debug!("no system install directory on this platform");
            return Ok(None);
        };
        let (program, args) = self.platform.promote_command(source, &destination);
        exec(
            self.runner.as_ref(),
            &program,
            &args,
            &ExecOptions::default().elevated(),
        )
        .await?;
        Ok(Some(destination))
    }

    fn placement_record(&self) -> PathBuf {
        self.locator.storage_dir().join(PLACEMENT_RECORD)
    }

    fn record_placement(&self, path: &Path) -> Result<(), MinikubeError> {
        fs::write(self.placement_record(), path.to_string_lossy().as_bytes())?;
        Ok(())
    }

    pub fn placed_path(&self) -> Option<PathBuf> {
        let recorded = fs::read_to_string(self.placement_record()).ok()?;
        let recorded = recorded.trim();
        if recorded.is_empty() {
            None
        } else {
            Some(PathBuf::from(recorded))
        }
    }

    pub fn is_managed_path(&self, path: &Path) -> bool {
        path == self.locator.storage_binary_path()
            || self.locator.system_binary_path().as_deref() == Some(path)
    }

    pub async fn uninstall(&self, binary: &ManagedBinary) -> Result<(), MinikubeError> {
        let path = &binary.path;
        if !self.is_managed_path(path) {
            return Err(MinikubeError::InvalidArgument(format!(
                "{} is not managed by this extension",
                path.display()
            )));
        }
        match tokio::fs::remove_file(path).await {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
                log::info!("removing {} requires elevation", path.display());
                let (program, args) = self.platform.remove_command(path);
                exec(
                    self.runner.as_ref(),
                    &program,
                    &args,
                    &ExecOptions::default().elevated(),
                )
                .await
                .map_err(|err| {
                    MinikubeError::PermissionDenied(format!(
                        "failed to remove {}: {err}",
                        path.display()
                    ))
                })?;
            }
            Err(err) => return Err(err.into()),
        }
        if self.placed_path().as_deref() == Some(path.as_path()) {
            if let Err(err) = fs::remove_file(self.placement_record()) {
                log::debug!("failed to clear install record: {err}");
            }
        }
        log::info!("removed {}", path.display());
        Ok(())
    }
}

#[cfg(unix)]
async fn make_executable(path: &Path) -> Result<(), MinikubeError> {
    use std::os::unix::fs::PermissionsExt;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

#[cfg(not(unix))]
async fn make_executable(_path: &Path) -> Result<(), MinikubeError> {
    Ok(())
}
