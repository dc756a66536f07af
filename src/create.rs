use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::CreateSettings;
use crate::error::MinikubeError;
use crate::minikube::MinikubeCli;

pub const DEFAULT_PROFILE: &str = "minikube";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClusterCreateOptions {
    pub name: String,
    pub driver: Option<String>,
    pub container_runtime: Option<String>,
    pub base_image: Option<String>,
    pub mount_string: Option<String>,
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

impl ClusterCreateOptions {
    pub fn from_settings(settings: &CreateSettings) -> ClusterCreateOptions {
        ClusterCreateOptions {
            name: DEFAULT_PROFILE.to_string(),
            driver: non_empty(&settings.driver),
            container_runtime: non_empty(&settings.container_runtime),
            base_image: non_empty(&settings.base_image),
            mount_string: None,
        }
    }

    pub fn args(&self) -> Result<Vec<String>, MinikubeError> {
        let name = self.name.trim();
        if name.is_empty() {
            return Err(MinikubeError::InvalidArgument(
                "cluster name must not be empty".to_string(),
            ));
        }
        let mut args = vec![
            "start".to_string(),
            "--profile".to_string(),
            name.to_string(),
        ];
        if let Some(driver) = &self.driver {
            args.push("--driver".to_string());
            args.push(driver.clone());
        }
        if let Some(runtime) = &self.container_runtime {
            args.push("--container-runtime".to_string());
            args.push(runtime.clone());
        }
        if let Some(image) = &self.base_image {
            args.push("--base-image".to_string());
            args.push(image.clone());
        }
        if let Some(mount) = &self.mount_string {
            args.push("--mount".to_string());
            args.push("--mount-string".to_string());
            args.push(mount.clone());
        }
        Ok(args)
    }
}

/// Starts a new profile, streaming minikube output to the log. Cancelling the
/// token kills the process tree and yields [`MinikubeError::Cancelled`].
pub async fn create_cluster(
    cli: &MinikubeCli,
    options: &ClusterCreateOptions,
    cancel: CancellationToken,
) -> Result<(), MinikubeError> {
    let args = options.args()?;
    log::info!("creating minikube cluster {}", options.name.trim());
    cli.run(&args, Some(cancel), true).await?;
    Ok(())
}
