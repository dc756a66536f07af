use serde::Serialize;
use std::path::Path;
use std::sync::Arc;

use crate::cluster::{ClusterStatus, ManagedCluster};
use crate::engine::ContainerEngine;
use crate::error::MinikubeError;
use crate::host::{ClusterPicker, Notifier};
use crate::minikube::MinikubeCli;

const NO_CLUSTERS: &str = "No minikube clusters to push to";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImageRef {
    pub name: Option<String>,
    pub tag: Option<String>,
    pub engine_id: String,
}

impl ImageRef {
    /// Splits `registry/name:tag`. A colon before the last `/` is a registry port.
    pub fn parse(reference: &str, engine_id: &str) -> ImageRef {
        let reference = reference.trim();
        let slash = reference.rfind('/').map_or(0, |idx| idx + 1);
        let (name, tag) = match reference[slash..].rfind(':') {
            Some(idx) => (
                &reference[..slash + idx],
                Some(&reference[slash + idx + 1..]),
            ),
            None => (reference, None),
        };
        ImageRef {
            name: Some(name.to_string()).filter(|name| !name.is_empty()),
            tag: tag.filter(|tag| !tag.is_empty()).map(str::to_string),
            engine_id: engine_id.to_string(),
        }
    }

    pub fn reference(&self) -> Result<String, MinikubeError> {
        let Some(name) = self.name.as_deref().filter(|name| !name.trim().is_empty()) else {
            return Err(MinikubeError::InvalidArgument(
                "image has no name".to_string(),
            ));
        };
        Ok(match &self.tag {
            Some(tag) => format!("{name}:{tag}"),
            None => name.to_string(),
        })
    }
}

pub struct ImageMover {
    engine: Arc<dyn ContainerEngine>,
    cli: Arc<MinikubeCli>,
    notifier: Arc<dyn Notifier>,
    picker: Arc<dyn ClusterPicker>,
}

impl ImageMover {
    pub fn new(
        engine: Arc<dyn ContainerEngine>,
        cli: Arc<MinikubeCli>,
        notifier: Arc<dyn Notifier>,
        picker: Arc<dyn ClusterPicker>,
    ) -> ImageMover {
        ImageMover {
            engine,
            cli,
            notifier,
            picker,
        }
    }

    pub async fn move_image(
        &self,
        image: &ImageRef,
        clusters: &[ManagedCluster],
    ) -> Result<Option<String>, MinikubeError> {
        let reference = image.reference()?;
        let started: Vec<ManagedCluster> = clusters
            .iter()
            .filter(|cluster| cluster.status == ClusterStatus::Started)
            .cloned()
            .collect();
        let target = match started.len() {
            0 => return Err(MinikubeError::NotFound(NO_CLUSTERS.to_string())),
            1 => started[0].clone(),
            _ => match self.picker.pick(&started)? {
                Some(cluster) => cluster,
                None => return Ok(None),
            },
        };

        let archive = tempfile::Builder::new()
            .prefix("minikube-image-")
            .suffix(".tar")
            .tempfile()?
            .into_temp_path();
        let result = self
            .transfer(&reference, &image.engine_id, &target.name, &archive)
            .await;
        match &result {
            Ok(()) => self.notifier.info(&format!(
                "Image {reference} pushed to minikube cluster {}",
                target.name
            )),
            Err(err) if err.is_cancelled() => {}
            Err(err) => self.notifier.error(&format!(
                "Failed to push image {reference} to minikube cluster {}: {err}",
                target.name
            )),
        }

        let path = archive.to_path_buf();
        match (result, archive.close()) {
            (Ok(()), Ok(())) => Ok(Some(target.name)),
            (Err(err), Ok(())) => Err(err),
            (result, Err(source)) => Err(MinikubeError::Cleanup {
                path,
                source,
                primary: result.err().map(Box::new),
            }),
        }
    }

    async fn transfer(
        &self,
        reference: &str,
        engine_id: &str,
        profile: &str,
        archive: &Path,
    ) -> Result<(), MinikubeError> {
        log::info!("saving {reference} to {}", archive.display());
        self.engine.save_image(engine_id, reference, archive).await?;
        self.cli.image_load(profile, archive).await?;
        Ok(())
    }
}
