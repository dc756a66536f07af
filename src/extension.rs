use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::cli_tool::CliToolController;
use crate::cluster::ManagedCluster;
use crate::config::{minikube_env, storage_dir, Config};
use crate::create::{create_cluster, ClusterCreateOptions};
use crate::engine::ContainerEngine;
use crate::error::MinikubeError;
use crate::host::{ClusterPicker, Notifier, Provider};
use crate::image::{ImageMover, ImageRef};
use crate::installer::Installer;
use crate::locator::BinaryLocator;
use crate::minikube::MinikubeCli;
use crate::platform::Platform;
use crate::process::ProcessRunner;
use crate::reconciler::{ClusterReconciler, ProviderConnection, ReconcileSummary};
use crate::release::{ReleaseRegistry, ReleaseSource};

pub struct HostServices {
    pub platform: Arc<dyn Platform>,
    pub runner: Arc<dyn ProcessRunner>,
    pub registry: Arc<dyn ReleaseRegistry>,
    pub engine: Arc<dyn ContainerEngine>,
    pub provider: Arc<dyn Provider>,
    pub notifier: Arc<dyn Notifier>,
    pub picker: Arc<dyn ClusterPicker>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterAction {
    Start,
    Stop,
    Delete,
}

impl ClusterAction {
    fn verb(&self) -> &'static str {
        match self {
            ClusterAction::Start => "start",
            ClusterAction::Stop => "stop",
            ClusterAction::Delete => "delete",
        }
    }
}

pub struct Extension {
    config: Config,
    cli: Arc<MinikubeCli>,
    controller: Arc<CliToolController>,
    reconciler: Arc<ClusterReconciler>,
    images: ImageMover,
    engine: Arc<dyn ContainerEngine>,
    notifier: Arc<dyn Notifier>,
}

impl Extension {
    pub async fn activate(config: Config, host: HostServices) -> Extension {
        let env = minikube_env(&config, host.platform.os());
        let cli = Arc::new(MinikubeCli::new(host.runner.clone(), env.clone()));
        let locator = Arc::new(BinaryLocator::new(
            host.platform.clone(),
            storage_dir(&config),
            &env,
        ));
        let releases = Arc::new(ReleaseSource::new(
            host.registry.clone(),
            &config.release.owner,
            &config.release.repo,
        ));
        let installer = Installer::new(
            host.platform.clone(),
            locator.clone(),
            releases.clone(),
            host.runner.clone(),
        );
        let controller = Arc::new(CliToolController::new(
            locator,
            releases,
            installer,
            cli.clone(),
        ));

        controller.detect().await;

        let reconciler = Arc::new(ClusterReconciler::new(host.provider.clone(), cli.clone()));
        let images = ImageMover::new(
            host.engine.clone(),
            cli.clone(),
            host.notifier.clone(),
            host.picker.clone(),
        );
        Extension {
            config,
            cli,
            controller,
            reconciler,
            images,
            engine: host.engine,
            notifier: host.notifier,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn cli(&self) -> &Arc<MinikubeCli> {
        &self.cli
    }

    pub fn controller(&self) -> &Arc<CliToolController> {
        &self.controller
    }

    pub fn reconciler(&self) -> &Arc<ClusterReconciler> {
        &self.reconciler
    }

    pub async fn refresh(&self) -> Result<ReconcileSummary, MinikubeError> {
        self.reconciler.refresh(self.engine.as_ref()).await
    }

    pub async fn clusters(&self) -> Result<Vec<ManagedCluster>, MinikubeError> {
        self.refresh().await?;
        Ok(self.reconciler.clusters().await)
    }

    // A failed listing is retried on the next tick.
    pub async fn watch<F>(
        &self,
        interval: Duration,
        cancel: CancellationToken,
        mut on_pass: F,
    ) -> Result<(), MinikubeError>
    where
        F: FnMut(&ReconcileSummary),
    {
        loop {
            match self.refresh().await {
                Ok(summary) => on_pass(&summary),
                Err(err) => log::warn!("container listing failed: {err}"),
            }
            tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                _ = tokio::time::sleep(interval) => {}
            }
        }
    }

    pub async fn create_cluster(
        &self,
        options: &ClusterCreateOptions,
        cancel: CancellationToken,
    ) -> Result<ReconcileSummary, MinikubeError> {
        if let Err(err) = create_cluster(&self.cli, options, cancel).await {
            if !err.is_cancelled() {
                self.notifier.error(&format!(
                    "Failed to create minikube cluster {}: {err}",
                    options.name
                ));
            }
            return Err(err);
        }
        self.notifier
            .info(&format!("Minikube cluster {} created", options.name));
        self.refresh().await
    }

    pub async fn cluster_action(
        &self,
        name: &str,
        action: ClusterAction,
    ) -> Result<(), MinikubeError> {
        let connection = self.connection(name).await?;
        let result = match action {
            ClusterAction::Start => connection.start().await,
            ClusterAction::Stop => connection.stop().await,
            ClusterAction::Delete => connection.delete().await,
        };
        if let Err(err) = &result {
            self.notifier.error(&format!(
                "Failed to {} minikube cluster {name}: {err}",
                action.verb()
            ));
        }
        result?;
        self.refresh().await?;
        Ok(())
    }

    pub async fn move_image(&self, image: &ImageRef) -> Result<Option<String>, MinikubeError> {
        let clusters = self.clusters().await?;
        self.images.move_image(image, &clusters).await
    }

    pub async fn deactivate(self) {
        self.reconciler.dispose_all().await;
    }

    async fn connection(&self, name: &str) -> Result<Arc<ProviderConnection>, MinikubeError> {
        self.refresh().await?;
        self.reconciler
            .connection(name)
            .await
            .ok_or_else(|| MinikubeError::NotFound(format!("no minikube cluster named {name}")))
    }
}
