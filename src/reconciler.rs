use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard};

use crate::cluster::{managed_clusters, ClusterStatus, ContainerInfo, EngineType, ManagedCluster};
use crate::engine::ContainerEngine;
use crate::error::MinikubeError;
use crate::host::{Disposable, Provider};
use crate::minikube::MinikubeCli;

/// Host-visible handle for one cluster. The same instance lives for as long as
/// the cluster keeps showing up; only its status and endpoint change.
pub struct ProviderConnection {
    name: String,
    cli: Arc<MinikubeCli>,
    cluster: Mutex<ManagedCluster>,
}

impl ProviderConnection {
    fn new(cluster: ManagedCluster, cli: Arc<MinikubeCli>) -> ProviderConnection {
        ProviderConnection {
            name: cluster.name.clone(),
            cli,
            cluster: Mutex::new(cluster),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> ClusterStatus {
        self.lock().status
    }

    pub fn endpoint(&self) -> String {
        self.lock().endpoint()
    }

    pub fn engine_type(&self) -> EngineType {
        self.lock().engine_type
    }

    pub fn cluster(&self) -> ManagedCluster {
        self.lock().clone()
    }

    pub async fn start(&self) -> Result<(), MinikubeError> {
        self.cli.start(&self.name).await.map(|_| ())
    }

    pub async fn stop(&self) -> Result<(), MinikubeError> {
        self.cli.stop(&self.name).await.map(|_| ())
    }

    pub async fn delete(&self) -> Result<(), MinikubeError> {
        self.cli.delete(&self.name).await.map(|_| ())
    }

    fn update(&self, cluster: ManagedCluster) {
        *self.lock() = cluster;
    }

    fn lock(&self) -> MutexGuard<'_, ManagedCluster> {
        match self.cluster.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

struct Registered {
    connection: Arc<ProviderConnection>,
    registration: Box<dyn Disposable>,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconcileSummary {
    pub registered: Vec<String>,
    pub updated: Vec<String>,
    pub disposed: Vec<String>,
}

impl ReconcileSummary {
    pub fn changed(&self) -> bool {
        !self.registered.is_empty() || !self.disposed.is_empty()
    }
}

pub struct ClusterReconciler {
    provider: Arc<dyn Provider>,
    cli: Arc<MinikubeCli>,
    registry: tokio::sync::Mutex<Vec<Registered>>,
}

impl ClusterReconciler {
    pub fn new(provider: Arc<dyn Provider>, cli: Arc<MinikubeCli>) -> ClusterReconciler {
        ClusterReconciler {
            provider,
            cli,
            registry: tokio::sync::Mutex::new(Vec::new()),
        }
    }

    pub async fn reconcile(&self, containers: &[ContainerInfo]) -> ReconcileSummary {
        let clusters = managed_clusters(containers);
        let mut registry = self.registry.lock().await;
        let mut summary = ReconcileSummary::default();

        for cluster in &clusters {
            match registry
                .iter()
                .find(|entry| entry.connection.name() == cluster.name)
            {
                Some(entry) => {
                    entry.connection.update(cluster.clone());
                    summary.updated.push(cluster.name.clone());
                }
                None => {
                    let connection =
                        Arc::new(ProviderConnection::new(cluster.clone(), self.cli.clone()));
                    let registration = self.provider.register_connection(connection.clone());
                    log::info!("registered minikube cluster {}", cluster.name);
                    registry.push(Registered {
                        connection,
                        registration,
                    });
                    summary.registered.push(cluster.name.clone());
                }
            }
        }

        let mut kept = Vec::with_capacity(registry.len());
        for entry in registry.drain(..) {
            if clusters
                .iter()
                .any(|cluster| cluster.name == entry.connection.name())
            {
                kept.push(entry);
            } else {
                entry.registration.dispose();
                log::info!("disposed minikube cluster {}", entry.connection.name());
                summary.disposed.push(entry.connection.name().to_string());
            }
        }
        *registry = kept;
        summary
    }

    pub async fn refresh(
        &self,
        engine: &dyn ContainerEngine,
    ) -> Result<ReconcileSummary, MinikubeError> {
        let containers = engine.list_containers().await?;
        Ok(self.reconcile(&containers).await)
    }

    pub async fn connections(&self) -> Vec<Arc<ProviderConnection>> {
        self.registry
            .lock()
            .await
            .iter()
            .map(|entry| entry.connection.clone())
            .collect()
    }

    pub async fn connection(&self, name: &str) -> Option<Arc<ProviderConnection>> {
        self.registry
            .lock()
            .await
            .iter()
            .find(|entry| entry.connection.name() == name)
            .map(|entry| entry.connection.clone())
    }

    pub async fn clusters(&self) -> Vec<ManagedCluster> {
        self.registry
            .lock()
            .await
            .iter()
            .map(|entry| entry.connection.cluster())
            .collect()
    }

    pub async fn dispose_all(&self) {
        let mut registry = self.registry.lock().await;
        for entry in registry.drain(..) {
            entry.registration.dispose();
        }
    }
}
