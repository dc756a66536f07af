use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Label minikube puts on the container backing each profile.
pub const CLUSTER_LABEL: &str = "name.minikube.sigs.k8s.io";
pub const API_SERVER_PORT: u16 = 8443;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineType {
    Podman,
    Docker,
}

impl EngineType {
    pub fn command(&self) -> &'static str {
        match self {
            EngineType::Podman => "podman",
            EngineType::Docker => "docker",
        }
    }
}

impl fmt::Display for EngineType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.command())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerPort {
    pub private_port: u16,
    pub public_port: Option<u16>,
    #[serde(rename = "type")]
    pub protocol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerInfo {
    pub id: String,
    pub engine_id: String,
    pub engine_type: EngineType,
    pub labels: BTreeMap<String, String>,
    pub state: String,
    pub ports: Vec<ContainerPort>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterStatus {
    Started,
    Stopped,
}

impl ClusterStatus {
    pub fn from_container_state(state: &str) -> ClusterStatus {
        if state == "running" {
            ClusterStatus::Started
        } else {
            ClusterStatus::Stopped
        }
    }
}

impl fmt::Display for ClusterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClusterStatus::Started => f.write_str("started"),
            ClusterStatus::Stopped => f.write_str("stopped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ManagedCluster {
    pub name: String,
    pub status: ClusterStatus,
    pub api_port: u16,
    pub engine_type: EngineType,
    pub engine_id: String,
}

impl ManagedCluster {
    pub fn endpoint(&self) -> String {
        format!("https://localhost:{}", self.api_port)
    }
}

fn api_port(ports: &[ContainerPort]) -> u16 {
    ports
        .iter()
        .find(|port| {
            port.private_port == API_SERVER_PORT && port.protocol.eq_ignore_ascii_case("tcp")
        })
        .and_then(|port| port.public_port)
        .unwrap_or(0)
}

/// Derives the managed clusters from a container listing. A repeated cluster
/// name keeps its first position and takes the values of its last container.
pub fn managed_clusters(containers: &[ContainerInfo]) -> Vec<ManagedCluster> {
    let mut clusters: Vec<ManagedCluster> = Vec::new();
    for container in containers {
        let Some(name) = container.labels.get(CLUSTER_LABEL) else {
            continue;
        };
        let cluster = ManagedCluster {
            name: name.clone(),
            status: ClusterStatus::from_container_state(&container.state),
            api_port: api_port(&container.ports),
            engine_type: container.engine_type,
            engine_id: container.engine_id.clone(),
        };
        match clusters.iter_mut().find(|existing| existing.name == cluster.name) {
            Some(existing) => *existing = cluster,
            None => clusters.push(cluster),
        }
    }
    clusters
}
