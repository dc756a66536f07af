use async_trait::async_trait;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use crate::cluster::{ContainerInfo, ContainerPort, EngineType, CLUSTER_LABEL};
use crate::error::MinikubeError;
use crate::process::{exec, ExecOptions, ProcessRunner};

#[async_trait]
pub trait ContainerEngine: Send + Sync {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, MinikubeError>;

    async fn save_image(
        &self,
        engine_id: &str,
        image: &str,
        destination: &Path,
    ) -> Result<(), MinikubeError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectRecord {
    id: String,
    #[serde(default)]
    config: InspectConfig,
    #[serde(default)]
    state: InspectState,
    #[serde(default)]
    network_settings: InspectNetwork,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectConfig {
    #[serde(default)]
    labels: Option<BTreeMap<String, String>>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectState {
    #[serde(default)]
    status: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct InspectNetwork {
    #[serde(default)]
    ports: Option<BTreeMap<String, Option<Vec<HostBinding>>>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct HostBinding {
    #[serde(default)]
    host_port: String,
}

pub struct CliContainerEngine {
    runner: Arc<dyn ProcessRunner>,
    engine_type: EngineType,
    env: BTreeMap<String, String>,
}

impl CliContainerEngine {
    pub fn new(
        runner: Arc<dyn ProcessRunner>,
        engine_type: EngineType,
        env: BTreeMap<String, String>,
    ) -> CliContainerEngine {
        CliContainerEngine {
            runner,
            engine_type,
            env,
        }
    }

    pub fn engine_id(&self) -> &'static str {
        self.engine_type.command()
    }

    async fn engine(&self, args: Vec<String>) -> Result<String, MinikubeError> {
        let output = exec(
            self.runner.as_ref(),
            self.engine_type.command(),
            &args,
            &ExecOptions::with_env(self.env.clone()),
        )
        .await?;
        Ok(output.stdout)
    }
}

#[async_trait]
impl ContainerEngine for CliContainerEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, MinikubeError> {
        let ids = self
            .engine(vec![
                "ps".to_string(),
                "-a".to_string(),
                "-q".to_string(),
                "--filter".to_string(),
                format!("label={CLUSTER_LABEL}"),
            ])
            .await?;
        let ids: Vec<String> = ids.split_whitespace().map(str::to_string).collect();
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut args = vec!["container".to_string(), "inspect".to_string()];
        args.extend(ids);
        let raw = self.engine(args).await?;
        parse_inspect(&raw, self.engine_type, self.engine_id())
    }

    async fn save_image(
        &self,
        engine_id: &str,
        image: &str,
        destination: &Path,
    ) -> Result<(), MinikubeError> {
        if engine_id != self.engine_id() {
            return Err(MinikubeError::NotFound(format!(
                "unknown container engine {engine_id}"
            )));
        }
        self.engine(vec![
            "save".to_string(),
            "-o".to_string(),
            destination.to_string_lossy().to_string(),
            image.to_string(),
        ])
        .await?;
        Ok(())
    }
}

fn parse_port_key(key: &str) -> Option<(u16, String)> {
    let (port, protocol) = key.split_once('/').unwrap_or((key, "tcp"));
    Some((port.parse().ok()?, protocol.to_string()))
}

pub(crate) fn parse_inspect(
    raw: &str,
    engine_type: EngineType,
    engine_id: &str,
) -> Result<Vec<ContainerInfo>, MinikubeError> {
    let records: Vec<InspectRecord> = serde_json::from_str(raw)?;
    Ok(records
        .into_iter()
        .map(|record| {
            let mut ports = Vec::new();
            for (key, bindings) in record.network_settings.ports.unwrap_or_default() {
                let Some((private_port, protocol)) = parse_port_key(&key) else {
                    continue;
                };
                let public_port = bindings
                    .unwrap_or_default()
                    .iter()
                    .find_map(|binding| binding.host_port.parse().ok());
                ports.push(ContainerPort {
                    private_port,
                    public_port,
                    protocol,
                });
            }
            ContainerInfo {
                id: record.id,
                engine_id: engine_id.to_string(),
                engine_type,
                labels: record.config.labels.unwrap_or_default(),
                state: record.state.status,
                ports,
            }
        })
        .collect())
}
