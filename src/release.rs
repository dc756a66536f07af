use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

use crate::error::MinikubeError;
use crate::minikube::strip_version;
use crate::platform::BINARY_NAME;

const RELEASES_PER_PAGE: u8 = 10;
const RECENT_RELEASES_KEPT: usize = 5;
const USER_AGENT: &str = "minikube-lifecycle";

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GitHubRelease {
    pub id: u64,
    pub tag_name: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub prerelease: bool,
    #[serde(default)]
    pub published_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct GitHubAsset {
    pub id: u64,
    pub name: String,
    #[serde(default)]
    pub size: u64,
}

#[async_trait]
pub trait ReleaseRegistry: Send + Sync {
    async fn list_releases(
        &self,
        owner: &str,
        repo: &str,
        per_page: u8,
    ) -> Result<Vec<GitHubRelease>, MinikubeError>;

    async fn list_release_assets(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
    ) -> Result<Vec<GitHubAsset>, MinikubeError>;

    async fn get_release_asset(
        &self,
        owner: &str,
        repo: &str,
        asset_id: u64,
    ) -> Result<Vec<u8>, MinikubeError>;
}

pub struct GitHubRegistry {
    client: reqwest::Client,
    api_base: String,
    token: Option<String>,
}

impl GitHubRegistry {
    pub fn new(api_base: &str, token: Option<String>) -> Result<GitHubRegistry, MinikubeError> {
        let client = reqwest::Client::builder().user_agent(USER_AGENT).build()?;
        Ok(GitHubRegistry {
            client,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str, accept: &str) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header("Accept", accept)
            .header("X-GitHub-Api-Version", "2022-11-28");
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }
}

#[async_trait]
impl ReleaseRegistry for GitHubRegistry {
    async fn list_releases(
        &self,
        owner: &str,
        repo: &str,
        per_page: u8,
    ) -> Result<Vec<GitHubRelease>, MinikubeError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/releases?per_page={per_page}",
            self.api_base
        );
        let response = self
            .get(&url, "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn list_release_assets(
        &self,
        owner: &str,
        repo: &str,
        release_id: u64,
    ) -> Result<Vec<GitHubAsset>, MinikubeError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/releases/{release_id}/assets?per_page=100",
            self.api_base
        );
        let response = self
            .get(&url, "application/vnd.github+json")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.json().await?)
    }

    async fn get_release_asset(
        &self,
        owner: &str,
        repo: &str,
        asset_id: u64,
    ) -> Result<Vec<u8>, MinikubeError> {
        let url = format!(
            "{}/repos/{owner}/{repo}/releases/assets/{asset_id}",
            self.api_base
        );
        let response = self
            .get(&url, "application/octet-stream")
            .send()
            .await?
            .error_for_status()?;
        Ok(response.bytes().await?.to_vec())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReleaseMetadata {
    pub label: String,
    pub tag: String,
    pub id: u64,
}

impl ReleaseMetadata {
    pub fn version(&self) -> String {
        strip_version(&self.tag)
    }
}

impl From<GitHubRelease> for ReleaseMetadata {
    fn from(release: GitHubRelease) -> Self {
        let label = release
            .name
            .filter(|name| !name.trim().is_empty())
            .unwrap_or_else(|| release.tag_name.clone());
        ReleaseMetadata {
            label,
            tag: release.tag_name,
            id: release.id,
        }
    }
}

/// Maps host OS/arch names (Node or Rust spelling) to the release naming scheme.
pub fn release_platform(os: &str, arch: &str) -> (String, String) {
    let os = match os {
        "win32" | "windows" => "windows",
        "darwin" | "macos" => "darwin",
        other => other,
    };
    let arch = match arch {
        "x64" | "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    };
    (os.to_string(), arch.to_string())
}

pub fn asset_name(os: &str, arch: &str) -> String {
    let (os, arch) = release_platform(os, arch);
    let suffix = if os == "windows" { ".exe" } else { "" };
    format!("{BINARY_NAME}-{os}-{arch}{suffix}")
}

pub struct ReleaseSource {
    registry: Arc<dyn ReleaseRegistry>,
    owner: String,
    repo: String,
}

impl ReleaseSource {
    pub fn new(registry: Arc<dyn ReleaseRegistry>, owner: &str, repo: &str) -> ReleaseSource {
        ReleaseSource {
            registry,
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    pub async fn list_recent_releases(&self) -> Result<Vec<ReleaseMetadata>, MinikubeError> {
        let releases = self
            .registry
            .list_releases(&self.owner, &self.repo, RELEASES_PER_PAGE)
            .await?;
        Ok(releases
            .into_iter()
            .filter(|release| !release.prerelease)
            .take(RECENT_RELEASES_KEPT)
            .map(ReleaseMetadata::from)
            .collect())
    }

    pub async fn latest(&self) -> Result<ReleaseMetadata, MinikubeError> {
        self.list_recent_releases()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                MinikubeError::NotFound(format!(
                    "no releases found for {}/{}",
                    self.owner, self.repo
                ))
            })
    }

    pub async fn resolve_asset_id(
        &self,
        release_id: u64,
        os: &str,
        arch: &str,
    ) -> Result<u64, MinikubeError> {
        let wanted = asset_name(os, arch);
        let assets = self
            .registry
            .list_release_assets(&self.owner, &self.repo, release_id)
            .await?;
        assets
            .into_iter()
            .find(|asset| asset.name == wanted)
            .map(|asset| asset.id)
            .ok_or_else(|| {
                let (os, arch) = release_platform(os, arch);
                MinikubeError::AssetNotFound { os, arch }
            })
    }

    pub async fn fetch_asset(&self, asset_id: u64, destination: &Path) -> Result<(), MinikubeError> {
        let content = self
            .registry
            .get_release_asset(&self.owner, &self.repo, asset_id)
            .await?;
        if let Some(parent) = destination.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(destination, &content).await?;
        log::info!(
            "downloaded asset {asset_id} ({} bytes) to {}",
            content.len(),
            destination.display()
        );
        Ok(())
    }
}
