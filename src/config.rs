use dirs::home_dir;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cluster::EngineType;
use crate::error::MinikubeError;
use crate::platform::HostOs;

pub const CONFIG_VERSION: u32 = 1;
pub const CONFIG_ENV: &str = "MINIKUBE_LIFECYCLE_CONFIG";
pub const CONFIG_DIR_ENV: &str = "MINIKUBE_LIFECYCLE_CONFIG_DIR";
pub const MACOS_EXTRA_PATH: &str = "/usr/local/bin:/opt/homebrew/bin:/opt/local/bin:/opt/podman/bin";

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub version: u32,
    pub minikube: MinikubeSettings,
    pub release: ReleaseSettings,
    pub engine: EngineSettings,
    pub create: CreateSettings,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Default)]
#[serde(default, deny_unknown_fields)]
pub struct MinikubeSettings {
    pub home: String,
    pub kubeconfig: String,
    pub storage_dir: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct ReleaseSettings {
    pub owner: String,
    pub repo: String,
    pub api_base: String,
    pub token_env: String,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct EngineSettings {
    pub kind: EngineType,
    pub poll_interval_sec: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct CreateSettings {
    pub driver: String,
    pub container_runtime: String,
    pub base_image: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            minikube: MinikubeSettings::default(),
            release: ReleaseSettings::default(),
            engine: EngineSettings::default(),
            create: CreateSettings::default(),
        }
    }
}

impl Default for ReleaseSettings {
    fn default() -> Self {
        Self {
            owner: "kubernetes".to_string(),
            repo: "minikube".to_string(),
            api_base: "https://api.github.com".to_string(),
            token_env: "GITHUB_TOKEN".to_string(),
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            kind: EngineType::Podman,
            poll_interval_sec: 5,
        }
    }
}

impl Default for CreateSettings {
    fn default() -> Self {
        Self {
            driver: "podman".to_string(),
            container_runtime: "cri-o".to_string(),
            base_image: String::new(),
        }
    }
}

pub fn default_config_dir() -> PathBuf {
    if let Ok(path) = env::var(CONFIG_DIR_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    let base = dirs::config_dir()
        .or_else(|| home_dir().map(|home| home.join(".config")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("minikube-lifecycle")
}

pub fn resolve_config_path(override_path: Option<&PathBuf>) -> PathBuf {
    if let Some(path) = override_path {
        return path.clone();
    }
    if let Ok(path) = env::var(CONFIG_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }
    default_config_dir().join("config.yaml")
}

pub fn read_config_from_str(content: &str) -> Result<Config, MinikubeError> {
    let cfg: Config = serde_yaml::from_str(content)?;
    if cfg.version != CONFIG_VERSION {
        return Err(MinikubeError::Config(format!(
            "unsupported config version {}",
            cfg.version
        )));
    }
    validate_config(&cfg)?;
    Ok(cfg)
}

pub fn read_config(path: &Path) -> Result<Config, MinikubeError> {
    let content = fs::read_to_string(path)?;
    read_config_from_str(&content)
}

pub fn load_config(path: &Path) -> Result<Config, MinikubeError> {
    if !path.exists() {
        log::debug!("no config at {}, using defaults", path.display());
        return Ok(Config::default());
    }
    read_config(path)
}

pub fn validate_config(cfg: &Config) -> Result<(), MinikubeError> {
    if cfg.release.owner.trim().is_empty() || cfg.release.repo.trim().is_empty() {
        return Err(MinikubeError::Config(
            "release.owner and release.repo must be non-empty".to_string(),
        ));
    }
    if !cfg.release.api_base.starts_with("http://") && !cfg.release.api_base.starts_with("https://")
    {
        return Err(MinikubeError::Config(format!(
            "release.api_base must be an http(s) URL, got '{}'",
            cfg.release.api_base
        )));
    }
    if cfg.engine.poll_interval_sec == 0 {
        return Err(MinikubeError::Config(
            "engine.poll_interval_sec must be greater than 0".to_string(),
        ));
    }
    for (field, value) in [
        ("minikube.home", &cfg.minikube.home),
        ("minikube.kubeconfig", &cfg.minikube.kubeconfig),
        ("minikube.storage_dir", &cfg.minikube.storage_dir),
    ] {
        if value.contains('\n') || value.contains('\r') {
            return Err(MinikubeError::Config(format!(
                "{field} contains an invalid newline"
            )));
        }
    }
    Ok(())
}

pub fn default_config_yaml() -> Result<String, MinikubeError> {
    Ok(serde_yaml::to_string(&Config::default())?)
}

/// Writes the default config unless one already exists. Returns whether a file was created.
pub fn init_config(path: &Path) -> Result<bool, MinikubeError> {
    if path.exists() {
        return Ok(false);
    }
    ensure_parent(path)?;
    fs::write(path, default_config_yaml()?)?;
    Ok(true)
}

pub fn expand_path(input: &str) -> String {
    if let Some(stripped) = input.strip_prefix("~/") {
        if let Some(home) = home_dir() {
            return home.join(stripped).to_string_lossy().to_string();
        }
    }
    input.to_string()
}

pub fn default_storage_dir() -> PathBuf {
    let base = dirs::data_dir()
        .or_else(|| home_dir().map(|home| home.join(".local").join("share")))
        .unwrap_or_else(|| PathBuf::from("."));
    base.join("minikube-lifecycle").join("bin")
}

pub fn storage_dir(cfg: &Config) -> PathBuf {
    let configured = cfg.minikube.storage_dir.trim();
    if configured.is_empty() {
        default_storage_dir()
    } else {
        PathBuf::from(expand_path(configured))
    }
}

pub fn github_token(cfg: &Config) -> Option<String> {
    let name = cfg.release.token_env.trim();
    if name.is_empty() {
        return None;
    }
    env::var(name).ok().filter(|token| !token.trim().is_empty())
}

pub fn ensure_parent(path: &Path) -> Result<(), MinikubeError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    Ok(())
}

pub fn minikube_env(cfg: &Config, os: HostOs) -> BTreeMap<String, String> {
    compose_env(cfg, os, |key| env::var(key).ok())
}

pub fn compose_env<F>(cfg: &Config, os: HostOs, lookup: F) -> BTreeMap<String, String>
where
    F: Fn(&str) -> Option<String>,
{
    let mut envs = BTreeMap::new();
    let path = lookup("PATH").filter(|value| !value.is_empty());
    let path = match (os, path) {
        (HostOs::Mac, Some(path)) => Some(format!("{path}:{MACOS_EXTRA_PATH}")),
        (HostOs::Mac, None) => Some(MACOS_EXTRA_PATH.to_string()),
        (_, path) => path,
    };
    if let Some(path) = path {
        envs.insert("PATH".to_string(), path);
    }
    for (key, configured) in [
        ("MINIKUBE_HOME", &cfg.minikube.home),
        ("KUBECONFIG", &cfg.minikube.kubeconfig),
    ] {
        let value = if configured.trim().is_empty() {
            lookup(key).filter(|value| !value.trim().is_empty())
        } else {
            Some(expand_path(configured.trim()))
        };
        if let Some(value) = value {
            envs.insert(key.to_string(), value);
        }
    }
    envs
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: BTreeMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn config_unknown_field_errors() {
        let yaml = r#"
version: 1
unknown: true
"#;
        let result: Result<Config, _> = serde_yaml::from_str(yaml);
        assert!(result.is_err());
    }

    #[test]
    fn config_defaults_apply() {
        let cfg = read_config_from_str("version: 1").expect("config");
        assert_eq!(cfg.release.owner, "kubernetes");
        assert_eq!(cfg.release.repo, "minikube");
        assert_eq!(cfg.engine.kind, EngineType::Podman);
        assert_eq!(cfg.engine.poll_interval_sec, 5);
        assert_eq!(cfg.create.driver, "podman");
        assert_eq!(cfg.create.container_runtime, "cri-o");
        assert!(cfg.minikube.home.is_empty());
    }

    #[test]
    fn config_rejects_other_versions_and_zero_interval() {
        let err = read_config_from_str("version: 7").expect_err("version");
        assert!(err.to_string().contains("unsupported config version 7"));
        let err = read_config_from_str("version: 1\nengine:\n  poll_interval_sec: 0\n")
            .expect_err("interval");
        assert!(err.to_string().contains("poll_interval_sec"));
    }

    #[test]
    fn init_config_creates_and_preserves_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");
        assert!(init_config(&path).unwrap());
        let cfg = read_config(&path).unwrap();
        assert_eq!(cfg, Config::default());

        fs::write(&path, "version: 1\nengine:\n  kind: docker\n").unwrap();
        assert!(!init_config(&path).unwrap());
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.engine.kind, EngineType::Docker);
    }

    #[test]
    fn load_config_missing_file_uses_defaults() {
        let dir = tempdir().unwrap();
        let cfg = load_config(&dir.path().join("absent.yaml")).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn storage_dir_prefers_configured_value() {
        let mut cfg = Config::default();
        cfg.minikube.storage_dir = "/srv/minikube-bin".to_string();
        assert_eq!(storage_dir(&cfg), PathBuf::from("/srv/minikube-bin"));
        cfg.minikube.storage_dir = String::new();
        assert!(storage_dir(&cfg).ends_with("minikube-lifecycle/bin"));
    }

    #[test]
    fn mac_path_gets_extra_search_dirs() {
        let cfg = Config::default();
        let envs = compose_env(&cfg, HostOs::Mac, lookup_from(&[("PATH", "/usr/bin")]));
        assert_eq!(
            envs.get("PATH").map(String::as_str),
            Some("/usr/bin:/usr/local/bin:/opt/homebrew/bin:/opt/local/bin:/opt/podman/bin")
        );
        let envs = compose_env(&cfg, HostOs::Linux, lookup_from(&[("PATH", "/usr/bin")]));
        assert_eq!(envs.get("PATH").map(String::as_str), Some("/usr/bin"));
    }

    #[test]
    fn minikube_home_and_kubeconfig_prefer_config_then_env_then_unset() {
        let mut cfg = Config::default();
        let envs = compose_env(&cfg, HostOs::Linux, lookup_from(&[]));
        assert!(!envs.contains_key("MINIKUBE_HOME"));
        assert!(!envs.contains_key("KUBECONFIG"));

        let envs = compose_env(
            &cfg,
            HostOs::Linux,
            lookup_from(&[("MINIKUBE_HOME", "/env/mk"), ("KUBECONFIG", "/env/kube")]),
        );
        assert_eq!(envs.get("MINIKUBE_HOME").map(String::as_str), Some("/env/mk"));
        assert_eq!(envs.get("KUBECONFIG").map(String::as_str), Some("/env/kube"));

        cfg.minikube.home = "/cfg/mk".to_string();
        cfg.minikube.kubeconfig = "/cfg/kube".to_string();
        let envs = compose_env(
            &cfg,
            HostOs::Linux,
            lookup_from(&[("MINIKUBE_HOME", "/env/mk"), ("KUBECONFIG", "/env/kube")]),
        );
        assert_eq!(envs.get("MINIKUBE_HOME").map(String::as_str), Some("/cfg/mk"));
        assert_eq!(envs.get("KUBECONFIG").map(String::as_str), Some("/cfg/kube"));
    }
}
