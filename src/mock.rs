use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::process::Child;

use crate::cluster::{ContainerInfo, ContainerPort, EngineType, ManagedCluster, API_SERVER_PORT, CLUSTER_LABEL};
use crate::engine::ContainerEngine;
use crate::error::{MinikubeError, ProcessErrorDetails};
use crate::host::{ClusterPicker, Disposable, Notifier, Provider};
use crate::platform::{HostOs, Platform};
use crate::process::{CommandOutput, ExecOptions, ProcessRunner};
use crate::reconciler::ProviderConnection;
use crate::release::{GitHubAsset, GitHubRelease, ReleaseRegistry};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub elevate: bool,
    pub cancellable: bool,
}

#[derive(Default)]
pub struct MockProcessRunner {
    calls: Mutex<Vec<RecordedCall>>,
    outputs: Mutex<VecDeque<Result<CommandOutput, MinikubeError>>>,
}

impl MockProcessRunner {
    pub fn push_output(&self, output: CommandOutput) {
        lock(&self.outputs).push_back(Ok(output));
    }

    pub fn push_stdout(&self, stdout: &str) {
        self.push_output(CommandOutput {
            status_code: 0,
            stdout: stdout.to_string(),
            stderr: String::new(),
        });
    }

    pub fn push_failure(&self, status_code: i32, stderr: &str) {
        self.push_output(CommandOutput {
            status_code,
            stdout: String::new(),
            stderr: stderr.to_string(),
        });
    }

    pub fn push_error(&self, err: MinikubeError) {
        lock(&self.outputs).push_back(Err(err));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }
}

#[async_trait]
impl ProcessRunner for MockProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<CommandOutput, MinikubeError> {
        lock(&self.calls).push(RecordedCall {
            program: program.to_string(),
            args: args.to_vec(),
            env: options.env.clone(),
            elevate: options.elevate,
            cancellable: options.cancel.is_some(),
        });
        if options.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(MinikubeError::Cancelled);
        }
        lock(&self.outputs).pop_front().unwrap_or_else(|| {
            Ok(CommandOutput {
                status_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        })
    }
}

pub struct MockPlatform {
    os: HostOs,
    system_dir: Option<PathBuf>,
}

impl MockPlatform {
    pub fn linux() -> MockPlatform {
        MockPlatform {
            os: HostOs::Linux,
            system_dir: Some(PathBuf::from("/usr/local/bin")),
        }
    }

    pub fn windows() -> MockPlatform {
        MockPlatform {
            os: HostOs::Windows,
            system_dir: Some(PathBuf::from("C:/Users/dev/AppData/Local/Microsoft/WindowsApps")),
        }
    }

    pub fn with_system_dir(mut self, dir: Option<PathBuf>) -> MockPlatform {
        self.system_dir = dir;
        self
    }
}

#[async_trait]
impl Platform for MockPlatform {
    fn os(&self) -> HostOs {
        self.os
    }

    fn arch(&self) -> &str {
        "x86_64"
    }

    fn system_install_dir(&self) -> Option<PathBuf> {
        self.system_dir.clone()
    }

    fn elevated_command(&self, program: &str, args: &[String]) -> (String, Vec<String>) {
        (program.to_string(), args.to_vec())
    }

    fn promote_command(&self, source: &Path, destination: &Path) -> (String, Vec<String>) {
        (
            "mv".to_string(),
            vec![
                source.to_string_lossy().to_string(),
                destination.to_string_lossy().to_string(),
            ],
        )
    }

    fn remove_command(&self, path: &Path) -> (String, Vec<String>) {
        ("rm".to_string(), vec![path.to_string_lossy().to_string()])
    }

    async fn kill_process_tree(&self, child: &mut Child) -> io::Result<()> {
        let _ = child.start_kill();
        child.wait().await.map(|_| ())
    }
}

pub fn container(name: Option<&str>, state: &str, public_port: Option<u16>) -> ContainerInfo {
    let mut labels = BTreeMap::new();
    if let Some(name) = name {
        labels.insert(CLUSTER_LABEL.to_string(), name.to_string());
    }
    ContainerInfo {
        id: format!("{}-id", name.unwrap_or("plain")),
        engine_id: "podman.podman-machine-default".to_string(),
        engine_type: EngineType::Podman,
        labels,
        state: state.to_string(),
        ports: vec![ContainerPort {
            private_port: API_SERVER_PORT,
            public_port,
            protocol: "tcp".to_string(),
        }],
    }
}

pub fn write_executable(path: &Path, content: &str) -> PathBuf {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
    }
    path.to_path_buf()
}

pub fn github_release(id: u64, tag: &str, prerelease: bool) -> GitHubRelease {
    GitHubRelease {
        id,
        tag_name: tag.to_string(),
        name: Some(tag.to_string()),
        prerelease,
        published_at: None,
    }
}

#[derive(Default)]
pub struct MockRegistry {
    releases: Vec<GitHubRelease>,
    assets: HashMap<u64, Vec<GitHubAsset>>,
    contents: HashMap<u64, Vec<u8>>,
    page_sizes: Mutex<Vec<u8>>,
}

impl MockRegistry {
    pub fn with_releases(releases: Vec<GitHubRelease>) -> MockRegistry {
        MockRegistry {
            releases,
            ..MockRegistry::default()
        }
    }

    pub fn add_asset(&mut self, release_id: u64, asset_id: u64, name: &str) {
        self.assets.entry(release_id).or_default().push(GitHubAsset {
            id: asset_id,
            name: name.to_string(),
            size: 0,
        });
    }

    pub fn set_content(&mut self, asset_id: u64, content: Vec<u8>) {
        self.contents.insert(asset_id, content);
    }

    pub fn requested_page_sizes(&self) -> Vec<u8> {
        lock(&self.page_sizes).clone()
    }
}

#[async_trait]
impl ReleaseRegistry for MockRegistry {
    async fn list_releases(
        &self,
        _owner: &str,
        _repo: &str,
        per_page: u8,
    ) -> Result<Vec<GitHubRelease>, MinikubeError> {
        lock(&self.page_sizes).push(per_page);
        Ok(self
            .releases
            .iter()
            .take(per_page as usize)
            .cloned()
            .collect())
    }

    async fn list_release_assets(
        &self,
        _owner: &str,
        _repo: &str,
        release_id: u64,
    ) -> Result<Vec<GitHubAsset>, MinikubeError> {
        Ok(self.assets.get(&release_id).cloned().unwrap_or_default())
    }

    async fn get_release_asset(
        &self,
        _owner: &str,
        _repo: &str,
        asset_id: u64,
    ) -> Result<Vec<u8>, MinikubeError> {
        self.contents
            .get(&asset_id)
            .cloned()
            .ok_or_else(|| MinikubeError::NotFound(format!("asset {asset_id} not found")))
    }
}

#[derive(Debug, Clone)]
pub struct SavedImage {
    pub engine_id: String,
    pub image: String,
    pub destination: PathBuf,
}

#[derive(Default)]
pub struct MockEngine {
    containers: Mutex<Vec<ContainerInfo>>,
    saved: Mutex<Vec<SavedImage>>,
    save_failure: Mutex<Option<String>>,
}

impl MockEngine {
    pub fn set_containers(&self, containers: Vec<ContainerInfo>) {
        *lock(&self.containers) = containers;
    }

    pub fn fail_save(&self, message: &str) {
        *lock(&self.save_failure) = Some(message.to_string());
    }

    pub fn saved(&self) -> Vec<SavedImage> {
        lock(&self.saved).clone()
    }
}

#[async_trait]
impl ContainerEngine for MockEngine {
    async fn list_containers(&self) -> Result<Vec<ContainerInfo>, MinikubeError> {
        Ok(lock(&self.containers).clone())
    }

    async fn save_image(
        &self,
        engine_id: &str,
        image: &str,
        destination: &Path,
    ) -> Result<(), MinikubeError> {
        lock(&self.saved).push(SavedImage {
            engine_id: engine_id.to_string(),
            image: image.to_string(),
            destination: destination.to_path_buf(),
        });
        if let Some(message) = lock(&self.save_failure).clone() {
            return Err(MinikubeError::Process {
                message: message.clone(),
                details: ProcessErrorDetails {
                    command: format!("podman save -o {} {image}", destination.display()),
                    exit_code: Some(125),
                    raw_stderr: Some(message),
                },
            });
        }
        fs::write(destination, b"image-archive")?;
        Ok(())
    }
}

struct RecordingRegistration {
    name: String,
    disposals: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl Disposable for RecordingRegistration {
    fn dispose(&self) {
        *lock(&self.disposals).entry(self.name.clone()).or_default() += 1;
    }
}

#[derive(Default)]
pub struct RecordingProvider {
    registered: Mutex<Vec<Arc<ProviderConnection>>>,
    disposals: Arc<Mutex<BTreeMap<String, usize>>>,
}

impl RecordingProvider {
    pub fn registered(&self) -> Vec<Arc<ProviderConnection>> {
        lock(&self.registered).clone()
    }

    pub fn registered_names(&self) -> Vec<String> {
        self.registered()
            .iter()
            .map(|connection| connection.name().to_string())
            .collect()
    }

    pub fn disposals(&self, name: &str) -> usize {
        lock(&self.disposals).get(name).copied().unwrap_or(0)
    }
}

impl Provider for RecordingProvider {
    fn register_connection(&self, connection: Arc<ProviderConnection>) -> Box<dyn Disposable> {
        let name = connection.name().to_string();
        lock(&self.registered).push(connection);
        Box::new(RecordingRegistration {
            name,
            disposals: self.disposals.clone(),
        })
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    infos: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingNotifier {
    pub fn infos(&self) -> Vec<String> {
        lock(&self.infos).clone()
    }

    pub fn errors(&self) -> Vec<String> {
        lock(&self.errors).clone()
    }
}

impl Notifier for RecordingNotifier {
    fn info(&self, message: &str) {
        lock(&self.infos).push(message.to_string());
    }

    fn error(&self, message: &str) {
        lock(&self.errors).push(message.to_string());
    }
}

#[derive(Default)]
pub struct ScriptedPicker {
    choice: Option<String>,
    prompts: Mutex<usize>,
}

impl ScriptedPicker {
    pub fn choosing(name: &str) -> ScriptedPicker {
        ScriptedPicker {
            choice: Some(name.to_string()),
            prompts: Mutex::new(0),
        }
    }

    pub fn cancelling() -> ScriptedPicker {
        ScriptedPicker::default()
    }

    pub fn prompts(&self) -> usize {
        *lock(&self.prompts)
    }
}

impl ClusterPicker for ScriptedPicker {
    fn pick(&self, clusters: &[ManagedCluster]) -> Result<Option<ManagedCluster>, MinikubeError> {
        *lock(&self.prompts) += 1;
        Ok(self
            .choice
            .as_ref()
            .and_then(|name| clusters.iter().find(|cluster| &cluster.name == name))
            .cloned())
    }
}
