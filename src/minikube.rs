use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use tokio_util::sync::CancellationToken;

use crate::error::MinikubeError;
use crate::process::{exec, CommandOutput, ExecOptions, ProcessRunner};

pub fn strip_version(raw: &str) -> String {
    let trimmed = raw.trim();
    trimmed.strip_prefix('v').unwrap_or(trimmed).trim().to_string()
}

/// Textual comparison after normalisation; `v1.9.0` and `1.10.0` differ, no ordering implied.
pub fn versions_match(installed: &str, candidate: &str) -> bool {
    strip_version(installed) == strip_version(candidate)
}

pub fn version_args() -> Vec<String> {
    vec!["version".to_string(), "--short".to_string()]
}

pub fn start_args(profile: &str) -> Vec<String> {
    vec![
        "start".to_string(),
        "--profile".to_string(),
        profile.to_string(),
    ]
}

pub fn stop_args(profile: &str) -> Vec<String> {
    vec![
        "stop".to_string(),
        "--profile".to_string(),
        profile.to_string(),
        "--keep-context-active".to_string(),
    ]
}

pub fn delete_args(profile: &str) -> Vec<String> {
    vec![
        "delete".to_string(),
        "--profile".to_string(),
        profile.to_string(),
    ]
}

pub fn image_load_args(profile: &str, archive: &Path) -> Vec<String> {
    vec![
        "-p".to_string(),
        profile.to_string(),
        "image".to_string(),
        "load".to_string(),
        archive.to_string_lossy().to_string(),
    ]
}

pub struct MinikubeCli {
    path: RwLock<Option<PathBuf>>,
    runner: Arc<dyn ProcessRunner>,
    env: BTreeMap<String, String>,
}

impl MinikubeCli {
    pub fn new(runner: Arc<dyn ProcessRunner>, env: BTreeMap<String, String>) -> MinikubeCli {
        MinikubeCli {
            path: RwLock::new(None),
            runner,
            env,
        }
    }

    pub fn path(&self) -> Option<PathBuf> {
        match self.path.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set_path(&self, path: Option<PathBuf>) {
        match self.path.write() {
            Ok(mut guard) => *guard = path,
            Err(poisoned) => *poisoned.into_inner() = path,
        }
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    pub fn runner(&self) -> &Arc<dyn ProcessRunner> {
        &self.runner
    }

    pub async fn run(
        &self,
        args: &[String],
        cancel: Option<CancellationToken>,
        log_output: bool,
    ) -> Result<CommandOutput, MinikubeError> {
        let Some(path) = self.path() else {
            return Err(MinikubeError::NotFound(
                "minikube is not installed".to_string(),
            ));
        };
        let mut options = ExecOptions::with_env(self.env.clone());
        options.cancel = cancel;
        options.log_output = log_output;
        exec(
            self.runner.as_ref(),
            &path.to_string_lossy(),
            args,
            &options,
        )
        .await
    }

    pub async fn version_of(&self, binary: &Path) -> Result<String, MinikubeError> {
        let output = exec(
            self.runner.as_ref(),
            &binary.to_string_lossy(),
            &version_args(),
            &ExecOptions::with_env(self.env.clone()),
        )
        .await?;
        let version = strip_version(&output.stdout);
        if version.is_empty() {
            return Err(MinikubeError::NotFound(format!(
                "{} did not report a version",
                binary.display()
            )));
        }
        Ok(version)
    }

    pub async fn start(&self, profile: &str) -> Result<CommandOutput, MinikubeError> {
        self.run(&start_args(profile), None, false).await
    }

    pub async fn stop(&self, profile: &str) -> Result<CommandOutput, MinikubeError> {
        self.run(&stop_args(profile), None, false).await
    }

    pub async fn delete(&self, profile: &str) -> Result<CommandOutput, MinikubeError> {
        self.run(&delete_args(profile), None, false).await
    }

    pub async fn image_load(
        &self,
        profile: &str,
        archive: &Path,
    ) -> Result<CommandOutput, MinikubeError> {
        self.run(&image_load_args(profile, archive), None, true).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockProcessRunner;

    #[test]
    fn strip_version_removes_prefix_and_whitespace() {
        assert_eq!(strip_version("v1.2.3 "), "1.2.3");
        assert_eq!(strip_version("  v1.33.1\n"), "1.33.1");
        assert_eq!(strip_version("1.2.3"), "1.2.3");
    }

    #[test]
    fn version_comparison_is_textual_not_semantic() {
        assert!(versions_match("1.33.1", "v1.33.1"));
        // An older registry tag still counts as different.
        assert!(!versions_match("1.10.0", "v1.9.0"));
    }

    #[test]
    fn lifecycle_argument_vectors() {
        assert_eq!(start_args("minikube"), vec!["start", "--profile", "minikube"]);
        assert_eq!(
            stop_args("dev"),
            vec!["stop", "--profile", "dev", "--keep-context-active"]
        );
        assert_eq!(delete_args("dev"), vec!["delete", "--profile", "dev"]);
        assert_eq!(
            image_load_args("dev", Path::new("/tmp/img.tar")),
            vec!["-p", "dev", "image", "load", "/tmp/img.tar"]
        );
    }

    #[tokio::test]
    async fn run_without_binary_is_not_found() {
        let runner = Arc::new(MockProcessRunner::default());
        let cli = MinikubeCli::new(runner.clone(), BTreeMap::new());
        let err = cli.start("minikube").await.expect_err("no binary");
        assert!(matches!(err, MinikubeError::NotFound(_)));
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn run_uses_current_path_and_env() {
        let runner = Arc::new(MockProcessRunner::default());
        let mut env = BTreeMap::new();
        env.insert("KUBECONFIG".to_string(), "/cfg/kube".to_string());
        let cli = MinikubeCli::new(runner.clone(), env);
        cli.set_path(Some(PathBuf::from("/usr/local/bin/minikube")));
        cli.stop("dev").await.unwrap();
        let calls = runner.calls();
        assert_eq!(calls[0].program, "/usr/local/bin/minikube");
        assert_eq!(calls[0].args, stop_args("dev"));
        assert_eq!(
            calls[0].env.get("KUBECONFIG").map(String::as_str),
            Some("/cfg/kube")
        );
    }

    #[tokio::test]
    async fn version_of_parses_short_output() {
        let runner = Arc::new(MockProcessRunner::default());
        runner.push_stdout("v1.33.1\n");
        let cli = MinikubeCli::new(runner.clone(), BTreeMap::new());
        let version = cli
            .version_of(Path::new("/opt/minikube"))
            .await
            .unwrap();
        assert_eq!(version, "1.33.1");
        assert_eq!(runner.calls()[0].args, vec!["version", "--short"]);
    }
}
