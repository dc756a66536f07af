use async_trait::async_trait;
use serde::Serialize;
use std::env;
use std::io;
use std::path::{Path, PathBuf};
use tokio::process::Child;

pub const BINARY_NAME: &str = "minikube";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HostOs {
    Linux,
    Mac,
    Windows,
}

impl HostOs {
    pub fn current() -> HostOs {
        match env::consts::OS {
            "macos" => HostOs::Mac,
            "windows" => HostOs::Windows,
            _ => HostOs::Linux,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostOs::Linux => "linux",
            HostOs::Mac => "macos",
            HostOs::Windows => "windows",
        }
    }
}

#[async_trait]
pub trait Platform: Send + Sync {
    fn os(&self) -> HostOs;

    fn arch(&self) -> &str;

    fn binary_extension(&self) -> &'static str {
        if self.os() == HostOs::Windows {
            ".exe"
        } else {
            ""
        }
    }

    fn binary_file_name(&self) -> String {
        format!("{BINARY_NAME}{}", self.binary_extension())
    }

    fn system_install_dir(&self) -> Option<PathBuf>;

    fn elevated_command(&self, program: &str, args: &[String]) -> (String, Vec<String>);

    fn promote_command(&self, source: &Path, destination: &Path) -> (String, Vec<String>);

    fn remove_command(&self, path: &Path) -> (String, Vec<String>);

    async fn kill_process_tree(&self, child: &mut Child) -> io::Result<()>;
}

#[derive(Debug, Clone)]
pub struct HostPlatform {
    os: HostOs,
    arch: String,
    home: Option<PathBuf>,
}

impl HostPlatform {
    pub fn current() -> HostPlatform {
        HostPlatform {
            os: HostOs::current(),
            arch: env::consts::ARCH.to_string(),
            home: dirs::home_dir(),
        }
    }

    pub fn new(os: HostOs, arch: &str, home: Option<PathBuf>) -> HostPlatform {
        HostPlatform {
            os,
            arch: arch.to_string(),
            home,
        }
    }
}

#[async_trait]
impl Platform for HostPlatform {
    fn os(&self) -> HostOs {
        self.os
    }

    fn arch(&self) -> &str {
        &self.arch
    }

    fn system_install_dir(&self) -> Option<PathBuf> {
        match self.os {
            HostOs::Linux | HostOs::Mac => Some(PathBuf::from("/usr/local/bin")),
            HostOs::Windows => self.home.as_ref().map(|home| {
                home.join("AppData")
                    .join("Local")
                    .join("Microsoft")
                    .join("WindowsApps")
            }),
        }
    }

    fn elevated_command(&self, program: &str, args: &[String]) -> (String, Vec<String>) {
        match self.os {
            HostOs::Linux => {
                let mut wrapped = vec![program.to_string()];
                wrapped.extend(args.iter().cloned());
                ("pkexec".to_string(), wrapped)
            }
            HostOs::Mac => {
                let script = format!(
                    "do shell script \"{}\" with administrator privileges",
                    applescript_escape(&shell_join(program, args))
                );
                ("osascript".to_string(), vec!["-e".to_string(), script])
            }
            HostOs::Windows => {
                let mut command = format!(
                    "$p = Start-Process -FilePath {} -Verb RunAs -Wait -PassThru",
                    powershell_quote(program)
                );
                if !args.is_empty() {
                    let list: Vec<String> = args.iter().map(|arg| powershell_quote(arg)).collect();
                    command.push_str(&format!(" -ArgumentList {}", list.join(",")));
                }
                command.push_str("; exit $p.ExitCode");
                (
                    "powershell".to_string(),
                    vec![
                        "-NoProfile".to_string(),
                        "-NonInteractive".to_string(),
                        "-Command".to_string(),
                        command,
                    ],
                )
            }
        }
    }

    fn promote_command(&self, source: &Path, destination: &Path) -> (String, Vec<String>) {
        let dir = destination
            .parent()
            .map_or_else(|| PathBuf::from("."), PathBuf::from);
        match self.os {
            HostOs::Linux | HostOs::Mac => {
                let mut script = format!(
                    "mv -f {} {}",
                    shell_single_quote(&source.to_string_lossy()),
                    shell_single_quote(&destination.to_string_lossy())
                );
                if !dir.exists() {
                    script = format!(
                        "mkdir -p {} && {script}",
                        shell_single_quote(&dir.to_string_lossy())
                    );
                }
                ("/bin/sh".to_string(), vec!["-c".to_string(), script])
            }
            HostOs::Windows => {
                let script = format!(
                    "(if not exist \"{dir}\" mkdir \"{dir}\") && move /Y \"{}\" \"{}\"",
                    source.display(),
                    destination.display(),
                    dir = dir.display()
                );
                ("cmd".to_string(), vec!["/C".to_string(), script])
            }
        }
    }

    fn remove_command(&self, path: &Path) -> (String, Vec<String>) {
        match self.os {
            HostOs::Linux | HostOs::Mac => (
                "rm".to_string(),
                vec!["-f".to_string(), path.to_string_lossy().to_string()],
            ),
            HostOs::Windows => (
                "cmd".to_string(),
                vec![
                    "/C".to_string(),
                    format!("del /F /Q \"{}\"", path.display()),
                ],
            ),
        }
    }

    async fn kill_process_tree(&self, child: &mut Child) -> io::Result<()> {
        if self.os == HostOs::Windows {
            if let Some(pid) = child.id() {
                let status = tokio::process::Command::new("taskkill")
                    .args(["/pid", &pid.to_string(), "/T", "/F"])
                    .status()
                    .await;
                match status {
                    Ok(status) if status.success() => {}
                    Ok(status) => log::warn!("taskkill for pid {pid} exited with {status}"),
                    Err(err) => log::warn!("failed to run taskkill for pid {pid}: {err}"),
                }
            }
        }
        // Already-exited children report InvalidInput here.
        match child.start_kill() {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::InvalidInput => {}
            Err(err) => return Err(err),
        }
        child.wait().await.map(|_| ())
    }
}

pub fn shell_single_quote(value: &str) -> String {
    // Example: foo'bar -> 'foo'\''bar'
    let mut out = String::new();
    out.push('\'');
    for ch in value.chars() {
        if ch == '\'' {
            out.push_str("'\\''");
        } else {
            out.push(ch);
        }
    }
    out.push('\'');
    out
}

pub fn shell_join(program: &str, args: &[String]) -> String {
    let mut parts = vec![shell_single_quote(program)];
    parts.extend(args.iter().map(|arg| shell_single_quote(arg)));
    parts.join(" ")
}

fn applescript_escape(value: &str) -> String {
    value.replace('\\', "\\\\").replace('"', "\\\"")
}

fn powershell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_name_gets_exe_suffix_on_windows() {
        let windows = HostPlatform::new(HostOs::Windows, "x86_64", None);
        let linux = HostPlatform::new(HostOs::Linux, "x86_64", None);
        assert_eq!(windows.binary_file_name(), "minikube.exe");
        assert_eq!(linux.binary_file_name(), "minikube");
    }

    #[test]
    fn system_install_dir_per_os() {
        let mac = HostPlatform::new(HostOs::Mac, "aarch64", None);
        assert_eq!(
            mac.system_install_dir(),
            Some(PathBuf::from("/usr/local/bin"))
        );
        let windows = HostPlatform::new(
            HostOs::Windows,
            "x86_64",
            Some(PathBuf::from("C:/Users/dev")),
        );
        let dir = windows.system_install_dir().expect("windows dir");
        assert!(dir.ends_with("AppData/Local/Microsoft/WindowsApps"));
        let homeless = HostPlatform::new(HostOs::Windows, "x86_64", None);
        assert!(homeless.system_install_dir().is_none());
    }

    #[test]
    fn shell_single_quote_escapes_embedded_quotes() {
        assert_eq!(shell_single_quote("foo'bar"), "'foo'\\''bar'");
        assert_eq!(shell_single_quote("/usr/local/bin"), "'/usr/local/bin'");
    }

    #[test]
    fn linux_elevation_goes_through_pkexec() {
        let platform = HostPlatform::new(HostOs::Linux, "x86_64", None);
        let (program, args) =
            platform.elevated_command("/bin/sh", &["-c".to_string(), "true".to_string()]);
        assert_eq!(program, "pkexec");
        assert_eq!(args, vec!["/bin/sh", "-c", "true"]);
    }

    #[test]
    fn mac_elevation_wraps_command_in_applescript() {
        let platform = HostPlatform::new(HostOs::Mac, "aarch64", None);
        let (program, args) = platform.elevated_command("rm", &["-f".to_string(), "/a b".to_string()]);
        assert_eq!(program, "osascript");
        assert_eq!(args[0], "-e");
        assert_eq!(
            args[1],
            "do shell script \"'rm' '-f' '/a b'\" with administrator privileges"
        );
    }

    #[test]
    fn promote_command_creates_missing_directory_in_same_invocation() {
        let platform = HostPlatform::new(HostOs::Linux, "x86_64", None);
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing").join("minikube");
        let (program, args) = platform.promote_command(Path::new("/tmp/src/minikube"), &missing);
        assert_eq!(program, "/bin/sh");
        assert!(args[1].starts_with("mkdir -p "));
        assert!(args[1].contains("mv -f '/tmp/src/minikube'"));

        let existing = dir.path().join("minikube");
        let (_, args) = platform.promote_command(Path::new("/tmp/src/minikube"), &existing);
        assert!(args[1].starts_with("mv -f "));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn kill_process_tree_terminates_child() {
        let platform = HostPlatform::new(HostOs::Linux, "x86_64", None);
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .spawn()
            .expect("spawn sleep");
        platform.kill_process_tree(&mut child).await.unwrap();
        assert!(child.try_wait().unwrap().is_some());
    }
}
