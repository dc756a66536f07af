use async_trait::async_trait;
use std::collections::BTreeMap;
use std::process::Stdio;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::{MinikubeError, ProcessErrorDetails};
use crate::platform::Platform;

const PROCESS_LOG_TARGET: &str = "minikube::process";

#[derive(Debug, Clone, Default)]
pub struct ExecOptions {
    pub env: BTreeMap<String, String>,
    pub cancel: Option<CancellationToken>,
    pub elevate: bool,
    pub log_output: bool,
}

impl ExecOptions {
    pub fn with_env(env: BTreeMap<String, String>) -> ExecOptions {
        ExecOptions {
            env,
            ..ExecOptions::default()
        }
    }

    pub fn cancellable(mut self, token: CancellationToken) -> ExecOptions {
        self.cancel = Some(token);
        self
    }

    pub fn elevated(mut self) -> ExecOptions {
        self.elevate = true;
        self
    }

    pub fn logged(mut self) -> ExecOptions {
        self.log_output = true;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status_code == 0
    }
}

/// Raw process execution. Non-zero exits come back as `Ok`; [`exec`] turns them
/// into errors.
#[async_trait]
pub trait ProcessRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<CommandOutput, MinikubeError>;
}

pub struct TokioProcessRunner {
    platform: Arc<dyn Platform>,
}

impl TokioProcessRunner {
    pub fn new(platform: Arc<dyn Platform>) -> TokioProcessRunner {
        TokioProcessRunner { platform }
    }
}

#[async_trait]
impl ProcessRunner for TokioProcessRunner {
    async fn run(
        &self,
        program: &str,
        args: &[String],
        options: &ExecOptions,
    ) -> Result<CommandOutput, MinikubeError> {
        if options.cancel.as_ref().is_some_and(|token| token.is_cancelled()) {
            return Err(MinikubeError::Cancelled);
        }
        let (program, args) = if options.elevate {
            self.platform.elevated_command(program, args)
        } else {
            (program.to_string(), args.to_vec())
        };
        let command = render_command(&program, &args);
        let mut child = Command::new(&program)
            .args(&args)
            .envs(&options.env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|err| MinikubeError::Process {
                message: format!("failed to run command `{command}`: {err}"),
                details: ProcessErrorDetails {
                    command: command.clone(),
                    exit_code: None,
                    raw_stderr: None,
                },
            })?;

        let stdout_task = tokio::spawn(collect_output(child.stdout.take(), options.log_output));
        let stderr_task = tokio::spawn(collect_output(child.stderr.take(), options.log_output));

        let status = match &options.cancel {
            Some(token) => {
                let finished = tokio::select! {
                    status = child.wait() => Some(status),
                    _ = token.cancelled() => None,
                };
                match finished {
                    Some(status) => status?,
                    None => {
                        log::info!("cancelling `{command}`");
                        self.platform.kill_process_tree(&mut child).await?;
                        stdout_task.abort();
                        stderr_task.abort();
                        return Err(MinikubeError::Cancelled);
                    }
                }
            }
            None => child.wait().await?,
        };

        let stdout = stdout_task.await.unwrap_or_default();
        let stderr = stderr_task.await.unwrap_or_default();
        let status_code = status
            .code()
            .unwrap_or(if status.success() { 0 } else { 1 });
        Ok(CommandOutput {
            status_code,
            stdout,
            stderr,
        })
    }
}

async fn collect_output<R: AsyncRead + Unpin>(reader: Option<R>, log_output: bool) -> String {
    let Some(reader) = reader else {
        return String::new();
    };
    let mut reader = BufReader::new(reader);
    let mut out = String::new();
    let mut buf = Vec::new();
    // Drain to EOF even past undecodable bytes so the child never sees a closed pipe.
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let decoded = String::from_utf8_lossy(&buf);
                let line = decoded.trim_end_matches(|c| c == '\n' || c == '\r');
                if log_output {
                    log::info!(target: PROCESS_LOG_TARGET, "{line}");
                }
                out.push_str(line);
                out.push('\n');
            }
            Err(err) => {
                log::debug!("stopped reading process output: {err}");
                break;
            }
        }
    }
    out
}

pub async fn exec(
    runner: &dyn ProcessRunner,
    program: &str,
    args: &[String],
    options: &ExecOptions,
) -> Result<CommandOutput, MinikubeError> {
    let command = render_command(program, args);
    log::debug!("running `{command}`");
    let output = runner.run(program, args, options).await?;
    if !output.success() {
        let stderr = output.stderr.trim().to_string();
        let mut message = format!(
            "command failed with status {} while running `{}`",
            output.status_code, command
        );
        if !stderr.is_empty() {
            message = format!("{message}: {stderr}");
        }
        return Err(MinikubeError::Process {
            message,
            details: ProcessErrorDetails {
                command,
                exit_code: Some(output.status_code),
                raw_stderr: if stderr.is_empty() {
                    None
                } else {
                    Some(stderr)
                },
            },
        });
    }
    Ok(output)
}

pub fn render_command(program: &str, args: &[String]) -> String {
    fn shell_quote(part: &str) -> String {
        if part.is_empty() {
            return "\"\"".to_string();
        }
        if part.chars().any(|c| c.is_whitespace()) {
            return format!("\"{}\"", part.replace('"', "\\\""));
        }
        part.to_string()
    }
    let mut parts = Vec::with_capacity(args.len() + 1);
    parts.push(shell_quote(program));
    parts.extend(args.iter().map(|arg| shell_quote(arg)));
    parts.join(" ")
}
