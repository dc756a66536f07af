use clap::{Parser, Subcommand};
use dialoguer::theme::ColorfulTheme;
use dialoguer::{Confirm, Select};
use serde::Serialize;
use serde_json::json;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use minikube_lifecycle::cli_tool::CliToolController;
use minikube_lifecycle::cluster::ManagedCluster;
use minikube_lifecycle::config::{
    github_token, init_config, load_config, minikube_env, read_config, resolve_config_path,
    storage_dir, Config,
};
use minikube_lifecycle::create::ClusterCreateOptions;
use minikube_lifecycle::engine::CliContainerEngine;
use minikube_lifecycle::error::{MinikubeError, ProcessErrorDetails};
use minikube_lifecycle::extension::{ClusterAction, Extension, HostServices};
use minikube_lifecycle::host::{ClusterPicker, Disposable, Notifier, Provider};
use minikube_lifecycle::image::ImageRef;
use minikube_lifecycle::minikube::versions_match;
use minikube_lifecycle::platform::{HostPlatform, Platform};
use minikube_lifecycle::process::{ProcessRunner, TokioProcessRunner};
use minikube_lifecycle::reconciler::ProviderConnection;
use minikube_lifecycle::release::{GitHubRegistry, ReleaseMetadata};

#[derive(Parser, Debug)]
#[command(
    name = "minikube-lifecycle",
    version,
    about = "Install minikube and manage its local clusters"
)]
struct Cli {
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    Status,
    Releases,
    CheckUpdate,
    Install {
        #[arg(long)]
        version: Option<String>,
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    Update {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    Uninstall {
        #[arg(long, default_value_t = false)]
        yes: bool,
    },
    Clusters,
    Watch {
        #[arg(long)]
        interval_sec: Option<u64>,
    },
    Create {
        #[arg(long, default_value = "minikube")]
        name: String,
        #[arg(long)]
        driver: Option<String>,
        #[arg(long)]
        container_runtime: Option<String>,
        #[arg(long)]
        base_image: Option<String>,
        #[arg(long)]
        mount_string: Option<String>,
    },
    Start {
        name: String,
    },
    Stop {
        name: String,
    },
    Delete {
        name: String,
    },
    MoveImage {
        image: String,
        #[arg(long)]
        engine_id: Option<String>,
    },
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommand {
    Init,
    Show,
    Validate,
}

#[derive(Debug, Serialize)]
struct JsonResult<T: Serialize> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_details: Option<ProcessErrorDetails>,
}

#[derive(Debug, Clone)]
struct Context {
    config_path: PathBuf,
    json: bool,
    interactive: bool,
}

struct ConsoleRegistration {
    name: String,
}

impl Disposable for ConsoleRegistration {
    fn dispose(&self) {
        log::debug!("connection {} disposed", self.name);
    }
}

struct ConsoleProvider;

impl Provider for ConsoleProvider {
    fn register_connection(&self, connection: Arc<ProviderConnection>) -> Box<dyn Disposable> {
        log::debug!(
            "connection {} registered at {}",
            connection.name(),
            connection.endpoint()
        );
        Box::new(ConsoleRegistration {
            name: connection.name().to_string(),
        })
    }
}

struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn info(&self, message: &str) {
        eprintln!("{message}");
    }

    fn error(&self, message: &str) {
        eprintln!("error: {message}");
    }
}

struct ConsolePicker {
    interactive: bool,
}

impl ClusterPicker for ConsolePicker {
    fn pick(&self, clusters: &[ManagedCluster]) -> Result<Option<ManagedCluster>, MinikubeError> {
        if !self.interactive {
            return Err(MinikubeError::InvalidArgument(
                "several minikube clusters are running; run interactively to choose one"
                    .to_string(),
            ));
        }
        let names: Vec<&str> = clusters.iter().map(|cluster| cluster.name.as_str()).collect();
        let choice = prompt(|| {
            Select::with_theme(&ColorfulTheme::default())
                .with_prompt("Select the minikube cluster to push the image to")
                .items(&names)
                .default(0)
                .interact_opt()
        })?;
        Ok(choice.map(|index| clusters[index].clone()))
    }
}

#[tokio::main]
async fn main() -> Result<(), MinikubeError> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let ctx = Context {
        config_path: resolve_config_path(cli.config.as_ref()),
        json: cli.json,
        interactive: !cli.json && io::stdin().is_terminal() && io::stderr().is_terminal(),
    };

    if let Err(err) = run(&ctx, cli.command).await {
        if ctx.json {
            let payload = JsonResult::<serde_json::Value> {
                ok: false,
                result: None,
                error: Some(err.to_string()),
                error_details: err.process_details().cloned(),
            };
            print_json(&payload)?;
        } else {
            eprintln!("{err}");
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn run(ctx: &Context, command: Commands) -> Result<(), MinikubeError> {
    if let Commands::Config { command } = command {
        return handle_config(ctx, command);
    }
    let cfg = load_config(&ctx.config_path)?;
    let extension = activate(ctx, cfg).await?;
    let result = dispatch(ctx, &extension, command).await;
    extension.deactivate().await;
    result
}

async fn activate(ctx: &Context, cfg: Config) -> Result<Extension, MinikubeError> {
    let platform: Arc<dyn Platform> = Arc::new(HostPlatform::current());
    let runner: Arc<dyn ProcessRunner> = Arc::new(TokioProcessRunner::new(platform.clone()));
    let registry = Arc::new(GitHubRegistry::new(
        &cfg.release.api_base,
        github_token(&cfg),
    )?);
    let engine = Arc::new(CliContainerEngine::new(
        runner.clone(),
        cfg.engine.kind,
        minikube_env(&cfg, platform.os()),
    ));
    let host = HostServices {
        platform,
        runner,
        registry,
        engine,
        provider: Arc::new(ConsoleProvider),
        notifier: Arc::new(ConsoleNotifier),
        picker: Arc::new(ConsolePicker {
            interactive: ctx.interactive,
        }),
    };
    Ok(Extension::activate(cfg, host).await)
}

async fn dispatch(
    ctx: &Context,
    extension: &Extension,
    command: Commands,
) -> Result<(), MinikubeError> {
    let controller = extension.controller();
    match command {
        Commands::Status => output(ctx, serde_json::to_value(controller.registration())?),
        Commands::Releases => {
            let releases = controller.recent_releases().await?;
            output(ctx, json!({ "releases": releases }))
        }
        Commands::CheckUpdate => {
            let update = controller.check_for_update().await?;
            output(
                ctx,
                json!({
                    "installed": controller.current(),
                    "update": update,
                    "state": controller.state(),
                }),
            )
        }
        Commands::Install { version, yes } => {
            let release = choose_release(ctx, controller, version, yes).await?;
            let binary = controller.install(&release).await?;
            output(ctx, json!({ "release": release, "binary": binary }))
        }
        Commands::Update { yes } => {
            let Some(installed) = controller.current() else {
                return Err(MinikubeError::InvalidArgument(
                    "minikube is not installed, nothing to update".to_string(),
                ));
            };
            let Some(release) = controller.check_for_update().await? else {
                return output(ctx, json!({ "updated": false, "binary": installed }));
            };
            let question = format!(
                "Update minikube {} to {}?",
                installed.version,
                release.version()
            );
            if !confirm(ctx, yes, &question)? {
                return output(ctx, json!({ "updated": false, "binary": installed }));
            }
            let binary = controller.update(&release).await?;
            output(ctx, json!({ "updated": true, "binary": binary }))
        }
        Commands::Uninstall { yes } => {
            let Some(installed) = controller.current() else {
                return Err(MinikubeError::InvalidArgument(
                    "minikube is not installed".to_string(),
                ));
            };
            let question = format!("Remove minikube at {}?", installed.path.display());
            if !confirm(ctx, yes, &question)? {
                return output(ctx, json!({ "uninstalled": false, "binary": installed }));
            }
            controller.uninstall().await?;
            output(
                ctx,
                json!({
                    "uninstalled": true,
                    "removed": installed.path,
                    "binary": controller.current(),
                }),
            )
        }
        Commands::Clusters => {
            let clusters = extension.clusters().await?;
            output(ctx, json!({ "clusters": clusters_payload(&clusters) }))
        }
        Commands::Watch { interval_sec } => {
            let seconds = interval_sec.unwrap_or(extension.config().engine.poll_interval_sec);
            if seconds == 0 {
                return Err(MinikubeError::InvalidArgument(
                    "--interval-sec must be greater than 0".to_string(),
                ));
            }
            let cancel = cancel_on_ctrl_c();
            let mut first = true;
            extension
                .watch(Duration::from_secs(seconds), cancel, |summary| {
                    if !first && !summary.changed() {
                        return;
                    }
                    first = false;
                    if let Err(err) = output(ctx, json!(summary)) {
                        log::warn!("failed to print reconcile summary: {err}");
                    }
                })
                .await
        }
        Commands::Create {
            name,
            driver,
            container_runtime,
            base_image,
            mount_string,
        } => {
            let mut options = ClusterCreateOptions::from_settings(&extension.config().create);
            options.name = name;
            if driver.is_some() {
                options.driver = driver;
            }
            if container_runtime.is_some() {
                options.container_runtime = container_runtime;
            }
            if base_image.is_some() {
                options.base_image = base_image;
            }
            options.mount_string = mount_string;
            let summary = extension
                .create_cluster(&options, cancel_on_ctrl_c())
                .await?;
            output(ctx, json!({ "created": options.name, "reconcile": summary }))
        }
        Commands::Start { name } => cluster_action(ctx, extension, &name, ClusterAction::Start).await,
        Commands::Stop { name } => cluster_action(ctx, extension, &name, ClusterAction::Stop).await,
        Commands::Delete { name } => {
            cluster_action(ctx, extension, &name, ClusterAction::Delete).await
        }
        Commands::MoveImage { image, engine_id } => {
            let engine_id =
                engine_id.unwrap_or_else(|| extension.config().engine.kind.command().to_string());
            let image = ImageRef::parse(&image, &engine_id);
            let target = extension.move_image(&image).await?;
            output(
                ctx,
                json!({
                    "image": image.reference()?,
                    "cluster": target,
                    "cancelled": target.is_none(),
                }),
            )
        }
        Commands::Config { .. } => Ok(()),
    }
}

fn handle_config(ctx: &Context, command: ConfigCommand) -> Result<(), MinikubeError> {
    match command {
        ConfigCommand::Init => {
            let created = init_config(&ctx.config_path)?;
            output(ctx, json!({ "path": ctx.config_path, "created": created }))
        }
        ConfigCommand::Show => {
            let cfg = load_config(&ctx.config_path)?;
            let platform = HostPlatform::current();
            output(
                ctx,
                json!({
                    "path": ctx.config_path,
                    "config": cfg,
                    "storage_dir": storage_dir(&cfg),
                    "env": minikube_env(&cfg, platform.os()),
                }),
            )
        }
        ConfigCommand::Validate => {
            read_config(&ctx.config_path)?;
            output(ctx, json!({ "path": ctx.config_path, "valid": true }))
        }
    }
}

async fn cluster_action(
    ctx: &Context,
    extension: &Extension,
    name: &str,
    action: ClusterAction,
) -> Result<(), MinikubeError> {
    extension.cluster_action(name, action).await?;
    let status = extension
        .reconciler()
        .connection(name)
        .await
        .map(|connection| connection.status());
    output(
        ctx,
        json!({ "name": name, "action": format!("{action:?}").to_lowercase(), "status": status }),
    )
}

async fn choose_release(
    ctx: &Context,
    controller: &CliToolController,
    version: Option<String>,
    yes: bool,
) -> Result<ReleaseMetadata, MinikubeError> {
    let releases = controller.recent_releases().await?;
    if let Some(version) = version {
        return releases
            .into_iter()
            .find(|release| versions_match(&release.tag, &version))
            .ok_or_else(|| {
                MinikubeError::NotFound(format!(
                    "minikube {version} is not among the recent releases"
                ))
            });
    }
    if releases.is_empty() {
        return Err(MinikubeError::NotFound(
            "no minikube releases found".to_string(),
        ));
    }
    if yes || !ctx.interactive {
        return Ok(releases[0].clone());
    }
    let labels: Vec<String> = releases
        .iter()
        .enumerate()
        .map(|(index, release)| {
            if index == 0 {
                format!("{} (latest)", release.label)
            } else {
                release.label.clone()
            }
        })
        .collect();
    let choice = prompt(|| {
        Select::with_theme(&ColorfulTheme::default())
            .with_prompt("Select the minikube version to install")
            .items(&labels)
            .default(0)
            .interact_opt()
    })?;
    match choice {
        Some(index) => Ok(releases[index].clone()),
        None => Err(MinikubeError::Cancelled),
    }
}

fn confirm(ctx: &Context, yes: bool, message: &str) -> Result<bool, MinikubeError> {
    if yes {
        return Ok(true);
    }
    if !ctx.interactive {
        return Err(MinikubeError::InvalidArgument(
            "confirmation required; pass --yes to proceed non-interactively".to_string(),
        ));
    }
    prompt(|| {
        Confirm::with_theme(&ColorfulTheme::default())
            .with_prompt(message)
            .default(false)
            .interact()
    })
}

/// Terminal prompts block, so they run off the async worker.
fn prompt<T, F>(ask: F) -> Result<T, MinikubeError>
where
    F: FnOnce() -> dialoguer::Result<T>,
{
    Ok(tokio::task::block_in_place(ask)?)
}

fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received, cancelling");
            trigger.cancel();
        }
    });
    token
}

fn clusters_payload(clusters: &[ManagedCluster]) -> Vec<serde_json::Value> {
    clusters
        .iter()
        .map(|cluster| {
            json!({
                "name": cluster.name,
                "status": cluster.status,
                "endpoint": cluster.endpoint(),
                "api_port": cluster.api_port,
                "engine_type": cluster.engine_type,
                "engine_id": cluster.engine_id,
            })
        })
        .collect()
}

fn output(ctx: &Context, payload: serde_json::Value) -> Result<(), MinikubeError> {
    if ctx.json {
        let wrapper = JsonResult {
            ok: true,
            result: Some(payload),
            error: None,
            error_details: None,
        };
        print_json(&wrapper)?;
    } else {
        println!("{}", payload);
    }
    Ok(())
}

fn print_json<T: Serialize>(payload: &T) -> Result<(), MinikubeError> {
    let text = serde_json::to_string_pretty(payload)?;
    println!("{}", text);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(flavor = "multi_thread")]
    async fn prompts_run_on_a_blocking_section() {
        let answer = prompt(|| Ok(7)).unwrap();
        assert_eq!(answer, 7);
    }

    #[test]
    fn non_interactive_picker_refuses_to_guess() {
        let picker = ConsolePicker { interactive: false };
        let err = picker.pick(&[]).expect_err("no terminal");
        assert!(matches!(err, MinikubeError::InvalidArgument(_)));
    }

    #[test]
    fn confirmation_without_terminal_needs_yes() {
        let ctx = Context {
            config_path: PathBuf::from("config.yaml"),
            json: true,
            interactive: false,
        };
        assert!(confirm(&ctx, true, "Remove minikube?").unwrap());
        let err = confirm(&ctx, false, "Remove minikube?").expect_err("no --yes");
        assert!(err.to_string().contains("--yes"));
    }
}
