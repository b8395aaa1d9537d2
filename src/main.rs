use anyhow::{anyhow, Context, Result};
use ao::cli::{Cli, Commands};
use ao::config::{AppConfig, Project};
use ao::event::EventLog;
use ao::lifecycle::{LifecycleConfig, LifecycleController};
use ao::plugin::builtin::{BranchWorkspace, GenericAgent, PtyRuntime, WorktreeWorkspace};
use ao::plugin::PluginRegistry;
use ao::session::{SessionManager, SpawnOptions};
use ao::OrchestratorError;
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

/// Built-in agent-type name → launch command, grounded in the agent
/// registry's defaults (`claude`, `opencode`, `codex`, `aider`, `amp`).
fn builtin_agent_commands() -> &'static [(&'static str, &'static str)] {
    &[
        ("claude-code", "claude"),
        ("opencode", "opencode"),
        ("ampcode", "amp"),
        ("codex", "codex"),
        ("aider", "aider"),
    ]
}

fn build_registry(project: &Project) -> Arc<PluginRegistry> {
    let mut registry = PluginRegistry::new();
    registry.register_runtime("pty", Arc::new(PtyRuntime::new()));
    registry.register_workspace("git-worktree", Arc::new(WorktreeWorkspace::new(project.worktrees_dir.clone())));
    registry.register_workspace("git-branch", Arc::new(BranchWorkspace));
    for (name, command) in builtin_agent_commands() {
        registry.register_agent(*name, Arc::new(GenericAgent::new(name, *command)));
    }
    Arc::new(registry)
}

fn default_config_path() -> PathBuf {
    PathBuf::from("ao.toml")
}

fn resolve_project(config: &AppConfig, requested: Option<&str>) -> Result<Project> {
    let project = match requested {
        Some(id) => config.project(id)?,
        None => config
            .projects
            .first()
            .ok_or_else(|| anyhow!("no projects configured"))?,
    };
    Ok(project.clone())
}

async fn build_manager(config_path: &PathBuf, project_id: Option<&str>) -> Result<Arc<SessionManager>> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    let config = AppConfig::load(config_path, &home).context("loading configuration")?;
    let project = resolve_project(&config, project_id)?;
    let registry = build_registry(&project);
    Ok(Arc::new(SessionManager::new(project, registry)?))
}

async fn build_controller(
    config_path: &PathBuf,
    project_id: Option<&str>,
    manager: Arc<SessionManager>,
) -> Result<Arc<LifecycleController>> {
    let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
    let config = AppConfig::load(config_path, &home).context("loading configuration")?;
    let project = resolve_project(&config, project_id)?;

    let event_log = Arc::new(EventLog::open(project.sessions_dir.join("events.jsonl"))?);
    let reactions = project.reaction_configs()?;
    let routing = project.notification_routing()?;
    let lifecycle_config = LifecycleConfig {
        tick_interval: Duration::from_secs(config.notifications.poll_interval_secs.max(1)),
        fanout_limit: config.max_fanout,
        plugin_timeout: Duration::from_secs(config.notifications.plugin_timeout_secs.max(1)),
        ..LifecycleConfig::default()
    };

    Ok(Arc::new(LifecycleController::new(
        manager,
        event_log,
        reactions,
        routing,
        lifecycle_config,
    )))
}

/// Prints the short red error line spec.md §7 mandates: the error kind plus
/// the error itself, which already carries an actionable message.
fn print_error(err: &anyhow::Error) {
    let kind = err
        .downcast_ref::<OrchestratorError>()
        .map(OrchestratorError::kind)
        .unwrap_or("Error");
    eprintln!("\x1b[31merror\x1b[0m ({kind}): {err}");
}

/// Maps a `spawn` failure to its exit code (spec.md §6): 1 unknown project,
/// 2 precondition failed (policy/duplicate), 3 runtime/agent error.
fn spawn_exit_code(err: &anyhow::Error) -> u8 {
    match err.downcast_ref::<OrchestratorError>() {
        Some(OrchestratorError::NotFound(_)) => 1,
        Some(OrchestratorError::PolicyViolation(_)) | Some(OrchestratorError::ConflictingState(_)) => 2,
        _ => 3,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    if let Err(e) = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("ao=info".parse().expect("static directive is valid")),
        )
        .try_init()
    {
        eprintln!("warning: failed to initialize logging: {e}");
    }

    let cli = Cli::parse();
    let is_spawn = matches!(&cli.command, Commands::Spawn { .. });

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            print_error(&e);
            if is_spawn {
                ExitCode::from(spawn_exit_code(&e))
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let project_id = cli.project.as_deref();

    match cli.command {
        Commands::Spawn {
            issue,
            branch,
            prompt,
            validated_plan_task,
        } => {
            let manager = build_manager(&config_path, project_id).await?;
            let session = manager
                .spawn(
                    issue,
                    SpawnOptions {
                        prompt,
                        base_branch: branch,
                        validated_plan_task,
                    },
                )
                .await?;
            println!("spawned {} on branch {}", session.id, session.branch);
        }

        Commands::List => {
            let manager = build_manager(&config_path, project_id).await?;
            for session in manager.list().await {
                println!("{}\t{}\t{}", session.id, session.status, session.branch);
            }
        }

        Commands::Get { id } => {
            let manager = build_manager(&config_path, project_id).await?;
            match manager.get(&id).await {
                Some(session) => println!("{}", serde_json::to_string_pretty(&session)?),
                None => return Err(anyhow!("session '{id}' not found")),
            }
        }

        Commands::Send { id, message } => {
            let manager = build_manager(&config_path, project_id).await?;
            manager.send(&id, &message).await?;
        }

        Commands::Kill { id } => {
            let manager = build_manager(&config_path, project_id).await?;
            manager.kill(&id).await?;
        }

        Commands::Restore { id } => {
            let manager = build_manager(&config_path, project_id).await?;
            let session = manager.restore(&id).await?;
            println!("restored {} on branch {}", session.id, session.branch);
        }

        Commands::Cleanup { dry_run } => {
            let manager = build_manager(&config_path, project_id).await?;
            let scm_name = manager.project().scm_plugin.clone();
            let report = manager.cleanup(dry_run, scm_name.as_deref()).await;
            println!("killed: {:?}", report.killed);
            println!("skipped: {:?}", report.skipped);
            if !report.errors.is_empty() {
                println!("errors: {:?}", report.errors);
            }
        }

        Commands::Check { id } => {
            let manager = build_manager(&config_path, project_id).await?;
            let controller = build_controller(&config_path, project_id, manager).await?;
            controller.check(&id).await?;
        }

        Commands::Tick => {
            let manager = build_manager(&config_path, project_id).await?;
            let controller = build_controller(&config_path, project_id, Arc::clone(&manager)).await?;
            let home = dirs::home_dir().ok_or_else(|| anyhow!("could not determine home directory"))?;
            let config = AppConfig::load(&config_path, &home)?;
            let interval = Duration::from_secs(config.notifications.poll_interval_secs.max(1));
            loop {
                controller.run_tick().await;
                tokio::time::sleep(interval).await;
            }
        }

        Commands::Doctor => {
            let manager = build_manager(&config_path, project_id).await?;
            let controller = build_controller(&config_path, project_id, manager).await?;
            for diagnostic in controller.recent_diagnostics().await {
                println!("{}: {}", diagnostic.session_id, diagnostic.message);
            }
        }
    }

    Ok(())
}
