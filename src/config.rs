//! TOML-backed configuration (SPEC_FULL.md §1 ambient stack, §6).
//!
//! The settings shape is grounded on the teacher's `config::AppConfig` (a
//! small typed struct with a `Default` impl), generalized from one hardcoded
//! isolation default into a per-project, plugin-driven surface. The teacher
//! never loads configuration from a file, though, so the `toml`+`serde`
//! loading layer itself follows the pack's other config-file readers
//! instead (e.g. `Wirasm-shards/src/config.rs`).

use crate::path;
use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// One project's binding: the repository it spawns sessions against, which
/// plugins back each slot, and the policies that gate its operations
/// (spec.md §3, §4.5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub repo_path: PathBuf,
    #[serde(default)]
    pub upstream: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,

    /// Session-name prefix. Derived from `id` via [`path::derive_prefix`] at
    /// load time when left blank in the TOML.
    #[serde(default)]
    pub session_prefix: String,

    /// Populated at load time from the resolved config path; never read
    /// from TOML.
    #[serde(skip)]
    pub instance_hash: String,
    #[serde(skip)]
    pub sessions_dir: PathBuf,
    #[serde(skip)]
    pub worktrees_dir: PathBuf,

    pub runtime_plugin: String,
    pub agent_plugin: String,
    #[serde(default)]
    pub scm_plugin: Option<String>,
    #[serde(default)]
    pub tracker_plugin: Option<String>,
    #[serde(default)]
    pub notifier_plugins: Vec<String>,
    #[serde(default = "default_workspace_plugin")]
    pub workspace_plugin: String,

    #[serde(default)]
    pub policies: PolicySet,

    /// Reaction table, keyed by reaction key (spec.md §4.2).
    #[serde(default)]
    pub reactions: HashMap<String, ReactionToml>,

    /// Priority → notifier-name routing for `notify-human` reactions and
    /// unconfigured urgent/action events (spec.md §4.2 suppression rule).
    #[serde(default)]
    pub notification_routing: HashMap<String, Vec<String>>,
}

fn default_branch() -> String {
    "main".to_string()
}

fn default_workspace_plugin() -> String {
    "git-worktree".to_string()
}

/// TOML-shaped reaction entry; converted to [`crate::reaction::ReactionConfig`]
/// at load time since `std::time::Duration` isn't itself `Deserialize`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactionToml {
    #[serde(default)]
    pub auto: bool,
    pub action: String,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub retries: u32,
    #[serde(default)]
    pub escalate_after_secs: Option<u64>,
    #[serde(default)]
    pub retrigger_after_secs: Option<u64>,
}

impl ReactionToml {
    fn to_reaction_config(&self) -> Result<crate::reaction::ReactionConfig> {
        let action = match self.action.as_str() {
            "send-to-agent" => crate::reaction::ReactionAction::SendToAgent,
            "notify-human" => crate::reaction::ReactionAction::NotifyHuman,
            "terminate" => crate::reaction::ReactionAction::Terminate,
            other => {
                return Err(OrchestratorError::ConfigError(format!(
                    "unknown reaction action '{other}'"
                )))
            }
        };
        Ok(crate::reaction::ReactionConfig {
            auto: self.auto,
            action,
            message: self.message.clone(),
            retries: self.retries,
            escalate_after: self.escalate_after_secs.map(Duration::from_secs),
            retrigger_after: self.retrigger_after_secs.map(Duration::from_secs),
        })
    }
}

/// Per-project policy gates (spec.md §4.1, §4.3 fairness knobs, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySet {
    /// `spawn` refuses to run unless the caller attests the issue/task came
    /// from a validated plan (spec.md §4.1 policy hook).
    pub require_validated_plan_task: bool,
    /// Upper bound on live (non-terminal) sessions for this project; `spawn`
    /// returns a `PolicyViolation` once reached. `0` means unbounded.
    pub max_concurrent_sessions: usize,
    /// Ceiling on sessions admitted into Active per scheduler tick
    /// (spec.md §4.3).
    pub max_concurrent_tasks: usize,
    /// Minimum seconds a task must wait before its priority starts aging up
    /// (spec.md §4.3).
    pub aging_threshold_secs: u64,
}

impl Default for PolicySet {
    fn default() -> Self {
        Self {
            require_validated_plan_task: false,
            max_concurrent_sessions: 0,
            max_concurrent_tasks: 4,
            aging_threshold_secs: 900,
        }
    }
}

/// Notifier-wide settings, independent of any one project (spec.md §4.2
/// suppression rule, §9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Seconds between Lifecycle Controller evaluation ticks.
    pub poll_interval_secs: u64,
    /// Per-plugin-call timeout, applied uniformly to every `Runtime`/`Scm`
    /// invocation (spec.md §5).
    pub plugin_timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15,
            plugin_timeout_secs: 10,
        }
    }
}

/// Root configuration document: one or more projects plus process-wide
/// settings, deserialized directly from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub projects: Vec<Project>,
    pub notifications: NotificationConfig,
    #[serde(default = "default_max_fanout")]
    pub max_fanout: usize,
}

fn default_max_fanout() -> usize {
    8
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            projects: Vec::new(),
            notifications: NotificationConfig::default(),
            max_fanout: default_max_fanout(),
        }
    }
}

impl Project {
    /// Converts this project's TOML reaction table into the engine's typed
    /// form (spec.md §4.2).
    pub fn reaction_configs(&self) -> Result<HashMap<String, crate::reaction::ReactionConfig>> {
        self.reactions
            .iter()
            .map(|(key, toml)| Ok((key.clone(), toml.to_reaction_config()?)))
            .collect()
    }

    /// Converts this project's priority → notifier-name routing table.
    pub fn notification_routing(&self) -> Result<HashMap<crate::event::Priority, Vec<String>>> {
        use crate::event::Priority;
        self.notification_routing
            .iter()
            .map(|(key, notifiers)| {
                let priority = match key.as_str() {
                    "urgent" => Priority::Urgent,
                    "action" => Priority::Action,
                    "warning" => Priority::Warning,
                    "info" => Priority::Info,
                    other => {
                        return Err(OrchestratorError::ConfigError(format!(
                            "unknown notification priority '{other}'"
                        )))
                    }
                };
                Ok((priority, notifiers.clone()))
            })
            .collect()
    }
}

impl AppConfig {
    /// Loads and validates a configuration file, resolving each project's
    /// on-disk data directory (instance hash, sessions dir, worktrees dir)
    /// against `home` (spec.md §6).
    pub fn load(config_path: &Path, home: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(config_path)?;
        let mut config: AppConfig = toml::from_str(&contents)
            .map_err(|e| OrchestratorError::ConfigError(format!("invalid config: {e}")))?;

        let resolved_config_path = config_path
            .canonicalize()
            .unwrap_or_else(|_| config_path.to_path_buf());

        for project in &mut config.projects {
            if project.session_prefix.is_empty() {
                project.session_prefix = path::derive_prefix(&project.id);
            }
            project.instance_hash = path::generate_instance_hash(&resolved_config_path);
            let base = path::resolve_project_base(home, &resolved_config_path, &project.repo_path)?;
            project.sessions_dir = path::sessions_dir(&base);
            project.worktrees_dir = path::worktrees_dir(&base);
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let mut seen = std::collections::HashSet::new();
        for project in &self.projects {
            if project.id.is_empty() {
                return Err(OrchestratorError::ConfigError(
                    "project id must not be empty".to_string(),
                ));
            }
            if !seen.insert(project.id.clone()) {
                return Err(OrchestratorError::ConfigError(format!(
                    "duplicate project id '{}'",
                    project.id
                )));
            }
            if project.runtime_plugin.is_empty() || project.agent_plugin.is_empty() {
                return Err(OrchestratorError::ConfigError(format!(
                    "project '{}' must bind a runtime and agent plugin",
                    project.id
                )));
            }
        }
        Ok(())
    }

    pub fn project(&self, id: &str) -> Result<&Project> {
        self.projects
            .iter()
            .find(|p| p.id == id)
            .ok_or_else(|| OrchestratorError::NotFound(format!("project '{id}'")))
    }
}
