//! Plugin contracts the core consumes (spec.md §4.5, §9).
//!
//! Concrete SCM/tracker/notifier implementations (a hosted git service
//! client, a chat notifier, …) are out of scope — the core only defines the
//! trait each slot must satisfy and a typed registry keyed by `(slot, name)`
//! that built-in and externally-loaded plugins register into at startup.
//! The registry is immutable once the controller starts (spec.md §5).

pub mod agent;
pub mod notifier;
pub mod runtime;
pub mod scm;
pub mod tracker;

pub mod builtin;

pub use agent::{ActivityState, Agent, AgentSessionInfo};
pub use notifier::Notifier;
pub use runtime::{Runtime, RuntimeHandle};
pub use scm::{AutomatedComment, Comment, Mergeability, PRInfo, Scm};
pub use tracker::{Issue, Tracker};

use crate::{OrchestratorError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// The kind of plugin slot a registry entry fills (spec.md §9).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PluginSlot {
    Runtime,
    Agent,
    Scm,
    Tracker,
    Notifier,
    Workspace,
}

impl std::fmt::Display for PluginSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PluginSlot::Runtime => "runtime",
            PluginSlot::Agent => "agent",
            PluginSlot::Scm => "scm",
            PluginSlot::Tracker => "tracker",
            PluginSlot::Notifier => "notifier",
            PluginSlot::Workspace => "workspace",
        };
        write!(f, "{name}")
    }
}

/// Workspace isolation strategy: the policy a project binds for `spawn`'s
/// worktree creation (spec.md §4.1, §9).
#[async_trait::async_trait]
pub trait Workspace: Send + Sync {
    fn name(&self) -> &'static str;

    async fn prepare(
        &self,
        repo_path: &std::path::Path,
        session_id: &str,
        base_branch: &str,
    ) -> Result<WorkspaceContext>;

    async fn cleanup(&self, ctx: &WorkspaceContext) -> Result<()>;
}

/// The provisioned workspace details an isolation strategy hands back.
#[derive(Debug, Clone)]
pub struct WorkspaceContext {
    pub session_id: String,
    pub repo_path: std::path::PathBuf,
    pub checkout_path: std::path::PathBuf,
    pub branch_name: String,
}

/// A typed registry of named plugins, one map per slot. Built-in plugins
/// register at construction; external plugins (loaded from configured
/// paths) register before the controller starts. Once handed to the
/// controller the registry is read-only.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    runtimes: HashMap<String, Arc<dyn Runtime>>,
    agents: HashMap<String, Arc<dyn Agent>>,
    scms: HashMap<String, Arc<dyn Scm>>,
    trackers: HashMap<String, Arc<dyn Tracker>>,
    notifiers: HashMap<String, Arc<dyn Notifier>>,
    workspaces: HashMap<String, Arc<dyn Workspace>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_runtime(&mut self, name: impl Into<String>, plugin: Arc<dyn Runtime>) {
        self.runtimes.insert(name.into(), plugin);
    }

    pub fn register_agent(&mut self, name: impl Into<String>, plugin: Arc<dyn Agent>) {
        self.agents.insert(name.into(), plugin);
    }

    pub fn register_scm(&mut self, name: impl Into<String>, plugin: Arc<dyn Scm>) {
        self.scms.insert(name.into(), plugin);
    }

    pub fn register_tracker(&mut self, name: impl Into<String>, plugin: Arc<dyn Tracker>) {
        self.trackers.insert(name.into(), plugin);
    }

    pub fn register_notifier(&mut self, name: impl Into<String>, plugin: Arc<dyn Notifier>) {
        self.notifiers.insert(name.into(), plugin);
    }

    pub fn register_workspace(&mut self, name: impl Into<String>, plugin: Arc<dyn Workspace>) {
        self.workspaces.insert(name.into(), plugin);
    }

    pub fn runtime(&self, name: &str) -> Result<Arc<dyn Runtime>> {
        self.runtimes
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(PluginSlot::Runtime, name))
    }

    pub fn agent(&self, name: &str) -> Result<Arc<dyn Agent>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(PluginSlot::Agent, name))
    }

    pub fn scm(&self, name: &str) -> Result<Arc<dyn Scm>> {
        self.scms.get(name).cloned().ok_or_else(|| not_registered(PluginSlot::Scm, name))
    }

    pub fn tracker(&self, name: &str) -> Result<Arc<dyn Tracker>> {
        self.trackers
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(PluginSlot::Tracker, name))
    }

    pub fn notifier(&self, name: &str) -> Result<Arc<dyn Notifier>> {
        self.notifiers
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(PluginSlot::Notifier, name))
    }

    pub fn workspace(&self, name: &str) -> Result<Arc<dyn Workspace>> {
        self.workspaces
            .get(name)
            .cloned()
            .ok_or_else(|| not_registered(PluginSlot::Workspace, name))
    }
}

fn not_registered(slot: PluginSlot, name: &str) -> OrchestratorError {
    OrchestratorError::ConfigError(format!("no {slot} plugin registered under name '{name}'"))
}
