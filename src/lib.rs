//! `ao`: orchestrates concurrent AI coding-agent sessions against a shared
//! git repository.
//!
//! Each session owns a git worktree on its own branch, a long-lived agent
//! process hosted by a runtime plugin, and progresses through a status state
//! machine driven by terminal activity and source-control signals. The
//! [`lifecycle`] module fuses those signals into transitions and reactions;
//! [`session`] owns the canonical session store; [`scheduler`] answers a pure
//! "what should run next" question over a task graph.

pub mod cli;
pub mod config;
pub mod event;
pub mod lifecycle;
pub mod metadata;
pub mod path;
pub mod plugin;
pub mod reaction;
pub mod scheduler;
pub mod session;
pub mod workplan;

use thiserror::Error;

/// The orchestrator's error taxonomy (spec.md §7).
#[derive(Error, Debug)]
pub enum OrchestratorError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflicting state: {0}")]
    ConflictingState(String),

    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("dependency unresolved: task {task_id} depends on unknown task {missing_id}")]
    DependencyUnresolved { task_id: String, missing_id: String },

    #[error("plugin error ({slot}): {source}")]
    PluginError {
        slot: plugin::PluginSlot,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("metadata error: {0}")]
    MetadataError(String),

    #[error("config error: {0}")]
    ConfigError(String),

    #[error("transient error: {message}")]
    TransientError {
        message: String,
        retry_after: Option<std::time::Duration>,
    },

    #[error("git operation failed: {0}")]
    Git(#[from] git2::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl OrchestratorError {
    pub fn plugin(slot: plugin::PluginSlot, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        OrchestratorError::PluginError {
            slot,
            source: Box::new(source),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        OrchestratorError::TransientError {
            message: message.into(),
            retry_after: None,
        }
    }

    /// The error kind name used in `{error, kind}` JSON-mode output (spec.md §7).
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::NotFound(_) => "NotFound",
            OrchestratorError::ConflictingState(_) => "ConflictingState",
            OrchestratorError::PolicyViolation(_) => "PolicyViolation",
            OrchestratorError::DependencyUnresolved { .. } => "DependencyUnresolved",
            OrchestratorError::PluginError { .. } => "PluginError",
            OrchestratorError::MetadataError(_) => "MetadataError",
            OrchestratorError::ConfigError(_) => "ConfigError",
            OrchestratorError::TransientError { .. } => "TransientError",
            OrchestratorError::Git(_) => "PluginError",
            OrchestratorError::Io(_) => "MetadataError",
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;
