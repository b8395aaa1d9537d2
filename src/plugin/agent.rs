//! Agent plugin contract: launch command derivation and terminal-activity
//! classification (spec.md §4.5).

use super::RuntimeHandle;
use std::collections::HashMap;

/// Classification of an agent's recent terminal output, used by the
/// Lifecycle Controller's terminal-activity fusion step (spec.md §4.2).
///
/// `detectActivity` must be pure and synchronous, and must not panic on
/// empty input — an agent that has produced no output yet is `Idle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActivityState {
    Active,
    Idle,
    WaitingInput,
    Blocked,
}

/// A snapshot of agent-reported session info, read from sidecar files the
/// agent itself may write. Implementations must tolerate missing files by
/// returning `None` rather than erroring.
#[derive(Debug, Clone)]
pub struct AgentSessionInfo {
    pub summary: Option<String>,
    pub model: Option<String>,
    pub extra: HashMap<String, String>,
}

/// Per-agent-type configuration consumed by `getLaunchCommand`/`getEnvironment`.
#[derive(Debug, Clone)]
pub struct AgentLaunchConfig {
    pub agent_type: String,
    pub prompt: Option<String>,
    pub session_id: String,
    pub issue_id: Option<String>,
    pub extra_args: Vec<String>,
}

pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// The shell command used to launch this agent type.
    fn get_launch_command(&self, config: &AgentLaunchConfig) -> String;

    /// Environment variables to set for the launched process, in addition
    /// to the orchestrator's own `AO_*` variables (spec.md §6).
    fn get_environment(&self, config: &AgentLaunchConfig) -> HashMap<String, String>;

    /// Classifies the last `terminal_output` into an [`ActivityState`].
    /// Pure, synchronous, must not panic on an empty string.
    fn detect_activity(&self, terminal_output: &str) -> ActivityState;

    /// Reads the agent's self-reported session info, if any is available.
    fn get_session_info(&self, handle: &RuntimeHandle) -> Option<AgentSessionInfo>;

    /// Whether the underlying OS process is still running. This exists
    /// separately from [`super::Runtime::is_alive`] because a runtime host
    /// (e.g. a terminal multiplexer pane) can outlive the agent process it
    /// was launched to run (spec.md §4.2 step 2).
    fn is_process_running(&self, handle: &RuntimeHandle) -> bool;
}
