//! Built-in [`Agent`] that shells out to a configured CLI coding agent.
//!
//! Grounded in the teacher's `agent::AgentType` enum (`claude-code`,
//! `opencode`, `ampcode`, `codex`, `aider`): rather than hardcode one launch
//! command per type, this plugin takes the shell command as configuration,
//! so any of those CLIs (or a future one) can be bound under the same
//! implementation.

use crate::plugin::{ActivityState, Agent, AgentLaunchConfig, AgentSessionInfo, RuntimeHandle};
use std::collections::HashMap;

/// A terminal-hosted CLI agent identified by the shell command used to
/// launch it (e.g. `claude`, `aider`, `codex`).
pub struct GenericAgent {
    name: &'static str,
    command: String,
}

impl GenericAgent {
    pub fn new(name: &'static str, command: impl Into<String>) -> Self {
        Self {
            name,
            command: command.into(),
        }
    }
}

impl Agent for GenericAgent {
    fn name(&self) -> &'static str {
        self.name
    }

    fn get_launch_command(&self, config: &AgentLaunchConfig) -> String {
        let mut command = self.command.clone();
        for arg in &config.extra_args {
            command.push(' ');
            command.push_str(arg);
        }
        command
    }

    fn get_environment(&self, config: &AgentLaunchConfig) -> HashMap<String, String> {
        let mut env = HashMap::new();
        env.insert("AO_AGENT_TYPE".to_string(), config.agent_type.clone());
        env
    }

    /// A line ending in a question mark or a yes/no prompt reads as
    /// `waiting_input`; one mentioning an error or panic reads as
    /// `blocked`; anything else with non-empty output is `active`. Empty
    /// output is `idle` — this never panics on an empty string.
    fn detect_activity(&self, terminal_output: &str) -> ActivityState {
        let last_line = terminal_output
            .lines()
            .rev()
            .find(|line| !line.trim().is_empty())
            .unwrap_or("")
            .trim()
            .to_lowercase();

        if last_line.is_empty() {
            return ActivityState::Idle;
        }
        if last_line.ends_with('?')
            || last_line.contains("(y/n)")
            || last_line.contains("do you want")
            || last_line.contains("press enter")
        {
            return ActivityState::WaitingInput;
        }
        if last_line.contains("panicked") || last_line.contains("fatal error") {
            return ActivityState::Blocked;
        }
        ActivityState::Active
    }

    fn get_session_info(&self, _handle: &RuntimeHandle) -> Option<AgentSessionInfo> {
        None
    }

    /// This built-in keeps no process-tracking state of its own; for the
    /// PTY runtime it's paired with, process death and host death coincide,
    /// so runtime liveness alone already catches the exited-process case.
    fn is_process_running(&self, _handle: &RuntimeHandle) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_output_is_idle() {
        let agent = GenericAgent::new("claude-code", "claude");
        assert_eq!(agent.detect_activity(""), ActivityState::Idle);
    }

    #[test]
    fn question_prompt_is_waiting_input() {
        let agent = GenericAgent::new("claude-code", "claude");
        assert_eq!(
            agent.detect_activity("Apply this patch?"),
            ActivityState::WaitingInput
        );
    }

    #[test]
    fn panic_message_is_blocked() {
        let agent = GenericAgent::new("claude-code", "claude");
        assert_eq!(
            agent.detect_activity("thread 'main' panicked at src/main.rs"),
            ActivityState::Blocked
        );
    }

    #[test]
    fn ordinary_output_is_active() {
        let agent = GenericAgent::new("claude-code", "claude");
        assert_eq!(
            agent.detect_activity("writing src/lib.rs..."),
            ActivityState::Active
        );
    }

    #[test]
    fn launch_command_appends_extra_args() {
        let agent = GenericAgent::new("claude-code", "claude");
        let config = AgentLaunchConfig {
            agent_type: "claude-code".to_string(),
            prompt: None,
            session_id: "ao-1".to_string(),
            issue_id: None,
            extra_args: vec!["--dangerously-skip-permissions".to_string()],
        };
        assert_eq!(
            agent.get_launch_command(&config),
            "claude --dangerously-skip-permissions"
        );
    }
}
