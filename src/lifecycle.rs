//! Lifecycle Controller: derives each session's status from runtime
//! liveness, terminal activity, and SCM state, then fires configured
//! reactions (spec.md §4.2, §8 scenarios 1–5).
//!
//! Grounded on the teacher's orchestrator tick loop, generalized from one
//! hardcoded activity check into the three-stage fusion the spec describes,
//! with bounded per-tick fan-out via `tokio::sync::Semaphore` and a
//! `tokio::task::JoinSet` so one session's failure can't stall the others
//! (SPEC_FULL.md §5).

use crate::event::{Event, EventType, EventLog, Priority};
use crate::plugin::scm::{CISummary, PRState, ReviewDecision};
use crate::plugin::{Agent, ActivityState, Notifier, PRInfo, Runtime, Scm};
use crate::reaction::{FireDecision, ReactionAction, ReactionConfig, ReactionEngine};
use crate::scheduler::{Clock, SystemClock};
use crate::session::{Session, SessionActivity, SessionManager, SessionStatus};
use crate::Result;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;

/// A swallowed per-session failure, recorded instead of propagated
/// (SPEC_FULL.md §4.2 expanded diagnostics).
#[derive(Debug, Clone)]
pub struct Diagnostic {
    pub session_id: String,
    pub message: String,
}

/// Tuning knobs for one controller instance (spec.md §5).
#[derive(Debug, Clone)]
pub struct LifecycleConfig {
    pub tick_interval: Duration,
    /// Bounded per-tick parallelism across sessions.
    pub fanout_limit: usize,
    /// Per-plugin-call timeout; exceeding it is a transient, swallowed
    /// failure.
    pub plugin_timeout: Duration,
    pub diagnostics_capacity: usize,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(10),
            fanout_limit: 8,
            plugin_timeout: Duration::from_secs(30),
            diagnostics_capacity: 200,
        }
    }
}

/// Maps a derived status to the reaction key configured for it, if any
/// (spec.md §4.2).
fn reaction_key_for_status(status: SessionStatus) -> Option<&'static str> {
    match status {
        SessionStatus::CiFailed => Some("ci-failed"),
        SessionStatus::ChangesRequested => Some("review-changes-requested"),
        SessionStatus::Stuck => Some("stuck"),
        SessionStatus::NeedsInput => Some("needs-input"),
        _ => None,
    }
}

/// Default event priority for a derived status, used for `urgent`/`action`
/// routing when no reaction is configured (spec.md §4.2 suppression rule).
fn priority_for_status(status: SessionStatus) -> Priority {
    match status {
        SessionStatus::CiFailed | SessionStatus::Stuck => Priority::Urgent,
        SessionStatus::ChangesRequested
        | SessionStatus::NeedsInput
        | SessionStatus::Mergeable
        | SessionStatus::Approved => Priority::Action,
        SessionStatus::Killed | SessionStatus::Abandoned | SessionStatus::Terminated => {
            Priority::Warning
        }
        _ => Priority::Info,
    }
}

/// Drives periodic or on-demand evaluation of every session bound to one
/// [`SessionManager`] (spec.md §4.2).
pub struct LifecycleController {
    manager: Arc<SessionManager>,
    event_log: Arc<EventLog>,
    reactions: Mutex<ReactionEngine>,
    notification_routing: HashMap<Priority, Vec<String>>,
    clock: Arc<dyn Clock>,
    config: LifecycleConfig,
    diagnostics: Mutex<VecDeque<Diagnostic>>,
}

impl LifecycleController {
    pub fn new(
        manager: Arc<SessionManager>,
        event_log: Arc<EventLog>,
        reaction_configs: HashMap<String, ReactionConfig>,
        notification_routing: HashMap<Priority, Vec<String>>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            manager,
            event_log,
            reactions: Mutex::new(ReactionEngine::new(reaction_configs)),
            notification_routing,
            clock: Arc::new(SystemClock),
            config,
            diagnostics: Mutex::new(VecDeque::new()),
        }
    }

    /// Overrides the clock (test-only hook for deterministic retrigger
    /// timing, SPEC_FULL.md §4.3).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Recent swallowed per-session failures, newest last
    /// (SPEC_FULL.md §4.2 expanded diagnostics).
    pub async fn recent_diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.lock().await.iter().cloned().collect()
    }

    async fn record_diagnostic(&self, session_id: &str, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(session_id = %session_id, %message, "session evaluation diagnostic");
        let mut diagnostics = self.diagnostics.lock().await;
        if diagnostics.len() >= self.config.diagnostics_capacity {
            diagnostics.pop_front();
        }
        diagnostics.push_back(Diagnostic {
            session_id: session_id.to_string(),
            message,
        });
    }

    /// Runs one evaluation tick over every live session, bounded by
    /// `fanoutLimit` concurrent evaluations (spec.md §5). A panicking or
    /// failing per-session evaluation is recorded as a diagnostic and never
    /// stops the others.
    pub async fn run_tick(self: &Arc<Self>) {
        let sessions = self.manager.list().await;
        let semaphore = Arc::new(Semaphore::new(self.config.fanout_limit.max(1)));
        let mut tasks = JoinSet::new();

        for session in sessions {
            if session.status.is_terminal() {
                continue;
            }
            let controller = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .expect("lifecycle fan-out semaphore is never closed");
                controller.check(&session.id).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => self.record_diagnostic("unknown", e.to_string()).await,
                Err(join_error) => {
                    self.record_diagnostic("unknown", format!("evaluation task panicked: {join_error}"))
                        .await;
                }
            }
        }
    }

    /// Evaluates one session on demand (spec.md §4.2 `check(id)`).
    pub async fn check(&self, session_id: &str) -> Result<()> {
        let Some(session) = self.manager.get(session_id).await else {
            return Ok(());
        };

        let outcome = self.evaluate(&session).await;
        let (candidate, activity, pr) = match outcome {
            Ok(outcome) => outcome,
            Err(message) => {
                self.record_diagnostic(session_id, message).await;
                return Ok(());
            }
        };

        let Some(candidate) = candidate else {
            // A branch asked us to preserve the prior status outright
            // (e.g. activity detection was inconclusive).
            return Ok(());
        };

        let now_ms = self.clock.now_ms();
        let changed = self
            .manager
            .apply_evaluation(session_id, candidate, activity, pr.clone())
            .await?;

        if changed {
            self.on_transition(session_id, session.status, candidate, now_ms).await;
        } else if let Some(key) = reaction_key_for_status(candidate) {
            let decision = self.reactions.lock().await.on_unchanged_status(session_id, key, now_ms);
            if let Some(decision) = decision {
                self.fire(session_id, decision).await;
            }
        }

        if let Some(pr) = &pr {
            if candidate != SessionStatus::Merged && candidate != SessionStatus::Abandoned {
                self.check_automated_comments(session_id, pr, changed, now_ms).await;
            }
        }

        Ok(())
    }

    async fn check_automated_comments(
        &self,
        session_id: &str,
        pr: &PRInfo,
        just_transitioned: bool,
        now_ms: i64,
    ) {
        if just_transitioned {
            // The transition evaluation establishes the baseline; comments
            // are compared against it starting next tick (spec.md §8
            // scenario 5).
            return;
        }
        let Some(scm) = self.scm_for(session_id).await else {
            return;
        };
        match scm.get_automated_comments(pr).await {
            Ok(comments) => {
                let ids: Vec<String> = comments.into_iter().map(|c| c.id).collect();
                let decision = self.reactions.lock().await.on_unchanged_comments(
                    session_id,
                    "bugbot-comments",
                    now_ms,
                    &ids,
                );
                if let Some(decision) = decision {
                    self.fire(session_id, decision).await;
                }
            }
            Err(e) => self.record_diagnostic(session_id, e.to_string()).await,
        }
    }

    async fn on_transition(
        &self,
        session_id: &str,
        prior: SessionStatus,
        new_status: SessionStatus,
        now_ms: i64,
    ) {
        tracing::info!(session_id = %session_id, %prior, new_status = %new_status, "session transitioned");
        self.reactions.lock().await.clear_fingerprints_for_session(session_id);

        let priority = priority_for_status(new_status);
        let project_id = self.manager.project().id.clone();
        let event = Event::new(
            EventType::session_status(new_status.as_str()),
            priority,
            session_id,
            project_id,
            format!("session {session_id} transitioned {prior} -> {new_status}"),
        );
        if let Err(e) = self.event_log.append(&event).await {
            self.record_diagnostic(session_id, e.to_string()).await;
        }

        let reaction_key = reaction_key_for_status(new_status);
        let fired = if let Some(key) = reaction_key {
            self.reactions.lock().await.on_transition(session_id, key, now_ms)
        } else {
            None
        };

        match &fired {
            Some(decision) => self.fire(session_id, decision.clone()).await,
            None if reaction_key.is_none() => {
                // No reaction configured for this status at all: route by
                // priority if it's urgent/action (spec.md §4.2 suppression
                // rule, second clause).
                if matches!(priority, Priority::Urgent | Priority::Action) {
                    self.notify(&event).await;
                }
            }
            None => {}
        }
    }

    /// Executes a fired reaction, honoring the suppression rule: a
    /// `send-to-agent` fire must not also dispatch a human notification for
    /// the same event (spec.md §4.2).
    async fn fire(&self, session_id: &str, decision: FireDecision) {
        tracing::info!(
            session_id = %session_id,
            reaction_key = %decision.reaction_key,
            action = decision.action.as_str(),
            "reaction fired"
        );
        match decision.action {
            ReactionAction::SendToAgent => {
                let message = decision.message.unwrap_or_default();
                if let Err(e) = self.manager.send(session_id, &message).await {
                    self.record_diagnostic(session_id, e.to_string()).await;
                }
            }
            ReactionAction::NotifyHuman => {
                let project_id = self.manager.project().id.clone();
                let event = Event::new(
                    EventType(decision.reaction_key.clone()),
                    Priority::Action,
                    session_id,
                    project_id,
                    decision.message.unwrap_or_else(|| decision.reaction_key.clone()),
                );
                if let Err(e) = self.event_log.append(&event).await {
                    self.record_diagnostic(session_id, e.to_string()).await;
                }
                self.notify(&event).await;
            }
            ReactionAction::Terminate => {
                if let Err(e) = self.manager.kill(session_id).await {
                    self.record_diagnostic(session_id, e.to_string()).await;
                }
            }
        }
    }

    async fn notify(&self, event: &Event) {
        let Some(names) = self.notification_routing.get(&event.priority) else {
            return;
        };
        for name in names {
            if let Ok(notifier) = self.manager.registry().notifier(name) {
                if let Err(e) = notifier.notify(event).await {
                    self.record_diagnostic(&event.session_id, e.to_string()).await;
                }
            }
        }
    }

    async fn scm_for(&self, session_id: &str) -> Option<Arc<dyn Scm>> {
        let name = self.manager.project().scm_plugin.as_ref()?;
        match self.manager.registry().scm(name) {
            Ok(scm) => Some(scm),
            Err(e) => {
                self.record_diagnostic(session_id, e.to_string()).await;
                None
            }
        }
    }

    /// Runs the three-stage evaluation described in spec.md §4.2: runtime
    /// liveness, process liveness + terminal activity fusion, SCM overlay.
    /// Returns `(candidate status, candidate activity, detected PR)`; a
    /// `None` candidate means "preserve the prior status" (an
    /// inconclusive/failed branch).
    async fn evaluate(
        &self,
        session: &Session,
    ) -> std::result::Result<(Option<SessionStatus>, SessionActivity, Option<PRInfo>), String> {
        let runtime = self
            .manager
            .registry()
            .runtime(&session.runtime_handle.runtime_name)
            .map_err(|e| e.to_string())?;

        // 1. Runtime liveness.
        let alive = match self.with_timeout(runtime.is_alive(&session.runtime_handle)).await {
            Ok(alive) => alive,
            Err(e) => return Err(e),
        };
        if !alive {
            return Ok((Some(SessionStatus::Killed), SessionActivity::Exited, session.pr.clone()));
        }

        // 2. Process liveness + terminal activity fusion.
        let output = self
            .with_timeout(runtime.get_output(&session.runtime_handle, 30))
            .await?;
        let agent = self
            .manager
            .registry()
            .agent(&self.manager.project().agent_plugin)
            .map_err(|e| e.to_string())?;
        // A panicking `detectActivity` must preserve the prior status rather
        // than crash the tick or be swallowed as a generic task failure
        // (spec.md §4.2, §8).
        let activity_state = match std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            agent.detect_activity(&output)
        })) {
            Ok(state) => state,
            Err(_) => {
                tracing::warn!(session_id = %session.id, "detectActivity panicked, preserving prior status");
                return Ok((None, session.activity, session.pr.clone()));
            }
        };

        if matches!(activity_state, ActivityState::Idle | ActivityState::Active)
            && !agent.is_process_running(&session.runtime_handle)
        {
            return Ok((Some(SessionStatus::Killed), SessionActivity::Exited, session.pr.clone()));
        }

        let (mut candidate, mut activity) = match activity_state {
            ActivityState::WaitingInput => (SessionStatus::NeedsInput, SessionActivity::WaitingInput),
            ActivityState::Blocked => (SessionStatus::Stuck, SessionActivity::Blocked),
            ActivityState::Active => (SessionStatus::Working, SessionActivity::Active),
            ActivityState::Idle => (SessionStatus::Working, SessionActivity::Idle),
        };

        // 3. SCM overlay.
        let mut pr = session.pr.clone();
        if let Some(scm) = self.scm_for(&session.id).await {
            if pr.is_none() {
                match self.with_timeout(scm.detect_pr(session, &self.manager.project().id)).await {
                    Ok(detected) => pr = detected,
                    Err(_) => {}
                }
            }

            if let Some(current_pr) = pr.clone() {
                match self.with_timeout(scm.get_pr_state(&current_pr)).await {
                    Ok(PRState::Merged) => {
                        return Ok((Some(SessionStatus::Merged), activity, Some(current_pr)))
                    }
                    Ok(PRState::Closed) => {
                        return Ok((Some(SessionStatus::Abandoned), activity, Some(current_pr)))
                    }
                    Ok(PRState::Open) => {}
                    Err(_) => {}
                }

                candidate = SessionStatus::PrOpen;
                activity = SessionActivity::Ready;

                let (ci, review, _pending) = tokio::join!(
                    self.with_timeout(scm.get_ci_summary(&current_pr)),
                    self.with_timeout(scm.get_review_decision(&current_pr)),
                    self.with_timeout(scm.get_pending_comments(&current_pr)),
                );

                if let Ok(CISummary::Passing) = ci {
                    candidate = SessionStatus::CiPassing;
                }
                if let Ok(ReviewDecision::Approved) = review {
                    candidate = SessionStatus::Approved;
                }
                if let Ok(ReviewDecision::ChangesRequested) = review {
                    candidate = SessionStatus::ChangesRequested;
                }
                let ci_failing = matches!(ci, Ok(CISummary::Failing));
                if ci_failing {
                    candidate = SessionStatus::CiFailed;
                }

                if !ci_failing {
                    if let Ok(mergeability) = self.with_timeout(scm.get_mergeability(&current_pr)).await {
                        if mergeability.is_fully_mergeable() {
                            candidate = SessionStatus::Mergeable;
                        }
                    }
                }
            }
        }

        Ok((Some(candidate), activity, pr))
    }

    async fn with_timeout<T>(&self, fut: impl std::future::Future<Output = Result<T>>) -> std::result::Result<T, String> {
        match tokio::time::timeout(self.config.plugin_timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "plugin call failed");
                Err(e.to_string())
            }
            Err(_) => {
                tracing::warn!(timeout_secs = self.config.plugin_timeout.as_secs(), "plugin call timed out");
                Err("plugin call timed out".to_string())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{PolicySet, Project};
    use crate::plugin::builtin::BranchWorkspace;
    use crate::plugin::runtime::{Runtime, RuntimeHandle};
    use crate::plugin::scm::{AutomatedComment, Comment, Mergeability, Scm};
    use crate::plugin::{Agent, AgentLaunchConfig, AgentSessionInfo, PluginRegistry};
    use crate::scheduler::FixedClock;
    use crate::session::SpawnOptions;
    use async_trait::async_trait;
    use git2::Repository;
    use std::collections::HashMap as Map;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tempfile::tempdir;

    struct ScriptedAgent {
        activity: ActivityState,
        process_running: bool,
    }

    impl Agent for ScriptedAgent {
        fn name(&self) -> &'static str {
            "scripted"
        }
        fn get_launch_command(&self, _config: &AgentLaunchConfig) -> String {
            "true".to_string()
        }
        fn get_environment(&self, _config: &AgentLaunchConfig) -> Map<String, String> {
            Map::new()
        }
        fn detect_activity(&self, _terminal_output: &str) -> ActivityState {
            self.activity
        }
        fn get_session_info(&self, _handle: &RuntimeHandle) -> Option<AgentSessionInfo> {
            None
        }
        fn is_process_running(&self, _handle: &RuntimeHandle) -> bool {
            self.process_running
        }
    }

    struct PanickingAgent;

    impl Agent for PanickingAgent {
        fn name(&self) -> &'static str {
            "panicking"
        }
        fn get_launch_command(&self, _config: &AgentLaunchConfig) -> String {
            "true".to_string()
        }
        fn get_environment(&self, _config: &AgentLaunchConfig) -> Map<String, String> {
            Map::new()
        }
        fn detect_activity(&self, _terminal_output: &str) -> ActivityState {
            panic!("boom")
        }
        fn get_session_info(&self, _handle: &RuntimeHandle) -> Option<AgentSessionInfo> {
            None
        }
        fn is_process_running(&self, _handle: &RuntimeHandle) -> bool {
            true
        }
    }

    struct ScriptedRuntime {
        alive: AtomicBool,
    }

    #[async_trait]
    impl Runtime for ScriptedRuntime {
        fn name(&self) -> &'static str {
            "scripted"
        }
        async fn create(&self, _handle: &RuntimeHandle, _env: &Map<String, String>, _cwd: &std::path::Path) -> Result<()> {
            Ok(())
        }
        async fn destroy(&self, _handle: &RuntimeHandle) -> Result<()> {
            Ok(())
        }
        async fn send_message(&self, _handle: &RuntimeHandle, _text: &str) -> Result<()> {
            Ok(())
        }
        async fn get_output(&self, _handle: &RuntimeHandle, _lines: usize) -> Result<String> {
            Ok(String::new())
        }
        async fn is_alive(&self, _handle: &RuntimeHandle) -> Result<bool> {
            Ok(self.alive.load(Ordering::SeqCst))
        }
    }

    struct NoPrScm;

    #[async_trait]
    impl Scm for NoPrScm {
        fn name(&self) -> &'static str {
            "none"
        }
        async fn detect_pr(&self, _session: &Session, _project_id: &str) -> Result<Option<PRInfo>> {
            Ok(None)
        }
        async fn get_pr_state(&self, _pr: &PRInfo) -> Result<PRState> {
            Ok(PRState::Open)
        }
        async fn get_ci_summary(&self, _pr: &PRInfo) -> Result<CISummary> {
            Ok(CISummary::None)
        }
        async fn get_review_decision(&self, _pr: &PRInfo) -> Result<ReviewDecision> {
            Ok(ReviewDecision::None)
        }
        async fn get_pending_comments(&self, _pr: &PRInfo) -> Result<Vec<Comment>> {
            Ok(Vec::new())
        }
        async fn get_automated_comments(&self, _pr: &PRInfo) -> Result<Vec<AutomatedComment>> {
            Ok(Vec::new())
        }
        async fn get_mergeability(&self, _pr: &PRInfo) -> Result<Mergeability> {
            Ok(Mergeability {
                mergeable: false,
                ci_passing: false,
                approved: false,
                no_conflicts: false,
                blockers: Vec::new(),
            })
        }
        async fn merge_pr(&self, _pr: &PRInfo) -> Result<()> {
            Ok(())
        }
        async fn close_pr(&self, _pr: &PRInfo) -> Result<()> {
            Ok(())
        }
    }

    fn init_repo(path: &std::path::Path) {
        let repo = Repository::init(path).unwrap();
        let mut config = repo.config().unwrap();
        config.set_str("user.name", "Test").unwrap();
        config.set_str("user.email", "test@example.com").unwrap();
        let sig = repo.signature().unwrap();
        let tree_id = repo.index().unwrap().write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        repo.commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[]).unwrap();
        let head = repo.head().unwrap().peel_to_commit().unwrap();
        repo.branch("main", &head, true).unwrap();
    }

    async fn build(
        activity: ActivityState,
        process_running: bool,
        runtime_alive: bool,
    ) -> (Arc<SessionManager>, Session, tempfile::TempDir, tempfile::TempDir) {
        let repo_dir = tempdir().unwrap();
        init_repo(repo_dir.path());
        let sessions_dir = tempdir().unwrap();

        let mut registry = PluginRegistry::new();
        registry.register_runtime(
            "scripted",
            Arc::new(ScriptedRuntime {
                alive: AtomicBool::new(runtime_alive),
            }),
        );
        registry.register_agent("scripted", Arc::new(ScriptedAgent { activity, process_running }));
        registry.register_workspace("git-branch", Arc::new(BranchWorkspace));
        registry.register_scm("none", Arc::new(NoPrScm));

        let project = Project {
            id: "proj".to_string(),
            repo_path: repo_dir.path().to_path_buf(),
            upstream: String::new(),
            default_branch: "main".to_string(),
            session_prefix: "ao".to_string(),
            instance_hash: "abc123".to_string(),
            sessions_dir: sessions_dir.path().to_path_buf(),
            worktrees_dir: tempdir().unwrap().into_path(),
            runtime_plugin: "scripted".to_string(),
            agent_plugin: "scripted".to_string(),
            scm_plugin: Some("none".to_string()),
            tracker_plugin: None,
            notifier_plugins: Vec::new(),
            workspace_plugin: "git-branch".to_string(),
            policies: PolicySet::default(),
            reactions: HashMap::new(),
            notification_routing: HashMap::new(),
        };

        let manager = Arc::new(SessionManager::new(project, Arc::new(registry)).unwrap());
        let session = manager.spawn(None, SpawnOptions::default()).await.unwrap();
        (manager, session, repo_dir, sessions_dir)
    }

    fn test_controller(manager: Arc<SessionManager>, events_dir: &std::path::Path) -> Arc<LifecycleController> {
        let event_log = Arc::new(EventLog::open(events_dir.join("events.jsonl")).unwrap());
        Arc::new(
            LifecycleController::new(
                manager,
                event_log,
                HashMap::new(),
                HashMap::new(),
                LifecycleConfig::default(),
            )
            .with_clock(Arc::new(FixedClock::new(0))),
        )
    }

    #[tokio::test]
    async fn spawning_to_working_on_active_activity() {
        let (manager, session, _repo, sessions_dir) = build(ActivityState::Active, true, true).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Working);
    }

    #[tokio::test]
    async fn idle_and_dead_process_is_killed() {
        let (manager, session, _repo, sessions_dir) = build(ActivityState::Idle, false, true).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Killed);
    }

    #[tokio::test]
    async fn dead_runtime_is_killed_regardless_of_activity() {
        let (manager, session, _repo, sessions_dir) = build(ActivityState::Active, true, false).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Killed);
    }

    #[tokio::test]
    async fn waiting_input_activity_maps_to_needs_input() {
        let (manager, session, _repo, sessions_dir) = build(ActivityState::WaitingInput, true, true).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::NeedsInput);
    }

    #[tokio::test]
    async fn panicking_detect_activity_preserves_prior_status() {
        let repo_dir = tempdir().unwrap();
        init_repo(repo_dir.path());
        let sessions_dir = tempdir().unwrap();

        let mut registry = PluginRegistry::new();
        registry.register_runtime("scripted", Arc::new(ScriptedRuntime { alive: AtomicBool::new(true) }));
        registry.register_agent("panicking", Arc::new(PanickingAgent));
        registry.register_workspace("git-branch", Arc::new(BranchWorkspace));
        registry.register_scm("none", Arc::new(NoPrScm));

        let project = Project {
            id: "proj".to_string(),
            repo_path: repo_dir.path().to_path_buf(),
            upstream: String::new(),
            default_branch: "main".to_string(),
            session_prefix: "ao".to_string(),
            instance_hash: "abc123".to_string(),
            sessions_dir: sessions_dir.path().to_path_buf(),
            worktrees_dir: tempdir().unwrap().into_path(),
            runtime_plugin: "scripted".to_string(),
            agent_plugin: "panicking".to_string(),
            scm_plugin: Some("none".to_string()),
            tracker_plugin: None,
            notifier_plugins: Vec::new(),
            workspace_plugin: "git-branch".to_string(),
            policies: PolicySet::default(),
            reactions: HashMap::new(),
            notification_routing: HashMap::new(),
        };

        let manager = Arc::new(SessionManager::new(project, Arc::new(registry)).unwrap());
        let session = manager.spawn(None, SpawnOptions::default()).await.unwrap();
        let prior_status = session.status;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, prior_status);
    }

    struct ScriptedScm {
        pr_state: PRState,
        ci: CISummary,
        review: ReviewDecision,
        mergeability: Mergeability,
    }

    impl ScriptedScm {
        fn open_with(ci: CISummary, review: ReviewDecision, mergeability: Mergeability) -> Self {
            Self { pr_state: PRState::Open, ci, review, mergeability }
        }
    }

    #[async_trait]
    impl Scm for ScriptedScm {
        fn name(&self) -> &'static str {
            "scripted-scm"
        }
        async fn detect_pr(&self, session: &Session, _project_id: &str) -> Result<Option<PRInfo>> {
            Ok(Some(PRInfo {
                number: 1,
                url: "https://example.test/pr/1".to_string(),
                title: "test pr".to_string(),
                owner: "acme".to_string(),
                repo: "widgets".to_string(),
                branch: session.branch.clone(),
                base_branch: "main".to_string(),
                is_draft: false,
            }))
        }
        async fn get_pr_state(&self, _pr: &PRInfo) -> Result<PRState> {
            Ok(self.pr_state)
        }
        async fn get_ci_summary(&self, _pr: &PRInfo) -> Result<CISummary> {
            Ok(self.ci)
        }
        async fn get_review_decision(&self, _pr: &PRInfo) -> Result<ReviewDecision> {
            Ok(self.review)
        }
        async fn get_pending_comments(&self, _pr: &PRInfo) -> Result<Vec<Comment>> {
            Ok(Vec::new())
        }
        async fn get_automated_comments(&self, _pr: &PRInfo) -> Result<Vec<AutomatedComment>> {
            Ok(Vec::new())
        }
        async fn get_mergeability(&self, _pr: &PRInfo) -> Result<Mergeability> {
            Ok(self.mergeability.clone())
        }
        async fn merge_pr(&self, _pr: &PRInfo) -> Result<()> {
            Ok(())
        }
        async fn close_pr(&self, _pr: &PRInfo) -> Result<()> {
            Ok(())
        }
    }

    fn no_mergeability() -> Mergeability {
        Mergeability { mergeable: false, ci_passing: false, approved: false, no_conflicts: false, blockers: Vec::new() }
    }

    fn full_mergeability() -> Mergeability {
        Mergeability { mergeable: true, ci_passing: true, approved: true, no_conflicts: true, blockers: Vec::new() }
    }

    async fn build_with_scm(
        scm: Arc<dyn Scm>,
    ) -> (Arc<SessionManager>, Session, tempfile::TempDir, tempfile::TempDir) {
        let repo_dir = tempdir().unwrap();
        init_repo(repo_dir.path());
        let sessions_dir = tempdir().unwrap();

        let mut registry = PluginRegistry::new();
        registry.register_runtime("scripted", Arc::new(ScriptedRuntime { alive: AtomicBool::new(true) }));
        registry.register_agent(
            "scripted",
            Arc::new(ScriptedAgent { activity: ActivityState::Active, process_running: true }),
        );
        registry.register_workspace("git-branch", Arc::new(BranchWorkspace));
        let scm_name = scm.name().to_string();
        registry.register_scm(&scm_name, scm);

        let project = Project {
            id: "proj".to_string(),
            repo_path: repo_dir.path().to_path_buf(),
            upstream: String::new(),
            default_branch: "main".to_string(),
            session_prefix: "ao".to_string(),
            instance_hash: "abc123".to_string(),
            sessions_dir: sessions_dir.path().to_path_buf(),
            worktrees_dir: tempdir().unwrap().into_path(),
            runtime_plugin: "scripted".to_string(),
            agent_plugin: "scripted".to_string(),
            scm_plugin: Some(scm_name),
            tracker_plugin: None,
            notifier_plugins: Vec::new(),
            workspace_plugin: "git-branch".to_string(),
            policies: PolicySet::default(),
            reactions: HashMap::new(),
            notification_routing: HashMap::new(),
        };

        let manager = Arc::new(SessionManager::new(project, Arc::new(registry)).unwrap());
        let session = manager.spawn(None, SpawnOptions::default()).await.unwrap();
        (manager, session, repo_dir, sessions_dir)
    }

    #[tokio::test]
    async fn failing_ci_never_reports_mergeable() {
        let scm = ScriptedScm::open_with(CISummary::Failing, ReviewDecision::Approved, full_mergeability());
        let (manager, session, _repo, sessions_dir) = build_with_scm(Arc::new(scm)).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::CiFailed);
    }

    #[tokio::test]
    async fn changes_requested_overlay() {
        let scm = ScriptedScm::open_with(CISummary::Passing, ReviewDecision::ChangesRequested, no_mergeability());
        let (manager, session, _repo, sessions_dir) = build_with_scm(Arc::new(scm)).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::ChangesRequested);
    }

    #[tokio::test]
    async fn fully_mergeable_overlay() {
        let scm = ScriptedScm::open_with(CISummary::Passing, ReviewDecision::Approved, full_mergeability());
        let (manager, session, _repo, sessions_dir) = build_with_scm(Arc::new(scm)).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Mergeable);
    }

    #[tokio::test]
    async fn merged_pr_transitions_session() {
        let mut scm = ScriptedScm::open_with(CISummary::Passing, ReviewDecision::Approved, full_mergeability());
        scm.pr_state = PRState::Merged;
        let (manager, session, _repo, sessions_dir) = build_with_scm(Arc::new(scm)).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Merged);
    }

    #[tokio::test]
    async fn closed_pr_is_abandoned() {
        let mut scm = ScriptedScm::open_with(CISummary::None, ReviewDecision::None, no_mergeability());
        scm.pr_state = PRState::Closed;
        let (manager, session, _repo, sessions_dir) = build_with_scm(Arc::new(scm)).await;
        let controller = test_controller(Arc::clone(&manager), sessions_dir.path());

        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::Abandoned);
    }

    #[tokio::test]
    async fn ci_failed_reaction_sends_message_to_agent() {
        let scm = ScriptedScm::open_with(CISummary::Failing, ReviewDecision::None, no_mergeability());
        let (manager, session, _repo, sessions_dir) = build_with_scm(Arc::new(scm)).await;

        let mut reactions = HashMap::new();
        reactions.insert(
            "ci-failed".to_string(),
            ReactionConfig {
                auto: true,
                action: ReactionAction::SendToAgent,
                message: Some("CI failed, please investigate".to_string()),
                retries: 0,
                escalate_after: None,
                retrigger_after: None,
            },
        );
        let event_log = Arc::new(EventLog::open(sessions_dir.path().join("events.jsonl")).unwrap());
        let controller = Arc::new(
            LifecycleController::new(Arc::clone(&manager), event_log, reactions, HashMap::new(), LifecycleConfig::default())
                .with_clock(Arc::new(FixedClock::new(0))),
        );

        // First check transitions PrOpen -> CiFailed and fires the reaction;
        // `send` succeeding (rather than erring with ConflictingState because
        // the session looks terminal) is itself the behavioral assertion.
        controller.check(&session.id).await.unwrap();

        let updated = manager.get(&session.id).await.unwrap();
        assert_eq!(updated.status, SessionStatus::CiFailed);
        assert!(controller.recent_diagnostics().await.is_empty());
    }
}
