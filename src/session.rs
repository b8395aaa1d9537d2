//! Session Manager: canonical session store and lifecycle operations
//! (spec.md §3 `Session`, §4.1).
//!
//! One [`SessionManager`] is bound to a single [`crate::config::Project`];
//! an orchestrator instance managing several projects runs one manager per
//! project, each with its own metadata store and worktrees directory. This
//! mirrors the teacher's one-`Orchestrator`-per-repository shape, scaled out
//! rather than made multi-tenant internally.

use crate::config::Project;
use crate::metadata::{MetadataStore, Record};
use crate::plugin::{AgentLaunchConfig, AgentSessionInfo, PRInfo, PluginRegistry, RuntimeHandle};
use crate::{OrchestratorError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Derived lifecycle status (spec.md §4.2 status set, §3 terminal states).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Spawning,
    Working,
    NeedsInput,
    Stuck,
    PrOpen,
    CiFailed,
    CiPassing,
    ChangesRequested,
    ReviewPending,
    Approved,
    Mergeable,
    Merged,
    Abandoned,
    Killed,
    /// Explicit operator-initiated termination via `kill`, distinct from a
    /// lifecycle-detected `killed` (runtime/process death). Both are
    /// terminal (spec.md §3).
    Terminated,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Killed
                | SessionStatus::Merged
                | SessionStatus::Abandoned
                | SessionStatus::Terminated
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Spawning => "spawning",
            SessionStatus::Working => "working",
            SessionStatus::NeedsInput => "needs_input",
            SessionStatus::Stuck => "stuck",
            SessionStatus::PrOpen => "pr_open",
            SessionStatus::CiFailed => "ci_failed",
            SessionStatus::CiPassing => "ci_passing",
            SessionStatus::ChangesRequested => "changes_requested",
            SessionStatus::ReviewPending => "review_pending",
            SessionStatus::Approved => "approved",
            SessionStatus::Mergeable => "mergeable",
            SessionStatus::Merged => "merged",
            SessionStatus::Abandoned => "abandoned",
            SessionStatus::Killed => "killed",
            SessionStatus::Terminated => "terminated",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        Ok(match value {
            "spawning" => SessionStatus::Spawning,
            "working" => SessionStatus::Working,
            "needs_input" => SessionStatus::NeedsInput,
            "stuck" => SessionStatus::Stuck,
            "pr_open" => SessionStatus::PrOpen,
            "ci_failed" => SessionStatus::CiFailed,
            "ci_passing" => SessionStatus::CiPassing,
            "changes_requested" => SessionStatus::ChangesRequested,
            "review_pending" => SessionStatus::ReviewPending,
            "approved" => SessionStatus::Approved,
            "mergeable" => SessionStatus::Mergeable,
            "merged" => SessionStatus::Merged,
            "abandoned" => SessionStatus::Abandoned,
            "killed" => SessionStatus::Killed,
            "terminated" => SessionStatus::Terminated,
            other => {
                return Err(OrchestratorError::MetadataError(format!(
                    "unknown session status '{other}'"
                )))
            }
        })
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Coarse-grained terminal activity, reported on the session record
/// (spec.md §3). Distinct from [`crate::plugin::ActivityState`], which is
/// the narrower vocabulary `detectActivity` itself returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionActivity {
    Active,
    Ready,
    Idle,
    WaitingInput,
    Blocked,
    Exited,
}

/// The central entity: one managed agent instance (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub project_id: String,
    pub runtime_handle: RuntimeHandle,
    pub workspace_path: Option<PathBuf>,
    pub created_at: DateTime<Utc>,

    pub status: SessionStatus,
    pub activity: SessionActivity,
    pub branch: String,
    pub issue_id: Option<String>,
    pub pr: Option<PRInfo>,
    pub last_activity_at: DateTime<Utc>,
    #[serde(skip)]
    pub agent_info: Option<AgentSessionInfo>,
    pub metadata: HashMap<String, String>,
}

impl Session {
    fn to_record(&self) -> Record {
        let mut record = Record::new();
        if let Some(path) = &self.workspace_path {
            record.insert("worktree".to_string(), path.to_string_lossy().to_string());
        }
        record.insert("branch".to_string(), self.branch.clone());
        record.insert("status".to_string(), self.status.as_str().to_string());
        record.insert("activity".to_string(), serde_json::to_string(&self.activity).unwrap_or_default());
        if let Some(issue) = &self.issue_id {
            record.insert("issue".to_string(), issue.clone());
        }
        if let Some(pr) = &self.pr {
            record.insert("pr".to_string(), pr.url.clone());
        }
        record.insert("project".to_string(), self.project_id.clone());
        record.insert("createdAt".to_string(), self.created_at.to_rfc3339());
        record.insert("lastActivityAt".to_string(), self.last_activity_at.to_rfc3339());
        record.insert(
            "runtimeHandle".to_string(),
            serde_json::to_string(&self.runtime_handle).unwrap_or_default(),
        );
        for (k, v) in &self.metadata {
            record.entry(k.clone()).or_insert_with(|| v.clone());
        }
        record
    }

    fn from_record(id: &str, record: &Record) -> Result<Self> {
        let status = record
            .get("status")
            .map(|s| SessionStatus::parse(s))
            .transpose()?
            .unwrap_or(SessionStatus::Spawning);
        let activity = record
            .get("activity")
            .and_then(|s| serde_json::from_str(s).ok())
            .unwrap_or(SessionActivity::Idle);
        let branch = record.get("branch").cloned().unwrap_or_default();
        let project_id = record.get("project").cloned().unwrap_or_default();
        let worktree = record.get("worktree").map(PathBuf::from);
        let issue_id = record.get("issue").cloned();
        let created_at = record
            .get("createdAt")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now);
        let last_activity_at = record
            .get("lastActivityAt")
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(created_at);
        let runtime_handle = record
            .get("runtimeHandle")
            .and_then(|s| serde_json::from_str::<RuntimeHandle>(s).ok())
            .unwrap_or_else(|| RuntimeHandle {
                id: id.to_string(),
                runtime_name: String::new(),
                data: HashMap::new(),
            });

        let known_keys = [
            "worktree",
            "branch",
            "status",
            "activity",
            "issue",
            "pr",
            "project",
            "createdAt",
            "lastActivityAt",
            "runtimeHandle",
        ];
        let mut metadata = HashMap::new();
        for (k, v) in record {
            if !known_keys.contains(&k.as_str()) {
                metadata.insert(k.clone(), v.clone());
            }
        }

        Ok(Session {
            id: id.to_string(),
            project_id,
            runtime_handle,
            workspace_path: worktree,
            created_at,
            status,
            activity,
            branch,
            issue_id,
            pr: None,
            last_activity_at,
            agent_info: None,
            metadata,
        })
    }
}

impl Session {
    /// Records that an external observer (e.g. a `git`/`gh` wrapper) created
    /// a branch for this session. Out-of-scope wrapper mechanics aside, this
    /// method is the in-scope API surface such an observer calls
    /// (SPEC_FULL.md §6).
    pub fn note_branch_created(&mut self, name: impl Into<String>) {
        self.branch = name.into();
    }

    /// Records that an external observer opened a pull/merge request for
    /// this session (SPEC_FULL.md §6).
    pub fn note_pr_opened(&mut self, pr: PRInfo) {
        self.pr = Some(pr);
    }
}

/// Parameters for [`SessionManager::spawn`].
#[derive(Debug, Clone, Default)]
pub struct SpawnOptions {
    pub prompt: Option<String>,
    pub base_branch: Option<String>,
    pub validated_plan_task: bool,
}

/// Result of [`SessionManager::cleanup`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct CleanupReport {
    pub killed: Vec<String>,
    pub skipped: Vec<String>,
    pub errors: Vec<String>,
}

/// Owns the canonical mapping from session id to live [`Session`]
/// (spec.md §4.1).
pub struct SessionManager {
    project: Project,
    metadata: MetadataStore,
    registry: Arc<PluginRegistry>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl SessionManager {
    pub fn new(project: Project, registry: Arc<PluginRegistry>) -> Result<Self> {
        let metadata = MetadataStore::open(&project.sessions_dir)?;
        let mut sessions = HashMap::new();
        for id in metadata.list_ids()? {
            if let Some(record) = metadata.read(&id)? {
                let session = Session::from_record(&id, &record)?;
                sessions.insert(id, session);
            }
        }
        Ok(Self {
            project,
            metadata,
            registry,
            sessions: Mutex::new(sessions),
        })
    }

    pub fn project(&self) -> &Project {
        &self.project
    }

    /// One past the maximum numeral seen across live and archived metadata
    /// (spec.md §4.1).
    async fn next_numeral(&self) -> Result<u64> {
        let sessions = self.sessions.lock().await;
        let mut max = 0u64;
        for id in sessions.keys() {
            if let Some(n) = numeral_suffix(id, &self.project.session_prefix) {
                max = max.max(n);
            }
        }
        for id in self.metadata.list_ids()? {
            if let Some(n) = numeral_suffix(&id, &self.project.session_prefix) {
                max = max.max(n);
            }
        }
        if let Ok(entries) = std::fs::read_dir(self.project.sessions_dir.join("archive")) {
            for entry in entries.flatten() {
                if let Some(name) = entry.file_name().to_str() {
                    let archived_id = name.split('_').next().unwrap_or(name);
                    if let Some(n) = numeral_suffix(archived_id, &self.project.session_prefix) {
                        max = max.max(n);
                    }
                }
            }
        }
        Ok(max + 1)
    }

    async fn find_session_for_issue(&self, issue_id: &str) -> Option<Session> {
        let sessions = self.sessions.lock().await;
        sessions
            .values()
            .find(|s| s.issue_id.as_deref() == Some(issue_id) && !s.status.is_terminal())
            .cloned()
    }

    /// Spawns a new session (spec.md §4.1).
    pub async fn spawn(
        &self,
        issue_id: Option<String>,
        options: SpawnOptions,
    ) -> Result<Session> {
        if self.project.policies.require_validated_plan_task && !options.validated_plan_task {
            return Err(OrchestratorError::PolicyViolation(
                "spawn requires a validated plan task under this project's policy".to_string(),
            ));
        }

        if let Some(issue) = &issue_id {
            if let Some(existing) = self.find_session_for_issue(issue).await {
                return Ok(existing);
            }
        }

        let max = self.project.policies.max_concurrent_sessions;
        if max > 0 {
            let live = self
                .sessions
                .lock()
                .await
                .values()
                .filter(|s| !s.status.is_terminal())
                .count();
            if live >= max {
                return Err(OrchestratorError::PolicyViolation(format!(
                    "project '{}' is already at its concurrent session limit ({max})",
                    self.project.id
                )));
            }
        }

        let numeral = self.next_numeral().await?;
        let session_id = format!("{}-{}", self.project.session_prefix, numeral);
        let base_branch = options
            .base_branch
            .clone()
            .unwrap_or_else(|| self.project.default_branch.clone());

        let workspace = self.registry.workspace(&self.project.workspace_plugin)?;
        let ctx = workspace
            .prepare(&self.project.repo_path, &session_id, &base_branch)
            .await?;

        let runtime = self.registry.runtime(&self.project.runtime_plugin)?;
        let agent = self.registry.agent(&self.project.agent_plugin)?;

        let mut runtime_data = HashMap::new();
        let launch_config = AgentLaunchConfig {
            agent_type: self.project.agent_plugin.clone(),
            prompt: options.prompt.clone(),
            session_id: session_id.clone(),
            issue_id: issue_id.clone(),
            extra_args: Vec::new(),
        };
        runtime_data.insert("command".to_string(), agent.get_launch_command(&launch_config));

        let handle = RuntimeHandle {
            id: format!(
                "{}-{}-{}",
                self.project.instance_hash, self.project.session_prefix, numeral
            ),
            runtime_name: runtime.name().to_string(),
            data: runtime_data,
        };

        let mut env = agent.get_environment(&launch_config);
        env.insert("AO_SESSION_ID".to_string(), session_id.clone());
        env.insert("AO_PROJECT_ID".to_string(), self.project.id.clone());
        if let Some(issue) = &issue_id {
            env.insert("AO_ISSUE_ID".to_string(), issue.clone());
        }

        if let Err(e) = runtime.create(&handle, &env, &ctx.checkout_path).await {
            let _ = workspace.cleanup(&ctx).await;
            return Err(e);
        }

        if let Some(prompt) = options.prompt.as_ref().filter(|p| !p.is_empty()) {
            if let Err(e) = runtime.send_message(&handle, prompt).await {
                let _ = runtime.destroy(&handle).await;
                let _ = workspace.cleanup(&ctx).await;
                return Err(e);
            }
        }

        let now = Utc::now();
        let session = Session {
            id: session_id.clone(),
            project_id: self.project.id.clone(),
            runtime_handle: handle,
            workspace_path: Some(ctx.checkout_path.clone()),
            created_at: now,
            status: SessionStatus::Spawning,
            activity: SessionActivity::Active,
            branch: ctx.branch_name.clone(),
            issue_id,
            pr: None,
            last_activity_at: now,
            agent_info: None,
            metadata: HashMap::new(),
        };

        // One retry before rollback (spec.md §4.1, §7).
        if let Err(e) = self.metadata.write(&session_id, &session.to_record()) {
            if let Err(e) = self.metadata.write(&session_id, &session.to_record()) {
                let _ = runtime.destroy(&session.runtime_handle).await;
                let _ = workspace.cleanup(&ctx).await;
                return Err(e);
            }
            tracing::warn!(session_id = %session_id, error = %e, "metadata write failed, retried successfully");
        }

        self.sessions
            .lock()
            .await
            .insert(session_id.clone(), session.clone());

        Ok(session)
    }

    /// Kills a session: best-effort runtime termination, worktree removal,
    /// metadata archived. Idempotent (spec.md §4.1).
    pub async fn kill(&self, id: &str) -> Result<()> {
        let session = {
            let sessions = self.sessions.lock().await;
            sessions.get(id).cloned()
        };

        let Some(session) = session else {
            if self.metadata.read_archived_raw(id)?.is_some() {
                return Ok(());
            }
            return Err(OrchestratorError::NotFound(id.to_string()));
        };

        if let Ok(runtime) = self.registry.runtime(&session.runtime_handle.runtime_name) {
            let _ = runtime.destroy(&session.runtime_handle).await;
        }
        if let Some(path) = &session.workspace_path {
            if let Ok(workspace) = self.registry.workspace(&self.project.workspace_plugin) {
                let ctx = crate::plugin::WorkspaceContext {
                    session_id: id.to_string(),
                    repo_path: self.project.repo_path.clone(),
                    checkout_path: path.clone(),
                    branch_name: session.branch.clone(),
                };
                let _ = workspace.cleanup(&ctx).await;
            }
        }

        let mut record = session.to_record();
        record.insert("status".to_string(), SessionStatus::Terminated.as_str().to_string());
        self.metadata.write(id, &record)?;
        self.metadata.delete(id, true)?;
        self.sessions.lock().await.remove(id);
        Ok(())
    }

    /// Lists all live sessions.
    pub async fn list(&self) -> Vec<Session> {
        self.sessions.lock().await.values().cloned().collect()
    }

    pub async fn get(&self, id: &str) -> Option<Session> {
        self.sessions.lock().await.get(id).cloned()
    }

    /// Sends input to a session's hosted process.
    pub async fn send(&self, id: &str, message: &str) -> Result<()> {
        let session = self
            .get(id)
            .await
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if session.status.is_terminal() {
            return Err(OrchestratorError::ConflictingState(format!(
                "session {id} is not ready to receive input (status={})",
                session.status
            )));
        }
        let runtime = self.registry.runtime(&session.runtime_handle.runtime_name)?;
        runtime.send_message(&session.runtime_handle, message).await
    }

    /// Resurrects a previously killed session on the same branch
    /// (spec.md §4.1).
    pub async fn restore(&self, id: &str) -> Result<Session> {
        let archived = self
            .metadata
            .read_archived_raw(id)?
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        let mut restored = Session::from_record(id, &archived)?;
        if !restored.status.is_terminal() {
            return Err(OrchestratorError::ConflictingState(format!(
                "session {id} is not in a terminal status"
            )));
        }

        let workspace = self.registry.workspace(&self.project.workspace_plugin)?;
        let ctx = workspace
            .prepare(&self.project.repo_path, id, &restored.branch)
            .await?;

        let runtime = self.registry.runtime(&self.project.runtime_plugin)?;
        let agent = self.registry.agent(&self.project.agent_plugin)?;
        let launch_config = AgentLaunchConfig {
            agent_type: self.project.agent_plugin.clone(),
            prompt: None,
            session_id: id.to_string(),
            issue_id: restored.issue_id.clone(),
            extra_args: Vec::new(),
        };
        let mut runtime_data = HashMap::new();
        runtime_data.insert("command".to_string(), agent.get_launch_command(&launch_config));
        let handle = RuntimeHandle {
            id: restored.runtime_handle.id.clone(),
            runtime_name: runtime.name().to_string(),
            data: runtime_data,
        };
        let env = agent.get_environment(&launch_config);
        runtime.create(&handle, &env, &ctx.checkout_path).await?;

        restored.runtime_handle = handle;
        restored.workspace_path = Some(ctx.checkout_path);
        restored.status = SessionStatus::Spawning;
        restored.last_activity_at = Utc::now();

        self.metadata.write(id, &restored.to_record())?;
        self.sessions.lock().await.insert(id.to_string(), restored.clone());
        Ok(restored)
    }

    /// Kills sessions whose PR is merged or whose runtime+process are both
    /// dead (spec.md §4.1).
    pub async fn cleanup(&self, dry_run: bool, scm_name: Option<&str>) -> CleanupReport {
        let mut report = CleanupReport::default();
        let sessions = self.list().await;

        for session in sessions {
            let should_kill = self.should_cleanup(&session, scm_name).await;
            match should_kill {
                Ok(true) => {
                    if dry_run {
                        report.killed.push(session.id.clone());
                    } else {
                        match self.kill(&session.id).await {
                            Ok(()) => report.killed.push(session.id.clone()),
                            Err(e) => report.errors.push(format!("{}: {e}", session.id)),
                        }
                    }
                }
                Ok(false) => report.skipped.push(session.id.clone()),
                Err(e) => report.errors.push(format!("{}: {e}", session.id)),
            }
        }
        report
    }

    async fn should_cleanup(&self, session: &Session, scm_name: Option<&str>) -> Result<bool> {
        if let Some(pr) = &session.pr {
            if let Some(scm_name) = scm_name {
                if let Ok(scm) = self.registry.scm(scm_name) {
                    // A failing PR lookup must not block cleanup of other
                    // sessions; treat it as "not mergeable yet" rather than
                    // propagating.
                    if let Ok(state) = scm.get_pr_state(pr).await {
                        if matches!(state, crate::plugin::scm::PRState::Merged) {
                            return Ok(true);
                        }
                    }
                }
            }
        }

        if let Ok(runtime) = self.registry.runtime(&session.runtime_handle.runtime_name) {
            let runtime_dead = !runtime.is_alive(&session.runtime_handle).await.unwrap_or(true);
            if runtime_dead {
                if let Ok(agent) = self.registry.agent(&self.project.agent_plugin) {
                    if !agent.is_process_running(&session.runtime_handle) {
                        return Ok(true);
                    }
                }
            }
        }

        Ok(false)
    }

    /// Persists a branch creation observed by an external `git`/`gh`
    /// wrapper (SPEC_FULL.md §6).
    pub async fn note_branch_created(&self, id: &str, branch: &str) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        session.note_branch_created(branch);
        self.metadata.write(id, &session.to_record())?;
        Ok(())
    }

    /// Persists a PR creation observed by an external `git`/`gh` wrapper
    /// (SPEC_FULL.md §6).
    pub async fn note_pr_opened(&self, id: &str, pr: PRInfo) -> Result<()> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        session.note_pr_opened(pr);
        self.metadata.write(id, &session.to_record())?;
        Ok(())
    }

    /// Applies a Lifecycle Controller evaluation result to the canonical
    /// session record: updates status/activity/PR, bumps `lastActivityAt`,
    /// and persists. Returns whether the status actually changed, which the
    /// controller uses to decide whether to emit an event or fire a
    /// reaction (spec.md §4.2 step 4). The Session Manager still does not
    /// decide *what* the new status should be — it only durably applies it.
    pub async fn apply_evaluation(
        &self,
        id: &str,
        status: SessionStatus,
        activity: SessionActivity,
        pr: Option<PRInfo>,
    ) -> Result<bool> {
        let mut sessions = self.sessions.lock().await;
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        let changed = session.status != status;
        session.status = status;
        session.activity = activity;
        if pr.is_some() {
            session.pr = pr;
        }
        session.last_activity_at = Utc::now();
        self.metadata.write(id, &session.to_record())?;
        Ok(changed)
    }

    /// The plugin registry this manager resolves bindings from, for callers
    /// (the Lifecycle Controller) that need to invoke a session's plugins
    /// directly.
    pub fn registry(&self) -> &Arc<PluginRegistry> {
        &self.registry
    }
}

fn numeral_suffix(id: &str, prefix: &str) -> Option<u64> {
    let stripped = id.strip_prefix(prefix)?.strip_prefix('-')?;
    stripped.parse().ok()
}
