//! SCM plugin contract: pull-request lifecycle, CI, review, and mergeability
//! queries (spec.md §3 `PRInfo`, §4.5 `Scm`).

use crate::session::Session;
use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A pull/merge request reference cached inside a [`Session`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PRInfo {
    pub number: u64,
    pub url: String,
    pub title: String,
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub base_branch: String,
    pub is_draft: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PRState {
    Open,
    Closed,
    Merged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CISummary {
    Passing,
    Failing,
    Pending,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewDecision {
    Approved,
    ChangesRequested,
    Pending,
    None,
}

#[derive(Debug, Clone)]
pub struct Comment {
    pub id: String,
    pub author: String,
    pub body: String,
}

/// An automated-reviewer comment (e.g. a bot code-review tool). `id` is
/// stable across polls — this is what the Lifecycle Controller's
/// fingerprint hashes (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct AutomatedComment {
    pub id: String,
    pub tool: String,
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct Mergeability {
    pub mergeable: bool,
    pub ci_passing: bool,
    pub approved: bool,
    pub no_conflicts: bool,
    pub blockers: Vec<String>,
}

impl Mergeability {
    /// `{mergeable: true, ciPassing: true, approved: true, noConflicts: true}`
    /// is the condition the Lifecycle Controller treats as `mergeable`
    /// (spec.md §4.2).
    pub fn is_fully_mergeable(&self) -> bool {
        self.mergeable && self.ci_passing && self.approved && self.no_conflicts
    }
}

#[async_trait]
pub trait Scm: Send + Sync {
    fn name(&self) -> &'static str;

    async fn detect_pr(&self, session: &Session, project_id: &str) -> Result<Option<PRInfo>>;
    async fn get_pr_state(&self, pr: &PRInfo) -> Result<PRState>;
    async fn get_ci_summary(&self, pr: &PRInfo) -> Result<CISummary>;
    async fn get_review_decision(&self, pr: &PRInfo) -> Result<ReviewDecision>;
    async fn get_pending_comments(&self, pr: &PRInfo) -> Result<Vec<Comment>>;
    async fn get_automated_comments(&self, pr: &PRInfo) -> Result<Vec<AutomatedComment>>;
    async fn get_mergeability(&self, pr: &PRInfo) -> Result<Mergeability>;
    async fn merge_pr(&self, pr: &PRInfo) -> Result<()>;
    async fn close_pr(&self, pr: &PRInfo) -> Result<()>;
}
