//! `git2`-backed workspace isolation strategies (spec.md §4.1, §9).
//!
//! Grounded on the teacher's `worktree`/`isolation` modules: `git worktree
//! add` for full isolation, and a branch-only mode that shares the main
//! checkout when a caller doesn't want a second working directory on disk.

use crate::plugin::{Workspace, WorkspaceContext};
use crate::{OrchestratorError, Result};
use async_trait::async_trait;
use git2::{BranchType, Repository, WorktreeAddOptions, WorktreePruneOptions};
use std::path::{Path, PathBuf};

fn branch_name_for(session_id: &str) -> String {
    format!("ao/{session_id}")
}

/// Full isolation: a dedicated git worktree on its own branch, under
/// `<project-base>/worktrees/<session-id>`.
pub struct WorktreeWorkspace {
    worktrees_root: PathBuf,
}

impl WorktreeWorkspace {
    pub fn new(worktrees_root: impl Into<PathBuf>) -> Self {
        Self {
            worktrees_root: worktrees_root.into(),
        }
    }
}

#[async_trait]
impl Workspace for WorktreeWorkspace {
    fn name(&self) -> &'static str {
        "git-worktree"
    }

    async fn prepare(
        &self,
        repo_path: &Path,
        session_id: &str,
        base_branch: &str,
    ) -> Result<WorkspaceContext> {
        std::fs::create_dir_all(&self.worktrees_root)?;

        let repo_path = repo_path.to_path_buf();
        let worktrees_root = self.worktrees_root.clone();
        let session_id = session_id.to_string();
        let base_branch = base_branch.to_string();

        tokio::task::spawn_blocking(move || -> Result<WorkspaceContext> {
            let repo = Repository::open(&repo_path)?;
            let checkout_path = worktrees_root.join(&session_id);
            let branch_name = branch_name_for(&session_id);

            let base_ref = repo.find_branch(&base_branch, BranchType::Local)?;
            let base_commit = base_ref.get().peel_to_commit()?;

            let new_branch = repo.branch(&branch_name, &base_commit, false)?;
            let branch_ref = new_branch.into_reference();

            repo.worktree(
                &session_id,
                &checkout_path,
                Some(WorktreeAddOptions::new().reference(Some(&branch_ref))),
            )?;

            Ok(WorkspaceContext {
                session_id,
                repo_path,
                checkout_path,
                branch_name,
            })
        })
        .await
        .map_err(|e| OrchestratorError::transient(e.to_string()))?
    }

    async fn cleanup(&self, ctx: &WorkspaceContext) -> Result<()> {
        let repo_path = ctx.repo_path.clone();
        let session_id = ctx.session_id.clone();
        let checkout_path = ctx.checkout_path.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let repo = Repository::open(&repo_path)?;
            if let Ok(worktree) = repo.find_worktree(&session_id) {
                worktree.prune(Some(
                    WorktreePruneOptions::new().working_tree(true).valid(true),
                ))?;
            }
            if checkout_path.exists() {
                std::fs::remove_dir_all(&checkout_path)?;
            }
            Ok(())
        })
        .await
        .map_err(|e| OrchestratorError::transient(e.to_string()))?
    }
}

/// Branch-only isolation: create a branch and hand back the shared
/// checkout path. Cheaper than a worktree, but two sessions using it
/// concurrently would collide on the working directory — callers that
/// choose this mode are responsible for not running two such sessions
/// against the same repo at once.
pub struct BranchWorkspace;

#[async_trait]
impl Workspace for BranchWorkspace {
    fn name(&self) -> &'static str {
        "git-branch"
    }

    async fn prepare(
        &self,
        repo_path: &Path,
        session_id: &str,
        base_branch: &str,
    ) -> Result<WorkspaceContext> {
        let repo_path = repo_path.to_path_buf();
        let session_id = session_id.to_string();
        let base_branch = base_branch.to_string();

        tokio::task::spawn_blocking(move || -> Result<WorkspaceContext> {
            let repo = Repository::open(&repo_path)?;
            let branch_name = branch_name_for(&session_id);

            let base = repo.find_branch(&base_branch, BranchType::Local)?;
            let base_commit = base.get().peel_to_commit()?;

            if repo.find_branch(&branch_name, BranchType::Local).is_err() {
                repo.branch(&branch_name, &base_commit, false)?;
            }

            Ok(WorkspaceContext {
                session_id,
                checkout_path: repo_path.clone(),
                repo_path,
                branch_name,
            })
        })
        .await
        .map_err(|e| OrchestratorError::transient(e.to_string()))?
    }

    async fn cleanup(&self, ctx: &WorkspaceContext) -> Result<()> {
        let repo_path = ctx.repo_path.clone();
        let branch_name = ctx.branch_name.clone();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let repo = Repository::open(&repo_path)?;
            if let Ok(mut branch) = repo.find_branch(&branch_name, BranchType::Local) {
                let _ = branch.delete();
            }
            Ok(())
        })
        .await
        .map_err(|e| OrchestratorError::transient(e.to_string()))?
    }
}
