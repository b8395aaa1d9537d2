//! Per-project path + hashing scheme, and session/prefix naming (spec.md §3, §6).
//!
//! A project's on-disk data directory is `<home>/.agent-orchestrator/<hash>-<basename>`,
//! where `<hash>` is the first 12 hex characters of a SHA-256 digest over the
//! realpath of the project's configuration file. The hash lets multiple
//! configurations coexist without colliding on `basename` alone, and lets a
//! single orchestrator instance detect when two different configuration
//! files happen to hash to the same prefix (§8 scenario 8).

use crate::{OrchestratorError, Result};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

/// Name of the orchestrator's home directory, under the user's home.
pub const HOME_DIR_NAME: &str = ".agent-orchestrator";

/// Sentinel file inside a project base directory recording the resolved
/// configuration path that produced it.
pub const ORIGIN_SENTINEL: &str = ".origin";

/// Computes the 12-hex-character instance hash for a resolved configuration
/// path.
///
/// Determinism: the same resolved path always yields the same hash. Two
/// distinct resolved paths collide with probability roughly `2^-48` (spec.md
/// §8), since the hash is truncated to 48 bits of a cryptographic digest.
pub fn generate_instance_hash(resolved_config_path: &Path) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resolved_config_path.to_string_lossy().as_bytes());
    let digest = hasher.finalize();
    hex::encode(&digest[..6])
}

/// Computes `<hash>-<basename>` — the instance id for a project.
pub fn generate_instance_id(resolved_config_path: &Path, project_path: &Path) -> String {
    let hash = generate_instance_hash(resolved_config_path);
    let basename = project_path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    format!("{hash}-{basename}")
}

/// Resolves `<home>/.agent-orchestrator/<hash>-<basename>` for a project,
/// verifying (or writing) the `.origin` sentinel.
///
/// If the directory already exists with a mismatched `.origin` sentinel, a
/// hash collision between two distinct configuration files has occurred and
/// this returns a `ConfigError` naming both paths (spec.md §8 scenario 8).
pub fn resolve_project_base(
    home: &Path,
    resolved_config_path: &Path,
    project_path: &Path,
) -> Result<PathBuf> {
    let instance_id = generate_instance_id(resolved_config_path, project_path);
    let base = home.join(HOME_DIR_NAME).join(&instance_id);
    let origin = base.join(ORIGIN_SENTINEL);

    let resolved_str = resolved_config_path.to_string_lossy().to_string();

    if origin.exists() {
        let existing = std::fs::read_to_string(&origin)?;
        let existing = existing.trim();
        if existing != resolved_str {
            return Err(OrchestratorError::ConfigError(format!(
                "hash collision: project directory {} is claimed by configuration '{}', \
                 but '{}' resolves to the same instance id",
                base.display(),
                existing,
                resolved_str
            )));
        }
    } else {
        std::fs::create_dir_all(&base)?;
        std::fs::write(&origin, resolved_str)?;
    }

    Ok(base)
}

/// Sessions directory under a project base.
pub fn sessions_dir(project_base: &Path) -> PathBuf {
    project_base.join("sessions")
}

/// Worktrees directory under a project base.
pub fn worktrees_dir(project_base: &Path) -> PathBuf {
    project_base.join("worktrees")
}

/// Derives a session-name prefix from a project id when none is configured
/// explicitly (spec.md §6).
pub fn derive_prefix(project_id: &str) -> String {
    if project_id.len() <= 4 {
        return project_id.to_lowercase();
    }

    let upper_count = project_id.chars().filter(|c| c.is_ascii_uppercase()).count();
    if upper_count >= 2 && is_camel_case(project_id) {
        return project_id
            .chars()
            .filter(|c| c.is_ascii_uppercase())
            .flat_map(|c| c.to_lowercase())
            .collect();
    }

    if project_id.contains('-') || project_id.contains('_') {
        return project_id
            .split(|c| c == '-' || c == '_')
            .filter(|seg| !seg.is_empty())
            .filter_map(|seg| seg.chars().next())
            .flat_map(|c| c.to_lowercase())
            .collect();
    }

    project_id.to_lowercase().chars().take(3).collect()
}

fn is_camel_case(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.is_ascii_uppercase() || first.is_ascii_lowercase(),
        None => false,
    }
}

/// User-facing session name: `<prefix>-<n>`.
pub fn user_facing_session_name(prefix: &str, numeral: u64) -> String {
    format!("{prefix}-{numeral}")
}

/// Runtime-facing session name: `<instance-hash>-<prefix>-<n>` — globally
/// unique across orchestrator instances on one machine (spec.md §6).
pub fn runtime_facing_session_name(instance_hash: &str, prefix: &str, numeral: u64) -> String {
    format!("{instance_hash}-{prefix}-{numeral}")
}
