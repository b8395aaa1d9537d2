//! Reaction configuration and firing (spec.md §4.2 reactions, §8 scenarios
//! 3–5).
//!
//! Kept separate from [`crate::lifecycle`] so the dedup/retrigger/fingerprint
//! bookkeeping — the fiddliest part of the Lifecycle Controller — can be
//! unit tested against literal timestamps without any plugin or session
//! machinery in the loop.

use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::time::Duration;

/// What a fired reaction does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionAction {
    SendToAgent,
    NotifyHuman,
    Terminate,
}

impl ReactionAction {
    pub fn as_str(self) -> &'static str {
        match self {
            ReactionAction::SendToAgent => "send-to-agent",
            ReactionAction::NotifyHuman => "notify-human",
            ReactionAction::Terminate => "terminate",
        }
    }
}

/// One entry of the reaction configuration table, keyed by reaction key
/// (e.g. `ci-failed`, `review-changes-requested`, `bugbot-comments`,
/// `stuck`, `needs-input`) (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct ReactionConfig {
    pub auto: bool,
    pub action: ReactionAction,
    pub message: Option<String>,
    /// Maximum number of times this reaction may fire in one contiguous run
    /// of the same status (or, for comment reactions, without an
    /// intervening status transition).
    pub retries: u32,
    pub escalate_after: Option<Duration>,
    pub retrigger_after: Option<Duration>,
}

/// Instructs the caller to run one fired reaction.
#[derive(Debug, Clone)]
pub struct FireDecision {
    pub reaction_key: String,
    pub action: ReactionAction,
    pub message: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct FiredState {
    last_fired_at_ms: i64,
    retries_used: u32,
    last_fingerprint: Option<String>,
}

/// Tracks per-(session, reaction key) firing state and decides, on each
/// evaluation, whether a configured reaction should fire (spec.md §4.2).
pub struct ReactionEngine {
    configs: HashMap<String, ReactionConfig>,
    fired: HashMap<(String, String), FiredState>,
}

impl ReactionEngine {
    pub fn new(configs: HashMap<String, ReactionConfig>) -> Self {
        Self {
            configs,
            fired: HashMap::new(),
        }
    }

    pub fn config(&self, reaction_key: &str) -> Option<&ReactionConfig> {
        self.configs.get(reaction_key)
    }

    /// Clears fingerprint bookkeeping for every reaction key of `session_id`.
    /// Called whenever the Lifecycle Controller emits a status transition,
    /// so a fresh push naturally re-arms comment-based reactions.
    pub fn clear_fingerprints_for_session(&mut self, session_id: &str) {
        for (key, state) in self.fired.iter_mut() {
            if key.0 == session_id {
                state.last_fingerprint = None;
            }
        }
    }

    /// Status changed this evaluation and maps to `reaction_key`. Fires
    /// once if the reaction is `auto`, counting as retry #1.
    pub fn on_transition(
        &mut self,
        session_id: &str,
        reaction_key: &str,
        now_ms: i64,
    ) -> Option<FireDecision> {
        let config = self.configs.get(reaction_key)?.clone();
        if !config.auto {
            return None;
        }
        let state = self
            .fired
            .entry((session_id.to_string(), reaction_key.to_string()))
            .or_default();
        state.last_fired_at_ms = now_ms;
        state.retries_used = 1;
        state.last_fingerprint = None;

        Some(FireDecision {
            reaction_key: reaction_key.to_string(),
            action: config.action,
            message: config.message.clone(),
        })
    }

    /// Status is unchanged this evaluation. Fires again only if
    /// `retriggerAfter` is configured, has elapsed since the last fire, and
    /// retries remain (spec.md §4.2, §8 scenario 4).
    pub fn on_unchanged_status(
        &mut self,
        session_id: &str,
        reaction_key: &str,
        now_ms: i64,
    ) -> Option<FireDecision> {
        let config = self.configs.get(reaction_key)?.clone();
        let retrigger_after = config.retrigger_after?;

        let state = self
            .fired
            .get_mut(&(session_id.to_string(), reaction_key.to_string()))?;
        if state.retries_used >= config.retries {
            return None;
        }
        let elapsed = now_ms.saturating_sub(state.last_fired_at_ms);
        if (elapsed as u128) < retrigger_after.as_millis() {
            return None;
        }

        state.last_fired_at_ms = now_ms;
        state.retries_used += 1;
        Some(FireDecision {
            reaction_key: reaction_key.to_string(),
            action: config.action,
            message: config.message.clone(),
        })
    }

    /// Status is unchanged; the session has pending automated-reviewer
    /// comments. Fires when the comment-id fingerprint changes, or when
    /// `retriggerAfter` has elapsed and the fingerprint still differs from
    /// the last one that fired (spec.md §4.2, §8 scenario 5).
    pub fn on_unchanged_comments(
        &mut self,
        session_id: &str,
        reaction_key: &str,
        now_ms: i64,
        comment_ids: &[String],
    ) -> Option<FireDecision> {
        let config = self.configs.get(reaction_key)?.clone();
        if !config.auto {
            return None;
        }
        let fingerprint = fingerprint_ids(comment_ids);

        let key = (session_id.to_string(), reaction_key.to_string());
        let state = self.fired.entry(key).or_default();

        if state.retries_used > 0 && state.retries_used >= config.retries {
            return None;
        }

        let fingerprint_changed = state.last_fingerprint.as_deref() != Some(fingerprint.as_str());
        if !fingerprint_changed {
            return None;
        }

        state.last_fingerprint = Some(fingerprint);
        state.last_fired_at_ms = now_ms;
        state.retries_used += 1;

        Some(FireDecision {
            reaction_key: reaction_key.to_string(),
            action: config.action,
            message: config.message.clone(),
        })
    }
}

fn fingerprint_ids(ids: &[String]) -> String {
    let mut sorted: Vec<&str> = ids.iter().map(String::as_str).collect();
    sorted.sort_unstable();
    let mut hasher = Sha256::new();
    for id in sorted {
        hasher.update(id.as_bytes());
        hasher.update(b"\0");
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ci_failed_config(retries: u32, retrigger_after: Option<Duration>) -> ReactionConfig {
        ReactionConfig {
            auto: true,
            action: ReactionAction::SendToAgent,
            message: Some("CI failed, please investigate".to_string()),
            retries,
            escalate_after: None,
            retrigger_after,
        }
    }

    #[test]
    fn fires_once_then_suppresses_without_retrigger() {
        let mut configs = HashMap::new();
        configs.insert("ci-failed".to_string(), ci_failed_config(3, None));
        let mut engine = ReactionEngine::new(configs);

        let fired = engine.on_transition("ses-1", "ci-failed", 0);
        assert!(fired.is_some());

        let second = engine.on_unchanged_status("ses-1", "ci-failed", 1_000);
        assert!(second.is_none());
    }

    #[test]
    fn retrigger_after_elapses_and_respects_retry_budget() {
        let mut configs = HashMap::new();
        configs.insert(
            "ci-failed".to_string(),
            ci_failed_config(3, Some(Duration::from_secs(30))),
        );
        let mut engine = ReactionEngine::new(configs);

        assert!(engine.on_transition("ses-1", "ci-failed", 0).is_some());
        assert!(engine
            .on_unchanged_status("ses-1", "ci-failed", 31_000)
            .is_some());
        assert!(engine
            .on_unchanged_status("ses-1", "ci-failed", 45_000)
            .is_none());
        assert!(engine
            .on_unchanged_status("ses-1", "ci-failed", 62_000)
            .is_some());
        assert!(engine
            .on_unchanged_status("ses-1", "ci-failed", 90_000)
            .is_none());
    }

    #[test]
    fn bugbot_fingerprint_fires_on_new_comments_only() {
        let mut configs = HashMap::new();
        configs.insert(
            "bugbot-comments".to_string(),
            ReactionConfig {
                auto: true,
                action: ReactionAction::NotifyHuman,
                message: None,
                retries: 10,
                escalate_after: None,
                retrigger_after: None,
            },
        );
        let mut engine = ReactionEngine::new(configs);

        // Evaluation 1 is the status transition itself; comments aren't
        // checked against a fingerprint here.
        engine.clear_fingerprints_for_session("ses-1");

        // Evaluation 2: comments == [c1], unchanged status.
        let c1 = vec!["c1".to_string()];
        let fire1 = engine.on_unchanged_comments("ses-1", "bugbot-comments", 1_000, &c1);
        assert!(fire1.is_some());

        // Evaluation 3: still [c1] — no new comments, no retrigger.
        let fire2 = engine.on_unchanged_comments("ses-1", "bugbot-comments", 2_000, &c1);
        assert!(fire2.is_none());

        // Evaluation 4: [c1, c2] — new comment arrives.
        let c1_c2 = vec!["c1".to_string(), "c2".to_string()];
        let fire3 = engine.on_unchanged_comments("ses-1", "bugbot-comments", 3_000, &c1_c2);
        assert!(fire3.is_some());
    }

    #[test]
    fn transition_clears_fingerprint_so_same_comments_can_refire() {
        let mut configs = HashMap::new();
        configs.insert(
            "bugbot-comments".to_string(),
            ReactionConfig {
                auto: true,
                action: ReactionAction::NotifyHuman,
                message: None,
                retries: 10,
                escalate_after: None,
                retrigger_after: None,
            },
        );
        let mut engine = ReactionEngine::new(configs);

        let c1 = vec!["c1".to_string()];
        assert!(engine
            .on_unchanged_comments("ses-1", "bugbot-comments", 0, &c1)
            .is_some());
        assert!(engine
            .on_unchanged_comments("ses-1", "bugbot-comments", 100, &c1)
            .is_none());

        // A status transition (e.g. a push fixed the build) re-arms the
        // fingerprint even though the comment set hasn't changed.
        engine.clear_fingerprints_for_session("ses-1");
        assert!(engine
            .on_unchanged_comments("ses-1", "bugbot-comments", 200, &c1)
            .is_some());
    }

    #[test]
    fn non_auto_reaction_never_fires_on_transition() {
        let mut configs = HashMap::new();
        configs.insert(
            "stuck".to_string(),
            ReactionConfig {
                auto: false,
                action: ReactionAction::NotifyHuman,
                message: None,
                retries: 1,
                escalate_after: None,
                retrigger_after: None,
            },
        );
        let mut engine = ReactionEngine::new(configs);
        assert!(engine.on_transition("ses-1", "stuck", 0).is_none());
    }
}
