//! Task Scheduler: a pure function over a task graph (spec.md §3 `TaskGraph`,
//! §4.3, §8 scheduler properties and scenario tests 6–7).
//!
//! Unlike every other module in this crate, the scheduler never touches a
//! plugin, the filesystem, or the metadata store — it is deliberately kept
//! free of I/O so its properties (determinism, fairness, aging) can be
//! tested without any of the rest of the system running.

use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Injectable clock so scheduler (and lifecycle reaction-retrigger) tests
/// never depend on wall-clock time (SPEC_FULL.md §4.3).
pub trait Clock: Send + Sync {
    fn now_ms(&self) -> i64;
}

/// Wall-clock implementation used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> i64 {
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0)
    }
}

/// A fixed, manually-advanced clock for deterministic tests.
#[derive(Debug, Clone)]
pub struct FixedClock(std::sync::atomic::AtomicI64);

impl FixedClock {
    pub fn new(now_ms: i64) -> Self {
        Self(std::sync::atomic::AtomicI64::new(now_ms))
    }

    pub fn advance(&self, delta_ms: i64) {
        self.0.fetch_add(delta_ms, std::sync::atomic::Ordering::SeqCst);
    }

    pub fn set(&self, now_ms: i64) {
        self.0.store(now_ms, std::sync::atomic::Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_ms(&self) -> i64 {
        self.0.load(std::sync::atomic::Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Ready,
    Pending,
    Running,
    Complete,
    Blocked,
    Paused,
    Failed,
}

/// One node in a [`TaskGraph`] (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskNode {
    pub id: String,
    pub state: TaskState,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub run_count: u64,
    /// Milliseconds since epoch at which this node became `ready`, or
    /// `None` if it has never been ready (no aging boost applies).
    #[serde(default)]
    pub ready_since: Option<i64>,
}

/// A directed graph of tasks keyed by id (spec.md §3).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskGraph {
    pub nodes: HashMap<String, TaskNode>,
}

impl TaskGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, node: TaskNode) {
        self.nodes.insert(node.id.clone(), node);
    }

    pub fn check_dependencies_resolved(&self) -> Result<()> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(OrchestratorError::DependencyUnresolved {
                        task_id: node.id.clone(),
                        missing_id: dep.clone(),
                    });
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityPolicy {
    Strict,
    Aging,
}

/// Scheduler tuning knobs (spec.md §4.3).
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub concurrency_cap: usize,
    pub priority_policy: PriorityPolicy,
    pub aging_window_ms: i64,
    pub max_aging_boost: i64,
}

impl SchedulerConfig {
    fn validate(&self) -> Result<()> {
        if self.concurrency_cap < 1 {
            return Err(OrchestratorError::ConfigError(
                "concurrencyCap must be >= 1".to_string(),
            ));
        }
        if self.priority_policy == PriorityPolicy::Aging {
            if self.aging_window_ms <= 0 {
                return Err(OrchestratorError::ConfigError(
                    "agingWindowMs must be > 0".to_string(),
                ));
            }
            if self.max_aging_boost < 0 {
                return Err(OrchestratorError::ConfigError(
                    "maxAgingBoost must be >= 0".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReadyQueueResult {
    pub ready_queue: Vec<String>,
    pub running_count: usize,
    pub available_slots: usize,
}

fn effective_priority(node: &TaskNode, config: &SchedulerConfig, now_ms: i64) -> i64 {
    if config.priority_policy == PriorityPolicy::Strict {
        return node.priority;
    }
    let Some(ready_since) = node.ready_since else {
        return node.priority;
    };
    let elapsed = (now_ms - ready_since).max(0);
    let boost = (elapsed / config.aging_window_ms).min(config.max_aging_boost);
    node.priority + boost
}

/// Computes the ready queue for one scheduling tick (spec.md §4.3).
pub fn get_ready_queue(
    graph: &TaskGraph,
    config: &SchedulerConfig,
    clock: &dyn Clock,
) -> Result<ReadyQueueResult> {
    config.validate()?;
    graph.check_dependencies_resolved()?;

    let now_ms = clock.now_ms();
    let running_count = graph
        .nodes
        .values()
        .filter(|n| n.state == TaskState::Running)
        .count();
    let available_slots = config.concurrency_cap.saturating_sub(running_count);

    let mut candidates: Vec<&TaskNode> = graph
        .nodes
        .values()
        .filter(|n| {
            n.state == TaskState::Ready
                || (n.state == TaskState::Pending
                    && n.dependencies
                        .iter()
                        .all(|d| graph.nodes.get(d).map(|dn| dn.state == TaskState::Complete).unwrap_or(false)))
        })
        .collect();

    candidates.sort_by(|a, b| {
        let pa = effective_priority(a, config, now_ms);
        let pb = effective_priority(b, config, now_ms);
        pb.cmp(&pa)
            .then_with(|| a.run_count.cmp(&b.run_count))
            .then_with(|| {
                let ra = a.ready_since.unwrap_or(i64::MAX);
                let rb = b.ready_since.unwrap_or(i64::MAX);
                ra.cmp(&rb)
            })
            .then_with(|| a.id.cmp(&b.id))
    });

    let ready_queue = candidates
        .into_iter()
        .take(available_slots)
        .map(|n| n.id.clone())
        .collect();

    Ok(ReadyQueueResult {
        ready_queue,
        running_count,
        available_slots,
    })
}

/// Pauses a `blocked`/`ready`/`pending` node, returning a new graph. Pure:
/// does not mutate `graph` (spec.md §4.3).
pub fn pause_task(graph: &TaskGraph, id: &str) -> Result<TaskGraph> {
    let mut next = graph.clone();
    let node = next
        .nodes
        .get_mut(id)
        .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
    if !matches!(node.state, TaskState::Blocked | TaskState::Ready | TaskState::Pending) {
        return Err(OrchestratorError::ConflictingState(format!(
            "task {id} cannot be paused from state {:?}",
            node.state
        )));
    }
    node.state = TaskState::Paused;
    Ok(next)
}

/// Resumes a `paused` node: `ready` if all dependencies are `complete`,
/// else `blocked`. Pure (spec.md §4.3).
pub fn resume_task(graph: &TaskGraph, id: &str) -> Result<TaskGraph> {
    let mut next = graph.clone();
    let deps_complete = {
        let node = next
            .nodes
            .get(id)
            .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
        if node.state != TaskState::Paused {
            return Err(OrchestratorError::ConflictingState(format!(
                "task {id} is not paused"
            )));
        }
        node.dependencies
            .iter()
            .all(|d| next.nodes.get(d).map(|dn| dn.state == TaskState::Complete).unwrap_or(false))
    };
    let node = next.nodes.get_mut(id).unwrap();
    node.state = if deps_complete { TaskState::Ready } else { TaskState::Blocked };
    Ok(next)
}

/// Fails a `running` node, returning a new graph. Pure: does not mutate
/// `graph` (spec.md §3 `state ∈ {..., failed}`).
pub fn fail_task(graph: &TaskGraph, id: &str) -> Result<TaskGraph> {
    let mut next = graph.clone();
    let node = next
        .nodes
        .get_mut(id)
        .ok_or_else(|| OrchestratorError::NotFound(id.to_string()))?;
    if node.state != TaskState::Running {
        return Err(OrchestratorError::ConflictingState(format!(
            "task {id} cannot fail from state {:?}",
            node.state
        )));
    }
    node.state = TaskState::Failed;
    Ok(next)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ready_node(id: &str, priority: i64, run_count: u64, ready_since: i64) -> TaskNode {
        TaskNode {
            id: id.to_string(),
            state: TaskState::Ready,
            dependencies: Vec::new(),
            priority,
            run_count,
            ready_since: Some(ready_since),
        }
    }

    #[test]
    fn scheduler_determinism_ties_break_lexicographically() {
        let mut graph = TaskGraph::new();
        for id in ["d", "b", "a", "c"] {
            graph.insert(ready_node(id, 10, 1, 5));
        }
        let config = SchedulerConfig {
            concurrency_cap: 10,
            priority_policy: PriorityPolicy::Strict,
            aging_window_ms: 60_000,
            max_aging_boost: 5,
        };
        let clock = FixedClock::new(10_000);

        let result1 = get_ready_queue(&graph, &config, &clock).unwrap();
        let result2 = get_ready_queue(&graph, &config, &clock).unwrap();

        assert_eq!(result1.ready_queue, vec!["a", "b", "c", "d"]);
        assert_eq!(result1.ready_queue, result2.ready_queue);
    }

    #[test]
    fn scheduler_aging_prevents_starvation() {
        let mut graph = TaskGraph::new();
        let now = 1_000_000i64;
        graph.insert(ready_node("freshHigh", 10, 0, now - 10_000));
        graph.insert(ready_node("staleMedium", 7, 0, now - 600_000));
        graph.insert(ready_node("staleLow", 2, 0, 0));

        let config = SchedulerConfig {
            concurrency_cap: 10,
            priority_policy: PriorityPolicy::Aging,
            aging_window_ms: 60_000,
            max_aging_boost: 5,
        };
        let clock = FixedClock::new(now);

        let result = get_ready_queue(&graph, &config, &clock).unwrap();
        assert_eq!(result.ready_queue, vec!["staleMedium", "freshHigh", "staleLow"]);
    }

    #[test]
    fn available_slots_accounts_for_running_count() {
        let mut graph = TaskGraph::new();
        graph.insert(ready_node("a", 5, 0, 0));
        graph.insert(TaskNode {
            id: "running-1".to_string(),
            state: TaskState::Running,
            dependencies: Vec::new(),
            priority: 5,
            run_count: 0,
            ready_since: None,
        });

        let config = SchedulerConfig {
            concurrency_cap: 2,
            priority_policy: PriorityPolicy::Strict,
            aging_window_ms: 60_000,
            max_aging_boost: 0,
        };
        let clock = FixedClock::new(0);

        let result = get_ready_queue(&graph, &config, &clock).unwrap();
        assert_eq!(result.running_count, 1);
        assert_eq!(result.available_slots, 1);
        assert_eq!(result.ready_queue, vec!["a"]);
    }

    #[test]
    fn unresolved_dependency_fails() {
        let mut graph = TaskGraph::new();
        graph.insert(TaskNode {
            id: "a".to_string(),
            state: TaskState::Pending,
            dependencies: vec!["missing".to_string()],
            priority: 1,
            run_count: 0,
            ready_since: None,
        });

        let config = SchedulerConfig {
            concurrency_cap: 1,
            priority_policy: PriorityPolicy::Strict,
            aging_window_ms: 60_000,
            max_aging_boost: 0,
        };
        let clock = FixedClock::new(0);

        let err = get_ready_queue(&graph, &config, &clock).unwrap_err();
        assert!(matches!(err, OrchestratorError::DependencyUnresolved { .. }));
    }

    #[test]
    fn invalid_concurrency_cap_rejected() {
        let graph = TaskGraph::new();
        let config = SchedulerConfig {
            concurrency_cap: 0,
            priority_policy: PriorityPolicy::Strict,
            aging_window_ms: 60_000,
            max_aging_boost: 0,
        };
        let clock = FixedClock::new(0);
        let err = get_ready_queue(&graph, &config, &clock).unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(_)));
    }

    #[test]
    fn pause_then_resume_only_changes_target_node() {
        let mut graph = TaskGraph::new();
        graph.insert(ready_node("a", 1, 0, 0));
        graph.insert(ready_node("b", 1, 0, 0));

        let paused = pause_task(&graph, "a").unwrap();
        assert_eq!(paused.nodes["a"].state, TaskState::Paused);
        assert_eq!(paused.nodes["b"].state, TaskState::Ready);

        let resumed = resume_task(&paused, "a").unwrap();
        assert_eq!(resumed.nodes["a"].state, TaskState::Ready);
        assert_eq!(resumed.nodes["b"].state, TaskState::Ready);
    }

    #[test]
    fn resume_blocks_when_dependency_incomplete() {
        let mut graph = TaskGraph::new();
        graph.insert(TaskNode {
            id: "dep".to_string(),
            state: TaskState::Pending,
            dependencies: Vec::new(),
            priority: 1,
            run_count: 0,
            ready_since: None,
        });
        graph.insert(TaskNode {
            id: "a".to_string(),
            state: TaskState::Paused,
            dependencies: vec!["dep".to_string()],
            priority: 1,
            run_count: 0,
            ready_since: None,
        });

        let resumed = resume_task(&graph, "a").unwrap();
        assert_eq!(resumed.nodes["a"].state, TaskState::Blocked);
    }

    #[test]
    fn pause_unknown_task_fails_not_found() {
        let graph = TaskGraph::new();
        let err = pause_task(&graph, "nope").unwrap_err();
        assert!(matches!(err, OrchestratorError::NotFound(_)));
    }

    #[test]
    fn fail_task_moves_running_node_to_failed() {
        let mut graph = TaskGraph::new();
        graph.insert(TaskNode {
            id: "a".to_string(),
            state: TaskState::Running,
            dependencies: Vec::new(),
            priority: 1,
            run_count: 0,
            ready_since: None,
        });

        let failed = fail_task(&graph, "a").unwrap();
        assert_eq!(failed.nodes["a"].state, TaskState::Failed);
    }

    #[test]
    fn fail_task_rejects_non_running_node() {
        let mut graph = TaskGraph::new();
        graph.insert(ready_node("a", 1, 0, 0));

        let err = fail_task(&graph, "a").unwrap_err();
        assert!(matches!(err, OrchestratorError::ConflictingState(_)));
    }
}
