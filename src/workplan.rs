//! WorkPlan schema and validator (spec.md §3 `WorkPlan`).
//!
//! A plan is produced upstream (by whatever planning step validates a task
//! before it's handed to `spawn`'s `requireValidatedPlanTask` policy) and
//! consumed here only to check internal consistency: every dependency and
//! acceptance-check reference must resolve within the same plan before the
//! scheduler ever sees it.

use crate::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AcceptanceCheck {
    pub id: String,
    pub description: String,
    pub verification: String,
    pub required: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Acceptance {
    pub definition_of_done: String,
    pub checks: Vec<AcceptanceCheck>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanTask {
    pub id: String,
    pub title: String,
    pub description: String,
    pub priority: i64,
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub risks: Vec<String>,
    #[serde(default)]
    pub acceptance_checks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkPlan {
    pub schema_version: String,
    pub goal: String,
    #[serde(default)]
    pub assumptions: Vec<String>,
    pub acceptance: Acceptance,
    pub tasks: Vec<PlanTask>,
}

impl WorkPlan {
    /// Checks that every task dependency and acceptance-check reference
    /// resolves within this plan, and that task/check ids are unique
    /// (spec.md §3: "all dependency and acceptance references must resolve
    /// within the plan").
    pub fn validate(&self) -> Result<()> {
        let mut task_ids = HashSet::new();
        for task in &self.tasks {
            if task.id.is_empty() {
                return Err(OrchestratorError::ConfigError(
                    "work plan task id must not be empty".to_string(),
                ));
            }
            if !task_ids.insert(task.id.as_str()) {
                return Err(OrchestratorError::ConfigError(format!(
                    "duplicate work plan task id '{}'",
                    task.id
                )));
            }
        }

        let mut check_ids = HashSet::new();
        for check in &self.acceptance.checks {
            if !check_ids.insert(check.id.as_str()) {
                return Err(OrchestratorError::ConfigError(format!(
                    "duplicate acceptance check id '{}'",
                    check.id
                )));
            }
        }

        for task in &self.tasks {
            for dep in &task.dependencies {
                if !task_ids.contains(dep.as_str()) {
                    return Err(OrchestratorError::DependencyUnresolved {
                        task_id: task.id.clone(),
                        missing_id: dep.clone(),
                    });
                }
            }
            for check_ref in &task.acceptance_checks {
                if !check_ids.contains(check_ref.as_str()) {
                    return Err(OrchestratorError::ConfigError(format!(
                        "task '{}' references unknown acceptance check '{}'",
                        task.id, check_ref
                    )));
                }
            }
        }

        Ok(())
    }

    /// Converts this plan's tasks into a [`crate::scheduler::TaskGraph`],
    /// with every node starting in `pending` state and no `runCount`/
    /// `readySince` recorded yet.
    pub fn to_task_graph(&self) -> crate::scheduler::TaskGraph {
        let mut graph = crate::scheduler::TaskGraph::new();
        for task in &self.tasks {
            graph.insert(crate::scheduler::TaskNode {
                id: task.id.clone(),
                state: crate::scheduler::TaskState::Pending,
                dependencies: task.dependencies.clone(),
                priority: task.priority,
                run_count: 0,
                ready_since: None,
            });
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_plan() -> WorkPlan {
        WorkPlan {
            schema_version: "1".to_string(),
            goal: "ship the thing".to_string(),
            assumptions: Vec::new(),
            acceptance: Acceptance {
                definition_of_done: "tests pass".to_string(),
                checks: vec![AcceptanceCheck {
                    id: "check-1".to_string(),
                    description: "unit tests green".to_string(),
                    verification: "cargo test".to_string(),
                    required: true,
                }],
            },
            tasks: vec![
                PlanTask {
                    id: "task-1".to_string(),
                    title: "set up scaffolding".to_string(),
                    description: String::new(),
                    priority: 5,
                    dependencies: Vec::new(),
                    risks: Vec::new(),
                    acceptance_checks: Vec::new(),
                },
                PlanTask {
                    id: "task-2".to_string(),
                    title: "implement feature".to_string(),
                    description: String::new(),
                    priority: 5,
                    dependencies: vec!["task-1".to_string()],
                    risks: Vec::new(),
                    acceptance_checks: vec!["check-1".to_string()],
                },
            ],
        }
    }

    #[test]
    fn valid_plan_passes() {
        assert!(sample_plan().validate().is_ok());
    }

    #[test]
    fn unresolved_dependency_fails() {
        let mut plan = sample_plan();
        plan.tasks[1].dependencies.push("ghost-task".to_string());
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::DependencyUnresolved { .. }));
    }

    #[test]
    fn unresolved_acceptance_check_fails() {
        let mut plan = sample_plan();
        plan.tasks[1].acceptance_checks.push("ghost-check".to_string());
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(_)));
    }

    #[test]
    fn duplicate_task_ids_rejected() {
        let mut plan = sample_plan();
        plan.tasks[1].id = "task-1".to_string();
        let err = plan.validate().unwrap_err();
        assert!(matches!(err, OrchestratorError::ConfigError(_)));
    }

    #[test]
    fn converts_to_task_graph() {
        let plan = sample_plan();
        let graph = plan.to_task_graph();
        assert_eq!(graph.nodes.len(), 2);
        assert!(graph.check_dependencies_resolved().is_ok());
    }
}
