//! Aggregates over the execution log and run store for dashboards.

use serde::{Deserialize, Serialize};
use skillcore::{ExecutionRecord, ExecutionStatus, RunStatus, WorkflowRun};
use std::collections::BTreeMap;

/// Per-skill execution statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SkillStats {
    pub skill_id: String,
    /// Executions, counting each retried invocation once.
    pub invocations: u64,
    /// Individual attempts, retries included.
    pub attempts: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    /// Succeeded invocations over all invocations, in [0, 1].
    pub success_rate: f64,
    pub avg_duration_ms: f64,
    pub usage_units: u64,
}

/// Per-workflow run statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStats {
    pub workflow: String,
    pub runs: u64,
    pub completed: u64,
    pub failed: u64,
    pub paused: u64,
    pub in_progress: u64,
    /// Completed runs over finished runs, in [0, 1].
    pub success_rate: f64,
    pub avg_duration_ms: f64,
}

/// Group `records` by skill, ordered by skill id.
pub fn skill_stats(records: &[ExecutionRecord]) -> Vec<SkillStats> {
    let mut by_skill: BTreeMap<&str, (SkillStats, u64, u64)> = BTreeMap::new();

    for record in records {
        let (stats, total_ms, timed) = by_skill.entry(record.skill_id.as_str()).or_default();
        stats.attempts += 1;
        if let Some(usage) = &record.usage {
            stats.usage_units += usage.units;
        }
        if let Some(ms) = record.duration_ms {
            *total_ms += ms;
            *timed += 1;
        }
        if record.retried {
            continue;
        }
        stats.invocations += 1;
        match record.status {
            ExecutionStatus::Succeeded => stats.succeeded += 1,
            ExecutionStatus::Failed => stats.failed += 1,
            ExecutionStatus::TimedOut => stats.timed_out += 1,
            ExecutionStatus::Cancelled => stats.cancelled += 1,
            ExecutionStatus::Pending | ExecutionStatus::Running => {}
        }
    }

    by_skill
        .into_iter()
        .map(|(skill_id, (mut stats, total_ms, timed))| {
            stats.skill_id = skill_id.to_string();
            stats.success_rate = ratio(stats.succeeded, stats.invocations);
            stats.avg_duration_ms = ratio(total_ms, timed);
            stats
        })
        .collect()
}

/// Group `runs` by workflow, ordered by name.
pub fn workflow_stats(runs: &[WorkflowRun]) -> Vec<WorkflowStats> {
    let mut by_workflow: BTreeMap<&str, (WorkflowStats, u64, u64)> = BTreeMap::new();

    for run in runs {
        let (stats, total_ms, timed) = by_workflow.entry(run.workflow.as_str()).or_default();
        stats.runs += 1;
        match run.status {
            RunStatus::Completed => stats.completed += 1,
            RunStatus::Failed => stats.failed += 1,
            RunStatus::Paused => stats.paused += 1,
            RunStatus::Pending | RunStatus::Running => stats.in_progress += 1,
        }
        if let Some(ms) = run.duration_ms() {
            *total_ms += ms;
            *timed += 1;
        }
    }

    by_workflow
        .into_iter()
        .map(|(workflow, (mut stats, total_ms, timed))| {
            stats.workflow = workflow.to_string();
            stats.success_rate = ratio(stats.completed, stats.completed + stats.failed);
            stats.avg_duration_ms = ratio(total_ms, timed);
            stats
        })
        .collect()
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
