//! Task state machine.
//!
//! Computes each task's status from its dependencies and completion counts and
//! applies start/finish events coming from execution environments.
//!
//! # State Machine
//! ```text
//! Unfeasible --(all deps completed once)--> Unexecuted
//! Unexecuted | Done --start(env)--> Doing
//! Doing --finish(env), envs left--> Doing
//! Doing --finish(env), no envs left--> Done
//! ```

use std::collections::HashMap;

use crate::error::{FlowError, Result};
use crate::status::{SubflowStatus, Task, TaskStatus};

fn task_mut<'a>(sf: &'a mut SubflowStatus, task_id: &str) -> Result<&'a mut Task> {
    sf.task_mut(task_id)
        .ok_or_else(|| FlowError::input("unknown_task"))
}

/// START(task, env): mark `env` as running the task.
///
/// # Preconditions
/// - the task is not `Unfeasible`
/// - the task is active
pub fn start(sf: &mut SubflowStatus, task_id: &str, env: &str) -> Result<()> {
    if env.trim().is_empty() {
        return Err(FlowError::input("empty_execution_environment"));
    }
    let task = task_mut(sf, task_id)?;
    if task.status == TaskStatus::Unfeasible {
        return Err(FlowError::input("task_unfeasible"));
    }
    if !task.active {
        return Err(FlowError::input("task_inactive"));
    }

    task.status = TaskStatus::Doing;
    if !task.execution_environments.iter().any(|e| e == env) {
        task.execution_environments.push(env.to_string());
    }
    tracing::debug!(task = %task_id, env = %env, "Task started");
    Ok(())
}

/// FINISH(task, env): record one completion from `env` and recompute.
pub fn finish(sf: &mut SubflowStatus, task_id: &str, env: &str) -> Result<()> {
    let task = task_mut(sf, task_id)?;
    let Some(pos) = task.execution_environments.iter().position(|e| e == env) else {
        return Err(FlowError::input("task_not_running_in_environment"));
    };

    task.execution_environments.remove(pos);
    task.completed_count = task.completed_count.saturating_add(1);
    if task.execution_environments.is_empty() {
        task.status = TaskStatus::Done;
    }
    tracing::debug!(
        task = %task_id,
        env = %env,
        completed_count = task.completed_count,
        "Task finished"
    );

    recompute(sf);
    Ok(())
}

/// Return a finished task to `Unexecuted` so it can be run again.
///
/// The completion count is history and is kept.
pub fn reset(sf: &mut SubflowStatus, task_id: &str) -> Result<()> {
    let task = task_mut(sf, task_id)?;
    match task.status {
        TaskStatus::Done => {
            task.status = TaskStatus::Unexecuted;
            Ok(())
        }
        TaskStatus::Doing => Err(FlowError::input("task_is_running")),
        TaskStatus::Unexecuted | TaskStatus::Unfeasible => Ok(()),
    }
}

/// Toggle the governance selection of a task.
///
/// Required tasks cannot be deactivated.
pub fn set_active(sf: &mut SubflowStatus, task_id: &str, active: bool) -> Result<()> {
    let task = sf
        .task_mut(task_id)
        .ok_or_else(|| FlowError::Consistency(format!("unknown task {}", task_id)))?;
    if !active && task.is_required {
        return Err(FlowError::Consistency(format!(
            "required task {} cannot be deactivated",
            task_id
        )));
    }
    task.active = active;
    task.disabled = !active;
    Ok(())
}

/// RECOMPUTE: unlock tasks whose dependencies have all completed at least once
/// and refresh `is_completed`.
///
/// Idempotent and independent of task order.
pub fn recompute(sf: &mut SubflowStatus) {
    loop {
        let counts: HashMap<String, u32> = sf
            .tasks
            .iter()
            .map(|t| (t.id.clone(), t.completed_count))
            .collect();

        let mut changed = false;
        for task in sf.tasks.iter_mut() {
            if task.status != TaskStatus::Unfeasible {
                continue;
            }
            let satisfied = task
                .dependent_task_ids
                .iter()
                .all(|dep| counts.get(dep).copied().unwrap_or(0) >= 1);
            if satisfied {
                task.status = TaskStatus::Unexecuted;
                changed = true;
            }
        }
        if !changed {
            break;
        }
    }

    sf.is_completed = sf
        .tasks
        .iter()
        .all(|t| !t.is_required || t.completed_count >= 1);
}
