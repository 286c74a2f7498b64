//! Task bookkeeping for one remote generation batch.
//!
//! A [`TaskSet`] is built once per run, then mutated from the submission
//! loop and the push-event listener. Callers share it behind a lock; the
//! type itself is plain data.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a single remote task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskStatus {
    /// Built but not yet accepted by the server
    Pending,
    /// Accepted; a server job id is registered
    Submitted,
    /// Output verified and relocated
    Completed,
    /// Gave up on this task; the batch may still finish the others
    Failed,
}

/// One image's journey through the remote pipeline
#[derive(Debug, Clone)]
pub struct RemoteTask {
    /// Original source file
    pub source: PathBuf,
    /// Fully patched workflow payload, built once at enqueue time
    pub payload: serde_json::Value,
    /// File name the source was staged under (timestamped)
    pub staged_name: String,
    /// Stem of the prompt template used, for output tagging
    pub prompt_name: Option<String>,
    /// Server-assigned job id, set on successful submission
    pub job_id: Option<String>,
    /// Current lifecycle state
    pub status: TaskStatus,
}

impl RemoteTask {
    /// Create a pending task.
    #[must_use]
    pub fn new(
        source: PathBuf,
        payload: serde_json::Value,
        staged_name: String,
        prompt_name: Option<String>,
    ) -> Self {
        Self {
            source,
            payload,
            staged_name,
            prompt_name,
            job_id: None,
            status: TaskStatus::Pending,
        }
    }
}

/// The set of tasks for one batch, with completion accounting.
#[derive(Debug, Default)]
pub struct TaskSet {
    tasks: Vec<RemoteTask>,
    completed: usize,
}

impl TaskSet {
    /// Create an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop all tasks and reset the completion counter.
    pub fn clear(&mut self) {
        self.tasks.clear();
        self.completed = 0;
    }

    /// Add a task; returns its index.
    pub fn add(&mut self, task: RemoteTask) -> usize {
        self.tasks.push(task);
        self.tasks.len() - 1
    }

    /// Number of tasks in the set.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// True when the set holds no tasks.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Tasks completed so far.
    #[must_use]
    pub fn completed_count(&self) -> usize {
        self.completed
    }

    /// Record the server job id for the task at `index` and mark it
    /// submitted. Registering the same id again is a no-op.
    pub fn register_job_id(&mut self, index: usize, job_id: &str) {
        if let Some(task) = self.tasks.get_mut(index) {
            if task.job_id.as_deref() == Some(job_id) {
                return;
            }
            task.job_id = Some(job_id.to_owned());
            task.status = TaskStatus::Submitted;
        }
    }

    /// Update the status of the task owning `job_id`.
    ///
    /// A transition into [`TaskStatus::Completed`] increments the completion
    /// counter exactly once; repeating it for the same task changes nothing.
    /// Returns `false` when no task owns the id.
    pub fn update_status(&mut self, job_id: &str, status: TaskStatus) -> bool {
        let Some(task) = self
            .tasks
            .iter_mut()
            .find(|t| t.job_id.as_deref() == Some(job_id))
        else {
            return false;
        };
        if status == TaskStatus::Completed && task.status != TaskStatus::Completed {
            self.completed += 1;
        }
        task.status = status;
        true
    }

    /// Set the status of the task at `index` directly. Used for failures
    /// before a job id exists (staging or submission errors). Completion
    /// accounting matches [`TaskSet::update_status`].
    pub fn set_status_at(&mut self, index: usize, status: TaskStatus) {
        if let Some(task) = self.tasks.get_mut(index) {
            if status == TaskStatus::Completed && task.status != TaskStatus::Completed {
                self.completed += 1;
            }
            task.status = status;
        }
    }

    /// Tasks that reached a terminal state (completed or failed).
    #[must_use]
    pub fn resolved_count(&self) -> usize {
        self.tasks
            .iter()
            .filter(|t| matches!(t.status, TaskStatus::Completed | TaskStatus::Failed))
            .count()
    }

    /// Look up the task owning `job_id`.
    #[must_use]
    pub fn get_by_job_id(&self, job_id: &str) -> Option<&RemoteTask> {
        self.tasks
            .iter()
            .find(|t| t.job_id.as_deref() == Some(job_id))
    }

    /// Indices of tasks not yet submitted.
    #[must_use]
    pub fn pending_indices(&self) -> Vec<usize> {
        self.tasks
            .iter()
            .enumerate()
            .filter(|(_, t)| t.status == TaskStatus::Pending)
            .map(|(i, _)| i)
            .collect()
    }

    /// Borrow the task at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&RemoteTask> {
        self.tasks.get(index)
    }

    /// True once every task has completed. An empty set is never "all
    /// completed": the state is only meaningful after the batch has been
    /// enumerated.
    #[must_use]
    pub fn is_all_completed(&self) -> bool {
        !self.tasks.is_empty() && self.completed == self.tasks.len()
    }
}
