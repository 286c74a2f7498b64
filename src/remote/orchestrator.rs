//! Remote generation orchestrator.
//!
//! Drives one batch end to end: stage inputs, submit patched workflows
//! sequentially, follow push events for progress, and on each job's
//! completion poll history, await the verified output file, and relocate it.
//! Per-task failures never stop the batch; precondition failures stop it
//! before any work starts.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::SamplerOverrides;
use crate::error::{PhotovarError, Result};
use crate::events::{AppEvent, EventBus};
use crate::remote::api::{extract_output_filenames, ComfyClient};
use crate::remote::listener::{PushListener, ReconnectPolicy};
use crate::remote::messages::PushMessage;
use crate::remote::staging;
use crate::remote::task::{RemoteTask, TaskSet, TaskStatus};
use crate::remote::workflow::WorkflowTemplate;
use crate::services::FileStore;

/// Poll interval for history lookups after a job reports done
const HISTORY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Poll interval while waiting for a staged input to become visible
const VISIBILITY_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Everything one remote batch needs to know.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// HTTP base URL of the generation server
    pub server_url: String,
    /// Shared directory the server reads staged inputs from
    pub staging_dir: PathBuf,
    /// Directory the server writes raw outputs to
    pub temp_output_dir: PathBuf,
    /// Directory verified outputs are moved into
    pub final_output_dir: PathBuf,
    /// Workflow template (API format JSON)
    pub workflow_path: PathBuf,
    /// Prompt text file; a bracketed `[tag]` in its stem names the outputs
    pub prompt_path: PathBuf,
    /// Sampler overrides applied to every submission
    pub sampler: SamplerOverrides,
    /// How long to wait for a history entry after a job reports done
    pub history_timeout: Duration,
    /// How long to wait for the output file after history names it
    pub file_timeout: Duration,
    /// How long to wait for a staged input to become visible to the server
    pub visibility_timeout: Duration,
    /// Reconnect behavior for the push channel
    pub reconnect: ReconnectPolicy,
}

impl RemoteConfig {
    /// Build a config with the default timeouts (10s history, 15s file,
    /// 10s visibility).
    #[must_use]
    pub fn new(
        server_url: impl Into<String>,
        staging_dir: impl Into<PathBuf>,
        temp_output_dir: impl Into<PathBuf>,
        final_output_dir: impl Into<PathBuf>,
        workflow_path: impl Into<PathBuf>,
        prompt_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            server_url: server_url.into(),
            staging_dir: staging_dir.into(),
            temp_output_dir: temp_output_dir.into(),
            final_output_dir: final_output_dir.into(),
            workflow_path: workflow_path.into(),
            prompt_path: prompt_path.into(),
            sampler: SamplerOverrides::default(),
            history_timeout: Duration::from_secs(10),
            file_timeout: Duration::from_secs(15),
            visibility_timeout: Duration::from_secs(10),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Shared state handed to completion workers.
struct Shared {
    client: ComfyClient,
    events: EventBus,
    tasks: Mutex<TaskSet>,
    /// Job ids whose completion handling has already started; each job
    /// completes at most once even when the server signals done twice.
    completion_started: Mutex<HashSet<String>>,
    /// Job ids whose completion handling gave up (history or file timeout).
    /// These tasks stay `Submitted` so all-done stays suppressed, but they
    /// count as settled so the event loop can finish the run.
    gave_up: Mutex<HashSet<String>>,
    /// Pinged by completion workers so the main loop re-checks counts
    progress_tick: Notify,
    config: RemoteConfig,
}

/// Orchestrates one remote generation batch.
pub struct RemoteOrchestrator {
    shared: Arc<Shared>,
}

impl RemoteOrchestrator {
    /// Create an orchestrator publishing on `events`.
    #[must_use]
    pub fn new(config: RemoteConfig, events: EventBus) -> Self {
        let client = ComfyClient::new(config.server_url.clone());
        Self {
            shared: Arc::new(Shared {
                client,
                events,
                tasks: Mutex::new(TaskSet::new()),
                completion_started: Mutex::new(HashSet::new()),
                gave_up: Mutex::new(HashSet::new()),
                progress_tick: Notify::new(),
                config,
            }),
        }
    }

    /// Run the batch to completion.
    ///
    /// Returns `Ok` when every task settled (reached a terminal state, or
    /// its completion handling gave up on a timeout) or the run was
    /// cancelled. Individual task failures are reported as
    /// [`AppEvent::Error`] and do not fail the run; [`AppEvent::AllDone`]
    /// fires only when every task completed.
    ///
    /// # Errors
    /// Precondition failures: unreadable templates, empty file list, a
    /// server that fails the liveness probe, or every submission failing.
    /// Also fails when the push channel dies beyond recovery.
    pub async fn run(&self, files: &[PathBuf], cancel: &CancellationToken) -> Result<()> {
        if files.is_empty() {
            return Err(PhotovarError::invalid_config("no input files to process"));
        }
        let template = WorkflowTemplate::load(&self.shared.config.workflow_path)?;
        let prompt_text = FileStore::load_text(&self.shared.config.prompt_path)?;
        let prompt_name = self
            .shared
            .config
            .prompt_path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(ToOwned::to_owned);

        if !self.shared.client.is_alive().await {
            return Err(PhotovarError::network(format!(
                "generation server at {} is not responding",
                self.shared.config.server_url
            )));
        }

        self.enqueue(files, &template, &prompt_text, prompt_name)
            .await?;

        let client_id = uuid::Uuid::new_v4().to_string();
        let listener = PushListener::new(
            &self.shared.config.server_url,
            client_id.clone(),
            self.shared.config.reconnect.clone(),
        );
        let (push_tx, push_rx) = mpsc::channel(64);
        let listener_cancel = cancel.child_token();
        let listener_handle = {
            let cancel = listener_cancel.clone();
            tokio::spawn(async move { listener.run(push_tx, &cancel).await })
        };

        // Submission runs alongside the event loop: a visibility wait for a
        // later task must not delay progress and completion of earlier ones.
        let ((), outcome) = tokio::join!(
            self.submit_all(&client_id, cancel),
            self.follow_events(push_rx, cancel),
        );

        listener_cancel.cancel();
        let _ = listener_handle.await;
        outcome
    }

    /// Stage every file and build its payload. Staging failures skip the
    /// file; an entirely failed enumeration is a precondition error.
    async fn enqueue(
        &self,
        files: &[PathBuf],
        template: &WorkflowTemplate,
        prompt_text: &str,
        prompt_name: Option<String>,
    ) -> Result<()> {
        let mut tasks = self.shared.tasks.lock().await;
        tasks.clear();
        self.shared.completion_started.lock().await.clear();
        self.shared.gave_up.lock().await.clear();

        for file in files {
            match staging::stage_image(file, &self.shared.config.staging_dir) {
                Ok(staged) => {
                    let payload = template.patch(
                        &staged.image_ref,
                        prompt_text,
                        &self.shared.config.sampler,
                    );
                    tasks.add(RemoteTask::new(
                        file.clone(),
                        payload,
                        staged.file_name,
                        prompt_name.clone(),
                    ));
                }
                Err(e) => {
                    tracing::warn!(source = %file.display(), error = %e, "staging failed, skipping");
                    self.shared
                        .events
                        .error(format!("{}: {e}", file.display()));
                }
            }
        }

        if tasks.is_empty() {
            return Err(PhotovarError::filesystem(
                "no input could be staged for submission",
            ));
        }
        self.shared
            .events
            .status(format!("Submitting {} task(s)", tasks.len()));
        Ok(())
    }

    /// Submit every pending task in order. One worker, one submission at a
    /// time; HTTP failures mark the task failed and move on.
    async fn submit_all(&self, client_id: &str, cancel: &CancellationToken) {
        let indices = self.shared.tasks.lock().await.pending_indices();
        let subfolder = self
            .shared
            .config
            .staging_dir
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or("input")
            .to_owned();

        for index in indices {
            if cancel.is_cancelled() {
                return;
            }

            let (payload, staged_name, source) = {
                let tasks = self.shared.tasks.lock().await;
                let Some(task) = tasks.get(index) else { continue };
                (task.payload.clone(), task.staged_name.clone(), task.source.clone())
            };

            if !self.wait_until_visible(&staged_name, &subfolder, cancel).await {
                self.shared.tasks.lock().await.set_status_at(index, TaskStatus::Failed);
                self.shared.events.error(format!(
                    "{}: staged input never became visible to the server",
                    source.display()
                ));
                continue;
            }

            match self.shared.client.submit(&payload, client_id).await {
                Ok(job_id) => {
                    tracing::info!(source = %source.display(), %job_id, "task submitted");
                    self.shared.tasks.lock().await.register_job_id(index, &job_id);
                }
                Err(e) => {
                    tracing::warn!(source = %source.display(), error = %e, "submission failed");
                    self.shared.tasks.lock().await.set_status_at(index, TaskStatus::Failed);
                    self.shared.events.error(format!("{}: {e}", source.display()));
                }
            }
            self.shared.progress_tick.notify_one();
        }
    }

    /// Bounded poll until the server's `/view` endpoint serves the staged
    /// file.
    async fn wait_until_visible(
        &self,
        file_name: &str,
        subfolder: &str,
        cancel: &CancellationToken,
    ) -> bool {
        let deadline = tokio::time::Instant::now() + self.shared.config.visibility_timeout;
        loop {
            if self.shared.client.input_visible(file_name, subfolder).await {
                return true;
            }
            if cancel.is_cancelled() || tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(VISIBILITY_POLL_INTERVAL).await;
        }
    }

    /// Main event loop: apply push messages, spawn completion workers, and
    /// finish when every task has settled.
    async fn follow_events(
        &self,
        mut push_rx: mpsc::Receiver<PushMessage>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        loop {
            tokio::select! {
                () = cancel.cancelled() => {
                    self.shared.events.status("Remote batch cancelled");
                    return Ok(());
                }
                () = self.shared.progress_tick.notified() => {
                    if let Some(outcome) = self.check_finished().await {
                        return outcome;
                    }
                }
                message = push_rx.recv() => {
                    let Some(message) = message else {
                        // the listener only drops its sender on unrecoverable
                        // failure; with tasks outstanding that is fatal
                        return Err(PhotovarError::network(
                            "push channel closed with tasks outstanding",
                        ));
                    };
                    self.handle_message(message).await;
                    if let Some(outcome) = self.check_finished().await {
                        return outcome;
                    }
                }
            }
        }
    }

    /// `Some(outcome)` once every task is settled: terminal, or abandoned
    /// by its completion worker.
    async fn check_finished(&self) -> Option<Result<()>> {
        let tasks = self.shared.tasks.lock().await;
        let total = tasks.len();
        // Abandoned jobs stay Submitted, so the two counts never overlap.
        let abandoned = self.shared.gave_up.lock().await.len();
        if tasks.resolved_count() + abandoned < total {
            return None;
        }
        if tasks.is_all_completed() {
            self.shared.events.publish(AppEvent::AllDone);
            Some(Ok(()))
        } else {
            self.shared.events.status(format!(
                "Batch finished: {} of {total} completed",
                tasks.completed_count()
            ));
            Some(Ok(()))
        }
    }

    async fn handle_message(&self, message: PushMessage) {
        match message {
            PushMessage::Progress(data) => {
                let Some(job_id) = data.prompt_id else { return };
                let name = {
                    let tasks = self.shared.tasks.lock().await;
                    tasks.get_by_job_id(&job_id).map(|t| {
                        t.source
                            .file_name()
                            .map_or_else(|| job_id.clone(), |n| n.to_string_lossy().into_owned())
                    })
                };
                // progress for somebody else's job
                let Some(name) = name else { return };

                self.shared.events.publish(AppEvent::TaskProgress {
                    name,
                    value: data.value,
                    max: data.max,
                });
                if data.value >= data.max && data.max > 0 {
                    self.start_completion(&job_id).await;
                }
            }
            PushMessage::ExecutionSuccess(job) => {
                if self.owns_job(&job.prompt_id).await {
                    self.start_completion(&job.prompt_id).await;
                }
            }
            PushMessage::ExecutionError(data) => {
                if self.owns_job(&data.prompt_id).await {
                    tracing::warn!(job_id = %data.prompt_id, "job failed server-side");
                    self.shared
                        .tasks
                        .lock()
                        .await
                        .update_status(&data.prompt_id, TaskStatus::Failed);
                    self.shared.events.error(format!(
                        "job {} failed: {}",
                        data.prompt_id, data.exception_message
                    ));
                }
            }
            PushMessage::Executing(_) => {}
        }
    }

    async fn owns_job(&self, job_id: &str) -> bool {
        self.shared.tasks.lock().await.get_by_job_id(job_id).is_some()
    }

    /// Spawn completion handling for `job_id` unless it already ran. The
    /// worker polls history, awaits the output file, and relocates it; the
    /// listener loop never blocks on any of that.
    async fn start_completion(&self, job_id: &str) {
        {
            let mut started = self.shared.completion_started.lock().await;
            if !started.insert(job_id.to_owned()) {
                return;
            }
        }
        let shared = Arc::clone(&self.shared);
        let job_id = job_id.to_owned();
        tokio::spawn(async move {
            match complete_job(&shared, &job_id).await {
                Ok(path) => {
                    shared.tasks.lock().await.update_status(&job_id, TaskStatus::Completed);
                    let (done, total) = {
                        let tasks = shared.tasks.lock().await;
                        (tasks.completed_count(), tasks.len())
                    };
                    shared.events.publish(AppEvent::FileSaved(path));
                    shared.events.publish(AppEvent::Progress { done, total });
                }
                Err(e) => {
                    // the task stays Submitted: recoverable, no all-done.
                    // Record the give-up so the event loop can still finish.
                    tracing::warn!(%job_id, error = %e, "completion handling failed");
                    shared.events.error(format!("job {job_id}: {e}"));
                    shared.gave_up.lock().await.insert(job_id.clone());
                }
            }
            shared.progress_tick.notify_one();
        });
    }
}

/// Poll history for `job_id`, wait for its verified output file, and move
/// it to the final directory. Returns the final path.
async fn complete_job(shared: &Shared, job_id: &str) -> Result<PathBuf> {
    let filenames = poll_history(shared, job_id).await?;
    let temp_file = staging::wait_for_output_file(
        &shared.config.temp_output_dir,
        &filenames,
        shared.config.file_timeout,
    )
    .await?;

    let (source, prompt_name) = {
        let tasks = shared.tasks.lock().await;
        let task = tasks.get_by_job_id(job_id).ok_or_else(|| {
            PhotovarError::internal(format!("no task registered for job {job_id}"))
        })?;
        (task.source.clone(), task.prompt_name.clone())
    };
    let tag = staging::output_tag(prompt_name.as_deref());
    staging::relocate_output(&temp_file, &shared.config.final_output_dir, &source, &tag)
}

/// Poll `/history/{id}` until it lists output files or the timeout lapses.
async fn poll_history(shared: &Shared, job_id: &str) -> Result<Vec<String>> {
    let deadline = tokio::time::Instant::now() + shared.config.history_timeout;
    loop {
        match shared.client.history(job_id).await {
            Ok(history) => {
                let filenames = extract_output_filenames(&history, job_id);
                if !filenames.is_empty() {
                    return Ok(filenames);
                }
            }
            Err(e) => {
                tracing::debug!(%job_id, error = %e, "history poll failed, retrying");
            }
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(PhotovarError::timeout(
                format!("history entry for job {job_id}"),
                shared.config.history_timeout.as_secs(),
            ));
        }
        tokio::time::sleep(HISTORY_POLL_INTERVAL).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    fn config(dir: &Path) -> RemoteConfig {
        RemoteConfig::new(
            "http://127.0.0.1:1",
            dir.join("staging"),
            dir.join("tmp_out"),
            dir.join("final"),
            dir.join("workflow.json"),
            dir.join("backdrop[studio].txt"),
        )
    }

    #[tokio::test]
    async fn empty_batch_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = RemoteOrchestrator::new(config(dir.path()), EventBus::new());
        let err = orchestrator
            .run(&[], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PhotovarError::InvalidConfig(_)));
    }

    #[tokio::test]
    async fn missing_workflow_template_is_a_precondition_error() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = RemoteOrchestrator::new(config(dir.path()), EventBus::new());
        let err = orchestrator
            .run(&[dir.path().join("a.png")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PhotovarError::FileSystem(_)));
    }

    #[tokio::test]
    async fn unreachable_server_fails_before_staging() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("workflow.json"),
            serde_json::json!({"1": {"class_type": "LoadImage", "inputs": {}}}).to_string(),
        )
        .unwrap();
        std::fs::write(dir.path().join("backdrop[studio].txt"), "a prompt").unwrap();

        let orchestrator = RemoteOrchestrator::new(config(dir.path()), EventBus::new());
        let err = orchestrator
            .run(&[dir.path().join("a.png")], &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, PhotovarError::Network(_)));
        // nothing staged
        assert!(!dir.path().join("staging").exists());
    }
}
