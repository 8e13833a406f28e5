//! Inference-job orchestration.
//!
//! Drives the job lifecycle against the backend: submit a message and
//! create a job, then poll on a fixed interval until the job resolves.
//! `requires_action` pauses are serviced through the tool dispatch table;
//! terminal failures and the hard ceiling timeout degrade to non-throwing
//! [`JobOutcome`] values so the narrative can continue with fallback
//! content instead of blocking.

use crate::error::{Error, Result};
use crate::tools::ToolDispatcher;
use assistants::{Backend, Error as BackendError, Job, JobStatus, Role, ThreadMessage, ToolOutput};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Timing knobs for the poll loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Fixed cadence between status checks.
    pub poll_interval: Duration,
    /// Hard ceiling on a single job; exceeding it resolves the job as a
    /// soft timeout rather than an error.
    pub timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            timeout: Duration::from_secs(60),
        }
    }
}

/// How a job resolved. Only protocol-level problems (network, parse)
/// surface as errors; every job state maps to one of these.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The job completed; messages it produced, newest first.
    Completed { messages: Vec<ThreadMessage> },
    /// The job reached a failed/cancelled/expired terminal state.
    Unsuccessful { status: JobStatus, reason: String },
    /// The hard ceiling elapsed before the job resolved.
    TimedOut,
}

impl JobOutcome {
    /// Text of the newest message, when the job completed with any.
    pub fn latest_text(&self) -> Option<&str> {
        match self {
            JobOutcome::Completed { messages } => messages.first().map(|m| m.text.as_str()),
            _ => None,
        }
    }
}

/// Creates and drives inference jobs for the engine.
#[derive(Clone)]
pub struct JobOrchestrator {
    backend: Arc<dyn Backend>,
    tools: ToolDispatcher,
    config: OrchestratorConfig,
}

impl JobOrchestrator {
    pub fn new(backend: Arc<dyn Backend>, config: OrchestratorConfig) -> Self {
        Self {
            backend,
            tools: ToolDispatcher::new(),
            config,
        }
    }

    /// Append `message` to the thread, create a job bound to `identity`,
    /// and drive it to resolution.
    ///
    /// If the backend reports another job already active on the thread,
    /// that job is cancelled and the creation retried exactly once; a
    /// second conflict surfaces as [`Error::Conflict`].
    pub async fn submit(
        &self,
        thread_id: &str,
        identity: &str,
        message: &str,
    ) -> Result<JobOutcome> {
        self.backend
            .post_message(thread_id, Role::User, message)
            .await?;

        let job = match self.backend.create_job(thread_id, identity).await {
            Ok(job) => job,
            Err(BackendError::Conflict {
                active_job_id,
                message,
            }) => {
                tracing::info!(thread_id, %message, "thread conflict, cancelling active job");
                if let Some(ref active) = active_job_id {
                    self.cancel(thread_id, active).await;
                }
                match self.backend.create_job(thread_id, identity).await {
                    Ok(job) => job,
                    Err(BackendError::Conflict { message, .. }) => {
                        return Err(Error::Conflict(message))
                    }
                    Err(other) => return Err(other.into()),
                }
            }
            Err(other) => return Err(other.into()),
        };

        self.poll(job).await
    }

    /// Poll a job to resolution on a fixed interval, servicing tool calls
    /// and enforcing the ceiling timeout.
    pub async fn poll(&self, mut job: Job) -> Result<JobOutcome> {
        let deadline = Instant::now() + self.config.timeout;

        loop {
            match job.status {
                JobStatus::Completed => {
                    let messages = self.backend.list_messages(&job.thread_id).await?;
                    // Only messages this job produced, preserving the
                    // newest-first listing order.
                    let messages = messages
                        .into_iter()
                        .filter(|m| m.job_id.as_deref() == Some(job.id.as_str()))
                        .collect();
                    return Ok(JobOutcome::Completed { messages });
                }
                JobStatus::RequiresAction => {
                    let calls = job
                        .required_action
                        .take()
                        .map(|a| a.tool_calls)
                        .unwrap_or_default();
                    let outputs: Vec<ToolOutput> =
                        calls.iter().map(|c| self.tools.dispatch(c)).collect();
                    // All outputs go up in one request before polling resumes.
                    job = self
                        .backend
                        .submit_tool_outputs(&job.thread_id, &job.id, outputs)
                        .await?;
                }
                JobStatus::Failed | JobStatus::Cancelled | JobStatus::Expired => {
                    let reason = job
                        .last_error
                        .as_ref()
                        .map(|e| e.message.clone())
                        .unwrap_or_else(|| format!("job ended as {:?}", job.status));
                    return Ok(JobOutcome::Unsuccessful {
                        status: job.status,
                        reason,
                    });
                }
                // Queued, in progress, cancelling, or something newer than
                // this client: keep waiting.
                _ => {
                    tokio::time::sleep(self.config.poll_interval).await;
                    job = self.backend.get_job(&job.thread_id, &job.id).await?;
                }
            }

            // Tool rounds count against the same ceiling as plain waits,
            // so a job stuck demanding action cannot outlive it.
            if !job.status.is_terminal() && Instant::now() >= deadline {
                tracing::warn!(job_id = %job.id, "job exceeded ceiling, resolving as timeout");
                self.cancel(&job.thread_id, &job.id).await;
                return Ok(JobOutcome::TimedOut);
            }
        }
    }

    /// Best-effort cancel. Permission and already-terminal errors are
    /// logged and swallowed.
    pub async fn cancel(&self, thread_id: &str, job_id: &str) {
        if let Err(e) = self.backend.cancel_job(thread_id, job_id).await {
            tracing::warn!(job_id, error = %e, "job cancel failed");
        }
    }
}
