//! Minimal client for an Assistants-style threads/jobs LLM backend.
//!
//! This crate provides a focused client for the backend's conversation API:
//! - Thread creation and message posting
//! - Job (inference run) creation, polling, and cancellation
//! - Tool output submission for jobs that require action
//!
//! The [`Backend`] trait abstracts the wire client so callers can run
//! against the real HTTP backend or an in-memory test double.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_BASE_URL: &str = "https://api.withassistants.dev/v1";

/// Errors that can occur when talking to the backend.
#[derive(Debug, Error)]
pub enum Error {
    #[error("API key not configured")]
    NoApiKey,

    #[error("Network error: {0}")]
    Network(String),

    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Another job is already active on this thread: {message}")]
    Conflict {
        /// Id of the currently active job, when the backend reports it.
        active_job_id: Option<String>,
        message: String,
    },

    #[error("Failed to parse response: {0}")]
    Parse(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

/// The role of a message author on a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

/// A message on a conversation thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadMessage {
    pub id: String,
    pub thread_id: String,
    /// Id of the job that produced this message, if any. Member and system
    /// messages posted directly onto the thread carry no job id.
    #[serde(default)]
    pub job_id: Option<String>,
    pub role: Role,
    pub text: String,
    /// Unix timestamp (seconds) of creation.
    #[serde(default)]
    pub created_at: u64,
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    InProgress,
    RequiresAction,
    Completed,
    Failed,
    Cancelling,
    Cancelled,
    Expired,
    /// A status this client does not know about. Pollers treat it as
    /// non-terminal and keep waiting.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    /// Whether the job has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::Failed | JobStatus::Cancelled | JobStatus::Expired
        )
    }
}

/// One asynchronous inference run against the backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub thread_id: String,
    pub status: JobStatus,
    /// Tool calls the job is blocked on, present when `status` is
    /// `RequiresAction`.
    #[serde(default)]
    pub required_action: Option<RequiredAction>,
    /// Failure detail for `Failed` / `Expired` jobs.
    #[serde(default)]
    pub last_error: Option<JobFailure>,
}

/// Tool calls a job needs resolved before it can continue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequiredAction {
    pub tool_calls: Vec<ToolCall>,
}

/// A structured side-effecting action requested by the model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Output for one resolved tool call, submitted back to the job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolOutput {
    pub tool_call_id: String,
    pub output: String,
}

/// Why a job ended unsuccessfully.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    #[serde(default)]
    pub code: Option<String>,
    pub message: String,
}

/// Client-side abstraction over the backend API.
///
/// The engine only ever talks to the backend through this trait; tests
/// substitute an in-memory implementation.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Create a new, empty conversation thread and return its id.
    async fn create_thread(&self) -> Result<String, Error>;

    /// Append a message to a thread.
    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> Result<ThreadMessage, Error>;

    /// Create a job on a thread, bound to the given model identity.
    ///
    /// Fails with [`Error::Conflict`] when another job is already active
    /// on the thread.
    async fn create_job(&self, thread_id: &str, identity: &str) -> Result<Job, Error>;

    /// Fetch the current state of a job.
    async fn get_job(&self, thread_id: &str, job_id: &str) -> Result<Job, Error>;

    /// Submit outputs for every tool call a job is blocked on. All outputs
    /// go up in a single request.
    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        job_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Job, Error>;

    /// Cancel a job. The backend may reject this if the job already
    /// reached a terminal state.
    async fn cancel_job(&self, thread_id: &str, job_id: &str) -> Result<(), Error>;

    /// List the messages on a thread, newest first.
    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, Error>;
}

/// HTTP client for the backend API.
#[derive(Clone)]
pub struct Assistants {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl Assistants {
    /// Create a new client with the given API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(std::time::Duration::from_secs(120))
                .connect_timeout(std::time::Duration::from_secs(30))
                .build()
                .expect("Failed to build HTTP client"),
            api_key: api_key.into(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// Create a client from the ASSISTANTS_API_KEY environment variable.
    pub fn from_env() -> Result<Self, Error> {
        let api_key = std::env::var("ASSISTANTS_API_KEY").map_err(|_| Error::NoApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Override the API base URL (e.g. for a staging backend).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_headers(&self) -> Result<HeaderMap, Error> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", self.api_key))
                .map_err(|e| Error::Config(format!("Invalid API key: {e}")))?,
        );
        Ok(headers)
    }

    async fn post<B, R>(&self, path: &str, body: Option<&B>) -> Result<R, Error>
    where
        B: Serialize + ?Sized,
        R: for<'de> Deserialize<'de>,
    {
        let headers = self.build_headers()?;
        let mut request = self
            .client
            .post(format!("{}{path}", self.base_url))
            .headers(headers);
        if let Some(body) = body {
            request = request.json(body);
        }
        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::parse_response(response).await
    }

    async fn get<R>(&self, path: &str) -> Result<R, Error>
    where
        R: for<'de> Deserialize<'de>,
    {
        let headers = self.build_headers()?;
        let response = self
            .client
            .get(format!("{}{path}", self.base_url))
            .headers(headers)
            .send()
            .await
            .map_err(|e| Error::Network(e.to_string()))?;
        Self::parse_response(response).await
    }

    async fn parse_response<R>(response: reqwest::Response) -> Result<R, Error>
    where
        R: for<'de> Deserialize<'de>,
    {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(api_error(status.as_u16(), &body));
        }
        response.json().await.map_err(|e| Error::Parse(e.to_string()))
    }
}

/// Map an unsuccessful HTTP response to an [`Error`], recognizing thread
/// conflicts so callers can recover.
fn api_error(status: u16, body: &str) -> Error {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
        #[serde(default)]
        active_job_id: Option<String>,
    }

    let detail: Option<ErrorDetail> = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .ok();

    if status == 409 {
        let (message, active_job_id) = match detail {
            Some(d) => (d.message, d.active_job_id),
            None => (body.to_string(), None),
        };
        return Error::Conflict {
            active_job_id,
            message,
        };
    }

    Error::Api {
        status,
        message: detail.map(|d| d.message).unwrap_or_else(|| body.to_string()),
    }
}

#[derive(Serialize)]
struct CreateJobBody<'a> {
    identity: &'a str,
}

#[derive(Serialize)]
struct PostMessageBody<'a> {
    role: Role,
    content: &'a str,
}

#[derive(Serialize)]
struct ToolOutputsBody {
    tool_outputs: Vec<ToolOutput>,
}

#[derive(Deserialize)]
struct CreatedThread {
    id: String,
}

#[derive(Deserialize)]
struct MessageList {
    data: Vec<ThreadMessage>,
}

#[async_trait]
impl Backend for Assistants {
    async fn create_thread(&self) -> Result<String, Error> {
        let created: CreatedThread = self.post::<(), _>("/threads", None).await?;
        Ok(created.id)
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> Result<ThreadMessage, Error> {
        self.post(
            &format!("/threads/{thread_id}/messages"),
            Some(&PostMessageBody {
                role,
                content: text,
            }),
        )
        .await
    }

    async fn create_job(&self, thread_id: &str, identity: &str) -> Result<Job, Error> {
        self.post(
            &format!("/threads/{thread_id}/jobs"),
            Some(&CreateJobBody { identity }),
        )
        .await
    }

    async fn get_job(&self, thread_id: &str, job_id: &str) -> Result<Job, Error> {
        self.get(&format!("/threads/{thread_id}/jobs/{job_id}")).await
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        job_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> Result<Job, Error> {
        self.post(
            &format!("/threads/{thread_id}/jobs/{job_id}/tool_outputs"),
            Some(&ToolOutputsBody {
                tool_outputs: outputs,
            }),
        )
        .await
    }

    async fn cancel_job(&self, thread_id: &str, job_id: &str) -> Result<(), Error> {
        let _: Job = self
            .post::<(), _>(&format!("/threads/{thread_id}/jobs/{job_id}/cancel"), None)
            .await?;
        Ok(())
    }

    async fn list_messages(&self, thread_id: &str) -> Result<Vec<ThreadMessage>, Error> {
        let list: MessageList = self.get(&format!("/threads/{thread_id}/messages")).await?;
        Ok(list.data)
    }
}
