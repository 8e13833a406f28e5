//! Test doubles and fixtures.
//!
//! [`MockBackend`] is a scriptable in-memory stand-in for the backend API:
//! tests queue up job statuses, replies, tool calls, and conflicts, then
//! inspect the calls the engine made. [`MockRegistry`] and [`MockStore`]
//! stand in for the platform collaborators. Everything here is also used
//! by the integration tests, so the module is compiled unconditionally.

use crate::engine::{EngineContext, ExperienceEngine};
use crate::error::{Error, Result};
use crate::model::{
    ActionKind, CastMemberDoc, CastMemberId, DialogKind, DialogSpec, EventDoc, EventId,
    EventPayload, ExperienceDoc, ExperienceId, LivedExperience, Marker, SceneDoc, SceneId,
};
use crate::orchestrator::OrchestratorConfig;
use crate::store::{CastBinding, CastRegistry, ExperienceStore};
use assistants::{
    Backend, Error as BackendError, Job, JobFailure, JobStatus, RequiredAction, Role,
    ThreadMessage, ToolCall, ToolOutput,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Mock backend
// ============================================================================

#[derive(Default)]
struct BackendState {
    threads: HashMap<String, Vec<ThreadMessage>>,
    /// Statuses jobs report, consumed in order: creation takes the first,
    /// each fetch the next.
    statuses: Vec<JobStatus>,
    status_cursor: usize,
    hold_in_progress: bool,
    pending_reply: Option<String>,
    pending_tool_calls: Vec<ToolCall>,
    conflicts: VecDeque<String>,
    submitted_outputs: Vec<ToolOutput>,
    next_id: u64,
    create_job_count: usize,
    cancel_count: usize,
}

impl BackendState {
    fn fresh_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{prefix}_{}", self.next_id)
    }

    fn next_status(&mut self) -> JobStatus {
        if self.status_cursor < self.statuses.len() {
            let status = self.statuses[self.status_cursor];
            self.status_cursor += 1;
            return status;
        }
        if self.hold_in_progress {
            JobStatus::InProgress
        } else {
            self.statuses
                .last()
                .copied()
                .unwrap_or(JobStatus::Completed)
        }
    }

    fn assemble_job(&mut self, job_id: String, thread_id: String) -> Job {
        let status = self.next_status();
        let mut job = Job {
            id: job_id,
            thread_id,
            status,
            required_action: None,
            last_error: None,
        };
        match status {
            JobStatus::RequiresAction => {
                job.required_action = Some(RequiredAction {
                    tool_calls: std::mem::take(&mut self.pending_tool_calls),
                });
            }
            JobStatus::Completed => {
                if let Some(text) = self.pending_reply.take() {
                    let message = ThreadMessage {
                        id: self.fresh_id("msg"),
                        thread_id: job.thread_id.clone(),
                        job_id: Some(job.id.clone()),
                        role: Role::Assistant,
                        text,
                        created_at: self.next_id,
                    };
                    self.threads
                        .entry(job.thread_id.clone())
                        .or_default()
                        .push(message);
                }
            }
            JobStatus::Failed | JobStatus::Expired => {
                job.last_error = Some(JobFailure {
                    code: None,
                    message: format!("job ended as {status:?}"),
                });
            }
            _ => {}
        }
        job
    }
}

/// Scriptable in-memory backend.
#[derive(Default)]
pub struct MockBackend {
    state: Mutex<BackendState>,
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the statuses jobs report. Job creation consumes the first
    /// entry, each subsequent fetch the next; an exhausted script repeats
    /// its last entry. Unscripted backends complete immediately.
    pub fn script_statuses(&self, statuses: &[JobStatus]) {
        let mut state = self.state.lock().unwrap();
        state.statuses = statuses.to_vec();
        state.status_cursor = 0;
    }

    /// After the scripted statuses run out, keep reporting `in_progress`
    /// instead of repeating the last entry. For timeout tests.
    pub fn hold_in_progress(&self) {
        self.state.lock().unwrap().hold_in_progress = true;
    }

    /// Text of the assistant message delivered when the next job reaches
    /// `completed`.
    pub fn script_reply(&self, text: &str) {
        self.state.lock().unwrap().pending_reply = Some(text.to_string());
    }

    /// Tool call attached the next time a job reports `requires_action`.
    pub fn script_tool_call(&self, name: &str, arguments: serde_json::Value) {
        let mut state = self.state.lock().unwrap();
        let id = state.fresh_id("call");
        state.pending_tool_calls.push(ToolCall {
            id,
            name: name.to_string(),
            arguments,
        });
    }

    /// Queue one conflict rejection for the next job creation, reporting
    /// `active_job_id` as the job already holding the thread.
    pub fn inject_conflict(&self, active_job_id: &str) {
        self.state
            .lock()
            .unwrap()
            .conflicts
            .push_back(active_job_id.to_string());
    }

    /// Number of job creation attempts, counting conflicted ones.
    pub fn create_job_count(&self) -> usize {
        self.state.lock().unwrap().create_job_count
    }

    pub fn cancel_count(&self) -> usize {
        self.state.lock().unwrap().cancel_count
    }

    /// Number of threads created so far.
    pub fn thread_count(&self) -> usize {
        self.state.lock().unwrap().threads.len()
    }

    /// Every tool output submitted back to a job, in submission order.
    pub fn submitted_outputs(&self) -> Vec<ToolOutput> {
        self.state.lock().unwrap().submitted_outputs.clone()
    }
}

#[async_trait]
impl Backend for MockBackend {
    async fn create_thread(&self) -> std::result::Result<String, BackendError> {
        let mut state = self.state.lock().unwrap();
        let id = state.fresh_id("thread");
        state.threads.insert(id.clone(), Vec::new());
        Ok(id)
    }

    async fn post_message(
        &self,
        thread_id: &str,
        role: Role,
        text: &str,
    ) -> std::result::Result<ThreadMessage, BackendError> {
        let mut state = self.state.lock().unwrap();
        let message = ThreadMessage {
            id: state.fresh_id("msg"),
            thread_id: thread_id.to_string(),
            job_id: None,
            role,
            text: text.to_string(),
            created_at: state.next_id,
        };
        state
            .threads
            .entry(thread_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn create_job(
        &self,
        thread_id: &str,
        _identity: &str,
    ) -> std::result::Result<Job, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.create_job_count += 1;
        if let Some(active) = state.conflicts.pop_front() {
            return Err(BackendError::Conflict {
                active_job_id: Some(active),
                message: "Thread already has an active job".to_string(),
            });
        }
        let job_id = state.fresh_id("job");
        Ok(state.assemble_job(job_id, thread_id.to_string()))
    }

    async fn get_job(
        &self,
        thread_id: &str,
        job_id: &str,
    ) -> std::result::Result<Job, BackendError> {
        let mut state = self.state.lock().unwrap();
        Ok(state.assemble_job(job_id.to_string(), thread_id.to_string()))
    }

    async fn submit_tool_outputs(
        &self,
        thread_id: &str,
        job_id: &str,
        outputs: Vec<ToolOutput>,
    ) -> std::result::Result<Job, BackendError> {
        let mut state = self.state.lock().unwrap();
        state.submitted_outputs.extend(outputs);
        Ok(state.assemble_job(job_id.to_string(), thread_id.to_string()))
    }

    async fn cancel_job(
        &self,
        _thread_id: &str,
        _job_id: &str,
    ) -> std::result::Result<(), BackendError> {
        self.state.lock().unwrap().cancel_count += 1;
        Ok(())
    }

    async fn list_messages(
        &self,
        thread_id: &str,
    ) -> std::result::Result<Vec<ThreadMessage>, BackendError> {
        let state = self.state.lock().unwrap();
        Ok(state
            .threads
            .get(thread_id)
            .map(|messages| messages.iter().rev().cloned().collect())
            .unwrap_or_default())
    }
}

// ============================================================================
// Mock collaborators
// ============================================================================

/// Cast registry backed by a plain map.
#[derive(Default, Clone)]
pub struct MockRegistry {
    bindings: HashMap<CastMemberId, CastBinding>,
}

impl MockRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a cast member to an optional LLM identity.
    pub fn with_binding(mut self, id: CastMemberId, identity: Option<&str>) -> Self {
        self.bindings.insert(
            id,
            CastBinding {
                llm_identity: identity.map(str::to_string),
                display_name: "Cast Member".to_string(),
            },
        );
        self
    }
}

#[async_trait]
impl CastRegistry for MockRegistry {
    async fn resolve_binding(&self, id: CastMemberId) -> Result<CastBinding> {
        self.bindings.get(&id).cloned().ok_or(Error::NotFound {
            kind: "cast binding",
            id: id.to_string(),
        })
    }
}

/// In-memory experience store.
#[derive(Default)]
pub struct MockStore {
    templates: Mutex<HashMap<ExperienceId, ExperienceDoc>>,
    lived: Mutex<Vec<LivedExperience>>,
}

impl MockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_template(self, doc: ExperienceDoc) -> Self {
        self.templates.lock().unwrap().insert(doc.id, doc);
        self
    }

    /// Every lived-experience record archived so far.
    pub fn saved(&self) -> Vec<LivedExperience> {
        self.lived.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExperienceStore for MockStore {
    async fn load_template(&self, id: ExperienceId) -> Result<ExperienceDoc> {
        self.templates
            .lock()
            .unwrap()
            .get(&id)
            .cloned()
            .ok_or(Error::NotFound {
                kind: "experience",
                id: id.to_string(),
            })
    }

    async fn load_lived(&self, member_id: &str) -> Result<Vec<LivedExperience>> {
        Ok(self
            .lived
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.member_id.as_deref() == Some(member_id))
            .cloned()
            .collect())
    }

    async fn save_lived(&self, record: &LivedExperience) -> Result<()> {
        self.lived.lock().unwrap().push(record.clone());
        Ok(())
    }
}

// ============================================================================
// Template fixtures
// ============================================================================

pub mod templates {
    use super::*;
    use std::collections::HashMap;

    /// Two scenes of two scripted dialog beats each, narrated by a single
    /// cast member who also evaluates inputs.
    pub fn two_scene_template() -> ExperienceDoc {
        let guide = CastMemberId::new();
        let scene = |order: u32, title: &str, lines: [&str; 2]| SceneDoc {
            id: SceneId::new(),
            order,
            title: title.to_string(),
            required: true,
            skippable: false,
            evaluator: Some(guide),
            events: lines
                .iter()
                .enumerate()
                .map(|(i, line)| EventDoc {
                    id: EventId::new(),
                    order: i as u32 + 1,
                    action: ActionKind::Dialog,
                    cast_member: Some(guide),
                    dialog: Some(DialogSpec {
                        kind: DialogKind::Script,
                        lines: vec![line.to_string()],
                        prompt: None,
                        example: None,
                        variables: vec![],
                        use_cache: false,
                    }),
                    input: None,
                    character: None,
                    stage: None,
                    skip: false,
                })
                .collect(),
        };

        ExperienceDoc {
            id: ExperienceId::new(),
            title: "Observatory Night".to_string(),
            scenes: vec![
                scene(
                    1,
                    "Arrival",
                    ["Welcome to the observatory.", "The dome creaks open."],
                ),
                scene(
                    2,
                    "Stargazing",
                    ["Look through the eyepiece.", "That smudge is a galaxy."],
                ),
            ],
            cast: vec![CastMemberDoc {
                id: guide,
                name: "Nova".to_string(),
                role: "guide".to_string(),
            }],
            variables: HashMap::new(),
            start: None,
        }
    }
}

// ============================================================================
// Test harness
// ============================================================================

/// An engine wired to fresh mocks with millisecond-scale polling, plus
/// handles to the mocks for scripting and inspection.
pub struct TestHarness {
    pub backend: Arc<MockBackend>,
    pub store: Arc<MockStore>,
    pub engine: ExperienceEngine,
}

impl TestHarness {
    pub async fn start(doc: ExperienceDoc, registry: MockRegistry) -> Self {
        Self::start_for_member(doc, registry, None).await
    }

    pub async fn start_for_member(
        doc: ExperienceDoc,
        registry: MockRegistry,
        member_id: Option<&str>,
    ) -> Self {
        let backend = Arc::new(MockBackend::new());
        let id = doc.id;
        let store = Arc::new(MockStore::new().with_template(doc));
        let context = EngineContext {
            backend: backend.clone(),
            store: store.clone(),
            registry: Arc::new(registry),
            config: OrchestratorConfig {
                poll_interval: Duration::from_millis(1),
                timeout: Duration::from_millis(200),
            },
        };
        let engine = ExperienceEngine::start(context, id, member_id.map(str::to_string), None)
            .await
            .expect("fixture template should construct");
        Self {
            backend,
            store,
            engine,
        }
    }
}

// ============================================================================
// Assertion helpers
// ============================================================================

/// Assert a payload carries the expected rendered text.
#[track_caller]
pub fn assert_payload_text(payload: &EventPayload, expected: &str) {
    assert_eq!(
        payload.text.as_deref(),
        Some(expected),
        "unexpected text on event {}",
        payload.id
    );
}

/// Assert a payload is a synthetic boundary marker of the expected kind.
#[track_caller]
pub fn assert_marker(payload: &EventPayload, expected: Marker) {
    let marker = payload.stage.as_ref().and_then(|s| s.marker);
    assert_eq!(
        marker,
        Some(expected),
        "expected {expected:?} marker on event {}",
        payload.id
    );
}
