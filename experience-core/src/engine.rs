//! The experience engine facade.
//!
//! [`ExperienceEngine`] owns one playable experience and the conversation
//! threads behind it. Each [`play`](ExperienceEngine::play) call resolves
//! events from the current location forward until an input event blocks on
//! the member or the experience ends, returning the sanitized payloads in
//! resolution order.

use crate::dialog::DialogResolver;
use crate::error::Result;
use crate::input::{self, InputEvaluator};
use crate::model::{
    ActionKind, CastMember, EventId, EventPayload, Experience, ExperienceId, LivedExperience,
    Location, MemberProfile, SceneId,
};
use crate::navigator::{self, Advance};
use crate::orchestrator::{JobOrchestrator, OrchestratorConfig};
use crate::processor::EventProcessor;
use crate::store::{CastRegistry, ExperienceStore};
use assistants::{Backend, Role};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;

/// Everything an engine needs from the platform, bundled for construction.
#[derive(Clone)]
pub struct EngineContext {
    pub backend: Arc<dyn Backend>,
    pub store: Arc<dyn ExperienceStore>,
    pub registry: Arc<dyn CastRegistry>,
    pub config: OrchestratorConfig,
}

/// The two conversation threads an experience runs on. Created lazily on
/// the first turn that needs them.
#[derive(Default)]
struct Conversations {
    /// Member-visible transcript: their inputs and the rendered lines.
    member_thread: Option<String>,
    /// Working thread for prompt generation and input evaluation; never
    /// shown to the member.
    advisor_thread: Option<String>,
}

/// One event slot in the manifest. Kinds and ids only; payloads stay
/// inside the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRef {
    pub id: EventId,
    pub kind: ActionKind,
}

/// Summary of one scene for the manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneSummary {
    pub id: SceneId,
    pub title: String,
    pub order: u32,
    pub required: bool,
    pub skippable: bool,
    pub events: Vec<EventRef>,
    /// Whether the location pointer currently sits in this scene.
    pub current: bool,
}

/// Member-facing overview of an experience in progress.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub experience_id: ExperienceId,
    pub title: String,
    pub cast: Vec<CastMember>,
    pub scenes: Vec<SceneSummary>,
    pub completed: bool,
}

/// A running experience session.
pub struct ExperienceEngine {
    backend: Arc<dyn Backend>,
    store: Arc<dyn ExperienceStore>,
    processor: EventProcessor,
    conversations: Conversations,
    experience: Experience,
    member_id: Option<String>,
}

impl ExperienceEngine {
    /// Run an already-constructed experience.
    pub fn new(context: EngineContext, experience: Experience, member_id: Option<String>) -> Self {
        let orchestrator = JobOrchestrator::new(context.backend.clone(), context.config.clone());
        let processor = EventProcessor::new(
            DialogResolver::new(
                orchestrator.clone(),
                context.backend.clone(),
                context.registry.clone(),
            ),
            InputEvaluator::new(orchestrator, context.registry),
        );
        Self {
            backend: context.backend,
            store: context.store,
            processor,
            conversations: Conversations::default(),
            experience,
            member_id,
        }
    }

    /// Load a template from the store and start a fresh session on it.
    pub async fn start(
        context: EngineContext,
        experience_id: ExperienceId,
        member_id: Option<String>,
        profile: Option<&MemberProfile>,
    ) -> Result<Self> {
        let doc = context.store.load_template(experience_id).await?;
        let experience = Experience::from_template(doc, profile)?;
        Ok(Self::new(context, experience, member_id))
    }

    /// Play forward from the current location.
    ///
    /// `member_input` applies to the current event only; events resolved
    /// after it never see it. The turn ends when an input event is left
    /// incomplete (awaiting or retrying the member) or the experience
    /// ends, whichever comes first. A finished experience is archived
    /// before this returns its final payloads.
    pub async fn play(&mut self, member_input: Option<&Value>) -> Result<Vec<EventPayload>> {
        let mut payloads = Vec::new();
        if self.experience.completed {
            return Ok(payloads);
        }

        let (advisor_thread, member_thread) = self.ensure_threads().await?;

        let mut pending_input = member_input;
        if let Some(raw) = pending_input {
            let text = input::normalize(raw);
            if !text.is_empty() {
                self.backend
                    .post_message(&member_thread, Role::User, &text)
                    .await?;
            }
        }

        loop {
            let event = navigator::current_event(&self.experience)?;
            let processed = self
                .processor
                .process(
                    &mut self.experience,
                    event,
                    pending_input.take(),
                    &advisor_thread,
                    &member_thread,
                )
                .await?;
            payloads.push(processed.payload());

            match navigator::advance(&mut self.experience, &processed)? {
                Advance::Next => {}
                Advance::Retry { iteration } => {
                    tracing::debug!(event = %processed.id, iteration, "awaiting member input");
                    break;
                }
                Advance::SceneEnd { marker } => {
                    self.experience.record(marker.clone());
                    payloads.push(marker.payload());
                }
                Advance::ExperienceEnd { marker } => {
                    self.experience.record(marker.clone());
                    payloads.push(marker.payload());
                    self.archive().await?;
                    break;
                }
            }
        }

        Ok(payloads)
    }

    /// Force-end the session, archiving it as it stands.
    pub async fn end(&mut self) -> Result<LivedExperience> {
        self.archive().await
    }

    /// Member-facing overview: scene list and where the pointer sits.
    pub fn manifest(&self) -> Manifest {
        Manifest {
            experience_id: self.experience.id,
            title: self.experience.title.clone(),
            cast: self.experience.cast.clone(),
            scenes: self
                .experience
                .scenes
                .iter()
                .map(|scene| SceneSummary {
                    id: scene.id,
                    title: scene.title.clone(),
                    order: scene.order,
                    required: scene.required,
                    skippable: scene.skippable,
                    events: scene
                        .events
                        .iter()
                        .map(|e| EventRef {
                            id: e.id,
                            kind: e.kind,
                        })
                        .collect(),
                    current: scene.id == self.experience.location.scene_id,
                })
                .collect(),
            completed: self.experience.completed,
        }
    }

    pub fn location(&self) -> Location {
        self.experience.location
    }

    pub fn experience(&self) -> &Experience {
        &self.experience
    }

    async fn archive(&self) -> Result<LivedExperience> {
        let record = LivedExperience::from_experience(&self.experience, self.member_id.clone());
        self.store.save_lived(&record).await?;
        Ok(record)
    }

    async fn ensure_threads(&mut self) -> Result<(String, String)> {
        let advisor = match &self.conversations.advisor_thread {
            Some(id) => id.clone(),
            None => {
                let id = self.backend.create_thread().await?;
                self.conversations.advisor_thread = Some(id.clone());
                id
            }
        };
        let member = match &self.conversations.member_thread {
            Some(id) => id.clone(),
            None => {
                let id = self.backend.create_thread().await?;
                self.conversations.member_thread = Some(id.clone());
                id
            }
        };
        Ok((advisor, member))
    }
}
