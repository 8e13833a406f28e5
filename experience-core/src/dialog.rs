//! Dialog resolution.
//!
//! Produces the text for one narrative beat: either a line from a static
//! script table (indexed by the retry iteration) or text generated by the
//! cast member's bound LLM identity through the job orchestrator.

use crate::error::{Error, Result};
use crate::model::{DialogKind, Event, Experience};
use crate::orchestrator::{JobOrchestrator, JobOutcome};
use crate::store::CastRegistry;
use crate::vars;
use assistants::{Backend, Role};
use std::sync::Arc;

/// Line presented when a prompt dialog degrades (timeout or unsuccessful
/// job) instead of blocking the narrative.
pub const FALLBACK_LINE: &str = "Sorry, I lost my train of thought. Where were we?";

/// Resolves dialog events against the script table or the backend.
#[derive(Clone)]
pub struct DialogResolver {
    orchestrator: JobOrchestrator,
    backend: Arc<dyn Backend>,
    registry: Arc<dyn CastRegistry>,
}

impl DialogResolver {
    pub fn new(
        orchestrator: JobOrchestrator,
        backend: Arc<dyn Backend>,
        registry: Arc<dyn CastRegistry>,
    ) -> Self {
        Self {
            orchestrator,
            backend,
            registry,
        }
    }

    /// Resolve the text for a dialog event.
    ///
    /// With `use_cache` set and a prior visit in history, the previously
    /// rendered text is replayed so UI refreshes never regenerate.
    pub async fn resolve(
        &self,
        event: &Event,
        experience: &Experience,
        iteration: u32,
        advisor_thread: &str,
        member_thread: &str,
    ) -> Result<String> {
        let spec = event
            .dialog
            .as_ref()
            .ok_or_else(|| Error::Validation(format!("event {} has no dialog payload", event.id)))?;

        if spec.use_cache {
            if let Some(text) = experience
                .cached_event(event.id)
                .and_then(|prior| prior.text.clone())
            {
                return Ok(text);
            }
        }

        match spec.kind {
            DialogKind::Script => {
                if spec.lines.is_empty() {
                    return Err(Error::Validation(format!(
                        "script dialog on event {} has no content",
                        event.id
                    )));
                }
                // Iterations past the last line replay the final beat.
                let index = (iteration as usize).min(spec.lines.len() - 1);
                let line = &spec.lines[index];
                Ok(vars::substitute(line, &spec.variables, &experience.variables))
            }
            DialogKind::Prompt => {
                let prompt = spec.prompt.as_deref().ok_or_else(|| {
                    Error::Validation(format!("prompt dialog on event {} has no prompt", event.id))
                })?;
                let prompt = match spec.example.as_deref() {
                    Some(example) => format!("Example: {example}\n\n{prompt}"),
                    None => prompt.to_string(),
                };
                let prompt = vars::substitute(&prompt, &spec.variables, &experience.variables);

                let cast_id = event.cast_member.ok_or_else(|| {
                    Error::Validation(format!("prompt dialog on event {} has no cast member", event.id))
                })?;
                experience.cast_member(cast_id)?;
                let binding = self.registry.resolve_binding(cast_id).await?;
                let identity = binding
                    .llm_identity
                    .ok_or_else(|| Error::UnboundCastMember(cast_id.to_string()))?;

                let outcome = self
                    .orchestrator
                    .submit(advisor_thread, &identity, &prompt)
                    .await?;
                let text = match outcome {
                    JobOutcome::Completed { .. } => outcome
                        .latest_text()
                        .map(str::to_string)
                        .ok_or_else(|| Error::EmptyReply(advisor_thread.to_string()))?,
                    JobOutcome::Unsuccessful { status, reason } => {
                        tracing::warn!(?status, %reason, "prompt dialog degraded to fallback");
                        FALLBACK_LINE.to_string()
                    }
                    JobOutcome::TimedOut => {
                        tracing::warn!("prompt dialog timed out, using fallback");
                        FALLBACK_LINE.to_string()
                    }
                };

                // The advisor thread already holds the exchange; mirror the
                // rendered line onto the member-facing conversation.
                self.backend
                    .post_message(member_thread, Role::Assistant, &text)
                    .await?;

                Ok(text)
            }
            DialogKind::Unknown => Err(Error::UnrecognizedDialogType(format!(
                "event {}",
                event.id
            ))),
        }
    }
}
