//! Per-event processing cascade.
//!
//! Runs the fixed input → dialog → character → stage cascade for one
//! event, starting from the stage matching the event's action and falling
//! through the rest. A satisfied input short-circuits the remainder; every
//! other action kind completes by default once its stages run.

use crate::dialog::DialogResolver;
use crate::error::{Error, Result};
use crate::input::InputEvaluator;
use crate::model::{ActionKind, Event, Experience};
use serde_json::Value;

/// Orchestrates dialog resolution and input evaluation for single events.
#[derive(Clone)]
pub struct EventProcessor {
    dialog: DialogResolver,
    input: InputEvaluator,
}

impl EventProcessor {
    pub fn new(dialog: DialogResolver, input: InputEvaluator) -> Self {
        Self { dialog, input }
    }

    /// Process one event visit, resolving its stages and appending the
    /// result to the experience history. The caller advances the location
    /// pointer from the returned event's completion state.
    pub async fn process(
        &self,
        experience: &mut Experience,
        mut event: Event,
        member_input: Option<&Value>,
        advisor_thread: &str,
        member_thread: &str,
    ) -> Result<Event> {
        // Events flagged for skipping are recorded and stepped over
        // without resolution.
        if event.skip {
            event.complete = true;
            experience.record(event.clone());
            return Ok(event);
        }

        let first_stage = match event.kind {
            ActionKind::Input => 0,
            ActionKind::Dialog => 1,
            ActionKind::Character => 2,
            ActionKind::Stage => 3,
            ActionKind::Unknown => {
                return Err(Error::UnrecognizedAction(event.id.to_string()))
            }
        };

        let iteration = experience.location.iteration;
        let mut input_resolved = false;
        let mut input_pending = false;

        // The input stage runs only when the event actually declares an
        // input payload; an input-kind event without one falls straight
        // through and completes by default like any other action.
        if first_stage == 0 && event.input.is_some() {
            let evaluator = experience.scene(experience.location.scene_id)?.evaluator;
            self.input
                .evaluate(
                    &mut event,
                    experience,
                    member_input,
                    evaluator,
                    advisor_thread,
                )
                .await?;
            // A satisfied input fully resolves the event; nothing further
            // runs on this visit.
            input_resolved = event.complete;
            input_pending = !event.complete;
        }

        if !input_resolved {
            if first_stage <= 1 && event.dialog.is_some() {
                let text = self
                    .dialog
                    .resolve(&event, experience, iteration, advisor_thread, member_thread)
                    .await?;
                event.text = Some(text);
            }

            // Character and stage payloads are presentation directives;
            // they pass through on the event untouched.

            if !input_pending {
                event.complete = true;
            }
        }

        experience.record(event.clone());
        Ok(event)
    }
}
