//! Free-text input evaluation.
//!
//! Judges whether member input satisfies an input event's success
//! condition. Empty conditions succeed locally; everything else is
//! delegated to the scene's evaluator identity and the reply parsed
//! defensively (one bare-key salvage pass, never more).

use crate::error::{Error, Result};
use crate::model::{CastMemberId, Event, Experience};
use crate::orchestrator::{JobOrchestrator, JobOutcome};
use crate::store::CastRegistry;
use serde_json::Value;
use std::sync::Arc;

/// Evaluates input events against their success conditions.
#[derive(Clone)]
pub struct InputEvaluator {
    orchestrator: JobOrchestrator,
    registry: Arc<dyn CastRegistry>,
}

impl InputEvaluator {
    pub fn new(orchestrator: JobOrchestrator, registry: Arc<dyn CastRegistry>) -> Self {
        Self {
            orchestrator,
            registry,
        }
    }

    /// Evaluate `member_input` against the event's condition, updating the
    /// event's completion/follow-up and the experience variables in place.
    ///
    /// With no member input the event is returned unresolved so "what
    /// should I show now" queries stay idempotent.
    pub async fn evaluate(
        &self,
        event: &mut Event,
        experience: &mut Experience,
        member_input: Option<&Value>,
        evaluator: Option<CastMemberId>,
        advisor_thread: &str,
    ) -> Result<()> {
        let spec = match event.input.clone() {
            Some(spec) => spec,
            None => return Ok(()),
        };

        let Some(raw_input) = member_input else {
            event.complete = false;
            return Ok(());
        };
        let input = normalize(raw_input);
        if input.is_empty() {
            event.complete = false;
            return Ok(());
        }
        event.text = Some(input.clone());

        // Cheap local success: no condition means any non-empty input wins
        // without consulting the evaluator.
        let condition = spec.condition.as_ref().filter(|c| !c.is_empty());
        let Some(condition) = condition else {
            event.complete = true;
            return Ok(());
        };

        let evaluator = evaluator.ok_or_else(|| {
            Error::Validation(format!(
                "event {} has a condition but its scene names no evaluator",
                event.id
            ))
        })?;
        let binding = self.registry.resolve_binding(evaluator).await?;
        let identity = binding
            .llm_identity
            .ok_or_else(|| Error::UnboundCastMember(evaluator.to_string()))?;

        let mut prompt = format!(
            "CONDITION: {}\nRESPONSE: {}",
            condition.as_prompt_text(),
            input
        );
        if let Some(outcome) = spec.outcome.as_deref() {
            prompt.push_str(&format!(
                "\nOUTCOME: return JSON-parsable object = {outcome}"
            ));
        }

        let outcome = self
            .orchestrator
            .submit(advisor_thread, &identity, &prompt)
            .await?;
        let reply = match &outcome {
            JobOutcome::Completed { .. } => match outcome.latest_text() {
                Some(text) => text.to_string(),
                None => {
                    tracing::warn!(event = %event.id, "evaluator returned no messages");
                    event.complete = false;
                    event.followup = Some(spec.followup.clone());
                    return Ok(());
                }
            },
            JobOutcome::Unsuccessful { status, reason } => {
                tracing::warn!(?status, %reason, "evaluation degraded to failed attempt");
                event.complete = false;
                event.followup = Some(spec.followup.clone());
                return Ok(());
            }
            JobOutcome::TimedOut => {
                tracing::warn!(event = %event.id, "evaluation timed out");
                event.complete = false;
                event.followup = Some(spec.followup.clone());
                return Ok(());
            }
        };

        let parsed = parse_structured(&reply)?;

        if is_success(&parsed) {
            event.complete = true;
            event.followup = None;

            let raw = Value::Object(parsed.clone()).to_string();
            let outcome_obj = parsed.get("outcome").and_then(Value::as_object);
            for name in &spec.variables {
                // Outcome field, then top-level field, then the previous
                // value, then the raw object.
                let value = outcome_obj
                    .and_then(|o| o.get(name))
                    .or_else(|| parsed.get(name))
                    .map(value_to_string)
                    .or_else(|| experience.variables.get(name).cloned())
                    .unwrap_or_else(|| raw.clone());
                experience.variables.insert(name.clone(), value);
            }
        } else {
            event.complete = false;
            let followup = parsed
                .get("followup")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| spec.followup.clone());
            event.followup = Some(followup);
        }

        Ok(())
    }
}

/// Collapse member input to a plain string: arrays and objects yield their
/// first value, scalars render directly.
pub fn normalize(input: &Value) -> String {
    match input {
        Value::String(s) => s.trim().to_string(),
        Value::Array(items) => items.first().map(normalize).unwrap_or_default(),
        Value::Object(map) => map.values().next().map(normalize).unwrap_or_default(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Whether a parsed evaluator reply declares success: an explicit truthy
/// `success` field, or (absent that field) any non-empty object treated as
/// raw structured output.
fn is_success(parsed: &serde_json::Map<String, Value>) -> bool {
    match parsed.get("success") {
        Some(value) => is_truthy(value),
        None => !parsed.is_empty(),
    }
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn value_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Defensively parse an evaluator reply as a JSON object.
///
/// Strips embedded newlines, slices the substring between the first `{`
/// and the last `}`, and parses. One recovery pass quotes bare object keys
/// before a single retry; a second failure propagates.
pub fn parse_structured(reply: &str) -> Result<serde_json::Map<String, Value>> {
    let flat: String = reply.chars().filter(|c| *c != '\n' && *c != '\r').collect();
    let start = flat
        .find('{')
        .ok_or_else(|| Error::Parse(format!("no object in reply: {reply}")))?;
    let end = flat
        .rfind('}')
        .filter(|end| *end > start)
        .ok_or_else(|| Error::Parse(format!("unterminated object in reply: {reply}")))?;
    let slice = &flat[start..=end];

    match serde_json::from_str::<Value>(slice) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(Error::Parse(format!("expected object, got: {other}"))),
        Err(first_err) => {
            let salvaged = quote_bare_keys(slice);
            tracing::warn!(error = %first_err, "salvaging evaluator reply");
            match serde_json::from_str::<Value>(&salvaged) {
                Ok(Value::Object(map)) => Ok(map),
                _ => Err(Error::Parse(first_err.to_string())),
            }
        }
    }
}

/// Quote bare object keys (`{success: true}` → `{"success": true}`).
///
/// Deliberately narrow: identifiers in key position only. It is not a
/// relaxed JSON parser; anything else stays broken and fails the retry.
fn quote_bare_keys(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::with_capacity(input.len() + 16);
    let mut i = 0;
    let mut in_string = false;
    let mut expecting_key = false;

    while i < chars.len() {
        let c = chars[i];

        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                i += 1;
                out.push(chars[i]);
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '{' | ',' => {
                out.push(c);
                expecting_key = true;
                i += 1;
            }
            c if c.is_whitespace() => {
                out.push(c);
                i += 1;
            }
            c if expecting_key && (c.is_ascii_alphabetic() || c == '_' || c == '$') => {
                let ident_start = i;
                while i < chars.len()
                    && (chars[i].is_ascii_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let ident: String = chars[ident_start..i].iter().collect();

                // Only quote when the identifier is actually a key.
                let mut lookahead = i;
                while lookahead < chars.len() && chars[lookahead].is_whitespace() {
                    lookahead += 1;
                }
                if lookahead < chars.len() && chars[lookahead] == ':' {
                    out.push('"');
                    out.push_str(&ident);
                    out.push('"');
                } else {
                    out.push_str(&ident);
                }
                expecting_key = false;
            }
            _ => {
                expecting_key = false;
                out.push(c);
                i += 1;
            }
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, Condition, EventId, InputKind, InputSpec, DEFAULT_FOLLOWUP};
    use crate::orchestrator::OrchestratorConfig;
    use crate::testing::{templates, MockBackend, MockRegistry};
    use assistants::{Backend, JobStatus};
    use serde_json::json;
    use std::time::Duration;

    fn evaluator_for(backend: Arc<MockBackend>, registry: MockRegistry) -> InputEvaluator {
        let orchestrator = JobOrchestrator::new(
            backend,
            OrchestratorConfig {
                poll_interval: Duration::from_millis(1),
                timeout: Duration::from_millis(100),
            },
        );
        InputEvaluator::new(orchestrator, Arc::new(registry))
    }

    fn input_event(condition: Option<Condition>, variables: &[&str]) -> Event {
        Event {
            id: EventId::new(),
            order: 0,
            kind: ActionKind::Input,
            cast_member: None,
            dialog: None,
            input: Some(InputSpec {
                kind: InputKind::Text,
                prompt: Some("Tell me something".to_string()),
                condition,
                variables: variables.iter().map(|s| s.to_string()).collect(),
                followup: DEFAULT_FOLLOWUP.to_string(),
                outcome: Some("{mood}".to_string()),
            }),
            character: None,
            stage: None,
            text: None,
            followup: None,
            complete: false,
            skip: false,
        }
    }

    fn build_experience() -> Experience {
        Experience::from_template(templates::two_scene_template(), None).unwrap()
    }

    #[tokio::test]
    async fn test_no_input_stays_unresolved() {
        let backend = Arc::new(MockBackend::new());
        let evaluator = evaluator_for(backend.clone(), MockRegistry::new());
        let mut experience = build_experience();
        let mut event = input_event(Some(Condition::Text("anything".to_string())), &[]);

        evaluator
            .evaluate(&mut event, &mut experience, None, None, "t_advisor")
            .await
            .unwrap();
        assert!(!event.complete);
        assert_eq!(backend.create_job_count(), 0);
    }

    #[tokio::test]
    async fn test_empty_condition_is_local_success() {
        let backend = Arc::new(MockBackend::new());
        let evaluator = evaluator_for(backend.clone(), MockRegistry::new());
        let mut experience = build_experience();
        let mut event = input_event(None, &[]);

        evaluator
            .evaluate(
                &mut event,
                &mut experience,
                Some(&json!("sure")),
                None,
                "t_advisor",
            )
            .await
            .unwrap();
        assert!(event.complete);
        assert_eq!(backend.create_job_count(), 0);
    }

    #[tokio::test]
    async fn test_success_writes_variables() {
        let backend = Arc::new(MockBackend::new());
        backend.script_statuses(&[JobStatus::Completed]);
        backend.script_reply(r#"{"success":true,"outcome":{"mood":"happy"}}"#);
        let mut experience = build_experience();
        let evaluator_id = experience.cast[0].id;
        let registry = MockRegistry::new().with_binding(evaluator_id, Some("judge-1"));
        let evaluator = evaluator_for(backend.clone(), registry);

        let thread = backend.create_thread().await.unwrap();
        let mut event = input_event(
            Some(Condition::Text("expresses a feeling".to_string())),
            &["mood"],
        );

        evaluator
            .evaluate(
                &mut event,
                &mut experience,
                Some(&json!("I feel great")),
                Some(evaluator_id),
                &thread,
            )
            .await
            .unwrap();

        assert!(event.complete);
        assert_eq!(experience.variables.get("mood").unwrap(), "happy");
    }

    #[tokio::test]
    async fn test_top_level_field_fallback() {
        let backend = Arc::new(MockBackend::new());
        backend.script_statuses(&[JobStatus::Completed]);
        backend.script_reply(r#"{"success":true,"mood":"curious"}"#);
        let mut experience = build_experience();
        let evaluator_id = experience.cast[0].id;
        let registry = MockRegistry::new().with_binding(evaluator_id, Some("judge-1"));
        let evaluator = evaluator_for(backend.clone(), registry);

        let thread = backend.create_thread().await.unwrap();
        let mut event = input_event(Some(Condition::Text("c".to_string())), &["mood"]);

        evaluator
            .evaluate(
                &mut event,
                &mut experience,
                Some(&json!("hm")),
                Some(evaluator_id),
                &thread,
            )
            .await
            .unwrap();
        assert_eq!(experience.variables.get("mood").unwrap(), "curious");
    }

    #[tokio::test]
    async fn test_failure_updates_followup() {
        let backend = Arc::new(MockBackend::new());
        backend.script_statuses(&[JobStatus::Completed]);
        backend.script_reply(r#"{"success":false,"followup":"Closer! Name a color."}"#);
        let mut experience = build_experience();
        let evaluator_id = experience.cast[0].id;
        let registry = MockRegistry::new().with_binding(evaluator_id, Some("judge-1"));
        let evaluator = evaluator_for(backend.clone(), registry);

        let thread = backend.create_thread().await.unwrap();
        let mut event = input_event(Some(Condition::Text("names a color".to_string())), &[]);

        evaluator
            .evaluate(
                &mut event,
                &mut experience,
                Some(&json!("a dog")),
                Some(evaluator_id),
                &thread,
            )
            .await
            .unwrap();
        assert!(!event.complete);
        assert_eq!(event.followup.as_deref(), Some("Closer! Name a color."));
    }

    #[tokio::test]
    async fn test_timeout_is_soft_failure() {
        let backend = Arc::new(MockBackend::new());
        backend.script_statuses(&[JobStatus::InProgress]);
        backend.hold_in_progress();
        let mut experience = build_experience();
        let evaluator_id = experience.cast[0].id;
        let registry = MockRegistry::new().with_binding(evaluator_id, Some("judge-1"));
        let orchestrator = JobOrchestrator::new(
            backend.clone(),
            OrchestratorConfig {
                poll_interval: Duration::from_millis(1),
                timeout: Duration::from_millis(10),
            },
        );
        let evaluator = InputEvaluator::new(orchestrator, Arc::new(registry));

        let thread = backend.create_thread().await.unwrap();
        let mut event = input_event(Some(Condition::Text("anything".to_string())), &[]);

        evaluator
            .evaluate(
                &mut event,
                &mut experience,
                Some(&json!("hi")),
                Some(evaluator_id),
                &thread,
            )
            .await
            .unwrap();
        assert!(!event.complete);
        assert_eq!(event.followup.as_deref(), Some(DEFAULT_FOLLOWUP));
    }

    #[test]
    fn test_normalize_collapses_collections() {
        assert_eq!(normalize(&json!("  hi  ")), "hi");
        assert_eq!(normalize(&json!(["first", "second"])), "first");
        assert_eq!(normalize(&json!({"a": "value"})), "value");
        assert_eq!(normalize(&json!(42)), "42");
        assert_eq!(normalize(&json!(null)), "");
    }

    #[test]
    fn test_parse_plain_object() {
        let parsed = parse_structured(r#"{"success": true}"#).unwrap();
        assert_eq!(parsed.get("success"), Some(&json!(true)));
    }

    #[test]
    fn test_parse_slices_surrounding_prose() {
        let parsed =
            parse_structured("Here you go:\n{\"success\": true}\nHope that helps!").unwrap();
        assert_eq!(parsed.get("success"), Some(&json!(true)));
    }

    #[test]
    fn test_parse_recovers_bare_keys() {
        let parsed = parse_structured("{success: true, mood: \"happy\"}").unwrap();
        assert_eq!(parsed.get("success"), Some(&json!(true)));
        assert_eq!(parsed.get("mood"), Some(&json!("happy")));
    }

    #[test]
    fn test_parse_fails_after_single_recovery() {
        let err = parse_structured("{success: }").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_parse_rejects_replies_without_object() {
        let err = parse_structured("yes, definitely").unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn test_success_detection() {
        let obj = |s: &str| parse_structured(s).unwrap();
        assert!(is_success(&obj(r#"{"success": true}"#)));
        assert!(is_success(&obj(r#"{"success": 1}"#)));
        assert!(is_success(&obj(r#"{"mood": "happy"}"#)));
        assert!(!is_success(&obj(r#"{"success": false}"#)));
        assert!(!is_success(&obj(r#"{"success": false, "followup": "no"}"#)));
        assert!(!is_success(&serde_json::Map::new()));
    }
}
