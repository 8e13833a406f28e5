//! Experience data model.
//!
//! Contains the aggregate root ([`Experience`]) and everything it owns:
//! scenes, events, cast members, the location pointer, and the variable
//! store. Also defines the template documents persisted by the platform
//! and the mapping layer that turns a declarative template into validated
//! runtime state ([`Experience::from_template`]).

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

// ============================================================================
// ID Types
// ============================================================================

macro_rules! id_type {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_type!(
    /// Unique identifier for experiences.
    ExperienceId
);
id_type!(
    /// Unique identifier for scenes.
    SceneId
);
id_type!(
    /// Unique identifier for events.
    EventId
);
id_type!(
    /// Unique identifier for cast members.
    CastMemberId
);

// ============================================================================
// Action kinds and payload specs
// ============================================================================

/// The kind of narrative beat an event represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Input,
    Dialog,
    Character,
    Stage,
    /// An action kind this engine does not process. Construction accepts
    /// it so authoring mistakes surface as a per-event error at play time,
    /// not as a rejected template.
    #[serde(other)]
    Unknown,
}

/// How a dialog event resolves its text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DialogKind {
    /// Static script table, indexed by the retry iteration.
    Script,
    /// Text generated by the cast member's bound LLM identity.
    Prompt,
    #[serde(other)]
    Unknown,
}

impl Default for DialogKind {
    fn default() -> Self {
        DialogKind::Script
    }
}

/// Dialog payload for an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DialogSpec {
    #[serde(default, rename = "type")]
    pub kind: DialogKind,

    /// Script lines. Templates may give a single string or an array.
    #[serde(default, deserialize_with = "one_or_many")]
    pub lines: Vec<String>,

    /// Prompt sent to the bound identity for `Prompt` dialogs.
    #[serde(default)]
    pub prompt: Option<String>,

    /// Optional example hint prefixed onto the prompt.
    #[serde(default)]
    pub example: Option<String>,

    /// Variable names eligible for substitution in this dialog's text.
    #[serde(default)]
    pub variables: Vec<String>,

    /// Replay previously rendered text for this event id instead of
    /// regenerating it.
    #[serde(default)]
    pub use_cache: bool,
}

/// The shape of member input an input event accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InputKind {
    Text,
    Choice,
}

impl Default for InputKind {
    fn default() -> Self {
        InputKind::Text
    }
}

/// Success condition for an input event.
///
/// Structured (object-valued) conditions are carried intact but evaluated
/// exactly like textual ones; multi-outcome branching is not implemented.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Condition {
    Text(String),
    Structured(serde_json::Map<String, serde_json::Value>),
}

impl Condition {
    /// Whether the condition is effectively absent, making any non-empty
    /// input an immediate local success.
    pub fn is_empty(&self) -> bool {
        match self {
            Condition::Text(text) => text.trim().is_empty(),
            Condition::Structured(map) => map.is_empty(),
        }
    }

    /// Render the condition for the evaluation prompt.
    pub fn as_prompt_text(&self) -> String {
        match self {
            Condition::Text(text) => text.clone(),
            Condition::Structured(map) => {
                serde_json::Value::Object(map.clone()).to_string()
            }
        }
    }
}

/// Default follow-up shown when an input attempt does not satisfy the
/// condition and the evaluator supplied no better one.
pub const DEFAULT_FOLLOWUP: &str = "That's not quite it. Try again?";

fn default_followup() -> String {
    DEFAULT_FOLLOWUP.to_string()
}

/// Input payload for an event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    #[serde(default, rename = "type")]
    pub kind: InputKind,

    /// The question or instruction presented to the member.
    #[serde(default)]
    pub prompt: Option<String>,

    /// Success condition. Absent or blank means any non-empty input
    /// succeeds without consulting the evaluator.
    #[serde(default)]
    pub condition: Option<Condition>,

    /// Variable names written into the experience on success.
    #[serde(default)]
    pub variables: Vec<String>,

    /// Message shown after a failed attempt.
    #[serde(default = "default_followup")]
    pub followup: String,

    /// Description of the JSON object the evaluator should return.
    #[serde(default)]
    pub outcome: Option<String>,
}

/// Character payload: a presentation update for one cast member.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CharacterCue {
    #[serde(default)]
    pub cast_member: Option<CastMemberId>,
    #[serde(default)]
    pub direction: String,
}

/// Synthetic boundary markers emitted by the navigator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Marker {
    SceneEnd,
    ExperienceEnd,
}

/// Stage payload: a directive for the presentation layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCue {
    #[serde(default)]
    pub directive: String,
    #[serde(default)]
    pub marker: Option<Marker>,
}

// ============================================================================
// Runtime types
// ============================================================================

/// An atomic narrative beat. A fresh instance is built per visit; completed
/// instances accumulate in the experience history for cache lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub order: u32,
    pub kind: ActionKind,
    #[serde(default)]
    pub cast_member: Option<CastMemberId>,
    #[serde(default)]
    pub dialog: Option<DialogSpec>,
    #[serde(default)]
    pub input: Option<InputSpec>,
    #[serde(default)]
    pub character: Option<CharacterCue>,
    #[serde(default)]
    pub stage: Option<StageCue>,

    /// Rendered dialog text for this visit.
    #[serde(default)]
    pub text: Option<String>,
    /// Follow-up produced by a failed input evaluation.
    #[serde(default)]
    pub followup: Option<String>,
    #[serde(default)]
    pub complete: bool,
    #[serde(default)]
    pub skip: bool,
}

impl Event {
    fn marker(kind: Marker, title: &str) -> Self {
        Self {
            id: EventId::new(),
            order: 0,
            kind: ActionKind::Stage,
            cast_member: None,
            dialog: None,
            input: None,
            character: None,
            stage: Some(StageCue {
                directive: title.to_string(),
                marker: Some(kind),
            }),
            text: None,
            followup: None,
            complete: true,
            skip: false,
        }
    }

    /// Synthetic marker closing a scene, carrying the scene title.
    pub fn scene_end(title: &str) -> Self {
        Self::marker(Marker::SceneEnd, title)
    }

    /// Synthetic marker closing the experience, carrying its title.
    pub fn experience_end(title: &str) -> Self {
        Self::marker(Marker::ExperienceEnd, title)
    }

    /// The sanitized view handed back to callers. Success conditions,
    /// outcome specs, and prompt internals never leave the engine.
    pub fn payload(&self) -> EventPayload {
        EventPayload {
            id: self.id,
            kind: self.kind,
            cast_member: self.cast_member,
            text: self.text.clone(),
            input_prompt: self.input.as_ref().and_then(|i| i.prompt.clone()),
            followup: self.followup.clone(),
            character: self.character.clone(),
            stage: self.stage.clone(),
            complete: self.complete,
        }
    }
}

/// Member-facing projection of a resolved event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventPayload {
    pub id: EventId,
    pub kind: ActionKind,
    pub cast_member: Option<CastMemberId>,
    pub text: Option<String>,
    pub input_prompt: Option<String>,
    pub followup: Option<String>,
    pub character: Option<CharacterCue>,
    pub stage: Option<StageCue>,
    pub complete: bool,
}

/// An ordered group of events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub id: SceneId,
    pub order: u32,
    pub title: String,
    pub required: bool,
    pub skippable: bool,
    /// Cast member whose bound identity judges this scene's input events.
    pub evaluator: Option<CastMemberId>,
    /// Prototype events, sorted by `order`. The navigator clones a fresh
    /// instance per visit.
    pub events: Vec<Event>,
}

impl Scene {
    /// Find an event prototype by id.
    pub fn event(&self, id: EventId) -> Option<&Event> {
        self.events.iter().find(|e| e.id == id)
    }

    /// Index of an event within the scene's play order.
    pub fn event_index(&self, id: EventId) -> Option<usize> {
        self.events.iter().position(|e| e.id == id)
    }
}

/// A narrative role. The LLM identity behind it is not owned here; it is
/// looked up from the platform's bot registry by id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastMember {
    pub id: CastMemberId,
    pub name: String,
    pub role: String,
}

/// The single navigation pointer of an experience.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    pub scene_id: SceneId,
    pub event_id: EventId,
    /// Retry count for the current event. Resets to 0 whenever an event
    /// completes, increments on each incomplete attempt.
    pub iteration: u32,
    pub completed: bool,
}

/// Member identity facts used to seed generic variable defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MemberProfile {
    pub member_name: String,
    #[serde(default)]
    pub avatar_name: Option<String>,
}

// ============================================================================
// Template documents
// ============================================================================

/// Persisted experience template, as returned by the experience store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExperienceDoc {
    #[serde(default)]
    pub id: ExperienceId,
    pub title: String,
    pub scenes: Vec<SceneDoc>,
    pub cast: Vec<CastMemberDoc>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
    /// Optional explicit starting position. Defaults to the first event of
    /// the first scene in play order.
    #[serde(default)]
    pub start: Option<StartRef>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneDoc {
    #[serde(default)]
    pub id: SceneId,
    pub order: u32,
    pub title: String,
    #[serde(default = "default_true")]
    pub required: bool,
    #[serde(default)]
    pub skippable: bool,
    #[serde(default)]
    pub evaluator: Option<CastMemberId>,
    pub events: Vec<EventDoc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventDoc {
    #[serde(default)]
    pub id: EventId,
    pub order: u32,
    pub action: ActionKind,
    #[serde(default)]
    pub cast_member: Option<CastMemberId>,
    #[serde(default)]
    pub dialog: Option<DialogSpec>,
    #[serde(default)]
    pub input: Option<InputSpec>,
    #[serde(default)]
    pub character: Option<CharacterCue>,
    #[serde(default)]
    pub stage: Option<StageCue>,
    #[serde(default)]
    pub skip: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct StartRef {
    pub scene: SceneId,
    pub event: EventId,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastMemberDoc {
    #[serde(default)]
    pub id: CastMemberId,
    pub name: String,
    #[serde(default)]
    pub role: String,
}

fn default_true() -> bool {
    true
}

impl EventDoc {
    fn into_event(self) -> Event {
        Event {
            id: self.id,
            order: self.order,
            kind: self.action,
            cast_member: self.cast_member,
            dialog: self.dialog,
            input: self.input,
            character: self.character,
            stage: self.stage,
            text: None,
            followup: None,
            complete: false,
            skip: self.skip,
        }
    }
}

// ============================================================================
// Experience aggregate
// ============================================================================

/// A playable, stateful scripted narrative instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Experience {
    pub id: ExperienceId,
    pub title: String,
    /// Scenes sorted ascending by `order`, input order breaking ties.
    pub scenes: Vec<Scene>,
    pub cast: Vec<CastMember>,
    pub variables: HashMap<String, String>,
    pub location: Location,
    /// Every event resolved during this session, in resolution order.
    pub events: Vec<Event>,
    pub completed: bool,
}

impl Experience {
    /// Build a validated experience from its persisted template.
    ///
    /// Scenes and events are stably sorted by `order`. Empty scene lists,
    /// empty event lists, an empty cast, or a start reference pointing
    /// outside the graph are all rejected here so they can never become
    /// runtime states.
    pub fn from_template(doc: ExperienceDoc, profile: Option<&MemberProfile>) -> Result<Self> {
        if doc.scenes.is_empty() {
            return Err(Error::Validation(format!(
                "experience '{}' has no scenes",
                doc.title
            )));
        }
        if doc.cast.is_empty() {
            return Err(Error::Validation(format!(
                "experience '{}' has no cast",
                doc.title
            )));
        }

        let mut scenes = Vec::with_capacity(doc.scenes.len());
        for scene_doc in doc.scenes {
            if scene_doc.events.is_empty() {
                return Err(Error::Validation(format!(
                    "scene '{}' has no events",
                    scene_doc.title
                )));
            }
            let mut events: Vec<Event> = scene_doc
                .events
                .into_iter()
                .map(EventDoc::into_event)
                .collect();
            events.sort_by_key(|e| e.order);
            scenes.push(Scene {
                id: scene_doc.id,
                order: scene_doc.order,
                title: scene_doc.title,
                required: scene_doc.required,
                skippable: scene_doc.skippable,
                evaluator: scene_doc.evaluator,
                events,
            });
        }
        scenes.sort_by_key(|s| s.order);

        let cast: Vec<CastMember> = doc
            .cast
            .into_iter()
            .map(|c| CastMember {
                id: c.id,
                name: c.name,
                role: c.role,
            })
            .collect();

        let location = match doc.start {
            Some(start) => {
                let scene = scenes
                    .iter()
                    .find(|s| s.id == start.scene)
                    .ok_or_else(|| {
                        Error::Validation(format!("start scene {} not in template", start.scene))
                    })?;
                if scene.event(start.event).is_none() {
                    return Err(Error::Validation(format!(
                        "start event {} not in scene '{}'",
                        start.event, scene.title
                    )));
                }
                Location {
                    scene_id: start.scene,
                    event_id: start.event,
                    iteration: 0,
                    completed: false,
                }
            }
            None => Location {
                scene_id: scenes[0].id,
                event_id: scenes[0].events[0].id,
                iteration: 0,
                completed: false,
            },
        };

        let mut variables = doc.variables;
        if let Some(profile) = profile {
            crate::vars::seed_avatar_defaults(&mut variables, profile);
        }

        Ok(Self {
            id: doc.id,
            title: doc.title,
            scenes,
            cast,
            variables,
            location,
            events: Vec::new(),
            completed: false,
        })
    }

    /// Find a scene by id.
    pub fn scene(&self, id: SceneId) -> Result<&Scene> {
        self.scenes.iter().find(|s| s.id == id).ok_or(Error::NotFound {
            kind: "scene",
            id: id.to_string(),
        })
    }

    /// Find a cast member by id.
    pub fn cast_member(&self, id: CastMemberId) -> Result<&CastMember> {
        self.cast.iter().find(|c| c.id == id).ok_or(Error::NotFound {
            kind: "cast member",
            id: id.to_string(),
        })
    }

    /// Most recent historical event with the given id, for cache replay.
    pub fn cached_event(&self, id: EventId) -> Option<&Event> {
        self.events.iter().rev().find(|e| e.id == id)
    }

    /// Record a resolved event into the session history.
    pub fn record(&mut self, event: Event) {
        self.events.push(event);
    }
}

// ============================================================================
// Lived experience archive
// ============================================================================

/// Archived summary of a finished (or force-ended) experience.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivedExperience {
    pub id: Uuid,
    pub experience_id: ExperienceId,
    pub member_id: Option<String>,
    pub title: String,
    pub completed: bool,
    pub variables: HashMap<String, String>,
    /// Sanitized transcript of every resolved event.
    pub transcript: Vec<EventPayload>,
    pub ended_at: DateTime<Utc>,
}

impl LivedExperience {
    /// Summarize an experience as it stands right now.
    pub fn from_experience(experience: &Experience, member_id: Option<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            experience_id: experience.id,
            member_id,
            title: experience.title.clone(),
            completed: experience.completed,
            variables: experience.variables.clone(),
            transcript: experience.events.iter().map(Event::payload).collect(),
            ended_at: Utc::now(),
        }
    }
}

// ============================================================================
// Serde helpers
// ============================================================================

/// Accept either a single string or an array of strings for script lines.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(line) => vec![line],
        OneOrMany::Many(lines) => lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::templates;

    #[test]
    fn test_empty_scenes_rejected() {
        let doc = ExperienceDoc {
            id: ExperienceId::new(),
            title: "Empty".to_string(),
            scenes: vec![],
            cast: vec![CastMemberDoc {
                id: CastMemberId::new(),
                name: "Nova".to_string(),
                role: "guide".to_string(),
            }],
            variables: HashMap::new(),
            start: None,
        };
        let err = Experience::from_template(doc, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_empty_events_rejected() {
        let mut doc = templates::two_scene_template();
        doc.scenes[0].events.clear();
        let err = Experience::from_template(doc, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_empty_cast_rejected() {
        let mut doc = templates::two_scene_template();
        doc.cast.clear();
        let err = Experience::from_template(doc, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_out_of_range_start_rejected() {
        let mut doc = templates::two_scene_template();
        doc.start = Some(StartRef {
            scene: doc.scenes[0].id,
            event: EventId::new(),
        });
        let err = Experience::from_template(doc, None).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_scenes_sorted_by_order() {
        let mut doc = templates::two_scene_template();
        // Present scenes out of order; construction must sort them.
        doc.scenes.reverse();
        let experience = Experience::from_template(doc, None).unwrap();
        assert!(experience.scenes[0].order <= experience.scenes[1].order);
        for scene in &experience.scenes {
            for pair in scene.events.windows(2) {
                assert!(pair[0].order <= pair[1].order);
            }
        }
    }

    #[test]
    fn test_order_ties_keep_input_order() {
        let mut doc = templates::two_scene_template();
        for event in &mut doc.scenes[0].events {
            event.order = 5;
        }
        let first_id = doc.scenes[0].events[0].id;
        let experience = Experience::from_template(doc, None).unwrap();
        assert_eq!(experience.scenes[0].events[0].id, first_id);
    }

    #[test]
    fn test_default_start_is_first_event() {
        let doc = templates::two_scene_template();
        let first_scene = doc.scenes.iter().min_by_key(|s| s.order).unwrap();
        let expected_scene = first_scene.id;
        let expected_event = first_scene.events[0].id;
        let experience = Experience::from_template(doc, None).unwrap();
        assert_eq!(experience.location.scene_id, expected_scene);
        assert_eq!(experience.location.event_id, expected_event);
        assert_eq!(experience.location.iteration, 0);
        assert!(!experience.location.completed);
    }

    #[test]
    fn test_avatar_defaults_seeded() {
        let doc = templates::two_scene_template();
        let profile = MemberProfile {
            member_name: "Robin".to_string(),
            avatar_name: Some("Pix".to_string()),
        };
        let experience = Experience::from_template(doc, Some(&profile)).unwrap();
        assert_eq!(experience.variables.get("member_name").unwrap(), "Robin");
        assert_eq!(experience.variables.get("avatar_name").unwrap(), "Pix");
    }

    #[test]
    fn test_payload_strips_condition() {
        let event = Event {
            id: EventId::new(),
            order: 0,
            kind: ActionKind::Input,
            cast_member: None,
            dialog: None,
            input: Some(InputSpec {
                kind: InputKind::Text,
                prompt: Some("What's the password?".to_string()),
                condition: Some(Condition::Text("says swordfish".to_string())),
                variables: vec![],
                followup: default_followup(),
                outcome: None,
            }),
            character: None,
            stage: None,
            text: None,
            followup: None,
            complete: false,
            skip: false,
        };
        let payload = event.payload();
        assert_eq!(payload.input_prompt.as_deref(), Some("What's the password?"));
        let json = serde_json::to_string(&payload).unwrap();
        assert!(!json.contains("swordfish"));
    }

    #[test]
    fn test_dialog_lines_one_or_many() {
        let single: DialogSpec =
            serde_json::from_str(r#"{"type":"script","lines":"Hi"}"#).unwrap();
        assert_eq!(single.lines, vec!["Hi"]);

        let many: DialogSpec =
            serde_json::from_str(r#"{"type":"script","lines":["Hi","Hello"]}"#).unwrap();
        assert_eq!(many.lines, vec!["Hi", "Hello"]);
    }

    #[test]
    fn test_unknown_action_kind_accepted_at_parse() {
        let doc: EventDoc =
            serde_json::from_str(r#"{"order":1,"action":"teleport"}"#).unwrap();
        assert_eq!(doc.action, ActionKind::Unknown);
    }

    #[test]
    fn test_condition_emptiness() {
        assert!(Condition::Text("  ".to_string()).is_empty());
        assert!(!Condition::Text("names a color".to_string()).is_empty());
        assert!(Condition::Structured(serde_json::Map::new()).is_empty());
    }

    #[test]
    fn test_structured_condition_prompt_text() {
        let mut map = serde_json::Map::new();
        map.insert("happy".to_string(), serde_json::json!("cheers up"));
        let condition = Condition::Structured(map);
        assert!(condition.as_prompt_text().contains("cheers up"));
    }
}
