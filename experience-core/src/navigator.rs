//! Scene/event navigation.
//!
//! Walks the ordered scene/event graph, advancing the experience's single
//! location pointer. Each state transition returns a typed [`Advance`]
//! outcome that the engine consumes synchronously; nothing is broadcast.

use crate::error::{Error, Result};
use crate::model::{Event, Experience};

/// Outcome of one advancement attempt.
#[derive(Debug, Clone)]
pub enum Advance {
    /// Moved to the next event in the same scene.
    Next,
    /// The event was incomplete; the pointer stays put and the iteration
    /// count is bumped for the retry.
    Retry { iteration: u32 },
    /// The scene is exhausted; moved to the first event of the next scene.
    /// Carries a synthetic marker event with the closed scene's title.
    SceneEnd { marker: Event },
    /// The last scene is exhausted; the experience is complete. Carries a
    /// synthetic marker event with the experience title.
    ExperienceEnd { marker: Event },
}

/// A fresh event instance for the current location.
///
/// Prototypes live on the scene; every visit gets its own instance so the
/// per-visit fields (rendered text, completion) never leak between turns.
pub fn current_event(experience: &Experience) -> Result<Event> {
    let location = experience.location;
    let scene = experience.scene(location.scene_id)?;
    let prototype = scene.event(location.event_id).ok_or(Error::NotFound {
        kind: "event",
        id: location.event_id.to_string(),
    })?;
    Ok(prototype.clone())
}

/// Advance the location pointer past a processed event.
///
/// An incomplete event holds the pointer and bumps the retry iteration.
/// A complete event moves to the next event in scene order, then to the
/// next scene by ascending `order`, and finally marks the experience
/// complete when nothing remains.
pub fn advance(experience: &mut Experience, processed: &Event) -> Result<Advance> {
    if !processed.complete {
        experience.location.iteration += 1;
        return Ok(Advance::Retry {
            iteration: experience.location.iteration,
        });
    }

    let location = experience.location;
    let scene_index = experience
        .scenes
        .iter()
        .position(|s| s.id == location.scene_id)
        .ok_or(Error::NotFound {
            kind: "scene",
            id: location.scene_id.to_string(),
        })?;
    let scene = &experience.scenes[scene_index];
    let event_index = scene.event_index(location.event_id).ok_or(Error::NotFound {
        kind: "event",
        id: location.event_id.to_string(),
    })?;

    experience.location.iteration = 0;

    if let Some(next_event) = scene.events.get(event_index + 1) {
        experience.location.event_id = next_event.id;
        return Ok(Advance::Next);
    }

    // Scenes are kept sorted by order at construction, so the next scene
    // in the vec is the next scene in play order.
    let closed_title = scene.title.clone();
    if let Some(next_scene) = experience.scenes.get(scene_index + 1) {
        experience.location.scene_id = next_scene.id;
        experience.location.event_id = next_scene.events[0].id;
        return Ok(Advance::SceneEnd {
            marker: Event::scene_end(&closed_title),
        });
    }

    experience.location.completed = true;
    experience.completed = true;
    Ok(Advance::ExperienceEnd {
        marker: Event::experience_end(&experience.title),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ActionKind, Marker};
    use crate::testing::templates;

    fn build() -> Experience {
        Experience::from_template(templates::two_scene_template(), None).unwrap()
    }

    #[test]
    fn test_current_event_matches_location() {
        let experience = build();
        let event = current_event(&experience).unwrap();
        assert_eq!(event.id, experience.location.event_id);
        assert!(!event.complete);
    }

    #[test]
    fn test_advance_within_scene() {
        let mut experience = build();
        let mut event = current_event(&experience).unwrap();
        event.complete = true;

        let outcome = advance(&mut experience, &event).unwrap();
        assert!(matches!(outcome, Advance::Next));
        assert_eq!(
            experience.location.scene_id,
            experience.scenes[0].id
        );
        assert_eq!(
            experience.location.event_id,
            experience.scenes[0].events[1].id
        );
    }

    #[test]
    fn test_incomplete_event_bumps_iteration_only() {
        let mut experience = build();
        let before = experience.location;
        let event = current_event(&experience).unwrap();

        let outcome = advance(&mut experience, &event).unwrap();
        assert!(matches!(outcome, Advance::Retry { iteration: 1 }));
        assert_eq!(experience.location.scene_id, before.scene_id);
        assert_eq!(experience.location.event_id, before.event_id);
        assert_eq!(experience.location.iteration, 1);

        let outcome = advance(&mut experience, &event).unwrap();
        assert!(matches!(outcome, Advance::Retry { iteration: 2 }));
    }

    #[test]
    fn test_iteration_resets_on_completion() {
        let mut experience = build();
        let mut event = current_event(&experience).unwrap();

        advance(&mut experience, &event).unwrap();
        assert_eq!(experience.location.iteration, 1);

        event.complete = true;
        advance(&mut experience, &event).unwrap();
        assert_eq!(experience.location.iteration, 0);
    }

    #[test]
    fn test_scene_boundary_emits_marker() {
        let mut experience = build();
        let first_scene_title = experience.scenes[0].title.clone();
        let event_count = experience.scenes[0].events.len();

        for i in 0..event_count {
            let mut event = current_event(&experience).unwrap();
            event.complete = true;
            let outcome = advance(&mut experience, &event).unwrap();
            if i + 1 < event_count {
                assert!(matches!(outcome, Advance::Next));
            } else {
                match outcome {
                    Advance::SceneEnd { marker } => {
                        assert_eq!(marker.kind, ActionKind::Stage);
                        let stage = marker.stage.unwrap();
                        assert_eq!(stage.marker, Some(Marker::SceneEnd));
                        assert_eq!(stage.directive, first_scene_title);
                    }
                    other => panic!("expected scene end, got {other:?}"),
                }
            }
        }
        assert_eq!(experience.location.scene_id, experience.scenes[1].id);
        assert_eq!(
            experience.location.event_id,
            experience.scenes[1].events[0].id
        );
    }

    #[test]
    fn test_experience_end_sets_completed() {
        let mut experience = build();
        let mut end_markers = 0;

        // Play everything to completion.
        while !experience.completed {
            let mut event = current_event(&experience).unwrap();
            event.complete = true;
            if let Advance::ExperienceEnd { marker } = advance(&mut experience, &event).unwrap() {
                end_markers += 1;
                let stage = marker.stage.unwrap();
                assert_eq!(stage.marker, Some(Marker::ExperienceEnd));
                assert_eq!(stage.directive, experience.title);
            }
        }

        assert_eq!(end_markers, 1);
        assert!(experience.location.completed);
        assert!(experience.completed);
    }

    #[test]
    fn test_pointer_always_valid_while_playing() {
        let mut experience = build();
        while !experience.completed {
            // current_event failing would mean the pointer escaped the graph.
            let mut event = current_event(&experience).unwrap();
            event.complete = true;
            advance(&mut experience, &event).unwrap();
        }
    }
}
