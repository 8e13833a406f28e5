//! Interactive experience engine with LLM-backed narration.
//!
//! This crate provides:
//! - A scene/event state machine with a single navigation pointer
//! - Dialog resolution from static scripts or prompt-driven generation
//! - Free-text input evaluation with defensive reply parsing
//! - Inference-job orchestration over an Assistants-style backend,
//!   including tool-call dispatch, conflict recovery, and soft timeouts
//!
//! # Quick Start
//!
//! ```ignore
//! use experience_core::{EngineContext, ExperienceEngine, OrchestratorConfig};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let ctx = EngineContext {
//!         backend: Arc::new(assistants::Assistants::from_env()?),
//!         store: my_store,
//!         registry: my_registry,
//!         config: OrchestratorConfig::default(),
//!     };
//!
//!     let mut engine = ExperienceEngine::start(ctx, experience_id, None, None).await?;
//!     for payload in engine.play(None).await? {
//!         println!("{:?}", payload.text);
//!     }
//!     Ok(())
//! }
//! ```

pub mod dialog;
pub mod engine;
pub mod error;
pub mod input;
pub mod model;
pub mod navigator;
pub mod orchestrator;
pub mod processor;
pub mod store;
pub mod testing;
pub mod tools;
pub mod vars;

// Primary public API
pub use engine::{EngineContext, EventRef, ExperienceEngine, Manifest, SceneSummary};
pub use error::{Error, Result};
pub use model::{
    ActionKind, Event, EventPayload, Experience, ExperienceDoc, ExperienceId, LivedExperience,
    Location, Marker, MemberProfile,
};
pub use orchestrator::{JobOrchestrator, JobOutcome, OrchestratorConfig};
pub use store::{CastBinding, CastRegistry, ExperienceStore};
