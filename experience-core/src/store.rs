//! External collaborator interfaces.
//!
//! Persistence and the bot/actor registry live outside this crate; the
//! engine consumes them through these narrow traits. Test doubles live in
//! [`crate::testing`].

use crate::error::Result;
use crate::model::{CastMemberId, ExperienceDoc, ExperienceId, LivedExperience};
use async_trait::async_trait;

/// Persistence for experience templates and lived-experience archives.
#[async_trait]
pub trait ExperienceStore: Send + Sync {
    /// Load the persisted template for an experience.
    async fn load_template(&self, id: ExperienceId) -> Result<ExperienceDoc>;

    /// Load the archived experiences a member has lived through.
    async fn load_lived(&self, member_id: &str) -> Result<Vec<LivedExperience>>;

    /// Archive a finished or force-ended experience.
    async fn save_lived(&self, record: &LivedExperience) -> Result<()>;
}

/// The LLM identity and display name bound to a cast member.
#[derive(Debug, Clone)]
pub struct CastBinding {
    /// Backend identity that speaks for this cast member. Absent when the
    /// role has no bot behind it.
    pub llm_identity: Option<String>,
    pub display_name: String,
}

/// Lookup of cast member bindings from the platform's bot registry.
#[async_trait]
pub trait CastRegistry: Send + Sync {
    async fn resolve_binding(&self, id: CastMemberId) -> Result<CastBinding>;
}
