//! crates/guardian_kids_core/src/ports.rs
//!
//! Defines the service contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of specific external implementations like databases or APIs.

use async_trait::async_trait;
use uuid::Uuid;
use crate::domain::{
    Choice, GeneratedStory, GeneratedStoryPart, GraphPatch, Story, StoryImage, StoryNode,
    StoryPartRequest, StoryProgress, StoryRequest,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// A generic error type for all port operations.
/// This abstracts away the specific errors from external services (e.g., database, network).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PortError {
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Generation failed: {0}")]
    Generation(String),
    #[error("An unexpected error occurred: {0}")]
    Unexpected(String),
    #[error("Unauthorized")]
    Unauthorized,
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Service Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Story Library ---
    async fn list_stories(&self) -> PortResult<Vec<Story>>;

    async fn get_story_by_id(&self, story_id: Uuid) -> PortResult<Story>;

    async fn create_story(&self, story: Story) -> PortResult<Story>;

    /// Returns the story's illustrations ordered by page index, then creation time.
    async fn get_story_images(&self, story_id: Uuid) -> PortResult<Vec<StoryImage>>;

    async fn add_story_image(
        &self,
        story_id: Uuid,
        page_index: usize,
        image_url: &str,
    ) -> PortResult<StoryImage>;

    // --- Story Graph ---
    async fn get_story_nodes(&self, story_id: Uuid) -> PortResult<Vec<StoryNode>>;

    async fn get_story_choices(&self, story_id: Uuid) -> PortResult<Vec<Choice>>;

    async fn create_story_node(&self, node: StoryNode) -> PortResult<()>;

    async fn create_choice(&self, choice: Choice) -> PortResult<()>;

    /// Inserts the patch's node, placeholders and choices together, or none of them.
    async fn create_branch(&self, patch: &GraphPatch) -> PortResult<()>;

    /// Fills a placeholder and inserts the branches below it, or writes nothing.
    /// Returns `Conflict` when the node has already been written.
    async fn fill_placeholder(&self, patch: &GraphPatch) -> PortResult<()>;

    // --- Reading Progress ---
    async fn get_story_progress(
        &self,
        user_id: Uuid,
        story_id: Uuid,
    ) -> PortResult<Option<StoryProgress>>;

    /// Inserts or replaces the row keyed by `(user_id, story_id)`. Last writer wins.
    async fn upsert_story_progress(&self, progress: &StoryProgress) -> PortResult<StoryProgress>;

    async fn delete_story_progress(&self, user_id: Uuid, story_id: Uuid) -> PortResult<()>;
}

#[async_trait]
pub trait StoryGenerationService: Send + Sync {
    /// Writes one part of an interactive story.
    async fn generate_story_part(&self, request: &StoryPartRequest) -> PortResult<GeneratedStoryPart>;

    /// Writes a complete linear story.
    async fn generate_story(&self, request: &StoryRequest) -> PortResult<GeneratedStory>;
}

#[async_trait]
pub trait ImageGenerationService: Send + Sync {
    /// Generates an illustration and returns its URL.
    async fn generate_image(&self, prompt: &str) -> PortResult<String>;
}
