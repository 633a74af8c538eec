//! services/api/src/web/state.rs
//!
//! Defines the application's shared and session-specific states.

use crate::config::Config;
use guardian_kids_core::{
    ports::{
        DatabaseService, ImageGenerationService, PortError, PortResult, StoryGenerationService,
    },
    BranchWriter, Story, StoryEngine,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

//=========================================================================================
// AppState (Shared Across All Connections)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub story_generator: Arc<dyn StoryGenerationService>,
    pub image_generator: Arc<dyn ImageGenerationService>,
}

impl AppState {
    pub fn branch_writer(&self) -> BranchWriter {
        BranchWriter::new(
            self.db.clone(),
            self.story_generator.clone(),
            self.image_generator.clone(),
        )
    }
}

//=========================================================================================
// ReadingSession (One Reader in One Story)
//=========================================================================================

/// The state for one reader walking one interactive story, either for the
/// lifetime of a WebSocket connection or for a single REST request.
pub struct ReadingSession {
    pub story: Story,
    pub engine: StoryEngine,
    /// Cancels the pending auto-advance, if one is running.
    pub cancellation_token: CancellationToken,
}

impl ReadingSession {
    /// Loads the story, its graph and the reader's saved position.
    pub async fn open(app_state: &AppState, user_id: Uuid, story_id: Uuid) -> PortResult<Self> {
        let story = app_state.db.get_story_by_id(story_id).await?;
        let engine = StoryEngine::open(app_state.db.clone(), user_id, story_id)
            .await?
            .with_auto_advance_delay(app_state.config.auto_advance_delay);

        Ok(Self {
            story,
            engine,
            cancellation_token: CancellationToken::new(),
        })
    }

    /// Whether following `choice_id` from the current node requires writing its destination first.
    pub fn needs_generation(&self, choice_id: Uuid) -> bool {
        let Some(current) = self.engine.current_node() else {
            return false;
        };
        let graph = self.engine.graph();
        graph
            .choices_from(current.id)
            .into_iter()
            .find(|c| c.id == choice_id)
            .and_then(|c| graph.node(c.to_node_id))
            .is_some_and(|dest| dest.is_placeholder())
    }

    /// Writes the destination of `choice_id` if needed, then moves the reader along it.
    ///
    /// Both reader choices and the pending auto choice are accepted. Returns
    /// `Ok(false)` when the choice is not available at the current node.
    /// If another session wrote the destination first, the reader follows that text.
    pub async fn choose(&mut self, writer: &BranchWriter, choice_id: Uuid) -> PortResult<bool> {
        match writer
            .prepare_destination(&self.story, &self.engine, choice_id)
            .await
        {
            Ok(Some(patch)) => {
                debug!(story_id = %self.story.id, node = %patch.node.node_key, "Generated destination node");
                self.engine.apply_patch(patch);
            }
            Ok(None) => {}
            Err(PortError::Conflict(reason)) => {
                debug!(story_id = %self.story.id, "Destination already written elsewhere: {}", reason);
                self.engine.reload_graph().await?;
            }
            Err(e) => return Err(e),
        }

        let is_auto = self
            .engine
            .pending_auto_advance()
            .is_some_and(|pending| pending.choice.id == choice_id);
        let moved = if is_auto {
            self.engine.follow_auto_advance(choice_id).await.is_some()
        } else {
            self.engine.choose(choice_id).await.is_some()
        };
        Ok(moved)
    }

    /// Like `choose`, but on a successful move also cancels the running
    /// auto-advance and returns the token for the next one. A choice that fails
    /// or goes nowhere leaves the running auto-advance alone.
    pub async fn choose_and_rearm(
        &mut self,
        writer: &BranchWriter,
        choice_id: Uuid,
    ) -> PortResult<Option<CancellationToken>> {
        if self.choose(writer, choice_id).await? {
            Ok(Some(self.reset_cancellation()))
        } else {
            Ok(None)
        }
    }

    /// Cancels any running auto-advance and hands out a fresh token for the next one.
    pub fn reset_cancellation(&mut self) -> CancellationToken {
        self.cancellation_token.cancel();
        self.cancellation_token = CancellationToken::new();
        self.cancellation_token.clone()
    }
}
