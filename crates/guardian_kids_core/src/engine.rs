//! crates/guardian_kids_core/src/engine.rs
//!
//! The story graph engine: walks one reader through one interactive story,
//! persisting where they are and how they got there.
//!
//! Reading progress is treated as best-effort. Failing to read it means the
//! reader starts fresh, and failing to write it never blocks navigation.

use crate::domain::{Choice, GraphPatch, StoryNode, StoryProgress};
use crate::graph::{resolve_initial_node, StoryGraph};
use crate::ports::{DatabaseService, PortResult};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How long a linear beat stays on screen before the engine moves on.
pub const DEFAULT_AUTO_ADVANCE_DELAY: Duration = Duration::from_secs(3);

//=========================================================================================
// Progress Persistence Helpers
//=========================================================================================

/// Reads the reader's saved progress. A read error is logged and reported as "no progress".
pub async fn load_progress(
    db: &dyn DatabaseService,
    user_id: Uuid,
    story_id: Uuid,
) -> Option<StoryProgress> {
    match db.get_story_progress(user_id, story_id).await {
        Ok(progress) => progress,
        Err(e) => {
            warn!(%user_id, %story_id, "Failed to load story progress, starting fresh: {}", e);
            None
        }
    }
}

/// Upserts the reader's progress. Returns the stored row, or `None` if the write failed.
pub async fn save_progress(
    db: &dyn DatabaseService,
    progress: &StoryProgress,
) -> Option<StoryProgress> {
    match db.upsert_story_progress(progress).await {
        Ok(saved) => Some(saved),
        Err(e) => {
            error!(
                user_id = %progress.user_id,
                story_id = %progress.story_id,
                "Failed to save story progress: {}", e
            );
            None
        }
    }
}

/// Waits out an auto-advance delay. Returns `false` if the wait was cancelled first.
pub async fn wait_for_auto_advance(pending: &AutoAdvance, token: &CancellationToken) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(pending.delay) => true,
    }
}

//=========================================================================================
// The Engine
//=========================================================================================

/// A transition the engine will take on its own once `delay` has passed.
#[derive(Debug, Clone, PartialEq)]
pub struct AutoAdvance {
    pub choice: Choice,
    pub delay: Duration,
}

/// One reader's walk through one story.
pub struct StoryEngine {
    db: Arc<dyn DatabaseService>,
    user_id: Uuid,
    story_id: Uuid,
    graph: StoryGraph,
    progress_id: Option<Uuid>,
    current_node_id: Option<Uuid>,
    path_history: Vec<String>,
    completed_at: Option<DateTime<Utc>>,
    auto_advance_delay: Duration,
}

impl StoryEngine {
    /// Loads the story graph and the reader's progress, then resolves where they resume.
    ///
    /// Only a failure to load the graph itself is returned as an error.
    pub async fn open(
        db: Arc<dyn DatabaseService>,
        user_id: Uuid,
        story_id: Uuid,
    ) -> PortResult<Self> {
        let nodes = db.get_story_nodes(story_id).await?;
        let choices = db.get_story_choices(story_id).await?;
        let progress = load_progress(db.as_ref(), user_id, story_id).await;

        let engine = Self::from_parts(
            db,
            user_id,
            story_id,
            StoryGraph::new(nodes, choices),
            progress,
        );
        info!(
            %user_id,
            %story_id,
            node = ?engine.current_node().map(|n| n.node_key.as_str()),
            "Opened story"
        );
        Ok(engine)
    }

    /// Builds an engine over an already loaded graph.
    pub fn from_parts(
        db: Arc<dyn DatabaseService>,
        user_id: Uuid,
        story_id: Uuid,
        graph: StoryGraph,
        progress: Option<StoryProgress>,
    ) -> Self {
        let resumed = resolve_initial_node(graph.nodes(), progress.as_ref())
            .map(|(node, path)| (node.id, path));
        let resumed_saved_node = matches!(
            (&resumed, &progress),
            (Some((id, _)), Some(p)) if *id == p.current_node_id
        );

        let (current_node_id, path_history) = match resumed {
            Some((id, path)) => (Some(id), path),
            None => (None, Vec::new()),
        };
        let (progress_id, completed_at) = match progress {
            Some(p) if resumed_saved_node => (Some(p.id), p.completed_at),
            Some(p) => (Some(p.id), None),
            None => (None, None),
        };

        Self {
            db,
            user_id,
            story_id,
            graph,
            progress_id,
            current_node_id,
            path_history,
            completed_at,
            auto_advance_delay: DEFAULT_AUTO_ADVANCE_DELAY,
        }
    }

    pub fn with_auto_advance_delay(mut self, delay: Duration) -> Self {
        self.auto_advance_delay = delay;
        self
    }

    pub fn user_id(&self) -> Uuid {
        self.user_id
    }

    pub fn story_id(&self) -> Uuid {
        self.story_id
    }

    pub fn graph(&self) -> &StoryGraph {
        &self.graph
    }

    /// The node the reader is looking at. `None` means the story has no start node yet.
    pub fn current_node(&self) -> Option<&StoryNode> {
        self.current_node_id.and_then(|id| self.graph.node(id))
    }

    pub fn path_history(&self) -> &[String] {
        &self.path_history
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_complete(&self) -> bool {
        self.current_node().is_some_and(|n| n.is_ending_node)
    }

    /// The choices offered to the reader at the current node.
    pub fn available_choices(&self) -> Vec<&Choice> {
        match self.current_node_id {
            Some(id) => self.graph.reader_choices(id),
            None => Vec::new(),
        }
    }

    /// The transition the engine will take by itself from the current node, if any.
    pub fn pending_auto_advance(&self) -> Option<AutoAdvance> {
        let id = self.current_node_id?;
        self.graph.auto_choice(id).map(|choice| AutoAdvance {
            choice: choice.clone(),
            delay: self.auto_advance_delay,
        })
    }

    /// Moves along `choice` and persists the new position.
    ///
    /// If the destination is not loaded nothing happens and `None` is returned.
    /// A failed save is logged; the reader still moves forward.
    pub async fn advance(&mut self, choice: &Choice) -> Option<&StoryNode> {
        let Some(next) = self.graph.node(choice.to_node_id) else {
            warn!(
                story_id = %self.story_id,
                choice_id = %choice.id,
                to_node_id = %choice.to_node_id,
                "Ignoring choice whose destination is not loaded"
            );
            return None;
        };
        let next_id = next.id;
        let next_key = next.node_key.clone();
        let reached_ending = next.is_ending_node;

        self.path_history.push(next_key);
        self.current_node_id = Some(next_id);
        if reached_ending && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        debug!(
            story_id = %self.story_id,
            user_id = %self.user_id,
            path = ?self.path_history,
            "Advanced to next node"
        );

        let progress = StoryProgress {
            id: self.progress_id.unwrap_or_else(Uuid::new_v4),
            user_id: self.user_id,
            story_id: self.story_id,
            current_node_id: next_id,
            path_history: self.path_history.clone(),
            completed_at: self.completed_at,
        };
        if let Some(saved) = save_progress(self.db.as_ref(), &progress).await {
            self.progress_id = Some(saved.id);
        }

        self.current_node()
    }

    /// Follows one of the reader-facing choices of the current node.
    /// Unknown ids are ignored.
    pub async fn choose(&mut self, choice_id: Uuid) -> Option<&StoryNode> {
        let choice = self
            .available_choices()
            .into_iter()
            .find(|c| c.id == choice_id)
            .cloned();
        match choice {
            Some(choice) => self.advance(&choice).await,
            None => {
                warn!(story_id = %self.story_id, %choice_id, "Choice is not offered at the current node");
                None
            }
        }
    }

    /// Takes the pending auto-advance, provided it is still `choice_id`.
    ///
    /// The check matters when the reader moved on while the delay was running.
    pub async fn follow_auto_advance(&mut self, choice_id: Uuid) -> Option<&StoryNode> {
        match self.pending_auto_advance() {
            Some(pending) if pending.choice.id == choice_id => self.advance(&pending.choice).await,
            _ => None,
        }
    }

    /// Waits for the pending auto-advance delay, then takes it.
    /// Returns `None` when there is nothing pending or the wait was cancelled.
    pub async fn run_auto_advance(&mut self, token: &CancellationToken) -> Option<&StoryNode> {
        let pending = self.pending_auto_advance()?;
        if !wait_for_auto_advance(&pending, token).await {
            debug!(story_id = %self.story_id, "Auto-advance cancelled");
            return None;
        }
        self.advance(&pending.choice).await
    }

    /// Clears the reader's saved progress and puts them back at the start node.
    pub async fn restart(&mut self) -> Option<&StoryNode> {
        if let Err(e) = self
            .db
            .delete_story_progress(self.user_id, self.story_id)
            .await
        {
            error!(
                user_id = %self.user_id,
                story_id = %self.story_id,
                "Failed to delete story progress: {}", e
            );
        }

        self.progress_id = None;
        self.completed_at = None;
        match resolve_initial_node(self.graph.nodes(), None) {
            Some((start, path)) => {
                self.current_node_id = Some(start.id);
                self.path_history = path;
            }
            None => {
                self.current_node_id = None;
                self.path_history.clear();
            }
        }
        info!(user_id = %self.user_id, story_id = %self.story_id, "Story restarted");

        self.current_node()
    }

    /// Merges freshly generated content into the loaded graph.
    ///
    /// If the story had no start node before, the reader is placed on the new one.
    pub fn apply_patch(&mut self, patch: GraphPatch) {
        let GraphPatch {
            node,
            new_nodes,
            new_choices,
        } = patch;
        self.graph.upsert_node(node);
        for n in new_nodes {
            self.graph.upsert_node(n);
        }
        for c in new_choices {
            self.graph.add_choice(c);
        }

        if self.current_node_id.is_none() {
            if let Some((start, path)) = resolve_initial_node(self.graph.nodes(), None) {
                self.current_node_id = Some(start.id);
                self.path_history = path;
            }
        }
    }

    /// Reloads the graph from storage, keeping the reader where they are.
    /// Used when another session has written nodes this one has only seen as placeholders.
    pub async fn reload_graph(&mut self) -> PortResult<()> {
        let nodes = self.db.get_story_nodes(self.story_id).await?;
        let choices = self.db.get_story_choices(self.story_id).await?;
        self.graph = StoryGraph::new(nodes, choices);
        debug!(story_id = %self.story_id, "Reloaded story graph");
        Ok(())
    }
}
