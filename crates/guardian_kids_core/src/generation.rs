//! crates/guardian_kids_core/src/generation.rs
//!
//! Writes interactive-story content on demand. The text generator is asked
//! for one beat at a time and its answer is recorded as a node plus the
//! placeholder nodes and choices that lead onwards.

use crate::domain::{Choice, GeneratedStoryPart, GraphPatch, Story, StoryNode, StoryPartRequest};
use crate::engine::StoryEngine;
use crate::graph::get_start_node;
use crate::ports::{
    DatabaseService, ImageGenerationService, PortError, PortResult, StoryGenerationService,
};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Readers never get more than this many choices at one node.
pub const MAX_CHOICES: usize = 2;

const AUTO_CHOICE_TEXT: &str = "Continue";

//=========================================================================================
// Story Beats
//=========================================================================================

/// The narrative stage a node belongs to, encoded as the prefix of its node key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StoryBeat {
    Start,
    BuildUp,
    Climax,
    Ending,
}

impl StoryBeat {
    pub fn as_str(self) -> &'static str {
        match self {
            StoryBeat::Start => "start",
            StoryBeat::BuildUp => "build_up",
            StoryBeat::Climax => "climax",
            StoryBeat::Ending => "ending",
        }
    }

    /// Reads the beat from a key such as `"climax_a_b"`.
    pub fn from_node_key(key: &str) -> Option<Self> {
        [
            StoryBeat::Start,
            StoryBeat::BuildUp,
            StoryBeat::Climax,
            StoryBeat::Ending,
        ]
        .into_iter()
        .find(|beat| match key.strip_prefix(beat.as_str()) {
            Some(rest) => rest.is_empty() || rest.starts_with('_'),
            None => false,
        })
    }

    pub fn next(self) -> Option<Self> {
        match self {
            StoryBeat::Start => Some(StoryBeat::BuildUp),
            StoryBeat::BuildUp => Some(StoryBeat::Climax),
            StoryBeat::Climax => Some(StoryBeat::Ending),
            StoryBeat::Ending => None,
        }
    }

    pub fn is_ending(self) -> bool {
        self == StoryBeat::Ending
    }
}

/// Builds the key of a child node: the child's beat followed by the parent's
/// branch suffix and one more segment, so keys stay unique within a story.
fn child_key(beat: StoryBeat, parent_key: &str, segment: &str) -> String {
    let parent_path = StoryBeat::from_node_key(parent_key)
        .map(|b| &parent_key[b.as_str().len()..])
        .unwrap_or("");
    format!("{}{}_{}", beat.as_str(), parent_path, segment)
}

//=========================================================================================
// The Branch Writer
//=========================================================================================

pub struct BranchWriter {
    db: Arc<dyn DatabaseService>,
    generator: Arc<dyn StoryGenerationService>,
    images: Arc<dyn ImageGenerationService>,
}

impl BranchWriter {
    pub fn new(
        db: Arc<dyn DatabaseService>,
        generator: Arc<dyn StoryGenerationService>,
        images: Arc<dyn ImageGenerationService>,
    ) -> Self {
        Self {
            db,
            generator,
            images,
        }
    }

    /// Writes the start node of an interactive story and the placeholders after it.
    pub async fn write_opening(&self, story: &Story) -> PortResult<GraphPatch> {
        let nodes = self.db.get_story_nodes(story.id).await?;
        if get_start_node(&nodes).is_some() {
            return Err(PortError::Conflict(format!(
                "Story {} already has a start node",
                story.id
            )));
        }

        let part = self
            .generate(story, StoryBeat::Start, None, None)
            .await?;
        let image_url = self.illustrate(story, &part).await;

        let start = StoryNode {
            id: Uuid::new_v4(),
            story_id: story.id,
            node_key: StoryBeat::Start.as_str().to_string(),
            title: part.title.clone(),
            content: part.content.clone(),
            image_url,
            is_start_node: true,
            is_ending_node: false,
        };
        let patch = branch_out(start, StoryBeat::Start, &part.choices);
        self.db.create_branch(&patch).await?;
        info!(story_id = %story.id, branches = patch.new_choices.len(), "Wrote story opening");

        Ok(patch)
    }

    /// Fills in `placeholder`, which `choice` leads to from `parent`.
    ///
    /// Nothing is written when the generator fails. When another writer filled
    /// the placeholder first, returns `Conflict` and leaves their text in place.
    pub async fn write_node(
        &self,
        story: &Story,
        parent: &StoryNode,
        choice: &Choice,
        placeholder: &StoryNode,
    ) -> PortResult<GraphPatch> {
        if !placeholder.is_placeholder() {
            return Err(PortError::Conflict(format!(
                "Node {} has already been written",
                placeholder.node_key
            )));
        }
        let beat = StoryBeat::from_node_key(&placeholder.node_key).ok_or_else(|| {
            PortError::Unexpected(format!(
                "Node key '{}' does not name a story beat",
                placeholder.node_key
            ))
        })?;

        let part = self
            .generate(
                story,
                beat,
                Some(parent.content.clone()),
                Some(choice.choice_text.clone()),
            )
            .await?;
        let image_url = self.illustrate(story, &part).await;

        let node = StoryNode {
            title: part.title.clone(),
            content: part.content.clone(),
            image_url,
            is_ending_node: beat.is_ending(),
            ..placeholder.clone()
        };
        let patch = branch_out(node, beat, &part.choices);
        self.db.fill_placeholder(&patch).await?;
        info!(story_id = %story.id, node = %patch.node.node_key, "Wrote story node");

        Ok(patch)
    }

    /// Generates the destination of `choice_id` if it is still a placeholder.
    ///
    /// The choice may be any edge leaving the engine's current node, including
    /// an auto edge. Returns `Ok(None)` when no generation is needed.
    pub async fn prepare_destination(
        &self,
        story: &Story,
        engine: &StoryEngine,
        choice_id: Uuid,
    ) -> PortResult<Option<GraphPatch>> {
        let Some(current) = engine.current_node() else {
            return Ok(None);
        };
        let graph = engine.graph();
        let Some(choice) = graph
            .choices_from(current.id)
            .into_iter()
            .find(|c| c.id == choice_id)
        else {
            return Ok(None);
        };
        match graph.node(choice.to_node_id) {
            Some(dest) if dest.is_placeholder() => self
                .write_node(story, current, choice, dest)
                .await
                .map(Some),
            _ => Ok(None),
        }
    }

    async fn generate(
        &self,
        story: &Story,
        beat: StoryBeat,
        previous_text: Option<String>,
        chosen_path: Option<String>,
    ) -> PortResult<GeneratedStoryPart> {
        let request = StoryPartRequest {
            story_title: story.title.clone(),
            age_band: story.age_band,
            beat: beat.as_str().to_string(),
            is_ending: beat.is_ending(),
            previous_text,
            chosen_path,
        };
        let part = self.generator.generate_story_part(&request).await?;
        if part.content.trim().is_empty() {
            return Err(PortError::Generation(format!(
                "The generator returned no text for the {} beat",
                beat.as_str()
            )));
        }
        Ok(part)
    }

    /// Illustrates a part on a best-effort basis.
    async fn illustrate(&self, story: &Story, part: &GeneratedStoryPart) -> Option<String> {
        let prompt = part.image_prompt.clone().unwrap_or_else(|| {
            let excerpt: String = part.content.chars().take(300).collect();
            format!(
                "A warm children's book illustration for \"{}\": {}",
                story.title, excerpt
            )
        });
        match self.images.generate_image(&prompt).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(story_id = %story.id, "Illustration failed, keeping the node without an image: {}", e);
                None
            }
        }
    }
}

/// Attaches placeholders for the beat after `beat` to `node`, with the choices
/// leading to them. Without usable labels a single auto edge is used instead.
fn branch_out(node: StoryNode, beat: StoryBeat, labels: &[String]) -> GraphPatch {
    let Some(next_beat) = beat.next() else {
        return GraphPatch {
            node,
            new_nodes: Vec::new(),
            new_choices: Vec::new(),
        };
    };

    let labels: Vec<&str> = labels
        .iter()
        .map(|l| l.trim())
        .filter(|l| !l.is_empty())
        .take(MAX_CHOICES)
        .collect();
    let edges: Vec<(&str, &str, bool)> = if labels.is_empty() {
        vec![("next", AUTO_CHOICE_TEXT, true)]
    } else {
        labels
            .into_iter()
            .zip(["a", "b"])
            .map(|(text, segment)| (segment, text, false))
            .collect()
    };

    let mut new_nodes = Vec::with_capacity(edges.len());
    let mut new_choices = Vec::with_capacity(edges.len());
    for (order, (segment, text, auto_advance)) in edges.into_iter().enumerate() {
        let placeholder = StoryNode {
            id: Uuid::new_v4(),
            story_id: node.story_id,
            node_key: child_key(next_beat, &node.node_key, segment),
            title: None,
            content: String::new(),
            image_url: None,
            is_start_node: false,
            is_ending_node: false,
        };
        new_choices.push(Choice {
            id: Uuid::new_v4(),
            from_node_id: node.id,
            to_node_id: placeholder.id,
            choice_text: text.to_string(),
            choice_order: order as i32 + 1,
            auto_advance,
        });
        new_nodes.push(placeholder);
    }
    GraphPatch {
        node,
        new_nodes,
        new_choices,
    }
}
