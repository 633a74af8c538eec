//! crates/guardian_kids_core/src/graph.rs
//!
//! The loaded node/choice graph of one interactive story and the pure lookups
//! the engine performs on it.

use crate::domain::{Choice, StoryNode, StoryProgress};
use uuid::Uuid;

/// Returns the story's start node, or `None` when the story has not been set up yet.
///
/// With more than one start node the first one in load order wins.
pub fn get_start_node(nodes: &[StoryNode]) -> Option<&StoryNode> {
    nodes.iter().find(|n| n.is_start_node)
}

/// Picks the node a reader should see when opening a story, along with the path
/// that led there.
///
/// Saved progress is honoured only while its node still exists; otherwise the
/// reader starts over at the start node.
pub fn resolve_initial_node<'a>(
    nodes: &'a [StoryNode],
    progress: Option<&StoryProgress>,
) -> Option<(&'a StoryNode, Vec<String>)> {
    if let Some(progress) = progress {
        if let Some(node) = nodes.iter().find(|n| n.id == progress.current_node_id) {
            return Some((node, progress.path_history.clone()));
        }
    }

    get_start_node(nodes).map(|start| (start, vec![start.node_key.clone()]))
}

/// The nodes and choices of a single story, as loaded from the database.
#[derive(Debug, Clone, Default)]
pub struct StoryGraph {
    nodes: Vec<StoryNode>,
    choices: Vec<Choice>,
}

impl StoryGraph {
    pub fn new(nodes: Vec<StoryNode>, choices: Vec<Choice>) -> Self {
        Self { nodes, choices }
    }

    pub fn nodes(&self) -> &[StoryNode] {
        &self.nodes
    }

    pub fn start_node(&self) -> Option<&StoryNode> {
        get_start_node(&self.nodes)
    }

    pub fn node(&self, node_id: Uuid) -> Option<&StoryNode> {
        self.nodes.iter().find(|n| n.id == node_id)
    }

    pub fn choice(&self, choice_id: Uuid) -> Option<&Choice> {
        self.choices.iter().find(|c| c.id == choice_id)
    }

    /// All edges leaving `node_id`, in display order.
    pub fn choices_from(&self, node_id: Uuid) -> Vec<&Choice> {
        let mut out: Vec<&Choice> = self
            .choices
            .iter()
            .filter(|c| c.from_node_id == node_id)
            .collect();
        out.sort_by_key(|c| c.choice_order);
        out
    }

    /// The choices offered to the reader at `node_id`. Ending nodes offer none.
    pub fn reader_choices(&self, node_id: Uuid) -> Vec<&Choice> {
        match self.node(node_id) {
            Some(node) if !node.is_ending_node => self
                .choices_from(node_id)
                .into_iter()
                .filter(|c| !c.auto_advance)
                .collect(),
            _ => Vec::new(),
        }
    }

    /// The edge the engine follows by itself, if `node_id` is a linear beat.
    ///
    /// A linear beat is a non-ending node whose only outgoing edge is flagged auto.
    pub fn auto_choice(&self, node_id: Uuid) -> Option<&Choice> {
        let node = self.node(node_id)?;
        if node.is_ending_node {
            return None;
        }
        match self.choices_from(node_id).as_slice() {
            [only] if only.auto_advance => Some(*only),
            _ => None,
        }
    }

    /// Inserts a node, replacing any loaded node with the same id.
    pub fn upsert_node(&mut self, node: StoryNode) {
        match self.nodes.iter_mut().find(|n| n.id == node.id) {
            Some(existing) => *existing = node,
            None => self.nodes.push(node),
        }
    }

    pub fn add_choice(&mut self, choice: Choice) {
        if self.choice(choice.id).is_none() {
            self.choices.push(choice);
        }
    }
}
