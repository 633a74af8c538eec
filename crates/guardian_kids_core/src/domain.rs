//! crates/guardian_kids_core/src/domain.rs
//!
//! Defines the pure, core data structures for the application.
//! These structs are independent of any database or serialization format.

use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

//=========================================================================================
// Stories and Their Illustrations
//=========================================================================================

/// The reading level a story is written for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AgeBand {
    /// Younger readers: short parts, simple vocabulary.
    A,
    /// Older readers.
    B,
}

impl AgeBand {
    /// The number of words the generator should aim for in one story part.
    pub fn target_words(self) -> usize {
        match self {
            AgeBand::A => 150,
            AgeBand::B => 300,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            AgeBand::A => "A",
            AgeBand::B => "B",
        }
    }
}

impl fmt::Display for AgeBand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AgeBand {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "A" => Ok(AgeBand::A),
            "B" => Ok(AgeBand::B),
            other => Err(format!("'{}' is not a known age band", other)),
        }
    }
}

/// A story in the library. Linear stories carry their whole text in `content`;
/// interactive stories keep their text in `StoryNode`s instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Story {
    pub id: Uuid,
    pub creator_id: Uuid,
    pub creator_name: String,
    pub title: String,
    pub content: String,
    pub cover_image_url: Option<String>,
    pub age_band: AgeBand,
    pub is_interactive: bool,
    pub created_at: DateTime<Utc>,
}

/// An illustration generated for one content page of a linear story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryImage {
    pub id: Uuid,
    pub story_id: Uuid,
    pub page_index: usize,
    pub image_url: String,
    pub created_at: DateTime<Utc>,
}

//=========================================================================================
// The Branching Story Graph
//=========================================================================================

/// One unit of narrative content in an interactive story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryNode {
    pub id: Uuid,
    pub story_id: Uuid,
    /// Human-readable slot name, unique within a story (e.g. "start", "build_up_a").
    pub node_key: String,
    pub title: Option<String>,
    /// Body text; paragraphs are separated by blank lines.
    pub content: String,
    pub image_url: Option<String>,
    pub is_start_node: bool,
    pub is_ending_node: bool,
}

impl StoryNode {
    /// A node whose text has not been generated yet.
    pub fn is_placeholder(&self) -> bool {
        self.content.trim().is_empty()
    }
}

/// A directed edge between two story nodes.
#[derive(Debug, Clone, PartialEq)]
pub struct Choice {
    pub id: Uuid,
    pub from_node_id: Uuid,
    pub to_node_id: Uuid,
    pub choice_text: String,
    /// Display order among the choices leaving the same node.
    pub choice_order: i32,
    /// Taken by the engine after a delay instead of being offered to the reader.
    pub auto_advance: bool,
}

/// One reader's position in one story's graph.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryProgress {
    pub id: Uuid,
    pub user_id: Uuid,
    pub story_id: Uuid,
    pub current_node_id: Uuid,
    /// Node keys in the order they were visited.
    pub path_history: Vec<String>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// A node written by the branch writer together with the placeholders and
/// choices leading on from it. Stored as one unit and merged into loaded graphs.
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPatch {
    /// The node that was written or filled in.
    pub node: StoryNode,
    /// Placeholders created for the next beat.
    pub new_nodes: Vec<StoryNode>,
    pub new_choices: Vec<Choice>,
}

//=========================================================================================
// Flipbook Pages
//=========================================================================================

/// A derived, non-persisted rendering unit for the page-flip reader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FlipbookPage {
    Cover {
        image_url: Option<String>,
        title: String,
        subtitle: String,
    },
    Content {
        text: String,
    },
    Illustration {
        image_url: String,
    },
    End {
        text: String,
    },
}

//=========================================================================================
// Generation Requests and Results
//=========================================================================================

/// What the text generator is asked to write for one part of an interactive story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryPartRequest {
    pub story_title: String,
    pub age_band: AgeBand,
    /// The narrative stage, e.g. "start" or "climax".
    pub beat: String,
    pub is_ending: bool,
    pub previous_text: Option<String>,
    pub chosen_path: Option<String>,
}

/// The text generator's answer for one story part.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct GeneratedStoryPart {
    pub title: Option<String>,
    pub content: String,
    /// Labels for the reader's next choices; empty for endings and linear beats.
    pub choices: Vec<String>,
    pub image_prompt: Option<String>,
}

/// A request for a complete linear story.
#[derive(Debug, Clone, PartialEq)]
pub struct StoryRequest {
    pub prompt: String,
    pub age_band: AgeBand,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedStory {
    pub title: String,
    pub content: String,
}
