//! services/api/src/web/protocol.rs
//!
//! Defines the WebSocket message protocol between the browser client and the API server
//! for the interactive story reader, plus the node and choice views shared with the
//! REST responses.

use guardian_kids_core::{AutoAdvance, Choice, StoryEngine, StoryNode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use utoipa::ToSchema;
use uuid::Uuid;

//=========================================================================================
// Shared Views
//=========================================================================================

/// A story node as the reader sees it.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct NodeView {
    pub id: Uuid,
    pub node_key: String,
    pub title: Option<String>,
    pub content: String,
    pub image_url: Option<String>,
    pub is_start_node: bool,
    pub is_ending_node: bool,
}

impl From<&StoryNode> for NodeView {
    fn from(node: &StoryNode) -> Self {
        Self {
            id: node.id,
            node_key: node.node_key.clone(),
            title: node.title.clone(),
            content: node.content.clone(),
            image_url: node.image_url.clone(),
            is_start_node: node.is_start_node,
            is_ending_node: node.is_ending_node,
        }
    }
}

/// A choice offered to the reader.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ChoiceView {
    pub id: Uuid,
    pub choice_text: String,
    pub choice_order: i32,
}

impl From<&Choice> for ChoiceView {
    fn from(choice: &Choice) -> Self {
        Self {
            id: choice.id,
            choice_text: choice.choice_text.clone(),
            choice_order: choice.choice_order,
        }
    }
}

/// A transition the server will take by itself after `delay_ms`.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct AutoAdvanceView {
    pub choice_id: Uuid,
    pub delay_ms: u64,
}

impl From<&AutoAdvance> for AutoAdvanceView {
    fn from(pending: &AutoAdvance) -> Self {
        Self {
            choice_id: pending.choice.id,
            delay_ms: delay_ms(pending.delay),
        }
    }
}

/// A delay in whole milliseconds, saturating at `u64::MAX`.
pub fn delay_ms(delay: Duration) -> u64 {
    u64::try_from(delay.as_millis()).unwrap_or(u64::MAX)
}

/// Where a reader currently is in an interactive story.
#[derive(Serialize, Debug, Clone, PartialEq, ToSchema)]
pub struct ReadingPosition {
    /// False while the story has no start node yet.
    pub configured: bool,
    pub node: Option<NodeView>,
    pub choices: Vec<ChoiceView>,
    pub path_history: Vec<String>,
    pub completed: bool,
    /// Present when the current node moves on by itself. REST clients follow it
    /// by posting `choice_id` once the delay has passed.
    pub auto_advance: Option<AutoAdvanceView>,
}

impl ReadingPosition {
    pub fn of(engine: &StoryEngine) -> Self {
        let node = engine.current_node().map(NodeView::from);
        Self {
            configured: node.is_some(),
            node,
            choices: engine.available_choices().into_iter().map(ChoiceView::from).collect(),
            path_history: engine.path_history().to_vec(),
            completed: engine.is_complete(),
            auto_advance: engine.pending_auto_advance().as_ref().map(AutoAdvanceView::from),
        }
    }
}

//=========================================================================================
// Messages Sent FROM the Client (Browser) TO the Server
//=========================================================================================

/// Represents the structured text messages a client can send to the server.
#[derive(Deserialize, Debug, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Opens a story for reading. This must be the first message sent on the connection.
    Init { story_id: Uuid },

    /// Follows one of the choices offered at the current node.
    Choose { choice_id: Uuid },

    /// Clears the reader's progress and returns to the start node.
    Restart,
}

//=========================================================================================
// Messages Sent FROM the Server TO the Client (Browser)
//=========================================================================================

/// Represents the structured text messages the server can send to the client.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// The reader is now at `node`.
    NodeEntered {
        node: NodeView,
        choices: Vec<ChoiceView>,
        path_history: Vec<String>,
        completed: bool,
    },

    /// The story has no start node yet.
    NotConfigured,

    /// The server will follow `choice_id` after `delay_ms` unless the reader acts first.
    AutoAdvanceScheduled { choice_id: Uuid, delay_ms: u64 },

    /// The next node is being written; the UI can show a "thinking..." state.
    Generating,

    /// Reports an error. `retryable` tells the client whether sending the same
    /// message again may succeed.
    Error { message: String, retryable: bool },
}

impl ServerMessage {
    /// Describes the engine's current position.
    pub fn position(engine: &StoryEngine) -> Self {
        match engine.current_node() {
            Some(node) => ServerMessage::NodeEntered {
                node: NodeView::from(node),
                choices: engine.available_choices().into_iter().map(ChoiceView::from).collect(),
                path_history: engine.path_history().to_vec(),
                completed: engine.is_complete(),
            },
            None => ServerMessage::NotConfigured,
        }
    }
}
