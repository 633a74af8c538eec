//! Shared fixtures and fake collaborators for the core integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use guardian_kids_core::{
    AgeBand, Choice, DatabaseService, GeneratedStory, GeneratedStoryPart, ImageGenerationService,
    InMemoryStore, PortError, PortResult, Story, StoryGenerationService, StoryNode,
    StoryPartRequest, StoryRequest,
};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

pub fn story(interactive: bool) -> Story {
    Story {
        id: Uuid::new_v4(),
        creator_id: Uuid::new_v4(),
        creator_name: "Mira".to_string(),
        title: "The Lantern Fox".to_string(),
        content: String::new(),
        cover_image_url: None,
        age_band: AgeBand::A,
        is_interactive: interactive,
        created_at: Utc::now(),
    }
}

pub fn node(story_id: Uuid, key: &str, start: bool, ending: bool) -> StoryNode {
    StoryNode {
        id: Uuid::new_v4(),
        story_id,
        node_key: key.to_string(),
        title: Some(key.replace('_', " ")),
        content: format!("This is the {} part.\n\nIt has two paragraphs.", key),
        image_url: None,
        is_start_node: start,
        is_ending_node: ending,
    }
}

pub fn choice(from: &StoryNode, to: &StoryNode, order: i32, auto: bool) -> Choice {
    Choice {
        id: Uuid::new_v4(),
        from_node_id: from.id,
        to_node_id: to.id,
        choice_text: format!("Go to {}", to.node_key),
        choice_order: order,
        auto_advance: auto,
    }
}

/// A small branching story:
///
/// ```text
/// start --1--> path_a --1--> ending_a
///       --2--> path_b --1--> ending_b
/// ```
pub struct BranchingFixture {
    pub store: Arc<InMemoryStore>,
    pub story: Story,
    pub start: StoryNode,
    pub path_a: StoryNode,
    pub path_b: StoryNode,
    pub ending_a: StoryNode,
    pub to_a: Choice,
    pub to_b: Choice,
    pub a_to_end: Choice,
}

pub async fn branching_story() -> BranchingFixture {
    let store = Arc::new(InMemoryStore::new());
    let story = story(true);
    store.create_story(story.clone()).await.unwrap();

    let start = node(story.id, "start", true, false);
    let path_a = node(story.id, "path_a", false, false);
    let path_b = node(story.id, "path_b", false, false);
    let ending_a = node(story.id, "ending_a", false, true);
    let ending_b = node(story.id, "ending_b", false, true);
    for n in [&start, &path_a, &path_b, &ending_a, &ending_b] {
        store.create_story_node(n.clone()).await.unwrap();
    }

    let to_a = choice(&start, &path_a, 1, false);
    let to_b = choice(&start, &path_b, 2, false);
    let a_to_end = choice(&path_a, &ending_a, 1, false);
    let b_to_end = choice(&path_b, &ending_b, 1, false);
    for c in [&to_a, &to_b, &a_to_end, &b_to_end] {
        store.create_choice(c.clone()).await.unwrap();
    }

    BranchingFixture {
        store,
        story,
        start,
        path_a,
        path_b,
        ending_a,
        to_a,
        to_b,
        a_to_end,
    }
}

// ---------------------------------------------------------------------------
// Fake generators
// ---------------------------------------------------------------------------

/// Hands out scripted story parts in order and records every request.
#[derive(Default)]
pub struct ScriptedGenerator {
    parts: Mutex<VecDeque<PortResult<GeneratedStoryPart>>>,
    pub requests: Mutex<Vec<StoryPartRequest>>,
}

impl ScriptedGenerator {
    pub fn new(parts: Vec<PortResult<GeneratedStoryPart>>) -> Self {
        Self {
            parts: Mutex::new(parts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<StoryPartRequest> {
        self.requests.lock().unwrap().clone()
    }
}

pub fn part(content: &str, choices: &[&str]) -> PortResult<GeneratedStoryPart> {
    Ok(GeneratedStoryPart {
        title: Some(format!("Title of {}", content)),
        content: content.to_string(),
        choices: choices.iter().map(|c| c.to_string()).collect(),
        image_prompt: None,
    })
}

#[async_trait]
impl StoryGenerationService for ScriptedGenerator {
    async fn generate_story_part(&self, request: &StoryPartRequest) -> PortResult<GeneratedStoryPart> {
        self.requests.lock().unwrap().push(request.clone());
        self.parts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(PortError::Generation("script exhausted".to_string())))
    }

    async fn generate_story(&self, request: &StoryRequest) -> PortResult<GeneratedStory> {
        Ok(GeneratedStory {
            title: "A Scripted Tale".to_string(),
            content: format!("Once upon a time: {}", request.prompt),
        })
    }
}

/// Returns numbered URLs. Prompts containing `fail_marker` fail. Tracks how
/// many requests were in flight at once.
#[derive(Default)]
pub struct CountingImages {
    pub fail_marker: Option<String>,
    calls: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
}

impl CountingImages {
    pub fn failing_on(marker: &str) -> Self {
        Self {
            fail_marker: Some(marker.to_string()),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ImageGenerationService for CountingImages {
    async fn generate_image(&self, prompt: &str) -> PortResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::task::yield_now().await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match &self.fail_marker {
            Some(marker) if prompt.contains(marker.as_str()) => {
                Err(PortError::Generation("image refused".to_string()))
            }
            _ => Ok(format!("https://img.test/{}.png", n)),
        }
    }
}
