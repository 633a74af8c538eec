//! Test harness for driving the API router over an in-memory store.

#![allow(dead_code)]

use api_lib::{
    config::Config,
    web::{self, AppState},
};
use async_trait::async_trait;
use axum::{
    body::{to_bytes, Body},
    http::{Method, Request, StatusCode},
    Router,
};
use chrono::Utc;
use guardian_kids_core::{
    AgeBand, Choice, DatabaseService, GeneratedStory, GeneratedStoryPart, ImageGenerationService,
    InMemoryStore, PortError, PortResult, Story, StoryGenerationService, StoryNode,
    StoryPartRequest, StoryRequest,
};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fake generators
// ---------------------------------------------------------------------------

/// Writes the same short part for every beat, with two choices unless asked for an ending.
#[derive(Default)]
pub struct StubGenerator {
    pub fail: AtomicBool,
    /// Number of upcoming part requests that fail before the generator recovers.
    pub fail_next: AtomicUsize,
    pub calls: AtomicUsize,
}

#[async_trait]
impl StoryGenerationService for StubGenerator {
    async fn generate_story_part(&self, request: &StoryPartRequest) -> PortResult<GeneratedStoryPart> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let failing_once = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing_once || self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Generation("model unavailable".to_string()));
        }
        let choices = if request.is_ending {
            Vec::new()
        } else {
            vec!["Follow the river".to_string(), "Climb the hill".to_string()]
        };
        Ok(GeneratedStoryPart {
            title: Some(format!("The {} of {}", request.beat, request.story_title)),
            content: format!("Pip the fox reached the {} of the tale.", request.beat),
            choices,
            image_prompt: None,
        })
    }

    async fn generate_story(&self, request: &StoryRequest) -> PortResult<GeneratedStory> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(PortError::Generation("model unavailable".to_string()));
        }
        Ok(GeneratedStory {
            title: "The Sleepy Moon".to_string(),
            content: format!("The moon yawned.\n\nIt dreamed about {}.", request.prompt),
        })
    }
}

/// Returns numbered image URLs.
#[derive(Default)]
pub struct StubImages {
    calls: AtomicUsize,
}

#[async_trait]
impl ImageGenerationService for StubImages {
    async fn generate_image(&self, _prompt: &str) -> PortResult<String> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(format!("https://img.test/{}.png", n))
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct TestApp {
    pub router: Router,
    pub state: Arc<AppState>,
    pub store: Arc<InMemoryStore>,
    pub generator: Arc<StubGenerator>,
    pub user_id: Uuid,
}

pub fn test_config() -> Config {
    Config::from_lookup(|key| match key {
        "DATABASE_URL" => Some("postgres://unused/stories".to_string()),
        "AUTO_ADVANCE_DELAY_MS" => Some("10".to_string()),
        _ => None,
    })
    .expect("test config is valid")
}

impl TestApp {
    pub fn new() -> Self {
        let store = Arc::new(InMemoryStore::new());
        let generator = Arc::new(StubGenerator::default());
        let app_state = Arc::new(AppState {
            db: store.clone(),
            config: Arc::new(test_config()),
            story_generator: generator.clone(),
            image_generator: Arc::new(StubImages::default()),
        });
        Self {
            router: web::router(app_state.clone()),
            state: app_state,
            store,
            generator,
            user_id: Uuid::new_v4(),
        }
    }

    /// Sends a request as this app's reader and returns the status and JSON body.
    pub async fn send(&self, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder()
            .method(method)
            .uri(uri)
            .header("x-user-id", self.user_id.to_string());
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();
        send_raw(&self.router, request).await
    }

    pub async fn get(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::GET, uri, None).await
    }

    pub async fn post(&self, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        self.send(Method::POST, uri, body).await
    }

    pub async fn delete(&self, uri: &str) -> (StatusCode, Value) {
        self.send(Method::DELETE, uri, None).await
    }
}

/// Runs one request through the router. Non-JSON bodies come back as a JSON string.
pub async fn send_raw(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes)
        .unwrap_or_else(|_| Value::String(String::from_utf8_lossy(&bytes).into_owned()));
    (status, body)
}

// ---------------------------------------------------------------------------
// Seed data
// ---------------------------------------------------------------------------

pub fn story(interactive: bool, content: &str) -> Story {
    Story {
        id: Uuid::new_v4(),
        creator_id: Uuid::new_v4(),
        creator_name: "Ada".to_string(),
        title: "The Lantern Fox".to_string(),
        content: content.to_string(),
        cover_image_url: Some("https://img.test/cover.png".to_string()),
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
        title: None,
        content: format!("The {} part.", key),
        image_url: None,
        is_start_node: start,
        is_ending_node: ending,
    }
}

pub fn choice(from: &StoryNode, to: &StoryNode, order: i32) -> Choice {
    Choice {
        id: Uuid::new_v4(),
        from_node_id: from.id,
        to_node_id: to.id,
        choice_text: format!("Go to {}", to.node_key),
        choice_order: order,
        auto_advance: false,
    }
}

/// Seeds a start node whose only way on is an auto edge to an unwritten
/// build-up beat. Returns the story and that edge.
pub async fn seed_linear_intro(store: &InMemoryStore) -> (Story, Choice) {
    let story = story(true, "");
    store.create_story(story.clone()).await.unwrap();

    let intro = node(story.id, "start", true, false);
    let next = StoryNode {
        content: String::new(),
        ..node(story.id, "build_up_next", false, false)
    };
    store.create_story_node(intro.clone()).await.unwrap();
    store.create_story_node(next.clone()).await.unwrap();

    let auto = Choice {
        choice_text: "Continue".to_string(),
        auto_advance: true,
        ..choice(&intro, &next, 1)
    };
    store.create_choice(auto.clone()).await.unwrap();
    (story, auto)
}

/// Seeds `start -> {left, right}` with `left -> ending`, all written.
pub struct SeededGraph {
    pub story: Story,
    pub to_left: Choice,
    pub to_right: Choice,
    pub left_to_end: Choice,
}

pub async fn seed_graph(store: &InMemoryStore) -> SeededGraph {
    let story = story(true, "");
    store.create_story(story.clone()).await.unwrap();

    let start = node(story.id, "start", true, false);
    let left = node(story.id, "left", false, false);
    let right = node(story.id, "right", false, false);
    let ending = node(story.id, "ending", false, true);
    for n in [&start, &left, &right, &ending] {
        store.create_story_node(n.clone()).await.unwrap();
    }

    let to_left = choice(&start, &left, 1);
    let to_right = choice(&start, &right, 2);
    let left_to_end = choice(&left, &ending, 1);
    for c in [&to_left, &to_right, &left_to_end] {
        store.create_choice(c.clone()).await.unwrap();
    }

    SeededGraph {
        story,
        to_left,
        to_right,
        left_to_end,
    }
}
