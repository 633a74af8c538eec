mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use common::{choice, node, seed_graph, send_raw, story, TestApp};
use guardian_kids_core::DatabaseService;
use serde_json::json;
use std::sync::atomic::Ordering;

// ---------------------------------------------------------------------------
// Reader identity
// ---------------------------------------------------------------------------

#[tokio::test]
async fn requests_without_a_reader_id_are_rejected() {
    let app = TestApp::new();

    let request = Request::builder().uri("/stories").body(Body::empty()).unwrap();
    let (status, _) = send_raw(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let request = Request::builder()
        .uri("/stories")
        .header("x-user-id", "not-a-uuid")
        .body(Body::empty())
        .unwrap();
    let (status, _) = send_raw(&app.router, request).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

// ---------------------------------------------------------------------------
// Library
// ---------------------------------------------------------------------------

#[tokio::test]
async fn created_stories_appear_in_the_library() {
    let app = TestApp::new();

    let (status, created) = app
        .post(
            "/stories",
            Some(json!({ "prompt": "the stars", "age_band": "a", "creator_name": "Ada" })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "The Sleepy Moon");
    assert_eq!(created["age_band"], "A");
    assert_eq!(created["is_interactive"], false);

    let (status, library) = app.get("/stories").await;
    assert_eq!(status, StatusCode::OK);
    let library = library.as_array().unwrap();
    assert_eq!(library.len(), 1);
    assert_eq!(library[0]["id"], created["id"]);
}

#[tokio::test]
async fn unknown_age_bands_are_bad_requests() {
    let app = TestApp::new();

    let (status, _) = app
        .post(
            "/stories",
            Some(json!({ "prompt": "the stars", "age_band": "Z", "creator_name": "Ada" })),
        )
        .await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(app.generator.calls.load(Ordering::SeqCst), 0);
}

// ---------------------------------------------------------------------------
// Flipbook
// ---------------------------------------------------------------------------

#[tokio::test]
async fn flipbook_returns_the_paginated_pages() {
    let app = TestApp::new();
    let story = story(false, "The moon yawned.\n\nIt dreamed of stars.");
    app.store.create_story(story.clone()).await.unwrap();
    app.store
        .add_story_image(story.id, 0, "https://img.test/moon.png")
        .await
        .unwrap();

    let (status, body) = app.get(&format!("/stories/{}/flipbook", story.id)).await;

    assert_eq!(status, StatusCode::OK);
    let pages = body["pages"].as_array().unwrap();
    assert_eq!(pages.len(), 4);
    assert_eq!(pages[0]["type"], "cover");
    assert_eq!(pages[0]["subtitle"], "By Ada");
    assert_eq!(pages[0]["image_url"], "https://img.test/cover.png");
    assert_eq!(pages[1]["type"], "content");
    assert_eq!(pages[1]["text"], "The moon yawned.\n\nIt dreamed of stars.");
    assert_eq!(pages[2]["type"], "illustration");
    assert_eq!(pages[2]["image_url"], "https://img.test/moon.png");
    assert_eq!(pages[3], json!({ "type": "end", "text": "~ The End ~" }));
}

#[tokio::test]
async fn flipbook_of_an_unknown_story_is_not_found() {
    let app = TestApp::new();

    let (status, _) = app
        .get(&format!("/stories/{}/flipbook", uuid::Uuid::new_v4()))
        .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn illustrations_are_stored_and_used_by_the_flipbook() {
    let app = TestApp::new();
    let story = story(false, "Pip slept under the old oak.");
    app.store.create_story(story.clone()).await.unwrap();

    let (status, body) = app
        .post(
            &format!("/stories/{}/illustrations", story.id),
            Some(json!({ "page_indices": [0, 7] })),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let generated = body["generated"].as_array().unwrap();
    assert_eq!(generated.len(), 1);
    assert_eq!(generated[0]["page_index"], 0);
    assert!(body["failed"].as_array().unwrap().is_empty());

    let (_, flipbook) = app.get(&format!("/stories/{}/flipbook", story.id)).await;
    let pages = flipbook["pages"].as_array().unwrap();
    assert_eq!(pages[2]["type"], "illustration");
    assert_eq!(pages[2]["image_url"], generated[0]["image_url"]);
}

// ---------------------------------------------------------------------------
// Interactive reading
// ---------------------------------------------------------------------------

#[tokio::test]
async fn choose_and_restart_round_trip() {
    let app = TestApp::new();
    let seeded = seed_graph(&app.store).await;
    let base = format!("/stories/{}", seeded.story.id);

    let (status, position) = app.get(&format!("{}/progress", base)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(position["node"]["node_key"], "start");
    assert_eq!(position["path_history"], json!(["start"]));
    let choices = position["choices"].as_array().unwrap();
    assert_eq!(choices.len(), 2);
    assert_eq!(choices[0]["id"], json!(seeded.to_left.id));
    assert_eq!(choices[1]["id"], json!(seeded.to_right.id));

    let (status, position) = app
        .post(&format!("{}/choices/{}", base, seeded.to_left.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(position["node"]["node_key"], "left");
    assert_eq!(position["path_history"], json!(["start", "left"]));

    let (_, position) = app
        .post(&format!("{}/choices/{}", base, seeded.left_to_end.id), None)
        .await;
    assert_eq!(position["node"]["node_key"], "ending");
    assert_eq!(position["completed"], true);
    assert!(position["choices"].as_array().unwrap().is_empty());

    // Progress survives between requests.
    let (_, position) = app.get(&format!("{}/progress", base)).await;
    assert_eq!(position["path_history"], json!(["start", "left", "ending"]));

    let (status, position) = app.delete(&format!("{}/progress", base)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(position["node"]["node_key"], "start");
    assert_eq!(position["path_history"], json!(["start"]));
    assert_eq!(position["completed"], false);

    let (_, position) = app.get(&format!("{}/progress", base)).await;
    assert_eq!(position["node"]["node_key"], "start");
}

#[tokio::test]
async fn choices_not_offered_here_are_conflicts() {
    let app = TestApp::new();
    let seeded = seed_graph(&app.store).await;
    let base = format!("/stories/{}", seeded.story.id);

    let (status, _) = app
        .post(&format!("{}/choices/{}", base, seeded.left_to_end.id), None)
        .await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (_, position) = app.get(&format!("{}/progress", base)).await;
    assert_eq!(position["node"]["node_key"], "start");
}

#[tokio::test]
async fn linear_beats_expose_their_auto_advance() {
    let app = TestApp::new();
    let story = story(true, "");
    app.store.create_story(story.clone()).await.unwrap();
    let intro = node(story.id, "start", true, false);
    let next = node(story.id, "build_up_next", false, false);
    app.store.create_story_node(intro.clone()).await.unwrap();
    app.store.create_story_node(next.clone()).await.unwrap();
    let auto = guardian_kids_core::Choice {
        auto_advance: true,
        ..choice(&intro, &next, 1)
    };
    app.store.create_choice(auto.clone()).await.unwrap();
    let base = format!("/stories/{}", story.id);

    let (_, position) = app.get(&format!("{}/progress", base)).await;
    assert!(position["choices"].as_array().unwrap().is_empty());
    assert_eq!(
        position["auto_advance"],
        json!({ "choice_id": auto.id, "delay_ms": 10 })
    );

    let (status, position) = app
        .post(&format!("{}/choices/{}", base, auto.id), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(position["node"]["node_key"], "build_up_next");
    assert!(position["auto_advance"].is_null());
}

#[tokio::test]
async fn interactive_stories_are_written_as_they_are_read() {
    let app = TestApp::new();

    let (status, created) = app
        .post(
            "/stories",
            Some(json!({
                "prompt": "a fox with a lantern",
                "age_band": "B",
                "creator_name": "Ada",
                "is_interactive": true,
                "title": "The Lantern Fox"
            })),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["title"], "The Lantern Fox");
    let base = format!("/stories/{}", created["id"].as_str().unwrap());

    let (_, position) = app.get(&format!("{}/progress", base)).await;
    assert_eq!(position["configured"], false);
    assert!(position["node"].is_null());

    let (status, position) = app.post(&format!("{}/opening", base), None).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(position["node"]["node_key"], "start");
    assert_eq!(position["node"]["image_url"], "https://img.test/0.png");
    let choices = position["choices"].as_array().unwrap();
    assert_eq!(choices.len(), 2);
    assert_eq!(choices[0]["choice_text"], "Follow the river");

    let first = choices[0]["id"].as_str().unwrap().to_string();
    let (status, position) = app
        .post(&format!("{}/choices/{}", base, first), None)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(position["node"]["node_key"], "build_up_a");
    assert_eq!(
        position["node"]["content"],
        "Pip the fox reached the build_up of the tale."
    );
    assert_eq!(position["path_history"], json!(["start", "build_up_a"]));
    assert_eq!(position["choices"].as_array().unwrap().len(), 2);

    let (status, _) = app.post(&format!("{}/opening", base), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn generation_failures_are_retryable_bad_gateways() {
    let app = TestApp::new();
    let story = story(true, "");
    app.store.create_story(story.clone()).await.unwrap();
    let base = format!("/stories/{}", story.id);

    app.generator.fail.store(true, Ordering::SeqCst);
    let (status, _) = app.post(&format!("{}/opening", base), None).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    let (_, position) = app.get(&format!("{}/progress", base)).await;
    assert_eq!(position["configured"], false);

    app.generator.fail.store(false, Ordering::SeqCst);
    let (status, _) = app.post(&format!("{}/opening", base), None).await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn linear_stories_have_no_opening() {
    let app = TestApp::new();
    let story = story(false, "Once upon a time.");
    app.store.create_story(story.clone()).await.unwrap();

    let (status, _) = app
        .post(&format!("/stories/{}/opening", story.id), None)
        .await;

    assert_eq!(status, StatusCode::CONFLICT);
}
