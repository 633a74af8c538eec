//! services/api/src/web/rest.rs
//!
//! Contains the Axum handlers for the REST API endpoints and the master
//! definition for the OpenAPI specification.

use crate::{
    error::port_error_response,
    web::{
        protocol::{AutoAdvanceView, ChoiceView, NodeView, ReadingPosition},
        state::{AppState, ReadingSession},
    },
};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json},
    Extension,
};
use chrono::{DateTime, Utc};
use guardian_kids_core::{
    generate_flipbook_pages, illustrate_pages, illustration_jobs, AgeBand, FlipbookPage,
    PortError, Story, StoryRequest,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};
use utoipa::{OpenApi, ToSchema};
use uuid::Uuid;

type HandlerError = (StatusCode, String);

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        list_stories_handler,
        create_story_handler,
        flipbook_handler,
        illustrate_handler,
        opening_handler,
        get_progress_handler,
        choose_handler,
        restart_handler,
    ),
    components(
        schemas(
            StorySummary, CreateStoryRequest, FlipbookResponse, PageView,
            IllustrateRequest, IllustrateResponse, GeneratedIllustration,
            ReadingPosition, NodeView, ChoiceView, AutoAdvanceView
        )
    ),
    tags(
        (name = "Guardian Kids API", description = "Story library, flipbook reader and interactive stories.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// API Response and Payload Structs
//=========================================================================================

/// A story as listed in the library.
#[derive(Serialize, ToSchema)]
pub struct StorySummary {
    id: Uuid,
    title: String,
    creator_name: String,
    cover_image_url: Option<String>,
    /// "A" or "B".
    age_band: String,
    is_interactive: bool,
    created_at: DateTime<Utc>,
}

impl From<&Story> for StorySummary {
    fn from(story: &Story) -> Self {
        Self {
            id: story.id,
            title: story.title.clone(),
            creator_name: story.creator_name.clone(),
            cover_image_url: story.cover_image_url.clone(),
            age_band: story.age_band.to_string(),
            is_interactive: story.is_interactive,
            created_at: story.created_at,
        }
    }
}

/// The payload for creating a story.
#[derive(Deserialize, ToSchema)]
pub struct CreateStoryRequest {
    /// What the story should be about.
    prompt: String,
    /// "A" or "B".
    age_band: String,
    creator_name: String,
    /// Interactive stories are written node by node, starting with `POST /stories/{id}/opening`.
    #[serde(default)]
    is_interactive: bool,
    /// Title for an interactive story; linear stories get a generated title.
    title: Option<String>,
}

/// One flipbook page.
#[derive(Serialize, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PageView {
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

impl From<FlipbookPage> for PageView {
    fn from(page: FlipbookPage) -> Self {
        match page {
            FlipbookPage::Cover {
                image_url,
                title,
                subtitle,
            } => PageView::Cover {
                image_url,
                title,
                subtitle,
            },
            FlipbookPage::Content { text } => PageView::Content { text },
            FlipbookPage::Illustration { image_url } => PageView::Illustration { image_url },
            FlipbookPage::End { text } => PageView::End { text },
        }
    }
}

#[derive(Serialize, ToSchema)]
pub struct FlipbookResponse {
    story_id: Uuid,
    pages: Vec<PageView>,
}

/// The content pages to illustrate, counted among content pages only.
#[derive(Deserialize, ToSchema)]
pub struct IllustrateRequest {
    page_indices: Vec<usize>,
}

#[derive(Serialize, ToSchema)]
pub struct GeneratedIllustration {
    page_index: usize,
    image_url: String,
}

#[derive(Serialize, ToSchema)]
pub struct IllustrateResponse {
    generated: Vec<GeneratedIllustration>,
    /// Page indices whose illustration could not be generated.
    failed: Vec<usize>,
}

//=========================================================================================
// Helpers
//=========================================================================================

/// Logs a port error and turns it into a handler error.
fn fail(context: &'static str) -> impl Fn(PortError) -> HandlerError {
    move |e| {
        error!("{}: {:?}", context, e);
        port_error_response(context, e)
    }
}

async fn open_session(
    app_state: &AppState,
    user_id: Uuid,
    story_id: Uuid,
) -> Result<ReadingSession, HandlerError> {
    ReadingSession::open(app_state, user_id, story_id)
        .await
        .map_err(fail("Failed to open story"))
}

//=========================================================================================
// Library Handlers
//=========================================================================================

/// List every story in the library.
#[utoipa::path(
    get,
    path = "/stories",
    responses(
        (status = 200, description = "The story library", body = [StorySummary]),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 500, description = "Internal server error")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the reader."))
)]
pub async fn list_stories_handler(
    State(app_state): State<Arc<AppState>>,
) -> Result<Json<Vec<StorySummary>>, HandlerError> {
    let stories = app_state
        .db
        .list_stories()
        .await
        .map_err(fail("Failed to list stories"))?;
    Ok(Json(stories.iter().map(StorySummary::from).collect()))
}

/// Create a story.
///
/// Linear stories are written in full by the story generator. Interactive
/// stories start empty and get their opening from `POST /stories/{story_id}/opening`.
#[utoipa::path(
    post,
    path = "/stories",
    request_body = CreateStoryRequest,
    responses(
        (status = 201, description = "Story created", body = StorySummary),
        (status = 400, description = "Bad request (e.g., unknown age band or empty prompt)"),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 502, description = "The story generator failed"),
        (status = 500, description = "Internal server error")
    ),
    params(("x-user-id" = Uuid, Header, description = "The unique ID of the reader."))
)]
pub async fn create_story_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Json(request): Json<CreateStoryRequest>,
) -> Result<impl IntoResponse, HandlerError> {
    let age_band = request
        .age_band
        .parse::<AgeBand>()
        .map_err(|e| (StatusCode::BAD_REQUEST, e))?;
    if request.prompt.trim().is_empty() {
        return Err((StatusCode::BAD_REQUEST, "prompt must not be empty".to_string()));
    }

    let (title, content) = if request.is_interactive {
        let title = request
            .title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| request.prompt.trim().to_string());
        (title, String::new())
    } else {
        let generated = app_state
            .story_generator
            .generate_story(&StoryRequest {
                prompt: request.prompt.clone(),
                age_band,
            })
            .await
            .map_err(fail("Failed to generate story"))?;
        (generated.title, generated.content)
    };

    let story = app_state
        .db
        .create_story(Story {
            id: Uuid::new_v4(),
            creator_id: user_id,
            creator_name: request.creator_name,
            title,
            content,
            cover_image_url: None,
            age_band,
            is_interactive: request.is_interactive,
            created_at: Utc::now(),
        })
        .await
        .map_err(fail("Failed to create story"))?;
    info!(story_id = %story.id, interactive = story.is_interactive, "Created story");

    Ok((StatusCode::CREATED, Json(StorySummary::from(&story))))
}

//=========================================================================================
// Flipbook Handlers
//=========================================================================================

/// Paginate a story into flipbook pages.
#[utoipa::path(
    get,
    path = "/stories/{story_id}/flipbook",
    responses(
        (status = 200, description = "The flipbook pages in reading order", body = FlipbookResponse),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Story not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("story_id" = Uuid, Path, description = "The story to paginate."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the reader.")
    )
)]
pub async fn flipbook_handler(
    State(app_state): State<Arc<AppState>>,
    Path(story_id): Path<Uuid>,
) -> Result<Json<FlipbookResponse>, HandlerError> {
    let story = app_state
        .db
        .get_story_by_id(story_id)
        .await
        .map_err(fail("Failed to load story"))?;
    let images: Vec<String> = app_state
        .db
        .get_story_images(story_id)
        .await
        .map_err(fail("Failed to load story images"))?
        .into_iter()
        .map(|image| image.image_url)
        .collect();

    let pages = generate_flipbook_pages(&story, &images, &story.creator_name);
    Ok(Json(FlipbookResponse {
        story_id,
        pages: pages.into_iter().map(PageView::from).collect(),
    }))
}

/// Generate illustrations for content pages of a story.
///
/// Requests run in batches of the configured size; pages whose illustration
/// fails are reported in `failed` and do not affect the others.
#[utoipa::path(
    post,
    path = "/stories/{story_id}/illustrations",
    request_body = IllustrateRequest,
    responses(
        (status = 200, description = "Illustrations generated", body = IllustrateResponse),
        (status = 400, description = "No page indices given"),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Story not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("story_id" = Uuid, Path, description = "The story to illustrate."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the reader.")
    )
)]
pub async fn illustrate_handler(
    State(app_state): State<Arc<AppState>>,
    Path(story_id): Path<Uuid>,
    Json(request): Json<IllustrateRequest>,
) -> Result<Json<IllustrateResponse>, HandlerError> {
    if request.page_indices.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "page_indices must not be empty".to_string()));
    }
    let story = app_state
        .db
        .get_story_by_id(story_id)
        .await
        .map_err(fail("Failed to load story"))?;

    let pages = generate_flipbook_pages(&story, &[], &story.creator_name);
    let jobs = illustration_jobs(&story, &pages, &request.page_indices);
    let outcomes = illustrate_pages(
        app_state.image_generator.as_ref(),
        jobs,
        app_state.config.image_batch_size,
    )
    .await;

    let mut response = IllustrateResponse {
        generated: Vec::new(),
        failed: Vec::new(),
    };
    for outcome in outcomes {
        match outcome.result {
            Ok(url) => {
                app_state
                    .db
                    .add_story_image(story_id, outcome.page_index, &url)
                    .await
                    .map_err(fail("Failed to store illustration"))?;
                response.generated.push(GeneratedIllustration {
                    page_index: outcome.page_index,
                    image_url: url,
                });
            }
            Err(_) => response.failed.push(outcome.page_index),
        }
    }
    info!(
        %story_id,
        generated = response.generated.len(),
        failed = response.failed.len(),
        "Illustrated story pages"
    );
    Ok(Json(response))
}

//=========================================================================================
// Interactive Story Handlers
//=========================================================================================

/// Write the opening node of an interactive story.
#[utoipa::path(
    post,
    path = "/stories/{story_id}/opening",
    responses(
        (status = 201, description = "Opening written; the reader is placed on it", body = ReadingPosition),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Story not found"),
        (status = 409, description = "The story is not interactive or already has an opening"),
        (status = 502, description = "The story generator failed"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("story_id" = Uuid, Path, description = "The interactive story."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the reader.")
    )
)]
pub async fn opening_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(story_id): Path<Uuid>,
) -> Result<impl IntoResponse, HandlerError> {
    let mut session = open_session(&app_state, user_id, story_id).await?;
    if !session.story.is_interactive {
        return Err((
            StatusCode::CONFLICT,
            "Only interactive stories have an opening".to_string(),
        ));
    }

    let patch = app_state
        .branch_writer()
        .write_opening(&session.story)
        .await
        .map_err(fail("Failed to write story opening"))?;
    session.engine.apply_patch(patch);

    Ok((StatusCode::CREATED, Json(ReadingPosition::of(&session.engine))))
}

/// Get the reader's current position in an interactive story.
#[utoipa::path(
    get,
    path = "/stories/{story_id}/progress",
    responses(
        (status = 200, description = "The reader's position; `configured` is false before the opening exists", body = ReadingPosition),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Story not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("story_id" = Uuid, Path, description = "The interactive story."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the reader.")
    )
)]
pub async fn get_progress_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(story_id): Path<Uuid>,
) -> Result<Json<ReadingPosition>, HandlerError> {
    let session = open_session(&app_state, user_id, story_id).await?;
    Ok(Json(ReadingPosition::of(&session.engine)))
}

/// Follow a choice from the reader's current node.
///
/// If the destination has not been written yet it is generated first.
#[utoipa::path(
    post,
    path = "/stories/{story_id}/choices/{choice_id}",
    responses(
        (status = 200, description = "The reader's new position", body = ReadingPosition),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Story not found"),
        (status = 409, description = "The choice is not available at the current node"),
        (status = 502, description = "The story generator failed; retrying may succeed"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("story_id" = Uuid, Path, description = "The interactive story."),
        ("choice_id" = Uuid, Path, description = "The choice to follow."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the reader.")
    )
)]
pub async fn choose_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path((story_id, choice_id)): Path<(Uuid, Uuid)>,
) -> Result<Json<ReadingPosition>, HandlerError> {
    let mut session = open_session(&app_state, user_id, story_id).await?;
    let moved = session
        .choose(&app_state.branch_writer(), choice_id)
        .await
        .map_err(fail("Failed to follow choice"))?;
    if !moved {
        return Err((
            StatusCode::CONFLICT,
            "That choice is not available at the current node".to_string(),
        ));
    }
    Ok(Json(ReadingPosition::of(&session.engine)))
}

/// Clear the reader's progress and return to the start node.
#[utoipa::path(
    delete,
    path = "/stories/{story_id}/progress",
    responses(
        (status = 200, description = "The reader is back at the start", body = ReadingPosition),
        (status = 401, description = "Missing or invalid x-user-id header"),
        (status = 404, description = "Story not found"),
        (status = 500, description = "Internal server error")
    ),
    params(
        ("story_id" = Uuid, Path, description = "The interactive story."),
        ("x-user-id" = Uuid, Header, description = "The unique ID of the reader.")
    )
)]
pub async fn restart_handler(
    State(app_state): State<Arc<AppState>>,
    Extension(user_id): Extension<Uuid>,
    Path(story_id): Path<Uuid>,
) -> Result<Json<ReadingPosition>, HandlerError> {
    let mut session = open_session(&app_state, user_id, story_id).await?;
    session.engine.restart().await;
    Ok(Json(ReadingPosition::of(&session.engine)))
}
