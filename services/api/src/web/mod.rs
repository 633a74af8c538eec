pub mod auto_advance_task;
pub mod middleware;
pub mod protocol;
pub mod rest;
pub mod state;
pub mod ws_handler;

use axum::{
    middleware as axum_middleware,
    routing::{get, post},
    Router,
};
use std::sync::Arc;

// Re-export the main handlers to make them easily accessible
// to the binary that will build the web server router.
pub use middleware::require_auth;
pub use rest::{
    choose_handler, create_story_handler, flipbook_handler, get_progress_handler,
    illustrate_handler, list_stories_handler, opening_handler, restart_handler,
};
pub use state::AppState;
pub use ws_handler::ws_handler;

/// Builds the API routes. Every route requires the `x-user-id` header.
pub fn router(app_state: Arc<AppState>) -> Router {
    Router::new()
        .route("/stories", get(list_stories_handler).post(create_story_handler))
        .route("/stories/{story_id}/flipbook", get(flipbook_handler))
        .route("/stories/{story_id}/illustrations", post(illustrate_handler))
        .route("/stories/{story_id}/opening", post(opening_handler))
        .route(
            "/stories/{story_id}/progress",
            get(get_progress_handler).delete(restart_handler),
        )
        .route("/stories/{story_id}/choices/{choice_id}", post(choose_handler))
        .route("/ws", get(ws_handler))
        .layer(axum_middleware::from_fn(require_auth))
        .with_state(app_state)
}
