//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the `DatabaseService` port from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guardian_kids_core::domain::{
    AgeBand, Choice, GraphPatch, Story, StoryImage, StoryNode, StoryProgress,
};
use guardian_kids_core::ports::{DatabaseService, PortError, PortResult};
use sqlx::{FromRow, PgConnection, PgPool};
use uuid::Uuid;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }
}

/// Maps a write failure, reporting unique-key violations as conflicts.
fn write_error(e: sqlx::Error, what: &str) -> PortError {
    let unique_violation = e
        .as_database_error()
        .and_then(|db| db.code())
        .is_some_and(|code| code == "23505");
    if unique_violation {
        PortError::Conflict(format!("{} already exists", what))
    } else {
        PortError::Unexpected(e.to_string())
    }
}

fn read_error(e: sqlx::Error, what: String) -> PortError {
    match e {
        sqlx::Error::RowNotFound => PortError::NotFound(what),
        _ => PortError::Unexpected(e.to_string()),
    }
}

fn unavailable(e: sqlx::Error) -> PortError {
    PortError::Unexpected(e.to_string())
}

async fn insert_node(conn: &mut PgConnection, node: &StoryNode) -> PortResult<()> {
    sqlx::query(&format!(
        "INSERT INTO story_nodes ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        NODE_COLUMNS
    ))
    .bind(node.id)
    .bind(node.story_id)
    .bind(&node.node_key)
    .bind(&node.title)
    .bind(&node.content)
    .bind(&node.image_url)
    .bind(node.is_start_node)
    .bind(node.is_ending_node)
    .execute(conn)
    .await
    .map_err(|e| write_error(e, &format!("Node '{}'", node.node_key)))?;
    Ok(())
}

async fn insert_choice(conn: &mut PgConnection, choice: &Choice) -> PortResult<()> {
    sqlx::query(
        "INSERT INTO story_choices (id, from_node_id, to_node_id, choice_text, choice_order, auto_advance) VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(choice.id)
    .bind(choice.from_node_id)
    .bind(choice.to_node_id)
    .bind(&choice.choice_text)
    .bind(choice.choice_order)
    .bind(choice.auto_advance)
    .execute(conn)
    .await
    .map_err(|e| write_error(e, "Choice"))?;
    Ok(())
}

/// Placeholders first, so every choice's target exists when it is inserted.
async fn insert_children(conn: &mut PgConnection, patch: &GraphPatch) -> PortResult<()> {
    for node in &patch.new_nodes {
        insert_node(conn, node).await?;
    }
    for choice in &patch.new_choices {
        insert_choice(conn, choice).await?;
    }
    Ok(())
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

const STORY_COLUMNS: &str = "id, creator_id, creator_name, title, content, cover_image_url, age_band, is_interactive, created_at";
const NODE_COLUMNS: &str =
    "id, story_id, node_key, title, content, image_url, is_start_node, is_ending_node";
const PROGRESS_COLUMNS: &str =
    "id, user_id, story_id, current_node_id, path_history, completed_at";

#[derive(FromRow)]
struct StoryRecord {
    id: Uuid,
    creator_id: Uuid,
    creator_name: String,
    title: String,
    content: String,
    cover_image_url: Option<String>,
    age_band: String,
    is_interactive: bool,
    created_at: DateTime<Utc>,
}
impl StoryRecord {
    fn to_domain(self) -> PortResult<Story> {
        let age_band = self
            .age_band
            .parse::<AgeBand>()
            .map_err(PortError::Unexpected)?;
        Ok(Story {
            id: self.id,
            creator_id: self.creator_id,
            creator_name: self.creator_name,
            title: self.title,
            content: self.content,
            cover_image_url: self.cover_image_url,
            age_band,
            is_interactive: self.is_interactive,
            created_at: self.created_at,
        })
    }
}

#[derive(FromRow)]
struct StoryImageRecord {
    id: Uuid,
    story_id: Uuid,
    page_index: i32,
    image_url: String,
    created_at: DateTime<Utc>,
}
impl StoryImageRecord {
    fn to_domain(self) -> StoryImage {
        StoryImage {
            id: self.id,
            story_id: self.story_id,
            page_index: self.page_index.max(0) as usize,
            image_url: self.image_url,
            created_at: self.created_at,
        }
    }
}

#[derive(FromRow)]
struct StoryNodeRecord {
    id: Uuid,
    story_id: Uuid,
    node_key: String,
    title: Option<String>,
    content: String,
    image_url: Option<String>,
    is_start_node: bool,
    is_ending_node: bool,
}
impl StoryNodeRecord {
    fn to_domain(self) -> StoryNode {
        StoryNode {
            id: self.id,
            story_id: self.story_id,
            node_key: self.node_key,
            title: self.title,
            content: self.content,
            image_url: self.image_url,
            is_start_node: self.is_start_node,
            is_ending_node: self.is_ending_node,
        }
    }
}

#[derive(FromRow)]
struct ChoiceRecord {
    id: Uuid,
    from_node_id: Uuid,
    to_node_id: Uuid,
    choice_text: String,
    choice_order: i32,
    auto_advance: bool,
}
impl ChoiceRecord {
    fn to_domain(self) -> Choice {
        Choice {
            id: self.id,
            from_node_id: self.from_node_id,
            to_node_id: self.to_node_id,
            choice_text: self.choice_text,
            choice_order: self.choice_order,
            auto_advance: self.auto_advance,
        }
    }
}

#[derive(FromRow)]
struct ProgressRecord {
    id: Uuid,
    user_id: Uuid,
    story_id: Uuid,
    current_node_id: Uuid,
    path_history: Vec<String>,
    completed_at: Option<DateTime<Utc>>,
}
impl ProgressRecord {
    fn to_domain(self) -> StoryProgress {
        StoryProgress {
            id: self.id,
            user_id: self.user_id,
            story_id: self.story_id,
            current_node_id: self.current_node_id,
            path_history: self.path_history,
            completed_at: self.completed_at,
        }
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn list_stories(&self) -> PortResult<Vec<Story>> {
        let records = sqlx::query_as::<_, StoryRecord>(&format!(
            "SELECT {} FROM stories ORDER BY created_at DESC",
            STORY_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        records.into_iter().map(|r| r.to_domain()).collect()
    }

    async fn get_story_by_id(&self, story_id: Uuid) -> PortResult<Story> {
        let record = sqlx::query_as::<_, StoryRecord>(&format!(
            "SELECT {} FROM stories WHERE id = $1",
            STORY_COLUMNS
        ))
        .bind(story_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| read_error(e, format!("Story {} not found", story_id)))?;
        record.to_domain()
    }

    async fn create_story(&self, story: Story) -> PortResult<Story> {
        let record = sqlx::query_as::<_, StoryRecord>(&format!(
            "INSERT INTO stories ({cols}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) RETURNING {cols}",
            cols = STORY_COLUMNS
        ))
        .bind(story.id)
        .bind(story.creator_id)
        .bind(&story.creator_name)
        .bind(&story.title)
        .bind(&story.content)
        .bind(&story.cover_image_url)
        .bind(story.age_band.as_str())
        .bind(story.is_interactive)
        .bind(story.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, "Story"))?;
        record.to_domain()
    }

    async fn get_story_images(&self, story_id: Uuid) -> PortResult<Vec<StoryImage>> {
        let records = sqlx::query_as::<_, StoryImageRecord>(
            "SELECT id, story_id, page_index, image_url, created_at FROM story_images WHERE story_id = $1 ORDER BY page_index ASC, created_at ASC",
        )
        .bind(story_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn add_story_image(
        &self,
        story_id: Uuid,
        page_index: usize,
        image_url: &str,
    ) -> PortResult<StoryImage> {
        let record = sqlx::query_as::<_, StoryImageRecord>(
            "INSERT INTO story_images (id, story_id, page_index, image_url) VALUES ($1, $2, $3, $4) RETURNING id, story_id, page_index, image_url, created_at",
        )
        .bind(Uuid::new_v4())
        .bind(story_id)
        .bind(page_index as i32)
        .bind(image_url)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| write_error(e, "Story image"))?;
        Ok(record.to_domain())
    }

    async fn get_story_nodes(&self, story_id: Uuid) -> PortResult<Vec<StoryNode>> {
        let records = sqlx::query_as::<_, StoryNodeRecord>(&format!(
            "SELECT {} FROM story_nodes WHERE story_id = $1 ORDER BY created_at ASC",
            NODE_COLUMNS
        ))
        .bind(story_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn get_story_choices(&self, story_id: Uuid) -> PortResult<Vec<Choice>> {
        let records = sqlx::query_as::<_, ChoiceRecord>(
            "SELECT c.id, c.from_node_id, c.to_node_id, c.choice_text, c.choice_order, c.auto_advance \
             FROM story_choices c JOIN story_nodes n ON n.id = c.from_node_id \
             WHERE n.story_id = $1 ORDER BY c.from_node_id, c.choice_order",
        )
        .bind(story_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(records.into_iter().map(|r| r.to_domain()).collect())
    }

    async fn create_story_node(&self, node: StoryNode) -> PortResult<()> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        insert_node(&mut conn, &node).await
    }

    async fn create_choice(&self, choice: Choice) -> PortResult<()> {
        let mut conn = self.pool.acquire().await.map_err(unavailable)?;
        insert_choice(&mut conn, &choice).await
    }

    async fn create_branch(&self, patch: &GraphPatch) -> PortResult<()> {
        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        insert_node(&mut tx, &patch.node).await?;
        insert_children(&mut tx, patch).await?;
        tx.commit().await.map_err(unavailable)
    }

    async fn fill_placeholder(&self, patch: &GraphPatch) -> PortResult<()> {
        let node = &patch.node;
        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        // Only a node that is still blank may be filled; a second writer matches no row.
        let result = sqlx::query(
            "UPDATE story_nodes SET title = $1, content = $2, image_url = $3, is_ending_node = $4 \
             WHERE id = $5 AND btrim(content) = ''",
        )
        .bind(&node.title)
        .bind(&node.content)
        .bind(&node.image_url)
        .bind(node.is_ending_node)
        .bind(node.id)
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;
        if result.rows_affected() == 0 {
            return Err(PortError::Conflict(format!(
                "Node {} has already been written",
                node.node_key
            )));
        }

        insert_children(&mut tx, patch).await?;
        tx.commit().await.map_err(unavailable)
    }

    async fn get_story_progress(
        &self,
        user_id: Uuid,
        story_id: Uuid,
    ) -> PortResult<Option<StoryProgress>> {
        let record = sqlx::query_as::<_, ProgressRecord>(&format!(
            "SELECT {} FROM user_story_progress WHERE user_id = $1 AND story_id = $2",
            PROGRESS_COLUMNS
        ))
        .bind(user_id)
        .bind(story_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(record.map(|r| r.to_domain()))
    }

    async fn upsert_story_progress(&self, progress: &StoryProgress) -> PortResult<StoryProgress> {
        let record = sqlx::query_as::<_, ProgressRecord>(&format!(
            "INSERT INTO user_story_progress ({cols}) VALUES ($1, $2, $3, $4, $5, $6) \
             ON CONFLICT (user_id, story_id) DO UPDATE SET \
                 current_node_id = EXCLUDED.current_node_id, \
                 path_history = EXCLUDED.path_history, \
                 completed_at = EXCLUDED.completed_at, \
                 updated_at = NOW() \
             RETURNING {cols}",
            cols = PROGRESS_COLUMNS
        ))
        .bind(progress.id)
        .bind(progress.user_id)
        .bind(progress.story_id)
        .bind(progress.current_node_id)
        .bind(progress.path_history.clone())
        .bind(progress.completed_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| PortError::Unexpected(e.to_string()))?;

        Ok(record.to_domain())
    }

    async fn delete_story_progress(&self, user_id: Uuid, story_id: Uuid) -> PortResult<()> {
        sqlx::query("DELETE FROM user_story_progress WHERE user_id = $1 AND story_id = $2")
            .bind(user_id)
            .bind(story_id)
            .execute(&self.pool)
            .await
            .map_err(|e| PortError::Unexpected(e.to_string()))?;
        Ok(())
    }
}
