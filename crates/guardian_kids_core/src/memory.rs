//! crates/guardian_kids_core/src/memory.rs
//!
//! An in-process implementation of the `DatabaseService` port. It backs tests
//! and local demos, and can be told to fail progress reads or writes so the
//! engine's fail-open paths can be exercised.

use crate::domain::{Choice, GraphPatch, Story, StoryImage, StoryNode, StoryProgress};
use crate::ports::{DatabaseService, PortError, PortResult};
use async_trait::async_trait;
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    stories: Vec<Story>,
    images: Vec<StoryImage>,
    nodes: Vec<StoryNode>,
    choices: Vec<Choice>,
    progress: Vec<StoryProgress>,
}

impl Tables {
    /// Fails if any of `nodes` reuses a key already taken in its story, or by another of `nodes`.
    fn check_new_keys<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a StoryNode>,
    ) -> PortResult<()> {
        let mut taken: Vec<(Uuid, &str)> = Vec::new();
        for node in nodes {
            let clash = taken.contains(&(node.story_id, node.node_key.as_str()))
                || self
                    .nodes
                    .iter()
                    .any(|n| n.story_id == node.story_id && n.node_key == node.node_key);
            if clash {
                return Err(PortError::Conflict(format!(
                    "Node key '{}' already used in story {}",
                    node.node_key, node.story_id
                )));
            }
            taken.push((node.story_id, node.node_key.as_str()));
        }
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    fail_progress_reads: AtomicBool,
    fail_progress_writes: AtomicBool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `get_story_progress` fail until switched off again.
    pub fn set_fail_progress_reads(&self, fail: bool) {
        self.fail_progress_reads.store(fail, Ordering::SeqCst);
    }

    /// Makes `upsert_story_progress` and `delete_story_progress` fail until switched off again.
    pub fn set_fail_progress_writes(&self, fail: bool) {
        self.fail_progress_writes.store(fail, Ordering::SeqCst);
    }

    fn tables(&self) -> PortResult<MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| PortError::Unexpected("In-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl DatabaseService for InMemoryStore {
    async fn list_stories(&self) -> PortResult<Vec<Story>> {
        let mut stories = self.tables()?.stories.clone();
        stories.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(stories)
    }

    async fn get_story_by_id(&self, story_id: Uuid) -> PortResult<Story> {
        self.tables()?
            .stories
            .iter()
            .find(|s| s.id == story_id)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Story {} not found", story_id)))
    }

    async fn create_story(&self, story: Story) -> PortResult<Story> {
        let mut tables = self.tables()?;
        if tables.stories.iter().any(|s| s.id == story.id) {
            return Err(PortError::Conflict(format!("Story {} already exists", story.id)));
        }
        tables.stories.push(story.clone());
        Ok(story)
    }

    async fn get_story_images(&self, story_id: Uuid) -> PortResult<Vec<StoryImage>> {
        let mut images: Vec<StoryImage> = self
            .tables()?
            .images
            .iter()
            .filter(|i| i.story_id == story_id)
            .cloned()
            .collect();
        images.sort_by(|a, b| {
            a.page_index
                .cmp(&b.page_index)
                .then(a.created_at.cmp(&b.created_at))
        });
        Ok(images)
    }

    async fn add_story_image(
        &self,
        story_id: Uuid,
        page_index: usize,
        image_url: &str,
    ) -> PortResult<StoryImage> {
        let image = StoryImage {
            id: Uuid::new_v4(),
            story_id,
            page_index,
            image_url: image_url.to_string(),
            created_at: Utc::now(),
        };
        self.tables()?.images.push(image.clone());
        Ok(image)
    }

    async fn get_story_nodes(&self, story_id: Uuid) -> PortResult<Vec<StoryNode>> {
        Ok(self
            .tables()?
            .nodes
            .iter()
            .filter(|n| n.story_id == story_id)
            .cloned()
            .collect())
    }

    async fn get_story_choices(&self, story_id: Uuid) -> PortResult<Vec<Choice>> {
        let tables = self.tables()?;
        let node_ids: Vec<Uuid> = tables
            .nodes
            .iter()
            .filter(|n| n.story_id == story_id)
            .map(|n| n.id)
            .collect();
        Ok(tables
            .choices
            .iter()
            .filter(|c| node_ids.contains(&c.from_node_id))
            .cloned()
            .collect())
    }

    async fn create_story_node(&self, node: StoryNode) -> PortResult<()> {
        let mut tables = self.tables()?;
        tables.check_new_keys([&node])?;
        tables.nodes.push(node);
        Ok(())
    }

    async fn create_choice(&self, choice: Choice) -> PortResult<()> {
        self.tables()?.choices.push(choice);
        Ok(())
    }

    async fn create_branch(&self, patch: &GraphPatch) -> PortResult<()> {
        let mut tables = self.tables()?;
        tables.check_new_keys(std::iter::once(&patch.node).chain(&patch.new_nodes))?;
        tables.nodes.push(patch.node.clone());
        tables.nodes.extend(patch.new_nodes.iter().cloned());
        tables.choices.extend(patch.new_choices.iter().cloned());
        Ok(())
    }

    async fn fill_placeholder(&self, patch: &GraphPatch) -> PortResult<()> {
        let mut tables = self.tables()?;
        let index = tables
            .nodes
            .iter()
            .position(|n| n.id == patch.node.id)
            .ok_or_else(|| PortError::NotFound(format!("Node {} not found", patch.node.id)))?;
        if !tables.nodes[index].is_placeholder() {
            return Err(PortError::Conflict(format!(
                "Node {} has already been written",
                patch.node.node_key
            )));
        }
        tables.check_new_keys(&patch.new_nodes)?;

        tables.nodes[index] = patch.node.clone();
        tables.nodes.extend(patch.new_nodes.iter().cloned());
        tables.choices.extend(patch.new_choices.iter().cloned());
        Ok(())
    }

    async fn get_story_progress(
        &self,
        user_id: Uuid,
        story_id: Uuid,
    ) -> PortResult<Option<StoryProgress>> {
        if self.fail_progress_reads.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("progress read refused".to_string()));
        }
        Ok(self
            .tables()?
            .progress
            .iter()
            .find(|p| p.user_id == user_id && p.story_id == story_id)
            .cloned())
    }

    async fn upsert_story_progress(&self, progress: &StoryProgress) -> PortResult<StoryProgress> {
        if self.fail_progress_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("progress write refused".to_string()));
        }
        let mut tables = self.tables()?;
        let existing = tables
            .progress
            .iter_mut()
            .find(|p| p.user_id == progress.user_id && p.story_id == progress.story_id);
        let saved = match existing {
            Some(row) => {
                *row = StoryProgress {
                    id: row.id,
                    ..progress.clone()
                };
                row.clone()
            }
            None => {
                tables.progress.push(progress.clone());
                progress.clone()
            }
        };
        Ok(saved)
    }

    async fn delete_story_progress(&self, user_id: Uuid, story_id: Uuid) -> PortResult<()> {
        if self.fail_progress_writes.load(Ordering::SeqCst) {
            return Err(PortError::Unexpected("progress delete refused".to_string()));
        }
        self.tables()?
            .progress
            .retain(|p| !(p.user_id == user_id && p.story_id == story_id));
        Ok(())
    }
}
