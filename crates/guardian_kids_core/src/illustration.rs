//! crates/guardian_kids_core/src/illustration.rs
//!
//! Batch illustration of flipbook pages. Requests go out in fixed-size
//! batches: every request in a batch runs concurrently and the whole batch
//! finishes before the next one starts, which keeps the image provider's
//! rate limits in check.

use crate::domain::{FlipbookPage, Story};
use crate::ports::{ImageGenerationService, PortResult};
use futures::future::join_all;
use tracing::{debug, warn};

/// One illustration to generate for one content page.
#[derive(Debug, Clone, PartialEq)]
pub struct IllustrationJob {
    /// Index among the story's content pages.
    pub page_index: usize,
    pub prompt: String,
}

#[derive(Debug)]
pub struct IllustrationOutcome {
    pub page_index: usize,
    pub result: PortResult<String>,
}

/// Builds prompts for the requested content pages of `pages`.
///
/// Indices count content pages only; indices with no matching page are skipped.
pub fn illustration_jobs(
    story: &Story,
    pages: &[FlipbookPage],
    page_indices: &[usize],
) -> Vec<IllustrationJob> {
    let texts: Vec<&str> = pages
        .iter()
        .filter_map(|p| match p {
            FlipbookPage::Content { text } => Some(text.as_str()),
            _ => None,
        })
        .collect();

    page_indices
        .iter()
        .filter_map(|&page_index| {
            let text = texts.get(page_index)?;
            let excerpt: String = text.chars().take(400).collect();
            Some(IllustrationJob {
                page_index,
                prompt: format!(
                    "A gentle, colourful children's book illustration for the story \"{}\", showing this scene: {}",
                    story.title, excerpt
                ),
            })
        })
        .collect()
}

/// Runs `jobs` in batches of `batch_size` (at least one).
///
/// Outcomes come back in job order and a failed job does not stop the others.
pub async fn illustrate_pages(
    images: &dyn ImageGenerationService,
    jobs: Vec<IllustrationJob>,
    batch_size: usize,
) -> Vec<IllustrationOutcome> {
    let batch_size = batch_size.max(1);
    let mut outcomes = Vec::with_capacity(jobs.len());

    for (batch_no, batch) in jobs.chunks(batch_size).enumerate() {
        debug!(batch = batch_no, size = batch.len(), "Generating illustration batch");
        let results = join_all(batch.iter().map(|job| images.generate_image(&job.prompt))).await;

        for (job, result) in batch.iter().zip(results) {
            if let Err(e) = &result {
                warn!(page_index = job.page_index, "Illustration failed: {}", e);
            }
            outcomes.push(IllustrationOutcome {
                page_index: job.page_index,
                result,
            });
        }
    }
    outcomes
}
