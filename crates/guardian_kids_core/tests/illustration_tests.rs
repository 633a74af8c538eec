//! Integration tests for batch illustration of flipbook pages.

mod common;

use common::{story, CountingImages};
use guardian_kids_core::{
    generate_flipbook_pages, illustrate_pages, illustration_jobs, IllustrationJob,
};
use std::sync::atomic::Ordering;

fn jobs(n: usize) -> Vec<IllustrationJob> {
    (0..n)
        .map(|i| IllustrationJob {
            page_index: i,
            prompt: format!("scene {}", i),
        })
        .collect()
}

#[tokio::test]
async fn batches_run_concurrently_up_to_the_batch_width() {
    let images = CountingImages::default();

    let outcomes = illustrate_pages(&images, jobs(7), 3).await;

    assert_eq!(outcomes.len(), 7);
    assert_eq!(images.calls(), 7);
    assert_eq!(images.max_in_flight.load(Ordering::SeqCst), 3);
    let order: Vec<usize> = outcomes.iter().map(|o| o.page_index).collect();
    assert_eq!(order, vec![0, 1, 2, 3, 4, 5, 6]);
}

#[tokio::test]
async fn zero_batch_width_runs_one_at_a_time() {
    let images = CountingImages::default();

    let outcomes = illustrate_pages(&images, jobs(3), 0).await;

    assert_eq!(outcomes.len(), 3);
    assert_eq!(images.max_in_flight.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn one_failure_does_not_sink_the_batch() {
    let images = CountingImages::failing_on("scene 1");

    let outcomes = illustrate_pages(&images, jobs(3), 3).await;

    assert!(outcomes[0].result.is_ok());
    assert!(outcomes[1].result.is_err());
    assert!(outcomes[2].result.is_ok());
}

#[test]
fn jobs_are_built_for_existing_content_pages_only() {
    let mut s = story(false);
    s.content = "The fox woke up.\n\nThe fox went out.".to_string();
    let pages = generate_flipbook_pages(&s, &[], "Mira");

    let built = illustration_jobs(&s, &pages, &[0, 5]);

    assert_eq!(built.len(), 1);
    assert_eq!(built[0].page_index, 0);
    assert!(built[0].prompt.contains("The Lantern Fox"));
    assert!(built[0].prompt.contains("The fox woke up."));
}
