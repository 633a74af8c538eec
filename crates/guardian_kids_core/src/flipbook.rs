//! crates/guardian_kids_core/src/flipbook.rs
//!
//! Lays a linear story out as flipbook pages: a cover, the text packed into
//! pages of roughly equal length, up to three illustrations spread through
//! the book, and a closing page.

use crate::domain::{FlipbookPage, Story};

/// Soft word budget for one text page.
pub const WORDS_PER_PAGE: usize = 300;

/// Where illustrations go, as fractions of the text page count.
const ILLUSTRATION_POINTS: [f64; 3] = [0.25, 0.50, 0.75];

pub const END_TEXT: &str = "~ The End ~";

/// Builds the page sequence for `story`.
///
/// `images` is the story's illustration pool in display order; any entry equal
/// to the cover image is skipped. The result depends only on the inputs.
pub fn generate_flipbook_pages(
    story: &Story,
    images: &[String],
    creator_name: &str,
) -> Vec<FlipbookPage> {
    let mut pages = vec![FlipbookPage::Cover {
        image_url: story.cover_image_url.clone(),
        title: story.title.clone(),
        subtitle: format!("By {}", creator_name),
    }];

    let text_pages = paginate_text(&story.content);
    let points = illustration_points(text_pages.len());
    let pool: Vec<&String> = images
        .iter()
        .filter(|url| story.cover_image_url.as_deref() != Some(url.as_str()))
        .collect();

    let mut inserted = 0;
    for (index, text) in text_pages.into_iter().enumerate() {
        pages.push(FlipbookPage::Content { text });
        if points.contains(&index) {
            if let Some(url) = pool.get(inserted) {
                pages.push(FlipbookPage::Illustration {
                    image_url: (*url).clone(),
                });
                inserted += 1;
            }
        }
    }

    pages.push(FlipbookPage::End {
        text: END_TEXT.to_string(),
    });
    pages
}

/// Splits story text into page-sized chunks of whole paragraphs.
///
/// Paragraphs are packed greedily; a page is closed once the next paragraph
/// would take it over the budget. A paragraph is never split, so one longer
/// than the budget gets a page to itself.
pub fn paginate_text(content: &str) -> Vec<String> {
    let mut pages = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut current_words = 0;

    for paragraph in content.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
        let words = word_count(paragraph);
        if current_words + words > WORDS_PER_PAGE && !current.is_empty() {
            pages.push(current.join("\n\n"));
            current.clear();
            current_words = 0;
        }
        current.push(paragraph);
        current_words += words;
    }
    if !current.is_empty() {
        pages.push(current.join("\n\n"));
    }
    pages
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Text page indices after which an illustration may follow. Entries can
/// repeat for short books.
fn illustration_points(page_count: usize) -> [usize; 3] {
    ILLUSTRATION_POINTS.map(|fraction| (page_count as f64 * fraction).floor() as usize)
}
