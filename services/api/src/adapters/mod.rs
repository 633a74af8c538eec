pub mod db;
pub mod image_gen;
pub mod story_llm;

pub use db::DbAdapter;
pub use image_gen::OpenAiImageAdapter;
pub use story_llm::OpenAiStoryAdapter;
