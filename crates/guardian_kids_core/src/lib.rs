pub mod domain;
pub mod engine;
pub mod flipbook;
pub mod generation;
pub mod graph;
pub mod illustration;
pub mod memory;
pub mod ports;

pub use domain::{
    AgeBand, Choice, FlipbookPage, GeneratedStory, GeneratedStoryPart, GraphPatch, Story,
    StoryImage, StoryNode, StoryPartRequest, StoryProgress, StoryRequest,
};
pub use engine::{AutoAdvance, StoryEngine, DEFAULT_AUTO_ADVANCE_DELAY};
pub use flipbook::generate_flipbook_pages;
pub use generation::{BranchWriter, StoryBeat};
pub use graph::{get_start_node, resolve_initial_node, StoryGraph};
pub use illustration::{illustrate_pages, illustration_jobs, IllustrationJob, IllustrationOutcome};
pub use memory::InMemoryStore;
pub use ports::{
    DatabaseService, ImageGenerationService, PortError, PortResult, StoryGenerationService,
};
