//! services/api/src/adapters/story_llm.rs
//!
//! This module contains the adapter for the story-writing LLM.
//! It implements the `StoryGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs, ResponseFormat,
    },
    Client,
};
use async_trait::async_trait;
use guardian_kids_core::{
    domain::{GeneratedStory, GeneratedStoryPart, StoryPartRequest, StoryRequest},
    ports::{PortError, PortResult, StoryGenerationService},
};
use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;

const STORY_PART_INSTRUCTIONS: &str = r#"You are a children's author writing one part of an interactive, choose-your-path picture book.

Rules:
- Kind, safe and age-appropriate: no violence, no fear beyond gentle suspense.
- Short paragraphs separated by a blank line.
- Continue naturally from the previous part and honour the reader's choice.
- Unless this is the ending, finish on a small decision and offer exactly two short choices (at most eight words each).
- For the ending, tie the story up warmly and offer no choices.

Reply with a single JSON object and nothing else:
{"title": "...", "content": "...", "choices": ["...", "..."], "image_prompt": "..."}
The image_prompt describes one illustration for this part in a soft picture-book style."#;

const STORY_INSTRUCTIONS: &str = r#"You are a children's author writing a complete bedtime picture book.

Rules:
- Kind, safe and age-appropriate.
- Short paragraphs separated by a blank line.
- A clear beginning, middle and happy ending.

Reply with a single JSON object and nothing else:
{"title": "...", "content": "..."}"#;

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements `StoryGenerationService` using an OpenAI-compatible LLM.
#[derive(Clone)]
pub struct OpenAiStoryAdapter {
    client: Client<OpenAIConfig>,
    model: String,
}

impl OpenAiStoryAdapter {
    /// Creates a new `OpenAiStoryAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: String) -> Self {
        Self { client, model }
    }

    /// Sends one system + user exchange and returns the JSON text of the reply.
    async fn complete_json(&self, instructions: &str, prompt: String) -> PortResult<String> {
        let messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(instructions)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
            ChatCompletionRequestUserMessageArgs::default()
                .content(prompt)
                .build()
                .map_err(|e| PortError::Unexpected(e.to_string()))?
                .into(),
        ];

        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages)
            .response_format(ResponseFormat::JsonObject)
            .temperature(0.8)
            .n(1)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        let response = self
            .client
            .chat()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Generation(e.to_string()))?;

        let content = response
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .ok_or_else(|| {
                PortError::Generation("Story LLM response contained no text content.".to_string())
            })?;

        Ok(extract_json(&content).to_string())
    }
}

//=========================================================================================
// Reply Parsing
//=========================================================================================

#[derive(Deserialize)]
struct StoryPartReply {
    title: Option<String>,
    content: String,
    #[serde(default)]
    choices: Vec<String>,
    image_prompt: Option<String>,
}

#[derive(Deserialize)]
struct StoryReply {
    title: String,
    content: String,
}

/// Strips a markdown code fence the model sometimes wraps its JSON in.
fn extract_json(reply: &str) -> &str {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    let fence = FENCE.get_or_init(|| {
        Regex::new(r"(?s)^\s*```(?:json)?\s*(.*?)\s*```\s*$").expect("fence pattern is valid")
    });
    match fence.captures(reply).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str(),
        None => reply.trim(),
    }
}

fn parse_story_part(json: &str) -> PortResult<GeneratedStoryPart> {
    let reply: StoryPartReply = serde_json::from_str(json)
        .map_err(|e| PortError::Generation(format!("Unreadable story part: {}", e)))?;
    Ok(GeneratedStoryPart {
        title: reply.title.filter(|t| !t.trim().is_empty()),
        content: reply.content.trim().to_string(),
        choices: reply.choices,
        image_prompt: reply.image_prompt.filter(|p| !p.trim().is_empty()),
    })
}

fn parse_story(json: &str) -> PortResult<GeneratedStory> {
    let reply: StoryReply = serde_json::from_str(json)
        .map_err(|e| PortError::Generation(format!("Unreadable story: {}", e)))?;
    Ok(GeneratedStory {
        title: reply.title.trim().to_string(),
        content: reply.content.trim().to_string(),
    })
}

fn story_part_prompt(request: &StoryPartRequest) -> String {
    let mut prompt = format!(
        "STORY TITLE: {}\nREADER AGE BAND: {} (aim for about {} words)\nSTORY BEAT: {}{}\n",
        request.story_title,
        request.age_band,
        request.age_band.target_words(),
        request.beat,
        if request.is_ending { " (this is the ending)" } else { "" },
    );
    if let Some(previous) = &request.previous_text {
        prompt.push_str(&format!("\nPREVIOUS PART:\n---\n{}\n---\n", previous));
    }
    if let Some(path) = &request.chosen_path {
        prompt.push_str(&format!("\nTHE READER CHOSE: {}\n", path));
    }
    prompt
}

//=========================================================================================
// `StoryGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl StoryGenerationService for OpenAiStoryAdapter {
    async fn generate_story_part(&self, request: &StoryPartRequest) -> PortResult<GeneratedStoryPart> {
        let json = self
            .complete_json(STORY_PART_INSTRUCTIONS, story_part_prompt(request))
            .await?;
        parse_story_part(&json)
    }

    async fn generate_story(&self, request: &StoryRequest) -> PortResult<GeneratedStory> {
        let prompt = format!(
            "READER AGE BAND: {} (aim for about {} words in total, never fewer than {})\nIDEA: {}",
            request.age_band,
            request.age_band.target_words() * 4,
            request.age_band.target_words(),
            request.prompt
        );
        let json = self.complete_json(STORY_INSTRUCTIONS, prompt).await?;
        parse_story(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guardian_kids_core::domain::AgeBand;

    #[test]
    fn fenced_replies_are_unwrapped() {
        let reply = "```json\n{\"title\": \"T\", \"content\": \"C\"}\n```";
        assert_eq!(extract_json(reply), "{\"title\": \"T\", \"content\": \"C\"}");
        assert_eq!(extract_json("  {\"a\": 1}  "), "{\"a\": 1}");
    }

    #[test]
    fn story_parts_are_parsed_and_tidied() {
        let part = parse_story_part(
            r#"{"title": " ", "content": "  Pip woke up.\n\nThe sun was out. ", "choices": ["Play", "Nap"]}"#,
        )
        .unwrap();

        assert_eq!(part.title, None);
        assert_eq!(part.content, "Pip woke up.\n\nThe sun was out.");
        assert_eq!(part.choices, vec!["Play", "Nap"]);
        assert_eq!(part.image_prompt, None);
    }

    #[test]
    fn endings_may_omit_choices() {
        let part = parse_story_part(r#"{"content": "The end came softly."}"#).unwrap();
        assert!(part.choices.is_empty());
    }

    #[test]
    fn garbage_is_a_generation_error() {
        assert!(matches!(parse_story_part("Once upon a time"), Err(PortError::Generation(_))));
        assert!(matches!(parse_story("{\"title\": 3}"), Err(PortError::Generation(_))));
    }

    #[test]
    fn prompts_carry_the_context() {
        let prompt = story_part_prompt(&StoryPartRequest {
            story_title: "The Lantern Fox".to_string(),
            age_band: AgeBand::B,
            beat: "climax".to_string(),
            is_ending: false,
            previous_text: Some("The fox reached the river.".to_string()),
            chosen_path: Some("Cross the bridge".to_string()),
        });

        assert!(prompt.contains("The Lantern Fox"));
        assert!(prompt.contains("about 300 words"));
        assert!(prompt.contains("STORY BEAT: climax\n"));
        assert!(prompt.contains("The fox reached the river."));
        assert!(prompt.contains("THE READER CHOSE: Cross the bridge"));
    }
}
