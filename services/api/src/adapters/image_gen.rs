//! services/api/src/adapters/image_gen.rs
//!
//! This module contains the adapter for OpenAI's image generation service.
//! It implements the `ImageGenerationService` port from the `core` crate.

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{CreateImageRequestArgs, Image, ImageModel, ImageResponseFormat, ImageSize},
    Client,
};
use async_trait::async_trait;
use guardian_kids_core::ports::{ImageGenerationService, PortError, PortResult};

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// An adapter that implements the `ImageGenerationService` port using the OpenAI Images API.
#[derive(Clone)]
pub struct OpenAiImageAdapter {
    client: Client<OpenAIConfig>,
    model: ImageModel,
}

impl OpenAiImageAdapter {
    /// Creates a new `OpenAiImageAdapter`.
    pub fn new(client: Client<OpenAIConfig>, model: ImageModel) -> Self {
        Self { client, model }
    }

    /// Maps a configured model name onto the client's model enum.
    pub fn model_from_name(name: &str) -> ImageModel {
        match name {
            "dall-e-2" => ImageModel::DallE2,
            "dall-e-3" => ImageModel::DallE3,
            other => ImageModel::Other(other.to_string()),
        }
    }
}

//=========================================================================================
// `ImageGenerationService` Trait Implementation
//=========================================================================================

#[async_trait]
impl ImageGenerationService for OpenAiImageAdapter {
    /// Generates one square illustration and returns its hosted URL.
    async fn generate_image(&self, prompt: &str) -> PortResult<String> {
        let request = CreateImageRequestArgs::default()
            .prompt(prompt)
            .model(self.model.clone())
            .n(1)
            .size(ImageSize::S1024x1024)
            .response_format(ImageResponseFormat::Url)
            .build()
            .map_err(|e| PortError::Unexpected(e.to_string()))?;

        // Call the API and manually map the error, which respects the orphan rule.
        let response = self
            .client
            .images()
            .create(request)
            .await
            .map_err(|e: OpenAIError| PortError::Generation(e.to_string()))?;

        let image: &Image = response.data.first().ok_or_else(|| {
            PortError::Generation("Image API returned no images.".to_string())
        })?;
        match image {
            Image::Url { url, .. } => Ok(url.clone()),
            Image::B64Json { .. } => Err(PortError::Generation(
                "Image API returned inline data instead of a URL.".to_string(),
            )),
        }
    }
}
