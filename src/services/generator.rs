// Client for the external story generation service

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, instrument};

use crate::app_config::GeneratorConfig;
use crate::models::{UserStoryRequest, UserStoryResponse};

#[derive(Debug, Error)]
pub enum GeneratorError {
    #[error("Story generator unreachable: {0}")]
    Unavailable(String),

    #[error("Story generator returned {status}: {body}")]
    Upstream { status: u16, body: String },

    #[error("Story generator returned an invalid response: {0}")]
    InvalidResponse(String),
}

/// Turns a requirement into a user story artifact
#[async_trait]
pub trait StoryGenerator: Send + Sync {
    async fn generate(&self, request: &UserStoryRequest) -> Result<UserStoryResponse, GeneratorError>;
}

pub struct HttpStoryGenerator {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpStoryGenerator {
    pub fn new(config: &GeneratorConfig) -> Result<Self, GeneratorError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()
            .map_err(|e| GeneratorError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: format!("{}/generate-user-story", config.url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StoryGenerator for HttpStoryGenerator {
    #[instrument(skip(self, request), fields(endpoint = %self.endpoint))]
    async fn generate(&self, request: &UserStoryRequest) -> Result<UserStoryResponse, GeneratorError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(request)
            .send()
            .await
            .map_err(|e| GeneratorError::Unavailable(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!("Story generator error {}: {}", status, body);
            return Err(GeneratorError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let story = response
            .json::<UserStoryResponse>()
            .await
            .map_err(|e| GeneratorError::InvalidResponse(e.to_string()))?;

        if story.story.trim().is_empty() {
            return Err(GeneratorError::InvalidResponse(
                "response has no story text".to_string(),
            ));
        }

        debug!("Generated story with {} test cases", story.test_cases.len());
        Ok(story)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_path() {
        let generator = HttpStoryGenerator::new(&GeneratorConfig {
            url: "http://localhost:8000/".to_string(),
            timeout: 5,
        })
        .unwrap();
        assert_eq!(generator.endpoint(), "http://localhost:8000/generate-user-story");
    }
}
