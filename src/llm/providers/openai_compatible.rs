use std::time::Duration;

use async_trait::async_trait;

use crate::config::ModelConfig;
use crate::errors::{HeatloopError, HeatloopResult};
use crate::llm::provider::VisionModel;
use crate::llm::types::{ChatMessage, ChatRequest, ChatResponse, ContentPart, ImageUrl};
use crate::perception::codec;

const MAX_BACKOFF: Duration = Duration::from_secs(16);

/// Chat-completions client for any OpenAI-compatible endpoint (LM Studio,
/// llama.cpp server, vLLM, hosted APIs).
pub struct OpenAiCompatibleModel {
    config: ModelConfig,
    api_key: Option<String>,
    system_prompt: String,
    initial_backoff: Duration,
    client: reqwest::Client,
}

impl OpenAiCompatibleModel {
    pub fn new(config: ModelConfig, system_prompt: String) -> Self {
        let api_key = config.resolved_api_key();
        Self {
            config,
            api_key,
            system_prompt,
            initial_backoff: Duration::from_secs(1),
            client: reqwest::Client::new(),
        }
    }

    /// First retry delay; doubles per attempt up to 16 s.
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    pub fn build_request(&self, story: &str, annotated_png: &[u8]) -> ChatRequest {
        let mut parts = vec![ContentPart::Text { text: story.to_string() }];
        if !annotated_png.is_empty() {
            parts.push(ContentPart::ImageUrl {
                image_url: ImageUrl {
                    url: format!("data:image/png;base64,{}", codec::to_base64(annotated_png)),
                },
            });
        }
        ChatRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage::system(self.system_prompt.clone()), ChatMessage::user_parts(parts)],
            temperature: self.config.temperature,
            top_p: self.config.top_p,
            max_tokens: self.config.max_tokens,
            stream: false,
        }
    }

    async fn post_once(&self, body: &ChatRequest) -> HeatloopResult<String> {
        let mut req = self.client.post(&self.config.api_base).json(body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }
        let response = req.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let err_body = response.text().await.unwrap_or_default();
            return Err(HeatloopError::Model(format!("{status}: {err_body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        let content = parsed.first_content().unwrap_or_default().to_string();
        tracing::info!(content_len = content.len(), "model response received");
        Ok(content)
    }
}

#[async_trait]
impl VisionModel for OpenAiCompatibleModel {
    fn name(&self) -> &str {
        &self.config.model
    }

    async fn decide(&self, story: &str, annotated_png: &[u8]) -> HeatloopResult<String> {
        let body = self.build_request(story, annotated_png);
        tracing::debug!(
            model = %self.config.model,
            story_len = story.len(),
            image_bytes = annotated_png.len(),
            "sending model request"
        );

        let attempts = self.config.max_attempts.max(1);
        let mut delay = self.initial_backoff;
        let mut last_err = None;
        for attempt in 1..=attempts {
            match self.post_once(&body).await {
                Ok(content) => return Ok(content),
                Err(e) => {
                    tracing::warn!(attempt, attempts, error = %e, "model call failed");
                    last_err = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = (delay * 2).min(MAX_BACKOFF);
                    }
                }
            }
        }
        Err(HeatloopError::Model(format!(
            "gave up after {attempts} attempts: {}",
            last_err.map(|e| e.to_string()).unwrap_or_default()
        )))
    }
}
