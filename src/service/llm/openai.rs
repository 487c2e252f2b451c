//! Integration with generative model services over the OpenAI chat API.
//!
//! This module provides a thin wrapper around `async-openai` for streaming
//! chat completions. Gemini exposes an OpenAI-compatible endpoint, so the same
//! client serves both Gemini (the default `api_base`) and OpenAI proper.

use std::{sync::Arc, time::Duration};

use async_openai::{
    Client,
    config::OpenAIConfig,
    types::{
        ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage, ChatCompletionRequestMessageContentPartImageArgs, ChatCompletionRequestMessageContentPartTextArgs,
        ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs, ChatCompletionRequestUserMessageContentPart, ChatCompletionResponseStream, CreateChatCompletionRequest,
        CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse, ImageDetail, ImageUrlArgs,
    },
};
use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use futures::StreamExt;
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::base::{
    config::Config,
    types::{ChatRole, ChatTurn, ImageData, Res},
};

use super::{CompletionStream, GenericLlmClient, LlmClient};

// Extra methods on `LlmClient` applied by the openai implementation.

impl LlmClient {
    pub fn openai(config: &Config) -> Self {
        let client = OpenAiLlmClient::new(config);
        Self { inner: Arc::new(client) }
    }
}

// Specific implementations.

/// OpenAI-compatible LLM client implementation.
#[derive(Clone)]
pub struct OpenAiLlmClient {
    client: Client<OpenAIConfig>,
    config: Config,
}

impl OpenAiLlmClient {
    /// Create a new OpenAI-compatible LLM client.
    #[instrument(name = "OpenAiLlmClient::new", skip_all)]
    pub fn new(config: &Config) -> Self {
        let cfg = OpenAIConfig::new().with_api_key(config.api_key.clone()).with_api_base(config.api_base.clone());

        Self {
            client: Client::with_config(cfg),
            config: config.clone(),
        }
    }

    /// Build the chat messages for a text conversation.
    #[instrument(name = "OpenAiLlmClient::build_chat_messages", skip_all)]
    fn build_chat_messages(&self, history: &[ChatTurn]) -> Res<Vec<ChatCompletionRequestMessage>> {
        let mut messages = Vec::with_capacity(history.len() + 1);

        if !self.config.system_directive.trim().is_empty() {
            messages.push(ChatCompletionRequestSystemMessageArgs::default().content(self.config.system_directive.clone()).build()?.into());
        }

        for turn in history {
            let message = match turn.role {
                ChatRole::User => ChatCompletionRequestUserMessageArgs::default().content(turn.text.clone()).build()?.into(),
                ChatRole::Model => ChatCompletionRequestAssistantMessageArgs::default().content(turn.text.clone()).build()?.into(),
            };

            messages.push(message);
        }

        Ok(messages)
    }

    /// Build the single user message carrying an image and its prompt.
    #[instrument(name = "OpenAiLlmClient::build_image_messages", skip_all)]
    fn build_image_messages(&self, image: &ImageData, prompt: &str) -> Res<Vec<ChatCompletionRequestMessage>> {
        let data_uri = format!("data:{};base64,{}", image.format.mime_type(), BASE64.encode(&image.bytes));

        let parts: Vec<ChatCompletionRequestUserMessageContentPart> = vec![
            ChatCompletionRequestMessageContentPartTextArgs::default().text(prompt).build()?.into(),
            ChatCompletionRequestMessageContentPartImageArgs::default()
                .image_url(ImageUrlArgs::default().url(data_uri).detail(ImageDetail::Auto).build()?)
                .build()?
                .into(),
        ];

        Ok(vec![ChatCompletionRequestUserMessageArgs::default().content(parts).build()?.into()])
    }

    /// Build a streaming request for the given model.
    fn build_request(&self, model: &str, messages: Vec<ChatCompletionRequestMessage>) -> Res<CreateChatCompletionRequest> {
        Ok(CreateChatCompletionRequestArgs::default()
            .model(model)
            .messages(messages)
            .temperature(self.config.temperature)
            .max_completion_tokens(self.config.max_tokens)
            .stream(true)
            .build()?)
    }

    /// Helper function to open a completion stream with retry logic and timeout handling.
    ///
    /// Only opening the stream is retried; once chunks flow, a failure ends the request.
    async fn open_stream(&self, request: CreateChatCompletionRequest) -> Res<ChatCompletionResponseStream> {
        const MAX_RETRIES: u32 = 3;
        const RETRY_DELAY_MS: u64 = 1000;

        let mut retries = 0;

        loop {
            let result = timeout(self.config.request_timeout(), self.client.chat().create_stream(request.clone())).await;

            match result {
                Ok(Ok(stream)) => {
                    info!("Completion stream opened after {} attempts", retries + 1);
                    return Ok(stream);
                }
                Ok(Err(err)) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("Completion request failed after {MAX_RETRIES} retries: {err}"));
                    }
                    retries += 1;
                    warn!("Completion request failed, retrying {retries}/{MAX_RETRIES}: {err}");
                }
                Err(_) => {
                    if retries >= MAX_RETRIES {
                        return Err(anyhow::anyhow!("Completion request timed out after {MAX_RETRIES} attempts"));
                    }
                    retries += 1;
                    warn!("Completion request timed out, retrying {retries}/{MAX_RETRIES}");
                }
            }

            let delay = Duration::from_millis(RETRY_DELAY_MS * 2_u64.pow(retries - 1));
            tokio::time::sleep(delay).await;
        }
    }
}

#[async_trait]
impl GenericLlmClient for OpenAiLlmClient {
    #[instrument(name = "OpenAiLlmClient::stream_image_completion", skip_all)]
    async fn stream_image_completion(&self, image: &ImageData, prompt: &str) -> Res<CompletionStream> {
        debug!("Streaming image completion ({:?}, {} bytes)", image.format, image.bytes.len());

        let messages = self.build_image_messages(image, prompt)?;
        let request = self.build_request(&self.config.vision_model, messages)?;
        let stream = self.open_stream(request).await?;

        Ok(into_completion_stream(stream))
    }

    #[instrument(name = "OpenAiLlmClient::stream_chat_completion", skip_all)]
    async fn stream_chat_completion(&self, history: &[ChatTurn]) -> Res<CompletionStream> {
        debug!("Streaming chat completion with {} turns of history", history.len());

        let messages = self.build_chat_messages(history)?;
        let request = self.build_request(&self.config.text_model, messages)?;
        let stream = self.open_stream(request).await?;

        Ok(into_completion_stream(stream))
    }
}

/// Map the raw response stream into text chunks, dropping empty deltas.
fn into_completion_stream(stream: ChatCompletionResponseStream) -> CompletionStream {
    Box::pin(stream.filter_map(|item| async move {
        match item {
            Ok(response) => delta_text(response).map(Ok),
            Err(err) => Some(Err(anyhow::anyhow!("Completion stream failed: {err}"))),
        }
    }))
}

/// Concatenate the content deltas of one stream response.
fn delta_text(response: CreateChatCompletionStreamResponse) -> Option<String> {
    let text = response.choices.into_iter().filter_map(|choice| choice.delta.content).collect::<String>();

    if text.is_empty() { None } else { Some(text) }
}

// Tests.
