pub mod openai;

use std::{ops::Deref, pin::Pin, sync::Arc};

use async_trait::async_trait;
use futures::Stream;

use crate::base::types::{ChatTurn, ImageData, Res};

// Types.

/// A finite stream of completion text chunks.
///
/// The stream ending is the "done" signal; an `Err` item means the backend
/// failed partway through.
pub type CompletionStream = Pin<Box<dyn Stream<Item = Res<String>> + Send>>;

// Traits.

/// Generic LLM client trait that clients must implement.
///
/// This trait defines the core functionality for interacting with generative models.
/// Implementing this trait allows different LLM providers to be used with the relay-bot.
#[async_trait]
pub trait GenericLlmClient: Send + Sync + 'static {
    /// Stream a one-shot completion for an image and a prompt from the image-capable model.
    async fn stream_image_completion(&self, image: &ImageData, prompt: &str) -> Res<CompletionStream>;

    /// Stream the next model turn of a chat from the text-only model.
    ///
    /// The history ends with the user turn being answered.
    async fn stream_chat_completion(&self, history: &[ChatTurn]) -> Res<CompletionStream>;
}

// Structs.

/// LLM client for the application.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct LlmClient {
    inner: Arc<dyn GenericLlmClient>,
}

impl Deref for LlmClient {
    type Target = dyn GenericLlmClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl LlmClient {
    pub fn new(inner: Arc<dyn GenericLlmClient>) -> Self {
        Self { inner }
    }
}
