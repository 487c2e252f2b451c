pub mod discord;
pub mod slack;

use std::{ops::Deref, sync::Arc};

use async_trait::async_trait;

use crate::base::types::{Attachment, Res, Void};

// Traits.

/// Generic "chat" trait that clients must implement.
///
/// This trait defines the core functionality for interacting with chat platforms
/// like Discord or Slack. Implementing this trait allows different chat services
/// to be used with the relay-bot.
#[async_trait]
pub trait GenericChatClient: Send + Sync + 'static {
    /// Get the bot user ID.
    ///
    /// Returns the unique identifier for the bot in the chat platform,
    /// which is used to ignore the bot's own messages.
    fn bot_user_id(&self) -> &str;

    /// The largest message, in characters, the platform accepts.
    fn message_limit(&self) -> usize;

    /// Start the chat client listener.
    ///
    /// This sets up event listeners for the chat platform and processes
    /// incoming messages until a shutdown signal arrives.
    async fn start(&self) -> Void;

    /// Send a plain message to a channel.
    async fn send_message(&self, channel_id: &str, text: &str) -> Void;

    /// Send a reply to a message, returning the ID of the new message.
    async fn send_reply(&self, channel_id: &str, reply_to: &str, text: &str) -> Res<String>;

    /// Overwrite the text of a message the bot sent earlier.
    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Void;

    /// Fetch the body of an attachment.
    async fn download_attachment(&self, attachment: &Attachment) -> Res<Vec<u8>>;
}

// Structs.

/// Chat client for the application.
///
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct ChatClient {
    inner: Arc<dyn GenericChatClient>,
}

impl Deref for ChatClient {
    type Target = dyn GenericChatClient;

    fn deref(&self) -> &Self::Target {
        &*self.inner
    }
}

impl ChatClient {
    pub fn new(inner: Arc<dyn GenericChatClient>) -> Self {
        Self { inner }
    }
}
