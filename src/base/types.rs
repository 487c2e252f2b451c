//! Shared types and result aliases.

use thiserror::Error;

use crate::base::prompts;

/// The error type used throughout the crate.
pub type Err = anyhow::Error;
/// A result with the crate error type.
pub type Res<T> = Result<T, Err>;
/// A result with no value.
pub type Void = Res<()>;

/// A file attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// The filename as reported by the platform.
    pub filename: String,
    /// Where the file body can be fetched from.
    pub url: String,
}

/// A platform-neutral inbound chat message.
///
/// Chat clients convert their native events into this shape before handing
/// them to the relay.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InboundMessage {
    /// The platform message ID (Discord snowflake, Slack `ts`).
    pub message_id: String,
    /// The author's user ID.
    pub author_id: String,
    /// The channel the message was posted in.
    pub channel_id: String,
    /// The guild (Discord) or team (Slack) ID, if any.
    pub guild_id: Option<String>,
    /// The text content.
    pub content: String,
    /// Attachments, in the order the platform reports them.
    pub attachments: Vec<Attachment>,
}

/// Who authored a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatRole {
    /// A message from the user.
    User,
    /// A reply from the model.
    Model,
}

/// One turn of a chat session history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatTurn {
    /// Who said it.
    pub role: ChatRole,
    /// What was said.
    pub text: String,
}

impl ChatTurn {
    /// A user turn.
    pub fn user(text: impl Into<String>) -> Self {
        Self { role: ChatRole::User, text: text.into() }
    }

    /// A model turn.
    pub fn model(text: impl Into<String>) -> Self {
        Self { role: ChatRole::Model, text: text.into() }
    }
}

/// Supported image formats for the attachment path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    /// `.jpg` / `.jpeg`.
    Jpeg,
    /// `.png`.
    Png,
    /// `.webp`.
    Webp,
}

/// Downloaded image bytes along with their format.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageData {
    /// Format derived from the filename.
    pub format: ImageFormat,
    /// The raw file body.
    pub bytes: Vec<u8>,
}

/// Per-request failures of the message relay.
///
/// None of these tear down the process; they end the request that produced
/// them and are reported back into the originating channel.
#[derive(Debug, Error)]
pub enum RelayError {
    /// The attachment is not a supported image type.
    #[error("unsupported attachment type: {0}")]
    UnsupportedAttachment(String),
    /// The attachment could not be fetched.
    #[error("failed to download attachment: {0}")]
    Download(Err),
    /// The model request or its stream failed.
    #[error("generative backend failed: {0}")]
    Backend(Err),
}

impl RelayError {
    /// The text shown to users in the channel for this failure.
    pub fn user_message(&self) -> &'static str {
        match self {
            RelayError::UnsupportedAttachment(_) => prompts::INVALID_IMAGE_TYPE,
            RelayError::Download(_) => prompts::DOWNLOAD_FAILED,
            RelayError::Backend(_) => prompts::BACKEND_FAILED,
        }
    }
}
