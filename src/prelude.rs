//! Commonly used items for the relay-bot internals.

pub use crate::base::{
    config::Config,
    types::{Attachment, ChatTurn, Err, ImageData, ImageFormat, InboundMessage, RelayError, Res, Void},
};
pub use crate::service::{chat::ChatClient, llm::LlmClient};
pub use anyhow::anyhow;
pub use tracing::{Instrument, debug, error, info, instrument, warn};
