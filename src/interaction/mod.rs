//! Event handling and user interactions for relay-bot.
//!
//! This module provides functionality for handling inbound chat messages:
//! - Relaying text and image messages to the generative model
//! - Keeping per-user, per-channel chat sessions
//! - Streaming completions back into a reply message

pub mod attachment;
pub mod relay;
pub mod session;
pub mod stream;
