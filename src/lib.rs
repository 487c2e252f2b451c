//! Library root for `relay-bot`.
//!
//! Relay-bot connects a Discord or Slack channel to a generative model:
//! - Text messages continue a per-user, per-channel chat session
//! - Image attachments are described (or prompted about) by a vision model
//! - Replies stream in by editing a placeholder message as chunks arrive
//!
//! The bot integrates with Discord (serenity) or Slack (slack-morphism) for chat,
//! and with Gemini through the OpenAI-compatible API for completions. The
//! architecture is built around traits for each service, so each can be
//! swapped or mocked.

#[deny(missing_docs)]
pub mod base;
pub mod interaction;
pub mod prelude;
pub mod runtime;
pub mod service;

use base::{config::Config, types::Void};
use rustls::crypto;
use tracing::info;

/// Public async entry for the binary crate.
///
/// Sets up necessary services and starts the relay-bot runtime:
/// - Initializes the crypto provider
/// - Creates the runtime context with LLM and chat clients
/// - Runs the chat listener until a shutdown signal arrives
pub async fn start(config: Config) -> Void {
    info!("Starting relay-bot ...");

    // Start the crypto provider.
    crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("A rustls crypto provider is already installed."))?;

    // Initialize the runtime.
    let runtime = runtime::Runtime::new(config).await?;

    // Start the runtime.
    runtime.start().await?;

    info!("Relay-bot stopped.");

    Ok(())
}
