//! Runtime services and shared state for the relay-bot.

use tracing::{error, info, instrument};

use crate::{
    base::{
        config::{ChatPlatform, Config},
        types::{Res, Void},
    },
    interaction::session::SessionStore,
    service::{chat::ChatClient, llm::LlmClient},
};

/// Runtime service context that can be shared across the application.
///
/// This struct holds the LLM client, chat client, session store, and configuration.
/// It is designed to be trivially cloneable, allowing it to be passed around
/// without the need for `Arc` or `Mutex`.
#[derive(Clone)]
pub struct Runtime {
    /// The configuration for the application.
    pub config: Config,
    /// The LLM client instance.
    pub llm: LlmClient,
    /// The chat client instance.
    pub chat: ChatClient,
    /// Per-user, per-channel chat sessions.
    pub sessions: SessionStore,
}

impl Runtime {
    /// Create a new runtime instance.
    #[instrument(skip_all)]
    pub async fn new(config: Config) -> Res<Self> {
        // Initialize the LLM client.
        let llm = LlmClient::openai(&config);

        // Initialize the session store.
        let sessions = SessionStore::default();

        // Initialize the chat client for the configured platform.
        let chat = match config.platform {
            ChatPlatform::Discord => ChatClient::discord(&config, llm.clone(), sessions.clone()).await?,
            ChatPlatform::Slack => ChatClient::slack(&config, llm.clone(), sessions.clone()).await?,
        };

        info!("Runtime ready on {:?}.", config.platform);

        Ok(Self { config, llm, chat, sessions })
    }

    /// Run the chat listener until shutdown.
    pub async fn start(&self) -> Void {
        self.chat.start().await
    }
}

/// Resolves when the process receives SIGINT (Ctrl-C) or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {}", err);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!("Failed to listen for SIGTERM: {}", err);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
