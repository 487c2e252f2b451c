//! Slack chat service for relay-bot.
//!
//! Listens over Socket Mode, converts message events into `InboundMessage`s,
//! replies in thread, and edits replies with `chat.update`.

use crate::{
    base::{
        config::Config,
        types::{Attachment, InboundMessage, Res, Void},
    },
    interaction::{self, attachment, session::SessionStore},
    runtime,
    service::llm::LlmClient,
};
use async_trait::async_trait;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use slack_morphism::prelude::*;
use tracing::{debug, info, instrument, warn};

use std::sync::Arc;

use super::{ChatClient, GenericChatClient};

// Type aliases.

type FullClient = slack_morphism::SlackClient<SlackClientHyperConnector<HttpsConnector<HttpConnector>>>;

/// Slack rejects messages longer than this.
const SLACK_MESSAGE_LIMIT: usize = 40_000;

// Extra methods on `ChatClient` applied by the slack implementation.

impl ChatClient {
    /// Creates a new Slack chat client.
    pub async fn slack(config: &Config, llm: LlmClient, sessions: SessionStore) -> Res<Self> {
        let client = SlackChatClient::new(config, llm, sessions).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

impl From<SlackChatClient> for ChatClient {
    fn from(client: SlackChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// User state for the slack socket client.
struct SlackUserState {
    config: Config,
    llm: LlmClient,
    chat: ChatClient,
    sessions: SessionStore,
}

/// Slack client implementation.
#[derive(Clone)]
struct SlackChatClient {
    app_token: SlackApiToken,
    bot_token: SlackApiToken,
    bot_user_id: String,
    client: Arc<FullClient>,
    http: reqwest::Client,
    config: Config,
    llm: LlmClient,
    sessions: SessionStore,
}

impl SlackChatClient {
    /// Create a new Slack chat client.
    #[instrument(name = "SlackChatClient::new", skip_all)]
    pub async fn new(config: &Config, llm: LlmClient, sessions: SessionStore) -> Res<Self> {
        // Initialize tokens.

        let app_token = config.slack_app_token.clone().ok_or_else(|| anyhow::anyhow!("Missing Slack app token."))?;
        let bot_token = config.slack_bot_token.clone().ok_or_else(|| anyhow::anyhow!("Missing Slack bot token."))?;

        let app_token = SlackApiToken::new(SlackApiTokenValue(app_token));
        let bot_token = SlackApiToken::new(SlackApiTokenValue(bot_token));

        // Initialize the Slack client.

        let https_connector = HttpsConnector::<HttpConnector>::builder().with_native_roots()?.https_only().enable_all_versions().build();
        let connector = SlackClientHyperConnector::with_connector(https_connector);
        let client = Arc::new(slack_morphism::SlackClient::new(connector));

        // Get the bot's user ID.

        let session = client.open_session(&bot_token);
        let bot_user = session.auth_test().await?;
        let bot_user_id = bot_user.user_id.0;

        info!("Slack bot user ID: {}", bot_user_id);

        Ok(Self {
            app_token,
            bot_token,
            bot_user_id,
            client,
            http: reqwest::Client::new(),
            config: config.clone(),
            llm,
            sessions,
        })
    }

    /// Post a message, optionally in a thread, and return its `ts`.
    async fn post_message(&self, channel_id: &str, thread_ts: Option<&str>, text: &str) -> Res<String> {
        let message = SlackMessageContent::new().with_text(text.to_string());

        let mut request = SlackApiChatPostMessageRequest::new(SlackChannelId(channel_id.to_string()), message).with_link_names(true);

        if let Some(thread_ts) = thread_ts {
            request = request.with_thread_ts(SlackTs(thread_ts.to_string()));
        }

        let session = self.client.open_session(&self.bot_token);

        let response = session.chat_post_message(&request).await.map_err(|e| anyhow::anyhow!("Failed to send message: {}", e))?;

        Ok(response.ts.0)
    }
}

#[async_trait]
impl GenericChatClient for SlackChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    fn message_limit(&self) -> usize {
        SLACK_MESSAGE_LIMIT
    }

    async fn start(&self) -> Void {
        // Initialize the socket mode listener.

        let socket_mode_callbacks = SlackSocketModeListenerCallbacks::new().with_push_events(handle_push_event);

        // Initialize the socket mode listener environment.

        let listener_environment = Arc::new(SlackClientEventsListenerEnvironment::new(self.client.clone()).with_user_state(SlackUserState {
            config: self.config.clone(),
            llm: self.llm.clone(),
            chat: ChatClient::from(self.clone()),
            sessions: self.sessions.clone(),
        }));

        let socket_mode_listener = SlackClientSocketModeListener::new(&SlackClientSocketModeConfig::new(), listener_environment.clone(), socket_mode_callbacks);

        // Register an app token to listen for events.
        socket_mode_listener.listen_for(&self.app_token).await?;

        // Open the WS connections, then run until a shutdown signal arrives.
        socket_mode_listener.start().await;
        runtime::shutdown_signal().await;

        info!("Shutting down the Slack listener ...");
        socket_mode_listener.shutdown().await;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel_id: &str, text: &str) -> Void {
        self.post_message(channel_id, None, text).await?;
        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_reply(&self, channel_id: &str, reply_to: &str, text: &str) -> Res<String> {
        self.post_message(channel_id, Some(reply_to), text).await
    }

    #[instrument(skip(self, text))]
    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Void {
        let content = SlackMessageContent::new().with_text(text.to_string());

        let request = SlackApiChatUpdateRequest::new(SlackChannelId(channel_id.to_string()), content, SlackTs(message_id.to_string()));

        let session = self.client.open_session(&self.bot_token);

        let _ = session.chat_update(&request).await.map_err(|e| anyhow::anyhow!("Failed to edit message: {}", e))?;

        Ok(())
    }

    #[instrument(skip_all, fields(filename = %attachment.filename))]
    async fn download_attachment(&self, attachment: &Attachment) -> Res<Vec<u8>> {
        // Private Slack files need the bot token.
        attachment::download(&self.http, &attachment.url, Some(self.bot_token.token_value.0.as_str()), self.config.max_attachment_bytes).await
    }
}

// Socket mode listener callbacks for Slack.

/// Handles push events from Slack.
#[instrument(skip_all)]
async fn handle_push_event(event_callback: SlackPushEventCallback, _client: Arc<SlackHyperClient>, states: SlackClientEventsUserState) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let team_id = event_callback.team_id;
    let states = states.read().await;
    let user_state = states.get_user_state::<SlackUserState>().ok_or(anyhow::anyhow!("Failed to get user state"))?;

    match event_callback.event {
        SlackEventCallbackBody::Message(slack_message_event) => {
            let Some(message) = to_inbound_message(&slack_message_event, &team_id) else {
                debug!("Skipping message event without an author or channel.");
                return Ok(());
            };

            info!("Received message event ...");

            interaction::relay::handle_message(message, user_state.config.clone(), user_state.llm.clone(), user_state.chat.clone(), user_state.sessions.clone());
        }
        _ => {
            warn!("Received unhandled push event.")
        }
    }

    Ok(())
}

/// Convert a Slack message event into an `InboundMessage`.
///
/// Returns `None` for events without a user author or channel, such as
/// `message_changed` notifications caused by the bot's own edits.
fn to_inbound_message(event: &SlackMessageEvent, team_id: &SlackTeamId) -> Option<InboundMessage> {
    let author_id = event.sender.user.as_ref()?.0.clone();
    let channel_id = event.origin.channel.as_ref()?.0.clone();

    let content = event.content.as_ref().and_then(|c| c.text.clone()).unwrap_or_default();

    let attachments = event
        .content
        .as_ref()
        .and_then(|c| c.files.as_ref())
        .map(|files| {
            files
                .iter()
                .map(|file| Attachment {
                    filename: file.name.clone().unwrap_or_default(),
                    url: file.url_private_download.as_ref().or(file.url_private.as_ref()).map(|url| url.to_string()).unwrap_or_default(),
                })
                .collect()
        })
        .unwrap_or_default();

    Some(InboundMessage {
        message_id: event.origin.ts.0.clone(),
        author_id,
        channel_id,
        guild_id: Some(team_id.0.clone()),
        content,
        attachments,
    })
}

// Tests.
