//! Discord chat service for relay-bot.
//!
//! Runs a `serenity` gateway client, converts message events into
//! `InboundMessage`s, and sends replies and edits through the REST API.

use std::{num::NonZeroU64, sync::Arc};

use async_trait::async_trait;
use serenity::all::{ApplicationId, ChannelId, Context, CreateMessage, EditMessage, EventHandler, GatewayIntents, Http, Message, MessageId, Ready};
use tracing::{info, instrument};

use crate::{
    base::{
        config::Config,
        types::{Attachment, InboundMessage, Res, Void},
    },
    interaction::{self, attachment, session::SessionStore},
    runtime,
    service::llm::LlmClient,
};

use super::{ChatClient, GenericChatClient};

/// Discord rejects messages longer than this.
const DISCORD_MESSAGE_LIMIT: usize = 2000;

// Extra methods on `ChatClient` applied by the discord implementation.

impl ChatClient {
    /// Creates a new Discord chat client.
    pub async fn discord(config: &Config, llm: LlmClient, sessions: SessionStore) -> Res<Self> {
        let client = DiscordChatClient::new(config, llm, sessions).await?;
        Ok(Self { inner: Arc::new(client) })
    }
}

impl From<DiscordChatClient> for ChatClient {
    fn from(client: DiscordChatClient) -> Self {
        Self { inner: Arc::new(client) }
    }
}

// Structs.

/// Discord client implementation.
#[derive(Clone)]
struct DiscordChatClient {
    token: String,
    application_id: Option<ApplicationId>,
    bot_user_id: String,
    http: Arc<Http>,
    download: reqwest::Client,
    config: Config,
    llm: LlmClient,
    sessions: SessionStore,
}

impl DiscordChatClient {
    /// Create a new Discord chat client.
    #[instrument(name = "DiscordChatClient::new", skip_all)]
    pub async fn new(config: &Config, llm: LlmClient, sessions: SessionStore) -> Res<Self> {
        let token = config.discord_token.clone().filter(|t| !t.is_empty()).ok_or_else(|| anyhow::anyhow!("Missing Discord token."))?;

        let application_id = config.app_id.as_deref().filter(|id| !id.is_empty()).map(parse_id).transpose()?.map(ApplicationId::from);

        // Get the bot's user ID.

        let http = Arc::new(Http::new(&token));
        let bot_user = http.get_current_user().await?;
        let bot_user_id = bot_user.id.to_string();

        info!("Discord bot user ID: {}", bot_user_id);

        Ok(Self {
            token,
            application_id,
            bot_user_id,
            http,
            download: reqwest::Client::new(),
            config: config.clone(),
            llm,
            sessions,
        })
    }
}

#[async_trait]
impl GenericChatClient for DiscordChatClient {
    fn bot_user_id(&self) -> &str {
        &self.bot_user_id
    }

    fn message_limit(&self) -> usize {
        DISCORD_MESSAGE_LIMIT
    }

    async fn start(&self) -> Void {
        let handler = DiscordHandler {
            config: self.config.clone(),
            llm: self.llm.clone(),
            chat: ChatClient::from(self.clone()),
            sessions: self.sessions.clone(),
        };

        let mut builder = serenity::Client::builder(&self.token, DiscordHandler::intents()).event_handler(handler);

        if let Some(application_id) = self.application_id {
            builder = builder.application_id(application_id);
        }

        let mut client = builder.await?;

        // Close the gateway session on SIGINT / SIGTERM.

        let shard_manager = client.shard_manager.clone();
        tokio::spawn(async move {
            runtime::shutdown_signal().await;
            info!("Shutting down the Discord gateway ...");
            shard_manager.shutdown_all().await;
        });

        client.start().await?;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_message(&self, channel_id: &str, text: &str) -> Void {
        let channel = ChannelId::from(parse_id(channel_id)?);

        channel.send_message(&*self.http, CreateMessage::new().content(text)).await?;

        Ok(())
    }

    #[instrument(skip(self, text))]
    async fn send_reply(&self, channel_id: &str, reply_to: &str, text: &str) -> Res<String> {
        let channel = ChannelId::from(parse_id(channel_id)?);
        let reply_to = MessageId::from(parse_id(reply_to)?);

        let message = channel.send_message(&*self.http, CreateMessage::new().content(text).reference_message((channel, reply_to))).await?;

        Ok(message.id.to_string())
    }

    #[instrument(skip(self, text))]
    async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Void {
        let channel = ChannelId::from(parse_id(channel_id)?);
        let message_id = MessageId::from(parse_id(message_id)?);

        channel.edit_message(&*self.http, message_id, EditMessage::new().content(text)).await?;

        Ok(())
    }

    #[instrument(skip_all, fields(filename = %attachment.filename))]
    async fn download_attachment(&self, attachment: &Attachment) -> Res<Vec<u8>> {
        attachment::download(&self.download, &attachment.url, None, self.config.max_attachment_bytes).await
    }
}

// Gateway event handler.

/// Handler for Discord gateway events.
struct DiscordHandler {
    config: Config,
    llm: LlmClient,
    chat: ChatClient,
    sessions: SessionStore,
}

impl DiscordHandler {
    /// Required gateway intents for the bot.
    fn intents() -> GatewayIntents {
        GatewayIntents::GUILD_MESSAGES | GatewayIntents::DIRECT_MESSAGES | GatewayIntents::MESSAGE_CONTENT
    }
}

#[async_trait]
impl EventHandler for DiscordHandler {
    async fn ready(&self, _ctx: Context, ready: Ready) {
        info!(bot_name = %ready.user.name, guilds = ready.guilds.len(), "Discord bot is now running.  Press CTRL-C to exit.");
    }

    async fn message(&self, _ctx: Context, msg: Message) {
        interaction::relay::handle_message(to_inbound_message(&msg), self.config.clone(), self.llm.clone(), self.chat.clone(), self.sessions.clone());
    }
}

/// Convert a Discord message into an `InboundMessage`.
fn to_inbound_message(msg: &Message) -> InboundMessage {
    InboundMessage {
        message_id: msg.id.to_string(),
        author_id: msg.author.id.to_string(),
        channel_id: msg.channel_id.to_string(),
        guild_id: msg.guild_id.map(|id| id.to_string()),
        content: msg.content.clone(),
        attachments: msg
            .attachments
            .iter()
            .map(|a| Attachment {
                filename: a.filename.clone(),
                url: a.url.clone(),
            })
            .collect(),
    }
}

/// Parse a Discord snowflake.
fn parse_id(id: &str) -> Res<NonZeroU64> {
    id.parse::<NonZeroU64>().map_err(|e| anyhow::anyhow!("Invalid Discord ID `{id}`: {e}"))
}

// Tests.
