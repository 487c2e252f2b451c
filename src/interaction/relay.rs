//! The message relay: turns an inbound chat message into a streamed model reply.

use tokio::task::JoinHandle;

use crate::prelude::*;

use super::{
    session::{SessionKey, SessionStore},
    stream::StreamingReply,
};

/// Handles an inbound chat message.
///
/// Spawns a task for the message and returns its handle. Errors are logged
/// inside the task and never reach the caller, so one failed request cannot
/// affect any other.
#[instrument(skip_all, fields(channel_id = %message.channel_id, message_id = %message.message_id))]
pub fn handle_message(message: InboundMessage, config: Config, llm: LlmClient, chat: ChatClient, sessions: SessionStore) -> JoinHandle<()> {
    tokio::spawn(
        async move {
            // Process the message.
            let result = handle_message_internal(&message, &config, &llm, &chat, &sessions).in_current_span().await;

            // Log any errors.
            if let Err(err) = &result {
                error!("Error while handling: {}", err);
            }
        }
        .in_current_span(),
    )
}

#[instrument(skip_all)]
async fn handle_message_internal(message: &InboundMessage, config: &Config, llm: &LlmClient, chat: &ChatClient, sessions: &SessionStore) -> Void {
    // Never answer ourselves.

    if message.author_id == chat.bot_user_id() {
        debug!("Skipping message authored by the bot.");
        return Ok(());
    }

    // Stay inside the configured guild, if any. Direct messages carry no guild and pass.

    if let Some(guild_id) = config.guild_filter()
        && let Some(message_guild_id) = message.guild_id.as_deref()
        && message_guild_id != guild_id
    {
        debug!("Skipping message from outside the configured guild.");
        return Ok(());
    }

    if message.attachments.first().is_some() {
        handle_image_message(message, config, llm, chat).await
    } else if !message.content.trim().is_empty() {
        handle_text_message(message, config, llm, chat, sessions).await
    } else {
        debug!("Skipping message with no text and no attachments.");
        Ok(())
    }
}

/// Describe (or answer a prompt about) the first attached image.
#[instrument(skip_all)]
async fn handle_image_message(message: &InboundMessage, config: &Config, llm: &LlmClient, chat: &ChatClient) -> Void {
    let Some(attachment) = message.attachments.first() else {
        return Ok(());
    };

    // Validate the image type before touching the network.

    let Some(format) = ImageFormat::from_filename(&attachment.filename) else {
        let err = RelayError::UnsupportedAttachment(attachment.filename.clone());
        warn!("{}", err);
        chat.send_message(&message.channel_id, err.user_message()).await?;
        return Ok(());
    };

    // Download the image.

    let bytes = match chat.download_attachment(attachment).await {
        Ok(bytes) => bytes,
        Err(e) => {
            let err = RelayError::Download(e);
            warn!("{}", err);
            chat.send_message(&message.channel_id, err.user_message()).await?;
            return Ok(());
        }
    };

    info!("Relaying {:?} image ({} bytes) to the vision model ...", format, bytes.len());

    let image = ImageData { format, bytes };
    let prompt = if message.content.trim().is_empty() { config.default_image_prompt.as_str() } else { message.content.as_str() };

    // Stream the completion into the placeholder.

    let mut reply = StreamingReply::start(chat, &message.channel_id, &message.message_id, &config.placeholder_text, config.edit_interval()).await?;

    let result = async {
        let stream = llm.stream_image_completion(&image, prompt).await?;
        reply.consume(stream).await
    }
    .await;

    match result {
        Ok(()) => {
            let completion = reply.finish().await?;
            info!("Image completion finished ({} chars).", completion.len());
            Ok(())
        }
        Err(e) => fail_reply(reply, RelayError::Backend(e)).await,
    }
}

/// Continue the author's conversation in this channel.
#[instrument(skip_all)]
async fn handle_text_message(message: &InboundMessage, config: &Config, llm: &LlmClient, chat: &ChatClient, sessions: &SessionStore) -> Void {
    let session = sessions.get_or_create(SessionKey::new(&message.author_id, &message.channel_id));

    // Hold the session for the whole turn so turns within it stay ordered.
    let mut session = session.lock().await;

    info!("Relaying text message to the chat model ({} turns of history) ...", session.history().len());

    let mut reply = StreamingReply::start(chat, &message.channel_id, &message.message_id, &config.placeholder_text, config.edit_interval()).await?;

    session.push_user(&message.content);

    let result = async {
        let stream = llm.stream_chat_completion(session.history()).await?;
        reply.consume(stream).await
    }
    .await;

    match result {
        Ok(()) => {
            // The model answered in full, so the exchange belongs in the history even if the last edit fails.
            // Empty answers are never recorded; the unanswered question goes with them.
            if reply.completion().is_empty() {
                session.rollback_user();
            } else {
                session.push_model(reply.completion());
            }

            reply.finish().await?;
            Ok(())
        }
        Err(e) => {
            session.rollback_user();
            fail_reply(reply, RelayError::Backend(e)).await
        }
    }
}

/// Show the failure in the reply and hand the error back for logging.
async fn fail_reply(reply: StreamingReply, err: RelayError) -> Void {
    if let Err(edit_err) = reply.fail(err.user_message()).await {
        warn!("Failed to mark reply as failed: {}", edit_err);
    }

    Err(err.into())
}
