//! Streams a completion into a placeholder reply by editing it in place.
//!
//! Edits are throttled to at most one per `min_interval`; chunks that arrive in
//! between are coalesced into the next edit. A final edit at the end of the
//! stream always brings the displayed text up to date.

use std::time::Duration;

use futures::StreamExt;
use tokio::time::Instant;

use crate::{base::prompts, prelude::*, service::llm::CompletionStream};

/// A reply message that is progressively overwritten with streamed text.
pub struct StreamingReply {
    chat: ChatClient,
    channel_id: String,
    message_id: String,
    min_interval: Duration,
    completion: String,
    displayed: String,
    last_edit: Option<Instant>,
}

impl StreamingReply {
    /// Post the placeholder reply to `reply_to` and return a handle for streaming into it.
    #[instrument(name = "StreamingReply::start", skip(chat, placeholder))]
    pub async fn start(chat: &ChatClient, channel_id: &str, reply_to: &str, placeholder: &str, min_interval: Duration) -> Res<Self> {
        let message_id = chat.send_reply(channel_id, reply_to, placeholder).await?;

        Ok(Self {
            chat: chat.clone(),
            channel_id: channel_id.to_string(),
            message_id,
            min_interval,
            completion: String::new(),
            displayed: placeholder.to_string(),
            last_edit: None,
        })
    }

    /// The text accumulated so far.
    pub fn completion(&self) -> &str {
        &self.completion
    }

    /// Consume a completion stream until it ends or fails.
    ///
    /// On failure, the text received before the error stays accumulated.
    pub async fn consume(&mut self, mut stream: CompletionStream) -> Void {
        while let Some(chunk) = stream.next().await {
            self.push(&chunk?).await;
        }

        Ok(())
    }

    /// Append a chunk and edit the reply if the throttle allows.
    ///
    /// Edit failures here are logged and skipped; the next edit carries the full text anyway.
    pub async fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }

        self.completion.push_str(chunk);

        let due = self.last_edit.is_none_or(|at| at.elapsed() >= self.min_interval);
        if !due {
            return;
        }

        let text = self.render();
        if let Err(err) = self.show(text).await {
            warn!("Skipping intermediate edit of {}: {}", self.message_id, err);
        }
    }

    /// Bring the reply up to date with the full completion and return it.
    pub async fn finish(mut self) -> Res<String> {
        let text = self.render();
        self.show(text).await?;

        Ok(self.completion)
    }

    /// Mark the reply as failed, keeping any partial completion above the notice.
    pub async fn fail(mut self, notice: &str) -> Void {
        let text = if self.completion.is_empty() {
            notice.to_string()
        } else {
            let budget = self.chat.message_limit().saturating_sub(notice.chars().count() + 2);
            format!("{}\n\n{notice}", truncate_for_display(&self.completion, budget))
        };

        self.show(text).await
    }

    /// The text to display for the current completion.
    fn render(&self) -> String {
        if self.completion.is_empty() {
            prompts::EMPTY_COMPLETION.to_string()
        } else {
            truncate_for_display(&self.completion, self.chat.message_limit())
        }
    }

    /// Edit the reply unless it already shows `text`.
    async fn show(&mut self, text: String) -> Void {
        if text == self.displayed {
            return Ok(());
        }

        self.chat.edit_message(&self.channel_id, &self.message_id, &text).await?;

        self.displayed = text;
        self.last_edit = Some(Instant::now());

        Ok(())
    }
}

/// Cut `text` to at most `limit` characters, marking the cut with an ellipsis.
pub fn truncate_for_display(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    if limit == 0 {
        return String::new();
    }

    let mut truncated = text.chars().take(limit - 1).collect::<String>();
    truncated.push('…');
    truncated
}

// Tests.
