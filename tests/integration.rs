#![cfg(test)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use mockall::mock;
use relay_bot::{
    base::{
        config::{Config, ConfigInner},
        prompts,
        types::{Attachment, ChatRole, ChatTurn, ImageData, ImageFormat, InboundMessage, Res, Void},
    },
    interaction::{
        relay::handle_message,
        session::{SessionKey, SessionStore},
    },
    service::{
        chat::{ChatClient, GenericChatClient},
        llm::{CompletionStream, GenericLlmClient, LlmClient},
    },
};

// Mocks.

mock! {
    pub Chat {}

    #[async_trait]
    impl GenericChatClient for Chat {
        fn bot_user_id(&self) -> &str;
        fn message_limit(&self) -> usize;
        async fn start(&self) -> Void;
        async fn send_message(&self, channel_id: &str, text: &str) -> Void;
        async fn send_reply(&self, channel_id: &str, reply_to: &str, text: &str) -> Res<String>;
        async fn edit_message(&self, channel_id: &str, message_id: &str, text: &str) -> Void;
        async fn download_attachment(&self, attachment: &Attachment) -> Res<Vec<u8>>;
    }
}

mock! {
    pub Llm {}

    #[async_trait]
    impl GenericLlmClient for Llm {
        async fn stream_image_completion(&self, image: &ImageData, prompt: &str) -> Res<CompletionStream>;
        async fn stream_chat_completion(&self, history: &[ChatTurn]) -> Res<CompletionStream>;
    }
}

// Helpers.

const BOT_ID: &str = "B0T";

/// Edits recorded as `(channel_id, message_id, text)`.
type EditLog = Arc<Mutex<Vec<(String, String, String)>>>;

fn test_config(edit_interval_ms: u64) -> Config {
    Config::from(ConfigInner {
        api_key: "test-key".to_string(),
        placeholder_text: prompts::PLACEHOLDER.to_string(),
        default_image_prompt: prompts::DEFAULT_IMAGE_PROMPT.to_string(),
        temperature: 0.7,
        max_tokens: 1024,
        edit_interval_ms,
        ..Default::default()
    })
}

/// A chat mock that identifies itself and accepts no calls yet.
fn base_chat() -> MockChat {
    let mut mock = MockChat::new();

    mock.expect_bot_user_id().return_const(BOT_ID.to_string());
    mock.expect_message_limit().return_const(2000usize);

    mock
}

/// Record every edit made through `mock` into `edits`.
fn record_edits(mock: &mut MockChat, edits: &EditLog) {
    let edits = edits.clone();
    mock.expect_edit_message().returning(move |channel_id, message_id, text| {
        edits.lock().unwrap().push((channel_id.to_string(), message_id.to_string(), text.to_string()));
        Ok(())
    });
}

/// A chat mock that posts replies and records every edit.
fn replying_chat(edits: &EditLog) -> MockChat {
    let mut mock = base_chat();

    mock.expect_send_reply().returning(|channel_id, _, _| Ok(format!("reply-{channel_id}")));
    record_edits(&mut mock, edits);

    mock
}

fn chunks(parts: &[&str]) -> CompletionStream {
    let items = parts.iter().map(|part| Ok(part.to_string())).collect::<Vec<Res<String>>>();
    Box::pin(futures::stream::iter(items))
}

fn text_message(author_id: &str, channel_id: &str, content: &str) -> InboundMessage {
    InboundMessage {
        message_id: "M1".to_string(),
        author_id: author_id.to_string(),
        channel_id: channel_id.to_string(),
        content: content.to_string(),
        ..Default::default()
    }
}

fn image_message(filename: &str, content: &str) -> InboundMessage {
    InboundMessage {
        attachments: vec![Attachment {
            filename: filename.to_string(),
            url: format!("https://cdn.example.com/{filename}"),
        }],
        ..text_message("U1", "C1", content)
    }
}

fn last_edit(edits: &EditLog, channel_id: &str) -> Option<String> {
    edits.lock().unwrap().iter().rev().find(|(channel, _, _)| channel == channel_id).map(|(_, _, text)| text.clone())
}

async fn relay(message: InboundMessage, config: &Config, llm: &LlmClient, chat: &ChatClient, sessions: &SessionStore) {
    handle_message(message, config.clone(), llm.clone(), chat.clone(), sessions.clone()).await.unwrap();
}

// Tests.

#[tokio::test]
async fn test_text_reply_streams_into_placeholder() {
    let edits = EditLog::default();

    let mut chat = base_chat();
    record_edits(&mut chat, &edits);
    chat.expect_send_reply()
        .withf(|channel_id, reply_to, text| channel_id == "C1" && reply_to == "M1" && text == prompts::PLACEHOLDER)
        .times(1)
        .returning(|_, _, _| Ok("R1".to_string()));

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().times(1).returning(|_| Ok(chunks(&["Hel", "lo"])));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "hi"), &config, &llm, &chat, &sessions).await;

    let edits = edits.lock().unwrap().clone();
    assert!(!edits.is_empty());
    assert!(edits.iter().all(|(channel, message, _)| channel == "C1" && message == "R1"));
    assert_eq!(edits.last().map(|(_, _, text)| text.as_str()), Some("Hello"));
}

#[tokio::test]
async fn test_session_is_created_once_and_reused() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let seen = Arc::new(Mutex::new(Vec::<Vec<ChatTurn>>::new()));
    let mut llm = MockLlm::new();
    {
        let seen = seen.clone();
        llm.expect_stream_chat_completion().times(2).returning(move |history| {
            seen.lock().unwrap().push(history.to_vec());
            Ok(chunks(&["Answer."]))
        });
    }

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "first"), &config, &llm, &chat, &sessions).await;
    relay(text_message("U1", "C1", "second"), &config, &llm, &chat, &sessions).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[0], vec![ChatTurn::user("first")]);
    assert_eq!(seen[1], vec![ChatTurn::user("first"), ChatTurn::model("Answer."), ChatTurn::user("second")]);

    assert_eq!(sessions.len(), 1);
    let session = sessions.get_or_create(SessionKey::new("U1", "C1"));
    assert_eq!(session.lock().await.history().len(), 4);
}

#[tokio::test]
async fn test_users_in_one_channel_get_separate_sessions() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().withf(|history| history.len() == 1).times(2).returning(|_| Ok(chunks(&["Hi."])));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "hello"), &config, &llm, &chat, &sessions).await;
    relay(text_message("U2", "C1", "hello"), &config, &llm, &chat, &sessions).await;

    assert_eq!(sessions.len(), 2);
}

#[tokio::test]
async fn test_failure_mid_stream_only_affects_its_own_request() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().returning(|history| {
        if history.last().is_some_and(|turn| turn.text == "break") {
            let items: Vec<Res<String>> = vec![Ok("Partial".to_string()), Err(anyhow::anyhow!("connection reset"))];
            Ok(Box::pin(futures::stream::iter(items)) as CompletionStream)
        } else {
            Ok(chunks(&["All ", "good."]))
        }
    });

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    let failing = handle_message(text_message("U1", "C1", "break"), config.clone(), llm.clone(), chat.clone(), sessions.clone());
    let healthy = handle_message(text_message("U1", "C2", "fine"), config.clone(), llm.clone(), chat.clone(), sessions.clone());

    failing.await.unwrap();
    healthy.await.unwrap();

    assert_eq!(last_edit(&edits, "C1"), Some(format!("Partial\n\n{}", prompts::BACKEND_FAILED)));
    assert_eq!(last_edit(&edits, "C2").as_deref(), Some("All good."));

    // The failed turn is rolled back; the healthy one is kept.
    let failed = sessions.get_or_create(SessionKey::new("U1", "C1"));
    assert!(failed.lock().await.history().is_empty());

    let kept = sessions.get_or_create(SessionKey::new("U1", "C2"));
    let kept = kept.lock().await.history().to_vec();
    assert_eq!(kept.len(), 2);
    assert_eq!(kept[1].role, ChatRole::Model);
}

#[tokio::test]
async fn test_failure_before_first_chunk_shows_notice() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().returning(|_| Err(anyhow::anyhow!("quota exceeded")));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "hi"), &config, &llm, &chat, &sessions).await;

    assert_eq!(last_edit(&edits, "C1").as_deref(), Some(prompts::BACKEND_FAILED));
}

#[tokio::test]
async fn test_empty_completion_is_reported() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().returning(|_| Ok(chunks(&[])));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "hi"), &config, &llm, &chat, &sessions).await;

    assert_eq!(last_edit(&edits, "C1").as_deref(), Some(prompts::EMPTY_COMPLETION));
}

#[tokio::test]
async fn test_empty_completion_leaves_no_turn_in_history() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let seen = Arc::new(Mutex::new(Vec::<Vec<ChatTurn>>::new()));
    let mut llm = MockLlm::new();
    {
        let seen = seen.clone();
        llm.expect_stream_chat_completion().times(2).returning(move |history| {
            seen.lock().unwrap().push(history.to_vec());
            if history.len() == 1 && history[0].text == "first" { Ok(chunks(&[])) } else { Ok(chunks(&["Answer."])) }
        });
    }

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "first"), &config, &llm, &chat, &sessions).await;
    relay(text_message("U1", "C1", "second"), &config, &llm, &chat, &sessions).await;

    let seen = seen.lock().unwrap().clone();
    assert_eq!(seen[1], vec![ChatTurn::user("second")]);

    let session = sessions.get_or_create(SessionKey::new("U1", "C1"));
    let history = session.lock().await.history().to_vec();
    assert_eq!(history, vec![ChatTurn::user("second"), ChatTurn::model("Answer.")]);
}

#[tokio::test]
async fn test_failed_intermediate_edit_does_not_stop_streaming() {
    let edits = EditLog::default();

    let mut chat = base_chat();
    chat.expect_send_reply().returning(|_, _, _| Ok("R1".to_string()));
    {
        let edits = edits.clone();
        let calls = Arc::new(Mutex::new(0usize));
        chat.expect_edit_message().returning(move |channel_id, message_id, text| {
            let mut calls = calls.lock().unwrap();
            *calls += 1;
            if *calls == 1 {
                return Err(anyhow::anyhow!("rate limited"));
            }
            edits.lock().unwrap().push((channel_id.to_string(), message_id.to_string(), text.to_string()));
            Ok(())
        });
    }

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().returning(|_| Ok(chunks(&["Hel", "lo"])));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "hi"), &config, &llm, &chat, &sessions).await;

    assert_eq!(last_edit(&edits, "C1").as_deref(), Some("Hello"));

    let session = sessions.get_or_create(SessionKey::new("U1", "C1"));
    assert_eq!(session.lock().await.history().len(), 2);
}

#[tokio::test]
async fn test_failed_final_edit_keeps_the_model_turn() {
    let attempts = EditLog::default();

    let mut chat = base_chat();
    chat.expect_send_reply().returning(|_, _, _| Ok("R1".to_string()));
    {
        let attempts = attempts.clone();
        chat.expect_edit_message().returning(move |channel_id, message_id, text| {
            attempts.lock().unwrap().push((channel_id.to_string(), message_id.to_string(), text.to_string()));
            if text == "ab" { Err(anyhow::anyhow!("message deleted")) } else { Ok(()) }
        });
    }

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().returning(|_| Ok(chunks(&["a", "b"])));

    // A long interval holds back the second chunk until the final edit.
    let (config, sessions) = (test_config(60_000), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    let result = handle_message(text_message("U1", "C1", "hi"), config, llm, chat, sessions.clone()).await;
    assert!(result.is_ok());

    let texts = attempts.lock().unwrap().iter().map(|(_, _, text)| text.clone()).collect::<Vec<_>>();
    assert_eq!(texts, vec!["a".to_string(), "ab".to_string()]);

    let session = sessions.get_or_create(SessionKey::new("U1", "C1"));
    assert_eq!(session.lock().await.history().to_vec(), vec![ChatTurn::user("hi"), ChatTurn::model("ab")]);
}

#[tokio::test]
async fn test_image_backend_failure_shows_notice() {
    let edits = EditLog::default();

    let mut chat = replying_chat(&edits);
    chat.expect_download_attachment().returning(|_| Ok(vec![0x89, b'P', b'N', b'G']));

    let mut llm = MockLlm::new();
    llm.expect_stream_image_completion().times(1).returning(|_, _| Err(anyhow::anyhow!("model overloaded")));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(image_message("cat.png", ""), &config, &llm, &chat, &sessions).await;

    assert_eq!(last_edit(&edits, "C1").as_deref(), Some(prompts::BACKEND_FAILED));
}

#[tokio::test]
async fn test_throttle_coalesces_chunks_into_final_edit() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().returning(|_| Ok(chunks(&["a", "b", "c", "d"])));

    let (config, sessions) = (test_config(60_000), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "hi"), &config, &llm, &chat, &sessions).await;

    let texts = edits.lock().unwrap().iter().map(|(_, _, text)| text.clone()).collect::<Vec<_>>();
    assert_eq!(texts, vec!["a".to_string(), "abcd".to_string()]);
}

#[tokio::test]
async fn test_long_completion_is_truncated_for_display() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let long = "x".repeat(2500);
    let mut llm = MockLlm::new();
    {
        let long = long.clone();
        llm.expect_stream_chat_completion().returning(move |_| Ok(chunks(&[long.as_str()])));
    }

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", "hi"), &config, &llm, &chat, &sessions).await;

    let shown = last_edit(&edits, "C1").unwrap_or_default();
    assert_eq!(shown.chars().count(), 2000);
    assert!(shown.ends_with('…'));

    // History keeps the full text.
    let session = sessions.get_or_create(SessionKey::new("U1", "C1"));
    assert_eq!(session.lock().await.history()[1].text, long);
}

#[tokio::test]
async fn test_own_messages_are_ignored() {
    let chat = base_chat();
    let llm = MockLlm::new();

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message(BOT_ID, "C1", "I am the bot"), &config, &llm, &chat, &sessions).await;

    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_blank_messages_are_ignored() {
    let chat = base_chat();
    let llm = MockLlm::new();

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(text_message("U1", "C1", ""), &config, &llm, &chat, &sessions).await;
    relay(text_message("U1", "C1", "  \n "), &config, &llm, &chat, &sessions).await;

    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_guild_filter_skips_other_guilds_but_not_direct_messages() {
    let edits = EditLog::default();
    let chat = replying_chat(&edits);

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().times(2).returning(|_| Ok(chunks(&["Hi."])));

    let config = Config::from(ConfigInner {
        guild_id: Some("G1".to_string()),
        ..(*test_config(0).inner).clone()
    });
    let sessions = SessionStore::default();
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    let elsewhere = InboundMessage { guild_id: Some("G2".to_string()), ..text_message("U1", "C1", "hi") };
    let direct = InboundMessage { guild_id: None, ..text_message("U1", "C2", "hi") };
    let home = InboundMessage { guild_id: Some("G1".to_string()), ..text_message("U1", "C3", "hi") };

    relay(elsewhere, &config, &llm, &chat, &sessions).await;
    relay(direct, &config, &llm, &chat, &sessions).await;
    relay(home, &config, &llm, &chat, &sessions).await;

    assert_eq!(sessions.len(), 2);
    assert_eq!(last_edit(&edits, "C1"), None);
    assert_eq!(last_edit(&edits, "C2").as_deref(), Some("Hi."));
    assert_eq!(last_edit(&edits, "C3").as_deref(), Some("Hi."));
}

#[tokio::test]
async fn test_invalid_image_type_is_rejected_without_download() {
    let mut chat = base_chat();
    chat.expect_download_attachment().never();
    chat.expect_send_reply().never();
    chat.expect_send_message()
        .withf(|channel_id, text| channel_id == "C1" && text == prompts::INVALID_IMAGE_TYPE)
        .times(2)
        .returning(|_, _| Ok(()));

    let llm = MockLlm::new();

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    // Suffixes are matched case-sensitively.
    relay(image_message("notes.pdf", "what is this?"), &config, &llm, &chat, &sessions).await;
    relay(image_message("photo.PNG", ""), &config, &llm, &chat, &sessions).await;
}

#[tokio::test]
async fn test_download_failure_is_reported() {
    let mut chat = base_chat();
    chat.expect_download_attachment().times(1).returning(|_| Err(anyhow::anyhow!("404 Not Found")));
    chat.expect_send_reply().never();
    chat.expect_send_message()
        .withf(|channel_id, text| channel_id == "C1" && text == prompts::DOWNLOAD_FAILED)
        .times(1)
        .returning(|_, _| Ok(()));

    let llm = MockLlm::new();

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(image_message("cat.png", ""), &config, &llm, &chat, &sessions).await;
}

#[tokio::test]
async fn test_image_without_text_uses_default_prompt() {
    let edits = EditLog::default();

    let mut chat = replying_chat(&edits);
    chat.expect_download_attachment()
        .withf(|attachment| attachment.filename == "cat.png")
        .times(1)
        .returning(|_| Ok(vec![0x89, b'P', b'N', b'G']));

    let mut llm = MockLlm::new();
    llm.expect_stream_chat_completion().never();
    llm.expect_stream_image_completion()
        .withf(|image, prompt| image.format == ImageFormat::Png && image.bytes.len() == 4 && prompt == prompts::DEFAULT_IMAGE_PROMPT)
        .times(1)
        .returning(|_, _| Ok(chunks(&["A cat ", "on a sofa."])));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(image_message("cat.png", ""), &config, &llm, &chat, &sessions).await;

    assert_eq!(last_edit(&edits, "C1").as_deref(), Some("A cat on a sofa."));

    // Image requests never touch chat sessions.
    assert!(sessions.is_empty());
}

#[tokio::test]
async fn test_image_with_text_uses_it_as_prompt() {
    let edits = EditLog::default();

    let mut chat = replying_chat(&edits);
    chat.expect_download_attachment().returning(|_| Ok(vec![0xFF, 0xD8, 0xFF]));

    let mut llm = MockLlm::new();
    llm.expect_stream_image_completion()
        .withf(|image, prompt| image.format == ImageFormat::Jpeg && prompt == "what breed is this?")
        .times(1)
        .returning(|_, _| Ok(chunks(&["A tabby."])));

    let (config, sessions) = (test_config(0), SessionStore::default());
    let (chat, llm) = (ChatClient::new(Arc::new(chat)), LlmClient::new(Arc::new(llm)));

    relay(image_message("cat.jpeg", "what breed is this?"), &config, &llm, &chat, &sessions).await;

    assert_eq!(last_edit(&edits, "C1").as_deref(), Some("A tabby."));
}
