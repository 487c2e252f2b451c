//! Per-user, per-channel chat sessions.
//!
//! Each `(user, channel)` pair owns its own history, so users never see each
//! other's conversations. Sessions are created lazily and guarded by their own
//! lock, which serialises turns within a pair while other pairs run freely.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::base::types::{ChatRole, ChatTurn};

/// Identifies one conversation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_id: String,
    pub channel_id: String,
}

impl SessionKey {
    pub fn new(user_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            channel_id: channel_id.into(),
        }
    }
}

/// An ordered conversation history.
#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    history: Vec<ChatTurn>,
}

impl ChatSession {
    /// The turns so far, oldest first.
    pub fn history(&self) -> &[ChatTurn] {
        &self.history
    }

    pub fn push_user(&mut self, text: impl Into<String>) {
        self.history.push(ChatTurn::user(text));
    }

    pub fn push_model(&mut self, text: impl Into<String>) {
        self.history.push(ChatTurn::model(text));
    }

    /// Drop a trailing user turn whose answer never arrived.
    pub fn rollback_user(&mut self) {
        if self.history.last().is_some_and(|turn| turn.role == ChatRole::User) {
            self.history.pop();
        }
    }
}

/// Store of all chat sessions.
///
/// This is trivially cloneable and can be passed around without the need for `Arc` or `Mutex`.
#[derive(Clone, Default)]
pub struct SessionStore {
    inner: Arc<DashMap<SessionKey, Arc<Mutex<ChatSession>>>>,
}

impl SessionStore {
    /// Get the session for `key`, creating it if this is the first message.
    ///
    /// Insertion is atomic, so racing first messages share one session.
    pub fn get_or_create(&self, key: SessionKey) -> Arc<Mutex<ChatSession>> {
        self.inner.entry(key).or_default().clone()
    }

    /// Number of sessions created so far.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

// Tests.
