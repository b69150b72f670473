//! Conversation history: the sole durable state
//!
//! A history is an ordered list of messages that only ever grows by
//! complete turns (one user message immediately followed by one
//! assistant message). The pairing invariant means a crash mid-turn
//! can never leave a dangling user message on disk.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Who produced a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One message in a conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Ordered conversation history, appended to in user/assistant pairs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationHistory {
    messages: Vec<Message>,
}

impl ConversationHistory {
    /// Create an empty history
    #[must_use]
    pub const fn new() -> Self {
        Self {
            messages: Vec::new(),
        }
    }

    /// Append one complete turn
    pub fn push_turn(&mut self, user_text: impl Into<String>, assistant_text: impl Into<String>) {
        self.messages.push(Message::user(user_text));
        self.messages.push(Message::assistant(assistant_text));
    }

    /// Remove all messages
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Messages in chronological order
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages (always even)
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True when no turns have completed
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Check the pairing invariant: even length, alternating user/assistant
    #[must_use]
    pub fn is_well_paired(&self) -> bool {
        self.messages.len() % 2 == 0
            && self.messages.iter().enumerate().all(|(i, m)| {
                if i % 2 == 0 {
                    m.role == Role::User
                } else {
                    m.role == Role::Assistant
                }
            })
    }

    /// Build a history from raw messages, repairing a dangling tail
    ///
    /// A trailing unpaired user message indicates a partially-failed
    /// turn that should never have been persisted. It is dropped with
    /// a warning rather than propagated.
    ///
    /// # Errors
    ///
    /// Returns [`Error::History`] when the messages are mispaired in a
    /// way that dropping the tail cannot repair.
    pub fn from_messages(mut messages: Vec<Message>) -> Result<Self> {
        if messages.len() % 2 == 1 && messages.last().is_some_and(|m| m.role == Role::User) {
            tracing::warn!("dropping dangling user message from persisted history");
            messages.pop();
        }

        let history = Self { messages };
        if history.is_well_paired() {
            Ok(history)
        } else {
            Err(Error::History(
                "persisted messages are not in user/assistant pairs".to_string(),
            ))
        }
    }
}

/// Persists a [`ConversationHistory`] as one JSON file
///
/// The single file plays the role of the single named storage key:
/// written whole after each turn, removed entirely on reset.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
}

impl HistoryStore {
    /// Create a store backed by the given file path
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the persisted history, or an empty one if absent
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed
    pub fn load(&self) -> Result<ConversationHistory> {
        if !self.path.exists() {
            return Ok(ConversationHistory::new());
        }

        let content = std::fs::read_to_string(&self.path)?;
        let messages: Vec<Message> = serde_json::from_str(&content)?;
        ConversationHistory::from_messages(messages)
    }

    /// Persist the history, replacing any previous contents
    ///
    /// # Errors
    ///
    /// Returns [`Error::History`] if the history violates the pairing
    /// invariant, or an IO error if the write fails
    pub fn save(&self, history: &ConversationHistory) -> Result<()> {
        if !history.is_well_paired() {
            return Err(Error::History(
                "refusing to persist a history with an unpaired message".to_string(),
            ));
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string(history.messages())?;
        std::fs::write(&self.path, json)?;
        tracing::debug!(path = %self.path.display(), messages = history.len(), "history saved");
        Ok(())
    }

    /// Remove the persisted history entirely
    ///
    /// # Errors
    ///
    /// Returns error if the file exists and cannot be removed
    pub fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}
