use crate::config::{read_json, write_json};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEFAULT_CONVERSATION: &str = "default";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

/// On-disk document: conversation id -> messages, plus display titles.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConversationData {
    #[serde(default)]
    pub conversations: BTreeMap<String, Vec<Message>>,
    #[serde(default)]
    pub conversation_titles: BTreeMap<String, String>,
}

pub struct ConversationStore {
    path: PathBuf,
    data: ConversationData,
}

impl ConversationStore {
    /// Loads the history and makes sure the `default` conversation exists.
    pub async fn load(
        path: impl Into<PathBuf>,
        system_prompt: &str,
        default_title: &str,
    ) -> anyhow::Result<Self> {
        let path = path.into();
        let data = read_json::<ConversationData>(&path).await.unwrap_or_default();
        tracing::info!(
            path = %path.display(),
            conversations = data.conversations.len(),
            "conversation history loaded"
        );

        let mut store = Self { path, data };
        if !store.data.conversations.contains_key(DEFAULT_CONVERSATION) {
            store
                .data
                .conversations
                .insert(DEFAULT_CONVERSATION.to_string(), vec![Message::system(system_prompt)]);
            store
                .data
                .conversation_titles
                .insert(DEFAULT_CONVERSATION.to_string(), default_title.to_string());
            store.save().await?;
        }
        Ok(store)
    }

    pub async fn save(&self) -> anyhow::Result<()> {
        write_json(&self.path, &self.data).await?;
        tracing::debug!(
            path = %self.path.display(),
            conversations = self.data.conversations.len(),
            "conversation history saved"
        );
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn data(&self) -> &ConversationData {
        &self.data
    }

    /// Replaces the whole document, saves it, and reads it back.
    pub async fn replace(&mut self, data: ConversationData) -> anyhow::Result<()> {
        self.data = data;
        self.save().await?;
        self.data = read_json(&self.path).await.unwrap_or_default();
        Ok(())
    }

    /// Rewrites the leading message of every non-empty conversation.
    pub fn apply_system_prompt(&mut self, prompt: &str) {
        for messages in self.data.conversations.values_mut() {
            if let Some(first) = messages.first_mut() {
                *first = Message::system(prompt);
            }
        }
    }

    /// Stored history, or a fresh one seeded with the system prompt.
    pub fn history(&self, id: &str, system_prompt: &str) -> Vec<Message> {
        match self.data.conversations.get(id) {
            Some(messages) if !messages.is_empty() => messages.clone(),
            _ => vec![Message::system(system_prompt)],
        }
    }

    pub async fn commit(&mut self, id: &str, messages: Vec<Message>) -> anyhow::Result<()> {
        self.data.conversations.insert(id.to_string(), messages);
        self.save().await
    }
}
