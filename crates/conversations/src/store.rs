//! File-backed conversation store.
//!
//! Each conversation lives in `{conversations_dir}/{id}.json`. Writes go
//! through a temp file + rename so a crash never leaves a half-written
//! conversation behind.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hermes_domain::chat::Message;
use hermes_domain::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Model
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    pub fn new(id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.unwrap_or_else(|| Uuid::new_v4().to_string()),
            title: "Nova Conversa".into(),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Derive the title from the first user message: first six words, with
    /// an ellipsis when truncated.
    pub fn title_from(content: &str) -> String {
        let words: Vec<&str> = content.split_whitespace().collect();
        let mut title = words.iter().take(6).copied().collect::<Vec<_>>().join(" ");
        if words.len() > 6 {
            title.push_str("...");
        }
        title
    }
}

/// Listing shape: metadata without the message bodies.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Store
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct ConversationStore {
    dir: PathBuf,
}

impl ConversationStore {
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, id: &str) -> PathBuf {
        self.dir.join(format!("{id}.json"))
    }

    /// Load a conversation. `None` when it does not exist; a corrupt file
    /// is logged and treated as absent.
    pub fn load(&self, id: &str) -> Option<Conversation> {
        let path = self.path_for(id);
        if !path.exists() {
            return None;
        }
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(conv) => Some(conv),
                Err(e) => {
                    tracing::error!(id, error = %e, "corrupt conversation file");
                    None
                }
            },
            Err(e) => {
                tracing::error!(id, error = %e, "failed to read conversation");
                None
            }
        }
    }

    /// Persist a conversation atomically.
    pub fn save(&self, conversation: &Conversation) -> Result<()> {
        let path = self.path_for(&conversation.id);
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(conversation)?;
        std::fs::write(&tmp, data)?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| Error::Storage(format!("renaming {}: {e}", tmp.display())))?;
        tracing::debug!(id = %conversation.id, "conversation saved");
        Ok(())
    }

    /// List conversations, newest-updated first.
    pub fn list(&self) -> Vec<ConversationSummary> {
        let mut summaries: Vec<ConversationSummary> = std::fs::read_dir(&self.dir)
            .into_iter()
            .flatten()
            .flatten()
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .map(|ext| ext == "json")
                    .unwrap_or(false)
            })
            .filter_map(|entry| {
                let raw = std::fs::read_to_string(entry.path()).ok()?;
                let conv: Conversation = serde_json::from_str(&raw).ok()?;
                Some(ConversationSummary {
                    id: conv.id,
                    title: conv.title,
                    message_count: conv.messages.len(),
                    created_at: conv.created_at,
                    updated_at: conv.updated_at,
                })
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        summaries
    }

    /// Delete a conversation file. Absent file is success.
    pub fn delete(&self, id: &str) -> Result<()> {
        match std::fs::remove_file(self.path_for(id)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hermes_domain::chat::Message;

    fn store() -> (tempfile::TempDir, ConversationStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ConversationStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[test]
    fn save_and_load_round_trip() {
        let (_dir, store) = store();
        let mut conv = Conversation::new(None);
        conv.messages.push(Message::user("Oi"));
        conv.messages.push(Message::assistant("Olá."));
        store.save(&conv).unwrap();

        let loaded = store.load(&conv.id).unwrap();
        assert_eq!(loaded.id, conv.id);
        assert_eq!(loaded.messages.len(), 2);
        assert_eq!(loaded.messages[1].content, "Olá.");
    }

    #[test]
    fn load_missing_returns_none() {
        let (_dir, store) = store();
        assert!(store.load("nope").is_none());
    }

    #[test]
    fn corrupt_file_is_treated_as_absent() {
        let (dir, store) = store();
        std::fs::write(dir.path().join("bad.json"), "{not json").unwrap();
        assert!(store.load("bad").is_none());
    }

    #[test]
    fn list_is_newest_first() {
        let (_dir, store) = store();
        let mut a = Conversation::new(Some("a".into()));
        a.updated_at = Utc::now() - chrono::Duration::hours(2);
        let mut b = Conversation::new(Some("b".into()));
        b.updated_at = Utc::now();
        store.save(&a).unwrap();
        store.save(&b).unwrap();

        let list = store.list();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, "b");
    }

    #[test]
    fn delete_is_idempotent() {
        let (_dir, store) = store();
        let conv = Conversation::new(Some("x".into()));
        store.save(&conv).unwrap();
        store.delete("x").unwrap();
        store.delete("x").unwrap();
        assert!(store.load("x").is_none());
    }

    #[test]
    fn title_from_truncates_at_six_words() {
        assert_eq!(Conversation::title_from("Oi"), "Oi");
        assert_eq!(
            Conversation::title_from("um dois três quatro cinco seis sete"),
            "um dois três quatro cinco seis..."
        );
    }
}
