use serde::{Deserialize, Serialize};
use shared::agent_api::ChatMessage;
use shared::error::ChatError;
use std::sync::Arc;

use crate::store::{Entries, KeyValueStore};

const KEY_PREFIX: &str = "chat_history_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sender {
    User,
    Assistant,
    System,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub sender: Sender,
    pub content: String,
}

impl HistoryEntry {
    pub fn new(sender: Sender, content: impl Into<String>) -> Self {
        Self {
            sender,
            content: content.into(),
        }
    }

    /// Anything not sent by the user is replayed as an assistant turn.
    pub fn to_message(&self) -> ChatMessage {
        match self.sender {
            Sender::User => ChatMessage::user(&self.content),
            Sender::Assistant | Sender::System => ChatMessage::assistant(&self.content),
        }
    }
}

/// Conversation log for one host, kept in the store under `chat_history_<host>`.
pub struct ChatHistory {
    store: Arc<dyn KeyValueStore>,
    key: String,
    entries: Vec<HistoryEntry>,
    stored_limit: usize,
    request_limit: usize,
}

impl ChatHistory {
    pub fn load(
        store: Arc<dyn KeyValueStore>,
        host: &str,
        stored_limit: usize,
        request_limit: usize,
    ) -> Result<Self, ChatError> {
        let key = format!("{KEY_PREFIX}{host}");
        let entries = match store.get(&[key.as_str()])?.remove(&key) {
            Some(value) => serde_json::from_value(value).unwrap_or_else(|e| {
                tracing::warn!(error = %e, %key, "discarding unreadable history");
                Vec::new()
            }),
            None => Vec::new(),
        };
        Ok(Self {
            store,
            key,
            entries,
            stored_limit,
            request_limit,
        })
    }

    pub fn entries(&self) -> &[HistoryEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn push(&mut self, entry: HistoryEntry) {
        self.entries.push(entry);
    }

    /// Writes the most recent entries, up to the stored limit.
    pub fn save(&self) -> Result<(), ChatError> {
        let start = self.entries.len().saturating_sub(self.stored_limit);
        let value = serde_json::to_value(&self.entries[start..])
            .map_err(|e| ChatError::Store(e.to_string()))?;
        let mut entries = Entries::new();
        entries.insert(self.key.clone(), value);
        self.store.set(entries)
    }

    /// The trailing turns that accompany a new request.
    pub fn request_window(&self) -> Vec<ChatMessage> {
        let start = self.entries.len().saturating_sub(self.request_limit);
        self.entries[start..]
            .iter()
            .map(HistoryEntry::to_message)
            .collect()
    }
}

/// Removes every host's history. Returns how many hosts were cleared.
pub fn clear_all(store: &dyn KeyValueStore) -> Result<usize, ChatError> {
    let keys: Vec<String> = store
        .keys()?
        .into_iter()
        .filter(|k| k.starts_with(KEY_PREFIX))
        .collect();
    if !keys.is_empty() {
        let refs: Vec<&str> = keys.iter().map(String::as_str).collect();
        store.remove(&refs)?;
    }
    Ok(keys.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    #[test]
    fn test_save_keeps_most_recent() {
        let store = Arc::new(MemoryStore::new());
        let mut history = ChatHistory::load(store.clone(), "example.com", 50, 10).unwrap();
        for i in 0..60 {
            history.push(HistoryEntry::new(Sender::User, format!("m{i}")));
        }
        history.save().unwrap();

        let reloaded = ChatHistory::load(store, "example.com", 50, 10).unwrap();
        assert_eq!(reloaded.entries().len(), 50);
        assert_eq!(reloaded.entries()[0].content, "m10");
        assert_eq!(reloaded.entries()[49].content, "m59");
    }

    #[test]
    fn test_request_window_maps_roles() {
        let store = Arc::new(MemoryStore::new());
        let mut history = ChatHistory::load(store, "a.org", 50, 10).unwrap();
        for i in 0..12 {
            let sender = if i % 2 == 0 { Sender::User } else { Sender::Assistant };
            history.push(HistoryEntry::new(sender, format!("t{i}")));
        }

        let window = history.request_window();
        assert_eq!(window.len(), 10);
        assert_eq!(window[0].text(), "t2");
        assert_eq!(window[0].role, "user");
        assert_eq!(window[1].role, "assistant");
    }

    #[test]
    fn test_history_is_per_host_and_clearable() {
        let store = Arc::new(MemoryStore::new());
        let mut a = ChatHistory::load(store.clone(), "a.org", 50, 10).unwrap();
        a.push(HistoryEntry::new(Sender::User, "hi"));
        a.save().unwrap();

        let b = ChatHistory::load(store.clone(), "b.org", 50, 10).unwrap();
        assert!(b.is_empty());

        let mut entries = Entries::new();
        entries.insert("wallyApiKey".into(), json!("k"));
        store.set(entries).unwrap();

        assert_eq!(clear_all(store.as_ref()).unwrap(), 1);
        assert!(ChatHistory::load(store.clone(), "a.org", 50, 10).unwrap().is_empty());
        assert_eq!(store.keys().unwrap(), vec!["wallyApiKey".to_string()]);
    }

    #[test]
    fn test_stored_wire_format() {
        let store = Arc::new(MemoryStore::new());
        let mut history = ChatHistory::load(store.clone(), "x.io", 50, 10).unwrap();
        history.push(HistoryEntry::new(Sender::Assistant, "**hi**"));
        history.save().unwrap();
        let raw = store.get(&["chat_history_x.io"]).unwrap();
        assert_eq!(
            raw["chat_history_x.io"],
            json!([{"sender": "assistant", "content": "**hi**"}])
        );
    }
}
