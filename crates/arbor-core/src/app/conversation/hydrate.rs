//! Turning fetched conversations into a [`History`].

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::history::{History, HistorySnapshot};
use super::message::{FileAttachment, Message, MessageData, MessageId, Role};
use crate::error::Result;

/// One entry of a conversation stored as a plain list instead of a tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatMessage {
    #[serde(default)]
    pub id: Option<MessageId>,
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub timestamp: Option<u64>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub files: Vec<FileAttachment>,
}

/// What the remote side handed back for a conversation.
#[derive(Debug, Clone, PartialEq)]
pub enum RemoteConversation {
    Tree(HistorySnapshot),
    Flat(Vec<FlatMessage>),
    Empty,
}

/// Chat payload as returned by the conversation fetch endpoint.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RemoteChat {
    #[serde(default)]
    pub history: Option<HistorySnapshot>,
    #[serde(default)]
    pub messages: Option<Vec<FlatMessage>>,
    /// Model selection saved with the chat, if any.
    #[serde(default)]
    pub models: Option<Vec<String>>,
}

impl RemoteChat {
    /// An explicit tree wins over the flat list.
    pub fn conversation(self) -> RemoteConversation {
        match (self.history, self.messages) {
            (Some(history), _) => RemoteConversation::Tree(history),
            (None, Some(messages)) => RemoteConversation::Flat(messages),
            (None, None) => RemoteConversation::Empty,
        }
    }
}

impl RemoteConversation {
    pub fn into_history(self) -> Result<History> {
        match self {
            RemoteConversation::Tree(snapshot) => History::try_from(snapshot),
            RemoteConversation::Flat(messages) => from_flat(messages),
            RemoteConversation::Empty => Ok(History::new()),
        }
    }
}

/// Chains a flat list into a single lineage with the cursor on the last entry.
pub fn from_flat(messages: Vec<FlatMessage>) -> Result<History> {
    let mut nodes: Vec<Message> = Vec::with_capacity(messages.len());
    let mut last_id: Option<MessageId> = None;

    for flat in messages {
        let id = flat.id.unwrap_or_default();
        let data = match flat.role {
            Role::User => MessageData::User { models: Vec::new() },
            Role::Assistant => MessageData::Assistant {
                model: flat.model.unwrap_or_default(),
                done: true,
                error: None,
                annotation: None,
                original_content: None,
            },
        };

        if let Some(previous) = nodes.last_mut() {
            previous.children_ids.push(id.clone());
        }
        nodes.push(Message {
            id: id.clone(),
            parent_id: last_id.take(),
            children_ids: Vec::new(),
            content: flat.content,
            files: FileAttachment::sanitize(flat.files),
            timestamp: flat.timestamp,
            data,
        });
        last_id = Some(id);
    }

    debug!(target: "history::hydrate", "Built single lineage of {} messages", nodes.len());
    History::from_messages(nodes, last_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flat_list_becomes_single_lineage() {
        let chat: RemoteChat = serde_json::from_value(json!({
            "messages": [
                { "id": "u1", "role": "user", "content": "hi", "timestamp": 1 },
                { "role": "assistant", "content": "hello", "model": "m1" },
                { "id": "u2", "role": "user", "content": "more",
                  "files": [{ "type": "file", "url": "/f/1", "name": "notes.txt" }] }
            ],
            "models": ["m1"]
        }))
        .unwrap();
        assert_eq!(chat.models, Some(vec!["m1".to_string()]));

        let history = chat.conversation().into_history().unwrap();

        assert_eq!(history.len(), 3);
        let u1 = history.get(&MessageId::from("u1")).unwrap();
        assert!(u1.is_root());
        assert_eq!(u1.children_ids.len(), 1);

        let answer_id = u1.children_ids[0].clone();
        let answer = history.get(&answer_id).unwrap();
        assert_eq!(answer.model(), Some("m1"));
        assert!(!answer.is_streaming());
        assert_eq!(answer.children_ids, vec![MessageId::from("u2")]);

        let u2 = history.get(&MessageId::from("u2")).unwrap();
        assert_eq!(u2.parent_id(), Some(&answer_id));
        assert_eq!(u2.files[0].name.as_deref(), Some("notes.txt"));
        assert_eq!(history.current_id(), Some(&MessageId::from("u2")));
    }

    #[test]
    fn flat_attachments_without_url_are_dropped_and_kind_defaults() {
        let chat: RemoteChat = serde_json::from_value(json!({
            "messages": [
                { "id": "u1", "role": "user", "content": "see attached",
                  "files": [
                      { "url": "/f/1", "name": "notes.txt" },
                      { "type": "image", "name": "pending.png" },
                      { "type": "", "url": "/f/2" }
                  ] },
                { "id": "a1", "role": "assistant", "content": "got it", "model": "m1" }
            ]
        }))
        .unwrap();

        let history = chat.conversation().into_history().unwrap();

        assert_eq!(history.len(), 2);
        let files = &history.get(&MessageId::from("u1")).unwrap().files;
        assert_eq!(
            files,
            &vec![
                FileAttachment::new("file", "/f/1").with_name("notes.txt"),
                FileAttachment::new("file", "/f/2"),
            ]
        );
        assert_eq!(history.current_id(), Some(&MessageId::from("a1")));
    }

    #[test]
    fn tree_takes_precedence_over_flat_list() {
        let chat: RemoteChat = serde_json::from_value(json!({
            "history": {
                "messages": {
                    "u1": { "id": "u1", "parentId": null, "childrenIds": [], "role": "user", "content": "tree" }
                },
                "currentId": "u1"
            },
            "messages": [{ "id": "x", "role": "user", "content": "flat" }]
        }))
        .unwrap();

        let history = chat.conversation().into_history().unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history.current().map(|m| m.content.as_str()), Some("tree"));
    }

    #[test]
    fn nothing_fetched_means_empty_history() {
        let history = RemoteChat::default().conversation().into_history().unwrap();
        assert!(history.is_empty());
        assert_eq!(history.current_id(), None);
    }
}
