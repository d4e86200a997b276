//! Message types for the conversation tree.
//!
//! A [`Message`] is one node of the tree: a shared base record (linkage,
//! content, attachments, timestamp) plus role-specific data in [`MessageData`].
//! Fields that only make sense for generated answers (model, streaming flag,
//! error, rating, edit backup) are reachable only through the assistant variant.

use serde::{Deserialize, Serialize};
use serde_repr::{Deserialize_repr, Serialize_repr};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use strum_macros::Display;

/// Opaque message identifier. Locally created nodes always get a fresh UUID.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn from_string(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MessageId {
    fn from(value: &str) -> Self {
        Self::from_string(value)
    }
}

/// Role in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

pub const DEFAULT_ATTACHMENT_KIND: &str = "file";

fn default_attachment_kind() -> String {
    DEFAULT_ATTACHMENT_KIND.to_string()
}

/// Attachment descriptor carried by a message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    #[serde(rename = "type", default = "default_attachment_kind")]
    pub kind: String,
    /// Empty when the sender never uploaded the file.
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl FileAttachment {
    pub fn new(kind: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            url: url.into(),
            name: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Drops attachments without a url and fills in a missing kind.
    pub fn sanitize(files: Vec<FileAttachment>) -> Vec<FileAttachment> {
        files
            .into_iter()
            .filter(|file| !file.url.trim().is_empty())
            .map(|mut file| {
                if file.kind.trim().is_empty() {
                    file.kind = default_attachment_kind();
                }
                file
            })
            .collect()
    }
}

/// User feedback on a generated answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize_repr, Deserialize_repr)]
#[repr(i8)]
pub enum Rating {
    Down = -1,
    Up = 1,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Annotation {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rating: Option<Rating>,
}

/// Failure marker for a generation. Remote snapshots may carry either a bare
/// flag or a payload with the failure text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageError {
    Flag(bool),
    Details { content: String },
}

impl MessageError {
    pub fn details(content: impl Into<String>) -> Self {
        Self::Details {
            content: content.into(),
        }
    }

    pub fn is_set(&self) -> bool {
        match self {
            MessageError::Flag(flag) => *flag,
            MessageError::Details { .. } => true,
        }
    }
}

fn default_done() -> bool {
    true
}

/// Role-specific part of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(
    tag = "role",
    rename_all = "lowercase",
    rename_all_fields = "camelCase"
)]
pub enum MessageData {
    User {
        /// Models selected when this prompt was submitted.
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        models: Vec<String>,
    },
    Assistant {
        #[serde(default)]
        model: String,
        /// `false` while the answer is streaming.
        #[serde(default = "default_done")]
        done: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<MessageError>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        annotation: Option<Annotation>,
        /// Content before the last in-place edit.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        original_content: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(default)]
    pub parent_id: Option<MessageId>,
    #[serde(default)]
    pub children_ids: Vec<MessageId>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<FileAttachment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
    #[serde(flatten)]
    pub data: MessageData,
}

impl Message {
    pub fn user(
        parent_id: Option<MessageId>,
        content: impl Into<String>,
        files: Vec<FileAttachment>,
        models: Vec<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            id: MessageId::new(),
            parent_id,
            children_ids: Vec::new(),
            content: content.into(),
            files,
            timestamp: Some(timestamp),
            data: MessageData::User { models },
        }
    }

    /// An empty, still-streaming answer waiting to be filled.
    pub fn assistant_placeholder(parent_id: MessageId, model: impl Into<String>) -> Self {
        Self {
            id: MessageId::new(),
            parent_id: Some(parent_id),
            children_ids: Vec::new(),
            content: String::new(),
            files: Vec::new(),
            timestamp: None,
            data: MessageData::Assistant {
                model: model.into(),
                done: false,
                error: None,
                annotation: None,
                original_content: None,
            },
        }
    }

    pub fn id(&self) -> &MessageId {
        &self.id
    }

    pub fn parent_id(&self) -> Option<&MessageId> {
        self.parent_id.as_ref()
    }

    pub fn role(&self) -> Role {
        match &self.data {
            MessageData::User { .. } => Role::User,
            MessageData::Assistant { .. } => Role::Assistant,
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn is_leaf(&self) -> bool {
        self.children_ids.is_empty()
    }

    /// True while an assistant answer is still being generated.
    pub fn is_streaming(&self) -> bool {
        matches!(self.data, MessageData::Assistant { done: false, .. })
    }

    pub fn model(&self) -> Option<&str> {
        match &self.data {
            MessageData::Assistant { model, .. } => Some(model.as_str()),
            MessageData::User { .. } => None,
        }
    }

    pub fn error(&self) -> Option<&MessageError> {
        match &self.data {
            MessageData::Assistant { error, .. } => error.as_ref(),
            MessageData::User { .. } => None,
        }
    }

    pub fn rating(&self) -> Option<Rating> {
        match &self.data {
            MessageData::Assistant { annotation, .. } => {
                annotation.as_ref().and_then(|a| a.rating)
            }
            MessageData::User { .. } => None,
        }
    }

    pub fn original_content(&self) -> Option<&str> {
        match &self.data {
            MessageData::Assistant {
                original_content, ..
            } => original_content.as_deref(),
            MessageData::User { .. } => None,
        }
    }

    /// Helper to get current timestamp
    pub fn current_timestamp() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn assistant_done_defaults_to_true_when_absent() {
        let message: Message = serde_json::from_value(json!({
            "id": "a1",
            "parentId": "u1",
            "childrenIds": [],
            "role": "assistant",
            "content": "hello",
            "model": "gpt-4o"
        }))
        .unwrap();

        assert!(!message.is_streaming());
        assert_eq!(message.model(), Some("gpt-4o"));
        assert_eq!(message.parent_id(), Some(&MessageId::from("u1")));
    }

    #[test]
    fn remote_fields_use_camel_case_and_accept_both_error_shapes() {
        let flagged: Message = serde_json::from_value(json!({
            "id": "a1",
            "parentId": null,
            "role": "assistant",
            "content": "",
            "done": false,
            "error": true,
            "annotation": { "rating": -1 },
            "originalContent": "before"
        }))
        .unwrap();
        assert!(flagged.is_streaming());
        assert_eq!(flagged.error(), Some(&MessageError::Flag(true)));
        assert_eq!(flagged.rating(), Some(Rating::Down));
        assert_eq!(flagged.original_content(), Some("before"));

        let detailed: Message = serde_json::from_value(json!({
            "id": "a2",
            "role": "assistant",
            "error": { "content": "HTTP 500" }
        }))
        .unwrap();
        assert_eq!(detailed.error(), Some(&MessageError::details("HTTP 500")));
    }

    #[test]
    fn user_messages_have_no_assistant_fields() {
        let message = Message::user(
            None,
            "hi",
            vec![FileAttachment::new("image", "https://example.com/a.png").with_name("a.png")],
            vec!["gpt-4o".to_string()],
            10,
        );

        assert_eq!(message.role(), Role::User);
        assert_eq!(message.model(), None);
        assert_eq!(message.rating(), None);
        assert!(!message.is_streaming());

        let value = serde_json::to_value(&message).unwrap();
        assert_eq!(value["role"], "user");
        assert_eq!(value["files"][0]["type"], "image");
        assert_eq!(value["models"][0], "gpt-4o");
        assert!(value.get("done").is_none());
    }

    #[test]
    fn placeholder_is_streaming_and_empty() {
        let placeholder = Message::assistant_placeholder(MessageId::from("u1"), "llama3");
        assert!(placeholder.is_streaming());
        assert!(placeholder.content.is_empty());
        assert!(placeholder.timestamp.is_none());
        assert_eq!(placeholder.role().to_string(), "assistant");
    }
}
