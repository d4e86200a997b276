//! The history aggregate: every message of a conversation plus the cursor.
//!
//! Messages live in a dense arena in creation order with an id → slot table on
//! the side. Removal compacts the arena and rebuilds the table. Creation order
//! is also the order of the root set, so sibling lists for root messages are
//! stable without depending on hash map iteration.

use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use tracing::debug;

use super::message::{Message, MessageId};
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "HistorySnapshot", into = "HistorySnapshot")]
pub struct History {
    messages: Vec<Message>,
    slots: HashMap<MessageId, usize>,
    current_id: Option<MessageId>,
}

/// Wire shape of a history: `{ "messages": { id: message }, "currentId": id }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistorySnapshot {
    #[serde(default)]
    pub messages: HashMap<MessageId, Message>,
    #[serde(default)]
    pub current_id: Option<MessageId>,
}

impl History {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a history from messages given in creation order and validates it.
    pub fn from_messages(messages: Vec<Message>, current_id: Option<MessageId>) -> Result<Self> {
        let mut history = Self::new();
        for message in messages {
            if history.contains(&message.id) {
                return Err(Error::InvariantViolation(format!(
                    "duplicate message id {}",
                    message.id
                )));
            }
            history.insert(message);
        }
        history.current_id = current_id;
        history.validate()?;
        Ok(history)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.slots.get(id).and_then(|&slot| self.messages.get(slot))
    }

    pub(crate) fn get_mut(&mut self, id: &MessageId) -> Option<&mut Message> {
        let slot = *self.slots.get(id)?;
        self.messages.get_mut(slot)
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.slots.contains_key(id)
    }

    pub fn current_id(&self) -> Option<&MessageId> {
        self.current_id.as_ref()
    }

    pub fn current(&self) -> Option<&Message> {
        self.current_id.as_ref().and_then(|id| self.get(id))
    }

    /// Moves the cursor. A non-null id must name an existing message.
    pub fn set_current(&mut self, id: Option<MessageId>) -> Result<()> {
        if let Some(id) = &id {
            if !self.contains(id) {
                return Err(Error::InvalidPointer(id.clone()));
            }
        }
        self.current_id = id;
        Ok(())
    }

    /// All messages in creation order.
    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    /// Root messages in creation order.
    pub fn roots(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.is_root())
    }

    /// Appends a message to the arena. Linkage is the caller's job.
    pub(crate) fn insert(&mut self, message: Message) {
        self.slots.insert(message.id.clone(), self.messages.len());
        self.messages.push(message);
    }

    /// Drops the given ids and compacts the arena.
    pub(crate) fn remove_all(&mut self, ids: &HashSet<MessageId>) {
        self.messages.retain(|m| !ids.contains(&m.id));
        self.slots = self
            .messages
            .iter()
            .enumerate()
            .map(|(slot, m)| (m.id.clone(), slot))
            .collect();
    }

    /// Checks linkage, acyclicity and cursor validity.
    pub fn validate(&self) -> Result<()> {
        if self.slots.len() != self.messages.len() {
            return Err(violation(format!(
                "slot table has {} entries for {} messages",
                self.slots.len(),
                self.messages.len()
            )));
        }

        for (slot, message) in self.messages.iter().enumerate() {
            if self.slots.get(&message.id) != Some(&slot) {
                return Err(violation(format!("slot table out of date for {}", message.id)));
            }

            if let Some(parent_id) = &message.parent_id {
                let parent = self.get(parent_id).ok_or_else(|| {
                    violation(format!("{} points at missing parent {parent_id}", message.id))
                })?;
                let listed = parent
                    .children_ids
                    .iter()
                    .filter(|id| **id == message.id)
                    .count();
                if listed != 1 {
                    return Err(violation(format!(
                        "{} is listed {listed} times by its parent {parent_id}",
                        message.id
                    )));
                }
            }

            for child_id in &message.children_ids {
                let child = self.get(child_id).ok_or_else(|| {
                    violation(format!("{} lists missing child {child_id}", message.id))
                })?;
                if child.parent_id.as_ref() != Some(&message.id) {
                    return Err(violation(format!(
                        "{child_id} is listed by {} but does not point back",
                        message.id
                    )));
                }
            }
        }

        for message in &self.messages {
            let mut steps = 0;
            let mut cursor = message.parent_id.as_ref();
            while let Some(id) = cursor {
                steps += 1;
                if steps > self.messages.len() {
                    return Err(violation(format!("cycle through {}", message.id)));
                }
                cursor = self.get(id).and_then(|m| m.parent_id.as_ref());
            }
        }

        if let Some(current) = &self.current_id {
            if !self.contains(current) {
                return Err(Error::InvalidPointer(current.clone()));
            }
        }

        Ok(())
    }

    /// Full validation in debug and test builds, nothing in release.
    pub fn debug_validate(&self) -> Result<()> {
        if cfg!(debug_assertions) {
            self.validate()
        } else {
            Ok(())
        }
    }
}

fn violation(details: String) -> Error {
    debug!(target: "history::validate", "{}", details);
    Error::InvariantViolation(details)
}

impl TryFrom<HistorySnapshot> for History {
    type Error = Error;

    fn try_from(snapshot: HistorySnapshot) -> Result<Self> {
        let mut messages = Vec::with_capacity(snapshot.messages.len());
        for (key, message) in snapshot.messages {
            if key != message.id {
                return Err(violation(format!(
                    "snapshot key {key} holds message {}",
                    message.id
                )));
            }
            messages.push(message);
        }
        // Map order carries no meaning; roots are ordered by creation time, ties by id.
        messages.sort_by(|a, b| {
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| a.id.cmp(&b.id))
        });
        Self::from_messages(messages, snapshot.current_id)
    }
}

impl From<History> for HistorySnapshot {
    fn from(history: History) -> Self {
        Self {
            messages: history
                .messages
                .into_iter()
                .map(|m| (m.id.clone(), m))
                .collect(),
            current_id: history.current_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::conversation::message::MessageData;
    use serde_json::json;

    fn node(id: &str, parent: Option<&str>, children: &[&str]) -> Message {
        Message {
            id: MessageId::from(id),
            parent_id: parent.map(MessageId::from),
            children_ids: children.iter().map(|c| MessageId::from(*c)).collect(),
            content: id.to_string(),
            files: Vec::new(),
            timestamp: Some(1),
            data: MessageData::User { models: Vec::new() },
        }
    }

    #[test]
    fn set_current_rejects_unknown_ids() {
        let mut history =
            History::from_messages(vec![node("u1", None, &[])], None).unwrap();

        assert!(matches!(
            history.set_current(Some(MessageId::from("ghost"))),
            Err(Error::InvalidPointer(_))
        ));
        assert_eq!(history.current_id(), None);

        history.set_current(Some(MessageId::from("u1"))).unwrap();
        assert_eq!(history.current().map(|m| m.content.as_str()), Some("u1"));

        history.set_current(None).unwrap();
        assert_eq!(history.current_id(), None);
    }

    #[test]
    fn validate_catches_one_sided_links() {
        let missing_back_link = vec![node("u1", None, &[]), node("a1", Some("u1"), &[])];
        assert!(matches!(
            History::from_messages(missing_back_link, None),
            Err(Error::InvariantViolation(_))
        ));

        let stray_child = vec![node("u1", None, &["a1"]), node("a1", None, &[])];
        assert!(matches!(
            History::from_messages(stray_child, None),
            Err(Error::InvariantViolation(_))
        ));

        let listed_twice = vec![node("u1", None, &["a1", "a1"]), node("a1", Some("u1"), &[])];
        assert!(matches!(
            History::from_messages(listed_twice, None),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn validate_catches_dangling_parents_and_cycles() {
        let dangling = vec![node("a1", Some("gone"), &[])];
        assert!(History::from_messages(dangling, None).is_err());

        let cycle = vec![node("x", Some("y"), &["y"]), node("y", Some("x"), &["x"])];
        assert!(matches!(
            History::from_messages(cycle, None),
            Err(Error::InvariantViolation(_))
        ));
    }

    #[test]
    fn remove_all_compacts_and_keeps_creation_order() {
        let mut history = History::from_messages(
            vec![node("r1", None, &[]), node("r2", None, &[]), node("r3", None, &[])],
            None,
        )
        .unwrap();

        history.remove_all(&HashSet::from([MessageId::from("r2")]));

        let roots: Vec<&str> = history.roots().map(|m| m.id.as_str()).collect();
        assert_eq!(roots, vec!["r1", "r3"]);
        assert_eq!(history.get(&MessageId::from("r3")).map(|m| m.content.as_str()), Some("r3"));
        history.validate().unwrap();
    }

    #[test]
    fn snapshot_round_trip_validates() {
        let snapshot = json!({
            "messages": {
                "u1": { "id": "u1", "parentId": null, "childrenIds": ["a1"], "role": "user", "content": "hi", "timestamp": 5 },
                "a1": { "id": "a1", "parentId": "u1", "childrenIds": [], "role": "assistant", "content": "hello", "model": "m", "timestamp": 6 }
            },
            "currentId": "a1"
        });

        let history: History = serde_json::from_value(snapshot).unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history.current_id(), Some(&MessageId::from("a1")));

        let back = serde_json::to_value(&history).unwrap();
        assert_eq!(back["currentId"], "a1");
        assert_eq!(back["messages"]["a1"]["parentId"], "u1");

        let broken = json!({
            "messages": { "u1": { "id": "u1", "parentId": "nope", "role": "user" } },
            "currentId": null
        });
        assert!(serde_json::from_value::<History>(broken).is_err());
    }
}
