//! Root-to-cursor views of the tree.

use super::history::History;
use super::message::{Message, MessageId};

pub const DEFAULT_PAGE_SIZE: usize = 20;

/// The visible tail of the active lineage.
#[derive(Debug, Clone, PartialEq)]
pub struct Thread {
    /// Oldest first, ending at the cursor.
    pub messages: Vec<Message>,
    /// The first visible message still has ancestors that were cut off.
    pub has_more: bool,
}

impl Thread {
    pub fn ids(&self) -> Vec<&MessageId> {
        self.messages.iter().map(|m| &m.id).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// Walks from the cursor toward the root, keeping at most `limit` messages.
pub fn linearize(history: &History, limit: usize) -> Thread {
    let mut messages = Vec::new();
    let mut cursor = history.current();
    while let Some(message) = cursor {
        if messages.len() == limit {
            break;
        }
        messages.push(message.clone());
        cursor = message.parent_id().and_then(|id| history.get(id));
    }
    messages.reverse();

    let has_more = match messages.first() {
        Some(first) => !first.is_root(),
        None => history.current().is_some(),
    };
    Thread { messages, has_more }
}

/// Full lineage from the root down to `id`, inclusive.
pub fn path_to<'a>(history: &'a History, id: &MessageId) -> Vec<&'a Message> {
    let mut path = Vec::new();
    let mut cursor = history.get(id);
    while let Some(message) = cursor {
        path.push(message);
        if path.len() > history.len() {
            break;
        }
        cursor = message.parent_id().and_then(|parent| history.get(parent));
    }
    path.reverse();
    path
}

/// Backward pagination state for one conversation view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pager {
    page_size: usize,
    visible: usize,
}

impl Default for Pager {
    fn default() -> Self {
        Self::new(DEFAULT_PAGE_SIZE)
    }
}

impl Pager {
    pub fn new(page_size: usize) -> Self {
        let page_size = page_size.max(1);
        Self {
            page_size,
            visible: page_size,
        }
    }

    pub fn visible(&self) -> usize {
        self.visible
    }

    /// Reveals one more page of older messages.
    pub fn load_more(&mut self) -> usize {
        self.visible = self.visible.saturating_add(self.page_size);
        self.visible
    }

    pub fn reset(&mut self) {
        self.visible = self.page_size;
    }

    pub fn view(&self, history: &History) -> Thread {
        linearize(history, self.visible)
    }
}
