//! Sibling navigation.
//!
//! Moving to another branch always lands on a leaf: from the chosen sibling we
//! keep following the most recently created child until there is none, so a
//! branch opens on its latest continuation. A move whose target is the message
//! itself leaves the cursor alone and reports `None`.

use tracing::debug;

use super::history::History;
use super::message::{Message, MessageId};

/// Ids of `message` and its siblings in canonical order.
///
/// For a child this is the parent's `children_ids`; for a root it is the
/// root set in creation order.
pub fn siblings_of(history: &History, message: &Message) -> Vec<MessageId> {
    match message.parent_id() {
        Some(parent_id) => history
            .get(parent_id)
            .map(|parent| parent.children_ids.clone())
            .unwrap_or_default(),
        None => history.roots().map(|m| m.id.clone()).collect(),
    }
}

/// Zero-based position of `message` among its siblings, and the sibling count.
pub fn sibling_position(history: &History, message: &Message) -> Option<(usize, usize)> {
    let siblings = siblings_of(history, message);
    let index = siblings.iter().position(|id| *id == message.id)?;
    Some((index, siblings.len()))
}

/// Deepest descendant reached by repeatedly taking the last child.
pub fn leaf_of(history: &History, id: &MessageId) -> MessageId {
    let mut leaf = id.clone();
    let mut steps = 0;
    while let Some(last) = history.get(&leaf).and_then(|m| m.children_ids.last()) {
        leaf = last.clone();
        steps += 1;
        if steps > history.len() {
            break;
        }
    }
    leaf
}

/// Jumps to the sibling at `target_index` (clamped) and descends to its leaf.
pub fn goto_sibling(
    history: &mut History,
    message_id: &MessageId,
    target_index: usize,
) -> Option<MessageId> {
    let message = history.get(message_id)?;
    let siblings = siblings_of(history, message);
    let clamped = target_index.min(siblings.len().checked_sub(1)?);
    let target = siblings.get(clamped)?.clone();
    if target == *message_id {
        return None;
    }
    descend_and_select(history, &target)
}

/// Moves to the previous sibling's branch; no-op on the first sibling.
pub fn show_previous(history: &mut History, message_id: &MessageId) -> Option<MessageId> {
    let message = history.get(message_id)?;
    let siblings = siblings_of(history, message);
    let index = siblings.iter().position(|id| id == message_id)?;
    let target = siblings.get(index.checked_sub(1)?)?.clone();
    descend_and_select(history, &target)
}

/// Moves to the next sibling's branch; no-op on the last sibling.
pub fn show_next(history: &mut History, message_id: &MessageId) -> Option<MessageId> {
    let message = history.get(message_id)?;
    let siblings = siblings_of(history, message);
    let index = siblings.iter().position(|id| id == message_id)?;
    let target = siblings.get(index + 1)?.clone();
    descend_and_select(history, &target)
}

fn descend_and_select(history: &mut History, sibling: &MessageId) -> Option<MessageId> {
    let leaf = leaf_of(history, sibling);
    if history.current_id() == Some(&leaf) {
        return None;
    }
    debug!(target: "navigator::select", "Switching branch via {} to leaf {}", sibling, leaf);
    history.set_current(Some(leaf.clone())).ok()?;
    Some(leaf)
}
