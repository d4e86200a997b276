//! Structural mutations of the tree: new turns, edits, deletion, ratings.
//!
//! Every function checks its preconditions before touching the history, so a
//! returned error means nothing was changed.

use std::collections::HashSet;
use tracing::debug;

use super::history::History;
use super::message::{
    Annotation, FileAttachment, Message, MessageData, MessageId, Rating, Role,
};
use crate::error::{Error, Result};

/// Ids created by [`append_turn`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnIds {
    pub user_id: MessageId,
    pub assistant_id: MessageId,
}

/// Replacement payload for [`edit_message`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EditInput {
    pub content: String,
    pub files: Vec<FileAttachment>,
}

impl EditInput {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            files: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EditOutcome {
    /// Content was overwritten in place.
    Saved { message_id: MessageId },
    /// A new user sibling was created; it still needs an answer.
    ForkedUser { message_id: MessageId },
    /// A new assistant sibling was created with the edited text.
    ForkedAssistant { message_id: MessageId },
}

pub(crate) fn has_model(models: &[String]) -> bool {
    models.iter().any(|m| !m.trim().is_empty())
}

/// Adds a user prompt under the cursor and an empty answer under it.
pub fn append_turn(
    history: &mut History,
    prompt: &str,
    files: Vec<FileAttachment>,
    model: &str,
    now: u64,
) -> Result<TurnIds> {
    if prompt.trim().is_empty() && files.is_empty() {
        return Err(Error::EmptyPrompt);
    }
    if model.trim().is_empty() {
        return Err(Error::NoModelSelected);
    }

    let parent_id = history.current_id().cloned();
    let user = Message::user(
        parent_id.clone(),
        prompt,
        files,
        vec![model.to_string()],
        now,
    );
    let user_id = user.id.clone();
    link_and_insert(history, user)?;

    let assistant_id = add_placeholder(history, &user_id, model)?;
    debug!(
        target: "history::append",
        "Appended turn user={} assistant={} parent={:?}", user_id, assistant_id, parent_id
    );

    Ok(TurnIds {
        user_id,
        assistant_id,
    })
}

/// Inserts a streaming placeholder answer under `parent_id` and selects it.
pub fn add_placeholder(history: &mut History, parent_id: &MessageId, model: &str) -> Result<MessageId> {
    if !history.contains(parent_id) {
        return Err(Error::MessageNotFound(parent_id.clone()));
    }
    let placeholder = Message::assistant_placeholder(parent_id.clone(), model);
    let id = placeholder.id.clone();
    link_and_insert(history, placeholder)?;
    Ok(id)
}

/// Edits a message either in place (`submit = false`) or by forking a sibling.
pub fn edit_message(
    history: &mut History,
    message_id: &MessageId,
    input: EditInput,
    submit: bool,
    selected_models: &[String],
    now: u64,
) -> Result<EditOutcome> {
    let message = history
        .get(message_id)
        .ok_or_else(|| Error::MessageNotFound(message_id.clone()))?
        .clone();

    match (message.role(), submit) {
        (Role::User, true) => {
            if !has_model(selected_models) {
                return Err(Error::NoModelSelected);
            }
            let fork = Message::user(
                message.parent_id,
                input.content,
                input.files,
                selected_models.to_vec(),
                now,
            );
            let fork_id = fork.id.clone();
            link_and_insert(history, fork)?;
            debug!(target: "history::edit", "Forked user message {} as {}", message_id, fork_id);
            Ok(EditOutcome::ForkedUser {
                message_id: fork_id,
            })
        }
        (Role::Assistant, true) => {
            let fork = Message {
                id: MessageId::new(),
                children_ids: Vec::new(),
                files: Vec::new(),
                content: input.content,
                timestamp: Some(now),
                ..message
            };
            let fork_id = fork.id.clone();
            link_and_insert(history, fork)?;
            debug!(target: "history::edit", "Forked assistant message {} as {}", message_id, fork_id);
            Ok(EditOutcome::ForkedAssistant {
                message_id: fork_id,
            })
        }
        (Role::User, false) => {
            let message = history
                .get_mut(message_id)
                .ok_or_else(|| Error::MessageNotFound(message_id.clone()))?;
            message.content = input.content;
            message.files = input.files;
            Ok(EditOutcome::Saved {
                message_id: message_id.clone(),
            })
        }
        (Role::Assistant, false) => {
            let message = history
                .get_mut(message_id)
                .ok_or_else(|| Error::MessageNotFound(message_id.clone()))?;
            let previous = std::mem::replace(&mut message.content, input.content);
            if let MessageData::Assistant {
                original_content, ..
            } = &mut message.data
            {
                *original_content = Some(previous);
            }
            Ok(EditOutcome::Saved {
                message_id: message_id.clone(),
            })
        }
    }
}

/// Removes a message and its direct children, lifting grandchildren up to
/// the removed message's parent. The cursor moves to that parent.
pub fn delete_message(history: &mut History, message_id: &MessageId) -> Result<Option<MessageId>> {
    let message = history
        .get(message_id)
        .ok_or_else(|| Error::MessageNotFound(message_id.clone()))?;

    let parent_id = message.parent_id.clone();
    let children = message.children_ids.clone();
    let grandchildren: Vec<MessageId> = children
        .iter()
        .filter_map(|child| history.get(child))
        .flat_map(|child| child.children_ids.iter().cloned())
        .collect();

    if let Some(parent) = parent_id.as_ref().and_then(|id| history.get_mut(id)) {
        parent.children_ids.retain(|id| id != message_id);
        parent.children_ids.extend(grandchildren.iter().cloned());
    }

    for grandchild in &grandchildren {
        if let Some(node) = history.get_mut(grandchild) {
            node.parent_id = parent_id.clone();
        }
    }

    let mut removed: HashSet<MessageId> = children.into_iter().collect();
    removed.insert(message_id.clone());
    history.remove_all(&removed);
    history.set_current(parent_id.clone())?;

    debug!(
        target: "history::delete",
        "Deleted {} ({} removed, {} re-parented to {:?})",
        message_id,
        removed.len(),
        grandchildren.len(),
        parent_id
    );
    Ok(parent_id)
}

/// Records user feedback on an answer.
pub fn rate_message(history: &mut History, message_id: &MessageId, rating: Rating) -> Result<()> {
    let message = history
        .get_mut(message_id)
        .ok_or_else(|| Error::MessageNotFound(message_id.clone()))?;
    match &mut message.data {
        MessageData::Assistant { annotation, .. } => {
            annotation.get_or_insert_with(Annotation::default).rating = Some(rating);
            Ok(())
        }
        MessageData::User { .. } => Err(Error::InvalidOperation(format!(
            "only assistant messages can be rated, {message_id} is a user message"
        ))),
    }
}

/// Inserts `message` and registers it with its parent, then selects it.
fn link_and_insert(history: &mut History, message: Message) -> Result<()> {
    let id = message.id.clone();
    if let Some(parent_id) = &message.parent_id {
        let parent = history
            .get_mut(parent_id)
            .ok_or_else(|| Error::MessageNotFound(parent_id.clone()))?;
        parent.children_ids.push(id.clone());
    }
    history.insert(message);
    history.set_current(Some(id))
}
