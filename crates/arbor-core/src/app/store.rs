//! The message store: single owner of a conversation's [`History`].
//!
//! The history sits in a `watch` channel. Writers go through the store, each
//! write runs to completion under the channel's lock, and every accepted write
//! publishes the new snapshot to subscribers.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::app::conversation::{History, Message, MessageId};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct MessageStore {
    sender: Arc<watch::Sender<History>>,
}

impl Default for MessageStore {
    fn default() -> Self {
        Self::new(History::new())
    }
}

impl MessageStore {
    pub fn new(history: History) -> Self {
        let (sender, _) = watch::channel(history);
        Self {
            sender: Arc::new(sender),
        }
    }

    pub fn get(&self, id: &MessageId) -> Option<Message> {
        self.sender.borrow().get(id).cloned()
    }

    pub fn current_id(&self) -> Option<MessageId> {
        self.sender.borrow().current_id().cloned()
    }

    /// A copy of the latest published history.
    pub fn snapshot(&self) -> History {
        self.sender.borrow().clone()
    }

    /// Runs `read` against the latest history without copying it.
    pub fn with_history<T>(&self, read: impl FnOnce(&History) -> T) -> T {
        read(&self.sender.borrow())
    }

    pub fn subscribe(&self) -> watch::Receiver<History> {
        self.sender.subscribe()
    }

    /// Moves the cursor; fails with `InvalidPointer` for unknown ids.
    pub fn set_current(&self, id: Option<&MessageId>) -> Result<()> {
        let mut result = Ok(());
        self.sender.send_if_modified(|history| {
            if history.current_id() == id {
                return false;
            }
            match history.set_current(id.cloned()) {
                Ok(()) => true,
                Err(err) => {
                    result = Err(err);
                    false
                }
            }
        });
        result
    }

    /// Swaps in a whole history. Debug builds refuse one that breaks an invariant.
    pub fn replace(&self, history: History) -> Result<()> {
        history.debug_validate()?;
        self.sender.send_replace(history);
        Ok(())
    }

    /// Applies a structural mutation as one transaction.
    ///
    /// `op` works on a copy; the copy is published only if `op` succeeds and
    /// (in debug builds) still satisfies every invariant.
    pub fn commit<T>(&self, op: impl FnOnce(&mut History) -> Result<T>) -> Result<T> {
        let mut outcome = None;
        self.sender.send_if_modified(|current| {
            let mut next = current.clone();
            let result = op(&mut next).and_then(|value| {
                next.debug_validate()?;
                Ok(value)
            });
            let accepted = result.is_ok();
            if accepted {
                *current = next;
            } else if let Err(err) = &result {
                debug!(target: "store::commit", "Mutation rejected: {}", err);
            }
            outcome = Some(result);
            accepted
        });
        outcome.unwrap_or_else(|| {
            Err(Error::InvariantViolation(
                "store mutation did not run".to_string(),
            ))
        })
    }

    /// In-place write used for content streaming; publishes only when `write` reports a change.
    pub(crate) fn update(&self, write: impl FnOnce(&mut History) -> bool) -> bool {
        self.sender.send_if_modified(write)
    }
}
