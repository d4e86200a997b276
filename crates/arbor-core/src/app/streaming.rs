//! Folds a delta stream into a live assistant message.
//!
//! One generation at a time per conversation. The assembler only ever
//! appends to `content` and sets the terminal fields of its target; the
//! tree around it may change freely while the stream runs.

use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use strum::Display;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::{DeltaStream, StreamError};
use crate::app::conversation::{Message, MessageData, MessageError, MessageId};
use crate::app::store::MessageStore;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StreamState {
    Idle,
    Streaming,
    Cancelling,
}

/// How a generation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed,
    /// Stopped by the user; the partial answer is kept.
    Cancelled,
    /// The error is also recorded on the message.
    Failed(StreamError),
    /// The target message was deleted mid-stream.
    Detached,
}

impl StreamOutcome {
    /// Whether the target still exists and the tree should be persisted.
    pub fn settled_target(&self) -> bool {
        !matches!(self, StreamOutcome::Detached)
    }
}

#[derive(Debug)]
struct Slot {
    state: StreamState,
    target: Option<MessageId>,
    token: Option<CancellationToken>,
    epoch: u64,
}

impl Default for Slot {
    fn default() -> Self {
        Self {
            state: StreamState::Idle,
            target: None,
            token: None,
            epoch: 0,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct StreamingAssembler {
    slot: Arc<Mutex<Slot>>,
}

impl StreamingAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claims the conversation's single generation slot before the target exists.
    pub fn reserve(&self) -> Result<Reservation> {
        let mut slot = self.lock();
        if slot.state != StreamState::Idle {
            return Err(Error::GenerationInProgress);
        }
        let token = CancellationToken::new();
        slot.state = StreamState::Streaming;
        slot.target = None;
        slot.token = Some(token.clone());
        slot.epoch = slot.epoch.wrapping_add(1);

        Ok(Reservation {
            guard: SlotGuard {
                slot: Arc::clone(&self.slot),
                epoch: slot.epoch,
                token,
            },
        })
    }

    /// Starts a generation into `message_id`.
    pub fn begin(&self, message_id: MessageId) -> Result<GenerationTicket> {
        Ok(self.reserve()?.attach(message_id))
    }

    /// Requests cancellation of the running generation.
    ///
    /// Returns `false` when nothing is streaming. Repeated calls are no-ops.
    pub fn cancel(&self) -> bool {
        let mut slot = self.lock();
        if slot.state != StreamState::Streaming {
            return false;
        }
        slot.state = StreamState::Cancelling;
        if let Some(token) = &slot.token {
            token.cancel();
        }
        debug!(target: "streaming::cancel", "Cancellation requested for {:?}", slot.target);
        true
    }

    pub fn state(&self) -> StreamState {
        self.lock().state
    }

    pub fn active_message_id(&self) -> Option<MessageId> {
        self.lock().target.clone()
    }
}

/// Releases the slot when the generation that claimed it goes away.
#[derive(Debug)]
struct SlotGuard {
    slot: Arc<Mutex<Slot>>,
    epoch: u64,
    token: CancellationToken,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.epoch == self.epoch {
            slot.state = StreamState::Idle;
            slot.target = None;
            slot.token = None;
        }
    }
}

/// A claimed slot with no target yet. Dropping it frees the slot.
#[derive(Debug)]
pub struct Reservation {
    guard: SlotGuard,
}

impl Reservation {
    pub fn attach(self, message_id: MessageId) -> GenerationTicket {
        {
            let mut slot = self.guard.slot.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.epoch == self.guard.epoch {
                slot.target = Some(message_id.clone());
            }
        }
        GenerationTicket {
            guard: self.guard,
            target: message_id,
        }
    }
}

/// Permission to write into one assistant message.
#[derive(Debug)]
pub struct GenerationTicket {
    guard: SlotGuard,
    target: MessageId,
}

impl GenerationTicket {
    pub fn target(&self) -> &MessageId {
        &self.target
    }

    pub fn token(&self) -> CancellationToken {
        self.guard.token.clone()
    }
}

/// Streams `deltas` into the ticket's target until the stream ends, fails,
/// is cancelled, or the target disappears.
pub async fn run(
    store: &MessageStore,
    ticket: GenerationTicket,
    mut deltas: DeltaStream,
) -> StreamOutcome {
    let token = ticket.token();
    let target = ticket.target.clone();
    debug!(target: "streaming::run", "Streaming into {}", target);

    let outcome = loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => break Terminal::Cancelled,
            next = deltas.next() => next
        };

        match next {
            Some(Ok(delta)) => {
                let appended = store.update(|history| match history.get_mut(&target) {
                    Some(message) => {
                        message.content.push_str(&delta);
                        true
                    }
                    None => false,
                });
                if !appended {
                    break Terminal::Detached;
                }
            }
            Some(Err(StreamError::Cancelled)) => break Terminal::Cancelled,
            Some(Err(err)) => break Terminal::Failed(err),
            None => break Terminal::Completed,
        }
    };

    settle(store, &ticket, outcome)
}

/// Ends a generation that failed before any body arrived.
pub fn abort(store: &MessageStore, ticket: GenerationTicket, err: StreamError) -> StreamOutcome {
    let terminal = match err {
        StreamError::Cancelled => Terminal::Cancelled,
        other => Terminal::Failed(other),
    };
    settle(store, &ticket, terminal)
}

enum Terminal {
    Completed,
    Cancelled,
    Failed(StreamError),
    Detached,
}

fn settle(store: &MessageStore, ticket: &GenerationTicket, terminal: Terminal) -> StreamOutcome {
    let target = &ticket.target;

    let outcome = match terminal {
        Terminal::Detached => StreamOutcome::Detached,
        Terminal::Completed => {
            let now = Message::current_timestamp();
            if finish(store, target, |done, _, timestamp| {
                *done = true;
                *timestamp = Some(now);
            }) {
                StreamOutcome::Completed
            } else {
                StreamOutcome::Detached
            }
        }
        Terminal::Cancelled => {
            if store.with_history(|history| history.contains(target)) {
                StreamOutcome::Cancelled
            } else {
                StreamOutcome::Detached
            }
        }
        Terminal::Failed(err) => {
            let details = err.to_string();
            if finish(store, target, |_, error, _| {
                *error = Some(MessageError::details(details));
            }) {
                StreamOutcome::Failed(err)
            } else {
                StreamOutcome::Detached
            }
        }
    };

    match &outcome {
        StreamOutcome::Completed => {
            info!(target: "streaming::run", "Generation into {} completed", target);
        }
        StreamOutcome::Cancelled => {
            info!(target: "streaming::run", "Generation into {} cancelled", target);
        }
        StreamOutcome::Failed(err) => {
            warn!(target: "streaming::run", "Generation into {} failed: {}", target, err);
        }
        StreamOutcome::Detached => {
            // Release the transport; nothing is left to write into.
            ticket.guard.token.cancel();
            debug!(target: "streaming::run", "Target {} was removed; dropping remaining deltas", target);
        }
    }

    outcome
}

/// Applies `write` to the target's terminal fields. `false` if the target is gone.
fn finish(
    store: &MessageStore,
    target: &MessageId,
    write: impl FnOnce(&mut bool, &mut Option<MessageError>, &mut Option<u64>),
) -> bool {
    let mut found = false;
    store.update(|history| {
        let Some(message) = history.get_mut(target) else {
            return false;
        };
        found = true;
        if let MessageData::Assistant { done, error, .. } = &mut message.data {
            write(done, error, &mut message.timestamp);
        }
        true
    });
    found
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::conversation::mutator::{append_turn, delete_message};
    use crate::app::conversation::{History, TurnIds};
    use tokio::sync::mpsc;

    fn channel_deltas() -> (mpsc::UnboundedSender<std::result::Result<String, StreamError>>, DeltaStream) {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let stream = async_stream::stream! {
            while let Some(item) = rx.recv().await {
                yield item;
            }
        };
        (tx, Box::pin(stream))
    }

    fn fixed_deltas(items: Vec<std::result::Result<&'static str, StreamError>>) -> DeltaStream {
        Box::pin(futures::stream::iter(
            items.into_iter().map(|item| item.map(str::to_string)),
        ))
    }

    fn store_with_turn() -> (MessageStore, TurnIds) {
        let store = MessageStore::default();
        let ids = store
            .commit(|history| append_turn(history, "Hi", Vec::new(), "m", 1))
            .unwrap();
        (store, ids)
    }

    async fn wait_for_content(store: &MessageStore, id: &MessageId, content: &str) {
        let mut rx = store.subscribe();
        rx.wait_for(|history: &History| {
            history.get(id).is_some_and(|m| m.content == content)
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn deltas_accumulate_and_complete() {
        let (store, ids) = store_with_turn();
        let assembler = StreamingAssembler::new();
        let ticket = assembler.begin(ids.assistant_id.clone()).unwrap();
        assert_eq!(assembler.state(), StreamState::Streaming);
        assert_eq!(assembler.active_message_id(), Some(ids.assistant_id.clone()));

        let outcome = run(&store, ticket, fixed_deltas(vec![Ok("He"), Ok("llo")])).await;

        assert_eq!(outcome, StreamOutcome::Completed);
        let message = store.get(&ids.assistant_id).unwrap();
        assert_eq!(message.content, "Hello");
        assert!(!message.is_streaming());
        assert!(message.timestamp.is_some());
        assert!(message.error().is_none());
        assert_eq!(assembler.state(), StreamState::Idle);
        assert_eq!(assembler.active_message_id(), None);
    }

    #[tokio::test]
    async fn cancel_keeps_partial_content() {
        let (store, ids) = store_with_turn();
        let assembler = StreamingAssembler::new();
        let ticket = assembler.begin(ids.assistant_id.clone()).unwrap();
        let (tx, deltas) = channel_deltas();

        let task = tokio::spawn({
            let store = store.clone();
            async move { run(&store, ticket, deltas).await }
        });

        tx.send(Ok("He".to_string())).unwrap();
        wait_for_content(&store, &ids.assistant_id, "He").await;
        assert!(assembler.cancel());
        assert!(!assembler.cancel());
        assert_eq!(assembler.state(), StreamState::Cancelling);
        tx.send(Ok("llo".to_string())).ok();

        let outcome = task.await.unwrap();
        assert_eq!(outcome, StreamOutcome::Cancelled);
        let message = store.get(&ids.assistant_id).unwrap();
        assert_eq!(message.content, "He");
        assert!(message.is_streaming());
        assert!(message.error().is_none());
        assert_eq!(assembler.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_on_the_message() {
        let (store, ids) = store_with_turn();
        let assembler = StreamingAssembler::new();
        let ticket = assembler.begin(ids.assistant_id.clone()).unwrap();

        let outcome = run(
            &store,
            ticket,
            fixed_deltas(vec![
                Ok("par"),
                Err(StreamError::Transport("connection reset".to_string())),
                Ok("ignored"),
            ]),
        )
        .await;

        assert!(matches!(outcome, StreamOutcome::Failed(StreamError::Transport(_))));
        let message = store.get(&ids.assistant_id).unwrap();
        assert_eq!(message.content, "par");
        assert!(message.is_streaming());
        let error = message.error().unwrap();
        assert!(error.is_set());
        assert!(format!("{error:?}").contains("connection reset"));
    }

    #[tokio::test]
    async fn cancellation_class_errors_cancel_instead_of_failing() {
        let (store, ids) = store_with_turn();
        let assembler = StreamingAssembler::new();
        let ticket = assembler.begin(ids.assistant_id.clone()).unwrap();

        let outcome = run(
            &store,
            ticket,
            fixed_deltas(vec![Ok("a"), Err(StreamError::Cancelled)]),
        )
        .await;

        assert_eq!(outcome, StreamOutcome::Cancelled);
        assert!(store.get(&ids.assistant_id).unwrap().error().is_none());
    }

    #[tokio::test]
    async fn second_generation_is_rejected_while_streaming() {
        let (_store, ids) = store_with_turn();
        let assembler = StreamingAssembler::new();
        let ticket = assembler.begin(ids.assistant_id.clone()).unwrap();

        assert!(matches!(
            assembler.begin(ids.assistant_id.clone()),
            Err(Error::GenerationInProgress)
        ));
        assert!(matches!(assembler.reserve(), Err(Error::GenerationInProgress)));

        drop(ticket);
        assert_eq!(assembler.state(), StreamState::Idle);
        assert!(assembler.reserve().is_ok());
    }

    #[tokio::test]
    async fn dropped_reservation_frees_the_slot() {
        let assembler = StreamingAssembler::new();
        let reservation = assembler.reserve().unwrap();
        assert_eq!(assembler.active_message_id(), None);
        drop(reservation);
        assert_eq!(assembler.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn deleting_the_target_detaches_the_stream() {
        let (store, ids) = store_with_turn();
        let assembler = StreamingAssembler::new();
        let ticket = assembler.begin(ids.assistant_id.clone()).unwrap();
        let token = ticket.token();
        let (tx, deltas) = channel_deltas();

        let task = tokio::spawn({
            let store = store.clone();
            async move { run(&store, ticket, deltas).await }
        });

        tx.send(Ok("He".to_string())).unwrap();
        wait_for_content(&store, &ids.assistant_id, "He").await;

        let cursor = store
            .commit(|history| delete_message(history, &ids.assistant_id))
            .unwrap();
        assert_eq!(cursor, Some(ids.user_id.clone()));
        tx.send(Ok("llo".to_string())).unwrap();
        drop(tx);

        let outcome = task.await.unwrap();
        assert_eq!(outcome, StreamOutcome::Detached);
        assert!(token.is_cancelled());
        let history = store.snapshot();
        assert!(!history.contains(&ids.assistant_id));
        assert!(history.validate().is_ok());
        assert_eq!(history.current_id(), Some(&ids.user_id));
        assert_eq!(assembler.state(), StreamState::Idle);
    }

    #[tokio::test]
    async fn abort_before_body_records_failure() {
        let (store, ids) = store_with_turn();
        let assembler = StreamingAssembler::new();
        let ticket = assembler.begin(ids.assistant_id.clone()).unwrap();

        let outcome = abort(&store, ticket, StreamError::Transport("refused".to_string()));

        assert!(matches!(outcome, StreamOutcome::Failed(_)));
        assert!(store.get(&ids.assistant_id).unwrap().error().is_some());
        assert_eq!(assembler.state(), StreamState::Idle);
    }
}
