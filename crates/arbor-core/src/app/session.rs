//! A single open conversation and the user actions on it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::api::{GenerationProvider, GenerationRequest, StreamError, text_deltas};
use crate::app::conversation::linearize::path_to;
use crate::app::conversation::mutator::{
    self, EditInput, EditOutcome, add_placeholder, append_turn,
};
use crate::app::conversation::navigator::{goto_sibling, show_next, show_previous};
use crate::app::conversation::{
    FileAttachment, History, Message, MessageId, Pager, Rating, RemoteChat, RemoteConversation, Role,
    Thread, linearize,
};
use crate::app::store::MessageStore;
use crate::app::streaming::{
    self, GenerationTicket, StreamOutcome, StreamState, StreamingAssembler,
};
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::models::{ModelRegistry, resolve_model};
use crate::persistence::PersistenceSink;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConversationId(String);

impl ConversationId {
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

impl Default for ConversationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConversationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Collaborators a session talks to.
#[derive(Clone)]
pub struct SessionDeps {
    pub provider: Arc<dyn GenerationProvider>,
    pub models: Arc<dyn ModelRegistry>,
    pub sink: Arc<dyn PersistenceSink>,
}

/// Result of [`ChatSession::edit_message`].
#[derive(Debug)]
pub enum EditResult {
    Saved { message_id: MessageId },
    Forked { message_id: MessageId },
    /// A user prompt was forked and its answer is ready to stream.
    Regenerating {
        message_id: MessageId,
        generation: Generation,
    },
}

#[derive(Clone)]
pub struct ChatSession {
    id: ConversationId,
    store: MessageStore,
    assembler: StreamingAssembler,
    deps: SessionDeps,
    temporary: bool,
    pager: Arc<Mutex<Pager>>,
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("id", &self.id)
            .field("provider", &self.deps.provider.name())
            .field("temporary", &self.temporary)
            .field("state", &self.assembler.state())
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// An empty conversation. A configured default model list becomes the
    /// selection.
    pub fn new(id: ConversationId, deps: SessionDeps, config: &EngineConfig) -> Self {
        if !config.models.default.is_empty() {
            deps.models.select_models(config.models.default.clone());
        }
        Self::with_history(id, History::new(), deps, config)
    }

    /// Hydrates a fetched chat and restores the model selection saved with it.
    pub fn open_chat(
        id: ConversationId,
        mut chat: RemoteChat,
        deps: SessionDeps,
        config: &EngineConfig,
    ) -> Result<Self> {
        let models = chat.models.take();
        let session = Self::open(id, chat.conversation(), deps, config)?;
        if let Some(models) = models {
            debug!(target: "session::open", "Restoring model selection {:?}", models);
            session.deps.models.select_models(models);
        }
        Ok(session)
    }

    /// Hydrates a fetched conversation.
    pub fn open(
        id: ConversationId,
        remote: RemoteConversation,
        deps: SessionDeps,
        config: &EngineConfig,
    ) -> Result<Self> {
        let history = remote.into_history()?;
        info!(
            target: "session::open",
            "Opened conversation {} with {} messages", id, history.len()
        );
        Ok(Self::with_history(id, history, deps, config))
    }

    fn with_history(
        id: ConversationId,
        history: History,
        deps: SessionDeps,
        config: &EngineConfig,
    ) -> Self {
        Self {
            id,
            store: MessageStore::new(history),
            assembler: StreamingAssembler::new(),
            deps,
            temporary: config.temporary,
            pager: Arc::new(Mutex::new(Pager::new(config.history.page_size))),
        }
    }

    pub fn id(&self) -> &ConversationId {
        &self.id
    }

    pub fn is_temporary(&self) -> bool {
        self.temporary
    }

    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    pub fn history(&self) -> History {
        self.store.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<History> {
        self.store.subscribe()
    }

    pub fn stream_state(&self) -> StreamState {
        self.assembler.state()
    }

    /// Appends a prompt and an empty answer, and reserves the generation slot.
    /// Nothing is requested until [`Generation::run`] is awaited.
    pub fn submit_prompt(&self, prompt: &str, files: Vec<FileAttachment>) -> Result<Generation> {
        let model = resolve_model(self.deps.models.as_ref())?;
        let reservation = self.assembler.reserve()?;
        let ids = self.store.commit(|history| {
            append_turn(history, prompt, files, &model, Message::current_timestamp())
        })?;
        info!(
            target: "session::submit",
            "Submitted prompt {} to {} in {}", ids.user_id, model, self.id
        );

        self.generation(reservation.attach(ids.assistant_id), &ids.user_id, model)
    }

    /// Saves an edit in place or forks a sibling, depending on `submit` and role.
    pub async fn edit_message(
        &self,
        message_id: &MessageId,
        input: EditInput,
        submit: bool,
    ) -> Result<EditResult> {
        let role = self
            .store
            .get(message_id)
            .map(|message| message.role())
            .ok_or_else(|| Error::MessageNotFound(message_id.clone()))?;

        if role == Role::User && submit {
            return self.fork_and_regenerate(message_id, input);
        }

        let outcome = self.store.commit(|history| {
            mutator::edit_message(
                history,
                message_id,
                input,
                submit,
                &[],
                Message::current_timestamp(),
            )
        })?;
        self.persist().await;

        match outcome {
            EditOutcome::Saved { message_id } => Ok(EditResult::Saved { message_id }),
            EditOutcome::ForkedAssistant { message_id } => Ok(EditResult::Forked { message_id }),
            EditOutcome::ForkedUser { message_id } => Err(Error::InvariantViolation(format!(
                "user fork {message_id} created without a generation"
            ))),
        }
    }

    fn fork_and_regenerate(&self, message_id: &MessageId, input: EditInput) -> Result<EditResult> {
        let model = resolve_model(self.deps.models.as_ref())?;
        let reservation = self.assembler.reserve()?;
        let selected = [model.clone()];

        let (fork_id, assistant_id) = self.store.commit(|history| {
            let outcome = mutator::edit_message(
                history,
                message_id,
                input,
                true,
                &selected,
                Message::current_timestamp(),
            )?;
            let EditOutcome::ForkedUser { message_id: fork_id } = outcome else {
                return Err(Error::InvariantViolation(
                    "user edit did not fork".to_string(),
                ));
            };
            let assistant_id = add_placeholder(history, &fork_id, &model)?;
            Ok((fork_id, assistant_id))
        })?;

        let generation = self.generation(reservation.attach(assistant_id), &fork_id, model)?;
        Ok(EditResult::Regenerating {
            message_id: fork_id,
            generation,
        })
    }

    /// Removes a message and its direct children. Returns the new cursor.
    pub async fn delete_message(&self, message_id: &MessageId) -> Result<Option<MessageId>> {
        let cursor = self
            .store
            .commit(|history| mutator::delete_message(history, message_id))?;
        self.persist().await;
        Ok(cursor)
    }

    pub async fn rate_message(&self, message_id: &MessageId, rating: Rating) -> Result<()> {
        self.store
            .commit(|history| mutator::rate_message(history, message_id, rating))?;
        self.persist().await;
        Ok(())
    }

    pub fn show_previous(&self, message_id: &MessageId) -> Option<MessageId> {
        self.navigate(|history| show_previous(history, message_id))
    }

    pub fn show_next(&self, message_id: &MessageId) -> Option<MessageId> {
        self.navigate(|history| show_next(history, message_id))
    }

    pub fn goto_sibling(&self, message_id: &MessageId, index: usize) -> Option<MessageId> {
        self.navigate(|history| goto_sibling(history, message_id, index))
    }

    /// Points the cursor at any message.
    pub fn select(&self, message_id: &MessageId) -> Result<()> {
        self.store.set_current(Some(message_id))
    }

    fn navigate(
        &self,
        step: impl FnOnce(&mut History) -> Option<MessageId>,
    ) -> Option<MessageId> {
        let mut landed = None;
        self.store.update(|history| {
            landed = step(history);
            landed.is_some()
        });
        landed
    }

    /// Cancels the running generation, if any.
    pub fn stop(&self) -> bool {
        self.assembler.cancel()
    }

    pub fn thread(&self, limit: usize) -> Thread {
        self.store.with_history(|history| linearize(history, limit))
    }

    /// The thread as currently paginated.
    pub fn visible_thread(&self) -> Thread {
        let pager = *self.pager.lock().unwrap_or_else(PoisonError::into_inner);
        self.store.with_history(|history| pager.view(history))
    }

    /// Reveals one more page of older messages.
    pub fn load_more(&self) -> Thread {
        self.pager
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .load_more();
        self.visible_thread()
    }

    fn generation(
        &self,
        ticket: GenerationTicket,
        context_end: &MessageId,
        model: String,
    ) -> Result<Generation> {
        let request = self.store.with_history(|history| {
            GenerationRequest::streaming(model, path_to(history, context_end))
        });
        if request.messages.is_empty() {
            return Err(Error::MessageNotFound(context_end.clone()));
        }

        Ok(Generation {
            session: self.clone(),
            ticket,
            request,
        })
    }

    /// Hands the current tree to the sink. Failures are logged, not returned.
    async fn persist(&self) {
        if self.temporary {
            debug!(target: "session::persist", "Skipping persistence for temporary {}", self.id);
            return;
        }

        let snapshot = self.store.snapshot();
        if let Err(e) = self.deps.sink.persist(&self.id, &snapshot).await {
            warn!(
                target: "session::persist",
                "Failed to persist conversation {}: {}", self.id, e
            );
        }
    }
}

/// A reserved answer waiting to be streamed.
pub struct Generation {
    session: ChatSession,
    ticket: GenerationTicket,
    request: GenerationRequest,
}

impl fmt::Debug for Generation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Generation")
            .field("message_id", self.ticket.target())
            .field("model", &self.request.model)
            .field("context", &self.request.messages.len())
            .finish()
    }
}

impl Generation {
    /// The assistant message being filled.
    pub fn message_id(&self) -> &MessageId {
        self.ticket.target()
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// Issues the request and streams the answer into the tree.
    pub async fn run(self) -> StreamOutcome {
        let Generation {
            session,
            ticket,
            request,
        } = self;
        let token = ticket.token();

        let outcome = match session.deps.provider.stream_chat(request, token.clone()).await {
            Ok(body) => streaming::run(&session.store, ticket, text_deltas(body, token)).await,
            Err(err) => {
                debug!(target: "session::generate", "Request failed before streaming: {}", err);
                streaming::abort(&session.store, ticket, StreamError::from(err))
            }
        };

        if outcome.settled_target() {
            session.persist().await;
        }
        outcome
    }
}
