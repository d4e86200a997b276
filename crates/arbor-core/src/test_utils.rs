//! Test utilities for arbor-core
//!
//! In-memory fakes for the engine's collaborators, usable from integration
//! tests and from downstream crates.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::mpsc;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::api::{ApiError, ByteStream, GenerationProvider, GenerationRequest};
use crate::app::conversation::History;
use crate::app::session::{ConversationId, SessionDeps};
use crate::error::{Error, Result};
use crate::models::StaticModelRegistry;
use crate::persistence::PersistenceSink;

/// One `data:` line carrying a text delta.
pub fn sse_line(text: &str) -> String {
    let payload = serde_json::json!({ "choices": [{ "delta": { "content": text } }] });
    format!("data: {payload}\n\n")
}

pub fn done_line() -> String {
    "data: [DONE]\n\n".to_string()
}

enum Script {
    Body(Vec<String>),
    Live(mpsc::UnboundedReceiver<std::result::Result<Bytes, ApiError>>),
    Fail(ApiError),
}

/// Pushes body chunks into a live scripted response.
#[derive(Clone)]
pub struct ChunkSender {
    tx: mpsc::UnboundedSender<std::result::Result<Bytes, ApiError>>,
}

impl ChunkSender {
    /// Sends one delta line. Returns `false` once the body is no longer read.
    pub fn delta(&self, text: &str) -> bool {
        self.raw(&sse_line(text))
    }

    pub fn raw(&self, chunk: &str) -> bool {
        self.tx.send(Ok(Bytes::from(chunk.to_string()))).is_ok()
    }

    pub fn fail(&self, details: &str) -> bool {
        self.tx
            .send(Err(ApiError::StreamError {
                provider: ScriptedProvider::NAME.to_string(),
                details: details.to_string(),
            }))
            .is_ok()
    }

    /// Ends the body.
    pub fn finish(self) {
        self.raw(&done_line());
    }
}

/// Provider that replays queued responses in order and records every request.
#[derive(Default)]
pub struct ScriptedProvider {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<GenerationRequest>>,
}

impl ScriptedProvider {
    pub const NAME: &'static str = "scripted";

    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a response whose body is the given deltas followed by `[DONE]`.
    pub fn push_deltas(&self, deltas: &[&str]) {
        let mut body: Vec<String> = deltas.iter().map(|d| sse_line(d)).collect();
        body.push(done_line());
        self.push_script(Script::Body(body));
    }

    /// Queues a response with raw body chunks.
    pub fn push_body(&self, chunks: Vec<String>) {
        self.push_script(Script::Body(chunks));
    }

    /// Queues a response whose body is fed by the returned sender.
    pub fn push_live(&self) -> ChunkSender {
        let (tx, rx) = mpsc::unbounded_channel();
        self.push_script(Script::Live(rx));
        ChunkSender { tx }
    }

    /// Queues a request that fails before any body arrives.
    pub fn push_error(&self, error: ApiError) {
        self.push_script(Script::Fail(error));
    }

    pub fn requests(&self) -> Vec<GenerationRequest> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn push_script(&self, script: Script) {
        self.scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(script);
    }
}

#[async_trait]
impl GenerationProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    async fn stream_chat(
        &self,
        request: GenerationRequest,
        token: CancellationToken,
    ) -> std::result::Result<ByteStream, ApiError> {
        self.requests
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(request);

        if token.is_cancelled() {
            return Err(ApiError::Cancelled {
                provider: Self::NAME.to_string(),
            });
        }

        let script = self
            .scripts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        match script {
            Some(Script::Body(chunks)) => Ok(Box::pin(futures::stream::iter(
                chunks.into_iter().map(|chunk| Ok(Bytes::from(chunk))),
            ))),
            Some(Script::Live(mut rx)) => Ok(Box::pin(async_stream::stream! {
                while let Some(item) = rx.recv().await {
                    yield item;
                }
            })),
            Some(Script::Fail(error)) => Err(error),
            None => Err(ApiError::Configuration(
                "no scripted response left".to_string(),
            )),
        }
    }
}

/// Sink that keeps every persisted snapshot.
#[derive(Default)]
pub struct MemorySink {
    saved: Mutex<Vec<(ConversationId, History)>>,
    fail: bool,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink whose every write fails.
    pub fn failing() -> Self {
        Self {
            saved: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn saved(&self) -> Vec<(ConversationId, History)> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn save_count(&self) -> usize {
        self.saved.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn last(&self) -> Option<History> {
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .map(|(_, history)| history.clone())
    }
}

#[async_trait]
impl PersistenceSink for MemorySink {
    async fn persist(&self, conversation_id: &ConversationId, history: &History) -> Result<()> {
        if self.fail {
            return Err(Error::Io(std::io::Error::other("sink unavailable")));
        }
        self.saved
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((conversation_id.clone(), history.clone()));
        Ok(())
    }
}

/// Session collaborators backed by the fakes in this module.
pub struct TestDeps {
    pub provider: Arc<ScriptedProvider>,
    pub models: Arc<StaticModelRegistry>,
    pub sink: Arc<MemorySink>,
}

impl TestDeps {
    /// One available model, already selected.
    pub fn new(model: &str) -> Self {
        Self::with_sink(model, MemorySink::new())
    }

    pub fn with_sink(model: &str, sink: MemorySink) -> Self {
        Self {
            provider: Arc::new(ScriptedProvider::new()),
            models: Arc::new(
                StaticModelRegistry::new(vec![model.to_string()])
                    .with_selection(vec![model.to_string()]),
            ),
            sink: Arc::new(sink),
        }
    }

    pub fn deps(&self) -> SessionDeps {
        SessionDeps {
            provider: self.provider.clone(),
            models: self.models.clone(),
            sink: self.sink.clone(),
        }
    }
}
