use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use tokio_util::bytes::Bytes;
use tokio_util::sync::CancellationToken;

use crate::api::error::ApiError;
use crate::app::conversation::{Message, Role};

/// Raw response body of a streamed generation.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, ApiError>> + Send>>;

/// One prior turn sent as context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self {
            role: message.role(),
            content: message.content.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub stream: bool,
}

impl GenerationRequest {
    /// Streaming request for `model` with the given lineage as context.
    pub fn streaming<'a>(model: impl Into<String>, path: impl IntoIterator<Item = &'a Message>) -> Self {
        Self {
            model: model.into(),
            messages: path.into_iter().map(ChatMessage::from).collect(),
            stream: true,
        }
    }
}

/// Backend that turns a request into a streamed, line-framed response body.
#[async_trait]
pub trait GenerationProvider: Send + Sync + 'static {
    /// Get the name of the provider
    fn name(&self) -> &'static str;

    /// Open a streaming generation. The token cancels the request while it is
    /// being opened; once the body is returned the caller owns cancellation.
    async fn stream_chat(
        &self,
        request: GenerationRequest,
        token: CancellationToken,
    ) -> Result<ByteStream, ApiError>;
}
