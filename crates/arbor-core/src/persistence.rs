use async_trait::async_trait;

use crate::app::conversation::History;
use crate::app::session::ConversationId;
use crate::error::Result;

/// Receives the whole tree whenever a conversation's history changes.
#[async_trait]
pub trait PersistenceSink: Send + Sync + 'static {
    async fn persist(&self, conversation_id: &ConversationId, history: &History) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSink;

#[async_trait]
impl PersistenceSink for NoopSink {
    async fn persist(&self, _conversation_id: &ConversationId, _history: &History) -> Result<()> {
        Ok(())
    }
}
