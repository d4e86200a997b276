pub mod conversation;
pub mod session;
pub mod store;
pub mod streaming;

pub use conversation::{History, Message, MessageData, MessageId};
pub use session::{ChatSession, ConversationId, EditResult, Generation, SessionDeps};
pub use store::MessageStore;
pub use streaming::{StreamOutcome, StreamState, StreamingAssembler};
