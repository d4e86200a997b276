mod history;
pub mod hydrate;
pub mod linearize;
mod message;
pub mod mutator;
pub mod navigator;


pub use history::{History, HistorySnapshot};
pub use hydrate::{FlatMessage, RemoteChat, RemoteConversation};
pub use linearize::{Pager, Thread, linearize};
pub use message::{
    Annotation, FileAttachment, Message, MessageData, MessageError, MessageId, Rating, Role,
};
pub use mutator::{EditInput, EditOutcome, TurnIds};
