pub mod decode;
pub mod error;
pub mod openai;
pub mod provider;

pub use decode::{DeltaStream, text_deltas};
pub use error::{ApiError, StreamError};
pub use openai::OpenAiCompatibleClient;
pub use provider::{ByteStream, ChatMessage, GenerationProvider, GenerationRequest};
