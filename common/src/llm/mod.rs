pub mod embedder;
pub mod gateway;
pub mod model;

pub use embedder::{Embedder, Embedding, HashingEmbedder, OpenAiEmbedder};
pub use gateway::{Completion, LlmGateway, TokenUsage};
pub use model::{Message, MessageRole, OpenAiGateway};
