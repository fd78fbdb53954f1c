pub mod chunk_messages;

pub use chunk_messages::{ChunkError, ChunkMessagesUseCase, ChunkSummary};
