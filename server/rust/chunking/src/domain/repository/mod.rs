pub mod chunk_repository;
pub mod message_repository;

pub use chunk_repository::ChunkRepository;
pub use message_repository::MessageRepository;
