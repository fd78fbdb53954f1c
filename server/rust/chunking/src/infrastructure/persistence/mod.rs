pub mod chunk_document_repository;
pub mod message_document_repository;

pub use chunk_document_repository::ChunkDocumentRepository;
pub use message_document_repository::MessageDocumentRepository;

pub const MESSAGES_COLLECTION: &str = "messages";
pub const CHUNKS_COLLECTION: &str = "chunks";
