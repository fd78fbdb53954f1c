pub mod archive_status_document_repository;
pub mod message_document_repository;

pub use archive_status_document_repository::ArchiveStatusDocumentRepository;
pub use message_document_repository::MessageDocumentRepository;

pub const ARCHIVES_COLLECTION: &str = "archives";
pub const MESSAGES_COLLECTION: &str = "messages";
