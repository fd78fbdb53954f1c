pub mod archive_document_repository;

pub use archive_document_repository::ArchiveDocumentRepository;
