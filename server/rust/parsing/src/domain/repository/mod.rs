pub mod archive_status_repository;
pub mod message_repository;

pub use archive_status_repository::ArchiveStatusRepository;
pub use message_repository::MessageRepository;
