pub mod archive_ingested_handler;

pub use archive_ingested_handler::ArchiveIngestedHandler;
