pub mod ingest_archive;

pub use ingest_archive::{IngestArchiveUseCase, IngestOutcome};
