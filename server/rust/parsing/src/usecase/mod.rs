pub mod parse_archive;

pub use parse_archive::{ParseArchiveUseCase, ParseError, ParseOutcome};
