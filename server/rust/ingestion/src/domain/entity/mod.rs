pub mod archive;

pub use archive::{Archive, ArchiveStatus};
