pub mod chunker;

pub use chunker::{ChunkerConfig, TextWindow, WordWindowChunker};
