pub mod chunk;
pub mod message;

pub use chunk::Chunk;
pub use message::Message;
