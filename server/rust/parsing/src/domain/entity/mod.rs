pub mod message;

pub use message::{MessageDocument, Sender};
