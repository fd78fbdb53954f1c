pub mod consumer;
pub mod handler;
