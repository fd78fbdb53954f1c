pub mod mbox_parser;

pub use mbox_parser::MboxParser;
