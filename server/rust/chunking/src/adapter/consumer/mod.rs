pub mod json_parsed_handler;

pub use json_parsed_handler::JsonParsedHandler;
