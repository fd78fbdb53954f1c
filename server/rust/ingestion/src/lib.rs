pub mod adapter;
pub mod domain;
pub mod infrastructure;
pub mod usecase;
