pub mod cache;
pub mod config;
pub mod core;
pub mod error;
pub mod llm;
pub mod quota;
pub mod store;
