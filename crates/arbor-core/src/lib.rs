// Branching conversation history engine for chat clients

pub mod api;
pub mod app;
pub mod config;
pub mod error;
pub mod models;
pub mod persistence;
pub mod test_utils;
pub mod utils;

pub use error::{Error, Result};
