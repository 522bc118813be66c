// Core modules
pub mod analyzer;
pub mod api;
pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod ledger;
pub mod models;
pub mod plugins;
pub mod recovery;
pub mod scheduler;
pub mod strategy;

// Re-export commonly used types
pub use error::{Error, Result};
pub use models::*;
