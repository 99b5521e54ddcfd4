//! Claude Code usage engine - log ingestion, windowing and statistics

pub mod background;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod error;
pub mod models;
pub mod pricing;
pub mod reader;
pub mod service;
pub mod session;
pub mod stats;
pub mod watcher;

pub use background::*;
pub use cache::*;
pub use catalog::*;
pub use config::*;
pub use error::*;
pub use models::*;
pub use pricing::*;
pub use reader::*;
pub use service::*;
pub use session::*;
pub use stats::*;
pub use watcher::*;
