//! formcache core library.
//!
//! This crate keeps a local SQLite cache of form metadata from a remote
//! forms API consistent under partial and transient failures, and builds on
//! it for conflict-aware imports, template cloning and template listing.

pub mod cache;
pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod models;
pub mod remote;
pub mod source;
pub mod template;

// Re-exports for convenience.
pub use cache::{FormCache, SyncOptions};
pub use config::AppConfig;
pub use conflict::ConflictResolver;
pub use db::Store;
pub use remote::{HttpRemote, RemoteCall};
pub use source::FormSource;
pub use template::{TemplateCloner, TemplateLister};
