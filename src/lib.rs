pub mod archive;
pub mod config;
pub mod dedupe;
pub mod domain;
pub mod error;
pub mod lock;
pub mod logging;
pub mod notify;
pub mod orchestrator;
pub mod output;
pub mod portal;
pub mod retry;
pub mod schedule;
pub mod segregate;
pub mod validate;
pub mod wait;
pub mod watcher;
