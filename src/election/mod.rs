//! Election Module
//!
//! The election watcher and the hooks it fires on role transitions.

pub mod hooks;
mod watcher;

pub use hooks::{CommandHooks, ElectionCallbacks};
pub use watcher::{ElectionWatcher, Observation, Step, WatcherSettings};
