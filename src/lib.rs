//! Background recorder for application/task activity.
//!
//! The daemon samples the foreground window, folds the samples into [daemon::storage::Session]
//! records, persists them crash-safely into a single JSON file and exposes start/stop, queries
//! and change notifications to viewers over a local connection.

pub mod cli;
pub mod daemon;
pub mod fs;
pub mod utils;
pub mod window_api;
