//! Command-line client support
//!
//! Human-readable terminal display and the HTTP client behind `watch`.

pub mod client;
pub mod display;

pub use client::StatusClient;
pub use display::{history_line, render_features, render_history, status_line, WatchDisplay};
