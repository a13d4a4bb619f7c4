#![deny(missing_docs)]
//! Library Genesis relay bot
//!
//! A Telegram bot that searches Library Genesis by title, offers the
//! results as inline buttons and relays the chosen file into the chat
//! with live progress, an audit copy and optional auto-deletion.

/// Telegram bot implementation
pub mod bot;
/// Catalog search and caching
pub mod catalog;
/// Configuration management
pub mod config;
/// Post-delivery housekeeping
pub mod lifecycle;
/// Download interaction state machine
pub mod pipeline;
/// Per-user locks and progress stamps
pub mod session;
/// Download and upload with progress
pub mod transfer;
pub mod utils;
