//! telson library
//!
//! Offset-tracking update poller, per-user session registry with a
//! single-active invariant, and a blob-backed session archive, fronted by
//! a Telegram bot command surface.

pub mod channels;
pub mod commands;
pub mod completion;
pub mod config;
pub mod logging;
pub mod poller;
pub mod server;
pub mod sessions;
pub mod storage;
