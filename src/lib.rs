//! Watchroom - real-time watch-together room service
//!
//! Shared rooms where users synchronize video playback, chat, and exchange
//! virtual gifts, kept consistent across many concurrent connections.

pub mod core;
