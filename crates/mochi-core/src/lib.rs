//! mochi-core — Pure types, chat history, reveal tracking, and mouth geometry.
//!
//! No async runtime, no I/O, no platform dependencies.

pub mod history;
pub mod mouth;
pub mod reveal;
pub mod speech;
pub mod types;
