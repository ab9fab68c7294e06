//! Scenestream - on-demand HLS transcoding sessions
//!
//! This library crate exposes the server pieces for integration testing.

pub mod config;
pub mod server;
pub mod source;
pub mod tools;
