//! worksheet-server library
//!
//! Core of the interactive worksheet execution server:
//! - Length-prefixed JSON message codec with per-request correlation ids
//! - Lint pass for smart quotes and implicit multiplication
//! - Per-connection execution sessions with persistent bindings
//! - A single text/bytes boundary for program output
//! - A protocol client used as the test driver

pub mod client;
pub mod config;
pub mod encoding;
pub mod error;
pub mod kernel;
pub mod lint;
pub mod server;
pub mod session;
pub mod transport;
