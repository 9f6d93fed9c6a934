//! Core relay logic: polling, batching, durable state, the streaming turn
//! pipeline, and chunked sending.
//!
//! This crate is intentionally framework-agnostic. Telegram and the agent
//! CLI live behind ports (traits) implemented in adapter crates.

pub mod agent;
pub mod attachments;
pub mod batch;
pub mod config;
pub mod domain;
pub mod errors;
pub mod event;
pub mod formatting;
pub mod logging;
pub mod ports;
pub mod relay;
pub mod sender;
pub mod state;

pub use errors::{Error, Result};
