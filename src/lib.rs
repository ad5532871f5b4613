//! kbchat - a terminal client for a document knowledge-base chat service
//!
//! This crate provides:
//! - Streaming answers over server-sent events, saved exactly once per message
//! - `@` document mentions with debounced suggestions and tag parsing
//! - Citation badges and per-document reference lists
//! - A local SQLite cache with per-entry expiry and size limits

pub mod api;
pub mod autocomplete;
pub mod cache;
pub mod citations;
pub mod commands;
pub mod config;
pub mod error;
pub mod models;
pub mod progress;
pub mod stream;
pub mod tags;
pub mod upload;

pub use config::Config;
pub use error::{Error, Result};
