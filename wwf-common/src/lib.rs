//! # WWF Common Library
//!
//! Shared code for the where-was-filmed services including:
//! - Error types
//! - Bootstrap configuration (TOML + environment + compiled defaults)
//! - Event types (WwfEvent enum) and the EventBus
//! - Server-Sent Events helpers

pub mod config;
pub mod error;
pub mod events;
pub mod sse;

pub use error::{Error, Result};
