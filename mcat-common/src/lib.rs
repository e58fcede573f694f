//! # mcat common library
//!
//! Shared code for the mcat workspace:
//! - Error type used by configuration loading
//! - TOML configuration schema and resolution
//! - Event types (IngestEvent) and the broadcast EventBus

pub mod config;
pub mod error;
pub mod events;

pub use error::{Error, Result};
