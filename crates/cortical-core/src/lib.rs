//! Cortical Core Library
//!
//! Shared functionality for Cortical components:
//! - Configuration resolution and validation
//! - Tracing subscriber setup
//! - Common error types

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, FailurePolicy, HubConfig, ServerConfig};
pub use error::{Error, Result};
