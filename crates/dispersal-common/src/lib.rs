//! Dispersal Common - Shared types and utilities
//!
//! This crate provides the fragment identifier, level specifications,
//! error definitions and configuration used across all Dispersal
//! components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, LoggingConfig};
pub use error::{Error, ErrorKind, Result};
pub use types::*;
