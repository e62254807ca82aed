//! Tapline Common - shared types for the Tapline workspace
//!
//! This crate provides the functionality used across all Tapline components:
//! - Error types and handling
//! - Configuration structures

#![warn(clippy::all)]

pub mod config;
pub mod error;

pub use config::{DecodeConfig, KafkaConfig};
pub use error::{Error, PluginError, Result};
