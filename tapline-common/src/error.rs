//! Error types for Tapline
//!
//! Provides a unified error type hierarchy for the whole pipeline.

use thiserror::Error;

/// Result type alias using Tapline's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Tapline
#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    Config(String),

    // Broker client errors (create, subscribe, pause/resume)
    #[error("Kafka error: {0}")]
    Kafka(#[from] rdkafka::error::KafkaError),

    // Decoder plugin errors
    #[error("Plugin error: {0}")]
    Plugin(#[from] PluginError),

    // Lifecycle misuse
    #[error("Core already started")]
    AlreadyStarted,

    #[error("Core not started")]
    NotStarted,

    // IO Errors (notify descriptor, thread spawn)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Decoder-plugin related errors
#[derive(Error, Debug)]
pub enum PluginError {
    #[error("Failed to load {path}: {source}")]
    LoadFailed {
        path: String,
        #[source]
        source: libloading::Error,
    },

    #[error("Symbol not found: {symbol}")]
    SymbolNotFound {
        symbol: String,
        #[source]
        source: libloading::Error,
    },

    #[error("Decoder ABI version mismatch: plugin reports {found}, expected {expected}")]
    AbiMismatch { found: i32, expected: i32 },

    #[error("Topic already bound: {0}")]
    AlreadyBound(String),

    #[error("Builtin decoder function is null")]
    NullDecoder,
}
