//! Shared error type for the configuration boundary
//!
//! Profile and client configuration come from durable files owned by the
//! embedding application; this error type covers the validation Nimbus does
//! at that boundary.

use thiserror::Error;

/// Error for configuration-boundary failures
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result alias using the shared Error
pub type Result<T> = std::result::Result<T, Error>;
