//! Client error types

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// Identity-provider interaction failed
    #[error(transparent)]
    Idp(#[from] nimbus_idp::Error),

    /// The request never produced a response (connect failure, timeout)
    #[error("transport error: {0}")]
    Transport(String),

    /// The request could not be constructed
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The client was misconfigured
    #[error("configuration error: {0}")]
    Config(String),
}
