//! Error types for identity-provider operations

/// Errors from identity-provider flows and the token lifecycle around them.
///
/// Flow functions fail closed: the first error encountered is returned
/// verbatim, with no retry or fallback at this layer.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Transport failure (DNS, connect, TLS). Never retried by this crate.
    #[error("HTTP request failed: {0}")]
    Http(String),

    /// Non-success status from an IdP endpoint, with body and request id.
    #[error("{endpoint} endpoint returned {status} (request id {request_id}): {body}")]
    Status {
        endpoint: &'static str,
        status: u16,
        body: String,
        request_id: String,
    },

    /// The authn endpoint reported a non-SUCCESS status (e.g. `LOCKED_OUT`).
    /// Carries the provider's status string verbatim.
    #[error("authentication failed with status {0}")]
    Authn(String),

    /// The authorize endpoint did not redirect as the flow requires.
    #[error("authorize redirect error: {0}")]
    Redirect(String),

    /// An implicit-flow fragment could not be decoded into a context.
    #[error("invalid token fragment: {0}")]
    Fragment(String),

    /// Requested code-verifier length outside the RFC 7636 43-128 range.
    #[error("code verifier length {0} outside the 43-128 range")]
    VerifierLength(usize),

    /// Device authorization ended without a token (denied, or the device
    /// code expired before the user approved it).
    #[error("device authorization failed: {0}")]
    Device(String),

    /// A well-formed HTTP response whose body could not be decoded.
    #[error("malformed identity provider response: {0}")]
    Decode(String),

    /// A profile that cannot be mapped onto a token retriever.
    #[error("invalid profile: {0}")]
    Profile(String),

    /// A token-cache write that was refused or failed.
    #[error("token cache error: {0}")]
    Cache(String),
}

/// Result alias for identity-provider operations.
pub type Result<T> = std::result::Result<T, Error>;
