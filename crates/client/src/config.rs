//! Client configuration

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nimbus_idp::TokenRetriever;

use crate::error::{Error, Result};
use crate::retry::RetryConfig;

/// Configuration for a [`CloudClient`](crate::CloudClient).
///
/// The timeout is required at construction; every request this client
/// sends is bounded by it. Exactly one token source must be supplied:
/// either a retriever that manages the token lifecycle, or a static
/// token the caller owns.
#[derive(Clone)]
pub struct ClientConfig {
    /// Base URL of the wrapped cloud API, e.g. `https://api.example.com`
    pub base_url: String,
    /// Tenant every request path is scoped under
    pub tenant: String,
    pub timeout: Duration,
    pub retriever: Option<Arc<dyn TokenRetriever>>,
    pub token: Option<String>,
    /// Token cache file and the client id to key entries by
    pub token_cache: Option<(PathBuf, String)>,
    pub retry: RetryConfig,
    /// A token expiring within this window is renewed before use
    pub token_expiry_window: Duration,
}

impl ClientConfig {
    pub fn new(base_url: impl Into<String>, tenant: impl Into<String>, timeout: Duration) -> Self {
        Self {
            base_url: base_url.into(),
            tenant: tenant.into(),
            timeout,
            retriever: None,
            token: None,
            token_cache: None,
            retry: RetryConfig::default(),
            token_expiry_window: Duration::from_secs(60),
        }
    }

    pub fn with_retriever(mut self, retriever: Arc<dyn TokenRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Use a static token with no lifecycle management.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Persist tokens to the given cache file, keyed by `client_id`.
    pub fn with_token_cache(mut self, path: PathBuf, client_id: impl Into<String>) -> Self {
        self.token_cache = Some((path, client_id.into()));
        self
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_token_expiry_window(mut self, window: Duration) -> Self {
        self.token_expiry_window = window;
        self
    }

    pub(crate) fn validate(&self) -> Result<()> {
        if !self.base_url.starts_with("http://") && !self.base_url.starts_with("https://") {
            return Err(Error::Config(format!(
                "base_url must be an http(s) URL, got {:?}",
                self.base_url
            )));
        }
        if self.timeout.is_zero() {
            return Err(Error::Config("timeout must be non-zero".into()));
        }
        if self.retriever.is_none() && self.token.is_none() {
            return Err(Error::Config(
                "either a token retriever or a static token is required".into(),
            ));
        }
        Ok(())
    }
}
