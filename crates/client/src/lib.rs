//! Cloud API client
//!
//! Wraps a tenant-scoped HTTP API with transparent token lifecycle
//! management. A [`CloudClient`] signs every request with the current
//! access token, re-authenticates once when the service answers 401, and
//! backs off and retries on throttling responses, all through a chain of
//! response handlers consulted after each attempt.
//!
//! Typical construction:
//!
//! ```ignore
//! let retriever = ClientCredentialsRetriever::new(idp_config, "cid", secret, "openid")?;
//! let config = ClientConfig::new("https://api.example.com", "acme", Duration::from_secs(10))
//!     .with_retriever(Arc::new(retriever));
//! let client = CloudClient::new(config).await?;
//! let response = client.get("search/jobs").await?;
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod handler;
pub mod request;
pub mod retry;

pub use client::CloudClient;
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use handler::{AuthnResponseHandler, HandlerAction, ResponseHandler, RetryResponseHandler};
pub use request::Request;
pub use retry::RetryConfig;
