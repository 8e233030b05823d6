//! Response handlers
//!
//! After every attempt the executor walks its handler chain with the
//! response. A handler either passes (next handler, or return the
//! response to the caller) or asks for a resubmit after mutating the
//! request, for example with a fresh `Authorization` header or after a
//! backoff sleep. Resubmits loop through the executor rather than
//! recursing, so the chain is bounded only by the handlers' own counters.

use std::sync::Arc;

use async_trait::async_trait;
use metrics::counter;
use nimbus_idp::TokenRetriever;
use tracing::{debug, warn};

use crate::client::CloudClient;
use crate::error::Result;
use crate::request::Request;
use crate::retry::{backoff, jitter, RetryConfig};

/// Re-authentication attempts allowed per request.
pub const DEFAULT_MAX_AUTHN_ATTEMPTS: u32 = 1;

/// What the executor should do with the current response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerAction {
    /// Hand the response to the next handler, or to the caller
    Pass,
    /// Send the request again through the same execution path
    Resubmit,
}

/// Inspects a response and decides whether the request is resubmitted.
#[async_trait]
pub trait ResponseHandler: Send + Sync {
    async fn handle_response(
        &self,
        client: &CloudClient,
        request: &mut Request,
        response: &reqwest::Response,
    ) -> Result<HandlerAction>;
}

/// Re-authenticates once when the service answers 401.
///
/// The bound is per request: once a request has already failed with 401
/// more times than `max_authn_attempts`, the 401 is returned to the
/// caller instead of looping on a token the service keeps rejecting.
pub struct AuthnResponseHandler {
    retriever: Arc<dyn TokenRetriever>,
    max_authn_attempts: u32,
}

impl AuthnResponseHandler {
    pub fn new(retriever: Arc<dyn TokenRetriever>) -> Self {
        Self {
            retriever,
            max_authn_attempts: DEFAULT_MAX_AUTHN_ATTEMPTS,
        }
    }
}

#[async_trait]
impl ResponseHandler for AuthnResponseHandler {
    async fn handle_response(
        &self,
        client: &CloudClient,
        request: &mut Request,
        response: &reqwest::Response,
    ) -> Result<HandlerAction> {
        if response.status().as_u16() != 401
            || request.num_errors_by_response_code(401) > self.max_authn_attempts
        {
            return Ok(HandlerAction::Pass);
        }

        warn!(url = %request.url, "request unauthorized, re-authenticating");
        // Any retriever failure is propagated immediately, no further retry
        let context = self.retriever.get_token_context().await?;
        request.update_token(&context.token_type, &context.access_token)?;
        // Future requests from this client use the new token too
        client.update_token_context(context).await;

        counter!("client_reauthentications_total").increment(1);
        Ok(HandlerAction::Resubmit)
    }
}

/// Backs off and resends on throttling status codes.
pub struct RetryResponseHandler {
    config: RetryConfig,
}

impl RetryResponseHandler {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl ResponseHandler for RetryResponseHandler {
    async fn handle_response(
        &self,
        _client: &CloudClient,
        request: &mut Request,
        response: &reqwest::Response,
    ) -> Result<HandlerAction> {
        let code = response.status().as_u16();
        if !self.config.is_retryable(code) || request.num_attempts > self.config.max_retries {
            return Ok(HandlerAction::Pass);
        }

        let delay = backoff(request.num_attempts, self.config.interval)
            + jitter(self.config.max_jitter);
        debug!(
            url = %request.url,
            code,
            attempt = request.num_attempts,
            delay_ms = delay.as_millis() as u64,
            "throttled, backing off before resend"
        );
        counter!("client_retries_total", "code" => code.to_string()).increment(1);
        tokio::time::sleep(delay).await;
        Ok(HandlerAction::Resubmit)
    }
}
