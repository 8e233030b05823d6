//! Request executor
//!
//! [`CloudClient`] owns the current token context, the token cache and
//! the response-handler chain. Every send runs as a loop: attempt the
//! request, record the outcome, let the handlers decide whether to
//! resubmit. The handlers bound themselves (re-auth by 401 count, retry
//! by attempt count), so the loop always terminates.
//!
//! The current token lives behind a mutex: two concurrent requests that
//! both hit 401 would otherwise race to refresh and overwrite each
//! other's token.

use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use metrics::counter;
use nimbus_idp::{Context, TokenCache, TokenRetriever};
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Method;
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::ClientConfig;
use crate::error::{Error, Result};
use crate::handler::{AuthnResponseHandler, HandlerAction, ResponseHandler, RetryResponseHandler};
use crate::request::Request;

/// A token cache plus the client id its entries are keyed by.
struct CacheHandle {
    cache: TokenCache,
    client_id: String,
}

/// Client for a tenant-scoped cloud API with managed token lifecycle.
pub struct CloudClient {
    base_url: String,
    tenant: String,
    http: reqwest::Client,
    retriever: Option<Arc<dyn TokenRetriever>>,
    token: Mutex<Option<Context>>,
    handlers: Vec<Box<dyn ResponseHandler>>,
    cache: Option<CacheHandle>,
    expiry_window: std::time::Duration,
}

impl CloudClient {
    pub async fn new(config: ClientConfig) -> Result<Self> {
        config.validate()?;

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| Error::Config(format!("failed to build HTTP client: {e}")))?;

        let cache = match config.token_cache {
            Some((path, client_id)) => Some(open_cache(path, client_id).await),
            None => None,
        };

        // Prefer a caller-supplied static token; otherwise reuse a cached
        // context from a previous process, falling back to the retriever
        // on first use.
        let token = match &config.token {
            Some(token) => Some(Context::from_static_token(token.clone())),
            None => match &cache {
                Some(handle) => handle.cache.get(&handle.client_id).await,
                None => None,
            },
        };

        let mut handlers: Vec<Box<dyn ResponseHandler>> = Vec::new();
        if let Some(retriever) = &config.retriever {
            handlers.push(Box::new(AuthnResponseHandler::new(retriever.clone())));
        }
        handlers.push(Box::new(RetryResponseHandler::new(config.retry)));

        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_owned(),
            tenant: config.tenant,
            http,
            retriever: config.retriever,
            token: Mutex::new(token),
            handlers,
            cache,
            expiry_window: config.token_expiry_window,
        })
    }

    /// The current token context, retrieving a fresh one if none is held
    /// or the held one expires within the configured window.
    pub async fn authorization_context(&self) -> Result<Context> {
        let mut token = self.token.lock().await;

        if let Some(context) = token.as_ref() {
            if !context.expires_within(self.expiry_window) {
                return Ok(context.clone());
            }
        }

        let retriever = self.retriever.as_ref().ok_or_else(|| {
            Error::Config("token expired and no retriever is configured".into())
        })?;
        debug!("retrieving fresh token context");
        let context = retriever.get_token_context().await?;
        self.persist_context(&context).await;
        *token = Some(context.clone());
        Ok(context)
    }

    /// Replace the current token context. Called by the re-authentication
    /// handler so later requests reuse the new token.
    pub async fn update_token_context(&self, context: Context) {
        self.persist_context(&context).await;
        *self.token.lock().await = Some(context);
    }

    /// Best-effort cache write; a cache failure never fails the request.
    async fn persist_context(&self, context: &Context) {
        if let Some(handle) = &self.cache {
            if let Err(e) = handle.cache.set(&handle.client_id, context).await {
                warn!(client_id = %handle.client_id, error = %e, "failed to persist token context");
            }
        }
    }

    fn build_url(&self, path: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url,
            self.tenant,
            path.trim_start_matches('/')
        )
    }

    /// Send a request, driving the response-handler chain until a handler
    /// chain pass-through or an error.
    ///
    /// Transport errors (connect failure, timeout) are returned
    /// immediately; only classified HTTP responses go through the
    /// handlers.
    pub async fn send(&self, request: &mut Request) -> Result<reqwest::Response> {
        loop {
            // counts every send, including the first
            request.num_attempts += 1;
            let wire = request.build(&self.http)?;
            let response = self
                .http
                .execute(wire)
                .await
                .map_err(|e| Error::Transport(format!("{} {}: {e}", request.method, request.url)))?;

            let code = response.status().as_u16();
            request.record_response_code(code);
            counter!("client_requests_total", "code" => code.to_string()).increment(1);

            let mut action = HandlerAction::Pass;
            for handler in &self.handlers {
                if handler.handle_response(self, request, &response).await?
                    == HandlerAction::Resubmit
                {
                    action = HandlerAction::Resubmit;
                    break;
                }
            }
            if action == HandlerAction::Pass {
                return Ok(response);
            }
        }
    }

    /// Build a signed request for a tenant-scoped path.
    pub async fn new_request(
        &self,
        method: Method,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<Request> {
        let context = self.authorization_context().await?;
        let mut request = Request::new(method, self.build_url(path));
        request.update_token(&context.token_type, &context.access_token)?;
        if let Some(body) = body {
            request = request
                .with_header(CONTENT_TYPE, HeaderValue::from_static("application/json"))
                .with_body(body);
        }
        Ok(request)
    }

    pub async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let mut request = self.new_request(Method::GET, path, None).await?;
        self.send(&mut request).await
    }

    pub async fn delete(&self, path: &str) -> Result<reqwest::Response> {
        let mut request = self.new_request(Method::DELETE, path, None).await?;
        self.send(&mut request).await
    }

    pub async fn post<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let mut request = self
            .new_request(Method::POST, path, Some(encode_json(body)?))
            .await?;
        self.send(&mut request).await
    }

    pub async fn put<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let mut request = self
            .new_request(Method::PUT, path, Some(encode_json(body)?))
            .await?;
        self.send(&mut request).await
    }

    pub async fn patch<B: Serialize>(&self, path: &str, body: &B) -> Result<reqwest::Response> {
        let mut request = self
            .new_request(Method::PATCH, path, Some(encode_json(body)?))
            .await?;
        self.send(&mut request).await
    }
}

async fn open_cache(path: PathBuf, client_id: String) -> CacheHandle {
    CacheHandle {
        cache: TokenCache::open(path).await,
        client_id,
    }
}

fn encode_json<B: Serialize>(body: &B) -> Result<Bytes> {
    let encoded = serde_json::to_vec(body)
        .map_err(|e| Error::InvalidRequest(format!("encoding request body: {e}")))?;
    Ok(Bytes::from(encoded))
}
