//! Request bookkeeping
//!
//! A [`Request`] is the unit the executor and the response handlers share:
//! the logical operation plus its attempt history. Bodies are held as
//! [`Bytes`] so a resubmitted attempt re-materializes them instead of
//! sending an already-consumed stream, and every attempt builds a fresh
//! wire request from this structure.

use std::collections::HashMap;

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;

use crate::error::{Error, Result};

/// A logical HTTP request with its attempt history.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    /// Replayable body; cloned into every wire attempt
    pub body: Option<Bytes>,
    /// Number of send attempts, counting the first
    pub num_attempts: u32,
    /// Error responses seen so far, keyed by stringified status code
    pub num_errors_by_type: HashMap<String, u32>,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
            num_attempts: 0,
            num_errors_by_type: HashMap::new(),
        }
    }

    pub fn with_body(mut self, body: Bytes) -> Self {
        self.body = Some(body);
        self
    }

    pub fn with_header(mut self, name: reqwest::header::HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// How many times this request has failed with the given status code.
    pub fn num_errors_by_response_code(&self, code: u16) -> u32 {
        self.num_errors_by_type
            .get(&code.to_string())
            .copied()
            .unwrap_or(0)
    }

    /// Record an error response. Statuses below 400 are not errors and are
    /// not counted.
    pub fn record_response_code(&mut self, code: u16) {
        if code >= 400 {
            *self.num_errors_by_type.entry(code.to_string()).or_insert(0) += 1;
        }
    }

    /// Replace the `Authorization` header with a new token.
    pub fn update_token(&mut self, token_type: &str, access_token: &str) -> Result<()> {
        let value = HeaderValue::from_str(&format!("{token_type} {access_token}"))
            .map_err(|e| Error::InvalidRequest(format!("invalid authorization header: {e}")))?;
        self.headers.insert(AUTHORIZATION, value);
        Ok(())
    }

    /// Build a fresh wire request for one attempt.
    pub fn build(&self, http: &reqwest::Client) -> Result<reqwest::Request> {
        let mut builder = http
            .request(self.method.clone(), &self.url)
            .headers(self.headers.clone());
        if let Some(body) = &self.body {
            builder = builder.body(body.clone());
        }
        builder
            .build()
            .map_err(|e| Error::InvalidRequest(format!("building request: {e}")))
    }
}
