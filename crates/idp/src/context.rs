//! Authentication context
//!
//! A [`Context`] is the result of one successful grant flow: the access
//! token plus the metadata needed to sign requests and decide when the
//! token is worth renewing. Contexts are immutable; a refresh produces a
//! new context that replaces the old one wholesale.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Result of a successful OAuth authentication flow.
///
/// The serialized form (wire JSON and the cache TOML document) carries only
/// the token fields; `issued_at` is set when the context is decoded from a
/// live IdP response and is `None` for cache-restored contexts, whose age
/// is unknown and which are trusted until a request fails with 401.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Context {
    pub token_type: String,
    pub access_token: String,
    /// Access-token lifetime in seconds, relative to issuance
    pub expires_in: u64,
    #[serde(default)]
    pub scope: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Unix seconds at which the token was issued, if known
    #[serde(skip)]
    pub issued_at: Option<i64>,
}

impl Context {
    /// Wrap a caller-supplied static access token.
    ///
    /// Used when the application already holds a token and wants no
    /// lifecycle management. `expires_in` is zero and `issued_at` unknown,
    /// so the token is never proactively renewed.
    pub fn from_static_token(access_token: impl Into<String>) -> Self {
        Self {
            token_type: "Bearer".into(),
            access_token: access_token.into(),
            expires_in: 0,
            scope: String::new(),
            id_token: None,
            refresh_token: None,
            issued_at: None,
        }
    }

    /// Mark this context as issued now. Called after decoding a live IdP
    /// response.
    pub(crate) fn mark_issued(mut self) -> Self {
        self.issued_at = Some(now_unix());
        self
    }

    /// The value for the `Authorization` header: `<token_type> <access_token>`.
    pub fn authorization_header(&self) -> String {
        format!("{} {}", self.token_type, self.access_token)
    }

    /// Whether the token expires within the given window.
    ///
    /// Contexts of unknown age (`issued_at` is `None`) report `false`:
    /// staleness for those is discovered lazily through a 401 rather than
    /// guessed here.
    pub fn expires_within(&self, window: Duration) -> bool {
        match self.issued_at {
            Some(issued_at) => {
                let deadline = issued_at + self.expires_in as i64;
                now_unix() + window.as_secs() as i64 >= deadline
            }
            None => false,
        }
    }

    /// Decode a context from an implicit-flow redirect fragment.
    ///
    /// The fragment is a sequence of `&`-joined `key=value` pairs. The
    /// `state` key is ignored; any key outside the known token fields is a
    /// hard error, so unexpected IdP behavior is surfaced instead of
    /// silently dropped.
    pub fn from_fragment(fragment: &str) -> Result<Self> {
        let mut token_type = None;
        let mut access_token = None;
        let mut expires_in = None;
        let mut scope = String::new();
        let mut id_token = None;
        let mut refresh_token = None;

        for pair in fragment.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| Error::Fragment(format!("malformed pair {pair:?}")))?;
            match key {
                "token_type" => token_type = Some(value.to_owned()),
                "access_token" => access_token = Some(value.to_owned()),
                "expires_in" => {
                    let seconds = value.parse::<u64>().map_err(|_| {
                        Error::Fragment(format!("expires_in is not a number: {value:?}"))
                    })?;
                    expires_in = Some(seconds);
                }
                "scope" => scope = value.to_owned(),
                "id_token" => id_token = Some(value.to_owned()),
                "refresh_token" => refresh_token = Some(value.to_owned()),
                "state" => {} // echoed back by the IdP, not part of the context
                other => {
                    return Err(Error::Fragment(format!("unrecognized key {other:?}")));
                }
            }
        }

        let context = Self {
            token_type: token_type
                .ok_or_else(|| Error::Fragment("missing token_type".into()))?,
            access_token: access_token
                .ok_or_else(|| Error::Fragment("missing access_token".into()))?,
            expires_in: expires_in
                .ok_or_else(|| Error::Fragment("missing expires_in".into()))?,
            scope,
            id_token,
            refresh_token,
            issued_at: None,
        };
        Ok(context.mark_issued())
    }
}

/// Current time as unix seconds.
pub(crate) fn now_unix() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs() as i64
}
