//! Identity-provider client
//!
//! Stateless implementations of the OAuth2 grant flows against an IdP's
//! `/authn`, `/authorize` and `/token` endpoints. Each flow is a straight
//! line: every step either succeeds and proceeds or returns the first
//! error encountered, so there is no partial state to unwind.
//!
//! Redirects are never followed automatically. The authorization-code,
//! PKCE and implicit flows read the `Location` header of the IdP's
//! redirect response themselves.

use std::collections::HashMap;
use std::time::Duration;

use reqwest::redirect::Policy;
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;
use tokio::time::Instant;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::pkce::{create_code_challenge, generate_state};

/// Length of the PKCE code verifier generated by [`IdpClient::pkce_flow`].
const PKCE_VERIFIER_LEN: usize = 50;

/// Header the IdP uses to correlate requests; echoed in error messages.
const REQUEST_ID_HEADER: &str = "x-request-id";
const NIL_REQUEST_ID: &str = "00000000-0000-0000-0000-000000000000";

/// Configuration for an [`IdpClient`].
///
/// The timeout is required at construction rather than defaulted; an
/// unbounded token request can hang a service startup indefinitely.
#[derive(Debug, Clone)]
pub struct IdpConfig {
    /// Base URL of the identity provider, e.g. `https://idp.example.com`
    pub host: String,
    /// Timeout applied to every request this client sends
    pub timeout: Duration,
    pub authn_path: String,
    pub authorize_path: String,
    pub token_path: String,
    pub device_path: String,
}

impl IdpConfig {
    pub fn new(host: impl Into<String>, timeout: Duration) -> Self {
        let mut host = host.into();
        if !host.ends_with('/') {
            host.push('/');
        }
        Self {
            host,
            timeout,
            authn_path: "authn".into(),
            authorize_path: "authorize".into(),
            token_path: "token".into(),
            device_path: "device".into(),
        }
    }
}

/// Codes and polling parameters for the device-authorization grant.
///
/// The caller surfaces `user_code` and `verification_uri` to the user
/// (browser on another machine), then polls with
/// [`IdpClient::device_flow`] until the user approves or the code expires.
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceCodeInfo {
    pub device_code: String,
    pub user_code: String,
    /// Seconds until the device code expires
    pub expires_in: u64,
    /// Seconds to wait between token-endpoint polls
    pub interval: u64,
    pub verification_uri: String,
}

/// HTTP client for one identity provider.
pub struct IdpClient {
    config: IdpConfig,
    http: reqwest::Client,
}

impl IdpClient {
    pub fn new(config: IdpConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .redirect(Policy::none())
            .build()
            .map_err(|e| Error::Http(format!("failed to build HTTP client: {e}")))?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.host, path)
    }

    /// Authenticate with the client-credentials grant.
    ///
    /// Form POST to the token endpoint with HTTP Basic auth of
    /// `client_id:client_secret`. This grant never issues refresh or id
    /// tokens.
    pub async fn client_flow(
        &self,
        client_id: &str,
        client_secret: &str,
        scope: &str,
    ) -> Result<Context> {
        let token_url = self.url(&self.config.token_path);
        debug!(endpoint = %token_url, client_id, "requesting client credentials grant");
        let response = self
            .http
            .post(&token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[("grant_type", "client_credentials"), ("scope", scope)])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response, "token").await);
        }
        decode_context(response).await
    }

    /// Obtain a one-time session token from the primary `/authn` endpoint.
    ///
    /// The IdP reports non-success outcomes (for example `LOCKED_OUT`) in
    /// the `status` field of a 200 response; that status string is surfaced
    /// verbatim in the returned error.
    pub async fn get_session_token(&self, username: &str, password: &str) -> Result<String> {
        let authn_url = self.url(&self.config.authn_path);
        debug!(endpoint = %authn_url, username, "requesting session token");
        let mut body = HashMap::new();
        body.insert("username", username);
        body.insert("password", password);

        let response = self
            .http
            .post(&authn_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Http(format!("authn request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response, "authn").await);
        }

        let request_id = request_id(&response);
        let data: serde_json::Value = response
            .json()
            .await
            .map_err(|e| Error::Decode(format!("invalid authn response: {e}")))?;

        let status = data
            .get("status")
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Decode(format!("authn response missing status (request id {request_id})")))?;
        if status != "SUCCESS" {
            return Err(Error::Authn(status.to_owned()));
        }

        data.get("sessionToken")
            .and_then(|v| v.as_str())
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::Decode(format!(
                    "authn response missing sessionToken (request id {request_id})"
                ))
            })
    }

    /// Authenticate with the authorization-code grant.
    ///
    /// Authenticates the user for a session token, requests an
    /// authorization code from the authorize endpoint, then exchanges the
    /// code at the token endpoint with HTTP Basic auth.
    pub async fn code_flow(
        &self,
        client_id: &str,
        client_secret: &str,
        redirect_uri: &str,
        scope: &str,
        username: &str,
        password: &str,
    ) -> Result<Context> {
        let session_token = self.get_session_token(username, password).await?;

        let code = self
            .request_authorization_code(&[
                ("client_id", client_id),
                ("nonce", "none"),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope),
                ("session_token", &session_token),
                ("state", &generate_state()),
            ])
            .await?;

        let token_url = self.url(&self.config.token_path);
        let response = self
            .http
            .post(&token_url)
            .basic_auth(client_id, Some(client_secret))
            .form(&[
                ("grant_type", "authorization_code"),
                ("code", &code),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response, "token").await);
        }
        decode_context(response).await
    }

    /// Authenticate with the proof-key-for-code-exchange grant.
    ///
    /// Like [`code_flow`](Self::code_flow) but the client proves possession
    /// of the flow with a code verifier instead of a client secret.
    pub async fn pkce_flow(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        username: &str,
        password: &str,
    ) -> Result<Context> {
        let session_token = self.get_session_token(username, password).await?;
        let (challenge, verifier) = create_code_challenge(PKCE_VERIFIER_LEN)?;

        let code = self
            .request_authorization_code(&[
                ("client_id", client_id),
                ("code_challenge", &challenge),
                ("code_challenge_method", "S256"),
                ("nonce", "none"),
                ("redirect_uri", redirect_uri),
                ("response_type", "code"),
                ("scope", scope),
                ("session_token", &session_token),
                ("state", &generate_state()),
            ])
            .await?;

        let token_url = self.url(&self.config.token_path);
        let response = self
            .http
            .post(&token_url)
            .form(&[
                ("client_id", client_id),
                ("code", &code),
                ("code_verifier", &verifier),
                ("grant_type", "authorization_code"),
                ("redirect_uri", redirect_uri),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response, "token").await);
        }
        decode_context(response).await
    }

    /// Authenticate with the implicit grant.
    ///
    /// The token fields arrive in the URL fragment of the authorize
    /// redirect; there is no token-endpoint exchange. Any redirection
    /// status is accepted here, unlike the code-bearing flows which
    /// require 302.
    pub async fn implicit_flow(
        &self,
        client_id: &str,
        redirect_uri: &str,
        scope: &str,
        username: &str,
        password: &str,
    ) -> Result<Context> {
        let session_token = self.get_session_token(username, password).await?;

        let authorize_url = self.url(&self.config.authorize_path);
        let response = self
            .http
            .get(&authorize_url)
            .query(&[
                ("client_id", client_id),
                ("nonce", "none"),
                ("redirect_uri", redirect_uri),
                ("response_type", "token"),
                ("scope", scope),
                ("session_token", &session_token),
                ("state", &generate_state()),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("authorize request failed: {e}")))?;

        if !response.status().is_redirection() {
            return Err(status_error(response, "authorize").await);
        }

        let location = location_header(&response)?;
        let fragment = location
            .split_once('#')
            .map(|(_, f)| f)
            .ok_or_else(|| {
                Error::Redirect(format!("redirect location has no fragment: {location}"))
            })?;
        Context::from_fragment(fragment)
    }

    /// Authenticate with a refresh token.
    pub async fn refresh(
        &self,
        client_id: &str,
        scope: &str,
        refresh_token: &str,
    ) -> Result<Context> {
        let token_url = self.url(&self.config.token_path);
        debug!(endpoint = %token_url, client_id, "refreshing access token");
        let response = self
            .http
            .post(&token_url)
            .form(&[
                ("client_id", client_id),
                ("grant_type", "refresh_token"),
                ("refresh_token", refresh_token),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response, "token").await);
        }
        decode_context(response).await
    }

    /// Authenticate with the resource-owner-password grant.
    pub async fn ropw_flow(
        &self,
        client_id: &str,
        scope: &str,
        username: &str,
        password: &str,
    ) -> Result<Context> {
        let token_url = self.url(&self.config.token_path);
        let response = self
            .http
            .post(&token_url)
            .form(&[
                ("client_id", client_id),
                ("grant_type", "password"),
                ("username", username),
                ("password", password),
                ("scope", scope),
            ])
            .send()
            .await
            .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response, "token").await);
        }
        decode_context(response).await
    }

    /// Request device and user codes for the device-authorization grant.
    pub async fn get_device_codes(&self, client_id: &str, scope: &str) -> Result<DeviceCodeInfo> {
        let device_url = self.url(&self.config.device_path);
        debug!(endpoint = %device_url, client_id, "requesting device codes");
        let response = self
            .http
            .post(&device_url)
            .form(&[("client_id", client_id), ("scope", scope)])
            .send()
            .await
            .map_err(|e| Error::Http(format!("device request failed: {e}")))?;

        if response.status() != StatusCode::OK {
            return Err(status_error(response, "device").await);
        }
        response
            .json::<DeviceCodeInfo>()
            .await
            .map_err(|e| Error::Decode(format!("invalid device code response: {e}")))
    }

    /// Poll the token endpoint until the user approves the device code.
    ///
    /// The IdP answers pending polls with 400 and an `error_description`
    /// field: `authorization_pending` keeps polling at the given interval,
    /// `slow_down` adds five seconds to it. The loop ends with a token,
    /// a terminal description (`expired_token`, `access_denied`), or the
    /// local `expires_in` deadline.
    pub async fn device_flow(
        &self,
        client_id: &str,
        device_code: &str,
        expires_in: u64,
        interval: u64,
    ) -> Result<Context> {
        let token_url = self.url(&self.config.token_path);
        let deadline = Instant::now() + Duration::from_secs(expires_in);
        let mut interval = Duration::from_secs(interval);

        while Instant::now() < deadline {
            let response = self
                .http
                .post(&token_url)
                .form(&[
                    ("client_id", client_id),
                    ("grant_type", "urn:ietf:params:oauth:grant-type:device_code"),
                    ("device_code", device_code),
                ])
                .send()
                .await
                .map_err(|e| Error::Http(format!("token request failed: {e}")))?;

            match response.status() {
                StatusCode::OK => return decode_context(response).await,
                StatusCode::BAD_REQUEST => {
                    let data: serde_json::Value = response
                        .json()
                        .await
                        .map_err(|e| Error::Decode(format!("invalid token response: {e}")))?;
                    match data.get("error_description").and_then(|v| v.as_str()) {
                        Some("authorization_pending") => {}
                        Some("slow_down") => interval += Duration::from_secs(5),
                        Some("expired_token") => {
                            return Err(Error::Device("device code expired".into()));
                        }
                        Some("access_denied") => {
                            return Err(Error::Device("access denied".into()));
                        }
                        other => {
                            return Err(Error::Device(format!(
                                "unexpected token response: {other:?}"
                            )));
                        }
                    }
                    tokio::time::sleep(interval).await;
                }
                _ => return Err(status_error(response, "token").await),
            }
        }
        Err(Error::Device("device code expired".into()))
    }

    /// GET the authorize endpoint and pull the authorization `code` out of
    /// the redirect location. Code-bearing flows require exactly 302.
    async fn request_authorization_code(&self, params: &[(&str, &str)]) -> Result<String> {
        let authorize_url = self.url(&self.config.authorize_path);
        let response = self
            .http
            .get(&authorize_url)
            .query(params)
            .send()
            .await
            .map_err(|e| Error::Http(format!("authorize request failed: {e}")))?;

        if response.status() != StatusCode::FOUND {
            return Err(status_error(response, "authorize").await);
        }

        let location = location_header(&response)?;
        let location_url = Url::parse(&location)
            .map_err(|e| Error::Redirect(format!("invalid redirect location {location:?}: {e}")))?;
        location_url
            .query_pairs()
            .find(|(key, _)| key == "code")
            .map(|(_, value)| value.into_owned())
            .filter(|code| !code.is_empty())
            .ok_or_else(|| {
                Error::Redirect(format!("redirect location carries no authorization code: {location}"))
            })
    }
}

fn request_id(response: &Response) -> String {
    response
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(NIL_REQUEST_ID)
        .to_owned()
}

fn location_header(response: &Response) -> Result<String> {
    response
        .headers()
        .get(reqwest::header::LOCATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .ok_or_else(|| Error::Redirect("redirect response has no location header".into()))
}

/// Consume an unexpected response into a status error, keeping the body
/// and request id for diagnosis.
async fn status_error(response: Response, endpoint: &'static str) -> Error {
    let status = response.status().as_u16();
    let request_id = request_id(&response);
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| String::from("<no body>"));
    Error::Status {
        endpoint,
        status,
        body,
        request_id,
    }
}

/// Decode a 200 token-endpoint response into a freshly issued context.
async fn decode_context(response: Response) -> Result<Context> {
    let context = response
        .json::<Context>()
        .await
        .map_err(|e| Error::Decode(format!("invalid token response: {e}")))?;
    Ok(context.mark_issued())
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap as StdHashMap;
    use std::sync::Arc;

    use axum::extract::{Form, Query};
    use axum::http::{HeaderMap, StatusCode};
    use axum::response::{IntoResponse, Json};
    use axum::routing::{get, post};
    use axum::Router;
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use tokio::net::TcpListener;
    use tokio::sync::Mutex;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn token_json() -> serde_json::Value {
        serde_json::json!({
            "token_type": "Bearer",
            "access_token": "at_stub",
            "expires_in": 3600,
            "scope": "openid",
        })
    }

    /// Form fields the stub token endpoint last received, for assertions.
    type SeenForm = Arc<Mutex<Option<StdHashMap<String, String>>>>;

    async fn start_stub(app: Router) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    fn client_for(host: &str) -> IdpClient {
        IdpClient::new(IdpConfig::new(host, TIMEOUT)).unwrap()
    }

    #[test]
    fn host_gets_trailing_slash() {
        let config = IdpConfig::new("https://idp.example.com", TIMEOUT);
        assert_eq!(config.host, "https://idp.example.com/");
        let config = IdpConfig::new("https://idp.example.com/", TIMEOUT);
        assert_eq!(config.host, "https://idp.example.com/");
    }

    #[tokio::test]
    async fn client_flow_sends_basic_auth_and_form() {
        let seen: SeenForm = Arc::new(Mutex::new(None));
        let seen_auth = Arc::new(Mutex::new(None::<String>));

        let app = Router::new().route(
            "/token",
            post({
                let seen = seen.clone();
                let seen_auth = seen_auth.clone();
                move |headers: HeaderMap, Form(form): Form<StdHashMap<String, String>>| async move {
                    *seen.lock().await = Some(form);
                    *seen_auth.lock().await = headers
                        .get("authorization")
                        .map(|v| v.to_str().unwrap().to_owned());
                    Json(token_json())
                }
            }),
        );
        let host = start_stub(app).await;

        let context = client_for(&host)
            .client_flow("cid", "shh", "openid")
            .await
            .unwrap();
        assert_eq!(context.access_token, "at_stub");
        assert!(context.issued_at.is_some());

        let form = seen.lock().await.clone().unwrap();
        assert_eq!(form["grant_type"], "client_credentials");
        assert_eq!(form["scope"], "openid");

        let expected = format!("Basic {}", STANDARD.encode("cid:shh"));
        assert_eq!(seen_auth.lock().await.clone().unwrap(), expected);
    }

    #[tokio::test]
    async fn client_flow_surfaces_status_and_request_id() {
        let app = Router::new().route(
            "/token",
            post(|| async {
                (
                    StatusCode::UNAUTHORIZED,
                    [("x-request-id", "req-123")],
                    "bad credentials",
                )
            }),
        );
        let host = start_stub(app).await;

        let err = client_for(&host)
            .client_flow("cid", "wrong", "openid")
            .await
            .unwrap_err();
        match err {
            Error::Status {
                endpoint,
                status,
                body,
                request_id,
            } => {
                assert_eq!(endpoint, "token");
                assert_eq!(status, 401);
                assert_eq!(body, "bad credentials");
                assert_eq!(request_id, "req-123");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn session_token_requires_success_status() {
        let app = Router::new().route(
            "/authn",
            post(|Json(body): Json<serde_json::Value>| async move {
                if body["password"] == "hunter2" {
                    Json(serde_json::json!({"status": "SUCCESS", "sessionToken": "st_1"}))
                } else {
                    Json(serde_json::json!({"status": "LOCKED_OUT"}))
                }
            }),
        );
        let host = start_stub(app).await;
        let client = client_for(&host);

        let token = client.get_session_token("sam", "hunter2").await.unwrap();
        assert_eq!(token, "st_1");

        let err = client.get_session_token("sam", "nope").await.unwrap_err();
        match err {
            Error::Authn(status) => assert_eq!(status, "LOCKED_OUT"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    fn authn_ok() -> Router {
        Router::new().route(
            "/authn",
            post(|| async { Json(serde_json::json!({"status": "SUCCESS", "sessionToken": "st_1"})) }),
        )
    }

    #[tokio::test]
    async fn code_flow_exchanges_redirect_code() {
        let seen: SeenForm = Arc::new(Mutex::new(None));

        let app = authn_ok()
            .route(
                "/authorize",
                get(|Query(params): Query<StdHashMap<String, String>>| async move {
                    assert_eq!(params["response_type"], "code");
                    assert_eq!(params["session_token"], "st_1");
                    assert!(params.contains_key("state"));
                    (
                        StatusCode::FOUND,
                        [("location", "https://app.example.com/cb?code=C42&state=s")],
                    )
                }),
            )
            .route(
                "/token",
                post({
                    let seen = seen.clone();
                    move |headers: HeaderMap,
                          Form(form): Form<StdHashMap<String, String>>| async move {
                        assert!(headers.contains_key("authorization"));
                        *seen.lock().await = Some(form);
                        Json(token_json())
                    }
                }),
            );
        let host = start_stub(app).await;

        let context = client_for(&host)
            .code_flow("cid", "shh", "https://app.example.com/cb", "openid", "sam", "pw")
            .await
            .unwrap();
        assert_eq!(context.access_token, "at_stub");

        let form = seen.lock().await.clone().unwrap();
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "C42");
        assert_eq!(form["redirect_uri"], "https://app.example.com/cb");
    }

    #[tokio::test]
    async fn code_flow_rejects_non_found_authorize() {
        let app = authn_ok().route("/authorize", get(|| async { StatusCode::OK }));
        let host = start_stub(app).await;

        let err = client_for(&host)
            .code_flow("cid", "shh", "https://app.example.com/cb", "openid", "sam", "pw")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Status { endpoint: "authorize", status: 200, .. }));
    }

    #[tokio::test]
    async fn pkce_flow_sends_challenge_then_verifier() {
        let seen: SeenForm = Arc::new(Mutex::new(None));
        let seen_challenge = Arc::new(Mutex::new(None::<String>));

        let app = authn_ok()
            .route(
                "/authorize",
                get({
                    let seen_challenge = seen_challenge.clone();
                    move |Query(params): Query<StdHashMap<String, String>>| async move {
                        assert_eq!(params["code_challenge_method"], "S256");
                        *seen_challenge.lock().await = Some(params["code_challenge"].clone());
                        (
                            StatusCode::FOUND,
                            [("location", "https://app.example.com/cb?code=C7")],
                        )
                    }
                }),
            )
            .route(
                "/token",
                post({
                    let seen = seen.clone();
                    move |headers: HeaderMap,
                          Form(form): Form<StdHashMap<String, String>>| async move {
                        // public client, no basic auth
                        assert!(!headers.contains_key("authorization"));
                        *seen.lock().await = Some(form);
                        Json(token_json())
                    }
                }),
            );
        let host = start_stub(app).await;

        let context = client_for(&host)
            .pkce_flow("cid", "https://app.example.com/cb", "openid", "sam", "pw")
            .await
            .unwrap();
        assert_eq!(context.access_token, "at_stub");

        let form = seen.lock().await.clone().unwrap();
        assert_eq!(form["grant_type"], "authorization_code");
        assert_eq!(form["code"], "C7");
        assert_eq!(form["code_verifier"].len(), PKCE_VERIFIER_LEN);

        // the challenge the IdP saw matches the verifier that was exchanged
        use sha2::{Digest, Sha256};
        let expected = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .encode(Sha256::digest(form["code_verifier"].as_bytes()));
        assert_eq!(seen_challenge.lock().await.clone().unwrap(), expected);
    }

    #[tokio::test]
    async fn implicit_flow_decodes_location_fragment() {
        let app = authn_ok().route(
            "/authorize",
            get(|Query(params): Query<StdHashMap<String, String>>| async move {
                assert_eq!(params["response_type"], "token");
                (
                    StatusCode::SEE_OTHER,
                    [(
                        "location",
                        "https://app.example.com/cb#access_token=AT&token_type=Bearer&expires_in=3600&scope=openid&state=s",
                    )],
                )
                    .into_response()
            }),
        );
        let host = start_stub(app).await;

        let context = client_for(&host)
            .implicit_flow("cid", "https://app.example.com/cb", "openid", "sam", "pw")
            .await
            .unwrap();
        assert_eq!(context.access_token, "AT");
        assert_eq!(context.expires_in, 3600);
        assert!(context.issued_at.is_some());
    }

    #[tokio::test]
    async fn device_flow_polls_until_approved() {
        let polls = Arc::new(std::sync::atomic::AtomicU32::new(0));

        let app = Router::new()
            .route(
                "/device",
                post(|Form(form): Form<StdHashMap<String, String>>| async move {
                    assert_eq!(form["client_id"], "cid");
                    assert_eq!(form["scope"], "openid");
                    Json(serde_json::json!({
                        "device_code": "dc_1",
                        "user_code": "WXYZ-1234",
                        "expires_in": 600,
                        "interval": 0,
                        "verification_uri": "https://idp.example.com/activate",
                    }))
                }),
            )
            .route(
                "/token",
                post({
                    let polls = polls.clone();
                    move |Form(form): Form<StdHashMap<String, String>>| async move {
                        assert_eq!(
                            form["grant_type"],
                            "urn:ietf:params:oauth:grant-type:device_code"
                        );
                        assert_eq!(form["device_code"], "dc_1");
                        if polls.fetch_add(1, std::sync::atomic::Ordering::SeqCst) == 0 {
                            (
                                StatusCode::BAD_REQUEST,
                                Json(serde_json::json!({"error_description": "authorization_pending"})),
                            )
                                .into_response()
                        } else {
                            Json(token_json()).into_response()
                        }
                    }
                }),
            );
        let host = start_stub(app).await;
        let client = client_for(&host);

        let info = client.get_device_codes("cid", "openid").await.unwrap();
        assert_eq!(info.user_code, "WXYZ-1234");
        assert_eq!(info.verification_uri, "https://idp.example.com/activate");

        let context = client
            .device_flow("cid", &info.device_code, info.expires_in, info.interval)
            .await
            .unwrap();
        assert_eq!(context.access_token, "at_stub");
        assert_eq!(polls.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn device_flow_surfaces_denial() {
        let app = Router::new().route(
            "/token",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(serde_json::json!({"error_description": "access_denied"})),
                )
            }),
        );
        let host = start_stub(app).await;

        let err = client_for(&host)
            .device_flow("cid", "dc_1", 600, 0)
            .await
            .unwrap_err();
        match err {
            Error::Device(msg) => assert_eq!(msg, "access denied"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn device_flow_stops_at_local_deadline() {
        // expires_in of zero: the poll loop never starts
        let app = Router::new();
        let host = start_stub(app).await;

        let err = client_for(&host)
            .device_flow("cid", "dc_1", 0, 0)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Device(_)));
    }

    #[tokio::test]
    async fn refresh_sends_refresh_grant() {
        let seen: SeenForm = Arc::new(Mutex::new(None));
        let app = Router::new().route(
            "/token",
            post({
                let seen = seen.clone();
                move |Form(form): Form<StdHashMap<String, String>>| async move {
                    *seen.lock().await = Some(form);
                    Json(token_json())
                }
            }),
        );
        let host = start_stub(app).await;

        client_for(&host)
            .refresh("cid", "openid", "rt_old")
            .await
            .unwrap();

        let form = seen.lock().await.clone().unwrap();
        assert_eq!(form["grant_type"], "refresh_token");
        assert_eq!(form["refresh_token"], "rt_old");
        assert_eq!(form["client_id"], "cid");
        assert_eq!(form["scope"], "openid");
    }

    #[tokio::test]
    async fn ropw_flow_sends_password_grant() {
        let seen: SeenForm = Arc::new(Mutex::new(None));
        let app = Router::new().route(
            "/token",
            post({
                let seen = seen.clone();
                move |Form(form): Form<StdHashMap<String, String>>| async move {
                    *seen.lock().await = Some(form);
                    Json(token_json())
                }
            }),
        );
        let host = start_stub(app).await;

        client_for(&host)
            .ropw_flow("cid", "openid", "sam", "pw")
            .await
            .unwrap();

        let form = seen.lock().await.clone().unwrap();
        assert_eq!(form["grant_type"], "password");
        assert_eq!(form["username"], "sam");
        assert_eq!(form["password"], "pw");
    }
}
