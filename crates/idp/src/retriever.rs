//! Token retrievers
//!
//! A [`TokenRetriever`] closes over one grant flow and the credentials it
//! needs, and produces a fresh [`Context`] on demand. Callers that consume
//! tokens (the request executor, the cache layer) stay agnostic to which
//! flow produced them.

use async_trait::async_trait;
use common::Secret;
use tracing::info;

use crate::client::{IdpClient, IdpConfig};
use crate::context::Context;
use crate::error::Result;

/// Produces an authentication context on demand.
#[async_trait]
pub trait TokenRetriever: Send + Sync {
    async fn get_token_context(&self) -> Result<Context>;
}

/// Wraps a caller-supplied static token; performs no IdP interaction.
pub struct NoOpTokenRetriever {
    context: Context,
}

impl NoOpTokenRetriever {
    pub fn new(context: Context) -> Self {
        Self { context }
    }

    pub fn from_token(access_token: impl Into<String>) -> Self {
        Self {
            context: Context::from_static_token(access_token),
        }
    }
}

#[async_trait]
impl TokenRetriever for NoOpTokenRetriever {
    async fn get_token_context(&self) -> Result<Context> {
        Ok(self.context.clone())
    }
}

/// Exchanges a long-lived refresh token for fresh access tokens.
pub struct RefreshTokenRetriever {
    client: IdpClient,
    client_id: String,
    scope: String,
    refresh_token: Secret<String>,
}

impl RefreshTokenRetriever {
    pub fn new(
        config: IdpConfig,
        client_id: impl Into<String>,
        scope: impl Into<String>,
        refresh_token: Secret<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: IdpClient::new(config)?,
            client_id: client_id.into(),
            scope: scope.into(),
            refresh_token,
        })
    }
}

#[async_trait]
impl TokenRetriever for RefreshTokenRetriever {
    async fn get_token_context(&self) -> Result<Context> {
        self.client
            .refresh(&self.client_id, &self.scope, self.refresh_token.expose())
            .await
    }
}

/// Authenticates a confidential service with its client secret.
pub struct ClientCredentialsRetriever {
    client: IdpClient,
    client_id: String,
    client_secret: Secret<String>,
    scope: String,
}

impl ClientCredentialsRetriever {
    pub fn new(
        config: IdpConfig,
        client_id: impl Into<String>,
        client_secret: Secret<String>,
        scope: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: IdpClient::new(config)?,
            client_id: client_id.into(),
            client_secret,
            scope: scope.into(),
        })
    }
}

#[async_trait]
impl TokenRetriever for ClientCredentialsRetriever {
    async fn get_token_context(&self) -> Result<Context> {
        self.client
            .client_flow(&self.client_id, self.client_secret.expose(), &self.scope)
            .await
    }
}

/// Runs the full PKCE flow with resource-owner credentials.
pub struct PkceRetriever {
    client: IdpClient,
    client_id: String,
    redirect_uri: String,
    scope: String,
    username: String,
    password: Secret<String>,
}

impl PkceRetriever {
    pub fn new(
        config: IdpConfig,
        client_id: impl Into<String>,
        redirect_uri: impl Into<String>,
        scope: impl Into<String>,
        username: impl Into<String>,
        password: Secret<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: IdpClient::new(config)?,
            client_id: client_id.into(),
            redirect_uri: redirect_uri.into(),
            scope: scope.into(),
            username: username.into(),
            password,
        })
    }
}

#[async_trait]
impl TokenRetriever for PkceRetriever {
    async fn get_token_context(&self) -> Result<Context> {
        self.client
            .pkce_flow(
                &self.client_id,
                &self.redirect_uri,
                &self.scope,
                &self.username,
                self.password.expose(),
            )
            .await
    }
}

/// Runs the device-authorization grant.
///
/// The user code and verification URI are surfaced through the log; the
/// embedding application decides how to present them (the poll blocks
/// until the user approves on another device or the code expires).
pub struct DeviceFlowRetriever {
    client: IdpClient,
    client_id: String,
    scope: String,
}

impl DeviceFlowRetriever {
    pub fn new(
        config: IdpConfig,
        client_id: impl Into<String>,
        scope: impl Into<String>,
    ) -> Result<Self> {
        Ok(Self {
            client: IdpClient::new(config)?,
            client_id: client_id.into(),
            scope: scope.into(),
        })
    }
}

#[async_trait]
impl TokenRetriever for DeviceFlowRetriever {
    async fn get_token_context(&self) -> Result<Context> {
        let info = self
            .client
            .get_device_codes(&self.client_id, &self.scope)
            .await?;
        info!(
            user_code = %info.user_code,
            verification_uri = %info.verification_uri,
            "complete device authorization in a browser"
        );
        self.client
            .device_flow(
                &self.client_id,
                &info.device_code,
                info.expires_in,
                info.interval,
            )
            .await
    }
}
