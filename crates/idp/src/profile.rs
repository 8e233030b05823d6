//! Authentication profiles
//!
//! A profile is a named, durable bundle of configuration identifying one
//! application registration: which grant flow to run and the credentials
//! it needs. Profiles are loaded once at process start and read-only
//! thereafter; [`retriever_for_profile`] turns one into the matching
//! [`TokenRetriever`] so flow selection happens at load time rather than
//! on every token request.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use common::Secret;
use serde::Deserialize;

use crate::client::IdpConfig;
use crate::error::{Error, Result};
use crate::retriever::{
    ClientCredentialsRetriever, DeviceFlowRetriever, NoOpTokenRetriever, PkceRetriever,
    RefreshTokenRetriever, TokenRetriever,
};

/// Which grant flow a profile selects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProfileKind {
    /// Client-credentials grant, for confidential services
    Client,
    /// PKCE grant with resource-owner credentials
    Pkce,
    /// Refresh-token grant
    Refresh,
    /// Device-authorization grant, approved on a second device
    Device,
    /// Static pre-supplied token, no lifecycle management
    Token,
}

/// One application registration as stored in durable config.
///
/// Credential fields are held as [`Secret`] so a `{:?}` of a profile
/// never reproduces them.
#[derive(Debug, Clone, Deserialize)]
pub struct Profile {
    pub kind: ProfileKind,
    #[serde(default)]
    pub client_id: String,
    pub client_secret: Option<Secret<String>>,
    pub redirect_uri: Option<String>,
    pub scope: Option<String>,
    pub username: Option<String>,
    pub password: Option<Secret<String>>,
    pub idp_host: Option<String>,
    pub refresh_token: Option<Secret<String>>,
    pub token: Option<Secret<String>>,
}

impl Profile {
    fn require(&self, field: Option<&String>, name: &str) -> Result<String> {
        field
            .cloned()
            .ok_or_else(|| Error::Profile(format!("{name} is required for {:?} profiles", self.kind)))
    }

    fn require_secret(
        &self,
        field: Option<&Secret<String>>,
        name: &str,
    ) -> Result<Secret<String>> {
        field
            .cloned()
            .ok_or_else(|| Error::Profile(format!("{name} is required for {:?} profiles", self.kind)))
    }

    fn idp_config(&self, timeout: Duration) -> Result<IdpConfig> {
        let host = self.require(self.idp_host.as_ref(), "idp_host")?;
        Ok(IdpConfig::new(host, timeout))
    }

    fn scope(&self) -> String {
        self.scope.clone().unwrap_or_else(|| "openid".into())
    }
}

/// Load all profiles from a TOML document mapping name to profile.
pub fn load_profiles(path: &Path) -> common::Result<BTreeMap<String, Profile>> {
    let contents = std::fs::read_to_string(path)?;
    Ok(toml::from_str(&contents)?)
}

/// Load one named profile from a TOML document.
pub fn load_profile(path: &Path, name: &str) -> common::Result<Profile> {
    let mut profiles = load_profiles(path)?;
    profiles
        .remove(name)
        .ok_or_else(|| common::Error::Config(format!("no profile named {name:?}")))
}

/// Build the token retriever a profile selects.
pub fn retriever_for_profile(
    profile: &Profile,
    timeout: Duration,
) -> Result<Box<dyn TokenRetriever>> {
    match profile.kind {
        ProfileKind::Token => {
            let token = profile.require_secret(profile.token.as_ref(), "token")?;
            Ok(Box::new(NoOpTokenRetriever::from_token(
                token.expose().clone(),
            )))
        }
        ProfileKind::Client => {
            let secret = profile.require_secret(profile.client_secret.as_ref(), "client_secret")?;
            Ok(Box::new(ClientCredentialsRetriever::new(
                profile.idp_config(timeout)?,
                profile.client_id.clone(),
                secret,
                profile.scope(),
            )?))
        }
        ProfileKind::Refresh => {
            let refresh_token =
                profile.require_secret(profile.refresh_token.as_ref(), "refresh_token")?;
            Ok(Box::new(RefreshTokenRetriever::new(
                profile.idp_config(timeout)?,
                profile.client_id.clone(),
                profile.scope(),
                refresh_token,
            )?))
        }
        ProfileKind::Pkce => {
            let redirect_uri = profile.require(profile.redirect_uri.as_ref(), "redirect_uri")?;
            let username = profile.require(profile.username.as_ref(), "username")?;
            let password = profile.require_secret(profile.password.as_ref(), "password")?;
            Ok(Box::new(PkceRetriever::new(
                profile.idp_config(timeout)?,
                profile.client_id.clone(),
                redirect_uri,
                profile.scope(),
                username,
                password,
            )?))
        }
        ProfileKind::Device => Ok(Box::new(DeviceFlowRetriever::new(
            profile.idp_config(timeout)?,
            profile.client_id.clone(),
            profile.scope(),
        )?)),
    }
}
