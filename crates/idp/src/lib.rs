//! Identity-provider client library for the Nimbus SDK
//!
//! Implements the OAuth2-family grant flows against an identity provider's
//! `/authn`, `/authorize` and `/token` endpoints, and the token lifecycle
//! pieces built on top of them. This crate is a standalone library with no
//! dependency on the service client, so it can be tested and used on its own.
//!
//! Token flow:
//! 1. The application loads a [`Profile`] describing one app registration
//! 2. [`retriever_for_profile`] selects the [`TokenRetriever`] for the
//!    profile's grant kind
//! 3. The retriever calls the matching [`IdpClient`] flow on demand and
//!    yields a [`Context`] (token + metadata)
//! 4. The service client persists the context via [`TokenCache`] so later
//!    invocations reuse it instead of re-authenticating

pub mod cache;
pub mod client;
pub mod context;
pub mod error;
pub mod pkce;
pub mod profile;
pub mod retriever;

pub use cache::TokenCache;
pub use client::{DeviceCodeInfo, IdpClient, IdpConfig};
pub use context::Context;
pub use error::{Error, Result};
pub use pkce::{create_code_challenge, generate_state};
pub use profile::{Profile, ProfileKind, load_profile, load_profiles, retriever_for_profile};
pub use retriever::{
    ClientCredentialsRetriever, DeviceFlowRetriever, NoOpTokenRetriever, PkceRetriever,
    RefreshTokenRetriever, TokenRetriever,
};
