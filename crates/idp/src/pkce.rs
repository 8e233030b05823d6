//! PKCE code-verifier and challenge generation (RFC 7636)

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Unreserved characters permitted in a code verifier (RFC 7636 §4.1).
const VERIFIER_CHARSET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

const MIN_VERIFIER_LEN: usize = 43;
const MAX_VERIFIER_LEN: usize = 128;

/// Generate a `(code_challenge, code_verifier)` pair.
///
/// The verifier is exactly `length` characters drawn from the RFC 7636
/// unreserved set; lengths outside 43..=128 are rejected rather than
/// clamped. The challenge is the base64url (no padding) SHA-256 digest of
/// the verifier, the `S256` challenge method.
pub fn create_code_challenge(length: usize) -> Result<(String, String)> {
    if !(MIN_VERIFIER_LEN..=MAX_VERIFIER_LEN).contains(&length) {
        return Err(Error::VerifierLength(length));
    }

    let mut rng = rand::rng();
    let verifier: String = (0..length)
        .map(|_| VERIFIER_CHARSET[rng.random_range(0..VERIFIER_CHARSET.len())] as char)
        .collect();

    let challenge = URL_SAFE_NO_PAD.encode(Sha256::digest(verifier.as_bytes()));
    Ok((challenge, verifier))
}

/// Generate a random `state` parameter for authorize requests.
pub fn generate_state() -> String {
    let mut bytes = [0u8; 16];
    rand::rng().fill(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}
