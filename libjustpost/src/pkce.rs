//! PKCE verifier/challenge generation and the tagged OAuth state token.
//!
//! The state token carries the initiating platform so a callback can be routed
//! without any server-side lookup:
//!
//! ```text
//! justpost-<base64url({"platform":"twitter","nonce":"<32 hex chars>"})>
//! ```
//!
//! All randomness comes from the operating system CSPRNG.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::StateTokenError;
use crate::types::PlatformId;

/// Namespace prefix identifying state tokens issued by this application.
pub const STATE_PREFIX: &str = "justpost-";

const VERIFIER_BYTES: usize = 32;
const NONCE_BYTES: usize = 16;

/// Decoded contents of a state token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatePayload {
    pub platform: PlatformId,
    pub nonce: String,
}

/// Generates a PKCE code verifier: 32 random bytes, base64url without padding.
pub fn generate_code_verifier() -> String {
    let mut bytes = [0u8; VERIFIER_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Computes the S256 challenge for a verifier.
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a state token bound to `platform` with a fresh random nonce.
pub fn generate_state_token(platform: PlatformId) -> String {
    let mut nonce = [0u8; NONCE_BYTES];
    OsRng.fill_bytes(&mut nonce);
    let nonce: String = nonce.iter().map(|b| format!("{:02x}", b)).collect();

    encode_state_token(&StatePayload { platform, nonce })
}

/// Encodes an explicit payload. [`generate_state_token`] is the normal entry point.
pub fn encode_state_token(payload: &StatePayload) -> String {
    // Serializing a two-field struct of plain strings cannot fail.
    let json = serde_json::to_vec(payload).unwrap_or_default();
    format!("{}{}", STATE_PREFIX, URL_SAFE_NO_PAD.encode(json))
}

/// Decodes a state token back into its platform and nonce.
pub fn decode_state_token(token: &str) -> Result<StatePayload, StateTokenError> {
    let encoded = token
        .strip_prefix(STATE_PREFIX)
        .ok_or(StateTokenError::MissingPrefix)?;

    let json = URL_SAFE_NO_PAD
        .decode(encoded)
        .map_err(|_| StateTokenError::InvalidEncoding)?;

    let payload: StatePayload =
        serde_json::from_slice(&json).map_err(|_| StateTokenError::InvalidPayload)?;

    if payload.nonce.is_empty() {
        return Err(StateTokenError::InvalidPayload);
    }

    Ok(payload)
}
