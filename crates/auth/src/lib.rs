//! Proof-of-possession authentication and app pairing.
//!
//! Every request an app makes carries a fresh Ed25519 signature over a
//! canonical string; the verifier replays none of them thanks to a single-use
//! nonce claim. Apps come into existence through the pairing flow: a one-time
//! connect code opens an install session, and approval turns the PENDING app
//! into an ACTIVE one with scoped permissions.

use base64::Engine;
use sha2::{Digest, Sha256};

/// Canonical request string construction.
pub mod canonical;
/// Client-side request signing (SDKs and tests).
pub mod client;
/// Connect codes, install sessions, approval and denial.
pub mod pairing;
/// The request verifier and credential rotation.
pub mod pop;

pub use pairing::PairingError;
pub use pop::{AuthError, AuthenticatedApp, PopHeaders, PopVerifier};

/// URL-safe, unpadded base64 used for body hashes, nonces, codes, and tokens.
pub const BASE64URL: base64::engine::GeneralPurpose = base64::engine::GeneralPurpose::new(
    &base64::alphabet::URL_SAFE,
    base64::engine::general_purpose::NO_PAD,
);

/// base64url SHA-256 digest of arbitrary bytes.
pub fn sha256_b64url(data: &[u8]) -> String {
    BASE64URL.encode(Sha256::digest(data))
}
