//! Client-side request signing.
//!
//! Apps hold an Ed25519 signing key; the gateway only ever sees the
//! verification key. This module is what an SDK (and this workspace's tests)
//! uses to produce the `x-*` proof-of-possession headers for a request.

use axum::http::{HeaderMap, HeaderValue};
use base64::Engine;
use rand::RngCore;

use gatehouse_core::unix_now;

use crate::BASE64URL;
use crate::canonical::{CanonicalRequest, POP_VERSION, body_hash};
use crate::pop::{PopHeaders, headers};

/// Signs requests on behalf of one app.
pub struct RequestSigner {
    app_id: String,
    signing_key: ed25519_zebra::SigningKey,
}

impl RequestSigner {
    /// A signer with a freshly generated keypair.
    pub fn generate(app_id: &str) -> Self {
        RequestSigner {
            app_id: app_id.to_string(),
            signing_key: ed25519_zebra::SigningKey::new(rand::thread_rng()),
        }
    }

    pub fn from_seed(app_id: &str, seed: [u8; 32]) -> Self {
        RequestSigner {
            app_id: app_id.to_string(),
            signing_key: ed25519_zebra::SigningKey::from(seed),
        }
    }

    /// Rebinds the signer to another app id, keeping the key.
    pub fn with_app_id(self, app_id: &str) -> Self {
        RequestSigner {
            app_id: app_id.to_string(),
            signing_key: self.signing_key,
        }
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    /// The 32-byte verification key the gateway stores.
    pub fn verification_key_bytes(&self) -> Vec<u8> {
        ed25519_zebra::VerificationKey::from(&self.signing_key)
            .as_ref()
            .to_vec()
    }

    /// Deterministic signing with caller-chosen timestamp and nonce.
    pub fn pop_headers_at(
        &self,
        method: &str,
        path_and_query: &str,
        body: &[u8],
        ts: i64,
        nonce: &str,
    ) -> PopHeaders {
        let (path, query) = split_path_query(path_and_query);
        let hash = body_hash(body);
        let message = CanonicalRequest {
            method,
            path,
            query,
            app_id: &self.app_id,
            ts,
            nonce,
            body_hash: &hash,
        }
        .signed_string();
        let signature = self.signing_key.sign(message.as_bytes());
        PopHeaders {
            app_id: self.app_id.clone(),
            ts,
            nonce: nonce.to_string(),
            signature: signature.to_bytes().to_vec(),
            version: Some(POP_VERSION.to_string()),
        }
    }

    /// Full header map for a request signed now with a fresh nonce.
    pub fn header_map(&self, method: &str, path_and_query: &str, body: &[u8]) -> HeaderMap {
        self.header_map_at(
            method,
            path_and_query,
            body,
            unix_now() as i64,
            &fresh_nonce(),
        )
    }

    /// Full header map with caller-chosen timestamp and nonce.
    pub fn header_map_at(
        &self,
        method: &str,
        path_and_query: &str,
        body: &[u8],
        ts: i64,
        nonce: &str,
    ) -> HeaderMap {
        to_header_map(&self.pop_headers_at(method, path_and_query, body, ts, nonce))
    }

    /// Header map in legacy mode: no version header, query excluded from the
    /// signed path.
    pub fn legacy_header_map(&self, method: &str, path: &str, body: &[u8]) -> HeaderMap {
        let ts = unix_now() as i64;
        let nonce = fresh_nonce();
        let hash = body_hash(body);
        let message = CanonicalRequest {
            method,
            path,
            query: None,
            app_id: &self.app_id,
            ts,
            nonce: &nonce,
            body_hash: &hash,
        }
        .legacy_signed_string();
        let signature = self.signing_key.sign(message.as_bytes());
        let pop = PopHeaders {
            app_id: self.app_id.clone(),
            ts,
            nonce,
            signature: signature.to_bytes().to_vec(),
            version: None,
        };
        to_header_map(&pop)
    }
}

/// A random 16-byte nonce, base64url.
pub fn fresh_nonce() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64URL.encode(bytes)
}

fn split_path_query(path_and_query: &str) -> (&str, Option<&str>) {
    match path_and_query.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (path_and_query, None),
    }
}

fn to_header_map(pop: &PopHeaders) -> HeaderMap {
    let mut map = HeaderMap::new();
    let insert = |map: &mut HeaderMap, name: &'static str, value: String| {
        if let Ok(value) = HeaderValue::from_str(&value) {
            map.insert(name, value);
        }
    };
    insert(&mut map, headers::X_APP_ID, pop.app_id.clone());
    insert(&mut map, headers::X_TS, pop.ts.to_string());
    insert(&mut map, headers::X_NONCE, pop.nonce.clone());
    insert(
        &mut map,
        headers::X_SIG,
        base64::engine::general_purpose::STANDARD.encode(&pop.signature),
    );
    if let Some(version) = &pop.version {
        insert(&mut map, headers::X_POP_V, version.clone());
    }
    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_is_deterministic_for_fixed_inputs() {
        let signer = RequestSigner::from_seed("app-1", [7u8; 32]);
        let a = signer.pop_headers_at("POST", "/r/llm/groq/v1/chat/completions", b"{}", 100, "n".repeat(16).as_str());
        let b = signer.pop_headers_at("POST", "/r/llm/groq/v1/chat/completions", b"{}", 100, "n".repeat(16).as_str());
        assert_eq!(a.signature, b.signature);
    }

    #[test]
    fn header_map_carries_all_headers() {
        let signer = RequestSigner::generate("app-1");
        let map = signer.header_map("POST", "/r/llm/groq/v1/chat/completions?x=1", b"{}");
        for name in [
            headers::X_APP_ID,
            headers::X_TS,
            headers::X_NONCE,
            headers::X_SIG,
            headers::X_POP_V,
        ] {
            assert!(map.contains_key(name), "missing {name}");
        }
    }

    #[test]
    fn legacy_header_map_omits_version() {
        let signer = RequestSigner::generate("app-1");
        let map = signer.legacy_header_map("GET", "/r/llm/groq/v1/models", b"");
        assert!(!map.contains_key(headers::X_POP_V));
        assert!(map.contains_key(headers::X_SIG));
    }

    #[test]
    fn fresh_nonces_are_long_and_unique() {
        let a = fresh_nonce();
        let b = fresh_nonce();
        assert!(a.len() >= 16);
        assert_ne!(a, b);
    }
}
