//! The proof-of-possession verifier.
//!
//! Checks run in a fixed order so cheap rejections happen before any database
//! work, and so a replayed message is dead before it can cause side effects:
//! version, timestamp window, nonce claim, app lookup, signature.

use std::time::Duration;

use axum::http::HeaderMap;
use base64::Engine;

use gatehouse_store::models::{AppModel, AppStatus, CredentialModel, CredentialStatus};
use gatehouse_store::{KvStore, RocksDb, StoreError};

use crate::BASE64URL;
use crate::canonical::{CanonicalRequest, POP_VERSION, body_hash};

/// Accepted clock skew between client and gateway, either direction.
pub const TIMESTAMP_WINDOW_SECS: i64 = 90;
/// How long a claimed nonce stays claimed.
pub const NONCE_TTL: Duration = Duration::from_secs(300);
/// Nonces shorter than this are rejected outright.
pub const MIN_NONCE_LEN: usize = 16;

/// Request headers carrying the proof of possession.
pub mod headers {
    pub const X_APP_ID: &str = "x-app-id";
    pub const X_TS: &str = "x-ts";
    pub const X_NONCE: &str = "x-nonce";
    pub const X_SIG: &str = "x-sig";
    pub const X_POP_V: &str = "x-pop-v";
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("missing or malformed authentication headers")]
    MissingAuth,

    #[error("unsupported proof-of-possession version: {0}")]
    UnsupportedPopVersion(String),

    #[error("request timestamp outside the accepted window")]
    ExpiredTimestamp,

    #[error("nonce rejected")]
    InvalidNonce,

    #[error("signature verification failed")]
    InvalidSignature,

    #[error("unknown app")]
    AppNotFound,

    #[error("app is not active")]
    AppDisabled,

    #[error("public key is not a valid Ed25519 verification key")]
    InvalidPublicKey,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The five `x-*` headers, parsed.
#[derive(Debug, Clone)]
pub struct PopHeaders {
    pub app_id: String,
    pub ts: i64,
    pub nonce: String,
    pub signature: Vec<u8>,
    /// `Some` iff `x-pop-v` was sent.
    pub version: Option<String>,
}

impl PopHeaders {
    pub fn from_header_map(headers: &HeaderMap) -> Result<Self, AuthError> {
        let get = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .ok_or(AuthError::MissingAuth)
        };

        let app_id = get(headers::X_APP_ID)?.to_string();
        let ts = get(headers::X_TS)?
            .parse::<i64>()
            .map_err(|_| AuthError::MissingAuth)?;
        let nonce = get(headers::X_NONCE)?.to_string();
        if nonce.len() < MIN_NONCE_LEN {
            return Err(AuthError::InvalidNonce);
        }

        let sig_raw = get(headers::X_SIG)?;
        let signature = base64::engine::general_purpose::STANDARD
            .decode(sig_raw)
            .or_else(|_| BASE64URL.decode(sig_raw))
            .map_err(|_| AuthError::InvalidSignature)?;

        let version = headers
            .get(headers::X_POP_V)
            .and_then(|v| v.to_str().ok())
            .map(str::to_owned);

        Ok(PopHeaders {
            app_id,
            ts,
            nonce,
            signature,
            version,
        })
    }
}

/// An app that proved possession of one of its signing keys.
#[derive(Debug, Clone)]
pub struct AuthenticatedApp {
    pub app: AppModel,
    pub credential_id: String,
}

/// The part of the request the verifier needs besides the headers.
#[derive(Debug, Clone, Copy)]
pub struct RequestParts<'a> {
    pub method: &'a str,
    pub path: &'a str,
    pub query: Option<&'a str>,
    pub body: &'a [u8],
}

/// Verifies proofs of possession against the app store and nonce cache.
#[derive(Debug, Clone)]
pub struct PopVerifier {
    db: RocksDb,
    kv: KvStore,
}

impl PopVerifier {
    pub fn new(db: RocksDb, kv: KvStore) -> Self {
        PopVerifier { db, kv }
    }

    /// Runs the full verification pipeline for one request.
    pub fn verify(
        &self,
        parts: RequestParts<'_>,
        headers: &PopHeaders,
        now: i64,
    ) -> Result<AuthenticatedApp, AuthError> {
        if let Some(version) = &headers.version {
            if version != POP_VERSION {
                return Err(AuthError::UnsupportedPopVersion(version.clone()));
            }
        }

        if (now - headers.ts).abs() > TIMESTAMP_WINDOW_SECS {
            return Err(AuthError::ExpiredTimestamp);
        }

        // Claim the nonce before any row is touched; a replayed message must
        // never reach the credential lookup.
        let claimed = self
            .kv
            .set_if_absent(&format!("nonce:{}", headers.nonce), b"1", NONCE_TTL)?;
        if !claimed {
            tracing::debug!(app_id = %headers.app_id, "replayed nonce rejected");
            return Err(AuthError::InvalidNonce);
        }

        let app = AppModel::find_by_id(&self.db, &headers.app_id)?
            .ok_or(AuthError::AppNotFound)?;
        if app.status() != AppStatus::Active {
            return Err(AuthError::AppDisabled);
        }
        let credentials = CredentialModel::active_for_app(&self.db, &app.id)?;
        if credentials.is_empty() {
            return Err(AuthError::AppNotFound);
        }

        let hash = body_hash(parts.body);
        let canonical = CanonicalRequest {
            method: parts.method,
            path: parts.path,
            query: parts.query,
            app_id: &headers.app_id,
            ts: headers.ts,
            nonce: &headers.nonce,
            body_hash: &hash,
        };
        let message = if headers.version.is_some() {
            canonical.signed_string()
        } else {
            canonical.legacy_signed_string()
        };

        let signature = ed25519_zebra::Signature::try_from(headers.signature.as_slice())
            .map_err(|_| AuthError::InvalidSignature)?;
        for credential in &credentials {
            let Ok(key) =
                ed25519_zebra::VerificationKey::try_from(credential.public_key.as_slice())
            else {
                continue;
            };
            if key.verify(&signature, message.as_bytes()).is_ok() {
                return Ok(AuthenticatedApp {
                    app,
                    credential_id: credential.id.clone(),
                });
            }
        }
        Err(AuthError::InvalidSignature)
    }
}

/// Revokes every ACTIVE credential of the app and installs `new_public_key` as
/// the single ACTIVE one, atomically. Usage limits live on permissions, so
/// nothing else moves.
pub fn rotate_credential(
    db: &RocksDb,
    app_id: &str,
    new_public_key: &[u8],
    label: &str,
) -> Result<CredentialModel, AuthError> {
    ed25519_zebra::VerificationKey::try_from(new_public_key)
        .map_err(|_| AuthError::InvalidPublicKey)?;

    let mut current = CredentialModel::active_for_app(db, app_id)?;
    let replacement = CredentialModel::new(app_id, new_public_key.to_vec(), label);

    for credential in &mut current {
        credential.set_status(CredentialStatus::Revoked);
    }
    db.with_txn(|txn| {
        for credential in &current {
            credential.put_txn(txn, db)?;
        }
        replacement.put_txn(txn, db)?;
        Ok(())
    })?;

    tracing::info!(app_id, credential_id = %replacement.id, "rotated app credential");
    Ok(replacement)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RequestSigner;
    use gatehouse_core::unix_now;
    use gatehouse_store::RocksDbConfig;

    fn open() -> (tempfile::TempDir, RocksDb, KvStore) {
        let tmp = tempfile::tempdir().unwrap();
        let db = RocksDb::open(tmp.path(), &RocksDbConfig::default()).unwrap();
        let kv = KvStore::new(db.clone());
        (tmp, db, kv)
    }

    fn active_app(db: &RocksDb, signer: &RequestSigner) -> AppModel {
        let mut app = AppModel::new("tester", None, None);
        app.set_status(AppStatus::Active);
        app.save(db).unwrap();
        let mut cred = CredentialModel::new(&app.id, signer.verification_key_bytes(), "initial");
        cred.save(db).unwrap();
        app
    }

    fn parts<'a>(body: &'a [u8]) -> RequestParts<'a> {
        RequestParts {
            method: "POST",
            path: "/r/llm/groq/v1/chat/completions",
            query: None,
            body,
        }
    }

    #[test]
    fn accepts_valid_signature() {
        let (_tmp, db, kv) = open();
        let signer = RequestSigner::generate("ignored");
        let app = active_app(&db, &signer);
        let signer = signer.with_app_id(&app.id);

        let now = unix_now() as i64;
        let headers = signer.pop_headers_at(
            "POST",
            "/r/llm/groq/v1/chat/completions",
            b"{}",
            now,
            "nonce-0123456789abcdef",
        );
        let verifier = PopVerifier::new(db, kv);
        let authed = verifier.verify(parts(b"{}"), &headers, now).unwrap();
        assert_eq!(authed.app.id, app.id);
    }

    #[test]
    fn rejects_replayed_nonce_before_lookup() {
        let (_tmp, db, kv) = open();
        let signer = RequestSigner::generate("ignored");
        let app = active_app(&db, &signer);
        let signer = signer.with_app_id(&app.id);

        let now = unix_now() as i64;
        let headers = signer.pop_headers_at(
            "POST",
            "/r/llm/groq/v1/chat/completions",
            b"{}",
            now,
            "nonce-0123456789abcdef",
        );
        let verifier = PopVerifier::new(db, kv);
        verifier.verify(parts(b"{}"), &headers, now).unwrap();
        let err = verifier.verify(parts(b"{}"), &headers, now).unwrap_err();
        assert!(matches!(err, AuthError::InvalidNonce));
    }

    #[test]
    fn stale_timestamp_does_not_consume_nonce() {
        let (_tmp, db, kv) = open();
        let signer = RequestSigner::generate("ignored");
        let app = active_app(&db, &signer);
        let signer = signer.with_app_id(&app.id);

        let now = unix_now() as i64;
        let stale = now - TIMESTAMP_WINDOW_SECS - 1;
        let headers = signer.pop_headers_at(
            "POST",
            "/r/llm/groq/v1/chat/completions",
            b"{}",
            stale,
            "nonce-0123456789abcdef",
        );
        let verifier = PopVerifier::new(db, kv.clone());
        let err = verifier.verify(parts(b"{}"), &headers, now).unwrap_err();
        assert!(matches!(err, AuthError::ExpiredTimestamp));
        // The nonce is still claimable.
        assert!(
            kv.set_if_absent("nonce:nonce-0123456789abcdef", b"1", NONCE_TTL)
                .unwrap()
        );
    }

    #[test]
    fn rejects_unknown_version() {
        let (_tmp, db, kv) = open();
        let signer = RequestSigner::generate("app-x");
        let now = unix_now() as i64;
        let mut headers = signer.pop_headers_at("POST", "/x", b"", now, "nonce-0123456789abcdef");
        headers.version = Some("v2".into());
        let err = PopVerifier::new(db, kv)
            .verify(parts(b""), &headers, now)
            .unwrap_err();
        assert!(matches!(err, AuthError::UnsupportedPopVersion(v) if v == "v2"));
    }

    #[test]
    fn rejects_tampered_body() {
        let (_tmp, db, kv) = open();
        let signer = RequestSigner::generate("ignored");
        let app = active_app(&db, &signer);
        let signer = signer.with_app_id(&app.id);

        let now = unix_now() as i64;
        let headers = signer.pop_headers_at(
            "POST",
            "/r/llm/groq/v1/chat/completions",
            b"{\"a\":1}",
            now,
            "nonce-0123456789abcdef",
        );
        let err = PopVerifier::new(db, kv)
            .verify(parts(b"{\"a\":2}"), &headers, now)
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidSignature));
    }

    #[test]
    fn rejects_unknown_app_and_inactive_app() {
        let (_tmp, db, kv) = open();
        let signer = RequestSigner::generate("missing-app");
        let now = unix_now() as i64;
        let headers = signer.pop_headers_at("POST", "/x", b"", now, "nonce-0123456789abcdef");
        let verifier = PopVerifier::new(db.clone(), kv);
        let err = verifier.verify(parts(b""), &headers, now).unwrap_err();
        assert!(matches!(err, AuthError::AppNotFound));

        // A PENDING app cannot sign requests.
        let mut app = AppModel::new("pending", None, None);
        app.save(&db).unwrap();
        let signer = RequestSigner::generate(&app.id);
        let headers = signer.pop_headers_at("POST", "/x", b"", now, "nonce-fedcba9876543210");
        let err = verifier.verify(parts(b""), &headers, now).unwrap_err();
        assert!(matches!(err, AuthError::AppDisabled));
    }

    #[test]
    fn short_nonce_rejected_at_extraction() {
        let mut map = HeaderMap::new();
        map.insert(headers::X_APP_ID, "app".parse().unwrap());
        map.insert(headers::X_TS, "123".parse().unwrap());
        map.insert(headers::X_NONCE, "short".parse().unwrap());
        map.insert(headers::X_SIG, "AA==".parse().unwrap());
        assert!(matches!(
            PopHeaders::from_header_map(&map),
            Err(AuthError::InvalidNonce)
        ));
    }

    #[test]
    fn missing_header_rejected_at_extraction() {
        let mut map = HeaderMap::new();
        map.insert(headers::X_APP_ID, "app".parse().unwrap());
        assert!(matches!(
            PopHeaders::from_header_map(&map),
            Err(AuthError::MissingAuth)
        ));
    }

    #[test]
    fn rotation_leaves_exactly_one_active_credential() {
        let (_tmp, db, _kv) = open();
        let signer = RequestSigner::generate("ignored");
        let app = active_app(&db, &signer);

        let next = RequestSigner::generate(&app.id);
        let rotated =
            rotate_credential(&db, &app.id, &next.verification_key_bytes(), "rotated").unwrap();

        let all = CredentialModel::list_for_app(&db, &app.id).unwrap();
        assert_eq!(all.len(), 2);
        let active = CredentialModel::active_for_app(&db, &app.id).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, rotated.id);
        assert!(
            all.iter()
                .filter(|c| c.id != rotated.id)
                .all(|c| c.status() == CredentialStatus::Revoked)
        );
    }

    #[test]
    fn rotation_rejects_garbage_key() {
        let (_tmp, db, _kv) = open();
        let err = rotate_credential(&db, "app-1", &[0u8; 5], "bad").unwrap_err();
        assert!(matches!(err, AuthError::InvalidPublicKey));
    }
}
