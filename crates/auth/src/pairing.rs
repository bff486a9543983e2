//! Connect codes and install sessions.
//!
//! Pairing happens in two stages. A human-mediated one-time connect code (only
//! its SHA-256 hash is stored) is handed to the app as
//! `pair::<gateway-url>::<code>`. The app redeems it to open an install
//! session: a PENDING app with one ACTIVE credential and an opaque session
//! token. Approval flattens the granted policies into permission rows and
//! activates the app; denial or expiry deletes the PENDING app again.
//!
//! Sessions move `PENDING -> {APPROVED, DENIED, EXPIRED}` and never leave a
//! terminal state.

use std::time::Duration;

use base64::Engine;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use gatehouse_core::{ResourceId, ResourceIdParseError, unix_now};
use gatehouse_store::models::{
    AppModel, AppStatus, ConnectCodeModel, CredentialModel, InstallSessionModel, PermissionModel,
    RequestedPermission, SessionStatus, TimeWindowModel,
};
use gatehouse_store::{RocksDb, StoreError};

use crate::{BASE64URL, sha256_b64url};

/// One-time connect codes live ten minutes.
pub const CONNECT_CODE_TTL: Duration = Duration::from_secs(10 * 60);
/// Install sessions live thirty minutes.
pub const INSTALL_SESSION_TTL: Duration = Duration::from_secs(30 * 60);
/// Shortest code accepted when parsing a pairing string.
pub const MIN_CODE_LEN: usize = 16;

const PAIRING_PREFIX: &str = "pair";

#[derive(Debug, thiserror::Error)]
pub enum PairingError {
    #[error("connect code not found")]
    CodeNotFound,

    #[error("connect code has expired")]
    CodeExpired,

    #[error("connect code was already used")]
    CodeUsed,

    #[error("malformed pairing string")]
    InvalidPairingString,

    #[error("public key is not a valid Ed25519 verification key")]
    InvalidPublicKey,

    #[error("redirect URI must be an absolute URL")]
    InvalidRedirectUri,

    #[error(transparent)]
    InvalidResourceId(#[from] ResourceIdParseError),

    #[error("a grant must name at least one action")]
    EmptyGrant,

    #[error("install session not found")]
    SessionNotFound,

    #[error("install session has expired")]
    SessionExpired,

    #[error("install session is already completed")]
    SessionNotPending,

    #[error(transparent)]
    Store(#[from] StoreError),
}

// ─── Pairing strings ────────────────────────────────────────────────────────

/// Builds `pair::<gateway-url>::<code>`, trimming any trailing slash off the
/// gateway URL.
pub fn format_pairing_string(gateway_url: &str, code: &str) -> String {
    format!(
        "{PAIRING_PREFIX}::{}::{code}",
        gateway_url.trim_end_matches('/')
    )
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedPairing {
    pub gateway_url: String,
    pub code: String,
}

/// Parses a pairing string: exactly three `::`-separated non-empty segments, an
/// absolute gateway URL, and a code of at least [`MIN_CODE_LEN`] characters.
pub fn parse_pairing_string(s: &str) -> Result<ParsedPairing, PairingError> {
    let parts: Vec<&str> = s.split("::").collect();
    let [prefix, gateway_url, code] = parts.as_slice() else {
        return Err(PairingError::InvalidPairingString);
    };
    if *prefix != PAIRING_PREFIX || gateway_url.is_empty() || code.len() < MIN_CODE_LEN {
        return Err(PairingError::InvalidPairingString);
    }
    let parsed =
        url::Url::parse(gateway_url).map_err(|_| PairingError::InvalidPairingString)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PairingError::InvalidPairingString);
    }
    Ok(ParsedPairing {
        gateway_url: (*gateway_url).to_string(),
        code: (*code).to_string(),
    })
}

// ─── Connect codes ──────────────────────────────────────────────────────────

/// A freshly minted connect code. The plaintext exists only here; the store
/// keeps the hash.
#[derive(Debug, Clone)]
pub struct GeneratedPairing {
    pub code: String,
    pub pairing: String,
    pub expires_at: u64,
}

/// Mints a one-time connect code and returns the pairing string for it.
pub fn generate_pairing(db: &RocksDb, gateway_url: &str) -> Result<GeneratedPairing, PairingError> {
    let mut raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut raw);
    let code = BASE64URL.encode(raw);

    let expires_at = unix_now() + CONNECT_CODE_TTL.as_secs();
    ConnectCodeModel::new(&sha256_b64url(code.as_bytes()), expires_at).save(db)?;

    tracing::info!(expires_at, "generated connect code");
    Ok(GeneratedPairing {
        pairing: format_pairing_string(gateway_url, &code),
        code,
        expires_at,
    })
}

fn find_live_code(db: &RocksDb, code: &str) -> Result<ConnectCodeModel, PairingError> {
    let hash = sha256_b64url(code.as_bytes());
    let record = ConnectCodeModel::find(db, &hash)?.ok_or(PairingError::CodeNotFound)?;
    // The lookup already compared hashes via the key; keep the comparison
    // constant-time anyway in case the store grows a scan path.
    if record.code_hash.as_bytes().ct_eq(hash.as_bytes()).unwrap_u8() != 1 {
        return Err(PairingError::CodeNotFound);
    }
    if record.expires_at < unix_now() {
        return Err(PairingError::CodeExpired);
    }
    if record.is_used() {
        return Err(PairingError::CodeUsed);
    }
    Ok(record)
}

// ─── Install flow ───────────────────────────────────────────────────────────

/// What an app submits to open an install session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrepareInstallRequest {
    pub code: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub homepage: Option<String>,
    pub requested_permissions: Vec<RequestedPermission>,
    pub redirect_uri: String,
    /// Ed25519 verification key, base64url.
    pub public_key: String,
    #[serde(default)]
    pub key_label: Option<String>,
}

/// Outcome of a successful prepare: the opaque token the approval surface
/// operates on.
#[derive(Debug, Clone, Serialize)]
pub struct PreparedInstall {
    pub session_token: String,
    pub approval_url: String,
    pub expires_at: u64,
}

/// Redeems a connect code: marks it used and creates the PENDING app, its first
/// credential, and the install session, all or nothing.
pub fn prepare_install(
    db: &RocksDb,
    gateway_url: &str,
    request: &PrepareInstallRequest,
) -> Result<PreparedInstall, PairingError> {
    let mut code = find_live_code(db, &request.code)?;

    let public_key = BASE64URL
        .decode(&request.public_key)
        .map_err(|_| PairingError::InvalidPublicKey)?;
    ed25519_zebra::VerificationKey::try_from(public_key.as_slice())
        .map_err(|_| PairingError::InvalidPublicKey)?;

    let redirect = url::Url::parse(&request.redirect_uri)
        .map_err(|_| PairingError::InvalidRedirectUri)?;
    if redirect.cannot_be_a_base() {
        return Err(PairingError::InvalidRedirectUri);
    }
    for requested in &request.requested_permissions {
        requested.resource_id.parse::<ResourceId>()?;
        if requested.actions.is_empty() {
            return Err(PairingError::EmptyGrant);
        }
    }

    let now = unix_now();
    code.used_at = now;

    let app = AppModel::new(&request.name, request.description.clone(), request.homepage.clone());
    let credential = CredentialModel::new(
        &app.id,
        public_key,
        request.key_label.as_deref().unwrap_or("initial"),
    );

    let mut token_raw = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut token_raw);
    let session_token = BASE64URL.encode(token_raw);
    let expires_at = now + INSTALL_SESSION_TTL.as_secs();
    let session = InstallSessionModel::new(
        &app.id,
        &session_token,
        &request.requested_permissions,
        &request.redirect_uri,
        expires_at,
    );

    db.with_txn(|txn| {
        code.put_txn(txn, db)?;
        app.put_txn(txn, db)?;
        credential.put_txn(txn, db)?;
        session.put_txn(txn, db)?;
        Ok(())
    })?;

    tracing::info!(app_id = %app.id, expires_at, "install session opened");
    Ok(PreparedInstall {
        approval_url: format!(
            "{}/approve?session={session_token}",
            gateway_url.trim_end_matches('/')
        ),
        session_token,
        expires_at,
    })
}

/// Policy attached to a granted `(resource, action)` pair.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyGrant {
    pub valid_from: Option<u64>,
    pub expires_at: Option<u64>,
    pub time_window: Option<TimeWindowGrant>,
    pub rate_limit: Option<RateLimitGrant>,
    pub quota: Option<PeriodLimits>,
    pub token_budget: Option<PeriodLimits>,
    pub constraints: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowGrant {
    pub start_hour: u32,
    pub end_hour: u32,
    pub timezone: String,
    #[serde(default)]
    pub allowed_days: Vec<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitGrant {
    pub max_requests: u64,
    pub window_seconds: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeriodLimits {
    pub daily: Option<u64>,
    pub monthly: Option<u64>,
}

/// One granted resource with the actions allowed on it. Every action row gets
/// this grant's policy as-is.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantedPermission {
    pub resource_id: String,
    pub actions: Vec<String>,
    #[serde(default)]
    pub policy: PolicyGrant,
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovedInstall {
    pub app_id: String,
    pub redirect_uri: String,
    /// Earliest expiry across the grants, if any of them expire.
    pub earliest_expires_at: Option<u64>,
}

fn permission_rows(
    app_id: &str,
    grants: &[GrantedPermission],
) -> Result<Vec<PermissionModel>, PairingError> {
    let mut rows = Vec::new();
    for grant in grants {
        let resource: ResourceId = grant.resource_id.parse()?;
        if grant.actions.is_empty() {
            return Err(PairingError::EmptyGrant);
        }
        for action in &grant.actions {
            let mut row = PermissionModel::new(app_id, &resource, action);
            let policy = &grant.policy;
            row.valid_from = policy.valid_from.unwrap_or(0);
            row.expires_at = policy.expires_at.unwrap_or(0);
            row.time_window = policy.time_window.as_ref().map(|w| TimeWindowModel {
                start_hour: w.start_hour,
                end_hour: w.end_hour,
                timezone: w.timezone.clone(),
                allowed_days: w.allowed_days.clone(),
            });
            row.rate_limit = policy.rate_limit.as_ref().map(|r| {
                gatehouse_store::models::RateLimitModel {
                    max_requests: r.max_requests,
                    window_seconds: r.window_seconds,
                }
            });
            if let Some(quota) = &policy.quota {
                row.daily_quota = quota.daily.unwrap_or(0);
                row.monthly_quota = quota.monthly.unwrap_or(0);
            }
            if let Some(budget) = &policy.token_budget {
                row.daily_token_budget = budget.daily.unwrap_or(0);
                row.monthly_token_budget = budget.monthly.unwrap_or(0);
            }
            if let Some(constraints) = &policy.constraints {
                row.set_constraints(constraints);
            }
            rows.push(row);
        }
    }
    Ok(rows)
}

fn load_pending_session(
    db: &RocksDb,
    session_token: &str,
) -> Result<InstallSessionModel, PairingError> {
    let session = InstallSessionModel::find_by_token(db, session_token)?
        .ok_or(PairingError::SessionNotFound)?;
    if session.status() != SessionStatus::Pending {
        return Err(PairingError::SessionNotPending);
    }
    if session.expires_at < unix_now() {
        // Self-heal: flip to EXPIRED and drop the pending app right away
        // instead of waiting for the sweeper.
        expire_session(db, session.clone())?;
        return Err(PairingError::SessionExpired);
    }
    Ok(session)
}

/// Approves an install session: inserts one permission row per granted
/// `(resource, action)`, activates the app, and closes the session, atomically.
pub fn approve_install(
    db: &RocksDb,
    session_token: &str,
    grants: &[GrantedPermission],
) -> Result<ApprovedInstall, PairingError> {
    let mut session = load_pending_session(db, session_token)?;
    let mut app =
        AppModel::find_by_id(db, &session.app_id)?.ok_or(PairingError::SessionNotFound)?;

    let rows = permission_rows(&app.id, grants)?;
    let now = unix_now();
    app.set_status(AppStatus::Active);
    app.updated_at = now;
    session.set_status(SessionStatus::Approved);
    session.completed_at = now;
    session.updated_at = now;

    db.with_txn(|txn| {
        for row in &rows {
            row.put_txn(txn, db)?;
        }
        app.put_txn(txn, db)?;
        session.put_txn(txn, db)?;
        Ok(())
    })?;

    let earliest_expires_at = rows
        .iter()
        .map(|r| r.expires_at)
        .filter(|e| *e != 0)
        .min();

    tracing::info!(app_id = %app.id, grants = rows.len(), "install approved");
    Ok(ApprovedInstall {
        app_id: app.id,
        redirect_uri: session.redirect_uri,
        earliest_expires_at,
    })
}

/// Denies an install session and deletes its PENDING app with everything the
/// app owned.
pub fn deny_install(db: &RocksDb, session_token: &str) -> Result<String, PairingError> {
    let mut session = load_pending_session(db, session_token)?;
    let now = unix_now();
    session.set_status(SessionStatus::Denied);
    session.completed_at = now;
    session.updated_at = now;

    let keys = AppModel::collect_cascade(db, &session.app_id)?;
    db.with_txn(|txn| {
        session.put_txn(txn, db)?;
        AppModel::delete_in_txn(txn, db, &session.app_id, &keys)?;
        Ok(())
    })?;

    tracing::info!(app_id = %session.app_id, "install denied");
    Ok(session.redirect_uri)
}

fn expire_session(db: &RocksDb, mut session: InstallSessionModel) -> Result<(), PairingError> {
    session.set_status(SessionStatus::Expired);
    session.completed_at = unix_now();
    session.updated_at = session.completed_at;
    let keys = AppModel::collect_cascade(db, &session.app_id)?;
    db.with_txn(|txn| {
        session.put_txn(txn, db)?;
        AppModel::delete_in_txn(txn, db, &session.app_id, &keys)?;
        Ok(())
    })?;
    Ok(())
}

/// Result of one periodic cleanup pass.
#[derive(Debug, Clone, Copy, Default)]
pub struct CleanupStats {
    pub purged_codes: u64,
    pub expired_sessions: u64,
}

/// Deletes expired connect codes and expires overdue PENDING sessions together
/// with their PENDING apps.
pub fn cleanup(db: &RocksDb) -> Result<CleanupStats, PairingError> {
    let now = unix_now();
    let purged_codes = ConnectCodeModel::purge_expired(db, now)?;

    let overdue = InstallSessionModel::expired_pending(db, now)?;
    let expired_sessions = overdue.len() as u64;
    for session in overdue {
        expire_session(db, session)?;
    }

    if purged_codes > 0 || expired_sessions > 0 {
        tracing::debug!(purged_codes, expired_sessions, "pairing cleanup pass");
    }
    Ok(CleanupStats {
        purged_codes,
        expired_sessions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::RequestSigner;
    use gatehouse_store::RocksDbConfig;
    use gatehouse_store::models::CredentialStatus;

    const GATEWAY_URL: &str = "https://gw.example.com";

    fn open() -> (tempfile::TempDir, RocksDb) {
        let tmp = tempfile::tempdir().unwrap();
        let db = RocksDb::open(tmp.path(), &RocksDbConfig::default()).unwrap();
        (tmp, db)
    }

    fn prepare_request(code: &str) -> PrepareInstallRequest {
        let signer = RequestSigner::generate("unused");
        PrepareInstallRequest {
            code: code.to_string(),
            name: "notes".into(),
            description: None,
            homepage: None,
            requested_permissions: vec![RequestedPermission {
                resource_id: "llm:groq".into(),
                actions: vec!["chat.completions".into()],
            }],
            redirect_uri: "https://app.example.com/callback".into(),
            public_key: BASE64URL.encode(signer.verification_key_bytes()),
            key_label: None,
        }
    }

    fn default_grants() -> Vec<GrantedPermission> {
        vec![GrantedPermission {
            resource_id: "llm:groq".into(),
            actions: vec!["chat.completions".into()],
            policy: PolicyGrant {
                rate_limit: Some(RateLimitGrant {
                    max_requests: 10,
                    window_seconds: 60,
                }),
                constraints: Some(serde_json::json!({
                    "allowed_models": ["llama-3.1-8b-instant"],
                })),
                ..Default::default()
            },
        }]
    }

    #[test]
    fn pairing_string_round_trip() {
        let s = format_pairing_string("https://gw.example.com/", "c".repeat(22).as_str());
        let parsed = parse_pairing_string(&s).unwrap();
        assert_eq!(parsed.gateway_url, "https://gw.example.com");
        assert_eq!(parsed.code.len(), 22);
    }

    #[test]
    fn pairing_string_rejects_bad_shapes() {
        for s in [
            "pair::https://gw.example.com",
            "pair::https://gw.example.com::short",
            "pair::::cccccccccccccccccccccc",
            "link::https://gw.example.com::cccccccccccccccccccccc",
            "pair::not a url::cccccccccccccccccccccc",
            "pair::https://gw::code::extra",
        ] {
            assert!(parse_pairing_string(s).is_err(), "accepted {s:?}");
        }
    }

    #[test]
    fn generated_pairing_parses_back() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let parsed = parse_pairing_string(&generated.pairing).unwrap();
        assert_eq!(parsed.gateway_url, GATEWAY_URL);
        assert_eq!(parsed.code, generated.code);
        // Only the hash is stored.
        assert!(
            ConnectCodeModel::find(&db, &sha256_b64url(generated.code.as_bytes()))
                .unwrap()
                .is_some()
        );
        assert!(ConnectCodeModel::find(&db, &generated.code).unwrap().is_none());
    }

    #[test]
    fn prepare_creates_pending_state() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let prepared = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap();

        let session = InstallSessionModel::find_by_token(&db, &prepared.session_token)
            .unwrap()
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Pending);

        let app = AppModel::find_by_id(&db, &session.app_id).unwrap().unwrap();
        assert_eq!(app.status(), AppStatus::Pending);
        assert_eq!(
            CredentialModel::active_for_app(&db, &app.id).unwrap().len(),
            1
        );
        assert!(prepared.approval_url.contains(&prepared.session_token));
    }

    #[test]
    fn connect_code_is_single_use() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap();

        let err = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap_err();
        assert!(matches!(err, PairingError::CodeUsed));
    }

    #[test]
    fn unknown_code_rejected() {
        let (_tmp, db) = open();
        let err =
            prepare_install(&db, GATEWAY_URL, &prepare_request("never-minted-code-xyz")).unwrap_err();
        assert!(matches!(err, PairingError::CodeNotFound));
    }

    #[test]
    fn expired_code_rejected() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let hash = sha256_b64url(generated.code.as_bytes());
        let mut record = ConnectCodeModel::find(&db, &hash).unwrap().unwrap();
        record.expires_at = unix_now() - 1;
        record.save(&db).unwrap();

        let err = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap_err();
        assert!(matches!(err, PairingError::CodeExpired));
    }

    #[test]
    fn approve_activates_app_with_exact_grants() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let prepared = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap();

        let approved = approve_install(&db, &prepared.session_token, &default_grants()).unwrap();

        let app = AppModel::find_by_id(&db, &approved.app_id).unwrap().unwrap();
        assert_eq!(app.status(), AppStatus::Active);

        let permissions = PermissionModel::list_for_app(&db, &app.id).unwrap();
        assert_eq!(permissions.len(), 1);
        assert_eq!(permissions[0].resource_id, "llm:groq");
        assert_eq!(permissions[0].action, "chat.completions");
        assert_eq!(
            permissions[0].rate_limit.as_ref().unwrap().max_requests,
            10
        );
        assert_eq!(
            CredentialModel::active_for_app(&db, &app.id).unwrap().len(),
            1
        );

        let session = InstallSessionModel::find_by_token(&db, &prepared.session_token)
            .unwrap()
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Approved);
        assert_ne!(session.completed_at, 0);
    }

    #[test]
    fn approve_is_single_shot() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let prepared = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap();
        approve_install(&db, &prepared.session_token, &default_grants()).unwrap();

        let err = approve_install(&db, &prepared.session_token, &default_grants()).unwrap_err();
        assert!(matches!(err, PairingError::SessionNotPending));
    }

    #[test]
    fn multiple_actions_share_the_grant_policy() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let prepared = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap();

        let mut grants = default_grants();
        grants[0].actions.push("models.list".into());
        let approved = approve_install(&db, &prepared.session_token, &grants).unwrap();

        let permissions = PermissionModel::list_for_app(&db, &approved.app_id).unwrap();
        assert_eq!(permissions.len(), 2);
        for permission in &permissions {
            assert_eq!(permission.rate_limit.as_ref().unwrap().max_requests, 10);
        }
    }

    #[test]
    fn deny_deletes_pending_app() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let prepared = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap();
        let session = InstallSessionModel::find_by_token(&db, &prepared.session_token)
            .unwrap()
            .unwrap();

        deny_install(&db, &prepared.session_token).unwrap();

        assert!(AppModel::find_by_id(&db, &session.app_id).unwrap().is_none());
        assert!(
            CredentialModel::list_for_app(&db, &session.app_id)
                .unwrap()
                .is_empty()
        );
        let session = InstallSessionModel::find_by_token(&db, &prepared.session_token)
            .unwrap()
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Denied);
    }

    #[test]
    fn cleanup_expires_overdue_sessions_and_codes() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let prepared = prepare_install(&db, GATEWAY_URL, &prepare_request(&generated.code)).unwrap();
        let mut session = InstallSessionModel::find_by_token(&db, &prepared.session_token)
            .unwrap()
            .unwrap();
        session.expires_at = unix_now() - 1;
        session.save(&db).unwrap();

        let hash = sha256_b64url(generated.code.as_bytes());
        let mut code = ConnectCodeModel::find(&db, &hash).unwrap().unwrap();
        code.expires_at = unix_now() - 1;
        code.save(&db).unwrap();

        let stats = cleanup(&db).unwrap();
        assert_eq!(stats.purged_codes, 1);
        assert_eq!(stats.expired_sessions, 1);

        let session = InstallSessionModel::find_by_token(&db, &prepared.session_token)
            .unwrap()
            .unwrap();
        assert_eq!(session.status(), SessionStatus::Expired);
        assert!(AppModel::find_by_id(&db, &session.app_id).unwrap().is_none());
    }

    #[test]
    fn bad_public_key_rejected_at_prepare() {
        let (_tmp, db) = open();
        let generated = generate_pairing(&db, GATEWAY_URL).unwrap();
        let mut request = prepare_request(&generated.code);
        request.public_key = "AAAA".into();
        let err = prepare_install(&db, GATEWAY_URL, &request).unwrap_err();
        assert!(matches!(err, PairingError::InvalidPublicKey));
    }
}
