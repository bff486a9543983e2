//! Row models for every durable entity, with their persistence methods.
//!
//! Rows are prost messages. Flexible sub-objects (plugin constraints, requested
//! permission lists, provider config) are JSON bytes inside the message, read and
//! written through typed accessors.

use gatehouse_core::{ResourceId, unix_now};
use prost::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::StoreError;
use crate::db::{RocksDb, Txn, cf};

// ─── Statuses ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum AppStatus {
    Pending = 0,
    Active = 1,
    Disabled = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum CredentialStatus {
    Active = 0,
    Revoked = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum PermissionStatus {
    Active = 0,
    Expired = 1,
    Revoked = 2,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum SecretStatus {
    Active = 0,
    Disabled = 1,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum SessionStatus {
    Pending = 0,
    Approved = 1,
    Denied = 2,
    Expired = 3,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, prost::Enumeration)]
#[repr(i32)]
pub enum UsagePeriod {
    Daily = 0,
    Monthly = 1,
}

impl UsagePeriod {
    pub fn as_str(self) -> &'static str {
        match self {
            UsagePeriod::Daily => "daily",
            UsagePeriod::Monthly => "monthly",
        }
    }
}

// ─── App ────────────────────────────────────────────────────────────────────

/// A registered client application.
#[derive(prost::Message, Clone)]
pub struct AppModel {
    #[prost(string)]
    pub id: String,
    #[prost(string)]
    pub name: String,
    #[prost(string, optional)]
    pub description: Option<String>,
    #[prost(string, optional)]
    pub homepage: Option<String>,
    #[prost(enumeration = "AppStatus")]
    pub status: i32,
    #[prost(uint64)]
    pub created_at: u64,
    #[prost(uint64)]
    pub updated_at: u64,
}

impl AppModel {
    pub fn new(name: &str, description: Option<String>, homepage: Option<String>) -> Self {
        let now = unix_now();
        AppModel {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            description,
            homepage,
            status: AppStatus::Pending as i32,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> AppStatus {
        AppStatus::try_from(self.status).unwrap_or(AppStatus::Pending)
    }

    pub fn set_status(&mut self, status: AppStatus) {
        self.status = status as i32;
    }

    pub fn find_by_id(db: &RocksDb, id: &str) -> Result<Option<Self>, StoreError> {
        let handle = db.handle(cf::APPS_CF)?;
        db.get_pinned_cf(&handle, id.as_bytes())?
            .map(|bytes| AppModel::decode(bytes.as_ref()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn save(&mut self, db: &RocksDb) -> Result<(), StoreError> {
        self.updated_at = unix_now();
        let handle = db.handle(cf::APPS_CF)?;
        db.put_cf(&handle, self.id.as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    pub fn put_txn(&self, txn: &Txn<'_>, db: &RocksDb) -> Result<(), StoreError> {
        let handle = db.handle(cf::APPS_CF)?;
        txn.put_cf(&handle, self.id.as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    /// Gathers the keys of everything the app owns, for a cascading delete.
    pub fn collect_cascade(db: &RocksDb, app_id: &str) -> Result<CascadeKeys, StoreError> {
        let credential_keys: Vec<Vec<u8>> = CredentialModel::list_for_app(db, app_id)?
            .iter()
            .map(|c| c.key().into_bytes())
            .collect();
        let permissions = PermissionModel::list_for_app(db, app_id)?;
        let permission_keys = permissions
            .iter()
            .map(|p| p.key().into_bytes())
            .collect();

        let mut usage_keys: Vec<Vec<u8>> = Vec::new();
        let usage_handle = db.handle(cf::USAGE_CF)?;
        for permission in &permissions {
            let prefix = format!("{}/", permission.id);
            for item in db.prefix_iterator_cf(&usage_handle, prefix.as_bytes()) {
                let (key, _) = item?;
                if key.starts_with(prefix.as_bytes()) {
                    usage_keys.push(key.to_vec());
                }
            }
        }

        Ok(CascadeKeys {
            credential_keys,
            permission_keys,
            usage_keys,
        })
    }

    /// Deletes the app and the previously collected dependents inside `txn`.
    pub fn delete_in_txn(
        txn: &Txn<'_>,
        db: &RocksDb,
        app_id: &str,
        keys: &CascadeKeys,
    ) -> Result<(), StoreError> {
        let apps = db.handle(cf::APPS_CF)?;
        let creds = db.handle(cf::CREDENTIALS_CF)?;
        let perms = db.handle(cf::PERMISSIONS_CF)?;
        let usage = db.handle(cf::USAGE_CF)?;

        txn.delete_cf(&apps, app_id.as_bytes())?;
        for key in &keys.credential_keys {
            txn.delete_cf(&creds, key)?;
        }
        for key in &keys.permission_keys {
            txn.delete_cf(&perms, key)?;
        }
        for key in &keys.usage_keys {
            txn.delete_cf(&usage, key)?;
        }
        Ok(())
    }

    /// Deletes the app together with its credentials, permissions, and the usage
    /// rows of those permissions.
    pub fn delete_cascade(db: &RocksDb, app_id: &str) -> Result<(), StoreError> {
        let keys = Self::collect_cascade(db, app_id)?;
        db.with_txn(|txn| Self::delete_in_txn(txn, db, app_id, &keys))
    }
}

/// Keys of an app's dependent rows, gathered ahead of a cascading delete.
#[derive(Debug, Default, Clone)]
pub struct CascadeKeys {
    pub credential_keys: Vec<Vec<u8>>,
    pub permission_keys: Vec<Vec<u8>>,
    pub usage_keys: Vec<Vec<u8>>,
}

// ─── AppCredential ──────────────────────────────────────────────────────────

/// A public key that may sign requests for an app.
#[derive(prost::Message, Clone)]
pub struct CredentialModel {
    #[prost(string)]
    pub id: String,
    #[prost(string)]
    pub app_id: String,
    /// Raw Ed25519 verification key, 32 bytes.
    #[prost(bytes)]
    pub public_key: Vec<u8>,
    #[prost(string)]
    pub label: String,
    #[prost(enumeration = "CredentialStatus")]
    pub status: i32,
    #[prost(uint64)]
    pub created_at: u64,
    #[prost(uint64)]
    pub updated_at: u64,
}

impl CredentialModel {
    pub fn new(app_id: &str, public_key: Vec<u8>, label: &str) -> Self {
        let now = unix_now();
        CredentialModel {
            id: Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            public_key,
            label: label.to_string(),
            status: CredentialStatus::Active as i32,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> CredentialStatus {
        CredentialStatus::try_from(self.status).unwrap_or(CredentialStatus::Active)
    }

    pub fn set_status(&mut self, status: CredentialStatus) {
        self.status = status as i32;
    }

    pub fn key(&self) -> String {
        format!("{}/{}", self.app_id, self.id)
    }

    pub fn list_for_app(db: &RocksDb, app_id: &str) -> Result<Vec<Self>, StoreError> {
        let handle = db.handle(cf::CREDENTIALS_CF)?;
        let prefix = format!("{app_id}/");
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&handle, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push(CredentialModel::decode(&*value)?);
        }
        Ok(out)
    }

    /// The credentials that may currently sign for the app.
    pub fn active_for_app(db: &RocksDb, app_id: &str) -> Result<Vec<Self>, StoreError> {
        Ok(Self::list_for_app(db, app_id)?
            .into_iter()
            .filter(|c| c.status() == CredentialStatus::Active)
            .collect())
    }

    pub fn save(&mut self, db: &RocksDb) -> Result<(), StoreError> {
        self.updated_at = unix_now();
        let handle = db.handle(cf::CREDENTIALS_CF)?;
        db.put_cf(&handle, self.key().as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    pub fn put_txn(&self, txn: &Txn<'_>, db: &RocksDb) -> Result<(), StoreError> {
        let handle = db.handle(cf::CREDENTIALS_CF)?;
        txn.put_cf(&handle, self.key().as_bytes(), self.encode_to_vec())?;
        Ok(())
    }
}

// ─── ResourcePermission ─────────────────────────────────────────────────────

/// Local-time window in which a permission is usable. Hours are inclusive start,
/// exclusive end; `start > end` wraps past midnight. `allowed_days` uses
/// 0=Sunday..6=Saturday; empty means every day.
#[derive(prost::Message, Clone, PartialEq)]
pub struct TimeWindowModel {
    #[prost(uint32)]
    pub start_hour: u32,
    #[prost(uint32)]
    pub end_hour: u32,
    #[prost(string)]
    pub timezone: String,
    #[prost(uint32, repeated)]
    pub allowed_days: Vec<u32>,
}

/// Fixed-window rate limit.
#[derive(prost::Message, Clone, PartialEq)]
pub struct RateLimitModel {
    #[prost(uint64)]
    pub max_requests: u64,
    #[prost(uint64)]
    pub window_seconds: u64,
}

/// Grant of `(app, resource, action)` with its embedded access policy.
///
/// Quota and budget fields use `0` for "unlimited".
#[derive(prost::Message, Clone)]
pub struct PermissionModel {
    #[prost(string)]
    pub id: String,
    #[prost(string)]
    pub app_id: String,
    #[prost(string)]
    pub resource_id: String,
    #[prost(string)]
    pub action: String,
    /// Seconds since epoch; 0 = valid immediately.
    #[prost(uint64)]
    pub valid_from: u64,
    /// Seconds since epoch; 0 = never expires.
    #[prost(uint64)]
    pub expires_at: u64,
    #[prost(message, optional)]
    pub time_window: Option<TimeWindowModel>,
    #[prost(message, optional)]
    pub rate_limit: Option<RateLimitModel>,
    #[prost(uint64)]
    pub daily_quota: u64,
    #[prost(uint64)]
    pub monthly_quota: u64,
    #[prost(uint64)]
    pub daily_token_budget: u64,
    #[prost(uint64)]
    pub monthly_token_budget: u64,
    /// Plugin-specific constraints as JSON.
    #[prost(bytes)]
    pub constraints: Vec<u8>,
    #[prost(enumeration = "PermissionStatus")]
    pub status: i32,
    #[prost(uint64)]
    pub created_at: u64,
    #[prost(uint64)]
    pub updated_at: u64,
}

impl PermissionModel {
    pub fn new(app_id: &str, resource_id: &ResourceId, action: &str) -> Self {
        let now = unix_now();
        PermissionModel {
            id: Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            resource_id: resource_id.to_string(),
            action: action.to_string(),
            valid_from: 0,
            expires_at: 0,
            time_window: None,
            rate_limit: None,
            daily_quota: 0,
            monthly_quota: 0,
            daily_token_budget: 0,
            monthly_token_budget: 0,
            constraints: Vec::new(),
            status: PermissionStatus::Active as i32,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> PermissionStatus {
        PermissionStatus::try_from(self.status).unwrap_or(PermissionStatus::Active)
    }

    pub fn set_status(&mut self, status: PermissionStatus) {
        self.status = status as i32;
    }

    pub fn constraints_json(&self) -> serde_json::Value {
        if self.constraints.is_empty() {
            serde_json::Value::Object(serde_json::Map::new())
        } else {
            serde_json::from_slice(&self.constraints)
                .unwrap_or_else(|_| serde_json::Value::Object(serde_json::Map::new()))
        }
    }

    pub fn set_constraints(&mut self, value: &serde_json::Value) {
        self.constraints = serde_json::to_vec(value).unwrap_or_default();
    }

    fn validate(&self) -> Result<(), StoreError> {
        self.resource_id.parse::<ResourceId>()?;
        if self.app_id.is_empty() {
            return Err(StoreError::InvalidField("app_id"));
        }
        if self.action.is_empty() || self.action.contains('/') {
            return Err(StoreError::InvalidField("action"));
        }
        Ok(())
    }

    pub fn key(&self) -> String {
        format!("{}/{}/{}", self.app_id, self.resource_id, self.action)
    }

    fn key_for(app_id: &str, resource_id: &ResourceId, action: &str) -> String {
        format!("{app_id}/{resource_id}/{action}")
    }

    pub fn find(
        db: &RocksDb,
        app_id: &str,
        resource_id: &ResourceId,
        action: &str,
    ) -> Result<Option<Self>, StoreError> {
        let handle = db.handle(cf::PERMISSIONS_CF)?;
        let key = Self::key_for(app_id, resource_id, action);
        db.get_pinned_cf(&handle, key.as_bytes())?
            .map(|bytes| PermissionModel::decode(bytes.as_ref()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn list_for_app(db: &RocksDb, app_id: &str) -> Result<Vec<Self>, StoreError> {
        let handle = db.handle(cf::PERMISSIONS_CF)?;
        let prefix = format!("{app_id}/");
        let mut out = Vec::new();
        for item in db.prefix_iterator_cf(&handle, prefix.as_bytes()) {
            let (key, value) = item?;
            if !key.starts_with(prefix.as_bytes()) {
                break;
            }
            out.push(PermissionModel::decode(&*value)?);
        }
        Ok(out)
    }

    pub fn save(&mut self, db: &RocksDb) -> Result<(), StoreError> {
        self.validate()?;
        self.updated_at = unix_now();
        let handle = db.handle(cf::PERMISSIONS_CF)?;
        db.put_cf(&handle, self.key().as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    pub fn put_txn(&self, txn: &Txn<'_>, db: &RocksDb) -> Result<(), StoreError> {
        self.validate()?;
        let handle = db.handle(cf::PERMISSIONS_CF)?;
        txn.put_cf(&handle, self.key().as_bytes(), self.encode_to_vec())?;
        Ok(())
    }
}

// ─── PermissionUsage ────────────────────────────────────────────────────────

/// Additions applied to a usage row after a successful request.
#[derive(Debug, Clone, Copy, Default)]
pub struct UsageDelta {
    pub requests: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub total_tokens: u64,
}

/// Per-permission counters for one accounting period.
#[derive(prost::Message, Clone)]
pub struct UsageModel {
    #[prost(string)]
    pub permission_id: String,
    #[prost(enumeration = "UsagePeriod")]
    pub period_type: i32,
    /// `YYYY-MM-DD` for daily rows, `YYYY-MM` for monthly, UTC.
    #[prost(string)]
    pub period_start: String,
    #[prost(uint64)]
    pub request_count: u64,
    #[prost(uint64)]
    pub input_tokens: u64,
    #[prost(uint64)]
    pub output_tokens: u64,
    #[prost(uint64)]
    pub total_tokens: u64,
    #[prost(uint64)]
    pub updated_at: u64,
}

impl UsageModel {
    pub fn period_type(&self) -> UsagePeriod {
        UsagePeriod::try_from(self.period_type).unwrap_or(UsagePeriod::Daily)
    }

    fn key_for(permission_id: &str, period: UsagePeriod, period_key: &str) -> String {
        format!("{permission_id}/{}/{period_key}", period.as_str())
    }

    pub fn load(
        db: &RocksDb,
        permission_id: &str,
        period: UsagePeriod,
        period_key: &str,
    ) -> Result<Option<Self>, StoreError> {
        let handle = db.handle(cf::USAGE_CF)?;
        let key = Self::key_for(permission_id, period, period_key);
        db.get_pinned_cf(&handle, key.as_bytes())?
            .map(|bytes| UsageModel::decode(bytes.as_ref()))
            .transpose()
            .map_err(Into::into)
    }

    /// Upserts the row for `(permission, period, period_key)`, adding `delta` to
    /// its counters.
    pub fn add(
        db: &RocksDb,
        permission_id: &str,
        period: UsagePeriod,
        period_key: &str,
        delta: UsageDelta,
    ) -> Result<(), StoreError> {
        let key = Self::key_for(permission_id, period, period_key);
        db.with_txn(|txn| {
            let handle = db.handle(cf::USAGE_CF)?;
            let mut row = match txn.get_for_update_cf(&handle, key.as_bytes(), true)? {
                Some(bytes) => UsageModel::decode(bytes.as_slice())?,
                None => UsageModel {
                    permission_id: permission_id.to_string(),
                    period_type: period as i32,
                    period_start: period_key.to_string(),
                    request_count: 0,
                    input_tokens: 0,
                    output_tokens: 0,
                    total_tokens: 0,
                    updated_at: 0,
                },
            };
            row.request_count = row.request_count.saturating_add(delta.requests);
            row.input_tokens = row.input_tokens.saturating_add(delta.input_tokens);
            row.output_tokens = row.output_tokens.saturating_add(delta.output_tokens);
            row.total_tokens = row.total_tokens.saturating_add(delta.total_tokens);
            row.updated_at = unix_now();
            txn.put_cf(&handle, key.as_bytes(), row.encode_to_vec())?;
            Ok(())
        })
    }
}

// ─── ResourceSecret ─────────────────────────────────────────────────────────

/// Encrypted upstream credential for a resource.
#[derive(prost::Message, Clone)]
pub struct SecretModel {
    #[prost(string)]
    pub resource_id: String,
    #[prost(string)]
    pub name: String,
    #[prost(string)]
    pub resource_type: String,
    /// Base64 AES-GCM ciphertext with the tag appended.
    #[prost(string)]
    pub encrypted_key: String,
    /// Base64 16-byte IV.
    #[prost(string)]
    pub key_iv: String,
    /// Non-secret per-provider configuration, JSON.
    #[prost(bytes)]
    pub config: Vec<u8>,
    #[prost(enumeration = "SecretStatus")]
    pub status: i32,
    #[prost(uint64)]
    pub created_at: u64,
    #[prost(uint64)]
    pub updated_at: u64,
}

impl SecretModel {
    pub fn new(resource_id: &ResourceId, name: &str, encrypted_key: String, key_iv: String) -> Self {
        let now = unix_now();
        SecretModel {
            resource_id: resource_id.to_string(),
            name: name.to_string(),
            resource_type: resource_id.resource_type().to_string(),
            encrypted_key,
            key_iv,
            config: Vec::new(),
            status: SecretStatus::Active as i32,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SecretStatus {
        SecretStatus::try_from(self.status).unwrap_or(SecretStatus::Active)
    }

    pub fn set_status(&mut self, status: SecretStatus) {
        self.status = status as i32;
    }

    pub fn config_json(&self) -> Option<serde_json::Value> {
        if self.config.is_empty() {
            None
        } else {
            serde_json::from_slice(&self.config).ok()
        }
    }

    pub fn set_config(&mut self, value: &serde_json::Value) {
        self.config = serde_json::to_vec(value).unwrap_or_default();
    }

    pub fn find(db: &RocksDb, resource_id: &ResourceId) -> Result<Option<Self>, StoreError> {
        let handle = db.handle(cf::SECRETS_CF)?;
        db.get_pinned_cf(&handle, resource_id.to_string().as_bytes())?
            .map(|bytes| SecretModel::decode(bytes.as_ref()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn save(&mut self, db: &RocksDb) -> Result<(), StoreError> {
        self.resource_id.parse::<ResourceId>()?;
        self.updated_at = unix_now();
        let handle = db.handle(cf::SECRETS_CF)?;
        db.put_cf(&handle, self.resource_id.as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    pub fn delete(db: &RocksDb, resource_id: &ResourceId) -> Result<(), StoreError> {
        let handle = db.handle(cf::SECRETS_CF)?;
        db.delete_cf(&handle, resource_id.to_string().as_bytes())?;
        Ok(())
    }
}

// ─── ConnectCode ────────────────────────────────────────────────────────────

/// One-time pairing token; only the hash of the code is stored.
#[derive(prost::Message, Clone)]
pub struct ConnectCodeModel {
    /// base64url SHA-256 of the plaintext code.
    #[prost(string)]
    pub code_hash: String,
    #[prost(uint64)]
    pub expires_at: u64,
    /// 0 = not yet used.
    #[prost(uint64)]
    pub used_at: u64,
    #[prost(uint64)]
    pub created_at: u64,
}

impl ConnectCodeModel {
    pub fn new(code_hash: &str, expires_at: u64) -> Self {
        ConnectCodeModel {
            code_hash: code_hash.to_string(),
            expires_at,
            used_at: 0,
            created_at: unix_now(),
        }
    }

    pub fn is_used(&self) -> bool {
        self.used_at != 0
    }

    pub fn find(db: &RocksDb, code_hash: &str) -> Result<Option<Self>, StoreError> {
        let handle = db.handle(cf::CONNECT_CODES_CF)?;
        db.get_pinned_cf(&handle, code_hash.as_bytes())?
            .map(|bytes| ConnectCodeModel::decode(bytes.as_ref()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn save(&self, db: &RocksDb) -> Result<(), StoreError> {
        let handle = db.handle(cf::CONNECT_CODES_CF)?;
        db.put_cf(&handle, self.code_hash.as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    pub fn put_txn(&self, txn: &Txn<'_>, db: &RocksDb) -> Result<(), StoreError> {
        let handle = db.handle(cf::CONNECT_CODES_CF)?;
        txn.put_cf(&handle, self.code_hash.as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    /// Deletes codes past their expiry, returning how many were removed.
    pub fn purge_expired(db: &RocksDb, now: u64) -> Result<u64, StoreError> {
        let handle = db.handle(cf::CONNECT_CODES_CF)?;
        let mut removed = 0u64;
        for item in db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (key, value) = item?;
            let code = ConnectCodeModel::decode(&*value)?;
            if code.expires_at < now {
                db.delete_cf(&handle, &key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

// ─── InstallSession ─────────────────────────────────────────────────────────

/// A permission requested during install: a resource and the actions wanted on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestedPermission {
    pub resource_id: String,
    pub actions: Vec<String>,
}

/// An in-progress approval handshake for a PENDING app.
#[derive(prost::Message, Clone)]
pub struct InstallSessionModel {
    #[prost(string)]
    pub id: String,
    #[prost(string)]
    pub app_id: String,
    #[prost(string)]
    pub session_token: String,
    /// JSON list of [`RequestedPermission`].
    #[prost(bytes)]
    pub requested_permissions: Vec<u8>,
    #[prost(string)]
    pub redirect_uri: String,
    #[prost(uint64)]
    pub expires_at: u64,
    #[prost(enumeration = "SessionStatus")]
    pub status: i32,
    /// 0 until the session reaches a terminal state.
    #[prost(uint64)]
    pub completed_at: u64,
    #[prost(uint64)]
    pub created_at: u64,
    #[prost(uint64)]
    pub updated_at: u64,
}

impl InstallSessionModel {
    pub fn new(
        app_id: &str,
        session_token: &str,
        requested: &[RequestedPermission],
        redirect_uri: &str,
        expires_at: u64,
    ) -> Self {
        let now = unix_now();
        InstallSessionModel {
            id: Uuid::new_v4().to_string(),
            app_id: app_id.to_string(),
            session_token: session_token.to_string(),
            requested_permissions: serde_json::to_vec(requested).unwrap_or_default(),
            redirect_uri: redirect_uri.to_string(),
            expires_at,
            status: SessionStatus::Pending as i32,
            completed_at: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus::try_from(self.status).unwrap_or(SessionStatus::Pending)
    }

    pub fn set_status(&mut self, status: SessionStatus) {
        self.status = status as i32;
    }

    pub fn requested(&self) -> Vec<RequestedPermission> {
        serde_json::from_slice(&self.requested_permissions).unwrap_or_default()
    }

    pub fn find_by_token(db: &RocksDb, session_token: &str) -> Result<Option<Self>, StoreError> {
        let handle = db.handle(cf::SESSIONS_CF)?;
        db.get_pinned_cf(&handle, session_token.as_bytes())?
            .map(|bytes| InstallSessionModel::decode(bytes.as_ref()))
            .transpose()
            .map_err(Into::into)
    }

    pub fn save(&mut self, db: &RocksDb) -> Result<(), StoreError> {
        self.updated_at = unix_now();
        let handle = db.handle(cf::SESSIONS_CF)?;
        db.put_cf(&handle, self.session_token.as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    pub fn put_txn(&self, txn: &Txn<'_>, db: &RocksDb) -> Result<(), StoreError> {
        let handle = db.handle(cf::SESSIONS_CF)?;
        txn.put_cf(&handle, self.session_token.as_bytes(), self.encode_to_vec())?;
        Ok(())
    }

    /// PENDING sessions whose expiry has passed.
    pub fn expired_pending(db: &RocksDb, now: u64) -> Result<Vec<Self>, StoreError> {
        let handle = db.handle(cf::SESSIONS_CF)?;
        let mut out = Vec::new();
        for item in db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (_, value) = item?;
            let session = InstallSessionModel::decode(&*value)?;
            if session.status() == SessionStatus::Pending && session.expires_at < now {
                out.push(session);
            }
        }
        Ok(out)
    }
}
