//! TTL-aware operations on the `kv` column family.
//!
//! Every entry is stored as an 8-byte big-endian expiry timestamp (seconds since
//! the epoch, `0` = never) followed by the payload. Reads treat an expired entry
//! as absent and delete it; [`KvStore::sweep_expired`] removes the remainder from
//! the periodic cleanup task.

use std::time::Duration;

use gatehouse_core::unix_now;

use crate::db::{RocksDb, cf};
use crate::StoreError;

const EXPIRY_PREFIX_LEN: usize = 8;

/// Handle over the TTL'd key-value family. Cheap to clone.
#[derive(Debug, Clone)]
pub struct KvStore {
    db: RocksDb,
}

fn encode_entry(expires_at: u64, payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(EXPIRY_PREFIX_LEN + payload.len());
    out.extend_from_slice(&expires_at.to_be_bytes());
    out.extend_from_slice(payload);
    out
}

fn decode_entry(raw: &[u8], now: u64) -> Option<&[u8]> {
    if raw.len() < EXPIRY_PREFIX_LEN {
        return None;
    }
    let mut expiry = [0u8; EXPIRY_PREFIX_LEN];
    expiry.copy_from_slice(&raw[..EXPIRY_PREFIX_LEN]);
    let expires_at = u64::from_be_bytes(expiry);
    if expires_at != 0 && expires_at <= now {
        return None;
    }
    Some(&raw[EXPIRY_PREFIX_LEN..])
}

fn expiry_for(ttl: Duration) -> u64 {
    unix_now().saturating_add(ttl.as_secs())
}

impl KvStore {
    pub fn new(db: RocksDb) -> Self {
        KvStore { db }
    }

    /// Stores `payload` under `key` with the given time to live.
    pub fn put(&self, key: &str, payload: &[u8], ttl: Duration) -> Result<(), StoreError> {
        let handle = self.db.handle(cf::KV_CF)?;
        self.db
            .put_cf(&handle, key.as_bytes(), encode_entry(expiry_for(ttl), payload))?;
        Ok(())
    }

    /// Fetches a live entry. Expired entries are dropped on read.
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let handle = self.db.handle(cf::KV_CF)?;
        let Some(raw) = self.db.get_pinned_cf(&handle, key.as_bytes())? else {
            return Ok(None);
        };
        let live = decode_entry(&raw, unix_now()).map(<[u8]>::to_vec);
        drop(raw);
        match live {
            Some(payload) => Ok(Some(payload)),
            None => {
                self.db.delete_cf(&handle, key.as_bytes())?;
                Ok(None)
            }
        }
    }

    pub fn delete(&self, key: &str) -> Result<(), StoreError> {
        let handle = self.db.handle(cf::KV_CF)?;
        self.db.delete_cf(&handle, key.as_bytes())?;
        Ok(())
    }

    /// Atomically claims `key` if it has no live entry. Returns `true` when this
    /// caller won the claim.
    pub fn set_if_absent(
        &self,
        key: &str,
        payload: &[u8],
        ttl: Duration,
    ) -> Result<bool, StoreError> {
        let now = unix_now();
        let entry = encode_entry(now.saturating_add(ttl.as_secs()), payload);
        self.db.with_txn(|txn| {
            let handle = self.db.handle(cf::KV_CF)?;
            let existing = txn.get_for_update_cf(&handle, key.as_bytes(), true)?;
            if let Some(raw) = &existing {
                if decode_entry(raw, now).is_some() {
                    return Ok(false);
                }
            }
            txn.put_cf(&handle, key.as_bytes(), &entry)?;
            Ok(true)
        })
    }

    /// Atomically adds `by` to the u64 counter at `key` and returns the
    /// post-increment value. The TTL is applied only when the counter is created,
    /// so a fixed window keeps its original expiry.
    pub fn incr(&self, key: &str, by: u64, ttl: Duration) -> Result<u64, StoreError> {
        let now = unix_now();
        self.db.with_txn(|txn| {
            let handle = self.db.handle(cf::KV_CF)?;
            let existing = txn.get_for_update_cf(&handle, key.as_bytes(), true)?;
            let (expires_at, current) = match existing.as_deref().and_then(|raw| {
                decode_entry(raw, now).map(|payload| (&raw[..EXPIRY_PREFIX_LEN], payload))
            }) {
                Some((expiry, payload)) => {
                    let mut buf = [0u8; EXPIRY_PREFIX_LEN];
                    buf.copy_from_slice(expiry);
                    (u64::from_be_bytes(buf), decode_u64(payload))
                }
                None => (now.saturating_add(ttl.as_secs()), 0),
            };
            let next = current.saturating_add(by);
            txn.put_cf(
                &handle,
                key.as_bytes(),
                encode_entry(expires_at, &next.to_be_bytes()),
            )?;
            Ok(next)
        })
    }

    /// Reads a counter previously written by [`incr`](Self::incr).
    pub fn counter(&self, key: &str) -> Result<u64, StoreError> {
        Ok(self.get(key)?.map(|p| decode_u64(&p)).unwrap_or(0))
    }

    /// Adds `member` to the JSON string-set at `key`, creating it when absent.
    pub fn add_to_set(&self, key: &str, member: &str, ttl: Duration) -> Result<(), StoreError> {
        let now = unix_now();
        self.db.with_txn(|txn| {
            let handle = self.db.handle(cf::KV_CF)?;
            let existing = txn.get_for_update_cf(&handle, key.as_bytes(), true)?;
            let (expires_at, mut members): (u64, Vec<String>) = match existing
                .as_deref()
                .and_then(|raw| decode_entry(raw, now).map(|p| (&raw[..EXPIRY_PREFIX_LEN], p)))
            {
                Some((expiry, payload)) => {
                    let mut buf = [0u8; EXPIRY_PREFIX_LEN];
                    buf.copy_from_slice(expiry);
                    (
                        u64::from_be_bytes(buf),
                        serde_json::from_slice(payload).unwrap_or_default(),
                    )
                }
                None => (now.saturating_add(ttl.as_secs()), Vec::new()),
            };
            if !members.iter().any(|m| m == member) {
                members.push(member.to_string());
            }
            let payload = serde_json::to_vec(&members)?;
            txn.put_cf(&handle, key.as_bytes(), encode_entry(expires_at, &payload))?;
            Ok(())
        })
    }

    /// Reads the JSON string-set at `key`.
    pub fn get_set(&self, key: &str) -> Result<Vec<String>, StoreError> {
        match self.get(key)? {
            Some(payload) => Ok(serde_json::from_slice(&payload).unwrap_or_default()),
            None => Ok(Vec::new()),
        }
    }

    /// Deletes every expired entry, returning how many were removed.
    pub fn sweep_expired(&self) -> Result<u64, StoreError> {
        let handle = self.db.handle(cf::KV_CF)?;
        let now = unix_now();
        let mut removed = 0u64;
        for item in self.db.iterator_cf(&handle, rocksdb::IteratorMode::Start) {
            let (key, value) = item?;
            if decode_entry(&value, now).is_none() {
                self.db.delete_cf(&handle, &key)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn decode_u64(payload: &[u8]) -> u64 {
    payload
        .try_into()
        .ok()
        .map(u64::from_be_bytes)
        .unwrap_or(0)
}
