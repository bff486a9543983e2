//! Durable entities and TTL'd key-value state for the Gatehouse gateway.
//!
//! Durable rows (apps, credentials, permissions, usage, secrets, pairing state)
//! are prost messages in per-entity RocksDB column families. Volatile counters
//! (nonces, rate windows, per-model aggregates) live in a dedicated `kv` family
//! with explicit expiry.

/// The RocksDB handle and column-family names.
pub mod db;
/// TTL-aware key-value operations on the `kv` column family.
pub mod kv;
/// Row models with their persistence methods.
pub mod models;

pub use db::{RocksDb, RocksDbConfig, cf};
pub use kv::KvStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error(transparent)]
    RocksDb(#[from] rocksdb::Error),

    #[error("unknown database column family: {0}")]
    UnknownColumnFamily(&'static str),

    #[error(transparent)]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    InvalidResourceId(#[from] gatehouse_core::ResourceIdParseError),

    #[error("invalid row field: {0}")]
    InvalidField(&'static str),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error("transaction kept conflicting after retries")]
    TransactionContention,

    #[error("invalid database compaction style: {0}")]
    InvalidDbCompactionStyle(String),

    #[error("invalid database compression type: {0}")]
    InvalidDbCompressionType(String),
}
