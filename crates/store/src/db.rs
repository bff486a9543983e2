use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

use rocksdb::ColumnFamilyDescriptor;
use serde::{Deserialize, Serialize};

use crate::StoreError;

type MultiThreadedRocksDb = rocksdb::OptimisticTransactionDB<rocksdb::MultiThreaded>;

/// An open optimistic transaction against the database.
pub type Txn<'a> = rocksdb::Transaction<'a, MultiThreadedRocksDb>;

const MAX_TXN_RETRIES: usize = 10;

/// RocksDB instance
///
/// This is cheap to clone, as it uses an [`Arc`] internally.
#[derive(Debug, Clone)]
pub struct RocksDb {
    db: Arc<MultiThreadedRocksDb>,
}

impl std::ops::Deref for RocksDb {
    type Target = Arc<MultiThreadedRocksDb>;

    fn deref(&self) -> &Self::Target {
        &self.db
    }
}

impl RocksDb {
    pub fn open<P>(path: P, config: &RocksDbConfig) -> Result<Self, StoreError>
    where
        P: AsRef<Path>,
    {
        let mut db_opts = rocksdb::Options::default();
        db_opts.create_if_missing(config.create_if_missing);
        db_opts.create_missing_column_families(config.create_missing_column_families);
        db_opts.increase_parallelism(config.parallelism);
        db_opts.set_write_buffer_size(config.write_buffer_size);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_allow_mmap_reads(true);
        db_opts.set_allow_mmap_writes(true);

        if let Some(max_background_jobs) = config.max_background_jobs {
            db_opts.set_max_background_jobs(max_background_jobs);
        }
        if let Some(compaction_style) = &config.compaction_style {
            db_opts.set_compaction_style(compaction_style_from_str(compaction_style)?);
        }
        if let Some(compression_type) = &config.compression_type {
            db_opts.set_compression_type(compression_type_from_str(compression_type)?);
        }

        let db = MultiThreadedRocksDb::open_cf_descriptors(
            &db_opts,
            path,
            [
                ColumnFamilyDescriptor::new(cf::APPS_CF, db_opts.clone()),
                ColumnFamilyDescriptor::new(cf::CREDENTIALS_CF, db_opts.clone()),
                ColumnFamilyDescriptor::new(cf::PERMISSIONS_CF, db_opts.clone()),
                ColumnFamilyDescriptor::new(cf::USAGE_CF, db_opts.clone()),
                ColumnFamilyDescriptor::new(cf::SECRETS_CF, db_opts.clone()),
                ColumnFamilyDescriptor::new(cf::CONNECT_CODES_CF, db_opts.clone()),
                ColumnFamilyDescriptor::new(cf::SESSIONS_CF, db_opts.clone()),
                ColumnFamilyDescriptor::new(cf::KV_CF, db_opts.clone()),
            ],
        )?;
        Ok(Self { db: Arc::new(db) })
    }

    /// Runs `f` inside an optimistic transaction, retrying the whole closure on
    /// commit conflicts.
    ///
    /// `f` must be idempotent: it can run more than once before a commit lands.
    pub fn with_txn<T, F>(&self, f: F) -> Result<T, StoreError>
    where
        F: Fn(&Txn<'_>) -> Result<T, StoreError>,
    {
        let mut retries = 0;
        loop {
            let txn = self.db.transaction();
            let out = f(&txn)?;
            match txn.commit() {
                Ok(()) => return Ok(out),
                Err(e)
                    if matches!(
                        e.kind(),
                        rocksdb::ErrorKind::Busy | rocksdb::ErrorKind::TryAgain
                    ) =>
                {
                    retries += 1;
                    if retries >= MAX_TXN_RETRIES {
                        return Err(StoreError::TransactionContention);
                    }
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Resolves a column-family handle or fails with the family's name.
    pub fn handle(
        &self,
        name: &'static str,
    ) -> Result<Arc<rocksdb::BoundColumnFamily<'_>>, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or(StoreError::UnknownColumnFamily(name))
    }
}

/// Column family names
pub mod cf {
    /// Registered apps, keyed by app id.
    pub const APPS_CF: &str = "apps";
    /// App signing credentials, keyed by `<app_id>/<credential_id>`.
    pub const CREDENTIALS_CF: &str = "app_credentials";
    /// Resource permissions, keyed by `<app_id>/<resource_id>/<action>`.
    pub const PERMISSIONS_CF: &str = "permissions";
    /// Usage counters, keyed by `<permission_id>/<period_type>/<period_key>`.
    pub const USAGE_CF: &str = "permission_usage";
    /// Encrypted upstream secrets, keyed by resource id.
    pub const SECRETS_CF: &str = "resource_secrets";
    /// One-time pairing codes, keyed by the base64url SHA-256 of the code.
    pub const CONNECT_CODES_CF: &str = "connect_codes";
    /// In-progress install sessions, keyed by session token.
    pub const SESSIONS_CF: &str = "install_sessions";
    /// TTL'd key-value data (nonces, rate counters, model aggregates).
    pub const KV_CF: &str = "kv";
}

/// RocksDbConfig is used to configure RocksDb.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RocksDbConfig {
    pub create_if_missing: bool,
    pub create_missing_column_families: bool,
    pub parallelism: i32,
    pub write_buffer_size: usize,
    pub max_open_files: i32,
    pub max_background_jobs: Option<i32>,
    pub compression_type: Option<String>,
    pub compaction_style: Option<String>,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            create_if_missing: true,
            create_missing_column_families: true,
            parallelism: std::thread::available_parallelism()
                .unwrap_or(NonZeroUsize::new(1).unwrap())
                .saturating_mul(NonZeroUsize::new(2).unwrap())
                .get() as i32,
            write_buffer_size: 64 * 1024 * 1024,
            max_open_files: 1024,
            max_background_jobs: None,
            compaction_style: None,
            compression_type: Some("none".into()),
        }
    }
}

/// Converts string to a compaction style RocksDB variant.
pub(crate) fn compaction_style_from_str(
    s: &str,
) -> Result<rocksdb::DBCompactionStyle, StoreError> {
    match s.to_lowercase().as_str() {
        "level" => Ok(rocksdb::DBCompactionStyle::Level),
        "universal" => Ok(rocksdb::DBCompactionStyle::Universal),
        "fifo" => Ok(rocksdb::DBCompactionStyle::Fifo),
        _ => Err(StoreError::InvalidDbCompactionStyle(s.into())),
    }
}

/// Converts string to a compression type RocksDB variant.
pub(crate) fn compression_type_from_str(
    s: &str,
) -> Result<rocksdb::DBCompressionType, StoreError> {
    match s.to_lowercase().as_str() {
        "bz2" => Ok(rocksdb::DBCompressionType::Bz2),
        "lz4" => Ok(rocksdb::DBCompressionType::Lz4),
        "lz4hc" => Ok(rocksdb::DBCompressionType::Lz4hc),
        "snappy" => Ok(rocksdb::DBCompressionType::Snappy),
        "zlib" => Ok(rocksdb::DBCompressionType::Zlib),
        "zstd" => Ok(rocksdb::DBCompressionType::Zstd),
        "none" => Ok(rocksdb::DBCompressionType::None),
        _ => Err(StoreError::InvalidDbCompressionType(s.into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let config = RocksDbConfig::default();
        assert!(config.create_if_missing);
        assert!(config.create_missing_column_families);
        assert_eq!(config.compression_type, Some("none".to_string()));
        assert!(config.parallelism >= 1);
    }

    #[test]
    fn open_creates_all_column_families() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let db = RocksDb::open(tmp_dir.path(), &RocksDbConfig::default()).unwrap();

        for name in [
            cf::APPS_CF,
            cf::CREDENTIALS_CF,
            cf::PERMISSIONS_CF,
            cf::USAGE_CF,
            cf::SECRETS_CF,
            cf::CONNECT_CODES_CF,
            cf::SESSIONS_CF,
            cf::KV_CF,
        ] {
            assert!(db.cf_handle(name).is_some(), "missing column family {name}");
        }
    }

    #[test]
    fn compression_types() {
        assert!(compression_type_from_str("none").is_ok());
        assert!(compression_type_from_str("LZ4").is_ok());
        assert!(compression_type_from_str("zstd").is_ok());
        assert!(compression_type_from_str("invalid_compression").is_err());
    }

    #[test]
    fn compaction_styles() {
        assert!(compaction_style_from_str("level").is_ok());
        assert!(compaction_style_from_str("Universal").is_ok());
        assert!(compaction_style_from_str("invalid_compaction").is_err());
    }

    #[test]
    fn with_txn_commits() {
        let tmp_dir = tempfile::tempdir().unwrap();
        let db = RocksDb::open(tmp_dir.path(), &RocksDbConfig::default()).unwrap();
        let apps = db.handle(cf::APPS_CF).unwrap();

        db.with_txn(|txn| {
            txn.put_cf(&apps, b"k", b"v")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(db.get_cf(&apps, b"k").unwrap().unwrap(), b"v");
    }
}
