//! The Gatehouse resource gateway.
//!
//! Composes the verifier, policy engine, vault, and plugin registry into the
//! request pipeline, and exposes the pairing and rotation endpoints around it.

use std::sync::Arc;

use gatehouse_auth::pop::PopVerifier;
use gatehouse_plugins::PluginRegistry;
use gatehouse_policy::PolicyEngine;
use gatehouse_store::{KvStore, RocksDb};
use gatehouse_vault::Vault;

/// Periodic expiry of pairing state and counters.
pub mod cleanup;
pub mod config;
pub mod error;
/// The resource request pipeline.
pub mod pipeline;
pub mod routes;

pub use config::GatewayConfig;
pub use error::ApiError;
pub use routes::router;

/// Shared state behind every handler. Cheap to clone; the registry and vault
/// are built once at startup and never mutated afterwards.
#[derive(Clone)]
pub struct AppState {
    pub db: RocksDb,
    pub kv: KvStore,
    pub vault: Arc<Vault>,
    pub registry: Arc<PluginRegistry>,
    pub config: Arc<GatewayConfig>,
}

impl AppState {
    pub fn new(
        db: RocksDb,
        vault: Vault,
        registry: PluginRegistry,
        config: GatewayConfig,
    ) -> Self {
        let kv = KvStore::new(db.clone());
        AppState {
            db,
            kv,
            vault: Arc::new(vault),
            registry: Arc::new(registry),
            config: Arc::new(config),
        }
    }

    pub fn verifier(&self) -> PopVerifier {
        PopVerifier::new(self.db.clone(), self.kv.clone())
    }

    pub fn policy(&self) -> PolicyEngine {
        PolicyEngine::new(self.db.clone(), self.kv.clone())
    }
}
