use std::collections::HashMap;
use std::sync::Arc;

use gatehouse_core::ResourceId;

use crate::ResourcePlugin;

/// Registry of installed plugins, keyed by resource id.
///
/// Built once at startup and shared read-only afterwards; nothing mutates it on
/// the request path.
#[derive(Default)]
pub struct PluginRegistry {
    by_id: HashMap<String, Arc<dyn ResourcePlugin>>,
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("plugin id is not <resourceType>:<provider>: {0}")]
    InvalidPluginId(String),

    #[error("plugin id {id} does not match its declared parts {declared}")]
    IdMismatch { id: String, declared: String },

    #[error("a plugin is already registered for {0}")]
    DuplicatePlugin(String),

    #[error("plugin {0} declares no actions")]
    NoActions(String),
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, plugin: Arc<dyn ResourcePlugin>) -> Result<(), RegistryError> {
        let manifest = plugin.manifest();
        let id: ResourceId = manifest
            .id
            .parse()
            .map_err(|_| RegistryError::InvalidPluginId(manifest.id.clone()))?;

        let declared = format!("{}:{}", manifest.resource_type, manifest.provider);
        if manifest.id != declared {
            return Err(RegistryError::IdMismatch {
                id: manifest.id.clone(),
                declared,
            });
        }
        if manifest.actions.is_empty() {
            return Err(RegistryError::NoActions(manifest.id.clone()));
        }
        if self.by_id.contains_key(&manifest.id) {
            return Err(RegistryError::DuplicatePlugin(manifest.id.clone()));
        }

        tracing::debug!(plugin = %id, actions = manifest.actions.len(), "registered plugin");
        let key = id.to_string();
        self.by_id.insert(key, plugin);
        Ok(())
    }

    pub fn get(&self, id: &ResourceId) -> Option<Arc<dyn ResourcePlugin>> {
        self.by_id.get(&id.to_string()).cloned()
    }

    pub fn get_by_parts(
        &self,
        resource_type: &str,
        provider: &str,
    ) -> Option<Arc<dyn ResourcePlugin>> {
        self.by_id
            .get(&format!("{resource_type}:{provider}"))
            .cloned()
    }

    /// Every plugin serving the given resource type.
    pub fn by_type(&self, resource_type: &str) -> Vec<Arc<dyn ResourcePlugin>> {
        self.by_id
            .values()
            .filter(|p| p.manifest().resource_type == resource_type)
            .cloned()
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResourcePlugin>> {
        self.by_id.values()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}
