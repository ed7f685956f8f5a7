//! In-memory registry of service manifests.

use super::ServiceManifest;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

/// Registry mapping service names to their manifests.
///
/// The validator and dispatcher consult the registry; workers are
/// expected to register (or the operator to seed) manifests at startup.
#[derive(Debug, Default)]
pub struct ManifestRegistry {
    entries: RwLock<HashMap<String, Arc<ServiceManifest>>>,
}

impl ManifestRegistry {
    /// Creates a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a manifest.
    pub fn register(&self, manifest: ServiceManifest) {
        self.entries
            .write()
            .insert(manifest.service.clone(), Arc::new(manifest));
    }

    /// Looks up a manifest by service name.
    #[must_use]
    pub fn get(&self, service: &str) -> Option<Arc<ServiceManifest>> {
        self.entries.read().get(service).cloned()
    }

    /// Returns true if the service is known.
    #[must_use]
    pub fn contains(&self, service: &str) -> bool {
        self.entries.read().contains_key(service)
    }

    /// Returns the registered service names, sorted.
    #[must_use]
    pub fn services(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.read().keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove all registered entries (primarily for tests).
    pub fn clear(&self) {
        self.entries.write().clear();
    }
}
