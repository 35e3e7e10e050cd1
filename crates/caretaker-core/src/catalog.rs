//! Lazily resolved well-known applications

use caretaker_api::AppDescriptor;
use caretaker_config::AppEntry;
use caretaker_host_api::ProcessDirectory;
use caretaker_util::AppKey;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use tracing::debug;

/// Resolves app keys to descriptors on first use and caches them for the
/// lifetime of the process. A reload only evicts entries whose definition
/// changed.
pub struct AppCatalog {
    entries: RwLock<Vec<AppEntry>>,
    resolved: Mutex<HashMap<AppKey, AppDescriptor>>,
    directory: Arc<dyn ProcessDirectory>,
}

impl AppCatalog {
    pub fn new(entries: Vec<AppEntry>, directory: Arc<dyn ProcessDirectory>) -> Self {
        Self {
            entries: RwLock::new(entries),
            resolved: Mutex::new(HashMap::new()),
            directory,
        }
    }

    /// Descriptor for `key`, or `None` when no such app is configured
    pub fn resolve(&self, key: &AppKey) -> Option<AppDescriptor> {
        if let Some(desc) = self.lock_resolved().get(key) {
            return Some(desc.clone());
        }

        let entry = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .find(|e| &e.key == key)
            .cloned()?;

        let bundle_id = entry
            .bundle_id
            .clone()
            .or_else(|| self.directory.resolve_bundle_id(&entry.location))
            .unwrap_or_else(|| entry.key.to_string());
        let desc = AppDescriptor::new(entry.name, entry.location, bundle_id);
        debug!(key = %key, bundle_id = %desc.bundle_id, "Resolved app");

        self.lock_resolved().insert(key.clone(), desc.clone());
        Some(desc)
    }

    /// Map an observed descriptor onto a configured app when one matches
    /// by location or display name; otherwise return it unchanged.
    pub fn identify(&self, observed: AppDescriptor) -> AppDescriptor {
        let keys: Vec<AppKey> = self
            .entries
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .map(|e| e.key.clone())
            .collect();

        keys.iter()
            .filter_map(|k| self.resolve(k))
            .find(|known| {
                known.location == observed.location || known.display_name == observed.display_name
            })
            .unwrap_or(observed)
    }

    /// Replace the app definitions
    pub fn reload(&self, entries: Vec<AppEntry>) {
        let mut current = self.entries.write().unwrap_or_else(|e| e.into_inner());
        let mut resolved = self.lock_resolved();
        resolved.retain(|key, _| {
            let before = current.iter().find(|e| &e.key == key);
            let after = entries.iter().find(|e| &e.key == key);
            before.is_some() && before == after
        });
        *current = entries;
    }

    fn lock_resolved(&self) -> std::sync::MutexGuard<'_, HashMap<AppKey, AppDescriptor>> {
        self.resolved.lock().unwrap_or_else(|e| e.into_inner())
    }
}
