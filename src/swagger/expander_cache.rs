//! Cache of expanded property trees.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::property::Property;

/// Caches expansion roots keyed by `(schema ref, option fingerprint)`.
/// Entries are written once and shared; trees are immutable after
/// publication.
#[derive(Default)]
pub struct ExpanderCache {
    map: Mutex<HashMap<String, Arc<Property>>>,
}

impl ExpanderCache {
    pub fn new() -> Self {
        ExpanderCache::default()
    }

    pub(crate) fn load(&self, key: &str) -> Option<Arc<Property>> {
        self.map.lock().unwrap().get(key).cloned()
    }

    pub(crate) fn save(&self, key: String, root: Arc<Property>) {
        self.map.lock().unwrap().entry(key).or_insert(root);
    }
}
