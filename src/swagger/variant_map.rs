//! Per-file map of polymorphic inheritance, derived from a definitions
//! scan. Used when a discriminator property does not enumerate its values,
//! and to find variant models whose name differs from their tag
//! (`x-ms-discriminator-value`).

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::Value;

use super::refutil::{unescape_token, ResolveError, SpecStore};
use super::schema::Schema;

/// Maps `parentModelName → {variantValue → childModelName}` for one spec
/// file. The stored form is the plain translation of the inheritance
/// structure; [`VariantMap::get`] chases cascaded variants.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct VariantMap {
    map: BTreeMap<String, BTreeMap<String, String>>,
}

impl VariantMap {
    /// Scans the definitions of a spec file.
    pub fn new(store: &SpecStore, path: &Path) -> Result<VariantMap, ResolveError> {
        let doc = store.load(path)?;
        let defs = match doc.get("definitions") {
            Some(Value::Object(defs)) => defs,
            _ => return Ok(VariantMap::default()),
        };

        let mut schemas: BTreeMap<String, Schema> = BTreeMap::new();
        for (name, raw) in defs {
            let schema: Schema =
                serde_json::from_value(raw.clone()).map_err(|e| ResolveError::Fragment {
                    reference: format!("{}#/definitions/{}", path.display(), name),
                    source: e,
                })?;
            schemas.insert(name.clone(), schema);
        }

        let mut map: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (name, schema) in &schemas {
            if schema.discriminator.as_deref().is_some_and(|d| !d.is_empty()) {
                map.insert(name.clone(), BTreeMap::new());
            }
        }

        // Models inheriting a parent are parents themselves; iterate until
        // no new parent appears.
        loop {
            let mut changed = false;
            for (name, schema) in &schemas {
                if map.contains_key(name) {
                    continue;
                }
                let inherits_parent = schema
                    .all_of
                    .iter()
                    .filter_map(|s| s.reference.as_deref())
                    .any(|r| map.contains_key(&ref_last_token(r)));
                if inherits_parent {
                    map.insert(name.clone(), BTreeMap::new());
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }

        for (name, schema) in &schemas {
            let vname = schema
                .ms_discriminator_value
                .clone()
                .unwrap_or_else(|| name.clone());
            for raw_ref in schema.all_of.iter().filter_map(|s| s.reference.as_deref()) {
                let parent = ref_last_token(raw_ref);
                if let Some(children) = map.get_mut(&parent) {
                    children.insert(vname.clone(), name.clone());
                }
            }
        }

        Ok(VariantMap { map })
    }

    /// Returns the transitive variant set of a model: variants of variants
    /// are chased until no more parents are found. `None` when the model is
    /// not a discriminator parent.
    pub fn get(&self, model: &str) -> Option<BTreeMap<String, String>> {
        let direct = self.map.get(model)?;
        let mut out = BTreeMap::new();
        let mut worklist: Vec<String> = Vec::new();
        for (value, name) in direct {
            out.insert(value.clone(), name.clone());
            worklist.push(name.clone());
        }
        while let Some(model) = worklist.pop() {
            let Some(children) = self.map.get(&model) else {
                continue;
            };
            for (value, name) in children {
                if out.insert(value.clone(), name.clone()).is_none() {
                    worklist.push(name.clone());
                }
            }
        }
        Some(out)
    }

    pub fn is_parent(&self, model: &str) -> bool {
        self.map.contains_key(model)
    }
}

fn ref_last_token(raw_ref: &str) -> String {
    match raw_ref.rfind('/') {
        Some(i) => unescape_token(&raw_ref[i + 1..]),
        None => raw_ref.to_string(),
    }
}
