//! Builds the property tree for a schema or for the 200 response of an
//! operation.
//!
//! Expansion resolves `$ref` chains through the spec store, merges `allOf`
//! inheritance into object children, and represents polymorphic bases as
//! variant subtrees. Reference cycles are detected through the per-node
//! visited set and silently terminate the affected branch; a cycle is a
//! designed outcome of expansion, not an error.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use tracing::{trace, warn};

use super::expander_cache::ExpanderCache;
use super::property::Property;
use super::property_addr::PropertyAddr;
use super::refutil::{JsonRef, ResolveError, SpecStore};
use super::schema::{AdditionalProperties, Items, OperationFragment, Schema};
use super::variant_map::VariantMap;

/// Errors surfaced by expansion. Cycles are not among them.
#[derive(Debug, Error)]
pub enum ExpandError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),
    #[error("{addr}: type of property is an array (not supported)")]
    TypeAsArray { addr: String },
    #[error("{addr}: items of property is not a single schema (not supported)")]
    ItemsNotSingle { addr: String },
    #[error("circular reference resolving {reference}")]
    CircularRoot { reference: String },
    #[error("operation `{kind}` referenced by {reference} is not supported")]
    UnsupportedOperation { reference: String, kind: String },
    #[error("operation referenced by {reference} has no responses defined")]
    NoResponses { reference: String },
    #[error("operation referenced by {reference} has no 200 response defined")]
    No200Response { reference: String },
    #[error("model named {model} is not a discriminator parent")]
    NotDiscriminator { model: String },
}

/// Options shaping an expansion.
#[derive(Clone, Default)]
pub struct ExpanderOption {
    /// Rewrite objects with no properties and no allOf to `{type: string}`
    /// in the built tree. Some specs declare properties as empty objects
    /// for payloads that are actually strings.
    pub empty_obj_as_str: bool,
    /// Shared cache of built trees. Keys include the option fingerprint, so
    /// differing `empty_obj_as_str` values never share an entry.
    pub cache: Option<Arc<ExpanderCache>>,
}

/// Expands a schema reference into a [`Property`] tree.
pub struct Expander {
    store: Arc<SpecStore>,
    reference: JsonRef,
    seed: Property,
    root: Option<Arc<Property>>,
    variant_maps: HashMap<PathBuf, VariantMap>,
    empty_obj_as_str: bool,
    cache: Option<Arc<ExpanderCache>>,
}

impl Expander {
    /// Creates an expander for the schema behind a normalized reference.
    pub fn new(
        store: Arc<SpecStore>,
        reference: JsonRef,
        opt: ExpanderOption,
    ) -> Result<Self, ExpandError> {
        let res = store.rresolve(&reference, &BTreeSet::new(), true)?;
        if !res.ok {
            return Err(ExpandError::CircularRoot {
                reference: reference.to_string(),
            });
        }
        let seed = Property {
            schema: Some(res.schema),
            reference: Some(res.reference),
            addr: PropertyAddr::root(),
            visited: res.visited,
            ..Property::default()
        };
        Ok(Expander {
            store,
            reference,
            seed,
            root: None,
            variant_maps: HashMap::new(),
            empty_obj_as_str: opt.empty_obj_as_str,
            cache: opt.cache,
        })
    }

    /// Creates an expander for the schema of an operation's 200 response,
    /// transparently following response references. The input must be a
    /// normalized reference to the operation (`...#/paths/<path>/<verb>`).
    pub fn from_op_ref(
        store: Arc<SpecStore>,
        op_ref: &JsonRef,
        opt: ExpanderOption,
    ) -> Result<Self, ExpandError> {
        let kind = op_ref.last_token().to_lowercase();
        if !matches!(
            kind.as_str(),
            "get" | "put" | "post" | "delete" | "patch" | "head"
        ) {
            return Err(ExpandError::UnsupportedOperation {
                reference: op_ref.to_string(),
                kind,
            });
        }

        let op: OperationFragment =
            serde_json::from_value(store.fragment(op_ref)?).map_err(|e| {
                ResolveError::Fragment {
                    reference: op_ref.to_string(),
                    source: e,
                }
            })?;
        if op.responses.is_empty() {
            return Err(ExpandError::NoResponses {
                reference: op_ref.to_string(),
            });
        }
        if !op.responses.contains_key("200") {
            return Err(ExpandError::No200Response {
                reference: op_ref.to_string(),
            });
        }

        let resp_ref = op_ref.appended(&["responses", "200"]);
        let res = store.rresolve_response(&resp_ref, &BTreeSet::new(), false)?;
        if !res.ok {
            return Err(ExpandError::CircularRoot {
                reference: resp_ref.to_string(),
            });
        }

        Expander::new(store, res.reference.appended(&["schema"]), opt)
    }

    /// The expanded tree. Builds it on first call; later calls return the
    /// same root.
    pub fn expand(&mut self) -> Result<Arc<Property>, ExpandError> {
        if let Some(root) = &self.root {
            return Ok(root.clone());
        }
        let key = self.cache_key();
        if let Some(cache) = &self.cache {
            if let Some(root) = cache.load(&key) {
                self.root = Some(root.clone());
                return Ok(root);
            }
        }
        let mut prop = self.seed.clone();
        self.expand_prop(&mut prop)?;
        let root = Arc::new(prop);
        if let Some(cache) = &self.cache {
            cache.save(key, root.clone());
        }
        self.root = Some(root.clone());
        Ok(root)
    }

    fn cache_key(&self) -> String {
        format!("{}|empty_obj_as_str={}", self.reference, self.empty_obj_as_str)
    }

    fn expand_prop(&mut self, prop: &mut Property) -> Result<(), ExpandError> {
        let Some(schema) = prop.schema.clone() else {
            return Ok(());
        };
        let type_name = schema.type_name().map_err(|_| ExpandError::TypeAsArray {
            addr: prop.addr.to_string(),
        })?;
        match type_name.unwrap_or("object") {
            "array" => {
                trace!(addr = %prop.addr, "expand array");
                self.expand_array(prop, &schema)
            }
            "object" => {
                if schema.discriminator.as_deref().map_or(true, str::is_empty) {
                    if schema.is_map() {
                        trace!(addr = %prop.addr, "expand map");
                        self.expand_map(prop, &schema)
                    } else {
                        trace!(addr = %prop.addr, "expand regular object");
                        self.expand_regular_object(prop, &schema)
                    }
                } else {
                    trace!(addr = %prop.addr, "expand polymorphic object");
                    self.expand_polymorphic(prop, &schema)
                }
            }
            _ => Ok(()),
        }
    }

    fn expand_array(&mut self, prop: &mut Property, schema: &Schema) -> Result<(), ExpandError> {
        let addr = prop.addr.appended_index();
        match schema.items.as_deref() {
            Some(Items::Single(_)) => {}
            _ => {
                return Err(ExpandError::ItemsNotSingle {
                    addr: addr.to_string(),
                })
            }
        }
        let item_ref = prop
            .reference
            .as_ref()
            .expect("expanded nodes carry a reference")
            .appended(&["items"]);
        let res = self.store.rresolve(&item_ref, &prop.visited, false)?;
        if !res.ok {
            return Ok(());
        }
        let mut element = Property {
            schema: Some(res.schema),
            reference: Some(res.reference),
            addr,
            visited: res.visited,
            ..Property::default()
        };
        self.expand_prop(&mut element)?;
        prop.element = Some(Box::new(element));
        Ok(())
    }

    fn expand_map(&mut self, prop: &mut Property, schema: &Schema) -> Result<(), ExpandError> {
        let addr = prop.addr.appended_index();
        let base_ref = prop
            .reference
            .as_ref()
            .expect("expanded nodes carry a reference")
            .clone();

        // `additionalProperties: true` carries no value schema; such maps
        // hold strings.
        if matches!(
            schema.additional_properties.as_deref(),
            Some(AdditionalProperties::Allowed(_))
        ) {
            let mut element = Property {
                schema: Some(Schema::string()),
                reference: Some(base_ref.appended(&["additionalProperties"])),
                addr,
                visited: prop.visited.clone(),
                ..Property::default()
            };
            self.expand_prop(&mut element)?;
            prop.element = Some(Box::new(element));
            return Ok(());
        }

        let res = self.store.rresolve(
            &base_ref.appended(&["additionalProperties"]),
            &prop.visited,
            false,
        )?;
        if !res.ok {
            return Ok(());
        }
        let value_schema = if res.schema.is_empty_object() && self.empty_obj_as_str {
            Schema::string()
        } else {
            res.schema
        };
        let mut element = Property {
            schema: Some(value_schema),
            reference: Some(res.reference),
            addr,
            visited: res.visited,
            ..Property::default()
        };
        self.expand_prop(&mut element)?;
        prop.element = Some(Box::new(element));
        Ok(())
    }

    fn expand_regular_object(
        &mut self,
        prop: &mut Property,
        schema: &Schema,
    ) -> Result<(), ExpandError> {
        if schema.is_empty_object() && self.empty_obj_as_str {
            prop.schema = Some(Schema::string());
            return Ok(());
        }

        let base_ref = prop
            .reference
            .as_ref()
            .expect("expanded nodes carry a reference")
            .clone();
        let mut children = BTreeMap::new();

        for name in schema.properties.keys() {
            let addr = prop.addr.appended_prop(name);
            let res = self.store.rresolve(
                &base_ref.appended(&["properties", name]),
                &prop.visited,
                false,
            )?;
            if !res.ok {
                continue;
            }
            let mut child = Property {
                schema: Some(res.schema),
                reference: Some(res.reference),
                addr,
                visited: res.visited,
                ..Property::default()
            };
            self.expand_prop(&mut child)?;
            children.insert(name.clone(), child);
        }

        // Inherit children of each allOf schema. An allOf target with a
        // discriminator makes this node a variant subtree root.
        for i in 0..schema.all_of.len() {
            let res = self.store.rresolve(
                &base_ref.appended(&["allOf", &i.to_string()]),
                &prop.visited,
                false,
            )?;
            if !res.ok {
                continue;
            }
            if res.schema.discriminator.as_deref().is_some_and(|d| !d.is_empty()) {
                prop.discriminator = res.schema.discriminator.clone();
                let dval = schema
                    .ms_discriminator_value
                    .clone()
                    .unwrap_or_else(|| prop.schema_name());
                prop.discriminator_value = Some(dval);
            }
            let mut inherited = Property {
                schema: Some(res.schema.clone()),
                reference: Some(res.reference),
                addr: prop.addr.clone(),
                visited: res.visited,
                ..Property::default()
            };
            // The base of a variant schema is always a regular object.
            self.expand_regular_object(&mut inherited, &res.schema)?;
            if let Some(base_children) = inherited.children.take() {
                children.extend(base_children);
            }
        }

        prop.children = Some(children);
        Ok(())
    }

    fn expand_polymorphic(
        &mut self,
        prop: &mut Property,
        schema: &Schema,
    ) -> Result<(), ExpandError> {
        let discriminator = schema
            .discriminator
            .clone()
            .expect("polymorphic schema has a discriminator");
        let base_ref = prop
            .reference
            .as_ref()
            .expect("expanded nodes carry a reference")
            .clone();
        let parent_name = prop.schema_name();

        // The discriminator property's enum is the preferred variant
        // source; specs that omit it require a definitions scan.
        let dres = self.store.rresolve(
            &base_ref.appended(&["properties", &discriminator]),
            &prop.visited,
            false,
        )?;
        let mut dvals: Vec<String> = dres
            .schema
            .enum_values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect();
        if dvals.is_empty() {
            let vm = self.variant_map_for(&base_ref.file().to_path_buf())?;
            let known = vm
                .get(&parent_name)
                .ok_or_else(|| ExpandError::NotDiscriminator {
                    model: parent_name.clone(),
                })?;
            dvals = known.keys().cloned().collect();
        }

        let mut variants = BTreeMap::new();
        for dval in dvals {
            let addr = prop.addr.with_variant(&dval);
            // The base's own ref is dropped from the inherited visited set
            // so the variant's allOf inheritance back to the base is not
            // taken for a cycle.
            let mut visited = prop.visited.clone();
            visited.remove(&base_ref.to_string());

            // First assume a definition named after the enum value.
            let named_ref =
                JsonRef::from_parts(base_ref.file().to_path_buf(), "").appended(&["definitions", &dval]);
            let mut resolved = None;
            let mut named_cycle = false;
            if let Ok(res) = self.store.rresolve(&named_ref, &visited, true) {
                if !res.ok {
                    named_cycle = true;
                } else {
                    // A same-named definition may not actually inherit the
                    // base; only accept it when one of its allOf entries
                    // refs the base.
                    let inherits = res
                        .schema
                        .all_of
                        .iter()
                        .filter_map(|s| s.reference.as_deref())
                        .any(|r| raw_ref_last_token(r) == parent_name);
                    if inherits {
                        resolved = Some(res);
                    }
                }
            }
            if named_cycle {
                continue;
            }

            let res = match resolved {
                Some(res) => res,
                None => {
                    trace!(addr = %addr, value = %dval, "variant not resolvable by name, consulting variant map");
                    let vm = self.variant_map_for(&base_ref.file().to_path_buf())?;
                    let known = vm
                        .get(&parent_name)
                        .ok_or_else(|| ExpandError::NotDiscriminator {
                            model: parent_name.clone(),
                        })?;
                    let Some(model_name) = known.get(&dval) else {
                        warn!(value = %dval, "no model in the spec is a variant of this value");
                        continue;
                    };
                    let model_ref = JsonRef::from_parts(base_ref.file().to_path_buf(), "")
                        .appended(&["definitions", model_name]);
                    let res = self.store.rresolve(&model_ref, &visited, true)?;
                    if !res.ok {
                        continue;
                    }
                    res
                }
            };

            let mut variant = Property {
                schema: Some(res.schema),
                reference: Some(res.reference),
                addr,
                visited: res.visited,
                ..Property::default()
            };
            self.expand_prop(&mut variant)?;
            variants.insert(dval, variant);
        }

        prop.variants = Some(variants);
        Ok(())
    }

    fn variant_map_for(&mut self, file: &PathBuf) -> Result<&VariantMap, ExpandError> {
        if !self.variant_maps.contains_key(file) {
            let vm = VariantMap::new(&self.store, file)?;
            self.variant_maps.insert(file.clone(), vm);
        }
        Ok(&self.variant_maps[file])
    }
}

/// Last pointer token of a raw (unnormalized) `$ref` string.
fn raw_ref_last_token(raw_ref: &str) -> String {
    match raw_ref.rfind('/') {
        Some(i) => super::refutil::unescape_token(&raw_ref[i + 1..]),
        None => raw_ref.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swagger::testutil::testdata_store;

    fn expand(file: &str, pointer: &str) -> Arc<Property> {
        let (store, dir) = testdata_store();
        let reference =
            JsonRef::from_parts(dir.join(file).canonicalize().unwrap(), pointer.to_string());
        let mut exp = Expander::new(store, reference, ExpanderOption::default()).unwrap();
        exp.expand().unwrap()
    }

    #[test]
    fn test_expand_primitive_object() {
        let root = expand("syn.json", "/definitions/object");
        let children = root.children.as_ref().unwrap();
        assert!(children.contains_key("string"));
        assert!(children.contains_key("integer"));
        assert!(children.contains_key("boolean"));
        let array = &children["array"];
        assert_eq!(
            array.element.as_ref().unwrap().addr.to_string(),
            "array/*"
        );
        // Map values live under an index step as well.
        let map = &children["map"];
        assert_eq!(map.element.as_ref().unwrap().addr.to_string(), "map/*");
        // additionalProperties: true synthesizes a string element.
        let map2 = &children["map2"];
        assert_eq!(
            map2.element
                .as_ref()
                .unwrap()
                .schema
                .as_ref()
                .unwrap()
                .type_name()
                .unwrap(),
            Some("string")
        );
        // The empty object stays an (empty) object without the rewrite
        // option.
        let empty = &children["emptyObject"];
        assert!(empty.children.as_ref().unwrap().is_empty());
    }

    #[test]
    fn test_expand_polymorphic_base() {
        let root = expand("syn.json", "/definitions/base");
        let variants = root.variants.as_ref().unwrap();
        assert_eq!(
            variants.keys().cloned().collect::<Vec<_>>(),
            vec!["var1", "var2"]
        );

        let var1 = &variants["var1"];
        assert_eq!(var1.addr.to_string(), "{var1}");
        assert_eq!(var1.discriminator.as_deref(), Some("type"));
        assert_eq!(var1.discriminator_value.as_deref(), Some("var1"));
        let children = var1.children.as_ref().unwrap();
        // Inherited discriminator property plus the variant's own.
        assert_eq!(children["type"].addr.to_string(), "{var1}/type");
        assert_eq!(children["prop1"].addr.to_string(), "{var1}/prop1");
    }

    #[test]
    fn test_expand_discriminator_value_override() {
        let root = expand("syn.json", "/definitions/msbase");
        let variants = root.variants.as_ref().unwrap();
        // The tag comes from x-ms-discriminator-value, the model is found
        // through the variant map.
        let msvar = &variants["xvar1"];
        assert_eq!(msvar.discriminator_value.as_deref(), Some("xvar1"));
        assert_eq!(msvar.schema_name(), "msvar1");
    }

    #[test]
    fn test_expand_same_named_non_variant_is_rejected() {
        let root = expand("syn.json", "/definitions/conflictbase");
        let variants = root.variants.as_ref().unwrap();
        // "conflictvar" names a definition that does not inherit the base;
        // the real variant is found through x-ms-discriminator-value.
        let v = &variants["conflictvar"];
        assert_eq!(v.schema_name(), "realconflictvar");
    }

    #[test]
    fn test_expand_cycle_halts_branch() {
        let root = expand("cycle.json", "/definitions/A");
        let children = root.children.as_ref().unwrap();
        // A.b -> B, B.a -> A is cut: the nested "a" child is dropped.
        let b = &children["b"];
        let b_children = b.children.as_ref().unwrap();
        assert!(!b_children.contains_key("a"));
        assert!(b_children.contains_key("name"));
    }

    #[test]
    fn test_expand_cycle_through_array_leaves_untyped_leaf() {
        let root = expand("cycle.json", "/definitions/SelfList");
        let children = root.children.as_ref().unwrap();
        // items ref back to SelfList is a cycle: the element is absent and
        // the node stays a leaf.
        assert!(children["more"].element.is_none());
        assert!(children["more"].children.is_none());
    }

    #[test]
    fn test_visited_accumulates_along_path() {
        let root = expand("petstore.json", "/paths/~1pets/get/responses/200/schema");
        // The array element resolved through the Pet definition, so its
        // visited set records that ref while the root's does not.
        let element = root.element.as_ref().unwrap();
        let pet_ref = element.reference.as_ref().unwrap().to_string();
        assert!(pet_ref.ends_with("#/definitions/Pet"));
        assert!(element.visited.contains(&pet_ref));
        assert!(!root.visited.contains(&pet_ref));
    }

    #[test]
    fn test_expand_from_op_ref() {
        let (store, dir) = testdata_store();
        let op_ref = JsonRef::from_parts(
            dir.join("petstore.json").canonicalize().unwrap(),
            "/paths/~1pets/get".to_string(),
        );
        let mut exp =
            Expander::from_op_ref(store, &op_ref, ExpanderOption::default()).unwrap();
        let root = exp.expand().unwrap();
        // The 200 response resolves through #/responses/PetList to the Pet
        // array.
        assert!(root.element.is_some());
    }

    #[test]
    fn test_expand_is_idempotent_and_cached() {
        let (store, dir) = testdata_store();
        let reference = JsonRef::from_parts(
            dir.join("syn.json").canonicalize().unwrap(),
            "/definitions/object".to_string(),
        );
        let cache = Arc::new(ExpanderCache::new());
        let opt = ExpanderOption {
            empty_obj_as_str: false,
            cache: Some(cache.clone()),
        };
        let mut exp1 = Expander::new(store.clone(), reference.clone(), opt.clone()).unwrap();
        let r1 = exp1.expand().unwrap();
        let r1b = exp1.expand().unwrap();
        assert!(Arc::ptr_eq(&r1, &r1b));

        let mut exp2 = Expander::new(store.clone(), reference.clone(), opt).unwrap();
        let r2 = exp2.expand().unwrap();
        assert!(Arc::ptr_eq(&r1, &r2));

        // A different option fingerprint must not share the entry.
        let mut exp3 = Expander::new(
            store,
            reference,
            ExpanderOption {
                empty_obj_as_str: true,
                cache: Some(cache),
            },
        )
        .unwrap();
        let r3 = exp3.expand().unwrap();
        assert!(!Arc::ptr_eq(&r1, &r3));
    }

    #[test]
    fn test_empty_obj_as_str_rewrite() {
        let (store, dir) = testdata_store();
        let reference = JsonRef::from_parts(
            dir.join("syn.json").canonicalize().unwrap(),
            "/definitions/object".to_string(),
        );
        let mut exp = Expander::new(
            store,
            reference,
            ExpanderOption {
                empty_obj_as_str: true,
                ..ExpanderOption::default()
            },
        )
        .unwrap();
        let root = exp.expand().unwrap();
        let children = root.children.as_ref().unwrap();
        let empty = &children["emptyObject"];
        assert!(empty.children.is_none());
        assert_eq!(
            empty.schema.as_ref().unwrap().type_name().unwrap(),
            Some("string")
        );
    }
}
