//! Parsed JSON annotated with the schema position of every node.
//!
//! Response bodies returned by the mock server are parsed back in lockstep
//! with the property tree that produced them; each node remembers the
//! schema reference and instance address it came from, which is what the
//! correlator inverts at the end of a run.

use std::collections::{BTreeMap, HashMap};

use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{Number, Value};

use super::property::Property;
use super::property_addr::PropertyAddr;
use super::refutil::JsonRef;

/// The operation whose response produced a value.
#[derive(Debug, Clone, PartialEq)]
pub struct RootModel {
    /// Reference to the path item that owns the operation.
    pub path_ref: JsonRef,
    /// Operation verb (`get`, `post`, ...).
    pub operation: String,
    /// `api-version` the client requested.
    pub version: String,
}

/// Schema position attached to a JSON node.
#[derive(Debug, Clone, PartialEq)]
pub struct ValuePos {
    pub reference: JsonRef,
    pub addr: PropertyAddr,
    pub root_model: Option<RootModel>,
    pub link_local: Option<String>,
    pub link_github: Option<String>,
}

impl Serialize for ValuePos {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("ref", &self.reference.to_string())?;
        map.serialize_entry("addr", &self.addr.to_string())?;
        if let Some(rm) = &self.root_model {
            let mut body = serde_json::Map::new();
            body.insert("path_ref".into(), Value::String(rm.path_ref.to_string()));
            body.insert("operation".into(), Value::String(rm.operation.clone()));
            body.insert("version".into(), Value::String(rm.version.clone()));
            map.serialize_entry("root_model", &body)?;
        }
        if let Some(l) = &self.link_local {
            map.serialize_entry("link_local", l)?;
        }
        if let Some(l) = &self.link_github {
            map.serialize_entry("link_github", l)?;
        }
        map.end()
    }
}

/// A JSON tree where every node carries an optional [`ValuePos`]. Nodes
/// without a schema counterpart (unknown keys, cycle-cut branches) carry
/// none.
#[derive(Debug, Clone, PartialEq)]
pub enum JsonValue {
    Object {
        value: BTreeMap<String, JsonValue>,
        pos: Option<ValuePos>,
    },
    Array {
        value: Vec<JsonValue>,
        pos: Option<ValuePos>,
    },
    String {
        value: String,
        pos: Option<ValuePos>,
    },
    Number {
        value: Number,
        pos: Option<ValuePos>,
    },
    Bool {
        value: bool,
        pos: Option<ValuePos>,
    },
    Null,
}

impl JsonValue {
    /// Parses raw bytes and annotates them against a property tree.
    pub fn from_bytes(
        bytes: &[u8],
        root: Option<&Property>,
        root_model: Option<&RootModel>,
    ) -> Result<JsonValue, serde_json::Error> {
        let value: Value = serde_json::from_slice(bytes)?;
        Ok(annotate(&value, root, root_model))
    }

    pub fn pos(&self) -> Option<&ValuePos> {
        match self {
            JsonValue::Object { pos, .. }
            | JsonValue::Array { pos, .. }
            | JsonValue::String { pos, .. }
            | JsonValue::Number { pos, .. }
            | JsonValue::Bool { pos, .. } => pos.as_ref(),
            JsonValue::Null => None,
        }
    }

    /// Calls `f` for every scalar leaf.
    pub fn for_each_leaf<'a>(&'a self, f: &mut impl FnMut(&'a JsonValue)) {
        match self {
            JsonValue::Object { value, .. } => {
                for v in value.values() {
                    v.for_each_leaf(f);
                }
            }
            JsonValue::Array { value, .. } => {
                for v in value {
                    v.for_each_leaf(f);
                }
            }
            _ => f(self),
        }
    }

    /// The stringification the correlator keys on: shortest round-trip
    /// numbers, verbatim strings, `TRUE`/`FALSE` booleans.
    pub fn leaf_string(&self) -> Option<String> {
        match self {
            JsonValue::String { value, .. } => Some(value.clone()),
            JsonValue::Number { value, .. } => Some(number_string(value)),
            JsonValue::Bool { value, .. } => {
                Some(if *value { "TRUE" } else { "FALSE" }.to_string())
            }
            _ => None,
        }
    }

    /// Leaf positions keyed by the JSON pointer derived from their address
    /// (index steps collapsed to `0`).
    pub fn leaf_positions_by_pointer(&self) -> Vec<(String, &ValuePos)> {
        let mut out = Vec::new();
        self.for_each_leaf(&mut |leaf| {
            if let Some(pos) = leaf.pos() {
                out.push((pos.addr.to_pointer(), pos));
            }
        });
        out
    }
}

/// Stringification of a JSON number: integers without a fraction, floats
/// with the shortest round-trip decimal form.
pub fn number_string(n: &Number) -> String {
    if let Some(i) = n.as_i64() {
        return i.to_string();
    }
    if let Some(u) = n.as_u64() {
        return u.to_string();
    }
    n.as_f64().map(|f| f.to_string()).unwrap_or_default()
}

fn annotate(value: &Value, prop: Option<&Property>, root_model: Option<&RootModel>) -> JsonValue {
    // A variant node stands for its selected subtree: mono trees carry one
    // entry; for a polymorphic tree the discriminator value inside the JSON
    // object picks it.
    let prop = resolve_variant(value, prop);
    let pos = prop.and_then(|p| {
        p.reference.as_ref().map(|r| ValuePos {
            reference: r.clone(),
            addr: p.addr.clone(),
            root_model: root_model.cloned(),
            link_local: None,
            link_github: None,
        })
    });

    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool { value: *b, pos },
        Value::Number(n) => JsonValue::Number {
            value: n.clone(),
            pos,
        },
        Value::String(s) => JsonValue::String {
            value: s.clone(),
            pos,
        },
        Value::Array(items) => {
            let element = prop.and_then(|p| p.element.as_deref());
            JsonValue::Array {
                value: items
                    .iter()
                    .map(|v| annotate(v, element, root_model))
                    .collect(),
                pos,
            }
        }
        Value::Object(map) => {
            let mut value = BTreeMap::new();
            for (k, v) in map {
                let child = prop.and_then(|p| {
                    if let Some(children) = &p.children {
                        if !children.is_empty() {
                            return children.get(k);
                        }
                    }
                    p.element.as_deref()
                });
                value.insert(k.clone(), annotate(v, child, root_model));
            }
            JsonValue::Object { value, pos }
        }
    }
}

fn resolve_variant<'a>(value: &Value, prop: Option<&'a Property>) -> Option<&'a Property> {
    let p = prop?;
    let Some(variants) = &p.variants else {
        return Some(p);
    };
    if variants.len() == 1 {
        return resolve_variant(value, variants.values().next());
    }
    let discriminator = p.schema.as_ref()?.discriminator.as_deref()?;
    let tag = value.get(discriminator)?.as_str()?;
    resolve_variant(value, variants.get(tag))
}

/// Merges annotated values into `{leaf stringification → position}`,
/// dropping leaves whose stringification appears more than once across the
/// whole set (an ambiguous value cannot serve as a correlation key).
pub fn value_map<'a>(
    values: impl IntoIterator<Item = &'a JsonValue>,
) -> HashMap<String, &'a ValuePos> {
    let mut out: HashMap<String, &ValuePos> = HashMap::new();
    let mut dropped: HashMap<String, ()> = HashMap::new();
    for value in values {
        value.for_each_leaf(&mut |leaf| {
            let Some(key) = leaf.leaf_string() else {
                return;
            };
            if dropped.contains_key(&key) {
                return;
            }
            if out.remove(&key).is_some() {
                dropped.insert(key, ());
                return;
            }
            if let Some(pos) = leaf.pos() {
                out.insert(key, pos);
            } else {
                // A position-less leaf still poisons the key: the value is
                // no longer unambiguous.
                dropped.insert(key, ());
            }
        });
    }
    out
}
