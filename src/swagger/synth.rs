//! Produces a JSON value from a mono property tree.

use std::collections::HashMap;

use serde_json::{Map, Value};
use thiserror::Error;
use tracing::warn;

use super::property::Property;
use super::property_addr::PropertyAddr;
use super::rnd::Rnd;

#[derive(Debug, Error)]
pub enum SynthError {
    #[error("property tree is not monomorphized")]
    NotMono,
}

/// Extra elements to produce for the array or map at the given address.
#[derive(Debug, Clone)]
pub struct SynthDuplicateElement {
    pub count: usize,
    pub addr: PropertyAddr,
}

#[derive(Debug, Clone, Default)]
pub struct SynthesizerOption {
    /// Emit `enum[0]` for string properties that declare enum values.
    pub use_enum_values: bool,
    pub duplicate_elements: Vec<SynthDuplicateElement>,
}

/// Walks a mono tree and emits a JSON value. Construction rejects trees
/// that still carry more than one variant anywhere.
pub struct Synthesizer<'a> {
    root: &'a Property,
    use_enum_values: bool,
    duplicate_elements: HashMap<String, usize>,
}

impl<'a> Synthesizer<'a> {
    pub fn new(root: &'a Property, opt: &SynthesizerOption) -> Result<Self, SynthError> {
        if !root.is_mono() {
            return Err(SynthError::NotMono);
        }
        let duplicate_elements = opt
            .duplicate_elements
            .iter()
            .map(|de| (de.addr.to_string(), de.count))
            .collect();
        Ok(Synthesizer {
            root,
            use_enum_values: opt.use_enum_values,
            duplicate_elements,
        })
    }

    /// Produces the value, drawing leaves from `rnd` in sorted-key order.
    /// `None` means the root itself was cut by cycle detection.
    pub fn synthesize(&self, rnd: &mut Rnd) -> Option<Value> {
        self.synth_prop(None, self.root, rnd)
    }

    fn synth_prop(&self, parent: Option<&Property>, p: &Property, rnd: &mut Rnd) -> Option<Value> {
        if let Some(element) = &p.element {
            // Duplication counts are keyed by the container's own address,
            // matching the `duplicate_element { addr = "..." }` config
            // field.
            let n = 1 + self
                .duplicate_elements
                .get(&p.addr.to_string())
                .copied()
                .unwrap_or(0);
            let elements: Vec<Value> = (0..n)
                .filter_map(|_| self.synth_prop(Some(p), element, rnd))
                .collect();
            let is_array = p.schema.as_ref().is_some_and(|s| s.is_array());
            if is_array {
                return Some(Value::Array(elements));
            }
            let mut map = Map::new();
            for (i, inner) in elements.into_iter().enumerate() {
                let key = if i == 0 {
                    "KEY".to_string()
                } else {
                    format!("KEY{}", i)
                };
                map.insert(key, inner);
            }
            return Some(Value::Object(map));
        }

        if let Some(children) = &p.children {
            let mut map = Map::new();
            for (name, child) in children {
                if let Some(v) = self.synth_prop(Some(p), child, rnd) {
                    map.insert(name.clone(), v);
                }
            }
            return Some(Value::Object(map));
        }

        if let Some(variants) = &p.variants {
            // Mono trees hold exactly one variant.
            let variant = variants.values().next()?;
            return self.synth_prop(Some(p), variant, rnd);
        }

        self.synth_primitive(parent, p, rnd)
    }

    fn synth_primitive(
        &self,
        parent: Option<&Property>,
        p: &Property,
        rnd: &mut Rnd,
    ) -> Option<Value> {
        let schema = p.schema.as_ref()?;
        let type_name = schema.type_name().ok()?.unwrap_or("");
        let format = schema.format.as_deref().unwrap_or("");
        match type_name {
            "string" => {
                if let Some(parent) = parent {
                    let is_discriminator = parent
                        .discriminator
                        .as_deref()
                        .is_some_and(|d| !d.is_empty() && Some(d) == p.name());
                    if is_discriminator {
                        return Some(Value::String(
                            parent.discriminator_value.clone().unwrap_or_default(),
                        ));
                    }
                }
                if self.use_enum_values {
                    if let Some(first) = schema.enum_values.first().and_then(Value::as_str) {
                        return Some(Value::String(first.to_string()));
                    }
                }
                Some(Value::String(rnd.next_string(format)))
            }
            "file" => Some(Value::String(rnd.next_string(format))),
            "integer" => Some(Value::from(rnd.next_integer(format))),
            "number" => Some(Value::from(rnd.next_number(format))),
            "boolean" => Some(Value::Bool(true)),
            // An object/array/untyped schema at a leaf means expansion cut a
            // reference cycle here; the enclosing object omits the key.
            "object" | "" | "array" => None,
            other => {
                warn!(addr = %p.addr, r#type = other, "unknown schema type at leaf");
                None
            }
        }
    }
}
