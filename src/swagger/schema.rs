//! Serde model of the Swagger 2.0 fragments the core reads.
//!
//! Documents are kept as raw `serde_json::Value`s in the spec store;
//! fragments are deserialized into these types on demand when the expander
//! reaches them.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

/// A Swagger schema fragment. Only the fields the expander and synthesizer
/// consume are modeled; everything else is ignored on deserialization.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Schema {
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
    #[serde(rename = "type")]
    pub types: Option<SchemaType>,
    pub format: Option<String>,
    #[serde(default)]
    pub properties: BTreeMap<String, Schema>,
    #[serde(rename = "additionalProperties")]
    pub additional_properties: Option<Box<AdditionalProperties>>,
    pub items: Option<Box<Items>>,
    #[serde(rename = "allOf", default)]
    pub all_of: Vec<Schema>,
    pub discriminator: Option<String>,
    #[serde(rename = "enum", default)]
    pub enum_values: Vec<Value>,
    #[serde(rename = "x-ms-discriminator-value")]
    pub ms_discriminator_value: Option<String>,
}

/// `type` may be a single name or (unsupported downstream) an array.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum SchemaType {
    One(String),
    Many(Vec<String>),
}

/// `additionalProperties` is either a boolean switch or a value schema.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum AdditionalProperties {
    Allowed(bool),
    Schema(Schema),
}

/// `items` as a single schema, or as a tuple of schemas (unsupported).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum Items {
    Single(Schema),
    Multiple(Vec<Schema>),
}

impl Schema {
    /// A plain `{"type": "string"}` schema, used when the expander rewrites
    /// untyped fragments.
    pub fn string() -> Self {
        Schema {
            types: Some(SchemaType::One("string".to_string())),
            ..Schema::default()
        }
    }

    /// The single type name, `None` when untyped. `Err` when `type` is an
    /// array, which the expander reports as unsupported.
    pub fn type_name(&self) -> Result<Option<&str>, ()> {
        match &self.types {
            None => Ok(None),
            Some(SchemaType::One(t)) => Ok(Some(t.as_str())),
            Some(SchemaType::Many(_)) => Err(()),
        }
    }

    fn type_is_object(&self) -> bool {
        matches!(self.type_name(), Ok(None) | Ok(Some("object")))
    }

    /// Object with named properties (or nothing at all) rather than a map.
    pub fn is_object(&self) -> bool {
        self.type_is_object() && !self.is_map()
    }

    /// Map flavor: object-typed, no named properties, `additionalProperties`
    /// present.
    pub fn is_map(&self) -> bool {
        self.type_is_object() && self.properties.is_empty() && self.additional_properties.is_some()
    }

    pub fn is_array(&self) -> bool {
        matches!(self.type_name(), Ok(Some("array")))
    }

    /// Object with neither named properties nor inheritance; candidates for
    /// the empty-object-as-string rewrite.
    pub fn is_empty_object(&self) -> bool {
        self.is_object() && self.properties.is_empty() && self.all_of.is_empty()
    }
}

/// A Swagger response fragment: a ref chain target or a concrete response
/// with a schema.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResponseFragment {
    #[serde(rename = "$ref")]
    pub reference: Option<String>,
    pub schema: Option<Schema>,
}

/// The subset of an operation the expander checks before following its
/// `200` response.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct OperationFragment {
    #[serde(default)]
    pub responses: BTreeMap<String, Value>,
}
