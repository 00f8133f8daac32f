//! The property tree produced by the expander.

use std::collections::{BTreeMap, BTreeSet};

use super::property_addr::PropertyAddr;
use super::refutil::JsonRef;
use super::schema::Schema;

/// A node of the expanded property tree.
///
/// At most one of `children` / `element` / `variants` is populated:
/// `children` for a regular object, `element` for an array item or map
/// value, `variants` for a polymorphic base keyed by discriminator value.
/// A node with none of the three is a primitive leaf.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Property {
    /// The schema fragment this node resolved to.
    pub schema: Option<Schema>,
    /// Normalized reference locating `schema` in its document.
    pub reference: Option<JsonRef>,
    /// Address of this node in the instance tree.
    pub addr: PropertyAddr,
    /// Normalized refs resolved on the path from the root to here; a ref
    /// re-appearing on the path means a cycle.
    pub visited: BTreeSet<String>,

    pub children: Option<BTreeMap<String, Property>>,
    pub element: Option<Box<Property>>,
    pub variants: Option<BTreeMap<String, Property>>,

    /// For a variant-subtree root: the discriminator property name in the
    /// base, and the tag value this subtree answers to.
    pub discriminator: Option<String>,
    pub discriminator_value: Option<String>,
}

impl Property {
    /// Name of the definition this node's schema resolved to (the last
    /// pointer token of its reference).
    pub fn schema_name(&self) -> String {
        self.reference
            .as_ref()
            .map(|r| r.last_token())
            .unwrap_or_default()
    }

    /// The property name of this node in its parent object, derived from
    /// the last address step.
    pub fn name(&self) -> Option<&str> {
        self.addr.last_prop_name()
    }

    /// True when every variant node in the tree has exactly one entry.
    pub fn is_mono(&self) -> bool {
        if let Some(variants) = &self.variants {
            if variants.len() != 1 {
                return false;
            }
            return variants.values().all(Property::is_mono);
        }
        if let Some(children) = &self.children {
            return children.values().all(Property::is_mono);
        }
        if let Some(element) = &self.element {
            return element.is_mono();
        }
        true
    }

    /// Walks every node of the tree depth-first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Property)) {
        f(self);
        if let Some(children) = &self.children {
            for child in children.values() {
                child.walk(f);
            }
        }
        if let Some(element) = &self.element {
            element.walk(f);
        }
        if let Some(variants) = &self.variants {
            for variant in variants.values() {
                variant.walk(f);
            }
        }
    }
}
