//! Enumeration of mono trees from a polymorphic property tree.
//!
//! A mono tree has exactly one entry in every variant map, so the
//! synthesizer can produce a single concrete value from it. The
//! enumeration order is deterministic (sorted variant names and child
//! keys, earlier axes varying fastest), which is what selector indices
//! address.

use std::collections::BTreeMap;

use super::property::Property;

/// Cartesian product over a list of axes. The first axis varies fastest;
/// empty axes are skipped.
pub fn cartesian_product<T: Clone>(params: &[Vec<T>]) -> Vec<Vec<T>> {
    let mut result: Vec<Vec<T>> = Vec::new();
    for param in params {
        if param.is_empty() {
            continue;
        }
        let mut next = Vec::new();
        for v in param {
            if result.is_empty() {
                next.push(vec![v.clone()]);
            } else {
                for row in &result {
                    let mut row = row.clone();
                    row.push(v.clone());
                    next.push(row);
                }
            }
        }
        result = next;
    }
    result
}

/// Cartesian product over named axes in key order; axes with no entries
/// are skipped. The first key varies fastest.
pub fn cartesian_product_map<T: Clone>(
    params: &BTreeMap<String, Vec<T>>,
) -> Vec<BTreeMap<String, T>> {
    let mut result: Vec<BTreeMap<String, T>> = Vec::new();
    for (key, param) in params {
        if param.is_empty() {
            continue;
        }
        let mut next = Vec::new();
        for v in param {
            if result.is_empty() {
                let mut row = BTreeMap::new();
                row.insert(key.clone(), v.clone());
                next.push(row);
            } else {
                for row in &result {
                    let mut row = row.clone();
                    row.insert(key.clone(), v.clone());
                    next.push(row);
                }
            }
        }
        result = next;
    }
    result
}

/// Enumerates the mono trees of a property tree. Children pruned by cycle
/// detection drop their branch; a tree without variants yields a single
/// clone of itself.
pub fn monomorphize(prop: &Property) -> Vec<Property> {
    if let Some(element) = &prop.element {
        return monomorphize(element)
            .into_iter()
            .map(|elem| {
                let mut np = prop.clone();
                np.element = Some(Box::new(elem));
                np
            })
            .collect();
    }

    if let Some(children) = &prop.children {
        if children.is_empty() {
            return vec![prop.clone()];
        }
        let axes: BTreeMap<String, Vec<Property>> = children
            .iter()
            .map(|(k, v)| (k.clone(), monomorphize(v)))
            .collect();
        return cartesian_product_map(&axes)
            .into_iter()
            .map(|combo| {
                let mut np = prop.clone();
                np.children = Some(combo);
                np
            })
            .collect();
    }

    if let Some(variants) = &prop.variants {
        let mut result = Vec::new();
        for (name, variant) in variants {
            for mono in monomorphize(variant) {
                let mut np = prop.clone();
                let mut selected = BTreeMap::new();
                selected.insert(name.clone(), mono);
                np.variants = Some(selected);
                result.push(np);
            }
        }
        return result;
    }

    vec![prop.clone()]
}
