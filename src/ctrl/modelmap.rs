//! Correlation of client output with the schema positions recorded by the
//! mock server.
//!
//! Both sides are flattened to `value → pointer` maps, dropping values
//! that occur more than once (an ambiguous value cannot act as a key), and
//! intersected by value. Merged maps resolve each position to a
//! `file:line:column` link.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;

use crate::swagger::json_value::number_string;
use crate::swagger::jsonpos::pointer_positions;
use crate::swagger::{value_map, JsonRef, JsonValue, ValuePos};

/// Maps a JSON pointer in the application model to the position of the
/// schema property that sourced its value.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SingleModelMap(pub BTreeMap<String, ValuePos>);

/// Repository the GitHub links point at when the index does not name one.
const DEFAULT_GITHUB_BASE_URL: &str = "https://github.com/Azure/azure-rest-api-specs/blob";

/// Links and relative-path rewriting applied to a map before output.
#[derive(Debug, Clone, Default)]
pub struct LinkContext {
    /// Commit id of the spec checkout; enables the repository link.
    pub commit: Option<String>,
    /// Base URL of the spec repository, e.g.
    /// `https://github.com/<org>/<repo>/blob`. Falls back to
    /// [`DEFAULT_GITHUB_BASE_URL`].
    pub github_base_url: Option<String>,
    /// Directory spec files and local links are made relative to.
    pub specdir: PathBuf,
}

impl SingleModelMap {
    /// Correlates one app model with the annotated responses captured
    /// during its execution.
    pub fn correlate(app_model: &Value, records: &[JsonValue]) -> SingleModelMap {
        let api_values = value_map(records.iter());
        let app_values = json_value_map(app_model);
        let mut out = BTreeMap::new();
        for (value, app_pointer) in app_values {
            if let Some(pos) = api_values.get(&value) {
                out.insert(app_pointer, (*pos).clone());
            }
        }
        SingleModelMap(out)
    }

    /// Attaches `file:line:column` links (and repository links when a
    /// commit is known) to every position. Every referenced pointer must
    /// still exist in its file.
    pub fn add_links(&mut self, ctx: &LinkContext) -> Result<()> {
        let mut by_file: HashMap<PathBuf, Vec<String>> = HashMap::new();
        for pos in self.0.values() {
            by_file
                .entry(pos.reference.file().to_path_buf())
                .or_default()
                .push(pos.reference.pointer().to_string());
        }

        let mut positions = HashMap::new();
        for (file, pointers) in by_file {
            let doc = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let found = pointer_positions(&doc, &pointers)
                .with_context(|| format!("locating pointers in {}", file.display()))?;
            positions.insert(file, found);
        }

        for pos in self.0.values_mut() {
            let file = pos.reference.file();
            let Some(found) = positions
                .get(file)
                .and_then(|m| m.get(pos.reference.pointer()))
            else {
                bail!("no position found for {}", pos.reference);
            };
            pos.link_local = Some(format!(
                "{}:{}:{}",
                file.display(),
                found.line,
                found.column
            ));
            if let Some(commit) = &ctx.commit {
                let base = ctx
                    .github_base_url
                    .as_deref()
                    .unwrap_or(DEFAULT_GITHUB_BASE_URL);
                let rel = relative_to(file, &ctx.specdir);
                pos.link_github = Some(format!(
                    "{}/{}/{}#L{}",
                    base,
                    commit,
                    rel.display(),
                    found.line
                ));
            }
        }
        Ok(())
    }

    /// Rewrites refs and local links relative to the spec directory for
    /// output.
    pub fn relativize(&mut self, specdir: &Path) {
        for pos in self.0.values_mut() {
            let rel = relative_to(pos.reference.file(), specdir);
            pos.reference = JsonRef::from_parts(rel, pos.reference.pointer().to_string());
            if let Some(local) = &pos.link_local {
                if let Some((file, line_col)) = local.split_once(':') {
                    let rel = relative_to(Path::new(file), specdir);
                    pos.link_local = Some(format!("{}:{}", rel.display(), line_col));
                }
            }
            if let Some(rm) = &mut pos.root_model {
                let rel = relative_to(rm.path_ref.file(), specdir);
                rm.path_ref = JsonRef::from_parts(rel, rm.path_ref.pointer().to_string());
            }
        }
    }
}

/// Same as [`SingleModelMap`] but an app pointer may map to several schema
/// positions, produced by merging the maps of vibrations and repeated
/// executions. Deduplicated and sorted by schema address.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ModelMap(pub BTreeMap<String, Vec<ValuePos>>);

impl ModelMap {
    pub fn merge(models: Vec<SingleModelMap>) -> ModelMap {
        let mut tmp: BTreeMap<String, BTreeMap<String, ValuePos>> = BTreeMap::new();
        for model in models {
            for (app_pointer, pos) in model.0 {
                tmp.entry(app_pointer)
                    .or_default()
                    .insert(pos.addr.to_string(), pos);
            }
        }
        // The inner key (schema address) both deduplicates and orders.
        ModelMap(
            tmp.into_iter()
                .map(|(k, m)| (k, m.into_values().collect()))
                .collect(),
        )
    }
}

/// Flattens a JSON document into `pointer → scalar` pairs; arrays use
/// their actual indices, null leaves are skipped.
pub fn flatten_json(value: &Value) -> BTreeMap<String, Value> {
    let mut out = BTreeMap::new();
    flatten_into(value, String::new(), &mut out);
    out
}

fn flatten_into(value: &Value, pointer: String, out: &mut BTreeMap<String, Value>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                let token = k.replace('~', "~0").replace('/', "~1");
                flatten_into(v, format!("{}/{}", pointer, token), out);
            }
        }
        Value::Array(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten_into(v, format!("{}/{}", pointer, i), out);
            }
        }
        Value::Null => {}
        scalar => {
            out.insert(pointer, scalar.clone());
        }
    }
}

/// Flattens an app model and inverts it into `value-string → pointer`,
/// dropping values that occur more than once.
pub fn json_value_map(value: &Value) -> HashMap<String, String> {
    let mut out: HashMap<String, String> = HashMap::new();
    let mut dropped: HashMap<String, ()> = HashMap::new();
    for (pointer, leaf) in flatten_json(value) {
        let key = match &leaf {
            Value::String(s) => s.clone(),
            Value::Number(n) => number_string(n),
            Value::Bool(b) => if *b { "TRUE" } else { "FALSE" }.to_string(),
            _ => continue,
        };
        if dropped.contains_key(&key) {
            continue;
        }
        if out.remove(&key).is_some() {
            dropped.insert(key, ());
            continue;
        }
        out.insert(key, pointer);
    }
    out
}

/// Compares two flattened documents: pointers only in the first, only in
/// the second, and pointers present in both with differing values.
pub fn compare_flattened(
    m1: &BTreeMap<String, Value>,
    m2: &BTreeMap<String, Value>,
) -> (Vec<String>, Vec<String>, Vec<String>) {
    let mut only1 = Vec::new();
    let mut only2 = Vec::new();
    let mut diff = Vec::new();
    for (k, v1) in m1 {
        match m2.get(k) {
            None => only1.push(k.clone()),
            Some(v2) if v1 != v2 => diff.push(k.clone()),
            Some(_) => {}
        }
    }
    for k in m2.keys() {
        if !m1.contains_key(k) {
            only2.push(k.clone());
        }
    }
    (only1, only2, diff)
}

fn relative_to(path: &Path, base: &Path) -> PathBuf {
    path.strip_prefix(base)
        .map(Path::to_path_buf)
        .unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::swagger::PropertyAddr;
    use serde_json::json;

    fn pos(file: &str, pointer: &str, addr: &str) -> ValuePos {
        ValuePos {
            reference: JsonRef::from_parts(PathBuf::from(file), pointer.to_string()),
            addr: PropertyAddr::parse(addr).unwrap(),
            root_model: None,
            link_local: None,
            link_github: None,
        }
    }

    #[test]
    fn test_flatten_json() {
        let flat = flatten_json(&json!({
            "str": "foo",
            "arr": [1, {"deep": true}],
            "null": null
        }));
        assert_eq!(flat["/str"], json!("foo"));
        assert_eq!(flat["/arr/0"], json!(1));
        assert_eq!(flat["/arr/1/deep"], json!(true));
        assert!(!flat.contains_key("/null"));
    }

    #[test]
    fn test_json_value_map() {
        let m = json_value_map(&json!({
            "str": "foo",
            "number": 1,
            "bool": true,
            "array": [1],
            "object": {"p1": "bar"},
            "null": null
        }));
        // "1" appears twice and is dropped; null never participates.
        let mut expect = HashMap::new();
        expect.insert("foo".to_string(), "/str".to_string());
        expect.insert("bar".to_string(), "/object/p1".to_string());
        expect.insert("TRUE".to_string(), "/bool".to_string());
        assert_eq!(m, expect);
    }

    #[test]
    fn test_compare_flattened() {
        let base = flatten_json(&json!({"a": 1, "b": "x", "c": true}));
        let vibrated = flatten_json(&json!({"a": 1, "b": "y", "d": true}));
        let (only1, only2, diff) = compare_flattened(&base, &vibrated);
        assert_eq!(only1, vec!["/c"]);
        assert_eq!(only2, vec!["/d"]);
        assert_eq!(diff, vec!["/b"]);
    }

    #[test]
    fn test_merge_dedups_by_schema_address() {
        let mut m1 = SingleModelMap::default();
        m1.0.insert("/a".into(), pos("/s/x.json", "/definitions/X/properties/a", "a"));
        let mut m2 = SingleModelMap::default();
        m2.0.insert("/a".into(), pos("/s/x.json", "/definitions/X/properties/a", "a"));
        m2.0.insert("/b".into(), pos("/s/x.json", "/definitions/X/properties/b", "b"));

        let merged = ModelMap::merge(vec![m1, m2]);
        assert_eq!(merged.0["/a"].len(), 1);
        assert_eq!(merged.0["/b"].len(), 1);
    }

    #[test]
    fn test_merge_sorts_by_schema_address() {
        let mut m1 = SingleModelMap::default();
        m1.0.insert("/a".into(), pos("/s/x.json", "/definitions/X/properties/z", "z"));
        let mut m2 = SingleModelMap::default();
        m2.0.insert("/a".into(), pos("/s/x.json", "/definitions/X/properties/b", "b"));

        let merged = ModelMap::merge(vec![m1, m2]);
        let addrs: Vec<String> = merged.0["/a"].iter().map(|p| p.addr.to_string()).collect();
        assert_eq!(addrs, vec!["b", "z"]);
    }

    #[test]
    fn test_add_links_and_relativize() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = dir.path().join("x.json");
        std::fs::write(
            &spec,
            "{\n  \"definitions\": {\n    \"X\": {\n      \"properties\": {\n        \"a\": {\"type\": \"string\"}\n      }\n    }\n  }\n}",
        )
        .unwrap();
        let spec = spec.canonicalize().unwrap();

        let mut m = SingleModelMap::default();
        m.0.insert(
            "/out".into(),
            ValuePos {
                reference: JsonRef::from_parts(
                    spec.clone(),
                    "/definitions/X/properties/a".to_string(),
                ),
                addr: PropertyAddr::parse("a").unwrap(),
                root_model: None,
                link_local: None,
                link_github: None,
            },
        );

        let ctx = LinkContext {
            commit: Some("abc123".into()),
            github_base_url: Some("https://github.com/acme/specs/blob".into()),
            specdir: dir.path().canonicalize().unwrap(),
        };
        m.add_links(&ctx).unwrap();
        let pos = &m.0["/out"];
        assert_eq!(
            pos.link_local.as_deref(),
            Some(format!("{}:5:9", spec.display()).as_str())
        );
        assert_eq!(
            pos.link_github.as_deref(),
            Some("https://github.com/acme/specs/blob/abc123/x.json#L5")
        );

        m.relativize(&ctx.specdir);
        let pos = &m.0["/out"];
        assert_eq!(pos.reference.to_string(), "x.json#/definitions/X/properties/a");
        assert_eq!(pos.link_local.as_deref(), Some("x.json:5:9"));
    }

    #[test]
    fn test_add_links_commit_alone_uses_default_base() {
        let dir = tempfile::TempDir::new().unwrap();
        let spec = dir.path().join("x.json");
        std::fs::write(&spec, "{\"definitions\": {\"X\": {\"type\": \"object\"}}}").unwrap();
        let spec = spec.canonicalize().unwrap();

        let mut m = SingleModelMap::default();
        m.0.insert(
            "/out".into(),
            ValuePos {
                reference: JsonRef::from_parts(spec, "/definitions/X".to_string()),
                addr: PropertyAddr::root(),
                root_model: None,
                link_local: None,
                link_github: None,
            },
        );

        let ctx = LinkContext {
            commit: Some("abc123".into()),
            github_base_url: None,
            specdir: dir.path().canonicalize().unwrap(),
        };
        m.add_links(&ctx).unwrap();
        let github = m.0["/out"].link_github.as_deref().unwrap();
        assert!(github.starts_with(&format!("{}/abc123/x.json#L", DEFAULT_GITHUB_BASE_URL)));
    }

    #[test]
    fn test_serialized_shape() {
        let mut m = SingleModelMap::default();
        m.0.insert("/a".into(), pos("x.json", "/definitions/X/properties/a", "a"));
        let merged = ModelMap::merge(vec![m]);
        let out = serde_json::to_value(&merged).unwrap();
        assert_eq!(
            out,
            json!({"/a": [{"ref": "x.json#/definitions/X/properties/a", "addr": "a"}]})
        );
    }
}
