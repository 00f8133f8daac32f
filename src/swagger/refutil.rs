//! JSON reference plumbing: normalized `(file, pointer)` references, the
//! shared document store, and recursive `$ref` resolution with cycle
//! tracking.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use thiserror::Error;

use super::schema::{ResponseFragment, Schema};

/// Errors from reference resolution and document loading.
#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("reading {path}: {source}")]
    Load {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("parsing {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("reference {reference} has no target")]
    MissingPointer { reference: String },
    #[error("deserializing fragment at {reference}: {source}")]
    Fragment {
        reference: String,
        source: serde_json::Error,
    },
    #[error("normalizing reference {text}: {reason}")]
    BadRef { text: String, reason: String },
}

/// A normalized JSON reference: an absolute, symlink-free file path plus a
/// JSON pointer into that file. Two references are equal iff both
/// components match.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct JsonRef {
    file: PathBuf,
    pointer: String,
}

impl JsonRef {
    /// Builds a reference from an already-normalized file path and pointer.
    pub fn from_parts(file: PathBuf, pointer: impl Into<String>) -> Self {
        JsonRef {
            file,
            pointer: pointer.into(),
        }
    }

    /// Normalizes a textual reference against the file that contains it.
    /// Fragment-only references inherit `base_file`; relative file parts
    /// resolve against its directory.
    pub fn normalize(text: &str, base_file: &Path) -> Result<Self, ResolveError> {
        let (file_part, pointer) = split_ref(text);
        if file_part.is_empty() {
            return Ok(JsonRef {
                file: base_file.to_path_buf(),
                pointer,
            });
        }
        let dir = base_file.parent().unwrap_or_else(|| Path::new("."));
        Self::normalize_in_dir(text, dir).map(|mut r| {
            r.pointer = pointer;
            r
        })
    }

    /// Normalizes a textual reference whose file part is resolved against a
    /// directory (used for index entries relative to the spec dir).
    pub fn normalize_in_dir(text: &str, dir: &Path) -> Result<Self, ResolveError> {
        let (file_part, pointer) = split_ref(text);
        if file_part.is_empty() {
            return Err(ResolveError::BadRef {
                text: text.to_string(),
                reason: "missing file part".to_string(),
            });
        }
        let raw = PathBuf::from(&file_part);
        let joined = if raw.is_absolute() { raw } else { dir.join(raw) };
        let file = joined.canonicalize().map_err(|e| ResolveError::BadRef {
            text: text.to_string(),
            reason: e.to_string(),
        })?;
        Ok(JsonRef { file, pointer })
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn pointer(&self) -> &str {
        &self.pointer
    }

    /// Returns the reference extended by pointer tokens (escaped per
    /// RFC 6901).
    pub fn appended(&self, tokens: &[&str]) -> Self {
        let mut pointer = self.pointer.clone();
        for tk in tokens {
            pointer.push('/');
            pointer.push_str(&escape_token(tk));
        }
        JsonRef {
            file: self.file.clone(),
            pointer,
        }
    }

    /// Drops the last pointer token.
    pub fn parent(&self) -> Self {
        let pointer = match self.pointer.rfind('/') {
            Some(i) => self.pointer[..i].to_string(),
            None => String::new(),
        };
        JsonRef {
            file: self.file.clone(),
            pointer,
        }
    }

    /// The last pointer token, unescaped. Empty for a whole-document
    /// reference.
    pub fn last_token(&self) -> String {
        match self.pointer.rfind('/') {
            Some(i) => unescape_token(&self.pointer[i + 1..]),
            None => String::new(),
        }
    }
}

impl fmt::Display for JsonRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.file.display(), self.pointer)
    }
}

fn split_ref(text: &str) -> (String, String) {
    match text.split_once('#') {
        Some((file, ptr)) => (file.to_string(), ptr.to_string()),
        None => (text.to_string(), String::new()),
    }
}

pub(crate) fn escape_token(tk: &str) -> String {
    tk.replace('~', "~0").replace('/', "~1")
}

pub(crate) fn unescape_token(tk: &str) -> String {
    tk.replace("~1", "/").replace("~0", "~")
}

/// Result of a recursive schema resolution. When `ok` is false a reference
/// cycle was hit; `schema` and `reference` then describe the node *before*
/// the already-visited reference, and callers skip the branch.
#[derive(Debug)]
pub struct Resolution {
    pub schema: Schema,
    pub reference: JsonRef,
    pub visited: BTreeSet<String>,
    pub ok: bool,
}

/// Same shape as [`Resolution`] for response fragments, which may chain
/// through `#/responses/...`.
#[derive(Debug)]
pub struct ResponseResolution {
    pub response: ResponseFragment,
    pub reference: JsonRef,
    pub visited: BTreeSet<String>,
    pub ok: bool,
}

/// Loads and caches Swagger documents. Read-only after load; shared freely
/// between expanders.
#[derive(Default)]
pub struct SpecStore {
    docs: Mutex<HashMap<PathBuf, Arc<Value>>>,
}

impl SpecStore {
    pub fn new() -> Self {
        SpecStore::default()
    }

    /// Loads (or returns the cached) document for a normalized path.
    pub fn load(&self, path: &Path) -> Result<Arc<Value>, ResolveError> {
        if let Some(doc) = self.docs.lock().unwrap().get(path) {
            return Ok(doc.clone());
        }
        let raw = std::fs::read_to_string(path).map_err(|e| ResolveError::Load {
            path: path.to_path_buf(),
            source: e,
        })?;
        let doc: Value = serde_json::from_str(&raw).map_err(|e| ResolveError::Parse {
            path: path.to_path_buf(),
            source: e,
        })?;
        let doc = Arc::new(doc);
        self.docs
            .lock()
            .unwrap()
            .insert(path.to_path_buf(), doc.clone());
        Ok(doc)
    }

    /// The raw fragment a reference points at.
    pub fn fragment(&self, r: &JsonRef) -> Result<Value, ResolveError> {
        let doc = self.load(r.file())?;
        doc.pointer(r.pointer())
            .cloned()
            .ok_or_else(|| ResolveError::MissingPointer {
                reference: r.to_string(),
            })
    }

    /// The fragment a reference points at, deserialized as a schema.
    pub fn schema_at(&self, r: &JsonRef) -> Result<Schema, ResolveError> {
        serde_json::from_value(self.fragment(r)?).map_err(|e| ResolveError::Fragment {
            reference: r.to_string(),
            source: e,
        })
    }

    /// Recursively resolves a schema reference until the fragment carries no
    /// further `$ref`, or an already-visited reference is hit. The incoming
    /// visited set is copied, never mutated. `treat_input_as_own_ref`
    /// additionally inserts the input reference itself into the visited set
    /// (used when the input names a definition, e.g. the expansion root or a
    /// variant model).
    pub fn rresolve(
        &self,
        input: &JsonRef,
        visited: &BTreeSet<String>,
        treat_input_as_own_ref: bool,
    ) -> Result<Resolution, ResolveError> {
        let mut visited = visited.clone();
        let mut current = input.clone();
        if treat_input_as_own_ref {
            if visited.contains(&current.to_string()) {
                return Ok(Resolution {
                    schema: self.schema_at(&current)?,
                    reference: current,
                    visited,
                    ok: false,
                });
            }
            visited.insert(current.to_string());
        }
        loop {
            let schema = self.schema_at(&current)?;
            let Some(raw_ref) = schema.reference.clone() else {
                return Ok(Resolution {
                    schema,
                    reference: current,
                    visited,
                    ok: true,
                });
            };
            let next = JsonRef::normalize(&raw_ref, current.file())?;
            if visited.contains(&next.to_string()) {
                return Ok(Resolution {
                    schema,
                    reference: current,
                    visited,
                    ok: false,
                });
            }
            visited.insert(next.to_string());
            current = next;
        }
    }

    /// [`SpecStore::rresolve`] over response fragments.
    pub fn rresolve_response(
        &self,
        input: &JsonRef,
        visited: &BTreeSet<String>,
        treat_input_as_own_ref: bool,
    ) -> Result<ResponseResolution, ResolveError> {
        let mut visited = visited.clone();
        let mut current = input.clone();
        if treat_input_as_own_ref {
            visited.insert(current.to_string());
        }
        loop {
            let response: ResponseFragment =
                serde_json::from_value(self.fragment(&current)?).map_err(|e| {
                    ResolveError::Fragment {
                        reference: current.to_string(),
                        source: e,
                    }
                })?;
            let Some(raw_ref) = response.reference.clone() else {
                return Ok(ResponseResolution {
                    response,
                    reference: current,
                    visited,
                    ok: true,
                });
            };
            let next = JsonRef::normalize(&raw_ref, current.file())?;
            if visited.contains(&next.to_string()) {
                return Ok(ResponseResolution {
                    response,
                    reference: current,
                    visited,
                    ok: false,
                });
            }
            visited.insert(next.to_string());
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_spec(dir: &TempDir, name: &str, body: &str) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).unwrap();
        path.canonicalize().unwrap()
    }

    #[test]
    fn test_normalize_fragment_only_inherits_file() {
        let dir = TempDir::new().unwrap();
        let a = write_spec(&dir, "a.json", "{}");
        let r = JsonRef::normalize("#/definitions/Foo", &a).unwrap();
        assert_eq!(r.file(), a.as_path());
        assert_eq!(r.pointer(), "/definitions/Foo");
    }

    #[test]
    fn test_normalize_relative_file() {
        let dir = TempDir::new().unwrap();
        let a = write_spec(&dir, "a.json", "{}");
        let b = write_spec(&dir, "b.json", "{}");
        let r = JsonRef::normalize("b.json#/definitions/Bar", &a).unwrap();
        assert_eq!(r.file(), b.as_path());
        assert_eq!(r.pointer(), "/definitions/Bar");
    }

    #[test]
    fn test_append_and_tokens() {
        let r = JsonRef::from_parts(PathBuf::from("/x.json"), "/definitions");
        let r = r.appended(&["a/b"]);
        assert_eq!(r.pointer(), "/definitions/a~1b");
        assert_eq!(r.last_token(), "a/b");
        assert_eq!(r.parent().pointer(), "/definitions");
    }

    #[test]
    fn test_rresolve_chases_refs() {
        let dir = TempDir::new().unwrap();
        let a = write_spec(
            &dir,
            "a.json",
            r##"{
              "definitions": {
                "Alias": {"$ref": "#/definitions/Target"},
                "Target": {"type": "string"}
              }
            }"##,
        );
        let store = SpecStore::new();
        let input = JsonRef::from_parts(a.clone(), "/definitions/Alias".to_string());
        let res = store.rresolve(&input, &BTreeSet::new(), true).unwrap();
        assert!(res.ok);
        assert_eq!(res.reference.pointer(), "/definitions/Target");
        assert_eq!(res.schema.type_name().unwrap(), Some("string"));
        assert!(res.visited.contains(&format!("{}#/definitions/Alias", a.display())));
        assert!(res.visited.contains(&format!("{}#/definitions/Target", a.display())));
    }

    #[test]
    fn test_rresolve_reports_cycle() {
        let dir = TempDir::new().unwrap();
        let a = write_spec(
            &dir,
            "a.json",
            r##"{
              "definitions": {
                "A": {"$ref": "#/definitions/B"},
                "B": {"$ref": "#/definitions/A"}
              }
            }"##,
        );
        let store = SpecStore::new();
        let input = JsonRef::from_parts(a, "/definitions/A".to_string());
        let res = store.rresolve(&input, &BTreeSet::new(), true).unwrap();
        assert!(!res.ok);
    }

    #[test]
    fn test_rresolve_cross_file() {
        let dir = TempDir::new().unwrap();
        write_spec(
            &dir,
            "b.json",
            r#"{"definitions": {"Remote": {"type": "integer"}}}"#,
        );
        let a = write_spec(
            &dir,
            "a.json",
            r#"{"definitions": {"Local": {"$ref": "b.json#/definitions/Remote"}}}"#,
        );
        let store = SpecStore::new();
        let input = JsonRef::from_parts(a, "/definitions/Local".to_string());
        let res = store.rresolve(&input, &BTreeSet::new(), false).unwrap();
        assert!(res.ok);
        assert!(res.reference.file().ends_with("b.json"));
        assert_eq!(res.schema.type_name().unwrap(), Some("integer"));
    }

    #[test]
    fn test_missing_pointer_errors() {
        let dir = TempDir::new().unwrap();
        let a = write_spec(&dir, "a.json", "{}");
        let store = SpecStore::new();
        let input = JsonRef::from_parts(a, "/definitions/Nope".to_string());
        assert!(matches!(
            store.fragment(&input),
            Err(ResolveError::MissingPointer { .. })
        ));
    }
}
