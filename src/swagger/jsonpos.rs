//! Line/column lookup for JSON pointer targets.
//!
//! One pass over the document resolves every requested pointer at once:
//! the scanner tracks braces, brackets and object keys, and records the
//! position of the key (for object members) or of the value (for array
//! elements and the root) when the path assembled so far matches a
//! requested pointer.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use super::refutil::escape_token;

/// 1-based position of a pointer target in its document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointerPosition {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Error)]
pub enum PosError {
    #[error("invalid JSON at line {line}, column {column}")]
    Syntax { line: usize, column: usize },
    #[error("pointer {pointer} not found in document")]
    NotFound { pointer: String },
}

/// Resolves the positions of the given pointers in one scan. Every pointer
/// must exist in the document.
pub fn pointer_positions(
    doc: &str,
    pointers: &[String],
) -> Result<HashMap<String, PointerPosition>, PosError> {
    let wanted: HashSet<&str> = pointers.iter().map(String::as_str).collect();
    let mut scanner = Scanner {
        rest: doc.chars().peekable(),
        line: 1,
        column: 1,
        wanted,
        found: HashMap::new(),
    };
    scanner.skip_ws();
    let start = scanner.here();
    scanner.record("", start);
    scanner.value(&mut String::new())?;
    for p in pointers {
        if !scanner.found.contains_key(p.as_str()) {
            return Err(PosError::NotFound {
                pointer: p.clone(),
            });
        }
    }
    Ok(scanner.found)
}

struct Scanner<'a> {
    rest: std::iter::Peekable<std::str::Chars<'a>>,
    line: usize,
    column: usize,
    wanted: HashSet<&'a str>,
    found: HashMap<String, PointerPosition>,
}

impl<'a> Scanner<'a> {
    fn here(&self) -> PointerPosition {
        PointerPosition {
            line: self.line,
            column: self.column,
        }
    }

    fn record(&mut self, path: &str, pos: PointerPosition) {
        if self.wanted.contains(path) {
            self.found.entry(path.to_string()).or_insert(pos);
        }
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.rest.next()?;
        if c == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn skip_ws(&mut self) {
        while matches!(self.rest.peek(), Some(' ' | '\t' | '\n' | '\r')) {
            self.bump();
        }
    }

    fn syntax_err(&self) -> PosError {
        PosError::Syntax {
            line: self.line,
            column: self.column,
        }
    }

    fn expect(&mut self, c: char) -> Result<(), PosError> {
        if self.bump() != Some(c) {
            return Err(self.syntax_err());
        }
        Ok(())
    }

    fn value(&mut self, path: &mut String) -> Result<(), PosError> {
        self.skip_ws();
        match self.rest.peek() {
            Some('{') => self.object(path),
            Some('[') => self.array(path),
            Some('"') => {
                self.string()?;
                Ok(())
            }
            Some(_) => self.scalar(),
            None => Err(self.syntax_err()),
        }
    }

    fn object(&mut self, path: &mut String) -> Result<(), PosError> {
        self.expect('{')?;
        self.skip_ws();
        if self.rest.peek() == Some(&'}') {
            self.bump();
            return Ok(());
        }
        loop {
            self.skip_ws();
            let key_pos = self.here();
            let key = self.string()?;
            self.skip_ws();
            self.expect(':')?;

            let len = path.len();
            path.push('/');
            path.push_str(&escape_token(&key));
            self.record(path, key_pos);
            self.value(path)?;
            path.truncate(len);

            self.skip_ws();
            match self.bump() {
                Some(',') => continue,
                Some('}') => return Ok(()),
                _ => return Err(self.syntax_err()),
            }
        }
    }

    fn array(&mut self, path: &mut String) -> Result<(), PosError> {
        self.expect('[')?;
        self.skip_ws();
        if self.rest.peek() == Some(&']') {
            self.bump();
            return Ok(());
        }
        let mut index = 0usize;
        loop {
            self.skip_ws();
            let elem_pos = self.here();
            let len = path.len();
            path.push('/');
            path.push_str(&index.to_string());
            self.record(path, elem_pos);
            self.value(path)?;
            path.truncate(len);

            self.skip_ws();
            match self.bump() {
                Some(',') => {
                    index += 1;
                    continue;
                }
                Some(']') => return Ok(()),
                _ => return Err(self.syntax_err()),
            }
        }
    }

    fn string(&mut self) -> Result<String, PosError> {
        self.expect('"')?;
        let mut out = String::new();
        loop {
            match self.bump() {
                Some('"') => return Ok(out),
                Some('\\') => match self.bump() {
                    Some('"') => out.push('"'),
                    Some('\\') => out.push('\\'),
                    Some('/') => out.push('/'),
                    Some('b') => out.push('\u{8}'),
                    Some('f') => out.push('\u{c}'),
                    Some('n') => out.push('\n'),
                    Some('r') => out.push('\r'),
                    Some('t') => out.push('\t'),
                    Some('u') => {
                        let mut code = 0u32;
                        for _ in 0..4 {
                            let d = self.bump().and_then(|c| c.to_digit(16));
                            code = code * 16 + d.ok_or_else(|| self.syntax_err())?;
                        }
                        // Surrogate pairs are irrelevant for key matching;
                        // substitute on failure.
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                    }
                    _ => return Err(self.syntax_err()),
                },
                Some(c) => out.push(c),
                None => return Err(self.syntax_err()),
            }
        }
    }

    fn scalar(&mut self) -> Result<(), PosError> {
        let mut any = false;
        while matches!(
            self.rest.peek(),
            Some(c) if c.is_ascii_alphanumeric() || matches!(c, '-' | '+' | '.' )
        ) {
            self.bump();
            any = true;
        }
        if any {
            Ok(())
        } else {
            Err(self.syntax_err())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOC: &str = r#"{
  "definitions": {
    "Pet": {
      "type": "object",
      "properties": {
        "name": {"type": "string"},
        "tags": [1, 2, 3]
      }
    }
  }
}"#;

    fn pos(doc: &str, ptr: &str) -> PointerPosition {
        pointer_positions(doc, &[ptr.to_string()]).unwrap()[ptr]
    }

    #[test]
    fn test_positions() {
        assert_eq!(pos(DOC, ""), PointerPosition { line: 1, column: 1 });
        assert_eq!(
            pos(DOC, "/definitions"),
            PointerPosition { line: 2, column: 3 }
        );
        assert_eq!(
            pos(DOC, "/definitions/Pet"),
            PointerPosition { line: 3, column: 5 }
        );
        assert_eq!(
            pos(DOC, "/definitions/Pet/properties/name"),
            PointerPosition { line: 6, column: 9 }
        );
        assert_eq!(
            pos(DOC, "/definitions/Pet/properties/tags/1"),
            PointerPosition { line: 7, column: 21 }
        );
    }

    #[test]
    fn test_multiple_pointers_single_pass() {
        let ptrs = vec![
            "/definitions/Pet/type".to_string(),
            "/definitions/Pet/properties".to_string(),
        ];
        let found = pointer_positions(DOC, &ptrs).unwrap();
        assert_eq!(found.len(), 2);
        assert_eq!(found[&ptrs[0]].line, 4);
        assert_eq!(found[&ptrs[1]].line, 5);
    }

    #[test]
    fn test_escaped_keys() {
        let doc = r#"{"a/b": {"c~d": 1}}"#;
        let p = pos(doc, "/a~1b/c~0d");
        assert_eq!(p, PointerPosition { line: 1, column: 10 });
    }

    #[test]
    fn test_missing_pointer_errors() {
        let err = pointer_positions(DOC, &["/nope".to_string()]).unwrap_err();
        assert!(matches!(err, PosError::NotFound { .. }));
    }

    #[test]
    fn test_duplicate_key_first_position_wins() {
        let doc = "{\"k\": 1, \"k\": 2}";
        assert_eq!(pos(doc, "/k"), PointerPosition { line: 1, column: 2 });
    }
}
