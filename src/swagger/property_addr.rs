//! Addresses of properties inside a schema instance.
//!
//! An address is a sequence of steps following the *shape* of the instance
//! (not the schema path): `prop` steps descend into object members, `*`
//! steps descend into array elements or map values. A step may carry a
//! variant tag `{V}` recording which polymorphic variant was entered there.

use std::fmt;

use thiserror::Error;

const DELIM: char = '/';
const INDEX: char = '*';
const VARIANT_OPEN: char = '{';
const VARIANT_CLOSE: char = '}';
const ESCAPE: char = '\\';

/// Kind of a single address step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum StepKind {
    /// Descend into the named object member.
    Prop(String),
    /// Descend into an array element or map value.
    Index,
}

/// One step of a [`PropertyAddr`], optionally tagged with the variant
/// entered at this step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AddrStep {
    pub kind: StepKind,
    pub variant: Option<String>,
}

impl AddrStep {
    pub fn prop(name: impl Into<String>) -> Self {
        AddrStep {
            kind: StepKind::Prop(name.into()),
            variant: None,
        }
    }

    pub fn index() -> Self {
        AddrStep {
            kind: StepKind::Index,
            variant: None,
        }
    }
}

impl fmt::Display for AddrStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            StepKind::Index => f.write_str("*")?,
            StepKind::Prop(name) => f.write_str(&escape_prop(name))?,
        }
        if let Some(v) = &self.variant {
            write!(f, "{{{}}}", escape_variant(v))?;
        }
        Ok(())
    }
}

/// Address of a property in the instance tree. The empty sequence is the
/// root. Textual form: steps joined by `/`; reserved runes `/ * { } \` are
/// backslash-escaped inside property names, `\` and `}` inside variants.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PropertyAddr(Vec<AddrStep>);

/// Errors produced by [`PropertyAddr::parse`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AddrParseError {
    #[error("empty step in address")]
    EmptyStep,
    #[error("empty variant tag")]
    EmptyVariant,
    #[error("escape at end of input")]
    StrayEscape,
    #[error("invalid escape `\\{0}`")]
    InvalidEscape(char),
    #[error("unmatched `{{` in address")]
    UnmatchedVariant,
    #[error("unexpected text after variant tag")]
    TextAfterVariant,
}

impl PropertyAddr {
    /// The root address (no steps).
    pub fn root() -> Self {
        PropertyAddr(Vec::new())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn steps(&self) -> &[AddrStep] {
        &self.0
    }

    /// Returns the address extended by one step.
    pub fn appended(&self, step: AddrStep) -> Self {
        let mut steps = self.0.clone();
        steps.push(step);
        PropertyAddr(steps)
    }

    pub fn appended_prop(&self, name: &str) -> Self {
        self.appended(AddrStep::prop(name))
    }

    pub fn appended_index(&self) -> Self {
        self.appended(AddrStep::index())
    }

    /// Returns the address with the variant tag set on its last step. For
    /// the root address a property step with an empty name is appended to
    /// carry the tag.
    pub fn with_variant(&self, tag: &str) -> Self {
        let mut steps = self.0.clone();
        match steps.last_mut() {
            Some(last) => last.variant = Some(tag.to_string()),
            None => steps.push(AddrStep {
                kind: StepKind::Prop(String::new()),
                variant: Some(tag.to_string()),
            }),
        }
        PropertyAddr(steps)
    }

    /// Name of the last property step, if the address ends in one.
    pub fn last_prop_name(&self) -> Option<&str> {
        match self.0.last().map(|s| &s.kind) {
            Some(StepKind::Prop(name)) => Some(name.as_str()),
            _ => None,
        }
    }

    /// Maps the address to a standard JSON pointer. Index steps become `0`
    /// (the address follows positions in the schema instance, not live
    /// arrays); the root address maps to the empty pointer.
    pub fn to_pointer(&self) -> String {
        if self.0.is_empty() {
            return String::new();
        }
        let mut out = String::new();
        for step in &self.0 {
            out.push('/');
            match &step.kind {
                StepKind::Index => out.push('0'),
                StepKind::Prop(name) => {
                    out.push_str(&name.replace('~', "~0").replace('/', "~1"))
                }
            }
        }
        out
    }

    /// Parses the textual form. Inverse of `Display` for every legal
    /// address.
    pub fn parse(input: &str) -> Result<Self, AddrParseError> {
        if input.is_empty() {
            return Ok(PropertyAddr::root());
        }

        let mut steps = Vec::new();
        let mut value = String::new();
        let mut variant = String::new();
        let mut saw_variant = false;
        let mut value_escaped = false;
        let mut in_variant = false;

        let flush = |value: &mut String,
                         variant: &mut String,
                         saw_variant: &mut bool,
                         value_escaped: &mut bool,
                         steps: &mut Vec<AddrStep>|
         -> Result<(), AddrParseError> {
            if value.is_empty() && !*saw_variant {
                return Err(AddrParseError::EmptyStep);
            }
            let kind = if value.as_str() == "*" && !*value_escaped {
                StepKind::Index
            } else {
                StepKind::Prop(std::mem::take(value))
            };
            let tag = if *saw_variant {
                Some(std::mem::take(variant))
            } else {
                None
            };
            value.clear();
            *saw_variant = false;
            *value_escaped = false;
            steps.push(AddrStep { kind, variant: tag });
            Ok(())
        };

        let mut chars = input.chars().peekable();
        loop {
            let Some(c) = chars.next() else {
                if in_variant {
                    return Err(AddrParseError::UnmatchedVariant);
                }
                flush(
                    &mut value,
                    &mut variant,
                    &mut saw_variant,
                    &mut value_escaped,
                    &mut steps,
                )?;
                break;
            };
            match c {
                DELIM if !in_variant => flush(
                    &mut value,
                    &mut variant,
                    &mut saw_variant,
                    &mut value_escaped,
                    &mut steps,
                )?,
                ESCAPE => {
                    let pk = chars.next().ok_or(AddrParseError::StrayEscape)?;
                    if in_variant {
                        match pk {
                            ESCAPE | VARIANT_CLOSE => variant.push(pk),
                            _ => return Err(AddrParseError::InvalidEscape(pk)),
                        }
                    } else {
                        match pk {
                            ESCAPE | DELIM | INDEX | VARIANT_OPEN | VARIANT_CLOSE => {
                                value.push(pk);
                                value_escaped = true;
                            }
                            _ => return Err(AddrParseError::InvalidEscape(pk)),
                        }
                    }
                }
                VARIANT_OPEN => {
                    if in_variant {
                        variant.push(c);
                    } else {
                        in_variant = true;
                        saw_variant = true;
                    }
                }
                VARIANT_CLOSE if in_variant => {
                    if variant.is_empty() {
                        return Err(AddrParseError::EmptyVariant);
                    }
                    in_variant = false;
                    match chars.peek() {
                        None | Some(&DELIM) => {}
                        Some(_) => return Err(AddrParseError::TextAfterVariant),
                    }
                }
                _ => {
                    if in_variant {
                        variant.push(c);
                    } else {
                        value.push(c);
                    }
                }
            }
        }

        Ok(PropertyAddr(steps))
    }
}

impl fmt::Display for PropertyAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, step) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{}", step)?;
        }
        Ok(())
    }
}

impl std::str::FromStr for PropertyAddr {
    type Err = AddrParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        PropertyAddr::parse(s)
    }
}

fn escape_prop(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        if matches!(c, ESCAPE | DELIM | INDEX | VARIANT_OPEN | VARIANT_CLOSE) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

fn escape_variant(v: &str) -> String {
    let mut out = String::with_capacity(v.len());
    for c in v.chars() {
        if matches!(c, ESCAPE | VARIANT_CLOSE) {
            out.push(ESCAPE);
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(s: &str) -> PropertyAddr {
        PropertyAddr::parse(s).unwrap()
    }

    #[test]
    fn test_parse_root() {
        assert_eq!(addr(""), PropertyAddr::root());
    }

    #[test]
    fn test_parse_steps() {
        assert_eq!(
            addr("a/b"),
            PropertyAddr(vec![AddrStep::prop("a"), AddrStep::prop("b")])
        );
        assert_eq!(addr("*"), PropertyAddr(vec![AddrStep::index()]));
        assert_eq!(
            addr("a/*/b"),
            PropertyAddr(vec![
                AddrStep::prop("a"),
                AddrStep::index(),
                AddrStep::prop("b")
            ])
        );
    }

    #[test]
    fn test_parse_star_inside_name_is_prop() {
        assert_eq!(addr("a*"), PropertyAddr(vec![AddrStep::prop("a*")]));
        assert_eq!(addr("*a"), PropertyAddr(vec![AddrStep::prop("*a")]));
        // An escaped lone star is a property named "*", not an index step.
        assert_eq!(addr("\\*"), PropertyAddr(vec![AddrStep::prop("*")]));
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            addr("{Foo}"),
            PropertyAddr(vec![AddrStep {
                kind: StepKind::Prop(String::new()),
                variant: Some("Foo".into()),
            }])
        );
        assert_eq!(
            addr("a{Foo}/b"),
            PropertyAddr(vec![
                AddrStep {
                    kind: StepKind::Prop("a".into()),
                    variant: Some("Foo".into()),
                },
                AddrStep::prop("b"),
            ])
        );
        assert_eq!(
            addr("a/*{Foo}/b"),
            PropertyAddr(vec![
                AddrStep::prop("a"),
                AddrStep {
                    kind: StepKind::Index,
                    variant: Some("Foo".into()),
                },
                AddrStep::prop("b"),
            ])
        );
        // `{` inside a variant is plain content.
        assert_eq!(
            addr("{{}"),
            PropertyAddr(vec![AddrStep {
                kind: StepKind::Prop(String::new()),
                variant: Some("{".into()),
            }])
        );
        // `/` inside a variant is plain content too.
        assert_eq!(
            addr("a{Foo/Bar}"),
            PropertyAddr(vec![AddrStep {
                kind: StepKind::Prop("a".into()),
                variant: Some("Foo/Bar".into()),
            }])
        );
        assert_eq!(
            addr("a{Foo.{Bar\\}}/b"),
            PropertyAddr(vec![
                AddrStep {
                    kind: StepKind::Prop("a".into()),
                    variant: Some("Foo.{Bar}".into()),
                },
                AddrStep::prop("b"),
            ])
        );
    }

    #[test]
    fn test_parse_escapes_in_name() {
        assert_eq!(addr("a\\/b"), PropertyAddr(vec![AddrStep::prop("a/b")]));
        assert_eq!(addr("a\\{b"), PropertyAddr(vec![AddrStep::prop("a{b")]));
        assert_eq!(addr("a\\\\b"), PropertyAddr(vec![AddrStep::prop("a\\b")]));
    }

    #[test]
    fn test_parse_errors() {
        for input in ["a\\a", "/", "a//b", "{}", "a{}", "a{Foo}a", "a\\", "a{Foo"] {
            assert!(
                PropertyAddr::parse(input).is_err(),
                "expected error for {input:?}"
            );
        }
    }

    #[test]
    fn test_display_roundtrip() {
        for input in [
            "",
            "a",
            "a/b",
            "*",
            "a/*/b",
            "{Foo}",
            "a{Foo}/b",
            "a/*{Foo}/b",
            "a\\/b",
            "a\\*",
            "a{Foo.{Bar\\}}/b",
        ] {
            let a = addr(input);
            assert_eq!(addr(&a.to_string()), a, "roundtrip failed for {input:?}");
        }
    }

    #[test]
    fn test_display_escapes_reserved_runes() {
        let a = PropertyAddr(vec![AddrStep::prop("a/b*c{d}e\\f")]);
        assert_eq!(a.to_string(), "a\\/b\\*c\\{d\\}e\\\\f");
        assert_eq!(addr(&a.to_string()), a);
    }

    #[test]
    fn test_to_pointer() {
        assert_eq!(addr("").to_pointer(), "");
        assert_eq!(addr("a/b").to_pointer(), "/a/b");
        assert_eq!(addr("a/*/b").to_pointer(), "/a/0/b");
        assert_eq!(addr("a{Foo}/b").to_pointer(), "/a/b");
        assert_eq!(addr("a\\/b").to_pointer(), "/a~1b");
    }

    #[test]
    fn test_with_variant() {
        assert_eq!(PropertyAddr::root().with_variant("V"), addr("{V}"));
        assert_eq!(addr("a/b").with_variant("V"), addr("a/b{V}"));
        assert_eq!(addr("a/*").with_variant("V"), addr("a/*{V}"));
    }
}
