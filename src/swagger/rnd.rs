//! Monotonic, format-aware value generation.
//!
//! Every draw advances one of the raw bases, so distinct leaves get
//! distinct serializations within an execution. The generator is cheap to
//! clone: candidate responses fork it and the handler commits the fork of
//! the selected candidate.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use uuid::Uuid;

/// Stateful generator. `next_*` advances the corresponding raw base first
/// and then renders it, so the first drawn string is `"b"`, the first
/// integer `1`, the first number `1.5`.
#[derive(Debug, Clone, PartialEq)]
pub struct Rnd {
    raw_string: String,
    raw_integer: i64,
    raw_number: f64,
    time: DateTime<Utc>,
}

impl Default for Rnd {
    fn default() -> Self {
        Rnd::new()
    }
}

impl Rnd {
    pub fn new() -> Self {
        Rnd {
            raw_string: "a".to_string(),
            raw_integer: 0,
            raw_number: 0.5,
            time: Utc::now(),
        }
    }

    /// A generator with a fixed time base, for reproducible output.
    pub fn with_time(time: DateTime<Utc>) -> Self {
        Rnd {
            time,
            ..Rnd::new()
        }
    }

    pub fn raw_string(&self) -> &str {
        &self.raw_string
    }

    pub fn raw_integer(&self) -> i64 {
        self.raw_integer
    }

    pub fn raw_number(&self) -> f64 {
        self.raw_number
    }

    /// Advances the string base: lexicographic base-26 increment with a
    /// left carry, so `"z"` rolls over to `"aa"`.
    pub fn next_raw_string(&mut self) -> String {
        let mut bytes = self.raw_string.clone().into_bytes();
        let mut i = bytes.len();
        loop {
            if i == 0 {
                bytes.insert(0, b'a');
                break;
            }
            i -= 1;
            if bytes[i] == b'z' {
                bytes[i] = b'a';
            } else {
                bytes[i] += 1;
                break;
            }
        }
        self.raw_string = String::from_utf8(bytes).expect("base-26 strings are ascii");
        self.raw_string.clone()
    }

    pub fn next_raw_integer(&mut self) -> i64 {
        self.raw_integer += 1;
        self.raw_integer
    }

    pub fn next_raw_number(&mut self) -> f64 {
        self.raw_number += 1.0;
        self.raw_number
    }

    fn next_time(&mut self, step: Duration) -> DateTime<Utc> {
        self.time += step;
        self.time
    }

    /// Draws a string for the given Swagger `format`. Unrecognized formats
    /// fall back to the raw string base.
    pub fn next_string(&mut self, format: &str) -> String {
        match format {
            "arm-id" => format!(
                "/subscriptions/00000000-0000-0000-000000000000/resourceGroups/{}",
                self.next_raw_string()
            ),
            "base64url" | "byte" => BASE64.encode(self.next_raw_string()),
            "binary" => {
                let n = self.next_raw_integer();
                String::from_utf8_lossy(&n.to_le_bytes()).into_owned()
            }
            "date" => self.next_time(Duration::hours(24)).format("%Y-%m-%d").to_string(),
            "date-time" => self
                .next_time(Duration::minutes(1))
                .to_rfc3339_opts(SecondsFormat::Secs, true),
            "date-time-rfc1123" => self
                .next_time(Duration::minutes(1))
                .format("%a, %d %b %Y %H:%M:%S GMT")
                .to_string(),
            "duration" => {
                let secs = self.next_raw_integer();
                if secs == 0 {
                    "P0D".to_string()
                } else {
                    format!("PT{}S", secs)
                }
            }
            "email" => format!("{}@foo.com", self.next_raw_string()),
            "time" => self
                .next_time(Duration::minutes(1))
                .format("%H:%M:%S")
                .to_string(),
            "uri" | "url" => format!("https://{}.com", self.next_raw_string()),
            "uuid" => Uuid::new_v4().to_string(),
            _ => self.next_raw_string(),
        }
    }

    /// Draws an integer; `int32`, `int64` and `unixtime` all advance the
    /// raw integer base.
    pub fn next_integer(&mut self, _format: &str) -> i64 {
        self.next_raw_integer()
    }

    /// Draws a number; `decimal`, `double` and `float` all advance the raw
    /// number base.
    pub fn next_number(&mut self, _format: &str) -> f64 {
        self.next_raw_number()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_string_sequence() {
        let mut rnd = Rnd::new();
        assert_eq!(rnd.raw_string(), "a");
        assert_eq!(rnd.next_raw_string(), "b");
        assert_eq!(rnd.next_raw_string(), "c");
    }

    #[test]
    fn test_raw_string_carry() {
        let mut rnd = Rnd::new();
        for _ in 0..26 {
            rnd.next_raw_string();
        }
        assert_eq!(rnd.raw_string(), "aa");
        // One step past "az" lands on "ba".
        for _ in 0..26 {
            rnd.next_raw_string();
        }
        assert_eq!(rnd.raw_string(), "ba");
    }

    #[test]
    fn test_integer_and_number_sequences() {
        let mut rnd = Rnd::new();
        assert_eq!(rnd.raw_integer(), 0);
        assert_eq!(rnd.next_integer("int32"), 1);
        assert_eq!(rnd.next_integer("int64"), 2);
        assert_eq!(rnd.next_integer("unixtime"), 3);
        assert_eq!(rnd.raw_number(), 0.5);
        assert_eq!(rnd.next_number("double"), 1.5);
        assert_eq!(rnd.next_number("float"), 2.5);
    }

    #[test]
    fn test_string_formats() {
        let mut rnd = Rnd::new();
        assert_eq!(rnd.next_string(""), "b");
        assert_eq!(rnd.next_string("password"), "c");
        assert_eq!(rnd.next_string("file"), "d");
        assert_eq!(rnd.next_string("email"), "e@foo.com");
        assert_eq!(rnd.next_string("uri"), "https://f.com");
        assert_eq!(rnd.next_string("url"), "https://g.com");
        assert_eq!(
            rnd.next_string("arm-id"),
            "/subscriptions/00000000-0000-0000-000000000000/resourceGroups/h"
        );
        assert_eq!(rnd.next_string("byte"), BASE64.encode("i"));
    }

    #[test]
    fn test_duration_rendering() {
        let mut rnd = Rnd::new();
        assert_eq!(rnd.next_string("duration"), "PT1S");
        assert_eq!(rnd.next_string("duration"), "PT2S");
    }

    #[test]
    fn test_time_formats_advance_monotonically() {
        let mut rnd = Rnd::new();
        let d1 = rnd.next_string("date");
        let d2 = rnd.next_string("date");
        assert!(d2 > d1);

        let t1 = rnd.next_string("date-time");
        let t2 = rnd.next_string("date-time");
        assert!(t2 > t1);

        let r1 = rnd.next_string("date-time-rfc1123");
        assert!(r1.ends_with("GMT"));
    }

    #[test]
    fn test_distinct_leaves_get_distinct_values() {
        let mut rnd = Rnd::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..100 {
            assert!(seen.insert(rnd.next_string("")));
        }
        for _ in 0..100 {
            assert!(seen.insert(rnd.next_integer("int64").to_string()));
        }
    }

    #[test]
    fn test_clone_forks_state() {
        let mut rnd = Rnd::new();
        rnd.next_raw_string();
        let mut fork = rnd.clone();
        assert_eq!(fork.next_raw_string(), rnd.next_raw_string());
    }
}
