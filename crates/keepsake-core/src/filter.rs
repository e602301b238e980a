//! Field paths and filters for addressing documents.
//!
//! Backends translate a [`Filter`] into their own query language; the
//! types here only describe *what* to match.

use std::fmt;

use chrono::{DateTime, Utc};
use serde_json::Value;

/// A path into a nested JSON document, e.g. `data.cookie._expires`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    /// Build a path from its segments.
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Parse a dotted path such as `data.cookie._expires`.
    pub fn parse(dotted: &str) -> Self {
        Self::new(dotted.split('.').filter(|s| !s.is_empty()))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Render as a JSON path (`$.data.cookie._expires`).
    ///
    /// Segments that are not plain identifiers are double-quoted.
    pub fn to_json_path(&self) -> String {
        let mut path = String::from("$");
        for segment in &self.0 {
            if is_identifier(segment) {
                path.push('.');
                path.push_str(segment);
            } else {
                path.push_str(".\"");
                path.push_str(segment);
                path.push('"');
            }
        }
        path
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

fn is_identifier(segment: &str) -> bool {
    let mut chars = segment.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Upper bound for a less-than comparison.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Bound {
    /// Plain numeric comparison.
    Number(f64),
    /// An instant. Matches fields holding either epoch milliseconds or an
    /// RFC 3339 timestamp string.
    Instant(DateTime<Utc>),
}

/// A document filter.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Every document in the collection.
    All,
    /// The field at the path equals the value.
    Eq(FieldPath, Value),
    /// The field at the path is strictly less than the bound.
    Lt(FieldPath, Bound),
    /// Every sub-filter matches.
    And(Vec<Filter>),
}

impl Filter {
    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Filter::Eq(FieldPath::parse(&path.into()), value.into())
    }

    pub fn lt(path: impl Into<String>, bound: Bound) -> Self {
        Filter::Lt(FieldPath::parse(&path.into()), bound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_and_display() {
        let path = FieldPath::parse("data.cookie._expires");
        assert_eq!(path.segments(), ["data", "cookie", "_expires"]);
        assert_eq!(path.to_string(), "data.cookie._expires");
    }

    #[test]
    fn test_json_path_quotes_non_identifiers() {
        assert_eq!(FieldPath::parse("sid").to_json_path(), "$.sid");
        assert_eq!(
            FieldPath::new(["data", "user-agent"]).to_json_path(),
            "$.data.\"user-agent\""
        );
        assert_eq!(FieldPath::new(["9lives"]).to_json_path(), "$.\"9lives\"");
    }

    #[test]
    fn test_filter_constructors() {
        assert_eq!(
            Filter::eq("sid", "abc"),
            Filter::Eq(FieldPath::new(["sid"]), json!("abc"))
        );
        let now = Utc::now();
        assert_eq!(
            Filter::lt("data.cookie._expires", Bound::Instant(now)),
            Filter::Lt(FieldPath::new(["data", "cookie", "_expires"]), Bound::Instant(now))
        );
    }
}
