//! Claim paths: structural addressing into nested claim documents.
//!
//! A path is an ordered list of literal segments. Segments are never split or
//! interpreted, so keys containing dots or colons (`urn:etoegang:core:ServiceID`)
//! address a single object member.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClaimPath(Vec<String>);

impl ClaimPath {
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Single-segment path, the common case for flat OIDC claims.
    #[must_use]
    pub fn key(segment: impl Into<String>) -> Self {
        Self(vec![segment.into()])
    }

    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for ClaimPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

impl<S: Into<String>> FromIterator<S> for ClaimPath {
    fn from_iter<T: IntoIterator<Item = S>>(iter: T) -> Self {
        Self::new(iter)
    }
}

/// Look up `path` in `document`.
///
/// Returns `None` when any segment is missing or an intermediate value is not an
/// object. An empty path never matches.
#[must_use]
pub fn extract<'a>(document: &'a Value, path: &ClaimPath) -> Option<&'a Value> {
    if path.is_empty() {
        return None;
    }
    path.segments()
        .iter()
        .try_fold(document, |current, segment| current.as_object()?.get(segment))
}

/// Write `value` at `path`, creating intermediate objects as needed.
///
/// Non-object intermediates are replaced. An empty path is ignored.
pub fn assign(document: &mut Map<String, Value>, path: &ClaimPath, value: Value) {
    let Some((last, parents)) = path.segments().split_last() else {
        return;
    };

    let mut current = document;
    for segment in parents {
        let entry = current
            .entry(segment.clone())
            .or_insert_with(|| Value::Object(Map::new()));
        if !entry.is_object() {
            *entry = Value::Object(Map::new());
        }
        current = match entry {
            Value::Object(map) => map,
            _ => return,
        };
    }
    current.insert(last.clone(), value);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn extract_flat_and_nested() {
        let doc = json!({
            "sub": "XXXXXXX54",
            "urn:etoegang:core:ServiceID": "urn:etoegang:DV:0000000000:services:9113",
            "nested": {"deeper": {"leaf": 42}},
        });

        assert_eq!(
            extract(&doc, &ClaimPath::key("sub")),
            Some(&json!("XXXXXXX54"))
        );
        assert_eq!(
            extract(&doc, &ClaimPath::key("urn:etoegang:core:ServiceID")),
            Some(&json!("urn:etoegang:DV:0000000000:services:9113"))
        );
        assert_eq!(
            extract(&doc, &ClaimPath::new(["nested", "deeper", "leaf"])),
            Some(&json!(42))
        );
    }

    #[test]
    fn extract_missing_is_none() {
        let doc = json!({"a": {"b": "c"}, "list": ["x", "y"]});

        assert!(extract(&doc, &ClaimPath::key("missing")).is_none());
        assert!(extract(&doc, &ClaimPath::new(["a", "b", "c"])).is_none());
        assert!(extract(&doc, &ClaimPath::new(["list", "0"])).is_none());
        assert!(extract(&doc, &ClaimPath::default()).is_none());
    }

    #[test]
    fn extract_returns_list_values_whole() {
        let doc = json!({"roles": ["admin", "editor"]});
        assert_eq!(
            extract(&doc, &ClaimPath::key("roles")),
            Some(&json!(["admin", "editor"]))
        );
    }

    #[test]
    fn dotted_keys_are_not_split() {
        let doc = json!({"a.b": "literal", "a": {"b": "nested"}});
        assert_eq!(
            extract(&doc, &ClaimPath::key("a.b")),
            Some(&json!("literal"))
        );
        assert_eq!(
            extract(&doc, &ClaimPath::new(["a", "b"])),
            Some(&json!("nested"))
        );
    }

    #[test]
    fn assign_creates_intermediates() {
        let mut doc = Map::new();
        assign(&mut doc, &ClaimPath::new(["additional_claims", "name"]), json!("Jan"));
        assign(&mut doc, &ClaimPath::key("bsn_claim"), json!("123456782"));

        assert_eq!(
            Value::Object(doc),
            json!({"additional_claims": {"name": "Jan"}, "bsn_claim": "123456782"})
        );
    }

    #[test]
    fn assign_replaces_scalar_intermediate() {
        let mut doc = Map::new();
        doc.insert("a".to_string(), json!("scalar"));
        assign(&mut doc, &ClaimPath::new(["a", "b"]), json!(1));
        assert_eq!(Value::Object(doc), json!({"a": {"b": 1}}));
    }

    #[test]
    fn paths_compare_structurally() {
        let left = ClaimPath::new(["a", "b"]);
        let right: ClaimPath = ["a", "b"].into_iter().collect();
        assert_eq!(left, right);
        assert_eq!(left.to_string(), "a.b");
    }
}
