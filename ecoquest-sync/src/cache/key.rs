//! Hierarchical query keys
//!
//! A key is an ordered list of string/number tokens. Equality is structural,
//! so two logically identical queries always land on the same cache entry,
//! and a shorter key acts as a prefix for invalidation (`["tasks"]` matches
//! `["tasks", "today"]`).

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single token of a query key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum KeyPart {
    /// Numeric token (ids, page numbers)
    Int(i64),

    /// String token (namespaces, filters)
    Str(String),
}

impl fmt::Display for KeyPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyPart::Int(n) => write!(f, "{}", n),
            KeyPart::Str(s) => write!(f, "\"{}\"", s),
        }
    }
}

impl From<&str> for KeyPart {
    fn from(s: &str) -> Self {
        KeyPart::Str(s.to_string())
    }
}

impl From<String> for KeyPart {
    fn from(s: String) -> Self {
        KeyPart::Str(s)
    }
}

impl From<&String> for KeyPart {
    fn from(s: &String) -> Self {
        KeyPart::Str(s.clone())
    }
}

impl From<i64> for KeyPart {
    fn from(n: i64) -> Self {
        KeyPart::Int(n)
    }
}

impl From<i32> for KeyPart {
    fn from(n: i32) -> Self {
        KeyPart::Int(i64::from(n))
    }
}

impl From<u32> for KeyPart {
    fn from(n: u32) -> Self {
        KeyPart::Int(i64::from(n))
    }
}

/// Canonical identifier of a unit of cached server data
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct QueryKey(Vec<KeyPart>);

impl QueryKey {
    /// Create an empty key (the root prefix, matches everything)
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Create a key from its tokens
    pub fn from_parts(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }

    /// Append a token, builder style
    pub fn with(mut self, part: impl Into<KeyPart>) -> Self {
        self.0.push(part.into());
        self
    }

    pub fn parts(&self) -> &[KeyPart] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether `prefix` is a (non-strict) prefix of this key
    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// The key one level up, `None` for the root
    pub fn parent(&self) -> Option<QueryKey> {
        if self.0.is_empty() {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[")?;
        for (i, part) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ",")?;
            }
            write!(f, "{}", part)?;
        }
        write!(f, "]")
    }
}

impl<P: Into<KeyPart>, const N: usize> From<[P; N]> for QueryKey {
    fn from(parts: [P; N]) -> Self {
        Self(parts.into_iter().map(Into::into).collect())
    }
}

impl From<Vec<KeyPart>> for QueryKey {
    fn from(parts: Vec<KeyPart>) -> Self {
        Self(parts)
    }
}

impl From<&QueryKey> for QueryKey {
    fn from(key: &QueryKey) -> Self {
        key.clone()
    }
}

/// Build a [`QueryKey`] from mixed string/number tokens
///
/// ```
/// use ecoquest_sync::query_key;
///
/// let key = query_key!["journals", 42];
/// assert_eq!(key.to_string(), "[\"journals\",42]");
/// ```
#[macro_export]
macro_rules! query_key {
    ($($part:expr),* $(,)?) => {
        $crate::QueryKey::from_parts(vec![$($crate::KeyPart::from($part)),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_structural_equality() {
        let a = QueryKey::from(["tasks", "today"]);
        let b = QueryKey::new().with("tasks").with("today".to_string());
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_prefix_matching() {
        let tasks = QueryKey::from(["tasks"]);
        let today = QueryKey::from(["tasks", "today"]);
        let packets = QueryKey::from(["packets", "me"]);

        assert!(today.starts_with(&tasks));
        assert!(today.starts_with(&today));
        assert!(!tasks.starts_with(&today));
        assert!(!packets.starts_with(&tasks));
        assert!(packets.starts_with(&QueryKey::new()));
    }

    #[test]
    fn test_numbers_and_strings_differ() {
        let by_num = crate::query_key!["journals", 5];
        let by_str = crate::query_key!["journals", "5"];
        assert_ne!(by_num, by_str);
    }

    #[test]
    fn test_parent() {
        let key = crate::query_key!["albums", 7];
        assert_eq!(key.parent(), Some(QueryKey::from(["albums"])));
        assert_eq!(QueryKey::new().parent(), None);
    }

    #[test]
    fn test_display_and_serde() {
        let key = crate::query_key!["leaderboard", "weekly", 2];
        assert_eq!(key.to_string(), "[\"leaderboard\",\"weekly\",2]");

        let json = serde_json::to_string(&key).unwrap();
        assert_eq!(json, "[\"leaderboard\",\"weekly\",2]");
        let back: QueryKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key);
    }
}
