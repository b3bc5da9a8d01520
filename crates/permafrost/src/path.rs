//! Path representation and codec for navigating wrapped structures.
//!
//! Paths are ordered sequences of string keys. Array consumers interpret a
//! key as an index when it is the canonical decimal form of one; the codec
//! itself never coerces numeric-looking segments.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A single path segment.
///
/// Keys are always strings, mirroring host enumeration: the element at
/// index `1` of an array is addressed by the key `"1"`. `as_index` exposes
/// the index view when the key is a canonical decimal.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Key(String);

impl Key {
    /// Create a key from any string-like value.
    #[inline]
    pub fn new(k: impl Into<String>) -> Self {
        Key(k.into())
    }

    /// Create a key addressing an array index.
    #[inline]
    pub fn index(i: usize) -> Self {
        Key(i.to_string())
    }

    /// The key as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Interpret this key as an array index.
    ///
    /// Only the canonical decimal form qualifies: `"01"` and `"1e3"` are
    /// plain object keys, exactly as host arrays treat them.
    pub fn as_index(&self) -> Option<usize> {
        let i: usize = self.0.parse().ok()?;
        if i.to_string() == self.0 {
            Some(i)
        } else {
            None
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.as_index().is_some() {
            write!(f, "[{}]", self.0)
        } else {
            write!(f, ".{}", self.0)
        }
    }
}

impl From<String> for Key {
    fn from(s: String) -> Self {
        Key(s)
    }
}

impl From<&str> for Key {
    fn from(s: &str) -> Self {
        Key(s.to_owned())
    }
}

impl From<usize> for Key {
    fn from(i: usize) -> Self {
        Key::index(i)
    }
}

impl PartialEq<str> for Key {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for Key {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

/// An ordered sequence of keys addressing a node from a root.
///
/// The empty path addresses the root itself. This is distinct from "no
/// path" — see [`PathInput`].
///
/// # Examples
///
/// ```
/// use permafrost::Path;
///
/// let path = Path::new().key("users").index(0).key("name");
/// assert_eq!(path.len(), 3);
/// assert_eq!(path.to_string(), "$.users[0].name");
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Path(Vec<Key>);

impl Path {
    /// Create an empty path (the root).
    #[inline]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Create a path from a vector of keys.
    #[inline]
    pub fn from_keys(keys: Vec<Key>) -> Self {
        Self(keys)
    }

    /// Append a key segment and return self (builder pattern).
    #[inline]
    pub fn key(mut self, k: impl Into<Key>) -> Self {
        self.0.push(k.into());
        self
    }

    /// Append an index segment and return self (builder pattern).
    #[inline]
    pub fn index(mut self, i: usize) -> Self {
        self.0.push(Key::index(i));
        self
    }

    /// Push a key onto the path (mutating).
    #[inline]
    pub fn push(&mut self, k: impl Into<Key>) {
        self.0.push(k.into());
    }

    /// Pop the last key from the path.
    #[inline]
    pub fn pop(&mut self) -> Option<Key> {
        self.0.pop()
    }

    /// The keys of this path.
    #[inline]
    pub fn keys(&self) -> &[Key] {
        &self.0
    }

    /// Check if this path is empty (root).
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// The number of keys in this path.
    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// The first key.
    #[inline]
    pub fn first(&self) -> Option<&Key> {
        self.0.first()
    }

    /// The last key.
    #[inline]
    pub fn last(&self) -> Option<&Key> {
        self.0.last()
    }

    /// The parent path (without the last key); `None` for the root.
    pub fn parent(&self) -> Option<Path> {
        if self.0.is_empty() {
            None
        } else {
            Some(Path(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Check if this path starts with another path.
    #[inline]
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Join this path with another path.
    pub fn join(&self, other: &Path) -> Path {
        let mut joined = self.clone();
        joined.0.extend(other.0.iter().cloned());
        joined
    }

    /// The suffix of this path after `prefix`, or `None` when `prefix`
    /// does not lead to it.
    pub fn strip_prefix(&self, prefix: &Path) -> Option<Path> {
        if self.starts_with(prefix) {
            Some(Path(self.0[prefix.len()..].to_vec()))
        } else {
            None
        }
    }

    /// Iterate over the keys.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.0.iter()
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "$")?;
        for key in &self.0 {
            write!(f, "{}", key)?;
        }
        Ok(())
    }
}

impl FromIterator<Key> for Path {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Path(iter.into_iter().collect())
    }
}

impl IntoIterator for Path {
    type Item = Key;
    type IntoIter = std::vec::IntoIter<Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a Path {
    type Item = &'a Key;
    type IntoIter = std::slice::Iter<'a, Key>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

impl std::ops::Index<usize> for Path {
    type Output = Key;

    fn index(&self, index: usize) -> &Self::Output {
        &self.0[index]
    }
}

/// A path argument as accepted by the navigation and mutation APIs.
///
/// `None` means "no path", which every operation treats as a no-op; it is
/// deliberately distinct from `Keys(Path::new())`, which addresses the
/// root. A text input is run through [`extract`]; a text input that strips
/// down to nothing (`""`, `"."`) also means "no path".
#[derive(Clone, Debug, Default)]
pub enum PathInput {
    /// No path was supplied.
    #[default]
    None,
    /// A dotted/bracket path expression, e.g. `"a.b[0].c"`.
    Text(String),
    /// An already-ordered key sequence.
    Keys(Path),
}

impl From<&str> for PathInput {
    fn from(s: &str) -> Self {
        PathInput::Text(s.to_owned())
    }
}

impl From<String> for PathInput {
    fn from(s: String) -> Self {
        PathInput::Text(s)
    }
}

impl From<Path> for PathInput {
    fn from(p: Path) -> Self {
        PathInput::Keys(p)
    }
}

impl From<&Path> for PathInput {
    fn from(p: &Path) -> Self {
        PathInput::Keys(p.clone())
    }
}

impl From<Vec<Key>> for PathInput {
    fn from(keys: Vec<Key>) -> Self {
        PathInput::Keys(Path::from_keys(keys))
    }
}

impl<T: Into<PathInput>> From<Option<T>> for PathInput {
    fn from(opt: Option<T>) -> Self {
        match opt {
            Some(v) => v.into(),
            None => PathInput::None,
        }
    }
}

/// Extract an ordered key sequence from a path argument.
///
/// Returns `None` for "no path". Bracket notation is rewritten to dotted
/// form (`a[0][b]` → `a.0.b`), leading/trailing dots are stripped, and the
/// rest splits on dots. Segments are kept as strings; numeric-looking
/// segments are not coerced.
///
/// # Examples
///
/// ```
/// use permafrost::{extract, path, PathInput};
///
/// assert_eq!(extract("a[0].b".into()), Some(path!("a", 0, "b")));
/// assert_eq!(extract(PathInput::None), None);
/// assert_eq!(extract("".into()), None);
/// assert_eq!(extract(path!().into()), Some(path!()));
/// ```
pub fn extract(input: PathInput) -> Option<Path> {
    match input {
        PathInput::None => None,
        PathInput::Keys(path) => Some(path),
        PathInput::Text(text) => {
            let mut dotted = String::with_capacity(text.len());
            for ch in text.chars() {
                match ch {
                    '[' => dotted.push('.'),
                    ']' => {}
                    c => dotted.push(c),
                }
            }
            let trimmed = dotted.trim_matches('.');
            if trimmed.is_empty() {
                return None;
            }
            Some(trimmed.split('.').map(Key::from).collect())
        }
    }
}

/// Construct a [`Path`] from a sequence of segments.
///
/// String literals become plain keys, numbers become index keys.
///
/// # Examples
///
/// ```
/// use permafrost::path;
///
/// let p = path!("users", 0, "name");
/// assert_eq!(p.len(), 3);
/// ```
#[macro_export]
macro_rules! path {
    () => {
        $crate::Path::new()
    };
    ($($seg:expr),+ $(,)?) => {{
        let mut p = $crate::Path::new();
        $(
            p.push($crate::Key::from($seg));
        )+
        p
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_as_index() {
        assert_eq!(Key::from("0").as_index(), Some(0));
        assert_eq!(Key::from("42").as_index(), Some(42));
        assert_eq!(Key::from("01").as_index(), None);
        assert_eq!(Key::from("-1").as_index(), None);
        assert_eq!(Key::from("name").as_index(), None);
        assert_eq!(Key::from("").as_index(), None);
    }

    #[test]
    fn test_path_construction() {
        let path = Path::new().key("users").index(0).key("name");
        assert_eq!(path.len(), 3);
        assert_eq!(path[0], Key::from("users"));
        assert_eq!(path[1], Key::index(0));
        assert_eq!(path[2], Key::from("name"));
    }

    #[test]
    fn test_path_display() {
        let path = Path::new().key("users").index(0).key("name");
        assert_eq!(path.to_string(), "$.users[0].name");
        assert_eq!(Path::new().to_string(), "$");
    }

    #[test]
    fn test_path_macro() {
        let p = path!("users", 0, "name");
        assert_eq!(p.len(), 3);
        assert_eq!(p[1], Key::index(0));
        assert_eq!(path!(), Path::new());
    }

    #[test]
    fn test_path_parent_and_prefix() {
        let path = path!("a", "b", "c");
        assert_eq!(path.parent(), Some(path!("a", "b")));
        assert_eq!(Path::new().parent(), None);
        assert!(path.starts_with(&path!("a")));
        assert_eq!(path.strip_prefix(&path!("a")), Some(path!("b", "c")));
        assert_eq!(path.strip_prefix(&path!("x")), None);
    }

    #[test]
    fn test_extract_text() {
        assert_eq!(extract("a.b.c".into()), Some(path!("a", "b", "c")));
        assert_eq!(extract("a[0][b]".into()), Some(path!("a", "0", "b")));
        assert_eq!(extract(".a.b.".into()), Some(path!("a", "b")));
        // Consecutive dots keep an empty segment, matching split semantics.
        assert_eq!(extract("a..b".into()), Some(path!("a", "", "b")));
    }

    #[test]
    fn test_extract_no_path() {
        assert_eq!(extract(PathInput::None), None);
        assert_eq!(extract("".into()), None);
        assert_eq!(extract(".".into()), None);
        // The empty key sequence is the root, not "no path".
        assert_eq!(extract(Path::new().into()), Some(Path::new()));
    }

    #[test]
    fn test_path_serde() {
        let path = path!("users", 0);
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, r#"["users","0"]"#);
        let parsed: Path = serde_json::from_str(&json).unwrap();
        assert_eq!(path, parsed);
    }
}
