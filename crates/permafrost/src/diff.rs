//! Structural change reports between two wrapped trees.
//!
//! The comparison is built for trees related by copy-on-write: children
//! shared by reference are skipped without being entered, and only nodes
//! that kept their identity across the change are recursed into, so a
//! report never costs a full-tree traversal. A node replaced by a
//! different entity reports a single change at its path.

use crate::node::Immutable;
use crate::path::Path;
use serde::Serialize;

/// What happened at a path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeKind {
    /// The key exists only on the new side.
    Added,
    /// The key exists only on the old side.
    Removed,
    /// The value differs between the sides.
    Changed,
}

/// A single reported difference.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Change {
    /// Path of the affected entry, from the compared roots.
    pub path: Path,
    /// What happened there.
    pub kind: ChangeKind,
}

/// An ordered collection of [`Change`]s.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct DiffReport {
    changes: Vec<Change>,
}

impl DiffReport {
    /// The reported changes, in discovery order (parents before children).
    #[inline]
    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    /// Check if the two sides were indistinguishable.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// Number of reported changes.
    #[inline]
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    /// Iterate over the changes.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &Change> {
        self.changes.iter()
    }

    fn record(&mut self, path: Path, kind: ChangeKind) {
        self.changes.push(Change { path, kind });
    }
}

impl<'a> IntoIterator for &'a DiffReport {
    type Item = &'a Change;
    type IntoIter = std::slice::Iter<'a, Change>;

    fn into_iter(self) -> Self::IntoIter {
        self.changes.iter()
    }
}

/// Compare two wrapped trees and report added/removed/changed entries per
/// path.
///
/// Reference-shared subtrees are skipped outright. Two nodes are entered
/// only when they carry the same identifier (the same logical entity
/// before and after a mutation); a node replaced by a different entity —
/// or by a leaf — is reported as one change at its path, without
/// descending.
pub fn diff(a: &Immutable, b: &Immutable) -> DiffReport {
    let mut report = DiffReport::default();
    walk(a, b, Path::new(), &mut report);
    report
}

fn walk(a: &Immutable, b: &Immutable, at: Path, report: &mut DiffReport) {
    if a.ptr_eq(b) {
        return;
    }

    let comparable = a.same(b) && a.is_array() == b.is_array();
    if !comparable {
        if !a.equals(b) {
            report.record(at, ChangeKind::Changed);
        }
        return;
    }

    let b_keys = b.keys();
    for key in a.keys() {
        if b.child(&key).is_none() {
            report.record(at.clone().key(key), ChangeKind::Removed);
        }
    }
    for key in b_keys {
        let child_path = at.clone().key(key.clone());
        match (a.child(&key), b.child(&key)) {
            (None, Some(_)) => report.record(child_path, ChangeKind::Added),
            (Some(old), Some(new)) => walk(&old, &new, child_path, report),
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Source;
    use crate::Immutable;
    use serde_json::json;

    fn wrap(value: serde_json::Value) -> Immutable {
        Immutable::create(Source::from(value)).unwrap()
    }

    #[test]
    fn test_diff_of_identical_trees_is_empty() {
        let w = wrap(json!({"a": 1, "b": {"c": 2}}));
        assert!(diff(&w, &w).is_empty());
    }

    #[test]
    fn test_diff_after_set() {
        let w = wrap(json!({"a": 1, "b": {"c": 2}}));
        let w2 = w.set("a", 2i64).unwrap();
        let report = diff(&w, &w2);
        assert_eq!(report.len(), 1);
        assert_eq!(report.changes()[0].path, crate::path!("a"));
        assert_eq!(report.changes()[0].kind, ChangeKind::Changed);
    }

    #[test]
    fn test_diff_reports_added_and_removed() {
        let w = wrap(json!({"a": 1, "gone": true}));
        let w2 = w.remove("gone").set("fresh", "x").unwrap();
        let report = diff(&w, &w2);
        let kinds: Vec<_> = report.iter().map(|c| (&c.kind, c.path.to_string())).collect();
        assert!(kinds.contains(&(&ChangeKind::Removed, "$.gone".into())));
        assert!(kinds.contains(&(&ChangeKind::Added, "$.fresh".into())));
        assert_eq!(report.len(), 2);
    }

    #[test]
    fn test_diff_descends_only_into_changed_subtrees() {
        let w = wrap(json!({"left": {"x": 1}, "right": {"y": [1, 2]}}));
        let w2 = w.set("right.y[0]", 9i64).unwrap();
        let report = diff(&w, &w2);
        assert_eq!(report.len(), 1);
        assert_eq!(report.changes()[0].path, crate::path!("right", "y", "0"));
    }

    #[test]
    fn test_diff_of_unrelated_trees_is_one_change() {
        let a = wrap(json!({"a": 1}));
        let b = wrap(json!({"a": 2}));
        let report = diff(&a, &b);
        assert_eq!(report.len(), 1);
        assert_eq!(report.changes()[0].path, crate::path!());
    }
}
