//! Low-level node primitives shared by the wrapper engine.
//!
//! These functions walk and rebuild raw/wrapped trees without any cycle
//! awareness; resolving cycle references is the engine's job. All of them
//! are pure: a caller observes either "unchanged" or a freshly-built raw
//! tree whose untouched children are the original wrapped instances.

use crate::node::{Immutable, NodeKind};
use crate::path::{Key, Path};
use crate::source::{Source, SourceArray, SourceObject, SourceDate, SourceRegex};

/// Decision returned by an edit callback.
pub(crate) enum Edit {
    /// Leave the node as it is; the whole copy becomes a no-op when the
    /// target keeps.
    Keep,
    /// Replace the node with the given raw value.
    Set(Source),
    /// Cut the node out of its parent.
    Remove,
}

/// Result of a path-guided copy.
pub(crate) enum CopyOutcome {
    /// Nothing changed; the caller should return the original root.
    Unchanged,
    /// A new raw root, sharing every untouched child with the original.
    Changed(Source),
    /// The root itself was removed.
    Removed,
}

/// Callback invoked on every node along the copied path, leaf to root.
pub(crate) type PathProc<'a> = &'a dyn Fn(&Source, Option<&Key>, Option<&Source>) -> Edit;

/// Reference equality between a wrapped child and a raw value: leaves
/// compare by value, nodes by instance.
pub(crate) fn same_ref(target: Option<&Immutable>, source: &Source) -> bool {
    match (target, source) {
        (Some(Immutable::Null), Source::Null) => true,
        (Some(Immutable::Bool(a)), Source::Bool(b)) => a == b,
        (Some(Immutable::Number(a)), Source::Number(b)) => a == b,
        (Some(Immutable::String(a)), Source::String(b)) => a == b,
        (Some(a @ Immutable::Node(_)), Source::Immutable(b)) => a.ptr_eq(b),
        _ => false,
    }
}

/// Shallow-clone a wrapped node into a raw value carrying the same
/// identifier. Children stay wrapped; leaves pass through.
pub(crate) fn clone_node(value: &Immutable) -> Source {
    let Some(node) = value.node() else {
        return Source::from(value);
    };

    match node.kind() {
        NodeKind::Object(entries) => {
            let object = SourceObject::new();
            for (key, child) in entries {
                object.insert(key.clone(), Source::from(child));
            }
            object.bind(node.guid().clone());
            Source::Object(object)
        }
        NodeKind::Array(items) => {
            let array = SourceArray::from_items(items.iter().map(Source::from).collect());
            array.bind(node.guid().clone());
            Source::Array(array)
        }
        NodeKind::Date(ms) => {
            let date = SourceDate::new(*ms);
            date.bind(node.guid().clone());
            Source::Date(date)
        }
        NodeKind::Regex(pattern) => {
            let regex = SourceRegex::new(pattern.clone());
            regex.bind(node.guid().clone());
            Source::Regex(regex)
        }
        // Cycle references carry no mutable state; reuse the instance.
        NodeKind::Cycle(_) => Source::from(value),
    }
}

/// Walk `path` down from `root`, stepping through wrapped children only.
/// Returns `None` when any intermediate step lands on a leaf or falls off
/// the tree.
pub(crate) fn get_by_path(root: &Immutable, path: &Path) -> Option<Immutable> {
    let mut node = root.clone();
    for key in path.iter() {
        node.node()?;
        node = node.child(key)?;
    }
    Some(node)
}

/// Set or replace the child at `key` of a raw parent.
///
/// Setting index `len` appends; larger indexes pad with nulls. Non-index
/// keys on arrays are dropped (the walk rejects them beforehand).
fn set_child(parent: &Source, key: &Key, value: Source) {
    match parent {
        Source::Object(object) => object.insert(key.as_str(), value),
        Source::Array(array) => {
            if let Some(index) = key.as_index() {
                array.edit(|items| {
                    if index < items.len() {
                        items[index] = value;
                    } else {
                        while items.len() < index {
                            items.push(Source::Null);
                        }
                        items.push(value);
                    }
                });
            }
        }
        _ => {}
    }
}

/// Remove the child at `key` of a raw parent, preserving the order of the
/// remaining entries (arrays splice, objects delete).
fn remove_child(parent: &Source, key: &Key) {
    match parent {
        Source::Object(object) => {
            object.remove(key.as_str());
        }
        Source::Array(array) => {
            if let Some(index) = key.as_index() {
                array.edit(|items| {
                    if index < items.len() {
                        items.remove(index);
                    }
                });
            }
        }
        _ => {}
    }
}

/// Copy `root` along `path`, apply `target_proc` at the leaf, and rebuild
/// bottom-up, cloning only the nodes on the walked path.
///
/// The target callback receives the current leaf (or `None` when the final
/// key does not exist yet), its key, and its parent. `path_proc`, when
/// given, runs on every rebuilt node from leaf to root. If the leaf keeps,
/// nothing is cloned and the copy reports [`CopyOutcome::Unchanged`]; an
/// unreachable path reports the same.
pub(crate) fn copy_by_path(
    root: &Immutable,
    path: Option<&Path>,
    target_proc: impl FnOnce(Option<&Immutable>, Option<&Key>, Option<&Immutable>) -> Edit,
    path_proc: Option<PathProc<'_>>,
) -> CopyOutcome {
    let Some(path) = path else {
        return CopyOutcome::Unchanged;
    };
    if path.is_empty() || root.node().is_none() {
        return CopyOutcome::Unchanged;
    }

    // Walk down, remembering each ancestor and the key taken out of it.
    let mut stack: Vec<(Option<Immutable>, Option<Key>)> = Vec::new();
    let mut top: Option<Immutable> = None;
    let mut top_key: Option<Key> = None;
    let mut target: Option<Immutable> = Some(root.clone());

    for key in path.iter() {
        let stepped = match &target {
            Some(t) if t.node().is_some() => t.child(key),
            _ => return CopyOutcome::Unchanged,
        };
        stack.push((top.take(), top_key.take()));
        top = target;
        top_key = Some(key.clone());
        target = stepped;
    }

    // A missing final key may be created on an object, never on an array
    // with a non-index key.
    if target.is_none() {
        if let (Some(t), Some(k)) = (&top, &top_key) {
            if t.is_array() && k.as_index().is_none() {
                return CopyOutcome::Unchanged;
            }
        }
    }

    let mut current: Option<Source> =
        match target_proc(target.as_ref(), top_key.as_ref(), top.as_ref()) {
            Edit::Keep => return CopyOutcome::Unchanged,
            Edit::Set(source) => Some(source),
            Edit::Remove => None,
        };

    // Rebuild from the mutation site back to the root.
    loop {
        match current.take() {
            // Removed: cut the key out of a clone of the parent.
            None => {
                if let Some(parent) = &top {
                    let parent_copy = clone_node(parent);
                    if let Some(key) = &top_key {
                        remove_child(&parent_copy, key);
                    }
                    current = Some(parent_copy);
                }
            }
            // Replaced: mount onto a clone of the parent, then let the
            // path callback transform the mounted value.
            Some(mut source) => {
                let mounted = top.as_ref().map(|parent| {
                    let parent_copy = clone_node(parent);
                    if let Some(key) = &top_key {
                        set_child(&parent_copy, key, source.clone());
                    }
                    parent_copy
                });

                if let Some(proc_fn) = path_proc {
                    match proc_fn(&source, top_key.as_ref(), mounted.as_ref()) {
                        Edit::Keep => {}
                        Edit::Set(replacement) => {
                            if let (Some(parent_copy), Some(key)) = (&mounted, &top_key) {
                                set_child(parent_copy, key, replacement.clone());
                            }
                            source = replacement;
                        }
                        Edit::Remove => {
                            current = None;
                            continue;
                        }
                    }
                }

                current = Some(match mounted {
                    Some(parent_copy) => parent_copy,
                    None => source,
                });
            }
        }

        match stack.pop() {
            Some((t, k)) => {
                top = t;
                top_key = k;
            }
            None => break,
        }
    }

    match current {
        Some(source) => CopyOutcome::Changed(source),
        None => CopyOutcome::Removed,
    }
}

/// Result of a structural merge.
pub(crate) enum MergeOutcome {
    /// Nothing differed; keep the original target.
    Unchanged,
    /// The merged (or replacing) raw value.
    Take(Source),
}

/// Own enumerable entries of a raw value; `None` for leaves. Dates,
/// regexes, and opaques expose no enumerable entries of their own.
fn entries_of(source: &Source) -> Option<Vec<(Key, Source)>> {
    match source {
        Source::Null | Source::Bool(_) | Source::Number(_) | Source::String(_) => None,
        Source::Object(object) => Some(object.snapshot()),
        Source::Array(array) => Some(
            array
                .snapshot()
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::index(i), v))
                .collect(),
        ),
        Source::Date(_) | Source::Regex(_) | Source::Opaque(_) => Some(Vec::new()),
        Source::Immutable(node) => Some(
            node.keys()
                .into_iter()
                .filter_map(|k| node.child(&k).map(|child| (k, Source::from(&child))))
                .collect(),
        ),
    }
}

fn source_is_array(source: &Source) -> bool {
    match source {
        Source::Array(_) => true,
        Source::Immutable(node) => node.is_array(),
        _ => false,
    }
}

/// Merge `source`'s own entries onto a shallow copy of `target`.
///
/// Entries whose values are reference-equal on both sides are skipped;
/// when nothing differs the original target is kept. Mismatched shapes
/// (array vs non-array, or a leaf on either side) degenerate to "replace
/// with source".
pub(crate) fn merge_node(target: &Immutable, source: &Source, deep: bool) -> MergeOutcome {
    if same_ref(Some(target), source) {
        return MergeOutcome::Unchanged;
    }

    let target_mergeable = matches!(
        target.node().map(|n| n.kind()),
        Some(NodeKind::Object(_)) | Some(NodeKind::Array(_))
    );
    let Some(entries) = entries_of(source) else {
        return MergeOutcome::Take(source.clone());
    };
    if !target_mergeable || target.is_array() != source_is_array(source) {
        return MergeOutcome::Take(source.clone());
    }

    let copy = clone_node(target);
    let mut changed = false;
    for (key, source_value) in entries {
        let target_value = target.child(&key);
        if same_ref(target_value.as_ref(), &source_value) {
            continue;
        }

        let merged = if deep {
            match &target_value {
                Some(existing) => match merge_node(existing, &source_value, true) {
                    MergeOutcome::Unchanged => Source::from(existing),
                    MergeOutcome::Take(merged) => merged,
                },
                None => source_value,
            }
        } else {
            source_value
        };
        set_child(&copy, &key, merged);
        changed = true;
    }

    if changed {
        MergeOutcome::Take(copy)
    } else {
        MergeOutcome::Unchanged
    }
}

/// Visit every own entry of the node at `path`, stopping early when the
/// callback returns `false`.
pub(crate) fn for_each_node(
    root: &Immutable,
    path: Option<&Path>,
    side_effect: &mut dyn FnMut(&Immutable, &Key, &Immutable) -> bool,
) {
    let Some(path) = path else {
        return;
    };
    let Some(target) = get_by_path(root, path) else {
        return;
    };
    if target.node().is_none() {
        return;
    }

    for key in target.keys() {
        let Some(child) = target.child(&key) else {
            continue;
        };
        if !side_effect(&child, &key, &target) {
            return;
        }
    }
}
