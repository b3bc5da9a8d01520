//! The immutable wrapper engine.
//!
//! [`Immutable::create`] turns a raw value into a deeply frozen mirror:
//! every child is wrapped recursively, cycles are cut into
//! [cycle-reference](Immutable::is_cycle_ref) leaves resolved through the
//! root's path-link table, and each node keeps an identifier-keyed index of
//! its whole subtree so any descendant is located in O(depth).
//!
//! Mutation never touches an existing wrapper. `set`/`update`/`remove`/
//! `merge` clone only the nodes on the path from the root to the mutation
//! site and re-wrap the result; every untouched subtree is shared by
//! reference between the old and the new tree. A mutation that changes
//! nothing hands back the receiver itself, so callers can detect no-ops
//! with [`Immutable::ptr_eq`].

use crate::error::{Error, Result};
use crate::guid::Guid;
use crate::ops::{self, CopyOutcome, Edit, MergeOutcome};
use crate::path::{extract, Key, Path, PathInput};
use crate::source::{Number, Source, SourceArray, SourceObject, SourceOpaque};
use indexmap::IndexMap;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::cell::RefCell;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::rc::Rc;
use tracing::trace;

/// Sentinel key under which an identifier is serialized when
/// [`Options::expose_ids`] is on.
pub const GUID_KEY: &str = "[[GlobalUniqueID]]";
/// Sentinel key of a serialized cycle-reference node.
pub const CYCLE_KEY: &str = "[[ImmutableCycleRef]]";
/// Sentinel key of a serialized date surrogate.
pub const DATE_KEY: &str = "[[ImmutableDate]]";
/// Sentinel key of a serialized regexp surrogate.
pub const REGEX_KEY: &str = "[[ImmutableRegExp]]";

/// Wrapping configuration.
///
/// Carried by every node of a tree; mutations re-wrap with the same
/// options the root was created with.
#[derive(Clone, Default)]
pub struct Options {
    expose_ids: bool,
    to_plain: Option<Rc<dyn Fn(&Source) -> Source>>,
}

impl Options {
    /// Default options: identifiers hidden, no converter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Configure the conversion collaborator, consulted for every opaque
    /// value reached while wrapping. It must return a plain object.
    pub fn to_plain(mut self, f: impl Fn(&Source) -> Source + 'static) -> Self {
        self.to_plain = Some(Rc::new(f));
        self
    }

    /// Emit identifiers under [`GUID_KEY`] when serializing. Off by
    /// default so identifiers never leak into naive serialization.
    pub fn expose_ids(mut self, expose: bool) -> Self {
        self.expose_ids = expose;
        self
    }

    fn converter(&self) -> Option<&Rc<dyn Fn(&Source) -> Source>> {
        self.to_plain.as_ref()
    }

    fn ids_exposed(&self) -> bool {
        self.expose_ids
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("expose_ids", &self.expose_ids)
            .field("to_plain", &self.to_plain.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A path-link table entry: where a descendant hangs off its parent.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Link {
    pub(crate) parent: Guid,
    pub(crate) key: Key,
    pub(crate) refer: bool,
}

/// Closed shape of a wrapped node.
pub(crate) enum NodeKind {
    Object(IndexMap<String, Immutable>),
    Array(Vec<Immutable>),
    Date(i64),
    Regex(String),
    Cycle(Guid),
}

struct NodeData {
    guid: Guid,
    kind: NodeKind,
    links: HashMap<Guid, Link>,
    opts: Rc<Options>,
}

/// A frozen wrapper node. Obtained through [`Immutable::create`]; there is
/// no other way to construct one.
#[derive(Clone)]
pub struct Node(Rc<NodeData>);

impl Node {
    fn new(guid: Guid, kind: NodeKind, links: HashMap<Guid, Link>, opts: Rc<Options>) -> Self {
        Node(Rc::new(NodeData {
            guid,
            kind,
            links,
            opts,
        }))
    }

    fn cycle(target: Guid, opts: Rc<Options>) -> Self {
        Node::new(
            Guid::random(),
            NodeKind::Cycle(target),
            HashMap::new(),
            opts,
        )
    }

    /// This node's identifier.
    #[inline]
    pub fn guid(&self) -> &Guid {
        &self.0.guid
    }

    /// Instance identity.
    #[inline]
    pub fn ptr_eq(&self, other: &Node) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn kind(&self) -> &NodeKind {
        &self.0.kind
    }

    pub(crate) fn links(&self) -> &HashMap<Guid, Link> {
        &self.0.links
    }

    fn opts(&self) -> &Rc<Options> {
        &self.0.opts
    }
}

/// A wrapped value: a primitive leaf, or a frozen [`Node`].
///
/// Primitives are immutable by nature and wrap to themselves; everything
/// else wraps to a [`Node`] variant. The whole read/navigate/mutate API
/// lives here and is total: operations that do not apply to the receiver
/// (an array method on an object, an unreachable path) are documented
/// no-ops returning the receiver unchanged.
#[derive(Clone)]
pub enum Immutable {
    /// Absent value.
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Numeric leaf.
    Number(Number),
    /// String leaf.
    String(String),
    /// A frozen object, array, surrogate, or cycle reference.
    Node(Node),
}

/// Anything that can designate a node: a wrapper, a raw value, or a bare
/// identifier.
pub trait NodeRef {
    /// The designated identifier, if the value carries one.
    fn referenced_guid(&self) -> Option<Guid>;
}

impl NodeRef for &Immutable {
    fn referenced_guid(&self) -> Option<Guid> {
        self.guid().cloned()
    }
}

impl NodeRef for &Guid {
    fn referenced_guid(&self) -> Option<Guid> {
        Some((*self).clone())
    }
}

impl NodeRef for Guid {
    fn referenced_guid(&self) -> Option<Guid> {
        Some(self.clone())
    }
}

impl NodeRef for &Source {
    fn referenced_guid(&self) -> Option<Guid> {
        self.guid()
    }
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

impl Immutable {
    /// Wrap a raw value into an immutable tree with default [`Options`].
    ///
    /// Primitives and already-wrapped values are returned as-is, so
    /// wrapping is idempotent.
    ///
    /// # Errors
    ///
    /// [`Error::MissingConverter`] when a callable value is reached without
    /// a configured converter; [`Error::InvalidConversionResult`] when the
    /// converter returns anything but a plain object.
    pub fn create(value: impl Into<Source>) -> Result<Immutable> {
        Self::create_with(value, Options::default())
    }

    /// Wrap a raw value with explicit [`Options`].
    pub fn create_with(value: impl Into<Source>, options: Options) -> Result<Immutable> {
        wrap_root(value.into(), &Rc::new(options))
    }

    /// Check whether a raw value is already immutable: primitives are,
    /// and so are wrapped instances.
    pub fn is_immutable(value: &Source) -> bool {
        value.is_primitive() || matches!(value, Source::Immutable(_))
    }

    /// Check whether a raw value is a wrapped instance.
    pub fn is_instance(value: &Source) -> bool {
        matches!(value, Source::Immutable(_))
    }

    /// Re-wrap a raw tree with the options this tree was created with.
    pub(crate) fn rewrap(&self, source: Source) -> Result<Immutable> {
        let opts = match self.node() {
            Some(node) => node.opts().clone(),
            None => Rc::new(Options::default()),
        };
        wrap_root(source, &opts)
    }

    /// Re-wrap where failure is impossible (the raw tree only contains
    /// already-wrapped children and leaves).
    fn rewrap_or_self(&self, source: Source) -> Immutable {
        self.rewrap(source).unwrap_or_else(|_| self.clone())
    }
}

// ---------------------------------------------------------------------------
// Leaf accessors and identity
// ---------------------------------------------------------------------------

impl Immutable {
    /// Check for the null leaf.
    #[inline]
    pub fn is_null(&self) -> bool {
        matches!(self, Immutable::Null)
    }

    /// The boolean leaf value, if any.
    #[inline]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Immutable::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// The numeric leaf value, if any.
    #[inline]
    pub fn as_number(&self) -> Option<Number> {
        match self {
            Immutable::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The numeric leaf as i64 (truncating floats), if any.
    #[inline]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_number().map(|n| n.as_i64())
    }

    /// The numeric leaf as f64, if any.
    #[inline]
    pub fn as_f64(&self) -> Option<f64> {
        self.as_number().map(|n| n.as_f64())
    }

    /// The string leaf value, if any.
    #[inline]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Immutable::String(s) => Some(s),
            _ => None,
        }
    }

    pub(crate) fn node(&self) -> Option<&Node> {
        match self {
            Immutable::Node(node) => Some(node),
            _ => None,
        }
    }

    /// This value's identifier. Leaves have none.
    #[inline]
    pub fn guid(&self) -> Option<&Guid> {
        self.node().map(Node::guid)
    }

    /// Host `===` semantics: leaves compare by value, nodes by instance.
    pub fn ptr_eq(&self, other: &Immutable) -> bool {
        match (self, other) {
            (Immutable::Node(a), Immutable::Node(b)) => a.ptr_eq(b),
            (Immutable::Node(_), _) | (_, Immutable::Node(_)) => false,
            (a, b) => leaf_eq(a, b),
        }
    }

    /// Identity equality: both sides resolve to a node and share the same
    /// identifier.
    pub fn same(&self, other: &Immutable) -> bool {
        match (self.guid(), other.guid()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Deep structural equality.
    ///
    /// Key lists are compared sorted, then values recursively, which makes
    /// an array node equal to an object node carrying the same indexed
    /// values — that equivalence is intentional. Identifiers are never
    /// compared; use [`same`](Immutable::same) for identity.
    pub fn equals(&self, other: &Immutable) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        match (self.node(), other.node()) {
            (Some(_), Some(_)) => {
                let mut a_keys = self.keys();
                let mut b_keys = other.keys();
                a_keys.sort();
                b_keys.sort();
                if a_keys != b_keys {
                    return false;
                }
                a_keys.iter().all(|k| match (self.child(k), other.child(k)) {
                    (Some(a), Some(b)) => a.equals(&b),
                    (None, None) => true,
                    _ => false,
                })
            }
            (None, None) => leaf_eq(self, other),
            _ => false,
        }
    }
}

fn leaf_eq(a: &Immutable, b: &Immutable) -> bool {
    match (a, b) {
        (Immutable::Null, Immutable::Null) => true,
        (Immutable::Bool(x), Immutable::Bool(y)) => x == y,
        (Immutable::Number(x), Immutable::Number(y)) => x == y,
        (Immutable::String(x), Immutable::String(y)) => x == y,
        _ => false,
    }
}

impl PartialEq for Immutable {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

// ---------------------------------------------------------------------------
// Shape predicates and enumeration
// ---------------------------------------------------------------------------

impl Immutable {
    /// Check for an array node.
    pub fn is_array(&self) -> bool {
        matches!(self.node().map(Node::kind), Some(NodeKind::Array(_)))
    }

    /// Check for a date surrogate.
    pub fn is_date(&self) -> bool {
        matches!(self.node().map(Node::kind), Some(NodeKind::Date(_)))
    }

    /// Check for a regexp surrogate.
    pub fn is_regex(&self) -> bool {
        matches!(self.node().map(Node::kind), Some(NodeKind::Regex(_)))
    }

    /// Check for a cycle-reference node.
    pub fn is_cycle_ref(&self) -> bool {
        matches!(self.node().map(Node::kind), Some(NodeKind::Cycle(_)))
    }

    /// The identifier a cycle-reference node points at.
    pub fn cycle_target(&self) -> Option<&Guid> {
        match self.node()?.kind() {
            NodeKind::Cycle(target) => Some(target),
            _ => None,
        }
    }

    /// Check whether any descendant is a cycle reference.
    pub fn has_cycle_refs(&self) -> bool {
        self.node()
            .is_some_and(|n| n.links().values().any(|l| l.refer))
    }

    /// Own enumerable keys: entry names for objects, the stringified index
    /// sequence for arrays, the sentinel key for surrogates and cycle
    /// references. Leaves have none. Identifiers are never enumerated.
    pub fn keys(&self) -> Vec<Key> {
        match self.node().map(Node::kind) {
            Some(NodeKind::Object(entries)) => {
                entries.keys().map(|k| Key::new(k.clone())).collect()
            }
            Some(NodeKind::Array(items)) => (0..items.len()).map(Key::index).collect(),
            Some(NodeKind::Date(_)) => vec![Key::new(DATE_KEY)],
            Some(NodeKind::Regex(_)) => vec![Key::new(REGEX_KEY)],
            Some(NodeKind::Cycle(_)) => vec![Key::new(CYCLE_KEY)],
            None => Vec::new(),
        }
    }

    /// The wrapped child at `key`, one level down. Surrogates expose their
    /// sentinel key; leaves have no children.
    pub fn child(&self, key: &Key) -> Option<Immutable> {
        match self.node()?.kind() {
            NodeKind::Object(entries) => entries.get(key.as_str()).cloned(),
            NodeKind::Array(items) => key.as_index().and_then(|i| items.get(i)).cloned(),
            NodeKind::Date(ms) => {
                (key.as_str() == DATE_KEY).then(|| Immutable::Number(Number::Int(*ms)))
            }
            NodeKind::Regex(pattern) => {
                (key.as_str() == REGEX_KEY).then(|| Immutable::String(pattern.clone()))
            }
            NodeKind::Cycle(target) => {
                (key.as_str() == CYCLE_KEY).then(|| Immutable::String(target.as_str().to_owned()))
            }
        }
    }

    /// Number of own entries: array length, object entry count, 1 for
    /// surrogates, 0 for leaves.
    pub fn size(&self) -> usize {
        match self.node().map(Node::kind) {
            Some(NodeKind::Array(items)) => items.len(),
            Some(NodeKind::Object(entries)) => entries.len(),
            Some(_) => 1,
            None => 0,
        }
    }

    /// Check for zero own entries.
    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    /// Unwrap a surrogate to its backing primitive: epoch milliseconds for
    /// dates, the string form for regexps, the target identifier for cycle
    /// references. Everything else is handed back unchanged.
    pub fn value_of(&self) -> Immutable {
        match self.node().map(Node::kind) {
            Some(NodeKind::Date(ms)) => Immutable::Number(Number::Int(*ms)),
            Some(NodeKind::Regex(pattern)) => Immutable::String(pattern.clone()),
            Some(NodeKind::Cycle(target)) => Immutable::String(target.as_str().to_owned()),
            _ => self.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Navigation
// ---------------------------------------------------------------------------

impl Immutable {
    /// The path of `target` from this root, walked back through the
    /// path-link table: `[]` for the root itself, `None` when the target
    /// is not on this tree (leaves never are).
    pub fn path_of(&self, target: impl NodeRef) -> Option<Path> {
        let node = self.node()?;
        let target = target.referenced_guid()?;
        if target == *node.guid() {
            return Some(Path::new());
        }

        let mut keys: Vec<Key> = Vec::new();
        let mut cursor = target;
        while cursor != *node.guid() {
            let link = node.links().get(&cursor)?;
            keys.push(link.key.clone());
            cursor = link.parent.clone();
        }
        keys.reverse();
        Some(Path::from_keys(keys))
    }

    /// The relative path from `top` down to `sub`: `[]` when they are the
    /// same node, `None` when either is unresolvable or `top` does not
    /// lead to `sub`.
    pub fn sub_path(&self, top: impl NodeRef, sub: impl NodeRef) -> Option<Path> {
        let top_path = self.path_of(top)?;
        let sub_path = self.path_of(sub)?;
        sub_path.strip_prefix(&top_path)
    }

    /// Check whether `target` is on this tree.
    pub fn has(&self, target: impl NodeRef) -> bool {
        let Some(node) = self.node() else {
            return false;
        };
        match target.referenced_guid() {
            Some(t) => t == *node.guid() || node.links().contains_key(&t),
            None => false,
        }
    }

    /// Resolve a path argument against this tree, following cycle
    /// references back to their real nodes (the real path always restarts
    /// from the root). `None` means "no path" or a broken path.
    fn resolve(&self, input: PathInput, until_end: bool) -> Option<Path> {
        let extracted = extract(input)?;
        if extracted.is_empty() {
            return Some(extracted);
        }

        let mut real = Path::new();
        let mut cursor: Option<Immutable> = Some(self.clone());
        let len = extracted.len();
        let bound = if until_end { len + 1 } else { len };
        for i in 0..bound {
            // A cycle reference may itself point at another cycle
            // reference; follow until a real node.
            loop {
                let target = match &cursor {
                    Some(value) => value.cycle_target().cloned(),
                    None => None,
                };
                let Some(target) = target else {
                    break;
                };
                real = self.path_of(target)?;
                if i < len {
                    cursor = ops::get_by_path(self, &real);
                } else {
                    break;
                }
            }

            if i < len {
                let key = &extracted[i];
                match &cursor {
                    Some(value @ Immutable::Node(_)) => {
                        let next = value.child(key);
                        real.push(key.clone());
                        cursor = next;
                    }
                    // Landed on a leaf with keys left to walk: broken path.
                    _ => return None,
                }
            }
        }
        Some(real)
    }

    /// The wrapped value at `path`, resolving cycle references along the
    /// way. The root itself for the empty path; `None` for "no path", a
    /// broken path, or a missing key.
    pub fn get(&self, path: impl Into<PathInput>) -> Option<Immutable> {
        let real = self.resolve(path.into(), false)?;
        ops::get_by_path(self, &real)
    }
}

// ---------------------------------------------------------------------------
// Copy-on-write mutation
// ---------------------------------------------------------------------------

impl Immutable {
    /// Replace the value at `path`, cloning only the nodes on the way and
    /// sharing every untouched subtree with `self`.
    ///
    /// "No path" and unreachable paths are no-ops returning `self`; the
    /// explicit empty path (`Path::new()`) replaces the whole tree with
    /// `value`. A replacement equal by reference to the current leaf is a
    /// no-op. The new root keeps this root's identifier.
    pub fn set(&self, path: impl Into<PathInput>, value: impl Into<Source>) -> Result<Immutable> {
        if self.node().is_none() {
            return Ok(self.clone());
        }
        let value = value.into();
        match self.resolve(path.into(), false) {
            None => Ok(self.clone()),
            Some(p) if p.is_empty() => self.rewrap(value),
            Some(p) => {
                trace!(path = %p, "set");
                let outcome = ops::copy_by_path(
                    self,
                    Some(&p),
                    |target, _, _| {
                        if ops::same_ref(target, &value) {
                            Edit::Keep
                        } else {
                            Edit::Set(value)
                        }
                    },
                    None,
                );
                self.finish_copy(outcome)
            }
        }
    }

    /// Update the value at `path` through `updater`, which receives the
    /// current value (the null leaf when the key does not exist yet), its
    /// key, and its parent, and returns the replacement — or `None` for
    /// "no change", making the whole call a no-op.
    ///
    /// When `path` resolves to the root, `updater` is applied to `self`
    /// directly with no cloning machinery.
    pub fn update<F>(&self, path: impl Into<PathInput>, updater: F) -> Result<Immutable>
    where
        F: FnOnce(&Immutable, Option<&Key>, Option<&Immutable>) -> Option<Source>,
    {
        if self.node().is_none() {
            return Ok(self.clone());
        }
        match self.resolve(path.into(), true) {
            None => Ok(self.clone()),
            Some(p) if p.is_empty() => match updater(self, None, None) {
                None => Ok(self.clone()),
                Some(source) => self.rewrap(source),
            },
            Some(p) => {
                let outcome = ops::copy_by_path(
                    self,
                    Some(&p),
                    |target, key, top| apply_updater(updater, target, key, top),
                    None,
                );
                self.finish_copy(outcome)
            }
        }
    }

    /// Like [`update`](Immutable::update), with a second callback invoked
    /// on every node from the mutation site back to the root (each one
    /// re-wrapped first, together with its parent), allowing side
    /// transformations while walking back up.
    pub fn update_with<F, P>(
        &self,
        path: impl Into<PathInput>,
        updater: F,
        path_updater: P,
    ) -> Result<Immutable>
    where
        F: FnOnce(&Immutable, Option<&Key>, Option<&Immutable>) -> Option<Source>,
        P: Fn(&Immutable, Option<&Key>, Option<&Immutable>) -> Option<Source>,
    {
        if self.node().is_none() {
            return Ok(self.clone());
        }
        match self.resolve(path.into(), true) {
            None => Ok(self.clone()),
            Some(p) if p.is_empty() => match updater(self, None, None) {
                None => Ok(self.clone()),
                Some(source) => self.rewrap(source),
            },
            Some(p) => {
                let failure: RefCell<Option<Error>> = RefCell::new(None);
                let path_proc = |source: &Source,
                                 key: Option<&Key>,
                                 parent: Option<&Source>|
                 -> Edit {
                    if failure.borrow().is_some() {
                        return Edit::Keep;
                    }
                    let node = match self.rewrap(source.clone()) {
                        Ok(node) => node,
                        Err(e) => {
                            *failure.borrow_mut() = Some(e);
                            return Edit::Keep;
                        }
                    };
                    let parent_node = match parent {
                        Some(parent) => match self.rewrap(parent.clone()) {
                            Ok(node) => Some(node),
                            Err(e) => {
                                *failure.borrow_mut() = Some(e);
                                return Edit::Keep;
                            }
                        },
                        None => None,
                    };
                    match path_updater(&node, key, parent_node.as_ref()) {
                        None => Edit::Keep,
                        Some(replacement) => Edit::Set(replacement),
                    }
                };

                let outcome = ops::copy_by_path(
                    self,
                    Some(&p),
                    |target, key, top| apply_updater(updater, target, key, top),
                    Some(&path_proc),
                );
                if let Some(e) = failure.into_inner() {
                    return Err(e);
                }
                self.finish_copy(outcome)
            }
        }
    }

    /// Shallow-merge `value`'s own entries onto this node. Entries whose
    /// values are reference-equal on both sides are skipped; a merge that
    /// changes nothing returns `self`. Mismatched shapes degenerate to
    /// "replace with `value`".
    pub fn merge(&self, value: impl Into<Source>) -> Result<Immutable> {
        self.merge_with(value, false)
    }

    /// Deep merge; equal to `merge_with(value, true)`.
    pub fn merge_deep(&self, value: impl Into<Source>) -> Result<Immutable> {
        self.merge_with(value, true)
    }

    /// Merge with explicit depth control.
    pub fn merge_with(&self, value: impl Into<Source>, deep: bool) -> Result<Immutable> {
        match ops::merge_node(self, &value.into(), deep) {
            MergeOutcome::Unchanged => Ok(self.clone()),
            MergeOutcome::Take(source) => self.rewrap(source),
        }
    }

    /// Remove the leaf at `path` from its parent (arrays splice, objects
    /// delete), propagating the structural change upward. "No path",
    /// the empty path, and unreachable paths are no-ops returning `self`.
    pub fn remove(&self, path: impl Into<PathInput>) -> Immutable {
        if self.node().is_none() {
            return self.clone();
        }
        match self.resolve(path.into(), true) {
            None => self.clone(),
            Some(p) if p.is_empty() => self.clone(),
            Some(p) => {
                trace!(path = %p, "remove");
                let outcome = ops::copy_by_path(
                    self,
                    Some(&p),
                    |target, _, _| {
                        if target.is_some() {
                            Edit::Remove
                        } else {
                            Edit::Keep
                        }
                    },
                    None,
                );
                match outcome {
                    CopyOutcome::Unchanged => self.clone(),
                    CopyOutcome::Changed(source) => self.rewrap_or_self(source),
                    CopyOutcome::Removed => Immutable::Null,
                }
            }
        }
    }

    /// A new empty node of the same shape (array or object), keeping this
    /// node's identifier. Leaves are handed back unchanged.
    pub fn clear(&self) -> Immutable {
        let Some(node) = self.node() else {
            return self.clone();
        };
        let target: Source = if self.is_array() {
            Source::Array(SourceArray::new())
        } else {
            Source::Object(SourceObject::new())
        };
        target.bind_guid(node.guid().clone());
        self.rewrap_or_self(target)
    }

    fn finish_copy(&self, outcome: CopyOutcome) -> Result<Immutable> {
        match outcome {
            CopyOutcome::Unchanged => Ok(self.clone()),
            CopyOutcome::Changed(source) => self.rewrap(source),
            CopyOutcome::Removed => Ok(Immutable::Null),
        }
    }
}

fn apply_updater<F>(
    updater: F,
    target: Option<&Immutable>,
    key: Option<&Key>,
    top: Option<&Immutable>,
) -> Edit
where
    F: FnOnce(&Immutable, Option<&Key>, Option<&Immutable>) -> Option<Source>,
{
    let current = target.cloned().unwrap_or(Immutable::Null);
    match updater(&current, key, top) {
        None => Edit::Keep,
        Some(source) => {
            if ops::same_ref(Some(&current), &source) {
                Edit::Keep
            } else {
                Edit::Set(source)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Higher-order traversal
// ---------------------------------------------------------------------------

impl Immutable {
    /// Visit every own entry with `(child, key, parent)`. Return `false`
    /// from the callback to stop early.
    pub fn for_each(&self, mut side_effect: impl FnMut(&Immutable, &Key, &Immutable) -> bool) {
        ops::for_each_node(self, Some(&Path::new()), &mut side_effect);
    }

    /// Visit every own entry of the node at `path`. "No path" and broken
    /// paths visit nothing.
    pub fn for_each_at(
        &self,
        path: impl Into<PathInput>,
        mut side_effect: impl FnMut(&Immutable, &Key, &Immutable) -> bool,
    ) {
        let resolved = self.resolve(path.into(), true);
        ops::for_each_node(self, resolved.as_ref(), &mut side_effect);
    }

    /// The first entry accepted by `predicate`, if any.
    pub fn find(
        &self,
        mut predicate: impl FnMut(&Immutable, &Key, &Immutable) -> bool,
    ) -> Option<Immutable> {
        let mut expected = None;
        self.for_each(|child, key, top| {
            if predicate(child, key, top) {
                expected = Some(child.clone());
                false
            } else {
                true
            }
        });
        expected
    }

    /// A fresh node (with a new identity) holding the entries accepted by
    /// `predicate`; arrays are re-indexed densely.
    pub fn filter(&self, mut predicate: impl FnMut(&Immutable, &Key, &Immutable) -> bool) -> Immutable {
        if self.node().is_none() {
            return self.clone();
        }
        let is_array = self.is_array();
        let object = SourceObject::new();
        let array = SourceArray::new();
        self.for_each(|child, key, top| {
            if predicate(child, key, top) {
                if is_array {
                    array.push(Source::from(child));
                } else {
                    object.insert(key.as_str(), Source::from(child));
                }
            }
            true
        });
        let target = if is_array {
            Source::Array(array)
        } else {
            Source::Object(object)
        };
        self.rewrap_or_self(target)
    }

    /// A node with every entry passed through `mapper`, keeping this
    /// node's identifier. When no entry changed, `self` is returned by
    /// reference.
    pub fn map(
        &self,
        mut mapper: impl FnMut(&Immutable, &Key, &Immutable) -> Source,
    ) -> Result<Immutable> {
        let Some(node) = self.node() else {
            return Ok(self.clone());
        };
        let is_array = self.is_array();
        let object = SourceObject::new();
        let array = SourceArray::new();
        let mut changed = false;
        self.for_each(|child, key, top| {
            let mapped = mapper(child, key, top);
            if !ops::same_ref(Some(child), &mapped) {
                changed = true;
            }
            if is_array {
                array.push(mapped);
            } else {
                object.insert(key.as_str(), mapped);
            }
            true
        });
        if !changed {
            return Ok(self.clone());
        }
        let target = if is_array {
            Source::Array(array)
        } else {
            Source::Object(object)
        };
        target.bind_guid(node.guid().clone());
        self.rewrap(target)
    }

    /// Fold the entries into a wrapped value, passing the running
    /// reduction (re-wrapped at every step) as `(acc, child, key, parent)`.
    pub fn reduce(
        &self,
        init: impl Into<Source>,
        mut reducer: impl FnMut(&Immutable, &Immutable, &Key, &Immutable) -> Source,
    ) -> Result<Immutable> {
        let mut acc = self.rewrap(init.into())?;
        let mut failed: Option<Error> = None;
        self.for_each(|child, key, top| {
            let next = reducer(&acc, child, key, top);
            match self.rewrap(next) {
                Ok(value) => {
                    acc = value;
                    true
                }
                Err(e) => {
                    failed = Some(e);
                    false
                }
            }
        });
        match failed {
            Some(e) => Err(e),
            None => Ok(acc),
        }
    }
}

// ---------------------------------------------------------------------------
// Array operations
// ---------------------------------------------------------------------------

impl Immutable {
    fn as_array_source(&self) -> Option<SourceArray> {
        if !self.is_array() {
            return None;
        }
        match ops::clone_node(self) {
            Source::Array(array) => Some(array),
            _ => None,
        }
    }

    fn array_items(&self) -> Option<&Vec<Immutable>> {
        match self.node()?.kind() {
            NodeKind::Array(items) => Some(items),
            _ => None,
        }
    }

    /// Append values at the tail. No values, or a non-array receiver, is a
    /// no-op returning `self`.
    pub fn push(&self, values: Vec<Source>) -> Result<Immutable> {
        if values.is_empty() {
            return Ok(self.clone());
        }
        let Some(array) = self.as_array_source() else {
            return Ok(self.clone());
        };
        array.edit(|items| items.extend(values));
        self.rewrap(Source::Array(array))
    }

    /// Drop the tail element. Empty arrays and non-arrays are no-ops.
    pub fn pop(&self) -> Immutable {
        let Some(array) = self.as_array_source() else {
            return self.clone();
        };
        if array.is_empty() {
            return self.clone();
        }
        array.edit(|items| {
            items.pop();
        });
        self.rewrap_or_self(Source::Array(array))
    }

    /// Prepend values at the head. No values, or a non-array receiver, is
    /// a no-op returning `self`.
    pub fn unshift(&self, values: Vec<Source>) -> Result<Immutable> {
        if values.is_empty() {
            return Ok(self.clone());
        }
        let Some(array) = self.as_array_source() else {
            return Ok(self.clone());
        };
        array.edit(|items| {
            for (i, value) in values.into_iter().enumerate() {
                items.insert(i, value);
            }
        });
        self.rewrap(Source::Array(array))
    }

    /// Drop the head element. Empty arrays and non-arrays are no-ops.
    pub fn shift(&self) -> Immutable {
        let Some(array) = self.as_array_source() else {
            return self.clone();
        };
        if array.is_empty() {
            return self.clone();
        }
        array.edit(|items| {
            items.remove(0);
        });
        self.rewrap_or_self(Source::Array(array))
    }

    /// Remove `remove_count` elements at `start` and insert `values`
    /// there. Out-of-range arguments are clamped.
    pub fn splice(
        &self,
        start: usize,
        remove_count: usize,
        values: Vec<Source>,
    ) -> Result<Immutable> {
        let Some(array) = self.as_array_source() else {
            return Ok(self.clone());
        };
        array.edit(|items| {
            let start = start.min(items.len());
            let end = (start + remove_count).min(items.len());
            items.splice(start..end, values);
        });
        self.rewrap(Source::Array(array))
    }

    /// A new array node holding the elements in `start..end` (`end`
    /// defaults to the length), keeping this node's identifier.
    pub fn slice(&self, start: usize, end: Option<usize>) -> Immutable {
        let Some(node) = self.node() else {
            return self.clone();
        };
        let Some(items) = self.array_items() else {
            return self.clone();
        };
        let len = items.len();
        let start = start.min(len);
        let end = end.unwrap_or(len).min(len).max(start);
        let array = SourceArray::from_items(items[start..end].iter().map(Source::from).collect());
        array.bind(node.guid().clone());
        self.rewrap_or_self(Source::Array(array))
    }

    /// Append the given values, flattening one level of array arguments
    /// (wrapped array arguments are unwrapped to their elements first).
    /// No values, or a non-array receiver, is a no-op.
    pub fn concat(&self, values: Vec<Source>) -> Result<Immutable> {
        if values.is_empty() {
            return Ok(self.clone());
        }
        let Some(array) = self.as_array_source() else {
            return Ok(self.clone());
        };
        array.edit(|items| {
            for value in values {
                match value {
                    Source::Array(other) => items.extend(other.snapshot()),
                    Source::Immutable(ref node) if node.is_array() => {
                        if let Source::Array(other) = ops::clone_node(node) {
                            items.extend(other.snapshot());
                        }
                    }
                    other => items.push(other),
                }
            }
        });
        self.rewrap(Source::Array(array))
    }

    /// Insert values at `index` (clamped to the length), flattening one
    /// level of array arguments. No values is a no-op.
    pub fn insert(&self, index: usize, values: Vec<Source>) -> Result<Immutable> {
        if values.is_empty() {
            return Ok(self.clone());
        }
        let Some(array) = self.as_array_source() else {
            return Ok(self.clone());
        };
        array.edit(|items| {
            let at = index.min(items.len());
            let mut expanded = Vec::new();
            for value in values {
                match value {
                    Source::Array(other) => expanded.extend(other.snapshot()),
                    Source::Immutable(ref node) if node.is_array() => {
                        if let Source::Array(other) = ops::clone_node(node) {
                            expanded.extend(other.snapshot());
                        }
                    }
                    other => expanded.push(other),
                }
            }
            items.splice(at..at, expanded);
        });
        self.rewrap(Source::Array(array))
    }

    /// Sort by the given comparator. Arrays of size ≤ 1, and non-arrays,
    /// are no-ops returning `self`.
    pub fn sort_by(&self, mut compare: impl FnMut(&Immutable, &Immutable) -> Ordering) -> Immutable {
        if self.size() <= 1 {
            return self.clone();
        }
        let Some(node) = self.node() else {
            return self.clone();
        };
        let Some(items) = self.array_items() else {
            return self.clone();
        };
        let mut sorted = items.clone();
        sorted.sort_by(|a, b| compare(a, b));
        let array = SourceArray::from_items(sorted.iter().map(Source::from).collect());
        array.bind(node.guid().clone());
        self.rewrap_or_self(Source::Array(array))
    }

    /// Sort by a canonical value order: nulls, booleans, numbers
    /// (numeric), strings (lexicographic), then nodes.
    pub fn sort(&self) -> Immutable {
        self.sort_by(default_order)
    }

    /// Reverse the elements. Arrays of size ≤ 1, and non-arrays, are
    /// no-ops returning `self`.
    pub fn reverse(&self) -> Immutable {
        if self.size() <= 1 {
            return self.clone();
        }
        let Some(node) = self.node() else {
            return self.clone();
        };
        let Some(items) = self.array_items() else {
            return self.clone();
        };
        let array =
            SourceArray::from_items(items.iter().rev().map(Source::from).collect());
        array.bind(node.guid().clone());
        self.rewrap_or_self(Source::Array(array))
    }

    /// The first element of an array node.
    pub fn first(&self) -> Option<Immutable> {
        self.at(0)
    }

    /// The last element of an array node.
    pub fn last(&self) -> Option<Immutable> {
        let items = self.array_items()?;
        items.last().cloned()
    }

    /// The element at `index` of an array node.
    pub fn at(&self, index: usize) -> Option<Immutable> {
        self.array_items()?.get(index).cloned()
    }

    /// The index of the first element accepted by `predicate`.
    pub fn find_index(
        &self,
        mut predicate: impl FnMut(&Immutable, &Key, &Immutable) -> bool,
    ) -> Option<usize> {
        if !self.is_array() {
            return None;
        }
        let mut found = None;
        self.for_each(|child, key, top| {
            if predicate(child, key, top) {
                found = key.as_index();
                false
            } else {
                true
            }
        });
        found
    }
}

fn default_order(a: &Immutable, b: &Immutable) -> Ordering {
    fn rank(value: &Immutable) -> u8 {
        match value {
            Immutable::Null => 0,
            Immutable::Bool(_) => 1,
            Immutable::Number(_) => 2,
            Immutable::String(_) => 3,
            Immutable::Node(_) => 4,
        }
    }
    match (a, b) {
        (Immutable::Bool(x), Immutable::Bool(y)) => x.cmp(y),
        (Immutable::Number(x), Immutable::Number(y)) => {
            x.as_f64().partial_cmp(&y.as_f64()).unwrap_or(Ordering::Equal)
        }
        (Immutable::String(x), Immutable::String(y)) => x.cmp(y),
        (Immutable::Node(x), Immutable::Node(y)) => x.guid().as_str().cmp(y.guid().as_str()),
        _ => rank(a).cmp(&rank(b)),
    }
}

// ---------------------------------------------------------------------------
// The wrap recursion
// ---------------------------------------------------------------------------

struct WrapCtx<'a> {
    root: Guid,
    /// Root-wide path-link accumulation, for cross-subtree cycle checks.
    links: &'a mut HashMap<Guid, Link>,
    /// Every identifier whose wrap has started anywhere under this root.
    started: &'a mut HashSet<Guid>,
    opts: &'a Rc<Options>,
}

enum Shape {
    Entries(Vec<(Key, Source)>, bool),
    Date(i64),
    Regex(String),
}

fn wrap_root(source: Source, opts: &Rc<Options>) -> Result<Immutable> {
    // Primitives and already-wrapped values are immutable as they are.
    match source {
        Source::Null => return Ok(Immutable::Null),
        Source::Bool(b) => return Ok(Immutable::Bool(b)),
        Source::Number(n) => return Ok(Immutable::Number(n)),
        Source::String(s) => return Ok(Immutable::String(s)),
        Source::Immutable(node) => return Ok(node),
        _ => {}
    }
    let Some(root_id) = source.guid() else {
        return Ok(Immutable::Null);
    };

    trace!(root = %root_id, "wrapping");
    let mut links = HashMap::new();
    let mut started = HashSet::new();
    let mut ctx = WrapCtx {
        root: root_id,
        links: &mut links,
        started: &mut started,
        opts,
    };
    wrap_value(source, &mut ctx)
}

fn wrap_value(source: Source, ctx: &mut WrapCtx<'_>) -> Result<Immutable> {
    let (id, shape) = match source {
        Source::Null => return Ok(Immutable::Null),
        Source::Bool(b) => return Ok(Immutable::Bool(b)),
        Source::Number(n) => return Ok(Immutable::Number(n)),
        Source::String(s) => return Ok(Immutable::String(s)),
        Source::Immutable(node) => return Ok(node),
        Source::Object(object) => (object.guid(), Shape::Entries(object.snapshot(), false)),
        Source::Array(array) => {
            let entries = array
                .snapshot()
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Key::index(i), v))
                .collect();
            (array.guid(), Shape::Entries(entries, true))
        }
        Source::Date(date) => (date.guid(), Shape::Date(date.millis())),
        Source::Regex(regex) => (regex.guid(), Shape::Regex(regex.pattern().to_owned())),
        Source::Opaque(opaque) => {
            let id = opaque.guid();
            let shape = convert_opaque(&opaque, id.clone(), ctx.opts)?;
            (id, shape)
        }
    };

    ctx.started.insert(id.clone());
    let node = match shape {
        Shape::Date(ms) => Node::new(id, NodeKind::Date(ms), HashMap::new(), ctx.opts.clone()),
        Shape::Regex(pattern) => Node::new(
            id,
            NodeKind::Regex(pattern),
            HashMap::new(),
            ctx.opts.clone(),
        ),
        Shape::Entries(children, is_array) => wrap_children(id, children, is_array, ctx)?,
    };
    Ok(Immutable::Node(node))
}

/// Convert an opaque value into wrappable entries, keeping its identifier
/// on the converter's result.
fn convert_opaque(opaque: &SourceOpaque, id: Guid, opts: &Rc<Options>) -> Result<Shape> {
    match opts.converter() {
        Some(to_plain) => {
            let converted = to_plain(&Source::Opaque(opaque.clone()));
            match &converted {
                Source::Object(object) => {
                    converted.bind_guid(id);
                    Ok(Shape::Entries(object.snapshot(), false))
                }
                other => Err(Error::invalid_conversion(other.type_name())),
            }
        }
        None if opaque.is_callable() => Err(Error::MissingConverter),
        // Nothing enumerable to mirror: keep the value as an empty node
        // under its own identifier.
        None => Ok(Shape::Entries(Vec::new(), false)),
    }
}

fn wrap_children(
    id: Guid,
    children: Vec<(Key, Source)>,
    is_array: bool,
    ctx: &mut WrapCtx<'_>,
) -> Result<Node> {
    let mut local: HashMap<Guid, Link> = HashMap::new();

    // Process already-wrapped children first so a shared immutable subtree
    // seen twice is not divergently re-wrapped; entry order is preserved
    // in the assembled node regardless.
    let mut order: Vec<usize> = (0..children.len()).collect();
    order.sort_by_key(|&i| !matches!(children[i].1, Source::Immutable(_)));

    let mut wrapped: Vec<Option<Immutable>> = children.iter().map(|_| None).collect();
    for index in order {
        let (key, child) = &children[index];
        let value = match cycle_target_of(child, &local, &id, ctx) {
            Some(target) => Immutable::Node(Node::cycle(target, ctx.opts.clone())),
            None => wrap_value(child.clone(), ctx)?,
        };

        if let Immutable::Node(child_node) = &value {
            let link = Link {
                parent: id.clone(),
                key: key.clone(),
                refer: value.is_cycle_ref(),
            };
            local.insert(child_node.guid().clone(), link.clone());
            ctx.links.insert(child_node.guid().clone(), link);
            for (guid, child_link) in child_node.links() {
                local.insert(guid.clone(), child_link.clone());
                ctx.links.insert(guid.clone(), child_link.clone());
            }
        }
        wrapped[index] = Some(value);
    }

    let kind = if is_array {
        NodeKind::Array(wrapped.into_iter().flatten().collect())
    } else {
        let mut entries = IndexMap::with_capacity(children.len());
        for ((key, _), value) in children.into_iter().zip(wrapped) {
            if let Some(value) = value {
                entries.insert(key.as_str().to_owned(), value);
            }
        }
        NodeKind::Object(entries)
    };
    Ok(Node::new(id, kind, local, ctx.opts.clone()))
}

/// Decide whether wrapping `child` would re-enter a node already wrapped
/// (or being wrapped) under this root; if so, name the re-entered node.
fn cycle_target_of(
    child: &Source,
    local: &HashMap<Guid, Link>,
    parent: &Guid,
    ctx: &WrapCtx<'_>,
) -> Option<Guid> {
    let target = child.guid()?;
    let is_cycle = local.contains_key(&target)
        || target == *parent
        || target == ctx.root
        || ctx.started.contains(&target);
    is_cycle.then_some(target)
}

// ---------------------------------------------------------------------------
// Serialization and formatting
// ---------------------------------------------------------------------------

impl Serialize for Immutable {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        match self {
            Immutable::Null => serializer.serialize_unit(),
            Immutable::Bool(b) => serializer.serialize_bool(*b),
            Immutable::Number(Number::Int(i)) => serializer.serialize_i64(*i),
            Immutable::Number(Number::Float(f)) => serializer.serialize_f64(*f),
            Immutable::String(s) => serializer.serialize_str(s),
            Immutable::Node(node) => node.serialize(serializer),
        }
    }
}

impl Serialize for Node {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let expose = self.opts().ids_exposed();
        match self.kind() {
            NodeKind::Object(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len() + usize::from(expose)))?;
                if expose {
                    map.serialize_entry(GUID_KEY, self.guid().as_str())?;
                }
                for (key, value) in entries {
                    map.serialize_entry(key, value)?;
                }
                map.end()
            }
            NodeKind::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            NodeKind::Date(ms) => {
                let mut map = serializer.serialize_map(Some(1 + usize::from(expose)))?;
                if expose {
                    map.serialize_entry(GUID_KEY, self.guid().as_str())?;
                }
                map.serialize_entry(DATE_KEY, ms)?;
                map.end()
            }
            NodeKind::Regex(pattern) => {
                let mut map = serializer.serialize_map(Some(1 + usize::from(expose)))?;
                if expose {
                    map.serialize_entry(GUID_KEY, self.guid().as_str())?;
                }
                map.serialize_entry(REGEX_KEY, pattern)?;
                map.end()
            }
            NodeKind::Cycle(target) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry(CYCLE_KEY, target.as_str())?;
                map.end()
            }
        }
    }
}

impl Immutable {
    /// Serialize to a `serde_json::Value`; surrogates render with their
    /// sentinel keys.
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    /// Serialize to a JSON string.
    pub fn to_json_string(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| "null".to_owned())
    }
}

impl fmt::Display for Immutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_json_string())
    }
}

impl fmt::Debug for Immutable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Immutable::Null => f.write_str("null"),
            Immutable::Bool(b) => write!(f, "{}", b),
            Immutable::Number(Number::Int(i)) => write!(f, "{}", i),
            Immutable::Number(Number::Float(x)) => write!(f, "{}", x),
            Immutable::String(s) => write!(f, "{:?}", s),
            Immutable::Node(_) => write!(f, "Immutable({})", self.to_json_string()),
        }
    }
}
