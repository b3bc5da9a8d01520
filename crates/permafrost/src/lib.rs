//! Persistent immutable views over arbitrary object graphs — cyclic ones
//! included — with path-addressable navigation and copy-on-write mutation.
//!
//! # Core Concepts
//!
//! - **[`Source`]**: a raw, mutable value graph, classified once at the
//!   wrap boundary (objects, arrays, dates, regexes, opaques, leaves)
//! - **[`Immutable`]**: a deeply frozen mirror of a source graph; every
//!   mutation produces a new tree sharing all untouched subtrees
//! - **[`Guid`]**: the stable identifier a value keeps across wrapping and
//!   copy-on-write, making "the same logical entity" recognizable
//! - **Path-link table**: an identifier-keyed index carried by every node,
//!   locating any descendant in O(depth) without traversal
//! - **Cycle references**: re-entrant edges are cut into leaf nodes that
//!   name their target and resolve through the root's table, so wrapping
//!   always terminates
//!
//! # Quick Start
//!
//! ```
//! use permafrost::{Immutable, Source};
//! use serde_json::json;
//!
//! let w = Immutable::create(Source::from(json!({
//!     "a": "a",
//!     "b": [{}, {}],
//! }))).unwrap();
//!
//! // Copy-on-write: only the nodes on the path are cloned.
//! let w2 = w.set("b[0]", "x").unwrap();
//! assert_eq!(w2.get("b[0]").unwrap().as_str(), Some("x"));
//! assert!(w2.get("b[1]").unwrap().ptr_eq(&w.get("b[1]").unwrap()));
//!
//! // The original is untouched and both roots stay the same entity.
//! assert!(w.get("b[0]").unwrap().as_str().is_none());
//! assert_eq!(w.guid(), w2.guid());
//! ```
//!
//! # Cycles
//!
//! ```
//! use permafrost::{Immutable, Source, SourceObject};
//!
//! let a = SourceObject::new();
//! a.insert("name", "a");
//! a.insert("itself", Source::Object(a.clone()));
//!
//! let w = Immutable::create(a).unwrap();
//! let back = w.get("itself").unwrap();
//! assert!(back.is_cycle_ref());
//! // The reference resolves through the root to the real node.
//! assert!(w.get("itself.name").unwrap().as_str() == Some("a"));
//! ```

mod diff;
mod error;
mod guid;
mod node;
mod ops;
mod path;
mod source;

pub use diff::{diff, Change, ChangeKind, DiffReport};
pub use error::{Error, Result};
pub use guid::Guid;
pub use node::{
    Immutable, Node, NodeRef, Options, CYCLE_KEY, DATE_KEY, GUID_KEY, REGEX_KEY,
};
pub use path::{extract, Key, Path, PathInput};
pub use source::{
    bind_guid, guid_of, Number, Source, SourceArray, SourceDate, SourceObject, SourceOpaque,
    SourceRegex,
};

/// Deep structural equality between two wrapped values.
/// See [`Immutable::equals`].
pub fn equals(a: &Immutable, b: &Immutable) -> bool {
    a.equals(b)
}

/// Identity equality: both sides resolve to a node with the same
/// identifier. See [`Immutable::same`].
pub fn same(a: &Immutable, b: &Immutable) -> bool {
    a.same(b)
}
