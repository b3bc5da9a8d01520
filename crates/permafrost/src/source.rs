//! Raw, mutable source values — the input side of the wrap boundary.
//!
//! Every value entering the engine is classified exactly once into a
//! [`Source`] variant; the rest of the engine consumes the tag and never
//! re-inspects. Complex variants are reference-shared cells carrying a
//! lazily-assigned [`Guid`], so identity survives aliasing and shallow
//! cloning.

use crate::error::Error;
use crate::guid::Guid;
use crate::node::Immutable;
use crate::path::{Key, Path, PathInput};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::cell::RefCell;
use std::rc::Rc;

/// A numeric leaf value.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Number {
    /// Integer value.
    Int(i64),
    /// Floating-point value.
    Float(f64),
}

impl Number {
    /// Convert to f64.
    #[inline]
    pub fn as_f64(&self) -> f64 {
        match self {
            Number::Int(i) => *i as f64,
            Number::Float(f) => *f,
        }
    }

    /// Convert to i64 (truncates floats).
    #[inline]
    pub fn as_i64(&self) -> i64 {
        match self {
            Number::Int(i) => *i,
            Number::Float(f) => *f as i64,
        }
    }

    /// Check if this is an integer.
    #[inline]
    pub fn is_int(&self) -> bool {
        matches!(self, Number::Int(_))
    }
}

impl PartialEq for Number {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Number::Int(a), Number::Int(b)) => a == b,
            // Mixed comparisons are numeric: 1 == 1.0.
            _ => self.as_f64() == other.as_f64(),
        }
    }
}

impl From<i64> for Number {
    fn from(v: i64) -> Self {
        Number::Int(v)
    }
}

impl From<i32> for Number {
    fn from(v: i32) -> Self {
        Number::Int(v as i64)
    }
}

impl From<u32> for Number {
    fn from(v: u32) -> Self {
        Number::Int(v as i64)
    }
}

impl From<f64> for Number {
    fn from(v: f64) -> Self {
        Number::Float(v)
    }
}

impl From<f32> for Number {
    fn from(v: f32) -> Self {
        Number::Float(v as f64)
    }
}

/// Shared cell attaching a lazily-assigned identifier to a body.
pub(crate) struct IdCell<T: ?Sized> {
    id: RefCell<Option<Guid>>,
    pub(crate) body: T,
}

impl<T> IdCell<T> {
    fn new(body: T) -> Self {
        Self {
            id: RefCell::new(None),
            body,
        }
    }

    /// Existing identifier, or a freshly generated and stored one.
    fn guid(&self) -> Guid {
        let mut slot = self.id.borrow_mut();
        slot.get_or_insert_with(Guid::random).clone()
    }

    fn bind(&self, id: Guid) {
        *self.id.borrow_mut() = Some(id);
    }
}

/// A raw, mutable object with insertion-ordered string keys.
#[derive(Clone)]
pub struct SourceObject(Rc<IdCell<RefCell<IndexMap<String, Source>>>>);

impl SourceObject {
    /// Create an empty object.
    pub fn new() -> Self {
        SourceObject(Rc::new(IdCell::new(RefCell::new(IndexMap::new()))))
    }

    /// Insert or replace an entry.
    pub fn insert(&self, key: impl Into<String>, value: impl Into<Source>) {
        self.0.body.borrow_mut().insert(key.into(), value.into());
    }

    /// Insert an entry and return self (builder pattern).
    pub fn with(self, key: impl Into<String>, value: impl Into<Source>) -> Self {
        self.insert(key, value);
        self
    }

    /// Remove an entry, preserving the order of the others.
    pub fn remove(&self, key: &str) -> Option<Source> {
        self.0.body.borrow_mut().shift_remove(key)
    }

    /// Get a clone of the value at `key`.
    pub fn get(&self, key: &str) -> Option<Source> {
        self.0.body.borrow().get(key).cloned()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.0.body.borrow().len()
    }

    /// Check if the object has no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the entries in insertion order.
    pub(crate) fn snapshot(&self) -> Vec<(Key, Source)> {
        self.0
            .body
            .borrow()
            .iter()
            .map(|(k, v)| (Key::new(k.clone()), v.clone()))
            .collect()
    }

    /// This object's identifier, assigned on first use.
    pub fn guid(&self) -> Guid {
        self.0.guid()
    }

    pub(crate) fn bind(&self, id: Guid) {
        self.0.bind(id);
    }
}

impl Default for SourceObject {
    fn default() -> Self {
        Self::new()
    }
}

/// A raw, mutable array.
#[derive(Clone)]
pub struct SourceArray(Rc<IdCell<RefCell<Vec<Source>>>>);

impl SourceArray {
    /// Create an empty array.
    pub fn new() -> Self {
        SourceArray(Rc::new(IdCell::new(RefCell::new(Vec::new()))))
    }

    /// Create an array from items.
    pub fn from_items(items: Vec<Source>) -> Self {
        SourceArray(Rc::new(IdCell::new(RefCell::new(items))))
    }

    /// Append an item.
    pub fn push(&self, value: impl Into<Source>) {
        self.0.body.borrow_mut().push(value.into());
    }

    /// Append an item and return self (builder pattern).
    pub fn with(self, value: impl Into<Source>) -> Self {
        self.push(value);
        self
    }

    /// Get a clone of the item at `index`.
    pub fn get(&self, index: usize) -> Option<Source> {
        self.0.body.borrow().get(index).cloned()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.0.body.borrow().len()
    }

    /// Check if the array has no items.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Snapshot of the items.
    pub(crate) fn snapshot(&self) -> Vec<Source> {
        self.0.body.borrow().clone()
    }

    /// Mutate the items in place through `f`.
    pub(crate) fn edit(&self, f: impl FnOnce(&mut Vec<Source>)) {
        f(&mut self.0.body.borrow_mut());
    }

    /// This array's identifier, assigned on first use.
    pub fn guid(&self) -> Guid {
        self.0.guid()
    }

    pub(crate) fn bind(&self, id: Guid) {
        self.0.bind(id);
    }
}

impl Default for SourceArray {
    fn default() -> Self {
        Self::new()
    }
}

/// A raw date value (epoch milliseconds) with identity.
#[derive(Clone)]
pub struct SourceDate(Rc<IdCell<i64>>);

impl SourceDate {
    /// Create a date from epoch milliseconds.
    pub fn new(epoch_millis: i64) -> Self {
        SourceDate(Rc::new(IdCell::new(epoch_millis)))
    }

    /// Epoch milliseconds.
    pub fn millis(&self) -> i64 {
        self.0.body
    }

    /// This date's identifier, assigned on first use.
    pub fn guid(&self) -> Guid {
        self.0.guid()
    }

    pub(crate) fn bind(&self, id: Guid) {
        self.0.bind(id);
    }
}

/// A raw regular-expression value (string form) with identity.
#[derive(Clone)]
pub struct SourceRegex(Rc<IdCell<String>>);

impl SourceRegex {
    /// Create a regex surrogate from its string form.
    pub fn new(pattern: impl Into<String>) -> Self {
        SourceRegex(Rc::new(IdCell::new(pattern.into())))
    }

    /// The string form.
    pub fn pattern(&self) -> &str {
        &self.0.body
    }

    /// This regex's identifier, assigned on first use.
    pub fn guid(&self) -> Guid {
        self.0.guid()
    }

    pub(crate) fn bind(&self, id: Guid) {
        self.0.bind(id);
    }
}

/// A value the engine cannot mirror on its own: a callable, or an
/// arbitrary host object. Wrapping one goes through the configured
/// `to_plain` converter.
#[derive(Clone)]
pub struct SourceOpaque {
    cell: Rc<IdCell<Rc<dyn Any>>>,
    callable: bool,
}

impl SourceOpaque {
    /// Wrap an arbitrary host value.
    pub fn value(value: impl Any + 'static) -> Self {
        SourceOpaque {
            cell: Rc::new(IdCell::new(Rc::new(value))),
            callable: false,
        }
    }

    /// Wrap a callable host value. Callables always require a converter.
    pub fn callable(value: impl Any + 'static) -> Self {
        SourceOpaque {
            cell: Rc::new(IdCell::new(Rc::new(value))),
            callable: true,
        }
    }

    /// Whether the wrapped value is callable.
    pub fn is_callable(&self) -> bool {
        self.callable
    }

    /// Downcast the wrapped value.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.cell.body.downcast_ref()
    }

    /// This value's identifier, assigned on first use.
    pub fn guid(&self) -> Guid {
        self.cell.guid()
    }

    pub(crate) fn bind(&self, id: Guid) {
        self.cell.bind(id);
    }
}

/// A raw value, classified once at the wrap boundary.
#[derive(Clone)]
pub enum Source {
    /// Absent value.
    Null,
    /// Boolean leaf.
    Bool(bool),
    /// Numeric leaf.
    Number(Number),
    /// String leaf.
    String(String),
    /// Plain object.
    Object(SourceObject),
    /// Array.
    Array(SourceArray),
    /// Date, carried as epoch milliseconds.
    Date(SourceDate),
    /// Regular expression, carried as its string form.
    Regex(SourceRegex),
    /// Callable or arbitrary host value; needs `to_plain` to wrap.
    Opaque(SourceOpaque),
    /// An already-wrapped value, reused as-is.
    Immutable(Immutable),
}

impl Source {
    /// Create a date source from epoch milliseconds.
    pub fn date(epoch_millis: i64) -> Source {
        Source::Date(SourceDate::new(epoch_millis))
    }

    /// Create a regex source from its string form.
    pub fn regex(pattern: impl Into<String>) -> Source {
        Source::Regex(SourceRegex::new(pattern))
    }

    /// Check if this is a primitive leaf (no identity).
    pub fn is_primitive(&self) -> bool {
        matches!(
            self,
            Source::Null | Source::Bool(_) | Source::Number(_) | Source::String(_)
        )
    }

    /// Check if this is a plain object.
    pub fn is_object(&self) -> bool {
        matches!(self, Source::Object(_))
    }

    /// Check if this is an array.
    pub fn is_array(&self) -> bool {
        matches!(self, Source::Array(_))
    }

    /// The identifier of this value, assigned on first use.
    /// Primitives have none.
    pub fn guid(&self) -> Option<Guid> {
        match self {
            Source::Null | Source::Bool(_) | Source::Number(_) | Source::String(_) => None,
            Source::Object(o) => Some(o.guid()),
            Source::Array(a) => Some(a.guid()),
            Source::Date(d) => Some(d.guid()),
            Source::Regex(r) => Some(r.guid()),
            Source::Opaque(o) => Some(o.guid()),
            Source::Immutable(n) => n.guid().cloned(),
        }
    }

    /// Bind an identifier to this value. No-op for primitives and
    /// already-wrapped values (their identifier is frozen).
    pub fn bind_guid(&self, id: Guid) {
        match self {
            Source::Object(o) => o.bind(id),
            Source::Array(a) => a.bind(id),
            Source::Date(d) => d.bind(id),
            Source::Regex(r) => r.bind(id),
            Source::Opaque(o) => o.bind(id),
            _ => {}
        }
    }

    /// Human-readable type name, for error reporting.
    pub fn type_name(&self) -> &'static str {
        match self {
            Source::Null => "null",
            Source::Bool(_) => "boolean",
            Source::Number(_) => "number",
            Source::String(_) => "string",
            Source::Object(_) => "object",
            Source::Array(_) => "array",
            Source::Date(_) => "date",
            Source::Regex(_) => "regexp",
            Source::Opaque(o) => {
                if o.is_callable() {
                    "function"
                } else {
                    "opaque"
                }
            }
            Source::Immutable(_) => "immutable",
        }
    }
}

impl From<bool> for Source {
    fn from(v: bool) -> Self {
        Source::Bool(v)
    }
}

impl From<i64> for Source {
    fn from(v: i64) -> Self {
        Source::Number(Number::Int(v))
    }
}

impl From<i32> for Source {
    fn from(v: i32) -> Self {
        Source::Number(Number::Int(v as i64))
    }
}

impl From<u32> for Source {
    fn from(v: u32) -> Self {
        Source::Number(Number::Int(v as i64))
    }
}

impl From<f64> for Source {
    fn from(v: f64) -> Self {
        Source::Number(Number::Float(v))
    }
}

impl From<Number> for Source {
    fn from(v: Number) -> Self {
        Source::Number(v)
    }
}

impl From<&str> for Source {
    fn from(v: &str) -> Self {
        Source::String(v.to_owned())
    }
}

impl From<String> for Source {
    fn from(v: String) -> Self {
        Source::String(v)
    }
}

impl From<SourceObject> for Source {
    fn from(v: SourceObject) -> Self {
        Source::Object(v)
    }
}

impl From<SourceArray> for Source {
    fn from(v: SourceArray) -> Self {
        Source::Array(v)
    }
}

impl From<SourceDate> for Source {
    fn from(v: SourceDate) -> Self {
        Source::Date(v)
    }
}

impl From<SourceRegex> for Source {
    fn from(v: SourceRegex) -> Self {
        Source::Regex(v)
    }
}

impl From<SourceOpaque> for Source {
    fn from(v: SourceOpaque) -> Self {
        Source::Opaque(v)
    }
}

impl From<Immutable> for Source {
    fn from(v: Immutable) -> Self {
        match v {
            Immutable::Null => Source::Null,
            Immutable::Bool(b) => Source::Bool(b),
            Immutable::Number(n) => Source::Number(n),
            Immutable::String(s) => Source::String(s),
            node @ Immutable::Node(_) => Source::Immutable(node),
        }
    }
}

impl From<&Immutable> for Source {
    fn from(v: &Immutable) -> Self {
        v.clone().into()
    }
}

impl From<serde_json::Value> for Source {
    fn from(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Source::Null,
            serde_json::Value::Bool(b) => Source::Bool(b),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Source::Number(Number::Int(i))
                } else {
                    Source::Number(Number::Float(n.as_f64().unwrap_or(0.0)))
                }
            }
            serde_json::Value::String(s) => Source::String(s),
            serde_json::Value::Array(items) => {
                let array = SourceArray::new();
                for item in items {
                    array.push(Source::from(item));
                }
                Source::Array(array)
            }
            serde_json::Value::Object(map) => {
                let object = SourceObject::new();
                for (k, v) in map {
                    object.insert(k, Source::from(v));
                }
                Source::Object(object)
            }
        }
    }
}

impl TryFrom<&Source> for PathInput {
    type Error = Error;

    /// Interpret a dynamic value as a path argument.
    ///
    /// Strings parse as path expressions, arrays of strings/numbers as
    /// ordered key sequences, `Null` as "no path". Anything else is an
    /// [`Error::InvalidPathType`].
    fn try_from(value: &Source) -> Result<Self, Error> {
        match value {
            Source::Null => Ok(PathInput::None),
            Source::String(s) => Ok(PathInput::Text(s.clone())),
            Source::Array(items) => {
                let mut path = Path::new();
                for item in items.snapshot() {
                    match item {
                        Source::String(s) => path.push(s),
                        Source::Number(Number::Int(i)) if i >= 0 => path.push(i as usize),
                        other => return Err(Error::invalid_path_type(other.type_name())),
                    }
                }
                Ok(PathInput::Keys(path))
            }
            other => Err(Error::invalid_path_type(other.type_name())),
        }
    }
}

/// Look up (or lazily assign) the identifier of a raw value.
/// Returns `None` for primitives.
pub fn guid_of(value: &Source) -> Option<Guid> {
    value.guid()
}

/// Bind a custom identifier to a raw value and hand it back unchanged,
/// so the call can be used inline. No-op for primitives.
pub fn bind_guid<'a>(value: &'a Source, id: impl Into<Guid>) -> &'a Source {
    value.bind_guid(id.into());
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_number_mixed_equality() {
        assert_eq!(Number::Int(1), Number::Float(1.0));
        assert_eq!(Number::Float(2.5), Number::Float(2.5));
        assert_ne!(Number::Int(1), Number::Int(2));
    }

    #[test]
    fn test_guid_is_lazy_and_stable() {
        let obj = SourceObject::new();
        let first = obj.guid();
        assert_eq!(first, obj.guid());

        // Clones of the handle share the identity cell.
        let alias = obj.clone();
        assert_eq!(first, alias.guid());
    }

    #[test]
    fn test_bind_guid_inline() {
        let value = Source::from(SourceArray::new());
        let bound = bind_guid(&value, "custom");
        assert_eq!(bound.guid(), Some(Guid::from("custom")));
    }

    #[test]
    fn test_primitives_have_no_guid() {
        assert_eq!(guid_of(&Source::Null), None);
        assert_eq!(guid_of(&Source::from(1i64)), None);
        assert_eq!(guid_of(&Source::from("x")), None);
    }

    #[test]
    fn test_from_json() {
        let source = Source::from(json!({"a": 1, "b": [true, "x"]}));
        let Source::Object(obj) = source else {
            panic!("expected object");
        };
        assert_eq!(obj.len(), 2);
        let Some(Source::Array(items)) = obj.get("b") else {
            panic!("expected array");
        };
        assert_eq!(items.len(), 2);
    }

    #[test]
    fn test_dynamic_path_conversion() {
        let ok = PathInput::try_from(&Source::from("a.b")).unwrap();
        assert!(matches!(ok, PathInput::Text(_)));

        let arr = SourceArray::new().with("a").with(0i64);
        let ok = PathInput::try_from(&Source::Array(arr)).unwrap();
        assert!(matches!(ok, PathInput::Keys(p) if p.len() == 2));

        let err = PathInput::try_from(&Source::from(true)).unwrap_err();
        assert!(matches!(err, Error::InvalidPathType { got: "boolean" }));
    }
}
