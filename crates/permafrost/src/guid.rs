//! Global unique identifiers for wrappable values.
//!
//! Every complex value owns exactly one identifier, assigned lazily on
//! first registration and preserved across wrapping and cloning, so the
//! same logical entity can be recognized after copy-on-write. Primitives
//! never carry one.

use serde::{Serialize, Serializer};
use std::fmt;
use std::rc::Rc;

/// A global unique identifier: a 32-character hex token.
///
/// Cheap to clone; two handles compare equal when their tokens match.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Guid(Rc<str>);

impl Guid {
    /// Generate a fresh random identifier.
    pub(crate) fn random() -> Self {
        Guid(uuid::Uuid::new_v4().simple().to_string().into())
    }

    /// The identifier as a string slice.
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Guid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Guid({})", &self.0)
    }
}

impl From<&str> for Guid {
    fn from(s: &str) -> Self {
        Guid(s.into())
    }
}

impl From<String> for Guid {
    fn from(s: String) -> Self {
        Guid(s.into())
    }
}

impl PartialEq<str> for Guid {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl Serialize for Guid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}
