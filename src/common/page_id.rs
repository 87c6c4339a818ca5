//! Page identity types.
//!
//! A page is either named, identified by `(set, index)` and persisted in the
//! set's file, or anonymous, identified by a process-local counter and only
//! ever written to the scratch file.

use std::fmt;
use std::sync::Arc;

/// Identifies a named set: a `(database, set)` pair.
///
/// Cloning is cheap; the names are reference counted.
///
/// # Panics
/// [`SetId::new`] panics on a malformed identity (an empty name, or a name
/// that is not a plain file name component), since set names become paths
/// under the storage root.
///
/// # Example
/// ```
/// use slabpool::SetId;
///
/// let set = SetId::new("db", "employees");
/// assert_eq!(set.database(), "db");
/// assert_eq!(set.set(), "employees");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SetId {
    database: Arc<str>,
    set: Arc<str>,
}

impl SetId {
    /// Create a new SetId.
    pub fn new(database: &str, set: &str) -> Self {
        assert!(
            is_valid_name(database),
            "contract violation: malformed database name {:?}",
            database
        );
        assert!(
            is_valid_name(set),
            "contract violation: malformed set name {:?}",
            set
        );
        Self {
            database: Arc::from(database),
            set: Arc::from(set),
        }
    }

    /// Database name.
    #[inline]
    pub fn database(&self) -> &str {
        &self.database
    }

    /// Set name.
    #[inline]
    pub fn set(&self) -> &str {
        &self.set
    }
}

/// Whether `name` can be used as a database or set name.
pub fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

impl fmt::Display for SetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.database, self.set)
    }
}

/// The identity of a logical page.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PageKey {
    /// Page `index` of a persisted set.
    Named { set: SetId, index: u64 },
    /// Temporary page; the number comes from a monotonic counter.
    Anonymous(u64),
}

impl PageKey {
    /// Create a key for page `index` of `set`.
    #[inline]
    pub fn named(set: SetId, index: u64) -> Self {
        PageKey::Named { set, index }
    }

    #[inline]
    pub fn is_anonymous(&self) -> bool {
        matches!(self, PageKey::Anonymous(_))
    }

    /// The owning set, for named pages.
    #[inline]
    pub fn set(&self) -> Option<&SetId> {
        match self {
            PageKey::Named { set, .. } => Some(set),
            PageKey::Anonymous(_) => None,
        }
    }

    /// Page index within the set, or the anonymous page number.
    #[inline]
    pub fn number(&self) -> u64 {
        match self {
            PageKey::Named { index, .. } => *index,
            PageKey::Anonymous(n) => *n,
        }
    }
}

impl fmt::Display for PageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PageKey::Named { set, index } => write!(f, "Page({}#{})", set, index),
            PageKey::Anonymous(n) => write!(f, "Page(anon#{})", n),
        }
    }
}
