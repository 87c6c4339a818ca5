//! Full page identifier type.

use std::fmt;

/// Identifies a full page (a fixed-size block of the memory pool).
///
/// Using `usize` because:
/// 1. Full pages are stored in `Vec<FullPage>`
/// 2. Direct indexing without casting: `full_pages[id.0]`
/// 3. Mini-pages refer to their parent by id, never by pointer
///
/// # Example
/// ```
/// use slabpool::FullPageId;
///
/// let id = FullPageId::new(5);
/// assert_eq!(id.0, 5);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FullPageId(pub usize);

impl FullPageId {
    /// Create a new FullPageId.
    #[inline]
    pub fn new(id: usize) -> Self {
        FullPageId(id)
    }
}

impl fmt::Display for FullPageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FullPage({})", self.0)
    }
}
