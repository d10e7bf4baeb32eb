use std::fmt::{Display, Formatter};
use std::ops::{Deref, DerefMut};

use itertools::Itertools;

/// A path through a (possibly nested) record type, as a sequence of child
/// indices from the root.
///
/// Offsets order lexicographically, which makes a sorted transformation
/// list correspond to one depth-first pass over the record tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset(Vec<usize>);

impl Offset {
    /// Constructs an offset from child indices.
    pub fn new(indices: impl Into<Vec<usize>>) -> Self {
        Self(indices.into())
    }

    /// Returns true if `self` is a (non-strict) prefix of `other`.
    pub fn is_prefix_of(&self, other: &Offset) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }
}

impl Deref for Offset {
    type Target = Vec<usize>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl DerefMut for Offset {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.0
    }
}

impl From<Vec<usize>> for Offset {
    fn from(indices: Vec<usize>) -> Self {
        Self(indices)
    }
}

impl FromIterator<usize> for Offset {
    fn from_iter<T: IntoIterator<Item = usize>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl Display for Offset {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}]", self.0.iter().format(", "))
    }
}
