//! Type-safe index into the entry arena of a subnet or a builder.
//!
//! Links address their producers positionally, so an [`EntryId`] is only
//! meaningful within the snapshot (or builder generation) it was taken from.
use std::fmt;

/// Position of an entry in a subnet (or builder) entry array.
///
/// # Invariants
///
/// - The index fits into `u32` (the arena never exceeds `u32::MAX` slots).
/// - An id is valid only for the container that produced it.
#[derive(Debug, Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct EntryId(u32);

impl EntryId {
    /// Creates an id from an array position.
    ///
    /// # Panics
    ///
    /// Panics if `index` does not fit into the arena index range.
    pub fn new(index: usize) -> Self {
        assert!(index < u32::MAX as usize, "Entry index {} is out of range", index);
        EntryId(index as u32)
    }

    /// Returns the array position.
    pub const fn index(self) -> usize {
        self.0 as usize
    }

    /// Returns the raw `u32` value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns the id `offset` slots after this one.
    pub fn offset(self, offset: usize) -> Self {
        EntryId::new(self.index() + offset)
    }
}

impl fmt::Display for EntryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<usize> for EntryId {
    fn from(index: usize) -> Self {
        EntryId::new(index)
    }
}

impl From<EntryId> for usize {
    fn from(id: EntryId) -> Self {
        id.index()
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    #[test]
    fn test_entry_id() {
        let id = EntryId::new(42);
        assert_eq!(id.index(), 42);
        assert_eq!(id.get(), 42);
        assert_eq!(format!("{}", id), "#42");
        assert_eq!(id.offset(3), EntryId::new(45));
        assert_eq!(usize::from(id), 42);
        assert_eq!(EntryId::from(7usize), EntryId::new(7));
    }

    #[test]
    fn test_entry_id_ordering() {
        assert!(EntryId::new(1) < EntryId::new(2));
        assert_eq!(EntryId::default(), EntryId::new(0));
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_entry_id_out_of_range() {
        EntryId::new(u32::MAX as usize);
    }
}
