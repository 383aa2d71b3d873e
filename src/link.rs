use std::fmt::{Debug, Display, Formatter};
use std::ops::Not;

use crate::types::EntryId;

/// Reference to a cell output: producer index, output port, inversion flag.
///
/// A link does not own its producer; it is a position in the entry array
/// of the subnet (or builder) it belongs to.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Link {
    idx: EntryId,
    out: u8,
    inv: bool,
}

// Constructors
impl Link {
    /// Non-inverted link to the first output of `idx`.
    pub const fn new(idx: EntryId) -> Self {
        Self {
            idx,
            out: 0,
            inv: false,
        }
    }

    pub const fn with_port(idx: EntryId, out: u8, inv: bool) -> Self {
        Self { idx, out, inv }
    }

    /// Same port and polarity, different producer.
    pub const fn with_idx(self, idx: EntryId) -> Self {
        Self { idx, ..self }
    }

    /// Toggles the inversion flag if `inv` is set.
    pub const fn xor_inv(self, inv: bool) -> Self {
        Self {
            inv: self.inv ^ inv,
            ..self
        }
    }
}

// Getters
impl Link {
    pub const fn idx(&self) -> EntryId {
        self.idx
    }

    pub const fn out(&self) -> u8 {
        self.out
    }

    pub const fn inv(&self) -> bool {
        self.inv
    }

    /// The same link with the inversion flag cleared.
    pub const fn regular(&self) -> Self {
        Self {
            inv: false,
            ..*self
        }
    }
}

impl Not for Link {
    type Output = Self;

    fn not(self) -> Self::Output {
        self.xor_inv(true)
    }
}

impl Not for &Link {
    type Output = Link;

    fn not(self) -> Self::Output {
        self.xor_inv(true)
    }
}

impl Display for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        if self.inv {
            write!(f, "!")?;
        }
        write!(f, "{}", self.idx)?;
        if self.out != 0 {
            write!(f, ".{}", self.out)?;
        }
        Ok(())
    }
}

impl Debug for Link {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}
