use std::fmt::{Display, Formatter};
use std::ops::Neg;

/// Complement-edge handle to a decision-diagram node.
///
/// The absolute value is the node index, the sign is the complement flag.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Ref(i32);

impl Ref {
    pub const fn positive(index: u32) -> Self {
        Self(index as i32)
    }

    pub const fn is_negated(self) -> bool {
        self.0 < 0
    }

    /// Node index, ignoring the complement flag.
    pub const fn index(self) -> usize {
        self.0.unsigned_abs() as usize
    }

    /// The handle without its complement flag.
    pub const fn regular(self) -> Self {
        Self(self.0.abs())
    }

    /// Dense non-negative key: `2 * index + negated`.
    pub(crate) const fn key(self) -> u64 {
        ((self.0.unsigned_abs() as u64) << 1) | (self.0 < 0) as u64
    }
}

impl Neg for Ref {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Self(-self.0)
    }
}

impl Display for Ref {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", if self.is_negated() { "~" } else { "" }, self.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ref() {
        let r = Ref::positive(5);
        assert!(!r.is_negated());
        assert!((-r).is_negated());
        assert_eq!((-r).index(), 5);
        assert_eq!((-r).regular(), r);
        assert_eq!(r.key(), 10);
        assert_eq!((-r).key(), 11);
        assert_eq!(format!("{}", -r), "~@5");
    }
}
