//! Growable unique table with chained buckets.

use std::ops::Index;

/// Szudzik pairing of two values.
pub(crate) fn pairing2(a: u64, b: u64) -> u64 {
    if a < b {
        b.wrapping_mul(b).wrapping_add(a)
    } else {
        a.wrapping_mul(a).wrapping_add(a).wrapping_add(b)
    }
}

pub(crate) fn pairing3(a: u64, b: u64, c: u64) -> u64 {
    pairing2(pairing2(a, b), c)
}

/// Hash used to pick buckets and cache lines.
pub trait TableHash {
    fn table_hash(&self) -> u64;
}

#[derive(Debug, Clone)]
struct Entry<T> {
    value: T,
    /// Next entry in the same bucket, `0` ends the chain, `usize::MAX`
    /// marks an unchained entry.
    next: usize,
}

/// Hash-consing table: `put` returns the index of an equal value, inserting
/// it first if needed. Index `0` is reserved as the chain terminator.
#[derive(Debug, Clone)]
pub struct Table<T> {
    data: Vec<Entry<T>>,
    buckets: Vec<usize>,
    bitmask: u64,
}

impl<T: Default> Table<T> {
    /// Create a table with `2^bits` buckets.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bits should be in the range 0..=31");
        let size = 1usize << bits;
        Self {
            data: vec![Entry {
                value: T::default(),
                next: 0,
            }],
            buckets: vec![0; size],
            bitmask: (size - 1) as u64,
        }
    }

    /// Stores a value without hash-consing. Used for terminals.
    pub(crate) fn add(&mut self, value: T) -> usize {
        self.data.push(Entry {
            value,
            next: usize::MAX,
        });
        self.data.len() - 1
    }
}

impl<T> Table<T> {
    /// Number of stored values.
    pub fn len(&self) -> usize {
        self.data.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_buckets(&self) -> usize {
        self.buckets.len()
    }

    pub fn value(&self, index: usize) -> &T {
        assert_ne!(index, 0, "Index is 0");
        &self.data[index].value
    }
}

impl<T: TableHash + Eq> Table<T> {
    fn bucket_index(&self, value: &T) -> usize {
        (value.table_hash() & self.bitmask) as usize
    }

    /// Returns the index of `value`, inserting it if it is new.
    pub fn put(&mut self, value: T) -> usize {
        let bucket = self.bucket_index(&value);
        let mut index = self.buckets[bucket];
        while index != 0 {
            if self.data[index].value == value {
                return index;
            }
            index = self.data[index].next;
        }
        self.data.push(Entry {
            value,
            next: self.buckets[bucket],
        });
        let index = self.data.len() - 1;
        self.buckets[bucket] = index;
        if self.len() > 2 * self.buckets.len() {
            self.grow();
        }
        index
    }

    /// Doubles the number of buckets and rehashes every chained entry.
    fn grow(&mut self) {
        let size = self.buckets.len() * 2;
        self.buckets = vec![0; size];
        self.bitmask = (size - 1) as u64;
        for index in 1..self.data.len() {
            // Entries added with `add` stay out of the chains.
            if self.data[index].next == usize::MAX {
                continue;
            }
            let bucket = self.bucket_index(&self.data[index].value);
            self.data[index].next = self.buckets[bucket];
            self.buckets[bucket] = index;
        }
    }
}

impl<T> Index<usize> for Table<T> {
    type Output = T;

    fn index(&self, index: usize) -> &Self::Output {
        self.value(index)
    }
}
