//! Direct-mapped operation cache.

use std::cell::Cell;

use crate::table::TableHash;

#[derive(Debug, Clone)]
struct Line<K, V> {
    key: K,
    value: V,
}

/// Lossy memo table: a new entry evicts whatever shares its line.
#[derive(Debug)]
pub struct Cache<K, V> {
    lines: Vec<Option<Line<K, V>>>,
    bitmask: u64,
    hits: Cell<usize>,
    misses: Cell<usize>,
}

impl<K, V> Cache<K, V> {
    /// Create a cache of `2^bits` lines.
    pub fn new(bits: usize) -> Self {
        assert!(bits <= 31, "Bits should be in the range 0..=31");
        let size = 1usize << bits;
        Self {
            lines: std::iter::repeat_with(|| None).take(size).collect(),
            bitmask: (size - 1) as u64,
            hits: Cell::new(0),
            misses: Cell::new(0),
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.get()
    }
    pub fn misses(&self) -> usize {
        self.misses.get()
    }

    pub fn clear(&mut self) {
        self.lines.fill_with(|| None);
    }
}

impl<K: TableHash + Eq, V> Cache<K, V> {
    fn line(&self, key: &K) -> usize {
        (key.table_hash() & self.bitmask) as usize
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        match &self.lines[self.line(key)] {
            Some(line) if &line.key == key => {
                self.hits.set(self.hits.get() + 1);
                Some(&line.value)
            }
            _ => {
                self.misses.set(self.misses.get() + 1);
                None
            }
        }
    }

    pub fn insert(&mut self, key: K, value: V) {
        let index = self.line(&key);
        self.lines[index] = Some(Line { key, value });
    }
}
