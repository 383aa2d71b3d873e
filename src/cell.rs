use crate::celltype::{CellSymbol, CellTypeId};
use crate::link::Link;
use crate::types::EntryId;

/// Links stored inside the cell itself.
pub const IN_PLACE_LINKS: usize = 5;
/// Links stored in one overflow entry.
pub const IN_ENTRY_LINKS: usize = 8;
pub const MAX_REF_COUNT: u32 = (1 << 20) - 1;
pub const MAX_ARITY: usize = 255;

/// Number of overflow entries following a cell of the given arity.
pub const fn overflow_entries(arity: usize) -> usize {
    if arity <= IN_PLACE_LINKS {
        0
    } else {
        (arity - IN_PLACE_LINKS + IN_ENTRY_LINKS - 1) / IN_ENTRY_LINKS
    }
}

/// Location of link `j`: (entry offset from the cell, position in that entry).
pub(crate) const fn link_position(j: usize) -> (usize, usize) {
    if j < IN_PLACE_LINKS {
        (0, j)
    } else {
        let k = j - IN_PLACE_LINKS;
        (1 + k / IN_ENTRY_LINKS, k % IN_ENTRY_LINKS)
    }
}

/// One gate: type, inline fan-in links and a reference count.
///
/// Links beyond [`IN_PLACE_LINKS`] live in the `more` overflow entries that
/// immediately follow the cell in the entry array.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Cell {
    type_id: CellTypeId,
    symbol: CellSymbol,
    arity: u8,
    more: u8,
    refcount: u32,
    flip_flop: Option<u32>,
    links: [Link; IN_PLACE_LINKS],
}

impl Cell {
    /// Creates a cell; only the first [`IN_PLACE_LINKS`] links are stored
    /// inline, the rest go to [`overflow_blocks`].
    ///
    /// # Panics
    ///
    /// Panics if there are more than [`MAX_ARITY`] links.
    pub fn new(type_id: CellTypeId, symbol: CellSymbol, links: &[Link]) -> Self {
        assert!(
            links.len() <= MAX_ARITY,
            "Cell arity {} exceeds the maximum of {}",
            links.len(),
            MAX_ARITY
        );
        let mut inline = [Link::default(); IN_PLACE_LINKS];
        for (slot, &link) in inline.iter_mut().zip(links) {
            *slot = link;
        }
        Self {
            type_id,
            symbol,
            arity: links.len() as u8,
            more: overflow_entries(links.len()) as u8,
            refcount: 0,
            flip_flop: None,
            links: inline,
        }
    }

    pub fn type_id(&self) -> CellTypeId {
        self.type_id
    }
    pub fn symbol(&self) -> CellSymbol {
        self.symbol
    }
    pub fn arity(&self) -> usize {
        self.arity as usize
    }
    /// Number of overflow entries following this cell.
    pub fn more(&self) -> usize {
        self.more as usize
    }
    pub fn refcount(&self) -> u32 {
        self.refcount
    }
    pub fn flip_flop_id(&self) -> Option<u32> {
        self.flip_flop
    }

    pub fn is_in(&self) -> bool {
        self.symbol == CellSymbol::In
    }
    pub fn is_out(&self) -> bool {
        self.symbol == CellSymbol::Out
    }
    pub fn is_zero(&self) -> bool {
        self.symbol == CellSymbol::Zero
    }
    pub fn is_one(&self) -> bool {
        self.symbol == CellSymbol::One
    }
    pub fn is_buf(&self) -> bool {
        self.symbol == CellSymbol::Buf
    }
    pub fn is_flip_flop(&self) -> bool {
        self.flip_flop.is_some()
    }

    /// Inline links (at most [`IN_PLACE_LINKS`]).
    pub fn in_place_links(&self) -> &[Link] {
        &self.links[..self.arity().min(IN_PLACE_LINKS)]
    }

    /// # Panics
    ///
    /// Panics if `j` is not an inline link position of this cell.
    pub fn link(&self, j: usize) -> Link {
        assert!(
            j < self.arity().min(IN_PLACE_LINKS),
            "Link {} is not stored in place",
            j
        );
        self.links[j]
    }

    pub(crate) fn set_link(&mut self, j: usize, link: Link) {
        assert!(j < self.arity().min(IN_PLACE_LINKS));
        self.links[j] = link;
    }

    pub(crate) fn set_flip_flop(&mut self, id: Option<u32>) {
        self.flip_flop = id;
    }

    pub(crate) fn set_refcount(&mut self, refcount: u32) {
        assert!(refcount <= MAX_REF_COUNT, "Reference count overflow");
        self.refcount = refcount;
    }

    pub fn inc_ref_count(&mut self) {
        assert!(self.refcount < MAX_REF_COUNT, "Reference count overflow");
        self.refcount += 1;
    }

    pub fn dec_ref_count(&mut self) {
        assert!(self.refcount > 0, "Reference count underflow");
        self.refcount -= 1;
    }
}

/// Overflow link blocks for the links that do not fit in place.
pub fn overflow_blocks(links: &[Link]) -> Vec<[Link; IN_ENTRY_LINKS]> {
    if links.len() <= IN_PLACE_LINKS {
        return Vec::new();
    }
    links[IN_PLACE_LINKS..]
        .chunks(IN_ENTRY_LINKS)
        .map(|chunk| {
            let mut block = [Link::default(); IN_ENTRY_LINKS];
            block[..chunk.len()].copy_from_slice(chunk);
            block
        })
        .collect()
}

/// One slot of the entry array.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Entry {
    Cell(Cell),
    Links([Link; IN_ENTRY_LINKS]),
}

impl Entry {
    pub fn as_cell(&self) -> Option<&Cell> {
        match self {
            Entry::Cell(cell) => Some(cell),
            Entry::Links(_) => None,
        }
    }

    pub fn as_cell_mut(&mut self) -> Option<&mut Cell> {
        match self {
            Entry::Cell(cell) => Some(cell),
            Entry::Links(_) => None,
        }
    }

    pub fn is_cell(&self) -> bool {
        matches!(self, Entry::Cell(_))
    }
}

/// Entries of a cell: the cell followed by its overflow blocks.
pub(crate) fn cell_entries(cell: Cell, links: &[Link]) -> Vec<Entry> {
    let mut entries = vec![Entry::Cell(cell)];
    entries.extend(overflow_blocks(links).into_iter().map(Entry::Links));
    entries
}

pub(crate) fn cell_at(entries: &[Entry], id: EntryId) -> &Cell {
    match &entries[id.index()] {
        Entry::Cell(cell) => cell,
        Entry::Links(_) => panic!("Entry {} is an overflow link block", id),
    }
}

pub(crate) fn cell_at_mut(entries: &mut [Entry], id: EntryId) -> &mut Cell {
    match &mut entries[id.index()] {
        Entry::Cell(cell) => cell,
        Entry::Links(_) => panic!("Entry {} is an overflow link block", id),
    }
}

/// Link `j` of the cell at `id`, following overflow blocks.
pub(crate) fn link_at(entries: &[Entry], id: EntryId, j: usize) -> Link {
    let cell = cell_at(entries, id);
    assert!(j < cell.arity(), "Link {} is out of range for {}", j, id);
    match link_position(j) {
        (0, k) => cell.links[k],
        (block, k) => match &entries[id.index() + block] {
            Entry::Links(links) => links[k],
            Entry::Cell(_) => panic!("Entry {} is missing its overflow links", id),
        },
    }
}

pub(crate) fn set_link_at(entries: &mut [Entry], id: EntryId, j: usize, link: Link) {
    let arity = cell_at(entries, id).arity();
    assert!(j < arity, "Link {} is out of range for {}", j, id);
    match link_position(j) {
        (0, k) => cell_at_mut(entries, id).set_link(k, link),
        (block, k) => match &mut entries[id.index() + block] {
            Entry::Links(links) => links[k] = link,
            Entry::Cell(_) => panic!("Entry {} is missing its overflow links", id),
        },
    }
}

pub(crate) fn links_at(entries: &[Entry], id: EntryId) -> Vec<Link> {
    let cell = cell_at(entries, id);
    let mut links = cell.in_place_links().to_vec();
    for block in 1..=cell.more() {
        if let Entry::Links(overflow) = &entries[id.index() + block] {
            let rest = cell.arity() - links.len();
            links.extend_from_slice(&overflow[..rest.min(IN_ENTRY_LINKS)]);
        }
    }
    links
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;

    fn links(n: usize) -> Vec<Link> {
        (0..n).map(|i| Link::new(EntryId::new(i))).collect()
    }

    #[test]
    fn test_overflow_entries() {
        assert_eq!(overflow_entries(0), 0);
        assert_eq!(overflow_entries(5), 0);
        assert_eq!(overflow_entries(6), 1);
        assert_eq!(overflow_entries(13), 1);
        assert_eq!(overflow_entries(14), 2);
        assert_eq!(link_position(4), (0, 4));
        assert_eq!(link_position(5), (1, 0));
        assert_eq!(link_position(13), (2, 0));
    }

    #[test]
    fn test_wide_cell_links() {
        let ls = links(14);
        let cell = Cell::new(CellTypeId::AND, CellSymbol::And, &ls);
        assert_eq!(cell.arity(), 14);
        assert_eq!(cell.more(), 2);
        assert_eq!(cell.in_place_links().len(), IN_PLACE_LINKS);

        let mut entries = cell_entries(cell, &ls);
        assert_eq!(entries.len(), 3);
        let id = EntryId::new(0);
        assert_eq!(links_at(&entries, id), ls);
        assert_eq!(link_at(&entries, id, 13), ls[13]);

        let new = !Link::new(EntryId::new(99));
        set_link_at(&mut entries, id, 9, new);
        assert_eq!(link_at(&entries, id, 9), new);
        set_link_at(&mut entries, id, 1, new);
        assert_eq!(cell_at(&entries, id).link(1), new);
    }

    #[test]
    fn test_ref_count() {
        let mut cell = Cell::new(CellTypeId::BUF, CellSymbol::Buf, &links(1));
        cell.inc_ref_count();
        cell.inc_ref_count();
        assert_eq!(cell.refcount(), 2);
        cell.dec_ref_count();
        assert_eq!(cell.refcount(), 1);
    }

    #[test]
    #[should_panic(expected = "Reference count underflow")]
    fn test_ref_count_underflow() {
        let mut cell = Cell::new(CellTypeId::ZERO, CellSymbol::Zero, &[]);
        cell.dec_ref_count();
    }

    #[test]
    #[should_panic(expected = "Reference count overflow")]
    fn test_ref_count_overflow() {
        let mut cell = Cell::new(CellTypeId::ZERO, CellSymbol::Zero, &[]);
        cell.set_refcount(MAX_REF_COUNT);
        cell.inc_ref_count();
    }

    #[test]
    #[should_panic(expected = "exceeds the maximum")]
    fn test_arity_limit() {
        Cell::new(CellTypeId::OR, CellSymbol::Or, &links(MAX_ARITY + 1));
    }

    #[test]
    fn test_entry_variants() {
        let mut entry = Entry::Cell(Cell::new(CellTypeId::IN, CellSymbol::In, &[]));
        assert!(entry.is_cell());
        assert!(entry.as_cell().is_some_and(|c| c.is_in()));
        assert!(entry.as_cell_mut().is_some());
        let block = Entry::Links([Link::default(); IN_ENTRY_LINKS]);
        assert!(block.as_cell().is_none());
    }
}
