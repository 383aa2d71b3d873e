//! Immutable, topologically ordered circuit snapshot.

use std::fmt::{Display, Formatter};

use crate::cell::{cell_at, link_at, links_at, Cell, Entry};
use crate::link::Link;
use crate::types::EntryId;

/// Read access to cells and their links, shared by [`Subnet`] and
/// [`SubnetBuilder`][crate::builder::SubnetBuilder].
pub trait CellView {
    fn cell(&self, id: EntryId) -> &Cell;
    fn links(&self, id: EntryId) -> Vec<Link>;
}

/// A finalized circuit.
///
/// # Invariants
///
/// - Inputs occupy entries `[0, in_num)`, outputs the last `out_num` cells.
/// - Every link points to a strictly lower index.
/// - Reference counts equal the number of links to each cell.
///
/// Subnets are produced by [`SubnetBuilder::make`][crate::builder::SubnetBuilder::make]
/// and shared as `Rc<Subnet>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subnet {
    entries: Vec<Entry>,
    n_in: usize,
    n_out: usize,
}

impl Subnet {
    pub(crate) fn new(entries: Vec<Entry>, n_in: usize, n_out: usize) -> Self {
        Self {
            entries,
            n_in,
            n_out,
        }
    }

    /// Number of entries, overflow blocks included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }
    pub fn in_num(&self) -> usize {
        self.n_in
    }
    pub fn out_num(&self) -> usize {
        self.n_out
    }
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    /// Number of cells, overflow blocks excluded.
    pub fn cell_num(&self) -> usize {
        self.entries.iter().filter(|e| e.is_cell()).count()
    }

    pub fn cell(&self, id: EntryId) -> &Cell {
        cell_at(&self.entries, id)
    }

    pub fn link(&self, id: EntryId, j: usize) -> Link {
        link_at(&self.entries, id, j)
    }

    pub fn links(&self, id: EntryId) -> Vec<Link> {
        links_at(&self.entries, id)
    }

    /// Link to the `i`-th input.
    pub fn in_link(&self, i: usize) -> Link {
        assert!(i < self.n_in, "Input {} is out of range", i);
        Link::new(EntryId::new(i))
    }

    /// Index of the `i`-th output cell.
    pub fn out_idx(&self, i: usize) -> EntryId {
        assert!(i < self.n_out, "Output {} is out of range", i);
        EntryId::new(self.entries.len() - self.n_out + i)
    }

    /// The link driving the `i`-th output.
    pub fn out_link(&self, i: usize) -> Link {
        self.cell(self.out_idx(i)).link(0)
    }

    /// Cells in topological order with their indices.
    pub fn cells(&self) -> impl Iterator<Item = (EntryId, &Cell)> + '_ {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.as_cell().map(|c| (EntryId::new(i), c)))
    }

    /// Shortest and longest combinational path from an input (or a
    /// constant) to an output, in cells. Output cells are not counted.
    pub fn path_length(&self) -> (usize, usize) {
        let mut depth = vec![0usize; self.entries.len()];
        let mut min = usize::MAX;
        let mut max = 0;
        for (id, cell) in self.cells() {
            let d = self
                .links(id)
                .iter()
                .map(|l| depth[l.idx().index()] + 1)
                .max()
                .unwrap_or(0);
            if cell.is_out() {
                let d = d.saturating_sub(1);
                depth[id.index()] = d;
                min = min.min(d);
                max = max.max(d);
            } else {
                depth[id.index()] = d;
            }
        }
        if min == usize::MAX {
            (0, 0)
        } else {
            (min, max)
        }
    }

    /// Some input or output carries a flip-flop tag.
    pub fn is_sequential(&self) -> bool {
        self.cells().any(|(_, c)| c.is_flip_flop())
    }

    /// No cells besides inputs and outputs.
    pub fn is_trivial(&self) -> bool {
        self.cells().all(|(_, c)| c.is_in() || c.is_out())
    }

    /// Some cell has a registered (non-builtin) type.
    pub fn has_custom_cells(&self) -> bool {
        self.cells().any(|(_, c)| !c.type_id().is_builtin())
    }
}

impl CellView for Subnet {
    fn cell(&self, id: EntryId) -> &Cell {
        Subnet::cell(self, id)
    }

    fn links(&self, id: EntryId) -> Vec<Link> {
        Subnet::links(self, id)
    }
}

impl Display for Subnet {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        for (id, cell) in self.cells() {
            write!(f, "{} <- {}", id, cell.symbol())?;
            if !cell.type_id().is_builtin() {
                write!(f, "[{}]", cell.type_id().index())?;
            }
            let links = self.links(id);
            let links: Vec<String> = links.iter().map(|l| l.to_string()).collect();
            writeln!(f, "({})", links.join(", "))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::builder::SubnetBuilder;
    use crate::celltype::CellSymbol;

    fn and_or() -> Subnet {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(3);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let o = builder.add_cell(CellSymbol::Or, &[a, !x[2]]);
        builder.add_output(o);
        builder.add_output(x[2]);
        builder.make(false).as_ref().clone()
    }

    #[test]
    fn test_accessors() {
        let subnet = and_or();
        println!("{}", subnet);
        assert_eq!(subnet.in_num(), 3);
        assert_eq!(subnet.out_num(), 2);
        assert_eq!(subnet.size(), 7);
        assert_eq!(subnet.cell_num(), 7);
        assert_eq!(subnet.in_link(1), Link::new(EntryId::new(1)));
        assert_eq!(subnet.out_idx(0), EntryId::new(5));
        assert_eq!(subnet.out_link(1), Link::new(EntryId::new(2)));
        let or = subnet.out_link(0).idx();
        assert_eq!(subnet.cell(or).symbol(), CellSymbol::Or);
        assert_eq!(subnet.link(or, 1), !Link::new(EntryId::new(2)));
        assert!(!subnet.is_sequential());
        assert!(!subnet.is_trivial());
        assert!(!subnet.has_custom_cells());
    }

    #[test]
    fn test_topological_links() {
        let subnet = and_or();
        for (id, _) in subnet.cells() {
            for link in subnet.links(id) {
                assert!(link.idx() < id);
            }
        }
    }

    #[test]
    fn test_path_length() {
        let subnet = and_or();
        assert_eq!(subnet.path_length(), (0, 2));
    }

    #[test]
    fn test_display() {
        let subnet = and_or();
        let dump = subnet.to_string();
        assert!(dump.contains("#3 <- AND(#0, #1)"));
        assert!(dump.contains("#4 <- OR(#3, !#2)"));
    }

    #[test]
    fn test_trivial() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_input();
        builder.add_output(!x);
        let subnet = builder.make(false);
        assert!(subnet.is_trivial());
        assert_eq!(subnet.path_length(), (0, 0));
    }
}
