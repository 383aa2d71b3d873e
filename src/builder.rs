//! Mutable circuit under construction.
//!
//! Cells live in a dense entry array. A doubly linked list threaded through
//! the array keeps them in topological order, grouped by depth: every cell
//! is placed after all cells of lower depth, which keeps fan-ins in front of
//! their users no matter where in the array a cell was allocated. Outputs
//! always sit at the tail of the order, inputs at its head.
//!
//! Overflow link blocks are not part of the order: they occupy the slots
//! directly after their cell.

use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

use log::debug;

use crate::cell::{
    cell_at, cell_at_mut, cell_entries, link_at, links_at, overflow_entries, set_link_at, Cell,
    Entry, IN_ENTRY_LINKS, IN_PLACE_LINKS,
};
use crate::celltype::{CellSymbol, CellTypeId, CellTypeRegistry};
use crate::link::Link;
use crate::subnet::{CellView, Subnet};
use crate::types::EntryId;

/// Per-slot bookkeeping kept beside the entry array.
#[derive(Debug, Copy, Clone, Default)]
struct EntryDesc {
    prev: Option<EntryId>,
    next: Option<EntryId>,
    /// `None` for free slots and overflow blocks.
    depth: Option<u32>,
    weight: f32,
    session: u32,
    data: u64,
}

/// Structural hashing key: type and (canonically ordered) in-place links.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
pub(crate) struct StrashKey {
    type_id: CellTypeId,
    arity: u8,
    links: [Link; IN_PLACE_LINKS],
}

impl StrashKey {
    /// Key for a cell, or `None` if cells of this shape are never merged.
    pub(crate) fn new(type_id: CellTypeId, links: &[Link]) -> Option<Self> {
        let symbol = type_id.symbol();
        if matches!(symbol, CellSymbol::In | CellSymbol::Out) || links.len() > IN_PLACE_LINKS {
            return None;
        }
        let mut key_links = [Link::default(); IN_PLACE_LINKS];
        key_links[..links.len()].copy_from_slice(links);
        if symbol.is_commutative() {
            key_links[..links.len()].sort();
        }
        Some(Self {
            type_id,
            arity: links.len() as u8,
            links: key_links,
        })
    }
}

/// Replaces the producer of `link` with `target`, composing port and polarity.
///
/// `target` is the image of `link.idx()`; for a single-output producer
/// `link.out()` is zero, for a plain cell image `target.out()` is zero.
pub(crate) fn redirect(link: Link, target: Link) -> Link {
    Link::with_port(
        target.idx(),
        target.out() + link.out(),
        target.inv() ^ link.inv(),
    )
}

#[derive(Debug, Clone, Default)]
pub struct SubnetBuilder {
    entries: Vec<Entry>,
    desc: Vec<EntryDesc>,

    n_in: usize,
    n_out: usize,
    n_cell: usize,
    n_buf: usize,

    strash: HashMap<StrashKey, EntryId>,
    /// First and last entries of each depth level in the order.
    depth_bounds: Vec<Option<(EntryId, EntryId)>>,
    free: Vec<EntryId>,
    head: Option<EntryId>,
    tail: Option<EntryId>,

    fanouts: Option<Vec<Vec<EntryId>>>,

    session_id: u32,
    session_started: bool,
}

impl SubnetBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds a builder with the cells of `subnet`, keeping their indices
    /// and order. Structurally equal cells are not merged.
    ///
    /// Subnets produced by [`SubnetBuilder::make`] are sorted by depth, so
    /// every cell lands at the tail of the order.
    pub fn from_subnet(subnet: &Subnet) -> Self {
        let mut builder = Self::new();
        for (id, cell) in subnet.cells() {
            let links = subnet.links(id);
            let new = builder.add_entry(cell.type_id(), &links, cell.flip_flop_id(), false);
            debug_assert_eq!(new, id);
        }
        debug_assert!(
            builder.iter().eq(subnet.cells().map(|(id, _)| id)),
            "Subnet is not sorted by depth"
        );
        builder
    }
}

// Counters and accessors
impl SubnetBuilder {
    pub fn in_num(&self) -> usize {
        self.n_in
    }
    pub fn out_num(&self) -> usize {
        self.n_out
    }
    /// Number of live cells, inputs and outputs included.
    pub fn cell_num(&self) -> usize {
        self.n_cell
    }
    pub fn buf_num(&self) -> usize {
        self.n_buf
    }
    /// Upper bound (exclusive) of entry indices.
    pub fn max_idx(&self) -> usize {
        self.entries.len()
    }

    /// The slot holds a cell that is part of the circuit.
    pub fn is_live(&self, id: EntryId) -> bool {
        id.index() < self.entries.len() && self.desc[id.index()].depth.is_some()
    }

    pub fn cell(&self, id: EntryId) -> &Cell {
        assert!(self.is_live(id), "Entry {} is not a live cell", id);
        cell_at(&self.entries, id)
    }

    pub fn link(&self, id: EntryId, j: usize) -> Link {
        link_at(&self.entries, id, j)
    }

    pub fn links(&self, id: EntryId) -> Vec<Link> {
        links_at(&self.entries, id)
    }

    pub fn depth(&self, id: EntryId) -> u32 {
        match self.desc[id.index()].depth {
            Some(d) => d,
            None => panic!("Entry {} is not a live cell", id),
        }
    }

    /// Depth of the deepest cell (outputs excluded).
    pub fn max_depth(&self) -> u32 {
        self.depth_bounds
            .iter()
            .rposition(|b| b.is_some())
            .unwrap_or(0) as u32
    }

    pub fn next(&self, id: EntryId) -> Option<EntryId> {
        self.desc[id.index()].next
    }
    pub fn prev(&self, id: EntryId) -> Option<EntryId> {
        self.desc[id.index()].prev
    }

    /// Live cells in topological order.
    pub fn iter(&self) -> impl Iterator<Item = EntryId> + '_ {
        std::iter::successors(self.head, move |&id| self.desc[id.index()].next)
    }

    /// Live cells in reverse topological order.
    pub fn iter_rev(&self) -> impl Iterator<Item = EntryId> + '_ {
        std::iter::successors(self.tail, move |&id| self.desc[id.index()].prev)
    }

    /// The `i`-th input in order.
    pub fn input(&self, i: usize) -> EntryId {
        assert!(i < self.n_in, "Input {} is out of range", i);
        match self.iter().nth(i) {
            Some(id) if self.cell(id).is_in() => id,
            _ => panic!("Inputs are not at the head of the order"),
        }
    }

    /// The `i`-th output in order.
    pub fn output(&self, i: usize) -> EntryId {
        assert!(i < self.n_out, "Output {} is out of range", i);
        match self.iter_rev().nth(self.n_out - 1 - i) {
            Some(id) if self.cell(id).is_out() => id,
            _ => panic!("Outputs are not at the tail of the order"),
        }
    }
}

impl CellView for SubnetBuilder {
    fn cell(&self, id: EntryId) -> &Cell {
        SubnetBuilder::cell(self, id)
    }

    fn links(&self, id: EntryId) -> Vec<Link> {
        SubnetBuilder::links(self, id)
    }
}

// Weights, payloads and sessions
impl SubnetBuilder {
    pub fn weight(&self, id: EntryId) -> f32 {
        self.desc[id.index()].weight
    }
    pub fn set_weight(&mut self, id: EntryId, weight: f32) {
        self.desc[id.index()].weight = weight;
    }

    pub fn data(&self, id: EntryId) -> u64 {
        self.desc[id.index()].data
    }
    pub fn set_data(&mut self, id: EntryId, data: u64) {
        self.desc[id.index()].data = data;
    }

    /// Opens a traversal; only one can be in flight per builder.
    ///
    /// # Panics
    ///
    /// Panics if a session is already started.
    pub fn start_session(&mut self) -> u32 {
        assert!(!self.session_started, "Session is already started");
        self.session_started = true;
        self.session_id += 1;
        self.session_id
    }

    pub fn end_session(&mut self) {
        assert!(self.session_started, "No session is started");
        self.session_started = false;
    }

    pub fn mark(&mut self, id: EntryId) {
        assert!(self.session_started, "No session is started");
        self.desc[id.index()].session = self.session_id;
    }

    pub fn is_marked(&self, id: EntryId) -> bool {
        self.session_id != 0 && self.desc[id.index()].session == self.session_id
    }

    pub(crate) fn reset_session(&mut self, id: EntryId) {
        self.desc[id.index()].session = 0;
    }
}

// Fanouts
impl SubnetBuilder {
    pub fn enable_fanouts(&mut self) {
        let mut fanouts = vec![Vec::new(); self.entries.len()];
        for id in self.iter() {
            for link in self.links(id) {
                fanouts[link.idx().index()].push(id);
            }
        }
        self.fanouts = Some(fanouts);
    }

    pub fn disable_fanouts(&mut self) {
        self.fanouts = None;
    }

    pub fn has_fanouts(&self) -> bool {
        self.fanouts.is_some()
    }

    /// Users of `id`, one entry per link.
    ///
    /// # Panics
    ///
    /// Panics if fanout tracking is disabled.
    pub fn fanouts(&self, id: EntryId) -> &[EntryId] {
        match &self.fanouts {
            Some(fanouts) => &fanouts[id.index()],
            None => panic!("Fanouts are not enabled"),
        }
    }

    fn add_fanout(&mut self, source: EntryId, user: EntryId) {
        if let Some(fanouts) = &mut self.fanouts {
            fanouts[source.index()].push(user);
        }
    }

    fn del_fanout(&mut self, source: EntryId, user: EntryId) {
        if let Some(fanouts) = &mut self.fanouts {
            let list = &mut fanouts[source.index()];
            if let Some(pos) = list.iter().position(|&u| u == user) {
                list.swap_remove(pos);
            }
        }
    }
}

// Reference counting and structural hashing
impl SubnetBuilder {
    pub(crate) fn inc_ref(&mut self, source: EntryId, user: EntryId) {
        cell_at_mut(&mut self.entries, source).inc_ref_count();
        self.add_fanout(source, user);
    }

    /// Returns `true` if the reference count dropped to zero.
    pub(crate) fn dec_ref(&mut self, source: EntryId, user: EntryId) -> bool {
        let cell = cell_at_mut(&mut self.entries, source);
        cell.dec_ref_count();
        let zero = cell.refcount() == 0;
        self.del_fanout(source, user);
        zero
    }

    pub(crate) fn strash_key(&self, id: EntryId) -> Option<StrashKey> {
        let cell = self.cell(id);
        StrashKey::new(cell.type_id(), cell.in_place_links().get(..cell.arity())?)
    }

    pub(crate) fn strash_lookup(&self, type_id: CellTypeId, links: &[Link]) -> Option<EntryId> {
        let key = StrashKey::new(type_id, links)?;
        self.strash.get(&key).copied()
    }

    /// Removes `id` from the strash map if it is the registered representative.
    pub(crate) fn destrash(&mut self, id: EntryId) {
        if let Some(key) = self.strash_key(id) {
            if self.strash.get(&key) == Some(&id) {
                self.strash.remove(&key);
            }
        }
    }

    /// Registers `id` unless an equal cell is already registered.
    pub(crate) fn restrash(&mut self, id: EntryId) {
        if let Some(key) = self.strash_key(id) {
            self.strash.entry(key).or_insert(id);
        }
    }

    pub(crate) fn set_link(&mut self, id: EntryId, j: usize, link: Link) {
        set_link_at(&mut self.entries, id, j, link);
    }

    /// Overwrites the type and in-place links of a cell, keeping its
    /// reference count and flip-flop tag.
    pub(crate) fn rewrite_cell(&mut self, id: EntryId, type_id: CellTypeId, links: &[Link]) {
        assert!(links.len() <= IN_PLACE_LINKS);
        let old = *self.cell(id);
        let mut cell = Cell::new(type_id, type_id.symbol(), links);
        cell.set_refcount(old.refcount());
        cell.set_flip_flop(old.flip_flop_id());
        if old.is_buf() {
            self.n_buf -= 1;
        }
        if cell.is_buf() {
            self.n_buf += 1;
        }
        self.entries[id.index()] = Entry::Cell(cell);
    }
}

// Order and depth bounds
impl SubnetBuilder {
    fn link_after(&mut self, id: EntryId, after: Option<EntryId>) {
        let next = match after {
            Some(a) => self.desc[a.index()].next,
            None => self.head,
        };
        self.desc[id.index()].prev = after;
        self.desc[id.index()].next = next;
        match after {
            Some(a) => self.desc[a.index()].next = Some(id),
            None => self.head = Some(id),
        }
        match next {
            Some(n) => self.desc[n.index()].prev = Some(id),
            None => self.tail = Some(id),
        }
    }

    fn unlink(&mut self, id: EntryId) {
        let EntryDesc { prev, next, .. } = self.desc[id.index()];
        match prev {
            Some(p) => self.desc[p.index()].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.desc[n.index()].prev = prev,
            None => self.tail = prev,
        }
        self.desc[id.index()].prev = None;
        self.desc[id.index()].next = None;
    }

    /// Places a cell in the order according to its depth.
    pub(crate) fn add_depth_bounds(&mut self, id: EntryId) {
        let cell = *cell_at(&self.entries, id);
        if cell.is_out() {
            self.link_after(id, self.tail);
            return;
        }
        let d = self.depth(id) as usize;
        if self.depth_bounds.len() <= d {
            self.depth_bounds.resize(d + 1, None);
        }
        match self.depth_bounds[d] {
            None => {
                let after = self.depth_bounds[..d]
                    .iter()
                    .rev()
                    .find_map(|b| b.map(|(_, last)| last));
                self.link_after(id, after);
                self.depth_bounds[d] = Some((id, id));
            }
            Some((first, last)) if cell.is_in() => {
                // Inputs go in front of the other cells of level zero.
                let mut cursor = Some(last);
                while let Some(c) = cursor {
                    if cell_at(&self.entries, c).is_in() {
                        break;
                    }
                    cursor = if c == first { None } else { self.prev(c) };
                }
                match cursor {
                    Some(c) => {
                        self.link_after(id, Some(c));
                        if c == last {
                            self.depth_bounds[d] = Some((first, id));
                        }
                    }
                    None => {
                        let before_first = self.prev(first);
                        self.link_after(id, before_first);
                        self.depth_bounds[d] = Some((id, last));
                    }
                }
            }
            Some((first, last)) => {
                self.link_after(id, Some(last));
                self.depth_bounds[d] = Some((first, id));
            }
        }
    }

    /// Removes a cell from the order.
    pub(crate) fn delete_depth_bounds(&mut self, id: EntryId) {
        let cell = *cell_at(&self.entries, id);
        if !cell.is_out() {
            let d = self.depth(id) as usize;
            self.depth_bounds[d] = match self.depth_bounds[d] {
                Some((first, last)) if first == id && last == id => None,
                Some((first, last)) if first == id => self.next(id).map(|n| (n, last)),
                Some((first, last)) if last == id => self.prev(id).map(|p| (first, p)),
                bounds => bounds,
            };
        }
        self.unlink(id);
    }

    pub(crate) fn set_depth(&mut self, id: EntryId, depth: u32) {
        self.desc[id.index()].depth = Some(depth);
    }

    /// Depth a cell with the given links would have.
    pub(crate) fn links_depth(&self, links: &[Link]) -> u32 {
        links
            .iter()
            .map(|l| self.depth(l.idx()) + 1)
            .max()
            .unwrap_or(0)
    }

    /// Recomputes depths of the cells from `start` to the end of the order,
    /// moving every cell whose depth changed.
    pub(crate) fn recompute_depths_from(&mut self, start: Option<EntryId>) {
        let suffix: Vec<EntryId> = std::iter::successors(start, |&id| self.next(id)).collect();
        for id in suffix {
            if !self.is_live(id) {
                continue;
            }
            let links = self.links(id);
            let depth = self.links_depth(&links);
            if depth == self.depth(id) {
                continue;
            }
            if self.cell(id).is_out() {
                self.set_depth(id, depth);
            } else {
                self.delete_depth_bounds(id);
                self.set_depth(id, depth);
                self.add_depth_bounds(id);
            }
        }
    }
}

// Allocation and deletion
impl SubnetBuilder {
    fn alloc(&mut self, slots: usize) -> EntryId {
        if slots == 1 {
            if let Some(id) = self.free.pop() {
                return id;
            }
        }
        let id = EntryId::new(self.entries.len());
        for _ in 0..slots {
            self.entries.push(Entry::Links([Link::default(); IN_ENTRY_LINKS]));
            self.desc.push(EntryDesc::default());
        }
        if let Some(fanouts) = &mut self.fanouts {
            fanouts.resize(self.entries.len(), Vec::new());
        }
        id
    }

    /// Checks arity and link targets of a prospective cell.
    pub(crate) fn check_cell(&self, type_id: CellTypeId, links: &[Link]) {
        let symbol = type_id.symbol();
        if let Some(n) = symbol.fixed_arity() {
            assert_eq!(links.len(), n, "{} cell expects {} links", symbol, n);
        }
        if symbol == CellSymbol::Maj {
            assert!(
                links.len() >= 3 && links.len() % 2 == 1,
                "MAJ cell expects an odd number of links (at least 3)"
            );
        }
        if matches!(symbol, CellSymbol::And | CellSymbol::Or | CellSymbol::Xor) {
            assert!(!links.is_empty(), "{} cell expects at least one link", symbol);
        }
        for link in links {
            assert!(
                self.is_live(link.idx()),
                "Link {} refers to a missing entry",
                link
            );
            assert!(
                !cell_at(&self.entries, link.idx()).is_out(),
                "Link {} refers to an output cell",
                link
            );
        }
    }

    /// Appends a cell; with `lookup`, an existing structurally equal cell
    /// is returned instead.
    pub(crate) fn add_entry(
        &mut self,
        type_id: CellTypeId,
        links: &[Link],
        flip_flop: Option<u32>,
        lookup: bool,
    ) -> EntryId {
        self.check_cell(type_id, links);
        let symbol = type_id.symbol();

        let key = StrashKey::new(type_id, links);
        if lookup {
            if let Some(existing) = key.and_then(|k| self.strash.get(&k).copied()) {
                debug!("strash hit: {}{:?} -> {}", symbol, links, existing);
                return existing;
            }
        }

        let mut cell = Cell::new(type_id, symbol, links);
        cell.set_flip_flop(flip_flop);
        let id = self.alloc(1 + overflow_entries(links.len()));
        for (k, entry) in cell_entries(cell, links).into_iter().enumerate() {
            self.entries[id.index() + k] = entry;
        }
        let depth = self.links_depth(links);
        self.desc[id.index()] = EntryDesc {
            depth: Some(depth),
            ..EntryDesc::default()
        };

        for link in links {
            self.inc_ref(link.idx(), id);
        }

        self.n_cell += 1;
        match symbol {
            CellSymbol::In => self.n_in += 1,
            CellSymbol::Out => self.n_out += 1,
            CellSymbol::Buf => self.n_buf += 1,
            _ => {}
        }

        if let Some(key) = key {
            self.strash.entry(key).or_insert(id);
        }
        self.add_depth_bounds(id);
        id
    }

    /// Deletes a cell and, transitively, every fan-in cell left without users.
    /// Inputs are never deleted.
    pub(crate) fn delete_cell(&mut self, id: EntryId) {
        let mut queue = VecDeque::from([id]);
        while let Some(id) = queue.pop_front() {
            if !self.is_live(id) {
                continue;
            }
            let cell = *self.cell(id);
            if cell.is_in() || cell.refcount() > 0 {
                continue;
            }
            debug!("delete {} ({})", id, cell.symbol());

            self.destrash(id);
            for link in self.links(id) {
                if self.dec_ref(link.idx(), id) {
                    queue.push_back(link.idx());
                }
            }

            self.n_cell -= 1;
            match cell.symbol() {
                CellSymbol::Out => self.n_out -= 1,
                CellSymbol::Buf => self.n_buf -= 1,
                _ => {}
            }

            self.delete_depth_bounds(id);
            for k in (0..=cell.more()).rev() {
                let slot = id.offset(k);
                self.desc[slot.index()] = EntryDesc::default();
                if let Some(fanouts) = &mut self.fanouts {
                    fanouts[slot.index()].clear();
                }
                self.free.push(slot);
            }
        }
    }
}

// Appending
impl SubnetBuilder {
    pub fn add_input(&mut self) -> Link {
        Link::new(self.add_entry(CellTypeId::IN, &[], None, false))
    }

    pub fn add_inputs(&mut self, n: usize) -> Vec<Link> {
        (0..n).map(|_| self.add_input()).collect()
    }

    /// Input paired with the flip-flop output of the same tag.
    pub fn add_flip_flop_input(&mut self, flip_flop: u32) -> Link {
        Link::new(self.add_entry(CellTypeId::IN, &[], Some(flip_flop), false))
    }

    pub fn add_output(&mut self, link: Link) -> Link {
        Link::new(self.add_entry(CellTypeId::OUT, &[link], None, false))
    }

    pub fn add_outputs(&mut self, links: &[Link]) -> Vec<Link> {
        links.iter().map(|&l| self.add_output(l)).collect()
    }

    pub fn add_flip_flop_output(&mut self, link: Link, flip_flop: u32) -> Link {
        Link::new(self.add_entry(CellTypeId::OUT, &[link], Some(flip_flop), false))
    }

    /// Adds a builtin cell. May return an existing structurally equal cell.
    pub fn add_cell(&mut self, symbol: CellSymbol, links: &[Link]) -> Link {
        Link::new(self.add_entry(CellTypeId::of(symbol), links, None, true))
    }

    /// Adds a cell of a registered type and returns a link to its first output.
    pub fn add_typed_cell(
        &mut self,
        registry: &CellTypeRegistry,
        type_id: CellTypeId,
        links: &[Link],
    ) -> Link {
        let cell_type = registry.get(type_id);
        if let Some(n) = cell_type.in_num() {
            assert_eq!(
                links.len(),
                n as usize,
                "{} cell expects {} links",
                cell_type.name(),
                n
            );
        }
        Link::new(self.add_entry(type_id, links, None, true))
    }

    /// Adds a cell of a registered type and returns links to all its outputs.
    pub fn add_multi_output_cell(
        &mut self,
        registry: &CellTypeRegistry,
        type_id: CellTypeId,
        links: &[Link],
    ) -> Vec<Link> {
        let out_num = registry.get(type_id).out_num();
        let first = self.add_typed_cell(registry, type_id, links);
        (0..out_num)
            .map(|j| Link::with_port(first.idx(), j as u8, false))
            .collect()
    }

    /// Builds a balanced tree of `symbol` cells with at most `k` links each.
    ///
    /// # Panics
    ///
    /// Panics if `symbol` is not regroupable or `k < 2`.
    pub fn add_cell_tree(&mut self, symbol: CellSymbol, links: &[Link], k: usize) -> Link {
        assert!(symbol.is_regroupable(), "{} cannot be regrouped", symbol);
        assert!(k >= 2, "Tree arity should be at least 2");
        assert!(!links.is_empty(), "Cell tree needs at least one link");
        if links.len() <= k {
            return self.add_cell(symbol, links);
        }
        let mut queue = links.to_vec();
        let mut i = 0;
        while i + 1 < queue.len() {
            let n = (queue.len() - i).min(k);
            let args = queue[i..i + n].to_vec();
            let link = self.add_cell(symbol, &args);
            queue.push(link);
            i += n;
        }
        queue[queue.len() - 1]
    }

    /// Instantiates the logic of `subnet` with its inputs bound to `links`.
    /// Returns the links driving its outputs; no output cells are added.
    pub fn add_subnet(&mut self, subnet: &Subnet, links: &[Link]) -> Vec<Link> {
        self.add_subnet_impl(subnet, links, None)
    }

    /// Like [`add_subnet`][Self::add_subnet], assigning weights to the
    /// instantiated cells by their index in `subnet`.
    pub fn add_subnet_weighted(
        &mut self,
        subnet: &Subnet,
        links: &[Link],
        weight: &dyn Fn(EntryId) -> f32,
    ) -> Vec<Link> {
        self.add_subnet_impl(subnet, links, Some(weight))
    }

    pub fn add_single_output_subnet(&mut self, subnet: &Subnet, links: &[Link]) -> Link {
        assert_eq!(subnet.out_num(), 1, "Subnet should have a single output");
        self.add_subnet(subnet, links)[0]
    }

    /// Rebuilds `subnet` with every library cell replaced by the logic of
    /// its implementation, recursively. Inputs and outputs keep their order
    /// and flip-flop tags.
    ///
    /// Returns `None` if a library cell has no implementation.
    pub fn flatten(subnet: &Subnet, registry: &CellTypeRegistry) -> Option<Rc<Subnet>> {
        let mut builder = Self::new();
        let mut image: Vec<Vec<Link>> = vec![Vec::new(); subnet.size()];
        let source =
            |image: &[Vec<Link>], l: Link| image[l.idx().index()][l.out() as usize].xor_inv(l.inv());
        for (id, cell) in subnet.cells() {
            let links: Vec<Link> = subnet.links(id).iter().map(|&l| source(&image, l)).collect();
            image[id.index()] = match (cell.symbol(), cell.flip_flop_id()) {
                (CellSymbol::In, Some(ff)) => vec![builder.add_flip_flop_input(ff)],
                (CellSymbol::In, None) => vec![builder.add_input()],
                (CellSymbol::Out, Some(ff)) => vec![builder.add_flip_flop_output(links[0], ff)],
                (CellSymbol::Out, None) => vec![builder.add_output(links[0])],
                _ if cell.type_id().is_builtin() => {
                    vec![Link::new(builder.add_entry(cell.type_id(), &links, None, true))]
                }
                _ => {
                    let cell_type = registry.get(cell.type_id());
                    let Some(implementation) = cell_type.implementation() else {
                        debug!("flatten: {} has no implementation", cell_type.name());
                        return None;
                    };
                    if implementation.has_custom_cells() {
                        let inner = Self::flatten(implementation, registry)?;
                        builder.add_subnet(&inner, &links)
                    } else {
                        builder.add_subnet(implementation, &links)
                    }
                }
            };
        }
        Some(builder.make(false))
    }

    fn add_subnet_impl(
        &mut self,
        subnet: &Subnet,
        links: &[Link],
        weight: Option<&dyn Fn(EntryId) -> f32>,
    ) -> Vec<Link> {
        assert_eq!(
            links.len(),
            subnet.in_num(),
            "Subnet has {} inputs, {} links given",
            subnet.in_num(),
            links.len()
        );
        let mut map = vec![Link::default(); subnet.size()];
        map[..links.len()].copy_from_slice(links);
        let mut outputs = Vec::with_capacity(subnet.out_num());
        for (id, cell) in subnet.cells() {
            if cell.is_in() {
                continue;
            }
            let mapped: Vec<Link> = subnet
                .links(id)
                .iter()
                .map(|&l| redirect(l, map[l.idx().index()]))
                .collect();
            if cell.is_out() {
                outputs.push(mapped[0]);
                continue;
            }
            let new = self.add_entry(cell.type_id(), &mapped, None, true);
            if let Some(weight) = weight {
                self.set_weight(new, weight(id));
            }
            map[id.index()] = Link::new(new);
        }
        outputs
    }
}

// Finalizing
impl SubnetBuilder {
    /// Compacts the builder into an immutable subnet.
    ///
    /// With `delete_bufs`, buffers are bypassed and dropped. Cells are
    /// emitted grouped by their depth after elision, so finalizing a builder
    /// seeded from the result gives the same subnet.
    ///
    /// # Panics
    ///
    /// Panics if the builder has no outputs.
    pub fn make(&self, delete_bufs: bool) -> Rc<Subnet> {
        assert!(self.n_out > 0, "Subnet has no outputs");

        // Bypass buffers and recompute depths over the remaining cells.
        let mut image: Vec<Option<Link>> = vec![None; self.entries.len()];
        let mut depth = vec![0u32; self.entries.len()];
        let mut kept: Vec<(EntryId, Vec<Link>)> = Vec::with_capacity(self.n_cell);
        for id in self.iter() {
            let links: Vec<Link> = self
                .links(id)
                .iter()
                .map(|&l| match image[l.idx().index()] {
                    Some(target) => redirect(l, target),
                    None => panic!("Entry {} is used before it is defined", l.idx()),
                })
                .collect();
            if delete_bufs && self.cell(id).is_buf() {
                image[id.index()] = Some(links[0]);
                continue;
            }
            image[id.index()] = Some(Link::new(id));
            depth[id.index()] = links
                .iter()
                .map(|l| depth[l.idx().index()] + 1)
                .max()
                .unwrap_or(0);
            kept.push((id, links));
        }

        // Inputs, then cells by depth, then outputs. The sort is stable, so
        // a builder whose order is already exact keeps it.
        kept.sort_by_key(|(id, _)| {
            let cell = self.cell(*id);
            if cell.is_in() {
                (0, 0)
            } else if cell.is_out() {
                (2, 0)
            } else {
                (1, depth[id.index()])
            }
        });

        let mut index: Vec<Option<EntryId>> = vec![None; self.entries.len()];
        let mut entries: Vec<Entry> = Vec::with_capacity(self.entries.len());
        for (id, links) in &kept {
            let cell = self.cell(*id);
            let links: Vec<Link> = links
                .iter()
                .map(|&l| match index[l.idx().index()] {
                    Some(new) => Link::with_port(new, l.out(), l.inv()),
                    None => panic!("Entry {} is used before it is defined", l.idx()),
                })
                .collect();
            let mut new_cell = Cell::new(cell.type_id(), cell.symbol(), &links);
            new_cell.set_flip_flop(cell.flip_flop_id());
            index[id.index()] = Some(EntryId::new(entries.len()));
            entries.extend(cell_entries(new_cell, &links));
        }

        let mut refcounts = vec![0u32; entries.len()];
        for (i, entry) in entries.iter().enumerate() {
            if entry.is_cell() {
                for link in links_at(&entries, EntryId::new(i)) {
                    refcounts[link.idx().index()] += 1;
                }
            }
        }
        for (entry, &refcount) in entries.iter_mut().zip(&refcounts) {
            if let Some(cell) = entry.as_cell_mut() {
                cell.set_refcount(refcount);
            }
        }

        let n = entries.len();
        assert!(
            entries[..self.n_in]
                .iter()
                .all(|e| e.as_cell().is_some_and(|c| c.is_in())),
            "Inputs should precede the other cells"
        );
        assert!(
            entries[n - self.n_out..]
                .iter()
                .all(|e| e.as_cell().is_some_and(|c| c.is_out())),
            "Outputs should follow the other cells"
        );

        debug!(
            "make: {} entries ({} inputs, {} outputs)",
            n, self.n_in, self.n_out
        );
        Rc::new(Subnet::new(entries, self.n_in, self.n_out))
    }

    /// Subnet with `n_in` unused inputs and a single constant output.
    pub fn make_const(n_in: usize, value: bool) -> Rc<Subnet> {
        let mut builder = Self::new();
        builder.add_inputs(n_in);
        let symbol = if value { CellSymbol::One } else { CellSymbol::Zero };
        let c = builder.add_cell(symbol, &[]);
        builder.add_output(c);
        builder.make(false)
    }

    pub fn make_zero(n_in: usize) -> Rc<Subnet> {
        Self::make_const(n_in, false)
    }

    pub fn make_one(n_in: usize) -> Rc<Subnet> {
        Self::make_const(n_in, true)
    }
}
