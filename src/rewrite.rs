//! Local rewriting of a [`SubnetBuilder`]: cell replacement, merging of
//! equivalent cells and fragment substitution.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Sub;

use log::debug;

use crate::builder::{redirect, SubnetBuilder};
use crate::cell::IN_PLACE_LINKS;
use crate::celltype::{CellSymbol, CellTypeId};
use crate::link::Link;
use crate::subnet::Subnet;
use crate::types::EntryId;

/// Boundary of a builder fragment: its inputs and its (single) root.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InOutMapping {
    pub inputs: Vec<EntryId>,
    pub outputs: Vec<EntryId>,
}

impl InOutMapping {
    pub fn new(inputs: Vec<EntryId>, outputs: Vec<EntryId>) -> Self {
        Self { inputs, outputs }
    }

    pub fn in_num(&self) -> usize {
        self.inputs.len()
    }
    pub fn out_num(&self) -> usize {
        self.outputs.len()
    }
}

/// Size, depth and weight of a set of cells. As a result of
/// [`SubnetBuilder::evaluate_replace`], positive values mean a gain.
#[derive(Debug, Copy, Clone, Default, PartialEq)]
pub struct Effect {
    pub size: i32,
    pub depth: i32,
    pub weight: f32,
}

impl Sub for Effect {
    type Output = Effect;

    fn sub(self, rhs: Self) -> Self::Output {
        Effect {
            size: self.size - rhs.size,
            depth: self.depth - rhs.depth,
            weight: self.weight - rhs.weight,
        }
    }
}

impl SubnetBuilder {
    /// Rewrites the type and links of a cell in place.
    ///
    /// The new fan-ins are referenced before the old ones are released, so
    /// a link shared by both versions survives. With `delete_zero_refcount`,
    /// old fan-ins left without users are deleted transitively.
    ///
    /// # Panics
    ///
    /// Panics if either version has more than [`IN_PLACE_LINKS`] links, or
    /// on an input/output mismatch (outputs can only become outputs).
    pub fn replace_cell(
        &mut self,
        id: EntryId,
        type_id: CellTypeId,
        links: &[Link],
        delete_zero_refcount: bool,
    ) {
        let old = *self.cell(id);
        assert!(
            old.arity() <= IN_PLACE_LINKS && links.len() <= IN_PLACE_LINKS,
            "Only cells with in-place links can be replaced"
        );
        let symbol = type_id.symbol();
        if old.is_out() {
            assert_eq!(symbol, CellSymbol::Out, "An output can only be replaced by an output");
        } else {
            assert!(!old.is_in(), "Inputs cannot be replaced");
            assert!(
                !matches!(symbol, CellSymbol::In | CellSymbol::Out),
                "A cell cannot be replaced by {}",
                symbol
            );
        }
        self.check_cell(type_id, links);
        debug!("replace {}: {} -> {}{:?}", id, old.symbol(), symbol, links);

        let old_key = self.strash_key(id);
        self.destrash(id);

        let old_links = self.links(id);
        for link in links {
            self.inc_ref(link.idx(), id);
        }
        let mut released = Vec::new();
        for link in &old_links {
            if self.dec_ref(link.idx(), id) {
                released.push(link.idx());
            }
        }

        self.rewrite_cell(id, type_id, links);
        self.restrash(id);
        if self.strash_key(id) != old_key {
            self.reset_session(id);
        }

        let depth = self.links_depth(links);
        if depth != self.depth(id) {
            if old.is_out() {
                self.set_depth(id, depth);
            } else {
                let old_next = self.next(id);
                self.delete_depth_bounds(id);
                self.set_depth(id, depth);
                self.add_depth_bounds(id);
                self.recompute_depths_from(old_next);
            }
        }

        if delete_zero_refcount {
            for source in released {
                if self.is_live(source) && self.cell(source).refcount() == 0 {
                    self.delete_cell(source);
                }
            }
        }
    }

    /// Merges cells proven equivalent: every user of a removed cell is
    /// redirected to the kept one, then the removed cells are deleted.
    ///
    /// # Panics
    ///
    /// Panics on a malformed map: a removed cell listed twice or also kept,
    /// a removed input or output, or a kept cell that does not precede the
    /// cells it replaces in the order.
    pub fn merge_cells(&mut self, map: &BTreeMap<EntryId, BTreeSet<EntryId>>) {
        let mut target: HashMap<EntryId, EntryId> = HashMap::new();
        for (&kept, removed) in map {
            assert!(self.is_live(kept), "Kept entry {} is not a live cell", kept);
            for &r in removed {
                assert!(
                    r != kept && !map.contains_key(&r),
                    "Malformed merge map: {} is both kept and removed",
                    r
                );
                assert!(
                    target.insert(r, kept).is_none(),
                    "Malformed merge map: {} is removed twice",
                    r
                );
                let cell = self.cell(r);
                assert!(
                    !cell.is_in() && !cell.is_out(),
                    "Inputs and outputs cannot be merged away"
                );
            }
        }
        if target.is_empty() {
            return;
        }

        let order: Vec<EntryId> = self.iter().collect();
        let mut position = vec![usize::MAX; self.max_idx()];
        for (i, &id) in order.iter().enumerate() {
            position[id.index()] = i;
        }
        for (&r, &k) in &target {
            assert!(
                position[k.index()] < position[r.index()],
                "Kept entry {} should precede removed entry {}",
                k,
                r
            );
        }
        debug!("merge: {} cells into {} representatives", target.len(), map.len());

        let start = target
            .keys()
            .map(|r| position[r.index()])
            .min()
            .unwrap_or(0);
        for &user in &order[start..] {
            if target.contains_key(&user) {
                continue;
            }
            let links = self.links(user);
            if !links.iter().any(|l| target.contains_key(&l.idx())) {
                continue;
            }
            self.destrash(user);
            for (j, link) in links.iter().enumerate() {
                if let Some(&kept) = target.get(&link.idx()) {
                    self.set_link(user, j, link.with_idx(kept));
                    self.inc_ref(kept, user);
                    self.dec_ref(link.idx(), user);
                }
            }
            self.restrash(user);
            self.reset_session(user);
        }

        let mut removed: Vec<EntryId> = target.into_keys().collect();
        removed.sort_by_key(|r| std::cmp::Reverse(position[r.index()]));
        for r in removed {
            self.delete_cell(r);
        }

        // Redirected users may have become shallower.
        let first = order[start..].iter().copied().find(|&id| self.is_live(id));
        self.recompute_depths_from(first);
    }

    /// Replaces the given cells with constant zero.
    pub fn replace_with_zero(&mut self, ids: &BTreeSet<EntryId>) {
        self.replace_with_const(ids, false);
    }

    /// Replaces the given cells with constant one.
    pub fn replace_with_one(&mut self, ids: &BTreeSet<EntryId>) {
        self.replace_with_const(ids, true);
    }

    fn replace_with_const(&mut self, ids: &BTreeSet<EntryId>, value: bool) {
        if ids.is_empty() {
            return;
        }
        let symbol = if value { CellSymbol::One } else { CellSymbol::Zero };
        let c = self.add_cell(symbol, &[]).idx();
        let removed: BTreeSet<EntryId> = ids.iter().copied().filter(|&id| id != c).collect();
        self.merge_cells(&BTreeMap::from([(c, removed)]));
    }

    /// Substitutes the fragment rooted at `mapping.outputs[0]` with `rhs`,
    /// whose inputs are bound to `mapping.inputs`.
    ///
    /// The rhs root is written into the lhs root when possible; otherwise
    /// the lhs root becomes a buffer of the rhs output. Cells of the old
    /// fragment left without users are deleted.
    ///
    /// # Panics
    ///
    /// Panics if `rhs` is not single-output, if the mapping does not match
    /// its interface, or if the root is not an inner cell with in-place links.
    pub fn replace(&mut self, rhs: &Subnet, mapping: &InOutMapping) {
        self.replace_impl(rhs, mapping, None);
    }

    /// Like [`replace`][Self::replace], assigning weights to the inserted
    /// cells by their index in `rhs`.
    pub fn replace_weighted(
        &mut self,
        rhs: &Subnet,
        mapping: &InOutMapping,
        weight: &dyn Fn(EntryId) -> f32,
    ) {
        self.replace_impl(rhs, mapping, Some(weight));
    }

    fn check_mapping(&self, rhs: &Subnet, mapping: &InOutMapping) -> EntryId {
        assert_eq!(rhs.out_num(), 1, "Replacement should have a single output");
        assert_eq!(mapping.out_num(), 1, "Mapping should have a single output");
        assert_eq!(
            rhs.in_num(),
            mapping.in_num(),
            "Replacement inputs do not match the mapping"
        );
        let root = mapping.outputs[0];
        let cell = self.cell(root);
        assert!(
            !cell.is_in() && !cell.is_out(),
            "Replaced root {} should be an inner cell",
            root
        );
        assert!(
            cell.arity() <= IN_PLACE_LINKS,
            "Replaced root {} should have in-place links only",
            root
        );
        root
    }

    fn replace_impl(
        &mut self,
        rhs: &Subnet,
        mapping: &InOutMapping,
        weight: Option<&dyn Fn(EntryId) -> f32>,
    ) {
        let root = self.check_mapping(rhs, mapping);
        let root_link = rhs.out_link(0);

        // The old root must not be reused by the new cells.
        self.destrash(root);

        let mut map = vec![Link::default(); rhs.size()];
        for (i, &input) in mapping.inputs.iter().enumerate() {
            map[i] = Link::new(input);
        }
        let mut root_in_place = false;
        for (id, cell) in rhs.cells() {
            if cell.is_in() || cell.is_out() {
                continue;
            }
            let links: Vec<Link> = rhs
                .links(id)
                .iter()
                .map(|&l| redirect(l, map[l.idx().index()]))
                .collect();
            let is_root =
                id == root_link.idx() && !root_link.inv() && links.len() <= IN_PLACE_LINKS;
            if is_root {
                match self.strash_lookup(cell.type_id(), &links) {
                    Some(existing) if existing != root => {
                        debug!("replace: root strash hit {}", existing);
                        map[id.index()] = Link::new(existing);
                    }
                    _ => {
                        self.replace_cell(root, cell.type_id(), &links, true);
                        root_in_place = true;
                        map[id.index()] = Link::new(root);
                    }
                }
            } else {
                map[id.index()] = Link::new(self.add_entry(cell.type_id(), &links, None, true));
            }
            if let Some(weight) = weight {
                self.set_weight(map[id.index()].idx(), weight(id));
            }
        }

        if !root_in_place {
            // The rhs output is an input, is inverted, or already existed.
            let link = redirect(root_link, map[root_link.idx().index()]);
            self.replace_cell(root, CellTypeId::BUF, &[link], true);
        }
    }

    /// Computes the effect of [`replace`][Self::replace] without mutating
    /// the builder: deleted cells minus added cells.
    ///
    /// Lhs cells are weighed with [`weight`][Self::weight], rhs cells with
    /// the provider (zero if none is given).
    pub fn evaluate_replace(
        &self,
        rhs: &Subnet,
        mapping: &InOutMapping,
        weight: Option<&dyn Fn(EntryId) -> f32>,
    ) -> Effect {
        let root = self.check_mapping(rhs, mapping);
        let root_link = rhs.out_link(0);

        // Added cells: rhs cells that would not be found in the strash map.
        let mut image: Vec<Option<EntryId>> = vec![None; rhs.size()];
        let mut depth = vec![0u32; rhs.size()];
        for (i, &input) in mapping.inputs.iter().enumerate() {
            image[i] = Some(input);
            depth[i] = self.depth(input);
        }
        let mut added = Effect::default();
        let mut extra_refs: HashMap<EntryId, i64> = HashMap::new();
        // Otherwise the root survives as a buffer.
        let mut root_in_place = false;
        for (id, cell) in rhs.cells() {
            if cell.is_in() || cell.is_out() {
                continue;
            }
            let links = rhs.links(id);
            let mapped: Option<Vec<Link>> = links
                .iter()
                .map(|l| image[l.idx().index()].map(|e| Link::with_port(e, l.out(), l.inv())))
                .collect();
            let hit = mapped
                .and_then(|ls| self.strash_lookup(cell.type_id(), &ls))
                .filter(|&e| e != root);
            match hit {
                Some(existing) => {
                    image[id.index()] = Some(existing);
                    depth[id.index()] = self.depth(existing);
                }
                None => {
                    if id == root_link.idx() && !root_link.inv() && links.len() <= IN_PLACE_LINKS {
                        root_in_place = true;
                    }
                    added.size += 1;
                    added.weight += weight.map_or(0.0, |w| w(id));
                    depth[id.index()] = links
                        .iter()
                        .map(|l| depth[l.idx().index()] + 1)
                        .max()
                        .unwrap_or(0);
                    for link in &links {
                        if let Some(e) = image[link.idx().index()] {
                            *extra_refs.entry(e).or_default() += 1;
                        }
                    }
                }
            }
        }
        if let Some(e) = image[root_link.idx().index()] {
            *extra_refs.entry(e).or_default() += 1;
        }
        added.depth = depth[root_link.idx().index()] as i32;

        // Deleted cells: the root (unless it stays as a buffer) and its cone
        // cells left without users.
        let mut deleted = Effect {
            size: 0,
            depth: self.depth(root) as i32,
            weight: 0.0,
        };
        let mut refs: HashMap<EntryId, i64> = HashMap::new();
        let mut stack = vec![root];
        while let Some(id) = stack.pop() {
            if id != root || root_in_place {
                deleted.size += 1;
                deleted.weight += self.weight(id);
            }
            for link in self.links(id) {
                let source = link.idx();
                let count = refs.entry(source).or_insert_with(|| {
                    self.cell(source).refcount() as i64
                        + extra_refs.get(&source).copied().unwrap_or(0)
                });
                *count -= 1;
                if *count == 0 && !self.cell(source).is_in() {
                    stack.push(source);
                }
            }
        }

        let effect = deleted - added;
        debug!("evaluate_replace at {}: {:?}", root, effect);
        effect
    }
}

#[cfg(test)]
mod tests {
    use test_log::test;

    use super::*;
    use crate::simulator::Simulator;

    fn check_order(builder: &SubnetBuilder) {
        let mut seen = vec![false; builder.max_idx()];
        let mut count = 0;
        for id in builder.iter() {
            for link in builder.links(id) {
                assert!(seen[link.idx().index()], "{} used before defined", link);
            }
            seen[id.index()] = true;
            count += 1;
        }
        assert_eq!(count, builder.cell_num());
    }

    fn truth_tables(builder: &SubnetBuilder) -> Vec<Vec<u64>> {
        let subnet = builder.make(false);
        Simulator::new(&subnet).truth_tables()
    }

    /// (x0 | x1) & (x0 | x2), xor-ed with x1.
    fn sample() -> (SubnetBuilder, Vec<Link>, Link) {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(3);
        let p = builder.add_cell(CellSymbol::Or, &[x[0], x[1]]);
        let q = builder.add_cell(CellSymbol::Or, &[x[0], x[2]]);
        let r = builder.add_cell(CellSymbol::And, &[p, q]);
        let y = builder.add_cell(CellSymbol::Xor, &[r, x[1]]);
        builder.add_output(y);
        (builder, x, r)
    }

    /// x0 | (x1 & x2)
    fn distributed() -> Subnet {
        let mut builder = SubnetBuilder::new();
        let y = builder.add_inputs(3);
        let t = builder.add_cell(CellSymbol::And, &[y[1], y[2]]);
        let s = builder.add_cell(CellSymbol::Or, &[y[0], t]);
        builder.add_output(s);
        builder.make(false).as_ref().clone()
    }

    #[test]
    fn test_replace_cell() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let b = builder.add_cell(CellSymbol::Xor, &[a, x[0]]);
        builder.add_output(b);

        builder.replace_cell(b.idx(), CellTypeId::OR, &[x[0], !x[1]], true);
        assert!(!builder.is_live(a.idx()));
        assert_eq!(builder.cell(b.idx()).symbol(), CellSymbol::Or);
        assert_eq!(builder.cell(b.idx()).refcount(), 1);
        assert_eq!(builder.cell(x[0].idx()).refcount(), 1);
        assert_eq!(builder.depth(b.idx()), 1);
        check_order(&builder);

        // The rewritten cell is strashed under its new key.
        let again = builder.add_cell(CellSymbol::Or, &[!x[1], x[0]]);
        assert_eq!(again, b);
    }

    #[test]
    fn test_replace_cell_keeps_zero_refcount() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let b = builder.add_cell(CellSymbol::Buf, &[a]);
        builder.add_output(b);
        builder.replace_cell(b.idx(), CellTypeId::BUF, &[x[1]], false);
        assert!(builder.is_live(a.idx()));
        assert_eq!(builder.cell(a.idx()).refcount(), 0);
    }

    #[test]
    fn test_replace_cell_moves_fanouts() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(3);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let b = builder.add_cell(CellSymbol::Or, &[a, x[2]]);
        let c = builder.add_cell(CellSymbol::Xor, &[b, x[0]]);
        builder.add_output(c);
        let deep = builder.add_cell(CellSymbol::And, &[c, x[1]]);
        builder.add_output(deep);

        // a gets deeper, its fanout cone must follow.
        let d = builder.add_cell(CellSymbol::Or, &[x[1], x[2]]);
        let e = builder.add_cell(CellSymbol::And, &[d, x[0]]);
        builder.replace_cell(a.idx(), CellTypeId::XOR, &[e, x[1]], true);
        assert_eq!(builder.depth(a.idx()), 3);
        assert_eq!(builder.depth(b.idx()), 4);
        assert_eq!(builder.depth(c.idx()), 5);
        assert_eq!(builder.depth(deep.idx()), 6);
        check_order(&builder);

        // And back to a shallow cell.
        builder.replace_cell(a.idx(), CellTypeId::AND, &[x[0], x[1]], true);
        assert!(!builder.is_live(e.idx()));
        assert_eq!(builder.depth(c.idx()), 3);
        check_order(&builder);
    }

    #[test]
    #[should_panic(expected = "Only cells with in-place links")]
    fn test_replace_wide_cell() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(6);
        let w = builder.add_cell(CellSymbol::And, &x);
        builder.add_output(w);
        builder.replace_cell(w.idx(), CellTypeId::AND, &x[..2], true);
    }

    fn merge_sample() -> (SubnetBuilder, [EntryId; 4]) {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(4);
        let a = builder.add_cell(CellSymbol::Or, &[x[0], x[1]]);
        let b = builder.add_cell(CellSymbol::Xor, &[x[0], x[1]]);
        let c = builder.add_cell(CellSymbol::And, &[x[0], !x[1]]);
        let d = builder.add_cell(CellSymbol::And, &[x[2], x[3]]);
        let u = builder.add_cell(CellSymbol::Or, &[b, x[2]]);
        let v = builder.add_cell(CellSymbol::Xor, &[c, !d]);
        builder.add_output(u);
        builder.add_output(v);
        builder.add_output(a);
        (builder, [a.idx(), b.idx(), c.idx(), d.idx()])
    }

    #[test]
    fn test_merge_transitivity() {
        let (mut stepwise, [a, b, c, d]) = merge_sample();
        stepwise.merge_cells(&BTreeMap::from([(a, BTreeSet::from([b, c]))]));
        stepwise.merge_cells(&BTreeMap::from([(a, BTreeSet::from([d]))]));
        check_order(&stepwise);

        let (mut at_once, [a, b, c, d]) = merge_sample();
        at_once.merge_cells(&BTreeMap::from([(a, BTreeSet::from([b, c, d]))]));
        check_order(&at_once);

        assert!(!at_once.is_live(b) && !at_once.is_live(c) && !at_once.is_live(d));
        assert_eq!(at_once.cell(a).refcount(), 4);
        assert_eq!(stepwise.make(false), at_once.make(false));
    }

    #[test]
    #[should_panic(expected = "should precede")]
    fn test_merge_order() {
        let (mut builder, [a, b, _, _]) = merge_sample();
        builder.merge_cells(&BTreeMap::from([(b, BTreeSet::from([a]))]));
    }

    #[test]
    #[should_panic(expected = "removed twice")]
    fn test_merge_malformed() {
        let (mut builder, [a, b, c, _]) = merge_sample();
        builder.merge_cells(&BTreeMap::from([
            (a, BTreeSet::from([c])),
            (b, BTreeSet::from([c])),
        ]));
    }

    #[test]
    fn test_replace_with_constants() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let f = builder.add_cell(CellSymbol::And, &[x[0], !x[0]]);
        let t = builder.add_cell(CellSymbol::Or, &[x[1], !x[1]]);
        let y = builder.add_cell(CellSymbol::Xor, &[f, t, x[0]]);
        builder.add_output(y);
        let before = truth_tables(&builder);

        builder.replace_with_zero(&BTreeSet::from([f.idx()]));
        builder.replace_with_one(&BTreeSet::from([t.idx()]));
        check_order(&builder);
        assert!(!builder.is_live(f.idx()));
        let links = builder.links(y.idx());
        assert_eq!(builder.cell(links[0].idx()).symbol(), CellSymbol::Zero);
        assert_eq!(builder.cell(links[1].idx()).symbol(), CellSymbol::One);
        assert_eq!(truth_tables(&builder), before);
    }

    #[test]
    fn test_replace_preserves_function() {
        let (mut builder, x, r) = sample();
        let before = truth_tables(&builder);
        let rhs = distributed();
        let mapping = InOutMapping::new(x.iter().map(|l| l.idx()).collect(), vec![r.idx()]);

        let effect = builder.evaluate_replace(&rhs, &mapping, None);
        assert_eq!(effect.size, 1);
        assert_eq!(effect.depth, 0);

        let n = builder.cell_num();
        builder.replace(&rhs, &mapping);
        check_order(&builder);
        assert_eq!(builder.cell_num(), n - 1);
        assert_eq!(builder.cell(r.idx()).symbol(), CellSymbol::Or);
        assert_eq!(truth_tables(&builder), before);
    }

    #[test]
    fn test_replace_with_input() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let b = builder.add_cell(CellSymbol::And, &[!x[0], x[1]]);
        let o = builder.add_cell(CellSymbol::Or, &[a, b]);
        builder.add_output(o);
        let before = truth_tables(&builder);

        // (x0 & x1) | (!x0 & x1) == x1
        let mut rhs = SubnetBuilder::new();
        let y = rhs.add_inputs(2);
        rhs.add_output(y[1]);
        let rhs = rhs.make(false);
        let mapping = InOutMapping::new(vec![x[0].idx(), x[1].idx()], vec![o.idx()]);

        // a and b go away, the root stays as a buffer of x1.
        let effect = builder.evaluate_replace(&rhs, &mapping, None);
        assert_eq!(effect.size, 2);
        let n = builder.cell_num();
        builder.replace(&rhs, &mapping);
        check_order(&builder);
        assert_eq!(builder.cell_num(), n - 2);
        assert!(builder.cell(o.idx()).is_buf());
        assert!(!builder.is_live(a.idx()) && !builder.is_live(b.idx()));
        assert_eq!(truth_tables(&builder), before);
        assert_eq!(builder.make(true).size(), 3);
    }

    #[test]
    fn test_replace_strash_hit() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let n = builder.add_cell(CellSymbol::Or, &[!x[0], !x[1]]);
        builder.add_output(a);
        builder.add_output(!n);

        // !(!x0 | !x1) == x0 & x1, which already exists.
        let mut rhs = SubnetBuilder::new();
        let y = rhs.add_inputs(2);
        let t = rhs.add_cell(CellSymbol::And, &[y[0], y[1]]);
        rhs.add_output(!t);
        let rhs = rhs.make(false);
        let mapping = InOutMapping::new(vec![x[0].idx(), x[1].idx()], vec![n.idx()]);

        // The root turns into a buffer and nothing else is freed.
        let effect = builder.evaluate_replace(&rhs, &mapping, None);
        assert_eq!(effect.size, 0);
        let cells = builder.cell_num();
        builder.replace_weighted(&rhs, &mapping, &|_| 1.0);
        assert_eq!(builder.cell_num(), cells);
        assert_eq!(builder.links(n.idx()), vec![!a]);
        assert_eq!(builder.cell(a.idx()).refcount(), 2);
        let subnet = builder.make(true);
        assert_eq!(subnet.out_link(1), subnet.out_link(0));
    }

    #[test]
    fn test_evaluate_replace_inverted_root() {
        let (mut builder, x, r) = sample();
        // !(!x0 & (!x1 | !x2)) == x0 | (x1 & x2): new cells under a buffer root.
        let mut rhs = SubnetBuilder::new();
        let y = rhs.add_inputs(3);
        let t = rhs.add_cell(CellSymbol::Or, &[!y[1], !y[2]]);
        let s = rhs.add_cell(CellSymbol::And, &[!y[0], t]);
        rhs.add_output(!s);
        let rhs = rhs.make(false);
        let mapping = InOutMapping::new(x.iter().map(|l| l.idx()).collect(), vec![r.idx()]);

        let before = truth_tables(&builder);
        let effect = builder.evaluate_replace(&rhs, &mapping, None);
        let n = builder.cell_num() as i32;
        builder.replace(&rhs, &mapping);
        check_order(&builder);
        assert!(builder.cell(r.idx()).is_buf());
        assert_eq!(effect.size, n - builder.cell_num() as i32);
        assert_eq!(truth_tables(&builder), before);
    }

    #[test]
    fn test_merge_lowers_depths() {
        let mut builder = SubnetBuilder::new();
        let x = builder.add_inputs(2);
        let a = builder.add_cell(CellSymbol::And, &[x[0], x[1]]);
        let d = builder.add_cell(CellSymbol::Or, &[a, !x[0]]);
        let e = builder.add_cell(CellSymbol::And, &[d, x[1]]);
        let u = builder.add_cell(CellSymbol::Xor, &[e, x[0]]);
        let w = builder.add_cell(CellSymbol::Or, &[u, !x[1]]);
        builder.add_output(w);
        assert_eq!(builder.depth(w.idx()), 5);

        builder.merge_cells(&BTreeMap::from([(a.idx(), BTreeSet::from([e.idx()]))]));
        assert!(!builder.is_live(d.idx()));
        assert_eq!(builder.depth(u.idx()), 2);
        assert_eq!(builder.depth(w.idx()), 3);
        assert_eq!(builder.max_depth(), 3);
        check_order(&builder);
        let order: Vec<EntryId> = builder.iter().collect();
        let pos = |id: EntryId| order.iter().position(|&o| o == id).unwrap();
        assert!(pos(a.idx()) < pos(u.idx()) && pos(u.idx()) < pos(w.idx()));
    }

    #[test]
    fn test_finalize_after_rewrites() {
        let (mut builder, x, r) = sample();
        let mapping = InOutMapping::new(x.iter().map(|l| l.idx()).collect(), vec![r.idx()]);
        builder.replace(&distributed(), &mapping);
        let first = builder.make(true);
        let second = SubnetBuilder::from_subnet(&first).make(true);
        assert_eq!(first, second);

        let (mut builder, [a, b, c, _]) = merge_sample();
        builder.merge_cells(&BTreeMap::from([(a, BTreeSet::from([b, c]))]));
        for delete_bufs in [false, true] {
            let first = builder.make(delete_bufs);
            let second = SubnetBuilder::from_subnet(&first).make(delete_bufs);
            println!("{}", first);
            assert_eq!(first, second);
        }
    }

    #[test]
    fn test_evaluate_replace_weights() {
        let (mut builder, x, r) = sample();
        for id in builder.iter().collect::<Vec<_>>() {
            builder.set_weight(id, 2.0);
        }
        let rhs = distributed();
        let mapping = InOutMapping::new(x.iter().map(|l| l.idx()).collect(), vec![r.idx()]);
        let effect = builder.evaluate_replace(&rhs, &mapping, Some(&|_| 0.5));
        assert_eq!(effect.weight, 6.0 - 1.0);
        let cells = builder.cell_num();
        assert_eq!(builder.evaluate_replace(&rhs, &mapping, None).size, 1);
        assert_eq!(builder.cell_num(), cells);
    }
}
